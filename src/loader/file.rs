//! PE shell for the source assembly.
//!
//! Maps the input file into memory, parses the PE envelope with goblin, and
//! resolves the CLI (cor20) header. Only the pieces the metadata importer
//! needs survive parsing: the section ranges for RVA translation, the
//! metadata and resources directories, and the entry point token.

use std::path::Path;

use memmap2::Mmap;

use crate::{loader::io::read_le_at, malformed_error, Error::OutOfBounds, Result};

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn data(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => map,
            Backing::Owned(vec) => vec,
        }
    }
}

struct SectionRange {
    rva: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
}

/// The CLI header (cor20) of a managed PE image.
pub struct Cor20Header {
    /// RVA of the metadata root
    pub metadata_rva: u32,
    /// Size of the metadata in bytes
    pub metadata_size: u32,
    /// Runtime flags
    pub flags: u32,
    /// Metadata token of the entry point method, 0 when absent
    pub entry_point_token: u32,
    /// RVA of the managed resources blob, 0 when absent
    pub resources_rva: u32,
    /// Size of the managed resources blob
    pub resources_size: u32,
}

/// A loaded managed PE file.
///
/// Owns the raw bytes (memory-mapped or in-memory) and offers RVA
/// translation against the section table.
pub struct PeFile {
    backing: Backing,
    sections: Vec<SectionRange>,
    cor20: Cor20Header,
}

impl PeFile {
    /// Map a managed PE file from disk.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not a PE image, or
    /// carries no CLI header.
    pub fn from_path(path: &Path) -> Result<PeFile> {
        let file = std::fs::File::open(path)?;
        // Safety invariant: the mapping is read-only and the file is not
        // truncated while the PeFile is alive.
        let map = unsafe { Mmap::map(&file)? };
        Self::from_backing(Backing::Mapped(map))
    }

    /// Parse a managed PE image already resident in memory.
    ///
    /// # Errors
    /// Returns an error when the buffer is not a PE image or carries no CLI
    /// header.
    pub fn from_memory(data: Vec<u8>) -> Result<PeFile> {
        Self::from_backing(Backing::Owned(data))
    }

    fn from_backing(backing: Backing) -> Result<PeFile> {
        let (sections, clr_rva, clr_size) = {
            let pe = goblin::pe::PE::parse(backing.data())?;

            let optional = pe
                .header
                .optional_header
                .ok_or_else(|| malformed_error!("PE image has no optional header"))?;
            let clr_dir = optional
                .data_directories
                .get_clr_runtime_header()
                .ok_or_else(|| malformed_error!("PE image has no CLI runtime header"))?;

            let sections = pe
                .sections
                .iter()
                .map(|section| SectionRange {
                    rva: section.virtual_address,
                    virtual_size: section.virtual_size,
                    raw_offset: section.pointer_to_raw_data,
                    raw_size: section.size_of_raw_data,
                })
                .collect::<Vec<_>>();

            (sections, clr_dir.virtual_address, clr_dir.size)
        };

        let mut file = PeFile {
            backing,
            sections,
            cor20: Cor20Header {
                metadata_rva: 0,
                metadata_size: 0,
                flags: 0,
                entry_point_token: 0,
                resources_rva: 0,
                resources_size: 0,
            },
        };

        file.cor20 = file.parse_cor20(clr_rva, clr_size)?;
        Ok(file)
    }

    fn parse_cor20(&self, rva: u32, size: u32) -> Result<Cor20Header> {
        if size < 72 {
            return Err(malformed_error!("CLI header too small - {} bytes", size));
        }

        let data = self.read_at_rva(rva, 72)?;
        let mut offset = 8; // cb, major, minor
        let metadata_rva: u32 = read_le_at(data, &mut offset)?;
        let metadata_size: u32 = read_le_at(data, &mut offset)?;
        let flags: u32 = read_le_at(data, &mut offset)?;
        let entry_point_token: u32 = read_le_at(data, &mut offset)?;
        let resources_rva: u32 = read_le_at(data, &mut offset)?;
        let resources_size: u32 = read_le_at(data, &mut offset)?;

        Ok(Cor20Header {
            metadata_rva,
            metadata_size,
            flags,
            entry_point_token,
            resources_rva,
            resources_size,
        })
    }

    /// Raw bytes of the whole image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backing.data()
    }

    /// The parsed CLI header.
    #[must_use]
    pub fn cor20(&self) -> &Cor20Header {
        &self.cor20
    }

    /// Translate an RVA to a file offset through the section table.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] when no section covers the RVA.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        for section in &self.sections {
            let span = section.virtual_size.max(section.raw_size);
            if rva >= section.rva && rva < section.rva + span {
                let delta = rva - section.rva;
                if delta >= section.raw_size {
                    return Err(OutOfBounds);
                }
                return Ok((section.raw_offset + delta) as usize);
            }
        }
        Err(OutOfBounds)
    }

    /// Borrow `len` bytes starting at an RVA.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] when the range is not backed by
    /// file data.
    pub fn read_at_rva(&self, rva: u32, len: usize) -> Result<&[u8]> {
        let offset = self.rva_to_offset(rva)?;
        let end = offset.checked_add(len).ok_or(OutOfBounds)?;
        if end > self.backing.data().len() {
            return Err(OutOfBounds);
        }
        Ok(&self.backing.data()[offset..end])
    }

    /// Borrow everything from an RVA to the end of its section's raw data.
    ///
    /// Used for method bodies, whose length is only known after the header
    /// has been decoded.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] when no section covers the RVA.
    pub fn slice_from_rva(&self, rva: u32) -> Result<&[u8]> {
        for section in &self.sections {
            let span = section.virtual_size.max(section.raw_size);
            if rva >= section.rva && rva < section.rva + span {
                let delta = rva - section.rva;
                if delta >= section.raw_size {
                    return Err(OutOfBounds);
                }
                let start = (section.raw_offset + delta) as usize;
                let end = (section.raw_offset + section.raw_size) as usize;
                let data = self.backing.data();
                if end > data.len() || start > end {
                    return Err(OutOfBounds);
                }
                return Ok(&data[start..end]);
            }
        }
        Err(OutOfBounds)
    }

    /// Borrow the metadata root bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] when the metadata directory does
    /// not resolve to file data.
    pub fn metadata(&self) -> Result<&[u8]> {
        self.read_at_rva(self.cor20.metadata_rva, self.cor20.metadata_size as usize)
    }
}
