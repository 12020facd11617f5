//! Resource tables: directory, payload bytes, and file index.
//!
//! Embedded resources serialize as three sections. The directory holds one
//! 8-byte record per resource pointing into the payload section; the file
//! index holds one 12-byte record per source resource file.

use crate::{
    tables::base::RecordWriter,
    Result,
};

/// On-wire resource record width.
pub const RESOURCE_RECORD_SIZE: usize = 8;

/// On-wire resource-file record width.
pub const RESOURCE_FILE_RECORD_SIZE: usize = 12;

/// Payload classification of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    #[allow(missing_docs)]
    Invalid = 0x00,
    #[allow(missing_docs)]
    Bitmap = 0x01,
    #[allow(missing_docs)]
    Font = 0x02,
    #[allow(missing_docs)]
    String = 0x03,
    #[allow(missing_docs)]
    Binary = 0x04,
}

impl ResourceKind {
    /// Classify a resource by its source name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".bmp") || lower.ends_with(".gif") || lower.ends_with(".jpg") {
            ResourceKind::Bitmap
        } else if lower.ends_with(".tinyfnt") {
            ResourceKind::Font
        } else {
            ResourceKind::Binary
        }
    }
}

/// One resource directory record.
pub struct ResourceRecord {
    /// Resource identifier, unique within the image
    pub id: u16,
    /// Payload classification
    pub kind: ResourceKind,
    /// Reserved flag byte
    pub flags: u8,
    /// Offset of the payload within the resource-data section
    pub offset: u32,
}

/// One resource-file record.
pub struct ResourceFileRecord {
    /// File name string id
    pub name: u16,
    /// Number of resources the file contributed
    pub resource_count: u32,
    /// Directory index of the file's first resource
    pub first_resource: u32,
}

/// The resource tables of one output image.
pub struct ResourcesTable {
    resources: Vec<ResourceRecord>,
    files: Vec<ResourceFileRecord>,
    data: Vec<u8>,
}

impl ResourcesTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        ResourcesTable {
            resources: Vec::new(),
            files: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append one resource payload, returning its directory record index.
    pub fn add_resource(&mut self, id: u16, kind: ResourceKind, payload: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(payload);
        self.resources.push(ResourceRecord {
            id,
            kind,
            flags: 0,
            offset,
        });
        self.resources.len() as u32 - 1
    }

    /// Append one file index record.
    pub fn add_file(&mut self, record: ResourceFileRecord) {
        self.files.push(record);
    }

    /// Number of directory entries.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of file entries.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Emit the directory records.
    ///
    /// A no-op before minimization completes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidRecord`] on a width violation.
    pub fn write_resources(&self, minimize_complete: bool, out: &mut Vec<u8>) -> Result<()> {
        if !minimize_complete {
            return Ok(());
        }
        for record in &self.resources {
            let mut writer = RecordWriter::begin(out);
            writer.write_u16(record.id);
            writer.write_u8(record.kind as u8);
            writer.write_u8(record.flags);
            writer.write_u32(record.offset);
            writer.finish("resources", RESOURCE_RECORD_SIZE)?;
        }
        Ok(())
    }

    /// Emit the raw payload section.
    pub fn write_data(&self, minimize_complete: bool, out: &mut Vec<u8>) {
        if !minimize_complete {
            return;
        }
        out.extend_from_slice(&self.data);
    }

    /// Emit the file index records.
    ///
    /// A no-op before minimization completes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidRecord`] on a width violation.
    pub fn write_files(&self, minimize_complete: bool, out: &mut Vec<u8>) -> Result<()> {
        if !minimize_complete {
            return Ok(());
        }
        for record in &self.files {
            let mut writer = RecordWriter::begin(out);
            writer.write_u16(record.name);
            writer.write_u16(0);
            writer.write_u32(record.resource_count);
            writer.write_u32(record.first_resource);
            writer.finish("resource-file", RESOURCE_FILE_RECORD_SIZE)?;
        }
        Ok(())
    }
}

impl Default for ResourcesTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_offsets_accumulate() {
        let mut table = ResourcesTable::new();
        table.add_resource(1, ResourceKind::Binary, &[0xAA; 5]);
        table.add_resource(2, ResourceKind::Binary, &[0xBB; 3]);

        let mut out = Vec::new();
        table.write_resources(true, &mut out).unwrap();
        assert_eq!(out.len(), 2 * RESOURCE_RECORD_SIZE);
        // Second record's offset is the first payload's length.
        assert_eq!(&out[RESOURCE_RECORD_SIZE + 4..], &[5, 0, 0, 0]);

        let mut data = Vec::new();
        table.write_data(true, &mut data);
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn kind_classification() {
        assert_eq!(ResourceKind::from_name("logo.BMP"), ResourceKind::Bitmap);
        assert_eq!(ResourceKind::from_name("small.tinyfnt"), ResourceKind::Font);
        assert_eq!(ResourceKind::from_name("config.bin"), ResourceKind::Binary);
    }
}
