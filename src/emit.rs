//! Binary image emission.
//!
//! Lays out the output image: a fixed header followed by every table section
//! in a fixed order, each padded to 4-byte alignment. The header carries the
//! assembly identity, the entry point token, a CRC pair, and one
//! (offset, length) pair per section. Emission is all-or-nothing: the image
//! is assembled in memory and only then written to disk, so no partial
//! output can survive a failure.

use std::path::Path;

use crate::{
    tables::{
        token::{NanoToken, TableKind},
        TablesContext,
    },
    Result,
};

/// Image marker at offset zero.
pub const IMAGE_MARKER: &[u8; 8] = b"NANOPK1\0";

/// Format version of the emitted image.
pub const IMAGE_VERSION: u16 = 2;

/// Sections in emission order.
pub const SECTION_ORDER: [TableKind; 17] = [
    TableKind::AssemblyRef,
    TableKind::TypeRef,
    TableKind::FieldRef,
    TableKind::MethodRef,
    TableKind::TypeDef,
    TableKind::FieldDef,
    TableKind::MethodDef,
    TableKind::GenericParam,
    TableKind::MethodSpec,
    TableKind::Attributes,
    TableKind::TypeSpec,
    TableKind::Resources,
    TableKind::ResourceData,
    TableKind::Signatures,
    TableKind::Strings,
    TableKind::ByteCode,
    TableKind::ResourceFile,
];

const HEADER_SIZE: usize = 8  // marker
    + 4 // header crc
    + 4 // image crc
    + 4 // flags
    + 4 // entry point token
    + 8 // version
    + 2 // assembly name string id
    + 2 // string table version
    + SECTION_ORDER.len() * 8;

/// One emitted section.
pub struct Section {
    /// Which table the section serializes
    pub kind: TableKind,
    /// File offset of the section
    pub offset: u32,
    /// Unpadded section length in bytes
    pub length: u32,
}

/// A fully laid-out output image.
pub struct Image {
    /// The complete file contents
    pub bytes: Vec<u8>,
    /// Section directory, in emission order
    pub sections: Vec<Section>,
}

fn write_section(ctx: &TablesContext<'_>, kind: TableKind, out: &mut Vec<u8>) -> Result<()> {
    let latched = ctx.is_minimize_complete();
    match kind {
        TableKind::AssemblyRef => ctx.assembly_refs.write(latched, out)?,
        TableKind::TypeRef => ctx.type_refs.write(latched, out)?,
        TableKind::FieldRef => ctx.field_refs.write(latched, out)?,
        TableKind::MethodRef => ctx.method_refs.write(latched, out)?,
        TableKind::TypeDef => ctx.type_defs.write(latched, out)?,
        TableKind::FieldDef => ctx.field_defs.write(latched, out)?,
        TableKind::MethodDef => ctx.method_defs.write(latched, out)?,
        TableKind::GenericParam => ctx.generic_params.write(latched, out)?,
        TableKind::MethodSpec => ctx.method_specs.write(latched, out)?,
        TableKind::Attributes => ctx.attributes.write(latched, out)?,
        TableKind::TypeSpec => ctx.type_specs.write(latched, out)?,
        TableKind::Resources => ctx.resources.write_resources(latched, out)?,
        TableKind::ResourceData => ctx.resources.write_data(latched, out),
        TableKind::Signatures => {
            if latched {
                ctx.signatures.write(out);
            }
        }
        TableKind::Strings => {
            if latched {
                ctx.strings.write(out);
            }
        }
        TableKind::ByteCode => ctx.byte_code.write(latched, out),
        TableKind::ResourceFile => ctx.resources.write_files(latched, out)?,
        TableKind::EndOfAssembly => {}
    }
    Ok(())
}

/// Lay out the complete image in memory.
///
/// # Errors
/// Propagates record-width violations from the table serializers.
pub fn emit_image(ctx: &TablesContext<'_>) -> Result<Image> {
    let mut sections = Vec::with_capacity(SECTION_ORDER.len());
    let mut body = Vec::new();

    for kind in SECTION_ORDER {
        let offset = HEADER_SIZE + body.len();
        let before = body.len();
        write_section(ctx, kind, &mut body)?;
        let length = body.len() - before;

        // Pad every section to 4-byte alignment.
        while body.len() % 4 != 0 {
            body.push(0);
        }

        sections.push(Section {
            kind,
            offset: offset as u32,
            length: length as u32,
        });
    }

    let entry_point = ctx
        .entry_point_id()
        .map_or(0xFFFF_FFFF, |id| NanoToken::new(TableKind::MethodDef, id).value());

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(IMAGE_MARKER);
    header.extend_from_slice(&0u32.to_le_bytes()); // header crc, patched below
    header.extend_from_slice(&0u32.to_le_bytes()); // image crc, patched below
    header.extend_from_slice(&ctx.assembly.flags.to_le_bytes());
    header.extend_from_slice(&entry_point.to_le_bytes());
    header.extend_from_slice(&ctx.assembly.version.major.to_le_bytes());
    header.extend_from_slice(&ctx.assembly.version.minor.to_le_bytes());
    header.extend_from_slice(&ctx.assembly.version.build.to_le_bytes());
    header.extend_from_slice(&ctx.assembly.version.revision.to_le_bytes());
    header.extend_from_slice(&ctx.assembly_name_id.to_le_bytes());
    header.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    for section in &sections {
        header.extend_from_slice(&section.offset.to_le_bytes());
        header.extend_from_slice(&section.length.to_le_bytes());
    }
    debug_assert_eq!(header.len(), HEADER_SIZE);

    let image_crc = crc32fast::hash(&body);
    header[12..16].copy_from_slice(&image_crc.to_le_bytes());
    let header_crc = crc32fast::hash(&header);
    header[8..12].copy_from_slice(&header_crc.to_le_bytes());

    let mut bytes = header;
    bytes.extend_from_slice(&body);

    Ok(Image { bytes, sections })
}

/// Emit the image and write it to disk.
///
/// On any failure the output file is removed; partial output never survives.
///
/// # Errors
/// Propagates emission and I/O errors.
pub fn write_image(ctx: &TablesContext<'_>, path: &Path) -> Result<Image> {
    let image = emit_image(ctx)?;
    if let Err(error) = std::fs::write(path, &image.bytes) {
        let _ = std::fs::remove_file(path);
        return Err(error.into());
    }
    Ok(image)
}
