//! Raw ECMA-335 table reading from the `#~` stream.
//!
//! Parses the tables-stream header (row counts, heap-size flags), computes
//! column widths (heap indexes, simple indexes, coded indexes), and decodes
//! the raw rows of every table the importer consumes. Tables the pipeline has
//! no use for are measured and skipped, never materialized.

use crate::{loader::io::Parser, malformed_error, Result};

/// ECMA table identifiers, as used in metadata tokens and the `valid` mask.
pub mod table {
    #![allow(missing_docs)]
    pub const MODULE: u8 = 0x00;
    pub const TYPE_REF: u8 = 0x01;
    pub const TYPE_DEF: u8 = 0x02;
    pub const FIELD: u8 = 0x04;
    pub const METHOD_DEF: u8 = 0x06;
    pub const PARAM: u8 = 0x08;
    pub const INTERFACE_IMPL: u8 = 0x09;
    pub const MEMBER_REF: u8 = 0x0A;
    pub const CONSTANT: u8 = 0x0B;
    pub const CUSTOM_ATTRIBUTE: u8 = 0x0C;
    pub const STAND_ALONE_SIG: u8 = 0x11;
    pub const EVENT: u8 = 0x14;
    pub const PROPERTY: u8 = 0x17;
    pub const MODULE_REF: u8 = 0x1A;
    pub const TYPE_SPEC: u8 = 0x1B;
    pub const ASSEMBLY: u8 = 0x20;
    pub const ASSEMBLY_REF: u8 = 0x23;
    pub const FILE: u8 = 0x26;
    pub const EXPORTED_TYPE: u8 = 0x27;
    pub const MANIFEST_RESOURCE: u8 = 0x28;
    pub const NESTED_CLASS: u8 = 0x29;
    pub const GENERIC_PARAM: u8 = 0x2A;
    pub const METHOD_SPEC: u8 = 0x2B;
    pub const GENERIC_PARAM_CONSTRAINT: u8 = 0x2C;
}

/// Coded-index families (ECMA-335 II.24.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coded {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl Coded {
    fn tag_bits(self) -> u32 {
        match self {
            Coded::HasFieldMarshal
            | Coded::HasSemantics
            | Coded::MethodDefOrRef
            | Coded::MemberForwarded
            | Coded::TypeOrMethodDef => 1,
            Coded::TypeDefOrRef
            | Coded::HasConstant
            | Coded::HasDeclSecurity
            | Coded::Implementation
            | Coded::ResolutionScope => 2,
            Coded::MemberRefParent | Coded::CustomAttributeType => 3,
            Coded::HasCustomAttribute => 5,
        }
    }

    /// Member tables, indexed by tag value. `0xFF` marks an unused slot.
    fn tables(self) -> &'static [u8] {
        match self {
            Coded::TypeDefOrRef => &[0x02, 0x01, 0x1B],
            Coded::HasConstant => &[0x04, 0x08, 0x17],
            Coded::HasCustomAttribute => &[
                0x06, 0x04, 0x01, 0x02, 0x08, 0x09, 0x0A, 0x00, 0x0E, 0x17, 0x14, 0x11, 0x1A,
                0x1B, 0x20, 0x23, 0x26, 0x27, 0x28, 0x2A, 0x2C, 0x2B,
            ],
            Coded::HasFieldMarshal => &[0x04, 0x08],
            Coded::HasDeclSecurity => &[0x02, 0x06, 0x20],
            Coded::MemberRefParent => &[0x02, 0x01, 0x1A, 0x06, 0x1B],
            Coded::HasSemantics => &[0x14, 0x17],
            Coded::MethodDefOrRef => &[0x06, 0x0A],
            Coded::MemberForwarded => &[0x04, 0x06],
            Coded::Implementation => &[0x26, 0x23, 0x27],
            Coded::CustomAttributeType => &[0xFF, 0xFF, 0x06, 0x0A, 0xFF],
            Coded::ResolutionScope => &[0x00, 0x1A, 0x23, 0x01],
            Coded::TypeOrMethodDef => &[0x02, 0x06],
        }
    }

    /// Decode a raw coded value into a full CLI token, or 0 for a null index.
    fn decode(self, value: u32) -> Result<u32> {
        if value == 0 {
            return Ok(0);
        }
        let tag = value & ((1 << self.tag_bits()) - 1);
        let rid = value >> self.tag_bits();
        let tables = self.tables();
        let Some(&table) = tables.get(tag as usize) else {
            return Err(malformed_error!("Invalid coded index tag - {}", tag));
        };
        if table == 0xFF {
            return Err(malformed_error!("Unused coded index tag - {}", tag));
        }
        Ok((u32::from(table) << 24) | rid)
    }
}

/// Column kinds of a raw table row.
#[derive(Debug, Clone, Copy)]
enum Col {
    U8,
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Idx(u8),
    Coded(Coded),
}

/// Column layouts for every ECMA table id that may appear in the stream.
///
/// Needed in full so unconsumed tables can be measured and skipped.
fn columns(id: u8) -> Result<&'static [Col]> {
    use Coded as C;
    Ok(match id {
        0x00 => &[Col::U16, Col::Str, Col::Guid, Col::Guid, Col::Guid],
        0x01 => &[Col::Coded(C::ResolutionScope), Col::Str, Col::Str],
        0x02 => &[
            Col::U32,
            Col::Str,
            Col::Str,
            Col::Coded(C::TypeDefOrRef),
            Col::Idx(0x04),
            Col::Idx(0x06),
        ],
        0x03 => &[Col::Idx(0x04)],
        0x04 => &[Col::U16, Col::Str, Col::Blob],
        0x05 => &[Col::Idx(0x06)],
        0x06 => &[Col::U32, Col::U16, Col::U16, Col::Str, Col::Blob, Col::Idx(0x08)],
        0x07 => &[Col::Idx(0x08)],
        0x08 => &[Col::U16, Col::U16, Col::Str],
        0x09 => &[Col::Idx(0x02), Col::Coded(C::TypeDefOrRef)],
        0x0A => &[Col::Coded(C::MemberRefParent), Col::Str, Col::Blob],
        0x0B => &[Col::U8, Col::U8, Col::Coded(C::HasConstant), Col::Blob],
        0x0C => &[
            Col::Coded(C::HasCustomAttribute),
            Col::Coded(C::CustomAttributeType),
            Col::Blob,
        ],
        0x0D => &[Col::Coded(C::HasFieldMarshal), Col::Blob],
        0x0E => &[Col::U16, Col::Coded(C::HasDeclSecurity), Col::Blob],
        0x0F => &[Col::U16, Col::U32, Col::Idx(0x02)],
        0x10 => &[Col::U32, Col::Idx(0x04)],
        0x11 => &[Col::Blob],
        0x12 => &[Col::Idx(0x02), Col::Idx(0x14)],
        0x13 => &[Col::Idx(0x14)],
        0x14 => &[Col::U16, Col::Str, Col::Coded(C::TypeDefOrRef)],
        0x15 => &[Col::Idx(0x02), Col::Idx(0x17)],
        0x16 => &[Col::Idx(0x17)],
        0x17 => &[Col::U16, Col::Str, Col::Blob],
        0x18 => &[Col::U16, Col::Idx(0x06), Col::Coded(C::HasSemantics)],
        0x19 => &[
            Col::Idx(0x02),
            Col::Coded(C::MethodDefOrRef),
            Col::Coded(C::MethodDefOrRef),
        ],
        0x1A => &[Col::Str],
        0x1B => &[Col::Blob],
        0x1C => &[Col::U16, Col::Coded(C::MemberForwarded), Col::Str, Col::Idx(0x1A)],
        0x1D => &[Col::U32, Col::Idx(0x04)],
        0x1E => &[Col::U32, Col::U32],
        0x1F => &[Col::U32],
        0x20 => &[
            Col::U32,
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U32,
            Col::Blob,
            Col::Str,
            Col::Str,
        ],
        0x21 => &[Col::U32],
        0x22 => &[Col::U32, Col::U32, Col::U32],
        0x23 => &[
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U16,
            Col::U32,
            Col::Blob,
            Col::Str,
            Col::Str,
            Col::Blob,
        ],
        0x24 => &[Col::U32, Col::Idx(0x23)],
        0x25 => &[Col::U32, Col::U32, Col::U32, Col::Idx(0x23)],
        0x26 => &[Col::U32, Col::Str, Col::Blob],
        0x27 => &[Col::U32, Col::U32, Col::Str, Col::Str, Col::Coded(C::Implementation)],
        0x28 => &[Col::U32, Col::U32, Col::Str, Col::Coded(C::Implementation)],
        0x29 => &[Col::Idx(0x02), Col::Idx(0x02)],
        0x2A => &[Col::U16, Col::U16, Col::Coded(C::TypeOrMethodDef), Col::Str],
        0x2B => &[Col::Coded(C::MethodDefOrRef), Col::Blob],
        0x2C => &[Col::Idx(0x2A), Col::Coded(C::TypeDefOrRef)],
        _ => return Err(malformed_error!("Unknown metadata table - {:#04x}", id)),
    })
}

/// Parsed `#~` stream: row counts, width flags, and per-table row data.
pub struct TablesStream<'a> {
    heap_sizes: u8,
    rows: [u32; 64],
    /// Byte range of each present table's rows within the stream data
    ranges: [(usize, usize); 64],
    data: &'a [u8],
}

impl<'a> TablesStream<'a> {
    /// Parse the `#~` stream header and index every present table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`]
    /// when the header or any row range is invalid.
    pub fn parse(data: &'a [u8]) -> Result<TablesStream<'a>> {
        let mut parser = Parser::new(data);
        let _reserved: u32 = parser.read_le()?;
        let _major: u8 = parser.read_le()?;
        let _minor: u8 = parser.read_le()?;
        let heap_sizes: u8 = parser.read_le()?;
        let _padding: u8 = parser.read_le()?;
        let valid: u64 = parser.read_le()?;
        let _sorted: u64 = parser.read_le()?;

        let mut rows = [0u32; 64];
        for (id, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << id) != 0 {
                *count = parser.read_le()?;
            }
        }

        let mut stream = TablesStream {
            heap_sizes,
            rows,
            ranges: [(0, 0); 64],
            data,
        };

        let mut offset = parser.pos();
        for id in 0u8..64 {
            let count = stream.rows[id as usize];
            if count == 0 {
                continue;
            }
            let size = stream.row_size(id)? * count as usize;
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= data.len())
                .ok_or(crate::Error::OutOfBounds)?;
            stream.ranges[id as usize] = (offset, end);
            offset = end;
        }

        Ok(stream)
    }

    /// Row count of a table, 0 when absent.
    #[must_use]
    pub fn rows(&self, id: u8) -> u32 {
        self.rows[id as usize]
    }

    fn str_wide(&self) -> bool {
        self.heap_sizes & 0x01 != 0
    }

    fn guid_wide(&self) -> bool {
        self.heap_sizes & 0x02 != 0
    }

    fn blob_wide(&self) -> bool {
        self.heap_sizes & 0x04 != 0
    }

    fn idx_wide(&self, table: u8) -> bool {
        self.rows[table as usize] > 0xFFFF
    }

    fn coded_wide(&self, coded: Coded) -> bool {
        let max_rows = coded
            .tables()
            .iter()
            .filter(|&&t| t != 0xFF)
            .map(|&t| self.rows[t as usize])
            .max()
            .unwrap_or(0);
        max_rows >= (1u32 << (16 - coded.tag_bits()))
    }

    fn col_size(&self, col: Col) -> usize {
        match col {
            Col::U8 => 1,
            Col::U16 => 2,
            Col::U32 => 4,
            Col::Str => {
                if self.str_wide() {
                    4
                } else {
                    2
                }
            }
            Col::Guid => {
                if self.guid_wide() {
                    4
                } else {
                    2
                }
            }
            Col::Blob => {
                if self.blob_wide() {
                    4
                } else {
                    2
                }
            }
            Col::Idx(table) => {
                if self.idx_wide(table) {
                    4
                } else {
                    2
                }
            }
            Col::Coded(coded) => {
                if self.coded_wide(coded) {
                    4
                } else {
                    2
                }
            }
        }
    }

    fn row_size(&self, id: u8) -> Result<usize> {
        Ok(columns(id)?.iter().map(|&col| self.col_size(col)).sum())
    }

    /// Decode every row of a table through `f`.
    ///
    /// # Errors
    /// Propagates any decoding error from `f` or a short row range.
    pub fn read_rows<T>(
        &self,
        id: u8,
        mut f: impl FnMut(&mut RowCursor<'_, 'a>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.rows(id) as usize;
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            return Ok(out);
        }

        let (start, end) = self.ranges[id as usize];
        let mut cursor = RowCursor {
            parser: Parser::new(&self.data[start..end]),
            stream: self,
        };
        for _ in 0..count {
            out.push(f(&mut cursor)?);
        }
        Ok(out)
    }
}

/// Cursor over one table's raw rows, reading columns at their computed width.
pub struct RowCursor<'s, 'a> {
    parser: Parser<'a>,
    stream: &'s TablesStream<'a>,
}

impl RowCursor<'_, '_> {
    /// Read a fixed 8-bit column.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.parser.read_le()
    }

    /// Read a fixed 16-bit column.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.parser.read_le()
    }

    /// Read a fixed 32-bit column.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.parser.read_le()
    }

    fn read_index(&mut self, wide: bool) -> Result<u32> {
        if wide {
            self.parser.read_le()
        } else {
            Ok(u32::from(self.parser.read_le::<u16>()?))
        }
    }

    /// Read a `#Strings` heap index.
    pub fn read_str(&mut self) -> Result<u32> {
        let wide = self.stream.str_wide();
        self.read_index(wide)
    }

    /// Read a `#GUID` heap index.
    pub fn read_guid(&mut self) -> Result<u32> {
        let wide = self.stream.guid_wide();
        self.read_index(wide)
    }

    /// Read a `#Blob` heap index.
    pub fn read_blob(&mut self) -> Result<u32> {
        let wide = self.stream.blob_wide();
        self.read_index(wide)
    }

    /// Read a simple index into `table` (1-based row number, 0 = null).
    pub fn read_idx(&mut self, table: u8) -> Result<u32> {
        let wide = self.stream.idx_wide(table);
        self.read_index(wide)
    }

    fn read_coded(&mut self, coded: Coded) -> Result<u32> {
        let wide = self.stream.coded_wide(coded);
        let raw = self.read_index(wide)?;
        coded.decode(raw)
    }
}

/// `Module` row (0x00): module name only.
pub struct ModuleRow {
    /// Module name string index
    pub name: u32,
}

/// `TypeRef` row (0x01).
pub struct TypeRefRow {
    /// Resolution scope as a CLI token (Module, ModuleRef, AssemblyRef, TypeRef)
    pub scope: u32,
    /// Type name string index
    pub name: u32,
    /// Namespace string index
    pub namespace: u32,
}

/// `TypeDef` row (0x02).
pub struct TypeDefRow {
    /// ECMA type attributes
    pub flags: u32,
    /// Type name string index
    pub name: u32,
    /// Namespace string index
    pub namespace: u32,
    /// Base type as a CLI token, 0 when none
    pub extends: u32,
    /// First row (1-based) of this type's fields
    pub field_list: u32,
    /// First row (1-based) of this type's methods
    pub method_list: u32,
}

/// `Field` row (0x04).
pub struct FieldRow {
    /// ECMA field attributes
    pub flags: u16,
    /// Field name string index
    pub name: u32,
    /// Field signature blob index
    pub signature: u32,
}

/// `MethodDef` row (0x06).
pub struct MethodDefRow {
    /// RVA of the method body, 0 for abstract/native methods
    pub rva: u32,
    /// ECMA implementation flags
    pub impl_flags: u16,
    /// ECMA method attributes
    pub flags: u16,
    /// Method name string index
    pub name: u32,
    /// Method signature blob index
    pub signature: u32,
}

/// `InterfaceImpl` row (0x09).
pub struct InterfaceImplRow {
    /// Implementing type (1-based TypeDef row)
    pub class: u32,
    /// Implemented interface as a CLI token
    pub interface: u32,
}

/// `MemberRef` row (0x0A).
pub struct MemberRefRow {
    /// Declaring scope as a CLI token (TypeRef, TypeDef, TypeSpec, ...)
    pub class: u32,
    /// Member name string index
    pub name: u32,
    /// Member signature blob index
    pub signature: u32,
}

/// `Constant` row (0x0B).
pub struct ConstantRow {
    /// Element type of the constant
    pub ctype: u8,
    /// Owner as a CLI token (Field, Param, Property)
    pub parent: u32,
    /// Value blob index
    pub value: u32,
}

/// `CustomAttribute` row (0x0C).
pub struct CustomAttributeRow {
    /// Owner as a CLI token
    pub parent: u32,
    /// Constructor as a CLI token (MethodDef or MemberRef)
    pub ctor: u32,
    /// Value blob index
    pub value: u32,
}

/// `StandAloneSig` row (0x11).
pub struct StandAloneSigRow {
    /// Signature blob index
    pub signature: u32,
}

/// `TypeSpec` row (0x1B).
pub struct TypeSpecRow {
    /// Signature blob index
    pub signature: u32,
}

/// `Assembly` row (0x20).
pub struct AssemblyRow {
    /// Version quadruple (major, minor, build, revision)
    pub version: [u16; 4],
    /// Assembly flags
    pub flags: u32,
    /// Assembly simple name string index
    pub name: u32,
}

/// `AssemblyRef` row (0x23).
pub struct AssemblyRefRow {
    /// Version quadruple (major, minor, build, revision)
    pub version: [u16; 4],
    /// Assembly flags
    pub flags: u32,
    /// Assembly simple name string index
    pub name: u32,
}

/// `ManifestResource` row (0x28).
pub struct ManifestResourceRow {
    /// Offset into the resources blob
    pub offset: u32,
    /// Visibility flags
    pub flags: u32,
    /// Resource name string index
    pub name: u32,
    /// Implementation token; 0 for embedded resources
    pub implementation: u32,
}

/// `NestedClass` row (0x29).
pub struct NestedClassRow {
    /// Nested type (1-based TypeDef row)
    pub nested: u32,
    /// Enclosing type (1-based TypeDef row)
    pub enclosing: u32,
}

/// `GenericParam` row (0x2A).
pub struct GenericParamRow {
    /// Ordinal of the parameter within its owner
    pub number: u16,
    /// Variance and constraint flags
    pub flags: u16,
    /// Owner as a CLI token (TypeDef or MethodDef)
    pub owner: u32,
    /// Parameter name string index
    pub name: u32,
}

/// `MethodSpec` row (0x2B).
pub struct MethodSpecRow {
    /// Generic method as a CLI token (MethodDef or MemberRef)
    pub method: u32,
    /// Instantiation signature blob index
    pub instantiation: u32,
}

/// Every raw table the importer consumes, decoded in one pass.
pub struct RawTables {
    #[allow(missing_docs)]
    pub module: Vec<ModuleRow>,
    #[allow(missing_docs)]
    pub type_refs: Vec<TypeRefRow>,
    #[allow(missing_docs)]
    pub type_defs: Vec<TypeDefRow>,
    #[allow(missing_docs)]
    pub fields: Vec<FieldRow>,
    #[allow(missing_docs)]
    pub methods: Vec<MethodDefRow>,
    #[allow(missing_docs)]
    pub interface_impls: Vec<InterfaceImplRow>,
    #[allow(missing_docs)]
    pub member_refs: Vec<MemberRefRow>,
    #[allow(missing_docs)]
    pub constants: Vec<ConstantRow>,
    #[allow(missing_docs)]
    pub custom_attributes: Vec<CustomAttributeRow>,
    #[allow(missing_docs)]
    pub stand_alone_sigs: Vec<StandAloneSigRow>,
    #[allow(missing_docs)]
    pub type_specs: Vec<TypeSpecRow>,
    #[allow(missing_docs)]
    pub assembly: Vec<AssemblyRow>,
    #[allow(missing_docs)]
    pub assembly_refs: Vec<AssemblyRefRow>,
    #[allow(missing_docs)]
    pub resources: Vec<ManifestResourceRow>,
    #[allow(missing_docs)]
    pub nested_classes: Vec<NestedClassRow>,
    #[allow(missing_docs)]
    pub generic_params: Vec<GenericParamRow>,
    #[allow(missing_docs)]
    pub method_specs: Vec<MethodSpecRow>,
}

impl RawTables {
    /// Decode all consumed tables from a parsed `#~` stream.
    ///
    /// # Errors
    /// Returns any row decoding error.
    pub fn read(stream: &TablesStream<'_>) -> Result<RawTables> {
        Ok(RawTables {
            module: stream.read_rows(table::MODULE, |row| {
                let _generation = row.read_u16()?;
                let name = row.read_str()?;
                let _mvid = row.read_guid()?;
                let _enc_id = row.read_guid()?;
                let _enc_base = row.read_guid()?;
                Ok(ModuleRow { name })
            })?,
            type_refs: stream.read_rows(table::TYPE_REF, |row| {
                Ok(TypeRefRow {
                    scope: row.read_coded(Coded::ResolutionScope)?,
                    name: row.read_str()?,
                    namespace: row.read_str()?,
                })
            })?,
            type_defs: stream.read_rows(table::TYPE_DEF, |row| {
                Ok(TypeDefRow {
                    flags: row.read_u32()?,
                    name: row.read_str()?,
                    namespace: row.read_str()?,
                    extends: row.read_coded(Coded::TypeDefOrRef)?,
                    field_list: row.read_idx(table::FIELD)?,
                    method_list: row.read_idx(table::METHOD_DEF)?,
                })
            })?,
            fields: stream.read_rows(table::FIELD, |row| {
                Ok(FieldRow {
                    flags: row.read_u16()?,
                    name: row.read_str()?,
                    signature: row.read_blob()?,
                })
            })?,
            methods: stream.read_rows(table::METHOD_DEF, |row| {
                let raw = MethodDefRow {
                    rva: row.read_u32()?,
                    impl_flags: row.read_u16()?,
                    flags: row.read_u16()?,
                    name: row.read_str()?,
                    signature: row.read_blob()?,
                };
                let _param_list = row.read_idx(table::PARAM)?;
                Ok(raw)
            })?,
            interface_impls: stream.read_rows(table::INTERFACE_IMPL, |row| {
                Ok(InterfaceImplRow {
                    class: row.read_idx(table::TYPE_DEF)?,
                    interface: row.read_coded(Coded::TypeDefOrRef)?,
                })
            })?,
            member_refs: stream.read_rows(table::MEMBER_REF, |row| {
                Ok(MemberRefRow {
                    class: row.read_coded(Coded::MemberRefParent)?,
                    name: row.read_str()?,
                    signature: row.read_blob()?,
                })
            })?,
            constants: stream.read_rows(table::CONSTANT, |row| {
                let ctype = row.read_u8()?;
                let _pad = row.read_u8()?;
                Ok(ConstantRow {
                    ctype,
                    parent: row.read_coded(Coded::HasConstant)?,
                    value: row.read_blob()?,
                })
            })?,
            custom_attributes: stream.read_rows(table::CUSTOM_ATTRIBUTE, |row| {
                Ok(CustomAttributeRow {
                    parent: row.read_coded(Coded::HasCustomAttribute)?,
                    ctor: row.read_coded(Coded::CustomAttributeType)?,
                    value: row.read_blob()?,
                })
            })?,
            stand_alone_sigs: stream.read_rows(table::STAND_ALONE_SIG, |row| {
                Ok(StandAloneSigRow {
                    signature: row.read_blob()?,
                })
            })?,
            type_specs: stream.read_rows(table::TYPE_SPEC, |row| {
                Ok(TypeSpecRow {
                    signature: row.read_blob()?,
                })
            })?,
            assembly: stream.read_rows(table::ASSEMBLY, |row| {
                let _hash_alg = row.read_u32()?;
                let version = [
                    row.read_u16()?,
                    row.read_u16()?,
                    row.read_u16()?,
                    row.read_u16()?,
                ];
                let flags = row.read_u32()?;
                let _public_key = row.read_blob()?;
                let name = row.read_str()?;
                let _culture = row.read_str()?;
                Ok(AssemblyRow {
                    version,
                    flags,
                    name,
                })
            })?,
            assembly_refs: stream.read_rows(table::ASSEMBLY_REF, |row| {
                let version = [
                    row.read_u16()?,
                    row.read_u16()?,
                    row.read_u16()?,
                    row.read_u16()?,
                ];
                let flags = row.read_u32()?;
                let _public_key = row.read_blob()?;
                let name = row.read_str()?;
                let _culture = row.read_str()?;
                let _hash = row.read_blob()?;
                Ok(AssemblyRefRow {
                    version,
                    flags,
                    name,
                })
            })?,
            resources: stream.read_rows(table::MANIFEST_RESOURCE, |row| {
                Ok(ManifestResourceRow {
                    offset: row.read_u32()?,
                    flags: row.read_u32()?,
                    name: row.read_str()?,
                    implementation: row.read_coded(Coded::Implementation)?,
                })
            })?,
            nested_classes: stream.read_rows(table::NESTED_CLASS, |row| {
                Ok(NestedClassRow {
                    nested: row.read_idx(table::TYPE_DEF)?,
                    enclosing: row.read_idx(table::TYPE_DEF)?,
                })
            })?,
            generic_params: stream.read_rows(table::GENERIC_PARAM, |row| {
                Ok(GenericParamRow {
                    number: row.read_u16()?,
                    flags: row.read_u16()?,
                    owner: row.read_coded(Coded::TypeOrMethodDef)?,
                    name: row.read_str()?,
                })
            })?,
            method_specs: stream.read_rows(table::METHOD_SPEC, |row| {
                Ok(MethodSpecRow {
                    method: row.read_coded(Coded::MethodDefOrRef)?,
                    instantiation: row.read_blob()?,
                })
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_stream(valid: u64, rows: &[u32], tail: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(2); // major
        data.push(0); // minor
        data.push(0); // heap sizes: all narrow
        data.push(1); // reserved
        data.extend_from_slice(&valid.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        for &count in rows {
            data.extend_from_slice(&count.to_le_bytes());
        }
        data.extend_from_slice(tail);
        data
    }

    #[test]
    fn header_row_counts() {
        // Module table with one row: generation u16, name str16, 3 guid16
        let row = [0u8, 0, 0x01, 0, 0x01, 0, 0, 0, 0, 0];
        let data = minimal_stream(1 << table::MODULE, &[1], &row);
        let stream = TablesStream::parse(&data).unwrap();
        assert_eq!(stream.rows(table::MODULE), 1);
        assert_eq!(stream.rows(table::TYPE_DEF), 0);

        let raw = RawTables::read(&stream).unwrap();
        assert_eq!(raw.module.len(), 1);
        assert_eq!(raw.module[0].name, 1);
    }

    #[test]
    fn coded_index_decodes_to_token() {
        // ResolutionScope tag 2 = AssemblyRef
        assert_eq!(
            Coded::ResolutionScope.decode((1 << 2) | 2).unwrap(),
            0x2300_0001
        );
        // TypeDefOrRef tag 1 = TypeRef
        assert_eq!(Coded::TypeDefOrRef.decode((5 << 2) | 1).unwrap(), 0x0100_0005);
        // Null stays null
        assert_eq!(Coded::TypeDefOrRef.decode(0).unwrap(), 0);
    }

    #[test]
    fn coded_width_tracks_row_counts() {
        let data = minimal_stream(0, &[], &[]);
        let mut stream = TablesStream::parse(&data).unwrap();
        assert!(!stream.coded_wide(Coded::TypeDefOrRef));

        // 2 tag bits leave 14 bits of row index in a narrow coded column
        stream.rows[table::TYPE_DEF as usize] = 1 << 14;
        assert!(stream.coded_wide(Coded::TypeDefOrRef));
    }

    #[test]
    fn unknown_table_is_rejected() {
        let data = minimal_stream(1 << 0x2F, &[1], &[0u8; 16]);
        assert!(TablesStream::parse(&data).is_err());
    }
}
