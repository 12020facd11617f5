//! Signature encoding and interning.
//!
//! Every signature of the output image (field and method shapes, locals,
//! interface lists, type specifications, default values, custom-attribute
//! blobs) is encoded to its exact wire bytes here and interned into one
//! shared blob. Identifiers are byte offsets into that blob.
//!
//! Two deduplication layers keep the blob small: whole-signature interning,
//! and a contiguous sub-sequence match that lets a new signature reuse bytes
//! already emitted for another one. The sub-match is the central size win of
//! the format and its offsets are part of the wire contract.
//!
//! Method signatures serialize little-endian; field, local, interface-list
//! and type-spec signatures serialize big-endian. The asymmetry is mandated
//! by the consuming runtime.

use rustc_hash::FxHashMap;

use crate::{
    loader::{AttrValue, CustomAttribute, MethodSig, TypeHandle, TypeSig},
    tables::TablesContext,
    Error, Result,
};

/// Data type codes of the consuming runtime.
#[allow(non_snake_case, dead_code, missing_docs)]
pub mod DATATYPE {
    pub const VOID: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const I1: u8 = 0x02;
    pub const U1: u8 = 0x03;
    pub const CHAR: u8 = 0x04;
    pub const I2: u8 = 0x05;
    pub const U2: u8 = 0x06;
    pub const I4: u8 = 0x07;
    pub const U4: u8 = 0x08;
    pub const R4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R8: u8 = 0x0C;
    pub const DATETIME: u8 = 0x0D;
    pub const TIMESPAN: u8 = 0x0E;
    pub const STRING: u8 = 0x0F;
    pub const OBJECT: u8 = 0x10;
    pub const CLASS: u8 = 0x11;
    pub const VALUETYPE: u8 = 0x12;
    pub const SZARRAY: u8 = 0x13;
    pub const BYREF: u8 = 0x14;
    pub const VAR: u8 = 0x15;
    pub const GENERICINST: u8 = 0x16;
    pub const MVAR: u8 = 0x17;
}

/// Named-argument kind tags in attribute signatures.
const SERIALIZATION_TYPE_FIELD: u8 = 0x53;
const SERIALIZATION_TYPE_PROPERTY: u8 = 0x54;

/// Leading byte of a field signature.
const FIELD_SIG_PROLOG: u8 = 0x06;
/// Has-this flag of a method signature.
const METHOD_SIG_HAS_THIS: u8 = 0x20;
/// Generic flag of a method signature.
const METHOD_SIG_GENERIC: u8 = 0x10;

/// Map a fully-qualified type name onto its primitive data type code.
///
/// Process-wide read-only table; never mutated after construction.
#[must_use]
pub fn primitive_code(namespace: &str, name: &str) -> Option<u8> {
    if namespace != "System" {
        return None;
    }
    Some(match name {
        "Void" => DATATYPE::VOID,
        "Boolean" => DATATYPE::BOOLEAN,
        "SByte" => DATATYPE::I1,
        "Byte" => DATATYPE::U1,
        "Char" => DATATYPE::CHAR,
        "Int16" => DATATYPE::I2,
        "UInt16" => DATATYPE::U2,
        "Int32" => DATATYPE::I4,
        "UInt32" => DATATYPE::U4,
        "Single" => DATATYPE::R4,
        "Int64" => DATATYPE::I8,
        "UInt64" => DATATYPE::U8,
        "Double" => DATATYPE::R8,
        "DateTime" => DATATYPE::DATETIME,
        "TimeSpan" => DATATYPE::TIMESPAN,
        "String" => DATATYPE::STRING,
        "Object" => DATATYPE::OBJECT,
        "IntPtr" => DATATYPE::I4,
        "UIntPtr" => DATATYPE::U4,
        _ => return None,
    })
}

/// Byte-order-aware signature serializer.
pub struct SigWriter {
    bytes: Vec<u8>,
    big_endian: bool,
}

impl SigWriter {
    /// Little-endian writer (method signatures, default values, attributes).
    #[must_use]
    pub fn little_endian() -> Self {
        SigWriter {
            bytes: Vec::new(),
            big_endian: false,
        }
    }

    /// Big-endian writer (field, local, interface-list, type-spec signatures).
    #[must_use]
    pub fn big_endian() -> Self {
        SigWriter {
            bytes: Vec::new(),
            big_endian: true,
        }
    }

    #[allow(missing_docs)]
    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    #[allow(missing_docs)]
    pub fn write_u16(&mut self, value: u16) {
        if self.big_endian {
            self.bytes.extend_from_slice(&value.to_be_bytes());
        } else {
            self.bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    #[allow(missing_docs)]
    pub fn write_u32(&mut self, value: u32) {
        if self.big_endian {
            self.bytes.extend_from_slice(&value.to_be_bytes());
        } else {
            self.bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    #[allow(missing_docs)]
    pub fn write_u64(&mut self, value: u64) {
        if self.big_endian {
            self.bytes.extend_from_slice(&value.to_be_bytes());
        } else {
            self.bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Raw bytes, endianness-agnostic.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Finish and take the serialized bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// The interned signature blob of one output image.
pub struct SignatureTable {
    ids: FxHashMap<Vec<u8>, u16>,
    blob: Vec<u8>,
}

impl SignatureTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        SignatureTable {
            ids: FxHashMap::default(),
            blob: Vec::new(),
        }
    }

    /// Intern signature bytes and return their blob offset.
    ///
    /// Lookup order: whole-signature match, then a contiguous sub-sequence
    /// scan over everything already emitted, then append. The scan is
    /// quadratic in the worst case; the offsets it produces are part of the
    /// wire contract and must not change.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] when the blob outgrows the
    /// 16-bit id space.
    pub fn get_or_create(&mut self, bytes: &[u8]) -> Result<u16> {
        if bytes.is_empty() {
            return Ok(0);
        }

        if let Some(&id) = self.ids.get(bytes) {
            return Ok(id);
        }

        if bytes.len() <= self.blob.len() {
            if let Some(pos) = self
                .blob
                .windows(bytes.len())
                .position(|window| window == bytes)
            {
                let id = pos as u16;
                self.ids.insert(bytes.to_vec(), id);
                return Ok(id);
            }
        }

        let offset = self.blob.len();
        let end = offset + bytes.len();
        if end > usize::from(u16::MAX) {
            return Err(Error::IndexOverflow("signatures"));
        }

        let id = offset as u16;
        self.ids.insert(bytes.to_vec(), id);
        self.blob.extend_from_slice(bytes);
        Ok(id)
    }

    /// Blob offset of already-interned bytes.
    #[must_use]
    pub fn try_get_id(&self, bytes: &[u8]) -> Option<u16> {
        self.ids.get(bytes).copied()
    }

    /// Current blob length in bytes.
    #[must_use]
    pub fn blob_len(&self) -> usize {
        self.blob.len()
    }

    /// Serialize the raw blob.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.blob);
    }

    /// The raw blob, for the dump.
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize one type shape into `writer`.
///
/// # Errors
/// Propagates unresolved type tokens; rejects shapes the target runtime
/// cannot load.
pub fn write_type_info(
    ctx: &mut TablesContext<'_>,
    writer: &mut SigWriter,
    ty: &TypeSig,
) -> Result<()> {
    match ty {
        TypeSig::Void => writer.write_u8(DATATYPE::VOID),
        TypeSig::Boolean => writer.write_u8(DATATYPE::BOOLEAN),
        TypeSig::Char => writer.write_u8(DATATYPE::CHAR),
        TypeSig::I1 => writer.write_u8(DATATYPE::I1),
        TypeSig::U1 => writer.write_u8(DATATYPE::U1),
        TypeSig::I2 => writer.write_u8(DATATYPE::I2),
        TypeSig::U2 => writer.write_u8(DATATYPE::U2),
        TypeSig::I4 => writer.write_u8(DATATYPE::I4),
        TypeSig::U4 => writer.write_u8(DATATYPE::U4),
        TypeSig::I8 => writer.write_u8(DATATYPE::I8),
        TypeSig::U8 => writer.write_u8(DATATYPE::U8),
        TypeSig::R4 => writer.write_u8(DATATYPE::R4),
        TypeSig::R8 => writer.write_u8(DATATYPE::R8),
        TypeSig::String => writer.write_u8(DATATYPE::STRING),
        TypeSig::Object => writer.write_u8(DATATYPE::OBJECT),
        TypeSig::IntPtr => writer.write_u8(DATATYPE::I4),
        TypeSig::UIntPtr => writer.write_u8(DATATYPE::U4),
        TypeSig::ByRef(element) => {
            writer.write_u8(DATATYPE::BYREF);
            write_type_info(ctx, writer, element)?;
        }
        TypeSig::SzArray(element) => {
            writer.write_u8(DATATYPE::SZARRAY);
            write_type_info(ctx, writer, element)?;
        }
        TypeSig::Class(handle) => {
            if let Some(code) = ctx.primitive_code_of(*handle) {
                writer.write_u8(code);
            } else {
                writer.write_u8(DATATYPE::CLASS);
                write_sub_type_token(ctx, writer, *handle)?;
            }
        }
        TypeSig::ValueType(handle) => {
            if let Some(code) = ctx.primitive_code_of(*handle) {
                writer.write_u8(code);
            } else if ctx.options.expand_enums {
                if let Some(underlying) = ctx.enum_underlying(*handle) {
                    write_type_info(ctx, writer, &underlying)?;
                } else {
                    writer.write_u8(DATATYPE::VALUETYPE);
                    write_sub_type_token(ctx, writer, *handle)?;
                }
            } else {
                writer.write_u8(DATATYPE::VALUETYPE);
                write_sub_type_token(ctx, writer, *handle)?;
            }
        }
        TypeSig::GenericInst {
            value_type,
            base,
            args,
        } => {
            writer.write_u8(DATATYPE::GENERICINST);
            writer.write_u8(if *value_type {
                DATATYPE::VALUETYPE
            } else {
                DATATYPE::CLASS
            });
            write_sub_type_token(ctx, writer, *base)?;
            writer.write_u8(u8::try_from(args.len()).map_err(|_| {
                Error::NotSupported(format!("{} generic arguments", args.len()))
            })?);
            for arg in args {
                write_type_info(ctx, writer, arg)?;
            }
        }
        TypeSig::Var(number) => {
            writer.write_u8(DATATYPE::VAR);
            writer.write_u8(u8::try_from(*number).map_err(|_| {
                Error::NotSupported(format!("generic parameter ordinal {number}"))
            })?);
        }
        TypeSig::MVar(number) => {
            writer.write_u8(DATATYPE::MVAR);
            writer.write_u8(u8::try_from(*number).map_err(|_| {
                Error::NotSupported(format!("generic parameter ordinal {number}"))
            })?);
        }
        TypeSig::Ptr(_) => {
            return Err(Error::NotSupported("unmanaged pointers".to_string()))
        }
    }
    Ok(())
}

/// Write the table-tagged token of a nested type reference.
fn write_sub_type_token(
    ctx: &mut TablesContext<'_>,
    writer: &mut SigWriter,
    handle: TypeHandle,
) -> Result<()> {
    let token = ctx.type_token(handle)?;
    let narrow = u16::try_from(token)
        .map_err(|_| Error::IndexOverflow("type token in signature"))?;
    writer.write_u16(narrow);
    Ok(())
}

/// Encode a type shape to stand-alone (type-spec) signature bytes.
///
/// # Errors
/// Propagates any type encoding error.
pub fn type_sig_bytes(ctx: &mut TablesContext<'_>, ty: &TypeSig) -> Result<Vec<u8>> {
    let mut writer = SigWriter::big_endian();
    write_type_info(ctx, &mut writer, ty)?;
    Ok(writer.into_bytes())
}

/// Intern a field signature (`0x06`, type-info) and return its id.
///
/// # Errors
/// Propagates any type encoding error.
pub fn field_sig_id(ctx: &mut TablesContext<'_>, ty: &TypeSig) -> Result<u16> {
    let mut writer = SigWriter::big_endian();
    writer.write_u8(FIELD_SIG_PROLOG);
    write_type_info(ctx, &mut writer, ty)?;
    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

/// Intern a method signature and return its id.
///
/// Layout: flags byte (`0x20` has-this, `0x10` generic), generic parameter
/// count when generic, parameter count, return type, parameter types.
///
/// # Errors
/// Propagates any type encoding error.
pub fn method_sig_id(ctx: &mut TablesContext<'_>, sig: &MethodSig) -> Result<u16> {
    let mut writer = SigWriter::little_endian();
    let mut flags = 0u8;
    if sig.has_this {
        flags |= METHOD_SIG_HAS_THIS;
    }
    if sig.generic_params > 0 {
        flags |= METHOD_SIG_GENERIC;
    }
    writer.write_u8(flags);
    if sig.generic_params > 0 {
        writer.write_u8(sig.generic_params);
    }
    writer.write_u8(u8::try_from(sig.params.len()).map_err(|_| {
        Error::NotSupported(format!("{} method parameters", sig.params.len()))
    })?);
    write_type_info(ctx, &mut writer, &sig.return_type)?;
    for param in &sig.params {
        write_type_info(ctx, &mut writer, param)?;
    }
    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

/// Intern a locals signature (concatenated type-infos) and return its id.
///
/// # Errors
/// Propagates any type encoding error.
pub fn locals_sig_id(ctx: &mut TablesContext<'_>, locals: &[TypeSig]) -> Result<u16> {
    let mut writer = SigWriter::big_endian();
    for local in locals {
        write_type_info(ctx, &mut writer, local)?;
    }
    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

/// Intern an interface-list signature (count, then one sub-type token per
/// interface) and return its id.
///
/// # Errors
/// Propagates any type encoding error.
pub fn interface_sig_id(ctx: &mut TablesContext<'_>, interfaces: &[TypeHandle]) -> Result<u16> {
    let mut writer = SigWriter::big_endian();
    writer.write_u8(u8::try_from(interfaces.len()).map_err(|_| {
        Error::NotSupported(format!("{} implemented interfaces", interfaces.len()))
    })?);
    for &interface in interfaces {
        write_sub_type_token(ctx, &mut writer, interface)?;
    }
    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

/// Intern a default-value signature (u16 length, raw bytes) and return its id.
///
/// # Errors
/// Returns [`crate::Error::NotSupported`] for values past the 16-bit length.
pub fn default_value_sig_id(ctx: &mut TablesContext<'_>, value: &[u8]) -> Result<u16> {
    let mut writer = SigWriter::little_endian();
    writer.write_u16(u16::try_from(value.len()).map_err(|_| {
        Error::NotSupported(format!("{} byte default value", value.len()))
    })?);
    writer.write_bytes(value);
    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

/// Intern a method-spec instantiation signature and return its id.
///
/// # Errors
/// Propagates any type encoding error.
pub fn method_spec_sig_id(ctx: &mut TablesContext<'_>, args: &[TypeSig]) -> Result<u16> {
    let mut writer = SigWriter::little_endian();
    writer.write_u8(u8::try_from(args.len()).map_err(|_| {
        Error::NotSupported(format!("{} generic arguments", args.len()))
    })?);
    for arg in args {
        write_type_info(ctx, &mut writer, arg)?;
    }
    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

fn write_attr_value(
    ctx: &mut TablesContext<'_>,
    writer: &mut SigWriter,
    value: &AttrValue,
) -> Result<()> {
    match value {
        AttrValue::Boolean(v) => {
            writer.write_u8(DATATYPE::BOOLEAN);
            writer.write_u8(u8::from(*v));
        }
        AttrValue::Char(v) => {
            writer.write_u8(DATATYPE::CHAR);
            writer.write_u16(*v);
        }
        AttrValue::I1(v) => {
            writer.write_u8(DATATYPE::I1);
            writer.write_u8(*v as u8);
        }
        AttrValue::U1(v) => {
            writer.write_u8(DATATYPE::U1);
            writer.write_u8(*v);
        }
        AttrValue::I2(v) => {
            writer.write_u8(DATATYPE::I2);
            writer.write_u16(*v as u16);
        }
        AttrValue::U2(v) => {
            writer.write_u8(DATATYPE::U2);
            writer.write_u16(*v);
        }
        AttrValue::I4(v) => {
            writer.write_u8(DATATYPE::I4);
            writer.write_u32(*v as u32);
        }
        AttrValue::U4(v) => {
            writer.write_u8(DATATYPE::U4);
            writer.write_u32(*v);
        }
        AttrValue::I8(v) => {
            writer.write_u8(DATATYPE::I8);
            writer.write_u64(*v as u64);
        }
        AttrValue::U8(v) => {
            writer.write_u8(DATATYPE::U8);
            writer.write_u64(*v);
        }
        AttrValue::R4(v) => {
            writer.write_u8(DATATYPE::R4);
            writer.write_u32(v.to_bits());
        }
        AttrValue::R8(v) => {
            writer.write_u8(DATATYPE::R8);
            writer.write_u64(v.to_bits());
        }
        AttrValue::String(v) => {
            writer.write_u8(DATATYPE::STRING);
            let id = ctx.strings.get_or_create(v, true)?;
            writer.write_u16(id);
        }
        AttrValue::Type(name) => {
            // System.Type arguments reference the type by name.
            writer.write_u8(DATATYPE::STRING);
            let id = ctx.strings.get_or_create(name, true)?;
            writer.write_u16(id);
        }
        AttrValue::Array(values) => {
            for element in values {
                write_attr_value(ctx, writer, element)?;
            }
        }
    }
    Ok(())
}

/// Intern a custom-attribute signature and return its id.
///
/// Layout: fixed arguments in constructor order, a u16 named-argument count,
/// then each named argument (sorted by name) as a field/property tag, the
/// name's string id, and the tagged value.
///
/// # Errors
/// Propagates any value encoding error.
pub fn attribute_sig_id(ctx: &mut TablesContext<'_>, attribute: &CustomAttribute) -> Result<u16> {
    let mut writer = SigWriter::little_endian();
    for value in &attribute.fixed_args {
        write_attr_value(ctx, &mut writer, value)?;
    }

    let mut named: Vec<_> = attribute.named_args.iter().collect();
    named.sort_by(|a, b| a.name.cmp(&b.name));

    writer.write_u16(u16::try_from(named.len()).map_err(|_| {
        Error::NotSupported(format!("{} named attribute arguments", named.len()))
    })?);
    for arg in named {
        writer.write_u8(if arg.is_field {
            SERIALIZATION_TYPE_FIELD
        } else {
            SERIALIZATION_TYPE_PROPERTY
        });
        let name_id = ctx.strings.get_or_create(&arg.name, true)?;
        writer.write_u16(name_id);
        write_attr_value(ctx, &mut writer, &arg.value)?;
    }

    let bytes = writer.into_bytes();
    ctx.signatures.get_or_create(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = SignatureTable::new();
        let first = table.get_or_create(&[0x20, 0x00, DATATYPE::VOID]).unwrap();
        let len = table.blob_len();
        let second = table.get_or_create(&[0x20, 0x00, DATATYPE::VOID]).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.blob_len(), len);
    }

    #[test]
    fn sub_match_reuses_existing_bytes() {
        let mut table = SignatureTable::new();
        table
            .get_or_create(&[0x00, 0x02, DATATYPE::I4, DATATYPE::STRING, DATATYPE::U1])
            .unwrap();
        let len = table.blob_len();

        // A contiguous suffix of the first signature.
        let id = table.get_or_create(&[DATATYPE::STRING, DATATYPE::U1]).unwrap();
        assert_eq!(id, 3);
        assert_eq!(table.blob_len(), len);

        // An interior slice as well.
        let id = table.get_or_create(&[0x02, DATATYPE::I4]).unwrap();
        assert_eq!(id, 1);
        assert_eq!(table.blob_len(), len);
    }

    #[test]
    fn fresh_bytes_are_appended() {
        let mut table = SignatureTable::new();
        let first = table.get_or_create(&[0x06, DATATYPE::I4]).unwrap();
        let second = table.get_or_create(&[0x06, DATATYPE::STRING]).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 2);
        assert_eq!(table.blob_len(), 4);
    }

    #[test]
    fn empty_signature_is_offset_zero() {
        let mut table = SignatureTable::new();
        assert_eq!(table.get_or_create(&[]).unwrap(), 0);
        assert_eq!(table.blob_len(), 0);
    }

    #[test]
    fn sig_writer_endianness() {
        let mut le = SigWriter::little_endian();
        le.write_u16(0x1234);
        assert_eq!(le.into_bytes(), [0x34, 0x12]);

        let mut be = SigWriter::big_endian();
        be.write_u16(0x1234);
        assert_eq!(be.into_bytes(), [0x12, 0x34]);
    }

    #[test]
    fn primitive_map_covers_the_system_types() {
        assert_eq!(primitive_code("System", "Int32"), Some(DATATYPE::I4));
        assert_eq!(primitive_code("System", "DateTime"), Some(DATATYPE::DATETIME));
        assert_eq!(primitive_code("System", "IntPtr"), Some(DATATYPE::I4));
        assert_eq!(primitive_code("System", "Decimal"), None);
        assert_eq!(primitive_code("Custom", "Int32"), None);
    }
}
