//! Blob signature parsing.
//!
//! Decodes ECMA-335 signature blobs (field, method, locals, type-spec,
//! method-spec) into the [`TypeSig`] model. Embedded `TypeDefOrRefOrSpec`
//! tokens are mapped straight to [`TypeHandle`]s; no original token survives
//! into the parsed shape.

use crate::{
    loader::{
        io::Parser, MethodSig, TypeDefIdx, TypeHandle, TypeRefIdx, TypeSig, TypeSpecIdx,
    },
    malformed_error, Error, Result,
};

/// ECMA-335 element type constants used in signature blobs.
#[allow(non_snake_case, dead_code, missing_docs)]
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1B;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

/// Calling convention bits of the leading signature byte.
#[allow(non_snake_case, dead_code, missing_docs)]
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const GENERICINST: u8 = 0x0A;
    pub const MASK: u8 = 0x0F;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

fn read_type_handle(parser: &mut Parser<'_>) -> Result<TypeHandle> {
    let token = parser.read_compressed_token()?;
    let rid = token & 0x00FF_FFFF;
    if rid == 0 {
        return Err(malformed_error!("Null type token in signature"));
    }
    Ok(match token >> 24 {
        0x01 => TypeHandle::Ref(TypeRefIdx(rid - 1)),
        0x02 => TypeHandle::Def(TypeDefIdx(rid - 1)),
        0x1B => TypeHandle::Spec(TypeSpecIdx(rid - 1)),
        table => {
            return Err(malformed_error!(
                "Unexpected table {:#04x} in signature type token",
                table
            ))
        }
    })
}

/// Parse one type shape from the cursor position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid encodings and
/// [`crate::Error::NotSupported`] for shapes the target runtime rejects
/// (multi-dimensional arrays, function pointers, typed references).
pub fn parse_type(parser: &mut Parser<'_>) -> Result<TypeSig> {
    let element = parser.read_le::<u8>()?;
    Ok(match element {
        ELEMENT_TYPE::VOID => TypeSig::Void,
        ELEMENT_TYPE::BOOLEAN => TypeSig::Boolean,
        ELEMENT_TYPE::CHAR => TypeSig::Char,
        ELEMENT_TYPE::I1 => TypeSig::I1,
        ELEMENT_TYPE::U1 => TypeSig::U1,
        ELEMENT_TYPE::I2 => TypeSig::I2,
        ELEMENT_TYPE::U2 => TypeSig::U2,
        ELEMENT_TYPE::I4 => TypeSig::I4,
        ELEMENT_TYPE::U4 => TypeSig::U4,
        ELEMENT_TYPE::I8 => TypeSig::I8,
        ELEMENT_TYPE::U8 => TypeSig::U8,
        ELEMENT_TYPE::R4 => TypeSig::R4,
        ELEMENT_TYPE::R8 => TypeSig::R8,
        ELEMENT_TYPE::STRING => TypeSig::String,
        ELEMENT_TYPE::OBJECT => TypeSig::Object,
        ELEMENT_TYPE::I => TypeSig::IntPtr,
        ELEMENT_TYPE::U => TypeSig::UIntPtr,
        ELEMENT_TYPE::CLASS => TypeSig::Class(read_type_handle(parser)?),
        ELEMENT_TYPE::VALUETYPE => TypeSig::ValueType(read_type_handle(parser)?),
        ELEMENT_TYPE::SZARRAY => TypeSig::SzArray(Box::new(parse_type(parser)?)),
        ELEMENT_TYPE::BYREF => TypeSig::ByRef(Box::new(parse_type(parser)?)),
        ELEMENT_TYPE::PTR => TypeSig::Ptr(Box::new(parse_type(parser)?)),
        ELEMENT_TYPE::VAR => {
            let number = parser.read_compressed_uint()?;
            TypeSig::Var(u16::try_from(number).map_err(|_| {
                malformed_error!("Generic parameter ordinal out of range - {}", number)
            })?)
        }
        ELEMENT_TYPE::MVAR => {
            let number = parser.read_compressed_uint()?;
            TypeSig::MVar(u16::try_from(number).map_err(|_| {
                malformed_error!("Generic parameter ordinal out of range - {}", number)
            })?)
        }
        ELEMENT_TYPE::GENERICINST => {
            let kind = parser.read_le::<u8>()?;
            let value_type = match kind {
                ELEMENT_TYPE::CLASS => false,
                ELEMENT_TYPE::VALUETYPE => true,
                _ => return Err(malformed_error!("Invalid generic instantiation kind - {}", kind)),
            };
            let base = read_type_handle(parser)?;
            let count = parser.read_compressed_uint()?;
            let mut args = Vec::with_capacity(count as usize);
            for _ in 0..count {
                args.push(parse_type(parser)?);
            }
            TypeSig::GenericInst {
                value_type,
                base,
                args,
            }
        }
        ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
            // Custom modifiers carry no runtime meaning here; skip the
            // modifier token and parse the modified type.
            let _modifier = parser.read_compressed_token()?;
            parse_type(parser)?
        }
        ELEMENT_TYPE::ARRAY => {
            return Err(Error::NotSupported(
                "multi-dimensional arrays".to_string(),
            ))
        }
        ELEMENT_TYPE::FNPTR => {
            return Err(Error::NotSupported("function pointers".to_string()))
        }
        ELEMENT_TYPE::TYPEDBYREF => {
            return Err(Error::NotSupported("typed references".to_string()))
        }
        _ => return Err(malformed_error!("Invalid element type - {:#04x}", element)),
    })
}

/// Parse a field signature blob (leading `0x06`).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when the prolog or type is invalid.
pub fn parse_field_sig(data: &[u8]) -> Result<TypeSig> {
    let mut parser = Parser::new(data);
    let prolog = parser.read_le::<u8>()?;
    if prolog & CALLING_CONVENTION::MASK != CALLING_CONVENTION::FIELD {
        return Err(malformed_error!("Invalid field signature prolog - {:#04x}", prolog));
    }
    parse_type(&mut parser)
}

/// Parse a method signature blob (MethodDef, MemberRef).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on invalid encodings and
/// [`crate::Error::NotSupported`] for vararg methods.
pub fn parse_method_sig(data: &[u8]) -> Result<MethodSig> {
    let mut parser = Parser::new(data);
    let convention = parser.read_le::<u8>()?;
    if convention & CALLING_CONVENTION::MASK == CALLING_CONVENTION::VARARG {
        return Err(Error::NotSupported("vararg methods".to_string()));
    }

    let generic_params = if convention & CALLING_CONVENTION::GENERIC != 0 {
        let count = parser.read_compressed_uint()?;
        u8::try_from(count)
            .map_err(|_| malformed_error!("Generic parameter count out of range - {}", count))?
    } else {
        0
    };

    let param_count = parser.read_compressed_uint()?;
    let return_type = parse_type(&mut parser)?;
    let mut params = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        params.push(parse_type(&mut parser)?);
    }

    Ok(MethodSig {
        has_this: convention & CALLING_CONVENTION::HASTHIS != 0,
        generic_params,
        return_type,
        params,
    })
}

/// Parse a local variable signature blob (leading `0x07`).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when the prolog or any local type is
/// invalid.
pub fn parse_locals_sig(data: &[u8]) -> Result<Vec<TypeSig>> {
    let mut parser = Parser::new(data);
    let prolog = parser.read_le::<u8>()?;
    if prolog != CALLING_CONVENTION::LOCAL_SIG {
        return Err(malformed_error!("Invalid locals signature prolog - {:#04x}", prolog));
    }

    let count = parser.read_compressed_uint()?;
    let mut locals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // Pinned markers carry no meaning for the target runtime; skip them.
        while parser.peek_byte()? == ELEMENT_TYPE::PINNED {
            let _ = parser.read_le::<u8>()?;
        }
        locals.push(parse_type(&mut parser)?);
    }
    Ok(locals)
}

/// Parse a type-spec signature blob.
///
/// # Errors
/// Propagates any type parsing error.
pub fn parse_type_spec_sig(data: &[u8]) -> Result<TypeSig> {
    let mut parser = Parser::new(data);
    parse_type(&mut parser)
}

/// Parse a method-spec instantiation blob (leading `0x0A`).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when the prolog or any argument is
/// invalid.
pub fn parse_method_spec_sig(data: &[u8]) -> Result<Vec<TypeSig>> {
    let mut parser = Parser::new(data);
    let prolog = parser.read_le::<u8>()?;
    if prolog != CALLING_CONVENTION::GENERICINST {
        return Err(malformed_error!(
            "Invalid method-spec signature prolog - {:#04x}",
            prolog
        ));
    }

    let count = parser.read_compressed_uint()?;
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        args.push(parse_type(&mut parser)?);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_sig_primitive() {
        let sig = parse_field_sig(&[0x06, ELEMENT_TYPE::I4]).unwrap();
        assert_eq!(sig, TypeSig::I4);
    }

    #[test]
    fn field_sig_class_token() {
        // 0x06, CLASS, compressed TypeRef rid 2 => (2 << 2) | 1
        let sig = parse_field_sig(&[0x06, ELEMENT_TYPE::CLASS, 0x09]).unwrap();
        assert_eq!(sig, TypeSig::Class(TypeHandle::Ref(TypeRefIdx(1))));
    }

    #[test]
    fn method_sig_instance_void() {
        // hasthis, 0 params, void
        let sig = parse_method_sig(&[0x20, 0x00, ELEMENT_TYPE::VOID]).unwrap();
        assert!(sig.has_this);
        assert_eq!(sig.generic_params, 0);
        assert_eq!(sig.return_type, TypeSig::Void);
        assert!(sig.params.is_empty());
    }

    #[test]
    fn method_sig_static_params() {
        let sig = parse_method_sig(&[
            0x00,
            0x02,
            ELEMENT_TYPE::I4,
            ELEMENT_TYPE::STRING,
            ELEMENT_TYPE::SZARRAY,
            ELEMENT_TYPE::U1,
        ])
        .unwrap();
        assert!(!sig.has_this);
        assert_eq!(sig.return_type, TypeSig::I4);
        assert_eq!(
            sig.params,
            vec![TypeSig::String, TypeSig::SzArray(Box::new(TypeSig::U1))]
        );
    }

    #[test]
    fn method_sig_vararg_rejected() {
        assert!(matches!(
            parse_method_sig(&[0x05, 0x00, ELEMENT_TYPE::VOID]),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn locals_sig_list() {
        let locals = parse_locals_sig(&[0x07, 0x02, ELEMENT_TYPE::I4, ELEMENT_TYPE::OBJECT]).unwrap();
        assert_eq!(locals, vec![TypeSig::I4, TypeSig::Object]);
    }

    #[test]
    fn generic_inst_shape() {
        // GENERICINST CLASS TypeDef(3) <2> I4 STRING
        let sig = parse_type_spec_sig(&[
            ELEMENT_TYPE::GENERICINST,
            ELEMENT_TYPE::CLASS,
            0x0C, // (3 << 2) | 0 => TypeDef rid 3
            0x02,
            ELEMENT_TYPE::I4,
            ELEMENT_TYPE::STRING,
        ])
        .unwrap();
        assert_eq!(
            sig,
            TypeSig::GenericInst {
                value_type: false,
                base: TypeHandle::Def(TypeDefIdx(2)),
                args: vec![TypeSig::I4, TypeSig::String],
            }
        );
    }

    #[test]
    fn custom_modifiers_are_skipped() {
        // CMOD_OPT TypeRef(1), then I4
        let sig =
            parse_type_spec_sig(&[ELEMENT_TYPE::CMOD_OPT, 0x05, ELEMENT_TYPE::I4]).unwrap();
        assert_eq!(sig, TypeSig::I4);
    }

    #[test]
    fn unsupported_shapes_are_reported() {
        assert!(matches!(
            parse_type_spec_sig(&[ELEMENT_TYPE::FNPTR, 0x20, 0x00, 0x01]),
            Err(Error::NotSupported(_))
        ));
    }
}
