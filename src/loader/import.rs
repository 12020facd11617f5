//! Object graph assembly from the raw metadata.
//!
//! Walks the raw tables and heaps once, in dependency order, and produces
//! the read-only [`Assembly`] graph: identity, references, definitions with
//! their member lists, decoded bodies, custom attributes, and embedded
//! resources.

use std::path::Path;

use crate::{
    loader::{
        body::{self, BodyContext},
        file::PeFile,
        io::{read_le_at, Parser},
        signatures::{
            parse_field_sig, parse_locals_sig, parse_method_sig, parse_method_spec_sig,
            parse_type_spec_sig,
        },
        streams::{Blob, MetadataRoot, Strings, UserStrings},
        tables::{table, RawTables, TablesStream},
        Assembly, AssemblyRefEntry, AssemblyRefIdx, AttrValue, AttributeOwner, CustomAttribute,
        FieldEntry, FieldIdx, GenericParamEntry, GenericParamIdx, GenericParamOwner,
        MemberRefEntry, MemberRefIdx, MemberRefSig, MethodEntry, MethodHandle, MethodIdx,
        MethodSpecEntry, NamedArg, Resource, TypeDefEntry, TypeDefIdx,
        TypeHandle, TypeRefEntry, TypeRefIdx, TypeRefScope, TypeSig, TypeSpecEntry, TypeSpecIdx,
        Version,
    },
    malformed_error, Error, Result,
};

/// ECMA method implementation flag: the body is native code.
const MIFLAGS_NATIVE: u16 = 0x0001;
/// ECMA method implementation flag: provided by the runtime itself.
const MIFLAGS_INTERNAL_CALL: u16 = 0x1000;

static EMPTY_HEAP: [u8; 1] = [0];

/// Load and import an assembly from disk.
///
/// # Errors
/// Propagates any PE, metadata, or body decoding error.
pub fn load_assembly(path: &Path) -> Result<Assembly> {
    let pe = PeFile::from_path(path)?;
    import(&pe)
}

/// Import the object graph from an already-parsed PE file.
///
/// # Errors
/// Propagates any metadata or body decoding error.
pub fn import(pe: &PeFile) -> Result<Assembly> {
    let meta = pe.metadata()?;
    let root = MetadataRoot::parse(meta)?;

    let stream_bytes = |name: &str| -> Result<Option<&[u8]>> {
        match root.stream(name) {
            Some(header) => {
                let start = header.offset as usize;
                let end = start
                    .checked_add(header.size as usize)
                    .filter(|end| *end <= meta.len())
                    .ok_or(Error::OutOfBounds)?;
                Ok(Some(&meta[start..end]))
            }
            None => Ok(None),
        }
    };

    let tables_bytes = stream_bytes("#~")?
        .or(stream_bytes("#-")?)
        .ok_or_else(|| malformed_error!("Assembly has no metadata tables stream"))?;
    let strings = Strings::from(stream_bytes("#Strings")?.unwrap_or(&EMPTY_HEAP))?;
    let blob = Blob::from(stream_bytes("#Blob")?.unwrap_or(&EMPTY_HEAP))?;
    let user_strings = UserStrings::from(stream_bytes("#US")?.unwrap_or(&EMPTY_HEAP))?;

    let stream = TablesStream::parse(tables_bytes)?;
    let raw = RawTables::read(&stream)?;

    Importer {
        pe,
        raw: &raw,
        strings: &strings,
        blob: &blob,
        user_strings: &user_strings,
    }
    .run()
}

struct Importer<'a> {
    pe: &'a PeFile,
    raw: &'a RawTables,
    strings: &'a Strings<'a>,
    blob: &'a Blob<'a>,
    user_strings: &'a UserStrings<'a>,
}

impl Importer<'_> {
    fn run(self) -> Result<Assembly> {
        let mut assembly = Assembly::default();

        self.import_identity(&mut assembly)?;
        self.import_assembly_refs(&mut assembly)?;
        self.import_type_refs(&mut assembly)?;
        self.import_type_specs(&mut assembly)?;
        self.import_member_refs(&mut assembly)?;
        self.import_type_defs(&mut assembly)?;
        self.import_generic_params(&mut assembly)?;
        self.import_method_specs(&mut assembly)?;
        self.import_bodies(&mut assembly)?;
        self.import_constants(&mut assembly)?;
        self.import_attributes(&mut assembly)?;
        self.import_resources(&mut assembly)?;

        let entry_token = self.pe.cor20().entry_point_token;
        if entry_token >> 24 == 0x06 {
            let rid = entry_token & 0x00FF_FFFF;
            if rid == 0 || rid as usize > assembly.methods.len() {
                return Err(malformed_error!("Entry point token out of range - {:#010x}", entry_token));
            }
            assembly.entry_point = Some(MethodIdx(rid - 1));
        }

        Ok(assembly)
    }

    fn str(&self, index: u32) -> Result<String> {
        Ok(self.strings.get(index as usize)?.to_string())
    }

    fn import_identity(&self, assembly: &mut Assembly) -> Result<()> {
        if let Some(row) = self.raw.assembly.first() {
            assembly.name = self.str(row.name)?;
            assembly.version = Version {
                major: row.version[0],
                minor: row.version[1],
                build: row.version[2],
                revision: row.version[3],
            };
            assembly.flags = row.flags;
        } else if let Some(module) = self.raw.module.first() {
            let name = self.str(module.name)?;
            assembly.name = name
                .rsplit_once('.')
                .map_or(name.clone(), |(stem, _)| stem.to_string());
        }
        Ok(())
    }

    fn import_assembly_refs(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.assembly_refs.iter().enumerate() {
            assembly.assembly_refs.push(AssemblyRefEntry {
                name: self.str(row.name)?,
                version: Version {
                    major: row.version[0],
                    minor: row.version[1],
                    build: row.version[2],
                    revision: row.version[3],
                },
                flags: row.flags,
                token: 0x2300_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn import_type_refs(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.type_refs.iter().enumerate() {
            let rid = row.scope & 0x00FF_FFFF;
            let scope = match row.scope >> 24 {
                0x23 => {
                    if rid == 0 || rid as usize > self.raw.assembly_refs.len() {
                        return Err(malformed_error!("Type reference scope out of range - {:#010x}", row.scope));
                    }
                    TypeRefScope::Assembly(AssemblyRefIdx(rid - 1))
                }
                0x01 => {
                    if rid == 0 || rid as usize > self.raw.type_refs.len() {
                        return Err(malformed_error!("Nested type reference scope out of range - {:#010x}", row.scope));
                    }
                    TypeRefScope::Nested(TypeRefIdx(rid - 1))
                }
                _ => {
                    return Err(Error::NotSupported(format!(
                        "type reference scope {:#010x}",
                        row.scope
                    )))
                }
            };
            assembly.type_refs.push(TypeRefEntry {
                name: self.str(row.name)?,
                namespace: self.str(row.namespace)?,
                scope,
                token: 0x0100_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn import_type_specs(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.type_specs.iter().enumerate() {
            let sig = parse_type_spec_sig(self.blob.get(row.signature as usize)?)?;
            assembly.type_specs.push(TypeSpecEntry {
                sig,
                token: 0x1B00_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn import_member_refs(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.member_refs.iter().enumerate() {
            let rid = row.class & 0x00FF_FFFF;
            if rid == 0 {
                return Err(malformed_error!("Member reference without declaring type"));
            }
            let declaring = match row.class >> 24 {
                0x01 => TypeHandle::Ref(TypeRefIdx(rid - 1)),
                0x02 => TypeHandle::Def(TypeDefIdx(rid - 1)),
                0x1B => TypeHandle::Spec(TypeSpecIdx(rid - 1)),
                table => {
                    return Err(Error::NotSupported(format!(
                        "member reference parent in table {table:#04x}"
                    )))
                }
            };

            let sig_bytes = self.blob.get(row.signature as usize)?;
            let sig = if sig_bytes.first() == Some(&0x06) {
                MemberRefSig::Field(parse_field_sig(sig_bytes)?)
            } else {
                MemberRefSig::Method(parse_method_sig(sig_bytes)?)
            };

            assembly.member_refs.push(MemberRefEntry {
                name: self.str(row.name)?,
                declaring,
                sig,
                token: 0x0A00_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn import_type_defs(&self, assembly: &mut Assembly) -> Result<()> {
        let type_count = self.raw.type_defs.len();
        let field_count = self.raw.fields.len();
        let method_count = self.raw.methods.len();

        for (i, row) in self.raw.type_defs.iter().enumerate() {
            let extends = if row.extends & 0x00FF_FFFF == 0 {
                None
            } else {
                let rid = (row.extends & 0x00FF_FFFF) - 1;
                Some(match row.extends >> 24 {
                    0x01 => TypeHandle::Ref(TypeRefIdx(rid)),
                    0x02 => TypeHandle::Def(TypeDefIdx(rid)),
                    0x1B => TypeHandle::Spec(TypeSpecIdx(rid)),
                    table => {
                        return Err(malformed_error!("Invalid extends table - {:#04x}", table))
                    }
                })
            };

            let field_end = self
                .raw
                .type_defs
                .get(i + 1)
                .map_or(field_count as u32 + 1, |next| next.field_list)
                .min(field_count as u32 + 1);
            let field_start = row.field_list.clamp(1, field_end);
            let method_end = self
                .raw
                .type_defs
                .get(i + 1)
                .map_or(method_count as u32 + 1, |next| next.method_list)
                .min(method_count as u32 + 1);
            let method_start = row.method_list.clamp(1, method_end);

            assembly.type_defs.push(TypeDefEntry {
                name: self.str(row.name)?,
                namespace: self.str(row.namespace)?,
                flags: row.flags,
                extends,
                enclosing: None,
                interfaces: Vec::new(),
                fields: (field_start..field_end).map(|f| FieldIdx(f - 1)).collect(),
                methods: (method_start..method_end).map(|m| MethodIdx(m - 1)).collect(),
                generic_params: Vec::new(),
                token: 0x0200_0001 + i as u32,
            });
        }

        for row in &self.raw.nested_classes {
            let nested = row.nested as usize;
            let enclosing = row.enclosing as usize;
            if nested == 0 || nested > type_count || enclosing == 0 || enclosing > type_count {
                return Err(malformed_error!("Nested class row out of range"));
            }
            assembly.type_defs[nested - 1].enclosing = Some(TypeDefIdx(row.enclosing - 1));
        }

        for row in &self.raw.interface_impls {
            let class = row.class as usize;
            if class == 0 || class > type_count {
                return Err(malformed_error!("Interface implementation row out of range"));
            }
            let rid = row.interface & 0x00FF_FFFF;
            if rid == 0 {
                return Err(malformed_error!("Null interface token"));
            }
            let handle = match row.interface >> 24 {
                0x01 => TypeHandle::Ref(TypeRefIdx(rid - 1)),
                0x02 => TypeHandle::Def(TypeDefIdx(rid - 1)),
                0x1B => TypeHandle::Spec(TypeSpecIdx(rid - 1)),
                table => return Err(malformed_error!("Invalid interface table - {:#04x}", table)),
            };
            assembly.type_defs[class - 1].interfaces.push(handle);
        }

        // Fields and methods, with their declaring type recovered from the
        // member ranges established above.
        let mut field_owner = vec![None; field_count];
        let mut method_owner = vec![None; method_count];
        for (t, entry) in assembly.type_defs.iter().enumerate() {
            for field in &entry.fields {
                field_owner[field.index()] = Some(TypeDefIdx(t as u32));
            }
            for method in &entry.methods {
                method_owner[method.index()] = Some(TypeDefIdx(t as u32));
            }
        }

        for (i, row) in self.raw.fields.iter().enumerate() {
            let declaring = field_owner[i]
                .ok_or_else(|| malformed_error!("Field row {} belongs to no type", i + 1))?;
            assembly.fields.push(FieldEntry {
                name: self.str(row.name)?,
                flags: row.flags,
                sig: parse_field_sig(self.blob.get(row.signature as usize)?)?,
                default_value: None,
                declaring,
                token: 0x0400_0001 + i as u32,
            });
        }

        for (i, row) in self.raw.methods.iter().enumerate() {
            let declaring = method_owner[i]
                .ok_or_else(|| malformed_error!("Method row {} belongs to no type", i + 1))?;
            assembly.methods.push(MethodEntry {
                name: self.str(row.name)?,
                flags: row.flags,
                impl_flags: row.impl_flags,
                sig: parse_method_sig(self.blob.get(row.signature as usize)?)?,
                locals: Vec::new(),
                body: None,
                declaring,
                generic_params: Vec::new(),
                token: 0x0600_0001 + i as u32,
            });
        }

        Ok(())
    }

    fn import_generic_params(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.generic_params.iter().enumerate() {
            let rid = row.owner & 0x00FF_FFFF;
            if rid == 0 {
                return Err(malformed_error!("Generic parameter without owner"));
            }
            let owner = match row.owner >> 24 {
                0x02 => {
                    if rid as usize > assembly.type_defs.len() {
                        return Err(malformed_error!("Generic parameter owner out of range"));
                    }
                    GenericParamOwner::Type(TypeDefIdx(rid - 1))
                }
                0x06 => {
                    if rid as usize > assembly.methods.len() {
                        return Err(malformed_error!("Generic parameter owner out of range"));
                    }
                    GenericParamOwner::Method(MethodIdx(rid - 1))
                }
                table => return Err(malformed_error!("Invalid generic parameter owner table - {:#04x}", table)),
            };

            let idx = GenericParamIdx(i as u32);
            match owner {
                GenericParamOwner::Type(t) => assembly.type_defs[t.index()].generic_params.push(idx),
                GenericParamOwner::Method(m) => assembly.methods[m.index()].generic_params.push(idx),
            }

            assembly.generic_params.push(GenericParamEntry {
                number: row.number,
                flags: row.flags,
                owner,
                name: self.str(row.name)?,
                token: 0x2A00_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn import_method_specs(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.method_specs.iter().enumerate() {
            let rid = row.method & 0x00FF_FFFF;
            if rid == 0 {
                return Err(malformed_error!("Method instantiation without method"));
            }
            let method = match row.method >> 24 {
                0x06 => MethodHandle::Def(MethodIdx(rid - 1)),
                0x0A => MethodHandle::Ref(MemberRefIdx(rid - 1)),
                table => return Err(malformed_error!("Invalid method-spec method table - {:#04x}", table)),
            };
            assembly.method_specs.push(MethodSpecEntry {
                method,
                args: parse_method_spec_sig(self.blob.get(row.instantiation as usize)?)?,
                token: 0x2B00_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn import_bodies(&self, assembly: &mut Assembly) -> Result<()> {
        let ctx = BodyContext {
            user_strings: self.user_strings,
            blob: self.blob,
            stand_alone_sigs: &self.raw.stand_alone_sigs,
            seen_strings: std::cell::RefCell::new(Vec::new()),
        };

        for (i, row) in self.raw.methods.iter().enumerate() {
            if row.rva == 0 || row.impl_flags & (MIFLAGS_NATIVE | MIFLAGS_INTERNAL_CALL) != 0 {
                continue;
            }

            let data = self.pe.slice_from_rva(row.rva)?;
            let decoded = body::decode_body(data, &ctx)?;

            if decoded.local_sig_token != 0 {
                if decoded.local_sig_token >> 24 != 0x11 {
                    return Err(malformed_error!(
                        "Invalid locals signature token - {:#010x}",
                        decoded.local_sig_token
                    ));
                }
                let rid = (decoded.local_sig_token & 0x00FF_FFFF) as usize;
                let sig_row = self
                    .raw
                    .stand_alone_sigs
                    .get(rid.wrapping_sub(1))
                    .ok_or_else(|| malformed_error!("Locals signature row out of range - {}", rid))?;
                assembly.methods[i].locals =
                    parse_locals_sig(self.blob.get(sig_row.signature as usize)?)?;
            }

            assembly.methods[i].body = Some(decoded);
        }

        let mut seen = std::collections::HashSet::new();
        for (token, content) in ctx.seen_strings.into_inner() {
            if seen.insert(token) {
                assembly.user_strings.push((token, content));
            }
        }

        Ok(())
    }

    fn import_constants(&self, assembly: &mut Assembly) -> Result<()> {
        for row in &self.raw.constants {
            // Only field constants matter here; parameter and property
            // constants have no counterpart in the output image.
            if row.parent >> 24 != 0x04 {
                continue;
            }
            let rid = (row.parent & 0x00FF_FFFF) as usize;
            if rid == 0 || rid > assembly.fields.len() {
                return Err(malformed_error!("Constant owner out of range"));
            }
            let value = self.blob.get(row.value as usize)?.to_vec();
            assembly.fields[rid - 1].default_value = Some(value);
        }
        Ok(())
    }

    fn import_resources(&self, assembly: &mut Assembly) -> Result<()> {
        let cor20 = self.pe.cor20();
        for row in &self.raw.resources {
            if row.implementation != 0 {
                // Linked (file or assembly-ref) resources are not carried.
                continue;
            }
            let base = self
                .pe
                .read_at_rva(cor20.resources_rva, cor20.resources_size as usize)?;
            let mut offset = row.offset as usize;
            let len: u32 = read_le_at(base, &mut offset)?;
            let end = offset
                .checked_add(len as usize)
                .filter(|end| *end <= base.len())
                .ok_or(Error::OutOfBounds)?;
            assembly.resources.push(Resource {
                name: self.str(row.name)?,
                data: base[offset..end].to_vec(),
                public: row.flags & 0x7 == 0x1,
            });
        }
        Ok(())
    }

    fn import_attributes(&self, assembly: &mut Assembly) -> Result<()> {
        for (i, row) in self.raw.custom_attributes.iter().enumerate() {
            let parent_rid = row.parent & 0x00FF_FFFF;
            if parent_rid == 0 {
                return Err(malformed_error!("Custom attribute without an owner"));
            }
            let owner = match row.parent >> 24 {
                0x02 => AttributeOwner::Type(TypeDefIdx(parent_rid - 1)),
                0x04 => AttributeOwner::Field(FieldIdx(parent_rid - 1)),
                0x06 => AttributeOwner::Method(MethodIdx(parent_rid - 1)),
                0x20 => AttributeOwner::Assembly,
                // Attributes on other owners (modules, parameters, generic
                // parameters, ...) have no counterpart in the output image.
                _ => continue,
            };

            let ctor_rid = row.ctor & 0x00FF_FFFF;
            if ctor_rid == 0 {
                return Err(malformed_error!("Custom attribute without constructor"));
            }
            let (ctor, params) = match row.ctor >> 24 {
                0x06 => {
                    let idx = MethodIdx(ctor_rid - 1);
                    let params = assembly
                        .methods
                        .get(idx.index())
                        .ok_or_else(|| malformed_error!("Attribute constructor out of range"))?
                        .sig
                        .params
                        .clone();
                    (MethodHandle::Def(idx), params)
                }
                0x0A => {
                    let idx = MemberRefIdx(ctor_rid - 1);
                    let entry = assembly
                        .member_refs
                        .get(idx.index())
                        .ok_or_else(|| malformed_error!("Attribute constructor out of range"))?;
                    let MemberRefSig::Method(sig) = &entry.sig else {
                        return Err(malformed_error!("Attribute constructor is not a method"));
                    };
                    (MethodHandle::Ref(idx), sig.params.clone())
                }
                table => {
                    return Err(malformed_error!("Invalid attribute constructor table - {:#04x}", table))
                }
            };

            let blob_bytes = self.blob.get(row.value as usize)?;
            let Ok((fixed_args, named_args)) = self.parse_attribute_blob(blob_bytes, &params, assembly)
            else {
                // Attribute blobs that use encodings outside the supported set
                // degrade to a skipped attribute rather than failing the build.
                continue;
            };

            assembly.attributes.push(CustomAttribute {
                owner,
                ctor,
                fixed_args,
                named_args,
                token: 0x0C00_0001 + i as u32,
            });
        }
        Ok(())
    }

    fn parse_attribute_blob(
        &self,
        data: &[u8],
        params: &[TypeSig],
        assembly: &Assembly,
    ) -> Result<(Vec<AttrValue>, Vec<NamedArg>)> {
        let mut parser = Parser::new(data);
        let prolog = parser.read_le::<u16>()?;
        if prolog != 0x0001 {
            return Err(malformed_error!("Invalid attribute prolog - {:#06x}", prolog));
        }

        let mut fixed_args = Vec::with_capacity(params.len());
        for param in params {
            fixed_args.push(self.read_attr_value(&mut parser, param, assembly)?);
        }

        let named_count = parser.read_le::<u16>()?;
        let mut named_args = Vec::with_capacity(usize::from(named_count));
        for _ in 0..named_count {
            let kind = parser.read_le::<u8>()?;
            let is_field = match kind {
                0x53 => true,
                0x54 => false,
                _ => return Err(malformed_error!("Invalid named argument kind - {:#04x}", kind)),
            };
            let value_type = self.read_named_arg_type(&mut parser)?;
            let name = read_ser_string(&mut parser)?
                .ok_or_else(|| malformed_error!("Named argument without a name"))?;
            let value = self.read_attr_value(&mut parser, &value_type, assembly)?;
            named_args.push(NamedArg {
                is_field,
                name,
                value,
            });
        }

        Ok((fixed_args, named_args))
    }

    /// Decode a named argument's `FieldOrPropType` into the type model.
    fn read_named_arg_type(&self, parser: &mut Parser<'_>) -> Result<TypeSig> {
        let tag = parser.read_le::<u8>()?;
        Ok(match tag {
            0x02 => TypeSig::Boolean,
            0x03 => TypeSig::Char,
            0x04 => TypeSig::I1,
            0x05 => TypeSig::U1,
            0x06 => TypeSig::I2,
            0x07 => TypeSig::U2,
            0x08 => TypeSig::I4,
            0x09 => TypeSig::U4,
            0x0A => TypeSig::I8,
            0x0B => TypeSig::U8,
            0x0C => TypeSig::R4,
            0x0D => TypeSig::R8,
            0x0E => TypeSig::String,
            0x1D => TypeSig::SzArray(Box::new(self.read_named_arg_type(parser)?)),
            // System.Type, boxed object, and enum values all decode through
            // the object path.
            0x50 | 0x51 => TypeSig::Object,
            0x55 => {
                // Enum type name; the value itself is read as its underlying
                // 32-bit form, which covers every enum the runtime accepts.
                let _name = read_ser_string(parser)?;
                TypeSig::I4
            }
            _ => return Err(malformed_error!("Invalid named argument type - {:#04x}", tag)),
        })
    }

    fn read_attr_value(
        &self,
        parser: &mut Parser<'_>,
        ty: &TypeSig,
        assembly: &Assembly,
    ) -> Result<AttrValue> {
        Ok(match ty {
            TypeSig::Boolean => AttrValue::Boolean(parser.read_le::<u8>()? != 0),
            TypeSig::Char => AttrValue::Char(parser.read_le::<u16>()?),
            TypeSig::I1 => AttrValue::I1(parser.read_le::<i8>()?),
            TypeSig::U1 => AttrValue::U1(parser.read_le::<u8>()?),
            TypeSig::I2 => AttrValue::I2(parser.read_le::<i16>()?),
            TypeSig::U2 => AttrValue::U2(parser.read_le::<u16>()?),
            TypeSig::I4 => AttrValue::I4(parser.read_le::<i32>()?),
            TypeSig::U4 => AttrValue::U4(parser.read_le::<u32>()?),
            TypeSig::I8 => AttrValue::I8(parser.read_le::<i64>()?),
            TypeSig::U8 => AttrValue::U8(parser.read_le::<u64>()?),
            TypeSig::R4 => AttrValue::R4(parser.read_le::<f32>()?),
            TypeSig::R8 => AttrValue::R8(parser.read_le::<f64>()?),
            TypeSig::String => match read_ser_string(parser)? {
                Some(value) => AttrValue::String(value),
                None => AttrValue::String(String::new()),
            },
            TypeSig::SzArray(element) => {
                let count = parser.read_le::<u32>()?;
                if count == 0xFFFF_FFFF {
                    return Ok(AttrValue::Array(Vec::new()));
                }
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(self.read_attr_value(parser, element, assembly)?);
                }
                AttrValue::Array(values)
            }
            TypeSig::Class(handle) => {
                if self.is_system_type(*handle, assembly) {
                    match read_ser_string(parser)? {
                        Some(name) => AttrValue::Type(name),
                        None => AttrValue::Type(String::new()),
                    }
                } else {
                    return Err(Error::NotSupported(
                        "class-typed attribute argument".to_string(),
                    ));
                }
            }
            TypeSig::ValueType(handle) => {
                // Enums: definitions resolve their underlying field, external
                // references decode as 32-bit, the dominant underlying type.
                let underlying = self.enum_underlying(*handle, assembly);
                self.read_attr_value(parser, &underlying, assembly)?
            }
            TypeSig::Object => {
                let boxed = self.read_named_arg_type(parser)?;
                self.read_attr_value(parser, &boxed, assembly)?
            }
            _ => {
                return Err(Error::NotSupported(format!(
                    "attribute argument type {ty:?}"
                )))
            }
        })
    }

    fn is_system_type(&self, handle: TypeHandle, assembly: &Assembly) -> bool {
        match handle {
            TypeHandle::Ref(idx) => {
                let entry = assembly.type_ref(idx);
                entry.namespace == "System" && entry.name == "Type"
            }
            _ => false,
        }
    }

    fn enum_underlying(&self, handle: TypeHandle, assembly: &Assembly) -> TypeSig {
        if let TypeHandle::Def(idx) = handle {
            if let Some(entry) = assembly.type_defs.get(idx.index()) {
                for field in &entry.fields {
                    let field = assembly.field(*field);
                    if field.name == "value__" {
                        return field.sig.clone();
                    }
                }
            }
        }
        TypeSig::I4
    }
}

/// Read a `SerString`: compressed length plus UTF-8 bytes, `0xFF` for null.
fn read_ser_string(parser: &mut Parser<'_>) -> Result<Option<String>> {
    if parser.peek_byte()? == 0xFF {
        let _ = parser.read_le::<u8>()?;
        return Ok(None);
    }
    let len = parser.read_compressed_uint()? as usize;
    let bytes = parser.read_bytes(len)?;
    match std::str::from_utf8(bytes) {
        Ok(value) => Ok(Some(value.to_string())),
        Err(_) => Err(malformed_error!("Attribute string is not valid UTF-8")),
    }
}
