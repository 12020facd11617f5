//! The metadata lowering core: tables context and every output table.
//!
//! [`TablesContext`] constructs each table in a fixed order, wires them
//! together, renumbers every entity into 16-bit identifiers, and drives the
//! two-phase emit: construction resolves and interns everything (strings,
//! signatures, type specifications, byte-code), then the emitter serializes
//! the frozen records. Writing is gated behind the one-way
//! *minimize-complete* latch; before the latch every table writes an empty
//! section.
//!
//! # Key Components
//!
//! - [`TablesContext`] - Owner and orchestrator of every table
//! - [`crate::tables::strings::StringTable`] - Content-addressed string heap
//! - [`crate::tables::signatures::SignatureTable`] - Interned signature blob
//! - [`crate::tables::bytecode::ByteCodeTable`] - Rewritten method bodies
//! - [`crate::tables::token`] - Nano token and table tag definitions

pub mod assemblyref;
pub mod attributes;
pub mod base;
pub mod bytecode;
pub mod fielddef;
pub mod genericparam;
pub mod memberref;
pub mod methoddef;
pub mod methodspec;
pub mod resources;
pub mod signatures;
pub mod strings;
pub mod token;
pub mod typedef;
pub mod typeref;
pub mod typespec;

use rustc_hash::FxHashSet;

use crate::{
    filter::Filter,
    loader::{
        body::TokenTarget, Assembly, AttributeOwner, FieldAttributes, FieldHandle,
        GenericParamOwner, MemberRefSig, MethodAttributes, MethodHandle, TypeDefIdx, TypeHandle,
        TypeSig,
    },
    minimize::LiveSet,
    options::Options,
    Error, Result,
};

use assemblyref::{AssemblyRefRecord, AssemblyRefTable};
use attributes::{AttributeRecord, AttributesTable};
use bytecode::ByteCodeTable;
use fielddef::{FieldDefRecord, FieldDefTable};
use genericparam::{GenericParamRecord, GenericParamTable};
use memberref::{MemberRefRecord, MemberRefTable};
use methoddef::{MethodDefRecord, MethodDefTable};
use methodspec::{MethodSpecRecord, MethodSpecTable};
use resources::{ResourceFileRecord, ResourceKind, ResourcesTable};
use signatures::{
    attribute_sig_id, field_sig_id, interface_sig_id, locals_sig_id, method_sig_id,
    method_spec_sig_id, default_value_sig_id, type_sig_bytes, SignatureTable, DATATYPE,
};
use strings::StringTable;
use token::{
    encode_type_token, NanoToken, TableKind, TypeTokenTag, EMPTY_INDEX, EXTERNAL_BIT,
};
use typedef::{TypeDefRecord, TypeDefTable};
use typeref::{TypeRefRecord, TypeRefTable};
use typespec::TypeSpecTable;

/// Marker bits in the high half of the method-def record flags.
const MD_ENTRY_POINT: u32 = 0x0100_0000;
const MD_HAS_EXCEPTION_HANDLERS: u32 = 0x0200_0000;
const MD_NATIVE: u32 = 0x0400_0000;

/// ECMA implementation flags marking a body the image does not carry.
const MIFLAGS_NATIVE: u16 = 0x0001;
const MIFLAGS_INTERNAL_CALL: u16 = 0x1000;

/// Owner and orchestrator of every output table.
///
/// Exclusively owns the tables; holds the loader's object graph only as a
/// read-only borrow and keeps its own identifier maps.
pub struct TablesContext<'a> {
    /// The source object graph, read-only
    pub assembly: &'a Assembly,
    /// Pipeline options
    pub options: &'a Options,
    /// Ignored attribute names, copied from the filter
    pub ignored_attributes: FxHashSet<String>,
    #[allow(missing_docs)]
    pub assembly_refs: AssemblyRefTable,
    #[allow(missing_docs)]
    pub type_refs: TypeRefTable,
    #[allow(missing_docs)]
    pub field_refs: MemberRefTable,
    #[allow(missing_docs)]
    pub method_refs: MemberRefTable,
    #[allow(missing_docs)]
    pub type_defs: TypeDefTable,
    #[allow(missing_docs)]
    pub field_defs: FieldDefTable,
    #[allow(missing_docs)]
    pub method_defs: MethodDefTable,
    #[allow(missing_docs)]
    pub attributes: AttributesTable,
    #[allow(missing_docs)]
    pub type_specs: TypeSpecTable,
    #[allow(missing_docs)]
    pub generic_params: GenericParamTable,
    #[allow(missing_docs)]
    pub method_specs: MethodSpecTable,
    #[allow(missing_docs)]
    pub resources: ResourcesTable,
    #[allow(missing_docs)]
    pub signatures: SignatureTable,
    #[allow(missing_docs)]
    pub strings: StringTable,
    #[allow(missing_docs)]
    pub byte_code: ByteCodeTable,
    /// Assembly name string id, referenced by the image header
    pub assembly_name_id: u16,
    /// User strings that made it into the image: new id, original token, text
    pub user_string_refs: Vec<(u16, u32, String)>,
    minimize_complete: bool,
}

impl<'a> TablesContext<'a> {
    /// Construct every table in the fixed order and resolve all records.
    ///
    /// `order` is the deterministic type sequence from the orderer; `live`
    /// marks the definitions that survived minimization.
    ///
    /// # Errors
    /// Propagates unresolved references, unsupported constructs, and id
    /// overflows.
    pub fn build(
        assembly: &'a Assembly,
        live: &LiveSet,
        order: &[TypeDefIdx],
        filter: &Filter,
        options: &'a Options,
    ) -> Result<Self> {
        let mut ctx = TablesContext {
            assembly,
            options,
            ignored_attributes: filter.ignored_attributes().clone(),
            assembly_refs: AssemblyRefTable::new(),
            type_refs: TypeRefTable::new(),
            field_refs: MemberRefTable::fields(),
            method_refs: MemberRefTable::methods(),
            type_defs: TypeDefTable::new(),
            field_defs: FieldDefTable::new(),
            method_defs: MethodDefTable::new(),
            attributes: AttributesTable::new(),
            type_specs: TypeSpecTable::new(),
            generic_params: GenericParamTable::new(),
            method_specs: MethodSpecTable::new(),
            resources: ResourcesTable::new(),
            signatures: SignatureTable::new(),
            strings: StringTable::new(),
            byte_code: ByteCodeTable::new(),
            assembly_name_id: 0,
            user_string_refs: Vec::new(),
            minimize_complete: false,
        };

        ctx.assembly_name_id = ctx.strings.get_or_create(&assembly.name, true)?;

        ctx.register_references(filter, live)?;
        ctx.preallocate_member_strings()?;
        ctx.register_definitions(live, order)?;
        ctx.resolve_reference_records()?;
        ctx.resolve_definition_records()?;
        ctx.resolve_generic_records()?;
        ctx.build_attributes(filter)?;
        ctx.build_resources()?;
        ctx.collect_user_strings();

        Ok(ctx)
    }

    /// True once minimization has latched and writing is permitted.
    #[must_use]
    pub fn is_minimize_complete(&self) -> bool {
        self.minimize_complete
    }

    /// Latch *minimize-complete*. One-way: tables freeze, writing unlocks.
    pub fn complete_minimization(&mut self) {
        self.minimize_complete = true;
    }

    /// Method id of the entry point, when the assembly has one.
    #[must_use]
    pub fn entry_point_id(&self) -> Option<u16> {
        self.assembly
            .entry_point
            .and_then(|idx| self.method_defs.try_get_id(idx))
    }

    // ------------------------------------------------------------------
    // Token resolution
    // ------------------------------------------------------------------

    /// Encode the table-tagged token of a type, without creating entries.
    ///
    /// Resolution order: type-spec, type-ref, type-def, generic-param.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedReference`] when no table maps the
    /// handle.
    pub fn encode_type_token(&self, handle: TypeHandle) -> Result<u32> {
        match handle {
            TypeHandle::Spec(idx) => {
                let sig = &self.assembly.type_spec(idx).sig;
                let bytes = self.peek_type_sig_bytes(sig)?;
                self.type_specs
                    .try_get_id(&bytes)
                    .map(|id| encode_type_token(TypeTokenTag::Spec, id))
                    .ok_or_else(|| self.unresolved_type(handle))
            }
            TypeHandle::Ref(idx) => self
                .type_refs
                .try_get_id(idx)
                .map(|id| encode_type_token(TypeTokenTag::Ref, id))
                .ok_or_else(|| self.unresolved_type(handle)),
            TypeHandle::Def(idx) => self
                .type_defs
                .try_get_id(idx)
                .map(|id| encode_type_token(TypeTokenTag::Def, id))
                .ok_or_else(|| self.unresolved_type(handle)),
            TypeHandle::GenericParam(idx) => self
                .generic_params
                .try_get_id(idx)
                .map(|id| encode_type_token(TypeTokenTag::GenericParam, id))
                .ok_or_else(|| self.unresolved_type(handle)),
        }
    }

    /// Encode a type token, interning the type specification on first sight.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedReference`] when no table maps the
    /// handle.
    pub(crate) fn type_token(&mut self, handle: TypeHandle) -> Result<u32> {
        match handle {
            TypeHandle::Spec(idx) => {
                let sig = self.assembly.type_spec(idx).sig.clone();
                self.type_spec_token(&sig)
            }
            _ => self.encode_type_token(handle),
        }
    }

    /// Intern a structural type and encode its token.
    ///
    /// # Errors
    /// Propagates signature encoding failures.
    pub(crate) fn type_spec_token(&mut self, sig: &TypeSig) -> Result<u32> {
        let bytes = type_sig_bytes(self, sig)?;
        let sig_id = self.signatures.get_or_create(&bytes)?;
        let id = self.type_specs.get_or_create(bytes, sig_id)?;
        Ok(encode_type_token(TypeTokenTag::Spec, id))
    }

    /// Type token narrowed to the 16-bit form used by records and operands.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexOverflow`] when the encoded token leaves
    /// 16 bits.
    pub(crate) fn inline_type_token(&mut self, handle: TypeHandle) -> Result<u16> {
        let token = self.type_token(handle)?;
        u16::try_from(token).map_err(|_| Error::IndexOverflow("type token"))
    }

    /// Resolve a method to its 16-bit reference id.
    ///
    /// References resolve through the method-ref table with the external bit
    /// set; definitions resolve through the method-def table unmodified.
    /// Generic instantiations collapse to their open method.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedReference`] when neither table maps
    /// the handle.
    pub fn resolve_method_reference_id(&self, handle: MethodHandle) -> Result<u16> {
        match handle {
            MethodHandle::Ref(idx) => self
                .method_refs
                .try_get_id(idx)
                .map(|id| id | EXTERNAL_BIT)
                .ok_or_else(|| {
                    Error::UnresolvedReference(format!(
                        "method reference '{}'",
                        self.assembly.member_ref(idx).name
                    ))
                }),
            MethodHandle::Def(idx) => self.method_defs.try_get_id(idx).ok_or_else(|| {
                Error::UnresolvedReference(format!(
                    "method definition '{}'",
                    self.assembly.method(idx).name
                ))
            }),
            MethodHandle::Spec(idx) => {
                self.resolve_method_reference_id(self.assembly.method_spec(idx).method)
            }
        }
    }

    /// Resolve a field to its 16-bit reference id.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedReference`] when neither table maps
    /// the handle; literal-constant fields resolve to nothing by design.
    pub fn resolve_field_reference_id(&self, handle: FieldHandle) -> Result<u16> {
        match handle {
            FieldHandle::Ref(idx) => self
                .field_refs
                .try_get_id(idx)
                .map(|id| id | EXTERNAL_BIT)
                .ok_or_else(|| {
                    Error::UnresolvedReference(format!(
                        "field reference '{}'",
                        self.assembly.member_ref(idx).name
                    ))
                }),
            FieldHandle::Def(idx) => self.field_defs.try_get_id(idx).ok_or_else(|| {
                Error::UnresolvedReference(format!(
                    "field definition '{}'",
                    self.assembly.field(idx).name
                ))
            }),
        }
    }

    /// Encode a full 32-bit nano metadata token for an `ldtoken` operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedReference`] when no table maps the
    /// target.
    pub(crate) fn nano_token(&mut self, target: TokenTarget) -> Result<u32> {
        Ok(match target {
            TokenTarget::Type(handle) => {
                let token = self.type_token(handle)?;
                let (tag, id) = token::decode_type_token(token);
                let table = match tag {
                    TypeTokenTag::Def => TableKind::TypeDef,
                    TypeTokenTag::Ref => TableKind::TypeRef,
                    TypeTokenTag::Spec => TableKind::TypeSpec,
                    TypeTokenTag::GenericParam => TableKind::GenericParam,
                };
                NanoToken::new(table, id).value()
            }
            TokenTarget::Method(handle) => {
                let id = self.resolve_method_reference_id(handle)?;
                if id & EXTERNAL_BIT != 0 {
                    NanoToken::new(TableKind::MethodRef, id & !EXTERNAL_BIT).value()
                } else {
                    NanoToken::new(TableKind::MethodDef, id).value()
                }
            }
            TokenTarget::Field(handle) => {
                let id = self.resolve_field_reference_id(handle)?;
                if id & EXTERNAL_BIT != 0 {
                    NanoToken::new(TableKind::FieldRef, id & !EXTERNAL_BIT).value()
                } else {
                    NanoToken::new(TableKind::FieldDef, id).value()
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Type classification helpers
    // ------------------------------------------------------------------

    /// Primitive data type code of a named type, when the handle names one.
    #[must_use]
    pub fn primitive_code_of(&self, handle: TypeHandle) -> Option<u8> {
        match handle {
            TypeHandle::Ref(idx) => {
                let entry = self.assembly.type_ref(idx);
                signatures::primitive_code(&entry.namespace, &entry.name)
            }
            TypeHandle::Def(idx) => {
                let entry = self.assembly.type_def(idx);
                signatures::primitive_code(&entry.namespace, &entry.name)
            }
            _ => None,
        }
    }

    /// Underlying primitive of an enum defined in this module.
    #[must_use]
    pub fn enum_underlying(&self, handle: TypeHandle) -> Option<TypeSig> {
        let TypeHandle::Def(idx) = handle else {
            return None;
        };
        let entry = self.assembly.type_def(idx);
        if !self.extends_system(entry.extends, "Enum") {
            return None;
        }
        entry.fields.iter().find_map(|&field| {
            let field = self.assembly.field(field);
            (field.name == "value__").then(|| field.sig.clone())
        })
    }

    fn extends_system(&self, extends: Option<TypeHandle>, name: &str) -> bool {
        match extends {
            Some(TypeHandle::Ref(idx)) => {
                let entry = self.assembly.type_ref(idx);
                entry.namespace == "System" && entry.name == name
            }
            _ => false,
        }
    }

    fn unresolved_type(&self, handle: TypeHandle) -> Error {
        Error::UnresolvedReference(format!(
            "type '{}'",
            self.assembly.type_handle_name(handle)
        ))
    }

    /// Encode type-spec signature bytes without interning anything.
    ///
    /// Only valid for shapes whose nested tokens already resolve, which is
    /// guaranteed after construction.
    fn peek_type_sig_bytes(&self, sig: &TypeSig) -> Result<Vec<u8>> {
        let mut writer = signatures::SigWriter::big_endian();
        self.peek_type_info(&mut writer, sig)?;
        Ok(writer.into_bytes())
    }

    fn peek_type_info(&self, writer: &mut signatures::SigWriter, sig: &TypeSig) -> Result<()> {
        match sig {
            TypeSig::Class(handle) if self.primitive_code_of(*handle).is_none() => {
                writer.write_u8(DATATYPE::CLASS);
                let token = self.encode_type_token(*handle)?;
                writer.write_u16(
                    u16::try_from(token).map_err(|_| Error::IndexOverflow("type token"))?,
                );
                Ok(())
            }
            TypeSig::ValueType(handle) if self.primitive_code_of(*handle).is_none() => {
                if self.options.expand_enums {
                    if let Some(underlying) = self.enum_underlying(*handle) {
                        return self.peek_type_info(writer, &underlying);
                    }
                }
                writer.write_u8(DATATYPE::VALUETYPE);
                let token = self.encode_type_token(*handle)?;
                writer.write_u16(
                    u16::try_from(token).map_err(|_| Error::IndexOverflow("type token"))?,
                );
                Ok(())
            }
            TypeSig::SzArray(element) => {
                writer.write_u8(DATATYPE::SZARRAY);
                self.peek_type_info(writer, element)
            }
            TypeSig::ByRef(element) => {
                writer.write_u8(DATATYPE::BYREF);
                self.peek_type_info(writer, element)
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
                let token = self.encode_type_token(*base)?;
                writer.write_u16(
                    u16::try_from(token).map_err(|_| Error::IndexOverflow("type token"))?,
                );
                writer.write_u8(u8::try_from(args.len()).map_err(|_| {
                    Error::NotSupported(format!("{} generic arguments", args.len()))
                })?);
                for arg in args {
                    self.peek_type_info(writer, arg)?;
                }
                Ok(())
            }
            other => {
                // Primitive and generic-parameter shapes have no nested
                // tokens; delegate to a throwaway mutable encoder is not
                // possible here, so mirror the one-byte forms directly.
                let code = match other {
                    TypeSig::Void => DATATYPE::VOID,
                    TypeSig::Boolean => DATATYPE::BOOLEAN,
                    TypeSig::Char => DATATYPE::CHAR,
                    TypeSig::I1 => DATATYPE::I1,
                    TypeSig::U1 => DATATYPE::U1,
                    TypeSig::I2 => DATATYPE::I2,
                    TypeSig::U2 => DATATYPE::U2,
                    TypeSig::I4 | TypeSig::IntPtr => DATATYPE::I4,
                    TypeSig::U4 | TypeSig::UIntPtr => DATATYPE::U4,
                    TypeSig::I8 => DATATYPE::I8,
                    TypeSig::U8 => DATATYPE::U8,
                    TypeSig::R4 => DATATYPE::R4,
                    TypeSig::R8 => DATATYPE::R8,
                    TypeSig::String => DATATYPE::STRING,
                    TypeSig::Object => DATATYPE::OBJECT,
                    TypeSig::Class(handle) | TypeSig::ValueType(handle) => {
                        writer.write_u8(
                            self.primitive_code_of(*handle).expect("guarded above"),
                        );
                        return Ok(());
                    }
                    TypeSig::Var(number) => {
                        writer.write_u8(DATATYPE::VAR);
                        writer.write_u8(*number as u8);
                        return Ok(());
                    }
                    TypeSig::MVar(number) => {
                        writer.write_u8(DATATYPE::MVAR);
                        writer.write_u8(*number as u8);
                        return Ok(());
                    }
                    TypeSig::Ptr(_) => {
                        return Err(Error::NotSupported("unmanaged pointers".to_string()))
                    }
                    _ => unreachable!("structured shapes handled above"),
                };
                writer.write_u8(code);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Construction phases
    // ------------------------------------------------------------------

    fn register_references(&mut self, filter: &Filter, live: &LiveSet) -> Result<()> {
        let assembly = self.assembly;

        for (i, entry) in assembly.assembly_refs.iter().enumerate() {
            self.assembly_refs
                .register(crate::loader::AssemblyRefIdx(i as u32), &entry.name)?;
        }

        for (i, _) in assembly.type_refs.iter().enumerate() {
            let idx = crate::loader::TypeRefIdx(i as u32);
            let full_name = assembly.type_ref_full_name(idx);
            if filter.is_type_excluded(&full_name) {
                continue;
            }
            self.type_refs.register(idx, &full_name)?;
        }

        for (i, entry) in assembly.member_refs.iter().enumerate() {
            let idx = crate::loader::MemberRefIdx(i as u32);
            if !self.declaring_resolvable(entry.declaring, live) {
                continue;
            }
            match &entry.sig {
                MemberRefSig::Field(_) => {
                    self.field_refs
                        .register(idx, entry.declaring, &entry.name, &entry.sig)?;
                }
                MemberRefSig::Method(_) => {
                    self.method_refs
                        .register(idx, entry.declaring, &entry.name, &entry.sig)?;
                }
            }
        }

        Ok(())
    }

    /// Whether a member reference's declaring type will exist in the image.
    fn declaring_resolvable(&self, handle: TypeHandle, live: &LiveSet) -> bool {
        match handle {
            TypeHandle::Ref(idx) => self.type_refs.try_get_id(idx).is_some(),
            TypeHandle::Def(idx) => live.type_alive(idx),
            TypeHandle::Spec(_) | TypeHandle::GenericParam(_) => true,
        }
    }

    /// Pre-allocate string and signature ids for every member reference so
    /// later definition tables can assume they resolve.
    fn preallocate_member_strings(&mut self) -> Result<()> {
        let assembly = self.assembly;

        for &idx in &self.field_refs.items().to_vec() {
            let entry = assembly.member_ref(idx);
            self.strings.get_or_create(&entry.name, true)?;
            if let MemberRefSig::Field(ty) = &entry.sig {
                let ty = ty.clone();
                field_sig_id(self, &ty)?;
            }
        }

        for &idx in &self.method_refs.items().to_vec() {
            let entry = assembly.member_ref(idx);
            self.strings.get_or_create(&entry.name, true)?;
            if let MemberRefSig::Method(sig) = &entry.sig {
                let sig = sig.clone();
                method_sig_id(self, &sig)?;
            }
        }

        Ok(())
    }

    fn register_definitions(&mut self, live: &LiveSet, order: &[TypeDefIdx]) -> Result<()> {
        let assembly = self.assembly;

        for &type_idx in order {
            self.type_defs.register(type_idx)?;
        }

        // Member tables in type order: statics before instance fields,
        // virtual before instance before static methods, source order kept
        // inside each group. Literal-constant fields never register.
        for &type_idx in order {
            let entry = assembly.type_def(type_idx);

            for pass in [true, false] {
                for &field_idx in &entry.fields {
                    let flags = FieldAttributes::from_bits_truncate(assembly.field(field_idx).flags);
                    if flags.contains(FieldAttributes::LITERAL) {
                        continue;
                    }
                    if flags.contains(FieldAttributes::STATIC) == pass {
                        self.field_defs.register(field_idx)?;
                    }
                }
            }

            for group in [MethodGroup::Virtual, MethodGroup::Instance, MethodGroup::Static] {
                for &method_idx in &entry.methods {
                    if MethodGroup::of(assembly.method(method_idx).flags) == group {
                        self.method_defs.register(method_idx)?;
                    }
                }
            }
        }

        // Generic parameters of surviving owners, in declaration order.
        for (i, entry) in assembly.generic_params.iter().enumerate() {
            let alive = match entry.owner {
                GenericParamOwner::Type(idx) => live.type_alive(idx),
                GenericParamOwner::Method(idx) => {
                    live.type_alive(assembly.method(idx).declaring)
                }
            };
            if alive {
                self.generic_params
                    .register(crate::loader::GenericParamIdx(i as u32))?;
            }
        }

        // Generic method instantiations whose open method resolves.
        for (i, entry) in assembly.method_specs.iter().enumerate() {
            let resolvable = match entry.method {
                MethodHandle::Ref(idx) => self.method_refs.try_get_id(idx).is_some(),
                MethodHandle::Def(idx) => self.method_defs.try_get_id(idx).is_some(),
                MethodHandle::Spec(_) => false,
            };
            if resolvable {
                self.method_specs
                    .register(crate::loader::MethodSpecIdx(i as u32))?;
            }
        }

        Ok(())
    }

    fn resolve_reference_records(&mut self) -> Result<()> {
        let assembly = self.assembly;

        let mut records = Vec::with_capacity(self.assembly_refs.len());
        for &idx in self.assembly_refs.items() {
            let entry = &assembly.assembly_refs[idx.index()];
            records.push(AssemblyRefRecord {
                name: self.strings.get_or_create(&entry.name, true)?,
                version: entry.version,
            });
        }
        self.assembly_refs.set_records(records);

        let mut records = Vec::with_capacity(self.type_refs.len());
        for &idx in &self.type_refs.items().to_vec() {
            let entry = assembly.type_ref(idx);
            let scope = match entry.scope {
                crate::loader::TypeRefScope::Assembly(asm) => self
                    .assembly_refs
                    .try_get_id(asm)
                    .ok_or_else(|| {
                        Error::UnresolvedReference(format!(
                            "assembly reference of '{}'",
                            entry.name
                        ))
                    })?,
                crate::loader::TypeRefScope::Nested(parent) => {
                    let parent_id = self.type_refs.try_get_id(parent).ok_or_else(|| {
                        Error::UnresolvedReference(format!(
                            "declaring type of nested reference '{}'",
                            entry.name
                        ))
                    })?;
                    parent_id | EXTERNAL_BIT
                }
            };
            records.push(TypeRefRecord {
                name: self.strings.get_or_create(&entry.name, true)?,
                namespace: self.strings.get_or_create(&entry.namespace, true)?,
                scope,
            });
        }
        self.type_refs.set_records(records);

        let mut records = Vec::with_capacity(self.field_refs.len());
        for &idx in &self.field_refs.items().to_vec() {
            let entry = assembly.member_ref(idx);
            let MemberRefSig::Field(ty) = &entry.sig else {
                continue;
            };
            let ty = ty.clone();
            records.push(MemberRefRecord {
                name: self.strings.get_or_create(&entry.name, true)?,
                container: self.inline_type_token(entry.declaring)?,
                signature: field_sig_id(self, &ty)?,
            });
        }
        self.field_refs.set_records(records);

        let mut records = Vec::with_capacity(self.method_refs.len());
        for &idx in &self.method_refs.items().to_vec() {
            let entry = assembly.member_ref(idx);
            let MemberRefSig::Method(sig) = &entry.sig else {
                continue;
            };
            let sig = sig.clone();
            records.push(MemberRefRecord {
                name: self.strings.get_or_create(&entry.name, true)?,
                container: self.inline_type_token(entry.declaring)?,
                signature: method_sig_id(self, &sig)?,
            });
        }
        self.method_refs.set_records(records);

        Ok(())
    }

    fn resolve_definition_records(&mut self) -> Result<()> {
        let assembly = self.assembly;

        // Byte-code first: method records need their stream offsets.
        for &method_idx in &self.method_defs.items().to_vec() {
            let entry = assembly.method(method_idx);
            if let Some(body) = &entry.body {
                let bytes = bytecode::encode_body(self, body)?;
                self.byte_code.push(method_idx, &bytes);
            }
        }

        let mut records = Vec::with_capacity(self.field_defs.len());
        for &field_idx in &self.field_defs.items().to_vec() {
            let entry = assembly.field(field_idx);
            let ty = entry.sig.clone();
            let default_value = match &entry.default_value {
                Some(value) => {
                    let value = value.clone();
                    default_value_sig_id(self, &value)?
                }
                None => EMPTY_INDEX,
            };
            records.push(FieldDefRecord {
                name: self.strings.get_or_create(&entry.name, true)?,
                signature: field_sig_id(self, &ty)?,
                flags: entry.flags,
                default_value,
            });
        }
        self.field_defs.set_records(records);

        let mut records = Vec::with_capacity(self.method_defs.len());
        for &method_idx in &self.method_defs.items().to_vec() {
            let entry = assembly.method(method_idx);
            let sig = entry.sig.clone();
            let locals = entry.locals.clone();

            let locals_sig = if locals.is_empty() {
                EMPTY_INDEX
            } else {
                locals_sig_id(self, &locals)?
            };

            let rva = match self.byte_code.rva_of(method_idx) {
                Some(rva) => u16::try_from(rva)
                    .map_err(|_| Error::IndexOverflow("byte-code stream"))?,
                None => EMPTY_INDEX,
            };

            let mut flags = u32::from(entry.flags);
            if entry.impl_flags & (MIFLAGS_NATIVE | MIFLAGS_INTERNAL_CALL) != 0 {
                flags |= MD_NATIVE;
            }
            if assembly.entry_point == Some(method_idx) {
                flags |= MD_ENTRY_POINT;
            }
            let (eval_stack, has_handlers) = match &entry.body {
                Some(body) => (
                    u8::try_from(body.max_stack).map_err(|_| {
                        Error::NotSupported(format!("operand stack depth {}", body.max_stack))
                    })?,
                    !body.exception_handlers.is_empty(),
                ),
                None => (0, false),
            };
            if has_handlers {
                flags |= MD_HAS_EXCEPTION_HANDLERS;
            }

            records.push(MethodDefRecord {
                name: self.strings.get_or_create(&entry.name, true)?,
                rva,
                flags,
                retval_count: u8::from(sig.return_type != TypeSig::Void),
                arg_count: u8::try_from(sig.params.len() + usize::from(sig.has_this))
                    .map_err(|_| Error::NotSupported("argument count".to_string()))?,
                local_count: u8::try_from(locals.len())
                    .map_err(|_| Error::NotSupported("local count".to_string()))?,
                eval_stack,
                locals_sig,
                signature: method_sig_id(self, &sig)?,
            });
        }
        self.method_defs.set_records(records);

        let mut records = Vec::with_capacity(self.type_defs.len());
        for &type_idx in &self.type_defs.items().to_vec() {
            records.push(self.resolve_type_def_record(type_idx)?);
        }
        self.type_defs.set_records(records);

        Ok(())
    }

    fn resolve_type_def_record(&mut self, type_idx: TypeDefIdx) -> Result<TypeDefRecord> {
        let assembly = self.assembly;
        let entry = assembly.type_def(type_idx);

        let extends = match entry.extends {
            Some(handle) => {
                let token = self.type_token(handle)?;
                u16::try_from(token).map_err(|_| Error::IndexOverflow("extends token"))?
            }
            None => EMPTY_INDEX,
        };

        let enclosing = match entry.enclosing {
            Some(outer) => self.type_defs.try_get_id(outer).ok_or_else(|| {
                Error::UnresolvedReference(format!(
                    "declaring type of '{}'",
                    assembly.type_def_full_name(type_idx)
                ))
            })?,
            None => EMPTY_INDEX,
        };

        let interfaces = if entry.interfaces.is_empty() {
            EMPTY_INDEX
        } else {
            let handles = entry.interfaces.clone();
            interface_sig_id(self, &handles)?
        };

        let first_field = entry
            .fields
            .iter()
            .filter_map(|&field| self.field_defs.try_get_id(field))
            .min()
            .unwrap_or(EMPTY_INDEX);
        let first_method = entry
            .methods
            .iter()
            .filter_map(|&method| self.method_defs.try_get_id(method))
            .min()
            .unwrap_or(EMPTY_INDEX);

        let mut virtual_count = 0usize;
        let mut instance_count = 0usize;
        let mut static_count = 0usize;
        for &method in &entry.methods {
            match MethodGroup::of(assembly.method(method).flags) {
                MethodGroup::Virtual => virtual_count += 1,
                MethodGroup::Instance => instance_count += 1,
                MethodGroup::Static => static_count += 1,
            }
        }

        let data_type = if let Some(code) =
            signatures::primitive_code(&entry.namespace, &entry.name)
        {
            code
        } else if self.extends_system(entry.extends, "Enum")
            || self.extends_system(entry.extends, "ValueType")
        {
            DATATYPE::VALUETYPE
        } else {
            DATATYPE::CLASS
        };

        Ok(TypeDefRecord {
            name: self.strings.get_or_create(&entry.name, true)?,
            namespace: self.strings.get_or_create(&entry.namespace, true)?,
            extends,
            enclosing,
            interfaces,
            first_field,
            first_method,
            virtual_count: u8::try_from(virtual_count)
                .map_err(|_| Error::NotSupported("virtual method count".to_string()))?,
            instance_count: u8::try_from(instance_count)
                .map_err(|_| Error::NotSupported("instance method count".to_string()))?,
            static_count: u8::try_from(static_count)
                .map_err(|_| Error::NotSupported("static method count".to_string()))?,
            data_type,
            flags: entry.flags,
        })
    }

    fn resolve_generic_records(&mut self) -> Result<()> {
        let assembly = self.assembly;

        let mut records = Vec::with_capacity(self.generic_params.len());
        for &idx in &self.generic_params.items().to_vec() {
            let entry = assembly.generic_param(idx);
            let owner = match entry.owner {
                GenericParamOwner::Type(type_idx) => {
                    self.type_defs.try_get_id(type_idx).ok_or_else(|| {
                        Error::UnresolvedReference(format!(
                            "owner of generic parameter '{}'",
                            entry.name
                        ))
                    })?
                }
                GenericParamOwner::Method(method_idx) => {
                    let id = self.method_defs.try_get_id(method_idx).ok_or_else(|| {
                        Error::UnresolvedReference(format!(
                            "owner of generic parameter '{}'",
                            entry.name
                        ))
                    })?;
                    id | EXTERNAL_BIT
                }
            };
            records.push(GenericParamRecord {
                number: entry.number,
                flags: entry.flags,
                owner,
                signature: EMPTY_INDEX,
                name: self.strings.get_or_create(&entry.name, true)?,
            });
        }
        self.generic_params.set_records(records);

        let mut records = Vec::with_capacity(self.method_specs.len());
        for &idx in &self.method_specs.items().to_vec() {
            let entry = assembly.method_spec(idx);
            let args = entry.args.clone();
            let declaring = match entry.method {
                MethodHandle::Def(method_idx) => {
                    TypeHandle::Def(assembly.method(method_idx).declaring)
                }
                MethodHandle::Ref(member_idx) => assembly.member_ref(member_idx).declaring,
                MethodHandle::Spec(_) => {
                    return Err(Error::NotSupported(
                        "nested generic method instantiation".to_string(),
                    ))
                }
            };
            records.push(MethodSpecRecord {
                method: self.resolve_method_reference_id(entry.method)?,
                instantiation: method_spec_sig_id(self, &args)?,
                container: self.inline_type_token(declaring)?,
            });
        }
        self.method_specs.set_records(records);

        Ok(())
    }

    fn build_attributes(&mut self, filter: &Filter) -> Result<()> {
        let assembly = self.assembly;

        let mut owners: Vec<(u16, u16, usize)> = Vec::new();
        for (attr_index, attribute) in assembly.attributes.iter().enumerate() {
            let owner = match attribute.owner {
                AttributeOwner::Type(idx) => self
                    .type_defs
                    .try_get_id(idx)
                    .map(|id| (u16::from(TableKind::TypeDef.tag()), id)),
                AttributeOwner::Field(idx) => self
                    .field_defs
                    .try_get_id(idx)
                    .map(|id| (u16::from(TableKind::FieldDef.tag()), id)),
                AttributeOwner::Method(idx) => self
                    .method_defs
                    .try_get_id(idx)
                    .map(|id| (u16::from(TableKind::MethodDef.tag()), id)),
                // Assembly-level attributes never reach the image.
                AttributeOwner::Assembly => None,
            };
            let Some((tag, id)) = owner else {
                continue;
            };
            if filter.is_attribute_ignored(&self.attribute_type_name(attr_index)) {
                continue;
            }
            owners.push((tag, id, attr_index));
        }

        // Emission order follows the owner enumerations: types, then fields,
        // then methods, each by ascending id.
        owners.sort_by_key(|&(tag, id, attr_index)| (tag, id, attr_index));

        if self.options.compress_attributes {
            let mut sorted = Vec::with_capacity(owners.len());
            let mut group_start = 0;
            while group_start < owners.len() {
                let (tag, id, _) = owners[group_start];
                let group_end = owners[group_start..]
                    .iter()
                    .position(|&(t, i, _)| (t, i) != (tag, id))
                    .map_or(owners.len(), |len| group_start + len);
                let mut group: Vec<_> = owners[group_start..group_end].to_vec();
                group.sort_by(|&(_, _, a), &(_, _, b)| {
                    self.attribute_type_name(b).cmp(&self.attribute_type_name(a))
                });
                sorted.extend(group);
                group_start = group_end;
            }
            owners = sorted;
        }

        for (tag, id, attr_index) in owners {
            let attribute = &assembly.attributes[attr_index];
            let ctor = self.resolve_method_reference_id(attribute.ctor)?;
            let signature = attribute_sig_id(self, attribute)?;
            self.attributes.push(AttributeRecord {
                owner_tag: tag,
                owner_id: id,
                ctor,
                signature,
            });
        }

        Ok(())
    }

    /// Full name of an attribute's type, via its constructor.
    fn attribute_type_name(&self, attr_index: usize) -> String {
        let assembly = self.assembly;
        match assembly.attributes[attr_index].ctor {
            MethodHandle::Def(idx) => {
                assembly.type_def_full_name(assembly.method(idx).declaring)
            }
            MethodHandle::Ref(idx) => {
                assembly.type_handle_name(assembly.member_ref(idx).declaring)
            }
            MethodHandle::Spec(idx) => {
                let spec = assembly.method_spec(idx);
                match spec.method {
                    MethodHandle::Def(m) => {
                        assembly.type_def_full_name(assembly.method(m).declaring)
                    }
                    MethodHandle::Ref(m) => {
                        assembly.type_handle_name(assembly.member_ref(m).declaring)
                    }
                    MethodHandle::Spec(_) => String::new(),
                }
            }
        }
    }

    fn build_resources(&mut self) -> Result<()> {
        let assembly = self.assembly;

        for (i, resource) in assembly.resources.iter().enumerate() {
            let name_id = self.strings.get_or_create(&resource.name, true)?;
            let kind = ResourceKind::from_name(&resource.name);
            let first = self
                .resources
                .add_resource(i as u16 + 1, kind, &resource.data);
            self.resources.add_file(ResourceFileRecord {
                name: name_id,
                resource_count: 1,
                first_resource: first,
            });
        }

        Ok(())
    }

    fn collect_user_strings(&mut self) {
        for (token, content) in &self.assembly.user_strings {
            let id = self
                .strings
                .try_get_id(content)
                .or_else(|| self.strings.constant_id(content));
            if let Some(id) = id {
                self.user_string_refs.push((id, *token, content.clone()));
            }
        }
    }
}

/// Emission group of a method within its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodGroup {
    Virtual,
    Instance,
    Static,
}

impl MethodGroup {
    fn of(flags: u16) -> Self {
        let flags = MethodAttributes::from_bits_truncate(flags);
        if flags.contains(MethodAttributes::VIRTUAL) {
            MethodGroup::Virtual
        } else if flags.contains(MethodAttributes::STATIC) {
            MethodGroup::Static
        } else {
            MethodGroup::Instance
        }
    }
}
