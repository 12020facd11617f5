//! Loader collaborator: PE/CLI parsing and the source object graph.
//!
//! The loader parses the input assembly into an in-memory object graph that
//! the lowering core treats as opaque and immutable. Entities reference each
//! other through plain index handles ([`TypeDefIdx`], [`MethodIdx`], ...)
//! into the flat arenas of [`Assembly`], which keeps the graph free of
//! ownership cycles.
//!
//! # Key Components
//!
//! - [`crate::loader::file::PeFile`] - Memory-mapped PE shell
//! - [`crate::loader::streams`] - Metadata root and heap views
//! - [`crate::loader::tables`] - Raw ECMA-335 table decoding
//! - [`crate::loader::signatures`] - Blob signature parsing
//! - [`crate::loader::body`] - IL method body decoding
//! - [`crate::loader::import`] - Object graph assembly
//! - [`Assembly`] - The finished graph handed to the core

pub mod body;
pub mod file;
pub mod import;
pub mod io;
pub mod signatures;
pub mod streams;
pub mod tables;

macro_rules! arena_index {
    ($(#[$doc:meta] $name:ident),+ $(,)?) => {
        $(
            #[$doc]
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                /// Index into the owning arena.
                #[must_use]
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )+
    };
}

arena_index! {
    /// Handle to an assembly reference
    AssemblyRefIdx,
    /// Handle to a type reference
    TypeRefIdx,
    /// Handle to a member (field or method) reference
    MemberRefIdx,
    /// Handle to a type definition
    TypeDefIdx,
    /// Handle to a field definition
    FieldIdx,
    /// Handle to a method definition
    MethodIdx,
    /// Handle to a type specification
    TypeSpecIdx,
    /// Handle to a generic parameter
    GenericParamIdx,
    /// Handle to a generic method instantiation
    MethodSpecIdx,
}

bitflags::bitflags! {
    /// ECMA type attribute bits the pipeline inspects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeAttributes: u32 {
        /// Visibility bits
        const VISIBILITY_MASK = 0x0000_0007;
        /// Top-level public type
        const PUBLIC = 0x0000_0001;
        /// Nested public type
        const NESTED_PUBLIC = 0x0000_0002;
        /// Interface definition
        const INTERFACE = 0x0000_0020;
        /// Abstract type
        const ABSTRACT = 0x0000_0080;
        /// Sealed type
        const SEALED = 0x0000_0100;
    }

    /// ECMA field attribute bits the pipeline inspects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAttributes: u16 {
        /// Static field
        const STATIC = 0x0010;
        /// Compile-time literal constant
        const LITERAL = 0x0040;
        /// Carries a Constant-table default value
        const HAS_DEFAULT = 0x8000;
    }

    /// ECMA method attribute bits the pipeline inspects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// Static method
        const STATIC = 0x0010;
        /// Virtual method
        const VIRTUAL = 0x0040;
        /// Abstract method
        const ABSTRACT = 0x0400;
    }
}

/// Four-part assembly version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    #[allow(missing_docs)]
    pub major: u16,
    #[allow(missing_docs)]
    pub minor: u16,
    #[allow(missing_docs)]
    pub build: u16,
    #[allow(missing_docs)]
    pub revision: u16,
}

/// A reference to an external assembly.
#[derive(Debug, Clone)]
pub struct AssemblyRefEntry {
    /// Simple name, unique within the graph
    pub name: String,
    /// Referenced version
    pub version: Version,
    /// Assembly flags as found in the source
    pub flags: u32,
    /// Original metadata token
    pub token: u32,
}

/// Where a type reference resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRefScope {
    /// Defined in an external assembly
    Assembly(AssemblyRefIdx),
    /// Nested inside another external type
    Nested(TypeRefIdx),
}

/// A reference to a type defined outside this module.
#[derive(Debug, Clone)]
pub struct TypeRefEntry {
    /// Type name
    pub name: String,
    /// Namespace, empty for nested or global types
    pub namespace: String,
    /// Resolution scope
    pub scope: TypeRefScope,
    /// Original metadata token
    pub token: u32,
}

/// Tagged handle to any type shape the graph can name.
///
/// Models the source's runtime type tests as a closed variant: a type is a
/// reference, a definition, a specification, or a generic parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeHandle {
    /// External type reference
    Ref(TypeRefIdx),
    /// Type defined in this module
    Def(TypeDefIdx),
    /// Structural type (generic instantiation, array, by-ref, ...)
    Spec(TypeSpecIdx),
    /// Generic parameter of a type or method
    GenericParam(GenericParamIdx),
}

/// Handle to a callable the graph can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodHandle {
    /// Method defined in this module
    Def(MethodIdx),
    /// External method reference
    Ref(MemberRefIdx),
    /// Generic method instantiation
    Spec(MethodSpecIdx),
}

/// Handle to a field the graph can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldHandle {
    /// Field defined in this module
    Def(FieldIdx),
    /// External field reference
    Ref(MemberRefIdx),
}

/// Parsed type shape from a signature blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.IntPtr`
    IntPtr,
    /// `System.UIntPtr`
    UIntPtr,
    /// Reference type by handle
    Class(TypeHandle),
    /// Value type by handle
    ValueType(TypeHandle),
    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSig>),
    /// Managed reference
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Generic instantiation
    GenericInst {
        /// True when the open type is a value type
        value_type: bool,
        /// The open generic type
        base: TypeHandle,
        /// Type arguments in declaration order
        args: Vec<TypeSig>,
    },
    /// Generic parameter of the enclosing type (`!n`)
    Var(u16),
    /// Generic parameter of the enclosing method (`!!n`)
    MVar(u16),
}

/// Parsed method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method flag
    pub has_this: bool,
    /// Generic parameter count, 0 for non-generic methods
    pub generic_params: u8,
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types in declaration order
    pub params: Vec<TypeSig>,
}

/// Signature carried by a member reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberRefSig {
    /// Field reference
    Field(TypeSig),
    /// Method reference
    Method(MethodSig),
}

/// A reference to a field or method defined outside this module.
#[derive(Debug, Clone)]
pub struct MemberRefEntry {
    /// Member name
    pub name: String,
    /// Declaring type
    pub declaring: TypeHandle,
    /// Parsed member signature
    pub sig: MemberRefSig,
    /// Original metadata token
    pub token: u32,
}

/// A type defined in this module.
#[derive(Debug, Clone)]
pub struct TypeDefEntry {
    /// Type name
    pub name: String,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// ECMA type attributes
    pub flags: u32,
    /// Base type, `None` for interfaces and `<Module>`
    pub extends: Option<TypeHandle>,
    /// Declaring type for nested types
    pub enclosing: Option<TypeDefIdx>,
    /// Implemented interfaces in declaration order
    pub interfaces: Vec<TypeHandle>,
    /// Fields in declaration order
    pub fields: Vec<FieldIdx>,
    /// Methods in declaration order
    pub methods: Vec<MethodIdx>,
    /// Generic parameters in ordinal order
    pub generic_params: Vec<GenericParamIdx>,
    /// Original metadata token
    pub token: u32,
}

/// A field defined in this module.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    /// Field name
    pub name: String,
    /// ECMA field attributes
    pub flags: u16,
    /// Field type
    pub sig: TypeSig,
    /// Default value bytes from the Constant table, when present
    pub default_value: Option<Vec<u8>>,
    /// Declaring type
    pub declaring: TypeDefIdx,
    /// Original metadata token
    pub token: u32,
}

/// A method defined in this module.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// Method name
    pub name: String,
    /// ECMA method attributes
    pub flags: u16,
    /// ECMA implementation flags
    pub impl_flags: u16,
    /// Parsed signature
    pub sig: MethodSig,
    /// Local variable types, empty when the body has none
    pub locals: Vec<TypeSig>,
    /// Decoded body, `None` for abstract/native methods
    pub body: Option<body::MethodBody>,
    /// Declaring type
    pub declaring: TypeDefIdx,
    /// Generic parameters in ordinal order
    pub generic_params: Vec<GenericParamIdx>,
    /// Original metadata token
    pub token: u32,
}

/// A structural type stored in the TypeSpec table.
#[derive(Debug, Clone)]
pub struct TypeSpecEntry {
    /// Parsed shape
    pub sig: TypeSig,
    /// Original metadata token
    pub token: u32,
}

/// Owner of a generic parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericParamOwner {
    /// Declared on a type
    Type(TypeDefIdx),
    /// Declared on a method
    Method(MethodIdx),
}

/// A generic parameter declaration.
#[derive(Debug, Clone)]
pub struct GenericParamEntry {
    /// Ordinal within the owner
    pub number: u16,
    /// Variance and constraint flags
    pub flags: u16,
    /// Declaring type or method
    pub owner: GenericParamOwner,
    /// Parameter name
    pub name: String,
    /// Original metadata token
    pub token: u32,
}

/// A generic method instantiation.
#[derive(Debug, Clone)]
pub struct MethodSpecEntry {
    /// The open generic method
    pub method: MethodHandle,
    /// Type arguments
    pub args: Vec<TypeSig>,
    /// Original metadata token
    pub token: u32,
}

/// Owner of a custom attribute the pipeline keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeOwner {
    /// Assembly-level attribute (dropped by the filter)
    Assembly,
    /// Attribute on a type
    Type(TypeDefIdx),
    /// Attribute on a field
    Field(FieldIdx),
    /// Attribute on a method
    Method(MethodIdx),
}

/// A decoded custom-attribute argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    #[allow(missing_docs)]
    Boolean(bool),
    /// UTF-16 code unit
    Char(u16),
    #[allow(missing_docs)]
    I1(i8),
    #[allow(missing_docs)]
    U1(u8),
    #[allow(missing_docs)]
    I2(i16),
    #[allow(missing_docs)]
    U2(u16),
    #[allow(missing_docs)]
    I4(i32),
    #[allow(missing_docs)]
    U4(u32),
    #[allow(missing_docs)]
    I8(i64),
    #[allow(missing_docs)]
    U8(u64),
    #[allow(missing_docs)]
    R4(f32),
    #[allow(missing_docs)]
    R8(f64),
    #[allow(missing_docs)]
    String(String),
    /// `System.Type` argument carried as the type's full name
    Type(String),
    /// Array argument, element by element
    Array(Vec<AttrValue>),
}

/// A named (field or property) custom-attribute argument.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArg {
    /// True for a field argument, false for a property argument
    pub is_field: bool,
    /// Target member name
    pub name: String,
    /// Argument value
    pub value: AttrValue,
}

/// A custom attribute attached to a surviving entity.
#[derive(Debug, Clone)]
pub struct CustomAttribute {
    /// What the attribute decorates
    pub owner: AttributeOwner,
    /// Attribute constructor
    pub ctor: MethodHandle,
    /// Fixed constructor arguments in ctor order
    pub fixed_args: Vec<AttrValue>,
    /// Named arguments as found in the blob
    pub named_args: Vec<NamedArg>,
    /// Original metadata token
    pub token: u32,
}

/// An embedded managed resource.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Resource name
    pub name: String,
    /// Raw bytes
    pub data: Vec<u8>,
    /// Visibility flag from the manifest
    pub public: bool,
}

/// The finished, read-only object graph of one source assembly.
///
/// All cross-entity links are arena indices; the lowering core never owns
/// any part of this graph and stores only the indices in its own maps.
#[derive(Debug, Default)]
pub struct Assembly {
    /// Assembly simple name
    pub name: String,
    /// Assembly version
    pub version: Version,
    /// Assembly flags
    pub flags: u32,
    /// Entry point, when the assembly is executable
    pub entry_point: Option<MethodIdx>,
    #[allow(missing_docs)]
    pub assembly_refs: Vec<AssemblyRefEntry>,
    #[allow(missing_docs)]
    pub type_refs: Vec<TypeRefEntry>,
    #[allow(missing_docs)]
    pub member_refs: Vec<MemberRefEntry>,
    #[allow(missing_docs)]
    pub type_defs: Vec<TypeDefEntry>,
    #[allow(missing_docs)]
    pub fields: Vec<FieldEntry>,
    #[allow(missing_docs)]
    pub methods: Vec<MethodEntry>,
    #[allow(missing_docs)]
    pub type_specs: Vec<TypeSpecEntry>,
    #[allow(missing_docs)]
    pub generic_params: Vec<GenericParamEntry>,
    #[allow(missing_docs)]
    pub method_specs: Vec<MethodSpecEntry>,
    #[allow(missing_docs)]
    pub attributes: Vec<CustomAttribute>,
    #[allow(missing_docs)]
    pub resources: Vec<Resource>,
    /// User strings referenced by byte-code, with their original `#US` tokens
    pub user_strings: Vec<(u32, String)>,
}

impl Assembly {
    #[allow(missing_docs)]
    #[must_use]
    pub fn type_def(&self, idx: TypeDefIdx) -> &TypeDefEntry {
        &self.type_defs[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn type_ref(&self, idx: TypeRefIdx) -> &TypeRefEntry {
        &self.type_refs[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn member_ref(&self, idx: MemberRefIdx) -> &MemberRefEntry {
        &self.member_refs[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn field(&self, idx: FieldIdx) -> &FieldEntry {
        &self.fields[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn method(&self, idx: MethodIdx) -> &MethodEntry {
        &self.methods[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn type_spec(&self, idx: TypeSpecIdx) -> &TypeSpecEntry {
        &self.type_specs[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn generic_param(&self, idx: GenericParamIdx) -> &GenericParamEntry {
        &self.generic_params[idx.index()]
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn method_spec(&self, idx: MethodSpecIdx) -> &MethodSpecEntry {
        &self.method_specs[idx.index()]
    }

    /// Fully-qualified name of a type definition.
    ///
    /// Nested types join their declaring chain with `+`, top-level types join
    /// namespace and name with `.`.
    #[must_use]
    pub fn type_def_full_name(&self, idx: TypeDefIdx) -> String {
        let entry = self.type_def(idx);
        match entry.enclosing {
            Some(outer) => format!("{}+{}", self.type_def_full_name(outer), entry.name),
            None if entry.namespace.is_empty() => entry.name.clone(),
            None => format!("{}.{}", entry.namespace, entry.name),
        }
    }

    /// Fully-qualified name of a type reference.
    #[must_use]
    pub fn type_ref_full_name(&self, idx: TypeRefIdx) -> String {
        let entry = self.type_ref(idx);
        match entry.scope {
            TypeRefScope::Nested(outer) => {
                format!("{}+{}", self.type_ref_full_name(outer), entry.name)
            }
            TypeRefScope::Assembly(_) if entry.namespace.is_empty() => entry.name.clone(),
            TypeRefScope::Assembly(_) => format!("{}.{}", entry.namespace, entry.name),
        }
    }

    /// Display name for any type handle, used in diagnostics and the dump.
    #[must_use]
    pub fn type_handle_name(&self, handle: TypeHandle) -> String {
        match handle {
            TypeHandle::Ref(idx) => self.type_ref_full_name(idx),
            TypeHandle::Def(idx) => self.type_def_full_name(idx),
            TypeHandle::Spec(idx) => format!("typespec {:#010x}", self.type_spec(idx).token),
            TypeHandle::GenericParam(idx) => self.generic_param(idx).name.clone(),
        }
    }

    /// Name of the method a handle designates.
    #[must_use]
    pub fn method_name(&self, handle: MethodHandle) -> &str {
        match handle {
            MethodHandle::Def(idx) => &self.method(idx).name,
            MethodHandle::Ref(idx) => &self.member_ref(idx).name,
            MethodHandle::Spec(idx) => self.method_name(self.method_spec(idx).method),
        }
    }
}
