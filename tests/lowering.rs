//! End-to-end lowering tests over crafted object graphs.
//!
//! These build the loader's object model directly, run the full lowering
//! pipeline (minimize, order, context, emit), and check the wire-level
//! guarantees: record widths, token tagging, heap contents, and the
//! minimization gate.

use nanopack::{
    emit::{emit_image, SECTION_ORDER},
    filter::Filter,
    loader::{
        body::{Instruction, MethodBody, Operand},
        Assembly, AssemblyRefEntry, AssemblyRefIdx, FieldEntry, MemberRefEntry, MemberRefIdx,
        MemberRefSig, MethodEntry, MethodHandle, MethodSig, TypeDefEntry, TypeDefIdx,
        TypeHandle, TypeRefEntry, TypeRefIdx, TypeRefScope, TypeSig, Version,
    },
    minimize::compute_live_set,
    options::Options,
    ordering::order_types,
    tables::{
        token::{TableKind, EMPTY_INDEX},
        TablesContext,
    },
};

fn options() -> Options {
    Options::new("in.dll", "out.pe")
}

fn base_assembly(name: &str) -> Assembly {
    Assembly {
        name: name.to_string(),
        version: Version {
            major: 1,
            minor: 0,
            build: 0,
            revision: 0,
        },
        ..Assembly::default()
    }
}

fn module_type() -> TypeDefEntry {
    TypeDefEntry {
        name: "<Module>".to_string(),
        namespace: String::new(),
        flags: 0,
        extends: None,
        enclosing: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        generic_params: Vec::new(),
        token: 0x0200_0001,
    }
}

/// Adds mscorlib plus a `System.Object` reference, returning the ref handle.
fn with_corlib(assembly: &mut Assembly) -> TypeHandle {
    assembly.assembly_refs.push(AssemblyRefEntry {
        name: "mscorlib".to_string(),
        version: Version {
            major: 4,
            minor: 0,
            build: 0,
            revision: 0,
        },
        flags: 0,
        token: 0x2300_0001,
    });
    assembly.type_refs.push(TypeRefEntry {
        name: "Object".to_string(),
        namespace: "System".to_string(),
        scope: TypeRefScope::Assembly(AssemblyRefIdx(0)),
        token: 0x0100_0001,
    });
    TypeHandle::Ref(TypeRefIdx(0))
}

fn build_context<'a>(
    assembly: &'a Assembly,
    filter: &Filter,
    options: &'a Options,
) -> TablesContext<'a> {
    let live = compute_live_set(assembly, filter);
    let order = order_types(assembly, &live, None);
    TablesContext::build(assembly, &live, &order, filter, options).unwrap()
}

fn section_length(ctx: &TablesContext<'_>, kind: TableKind) -> u32 {
    let image = emit_image(ctx).unwrap();
    image
        .sections
        .iter()
        .find(|section| section.kind == kind)
        .unwrap()
        .length
}

#[test]
fn empty_module_produces_empty_tables() {
    // "System" sits in the constants table, so even the assembly name stays
    // off the heap.
    let mut assembly = base_assembly("System");
    assembly.type_defs.push(module_type());

    let options = options();
    let mut ctx = build_context(&assembly, &Filter::new(), &options);
    ctx.complete_minimization();

    assert_eq!(ctx.type_defs.len(), 0);
    assert_eq!(ctx.method_defs.len(), 0);
    assert_eq!(ctx.signatures.blob_len(), 0);

    let mut heap = Vec::new();
    ctx.strings.write(&mut heap);
    assert_eq!(heap, [0x00]);

    assert_eq!(section_length(&ctx, TableKind::TypeDef), 0);
    assert_eq!(section_length(&ctx, TableKind::MethodDef), 0);
}

#[test]
fn class_with_method_hits_the_documented_bytes() {
    let mut assembly = base_assembly("app");
    let object = with_corlib(&mut assembly);

    assembly.type_defs.push(TypeDefEntry {
        name: "Foo".to_string(),
        namespace: "App".to_string(),
        flags: 0x0000_0001, // public
        extends: Some(object),
        enclosing: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![nanopack::loader::MethodIdx(0), nanopack::loader::MethodIdx(1)],
        generic_params: Vec::new(),
        token: 0x0200_0001,
    });
    // One instance method and one static method, both `void (...)`.
    assembly.methods.push(MethodEntry {
        name: "Bar".to_string(),
        flags: 0x0006, // public
        impl_flags: 0,
        sig: MethodSig {
            has_this: true,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: Vec::new(),
        },
        locals: Vec::new(),
        body: None,
        declaring: TypeDefIdx(0),
        generic_params: Vec::new(),
        token: 0x0600_0001,
    });
    assembly.methods.push(MethodEntry {
        name: "Startup".to_string(),
        flags: 0x0016, // public static
        impl_flags: 0,
        sig: MethodSig {
            has_this: false,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: Vec::new(),
        },
        locals: Vec::new(),
        body: None,
        declaring: TypeDefIdx(0),
        generic_params: Vec::new(),
        token: 0x0600_0002,
    });

    let options = options();
    let mut ctx = build_context(&assembly, &Filter::new(), &options);
    ctx.complete_minimization();

    // extends = (typeref id of System.Object << 2) | ref tag
    let object_id = ctx.type_refs.try_get_id(TypeRefIdx(0)).unwrap();
    let record = &ctx.type_defs.records()[0];
    assert_eq!(record.extends, (object_id << 2) | 0b01);
    assert_eq!(record.enclosing, EMPTY_INDEX);
    assert_eq!(record.instance_count, 1);
    assert_eq!(record.static_count, 1);

    // Static method signature: flags 0x00, zero params, void.
    let static_sig = ctx.signatures.try_get_id(&[0x00, 0x00, 0x00]).unwrap();
    // Instance method signature: has-this flag set.
    let instance_sig = ctx.signatures.try_get_id(&[0x20, 0x00, 0x00]).unwrap();
    assert_ne!(static_sig, instance_sig);

    // Method-def records occupy exactly 16 bytes each.
    assert_eq!(section_length(&ctx, TableKind::MethodDef), 2 * 16);
    assert_eq!(section_length(&ctx, TableKind::TypeDef), 22);
    // Section lengths record the unpadded record bytes.
    assert_eq!(section_length(&ctx, TableKind::TypeRef), 6);
    assert_eq!(section_length(&ctx, TableKind::AssemblyRef), 12);
}

#[test]
fn literal_constant_fields_vanish() {
    let mut assembly = base_assembly("app");
    let object = with_corlib(&mut assembly);

    assembly.type_defs.push(TypeDefEntry {
        name: "Config".to_string(),
        namespace: "App".to_string(),
        flags: 0x0000_0001,
        extends: Some(object),
        enclosing: None,
        interfaces: Vec::new(),
        fields: vec![nanopack::loader::FieldIdx(0)],
        methods: Vec::new(),
        generic_params: Vec::new(),
        token: 0x0200_0001,
    });
    // static literal int x = 5
    assembly.fields.push(FieldEntry {
        name: "x".to_string(),
        flags: 0x0010 | 0x0040 | 0x8000,
        sig: TypeSig::I4,
        default_value: Some(vec![0x05, 0x00, 0x00, 0x00]),
        declaring: TypeDefIdx(0),
        token: 0x0400_0001,
    });

    let options = options();
    let mut ctx = build_context(&assembly, &Filter::new(), &options);
    ctx.complete_minimization();

    assert_eq!(ctx.field_defs.len(), 0);
    assert_eq!(section_length(&ctx, TableKind::FieldDef), 0);

    // No default-value signature reached the blob for the dropped field.
    assert_eq!(
        ctx.signatures.try_get_id(&[0x04, 0x00, 0x05, 0x00, 0x00, 0x00]),
        None
    );
    assert_eq!(ctx.type_defs.records()[0].first_field, EMPTY_INDEX);
}

#[test]
fn external_call_operand_carries_the_external_bit() {
    let mut assembly = base_assembly("app");
    let object = with_corlib(&mut assembly);

    assembly.member_refs.push(MemberRefEntry {
        name: "WriteLine".to_string(),
        declaring: object,
        sig: MemberRefSig::Method(MethodSig {
            has_this: false,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: Vec::new(),
        }),
        token: 0x0A00_0001,
    });

    assembly.type_defs.push(TypeDefEntry {
        name: "Program".to_string(),
        namespace: "App".to_string(),
        flags: 0x0000_0001,
        extends: Some(object),
        enclosing: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![nanopack::loader::MethodIdx(0)],
        generic_params: Vec::new(),
        token: 0x0200_0001,
    });
    assembly.methods.push(MethodEntry {
        name: "Main".to_string(),
        flags: 0x0016,
        impl_flags: 0,
        sig: MethodSig {
            has_this: false,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: Vec::new(),
        },
        locals: Vec::new(),
        body: Some(MethodBody {
            max_stack: 8,
            init_locals: false,
            local_sig_token: 0,
            instructions: vec![
                Instruction {
                    offset: 0,
                    opcode: 0x28, // call
                    operand: Operand::Method(MethodHandle::Ref(MemberRefIdx(0))),
                },
                Instruction {
                    offset: 5,
                    opcode: 0x2A, // ret
                    operand: Operand::None,
                },
            ],
            exception_handlers: Vec::new(),
        }),
        declaring: TypeDefIdx(0),
        generic_params: Vec::new(),
        token: 0x0600_0001,
    });

    let options = options();
    let mut ctx = build_context(&assembly, &Filter::new(), &options);
    ctx.complete_minimization();

    let ref_id = ctx.method_refs.try_get_id(MemberRefIdx(0)).unwrap();
    let expected = (ref_id | 0x8000).to_le_bytes();

    let image = emit_image(&ctx).unwrap();
    let section = image
        .sections
        .iter()
        .find(|section| section.kind == TableKind::ByteCode)
        .unwrap();
    let stream =
        &image.bytes[section.offset as usize..(section.offset + section.length) as usize];

    // call <u16 operand>, ret
    assert_eq!(stream.len(), 4);
    assert_eq!(stream[0], 0x28);
    assert_eq!(&stream[1..3], &expected);
    assert_eq!(stream[3], 0x2A);
}

#[test]
fn writing_before_the_latch_produces_empty_sections() {
    let mut assembly = base_assembly("app");
    let object = with_corlib(&mut assembly);
    assembly.type_defs.push(TypeDefEntry {
        name: "Foo".to_string(),
        namespace: "App".to_string(),
        flags: 0x0000_0001,
        extends: Some(object),
        enclosing: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        generic_params: Vec::new(),
        token: 0x0200_0001,
    });

    let options = options();
    let ctx = build_context(&assembly, &Filter::new(), &options);
    assert!(!ctx.is_minimize_complete());

    let image = emit_image(&ctx).unwrap();
    for section in &image.sections {
        assert_eq!(section.length, 0, "section {:?} not gated", section.kind);
    }
}

#[test]
fn identical_runs_are_byte_identical() {
    let mut assembly = base_assembly("app");
    let object = with_corlib(&mut assembly);
    for (i, name) in ["Gamma", "Alpha", "Beta"].iter().enumerate() {
        assembly.type_defs.push(TypeDefEntry {
            name: (*name).to_string(),
            namespace: "App".to_string(),
            flags: 0x0000_0001,
            extends: Some(object),
            enclosing: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            generic_params: Vec::new(),
            token: 0x0200_0001 + i as u32,
        });
    }

    let options = options();
    let build = || {
        let mut ctx = build_context(&assembly, &Filter::new(), &options);
        ctx.complete_minimization();
        emit_image(&ctx).unwrap().bytes
    };

    assert_eq!(build(), build());
}

#[test]
fn sections_are_aligned_and_ordered() {
    let mut assembly = base_assembly("app");
    let object = with_corlib(&mut assembly);
    assembly.type_defs.push(TypeDefEntry {
        name: "Foo".to_string(),
        namespace: "App".to_string(),
        flags: 0x0000_0001,
        extends: Some(object),
        enclosing: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        generic_params: Vec::new(),
        token: 0x0200_0001,
    });

    let options = options();
    let mut ctx = build_context(&assembly, &Filter::new(), &options);
    ctx.complete_minimization();

    let image = emit_image(&ctx).unwrap();
    assert_eq!(image.sections.len(), SECTION_ORDER.len());
    for (section, kind) in image.sections.iter().zip(SECTION_ORDER) {
        assert_eq!(section.kind, kind);
        assert_eq!(section.offset % 4, 0);
    }
    assert_eq!(image.bytes.len() % 4, 0);
    assert!(image.bytes.starts_with(b"NANOPK1\0"));
}
