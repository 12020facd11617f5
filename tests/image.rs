//! Image-level tests: exception handlers, attributes, dump, and stubs.

use nanopack::{
    dump::write_dump,
    emit::emit_image,
    filter::Filter,
    loader::{
        body::{EhClause, EhKind, Instruction, MethodBody, Operand},
        Assembly, AssemblyRefEntry, AssemblyRefIdx, AttrValue, AttributeOwner, CustomAttribute,
        MemberRefEntry, MemberRefIdx, MemberRefSig, MethodEntry, MethodHandle, MethodIdx,
        MethodSig, TypeDefEntry, TypeDefIdx, TypeHandle, TypeRefEntry, TypeRefIdx, TypeRefScope,
        TypeSig, Version,
    },
    minimize::compute_live_set,
    options::Options,
    ordering::order_types,
    stubs::generate_stubs,
    tables::{token::TableKind, TablesContext},
};

fn corlib_assembly() -> Assembly {
    let mut assembly = Assembly {
        name: "app".to_string(),
        version: Version::default(),
        ..Assembly::default()
    };
    assembly.assembly_refs.push(AssemblyRefEntry {
        name: "mscorlib".to_string(),
        version: Version::default(),
        flags: 0,
        token: 0x2300_0001,
    });
    assembly.type_refs.push(TypeRefEntry {
        name: "Object".to_string(),
        namespace: "System".to_string(),
        scope: TypeRefScope::Assembly(AssemblyRefIdx(0)),
        token: 0x0100_0001,
    });
    assembly
}

fn object_handle() -> TypeHandle {
    TypeHandle::Ref(TypeRefIdx(0))
}

fn add_type(assembly: &mut Assembly, name: &str, methods: Vec<MethodIdx>) -> TypeDefIdx {
    let idx = TypeDefIdx(assembly.type_defs.len() as u32);
    assembly.type_defs.push(TypeDefEntry {
        name: name.to_string(),
        namespace: "App".to_string(),
        flags: 0x0000_0001,
        extends: Some(object_handle()),
        enclosing: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
        generic_params: Vec::new(),
        token: 0x0200_0001 + idx.0,
    });
    idx
}

fn void_method(name: &str, declaring: TypeDefIdx, body: Option<MethodBody>) -> MethodEntry {
    MethodEntry {
        name: name.to_string(),
        flags: 0x0016,
        impl_flags: 0,
        sig: MethodSig {
            has_this: false,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: Vec::new(),
        },
        locals: Vec::new(),
        body,
        declaring,
        generic_params: Vec::new(),
        token: 0x0600_0001,
    }
}

fn finish<'a>(assembly: &'a Assembly, options: &'a Options) -> TablesContext<'a> {
    let filter = Filter::new();
    let live = compute_live_set(assembly, &filter);
    let order = order_types(assembly, &live, None);
    let mut ctx = TablesContext::build(assembly, &live, &order, &filter, options).unwrap();
    ctx.complete_minimization();
    ctx
}

#[test]
fn exception_handlers_follow_the_body() {
    let mut assembly = corlib_assembly();
    add_type(&mut assembly, "Guarded", vec![MethodIdx(0)]);

    let body = MethodBody {
        max_stack: 2,
        init_locals: false,
        local_sig_token: 0,
        instructions: vec![
            Instruction {
                offset: 0,
                opcode: 0x00,
                operand: Operand::None,
            },
            Instruction {
                offset: 1,
                opcode: 0x00,
                operand: Operand::None,
            },
            Instruction {
                offset: 2,
                opcode: 0x2A,
                operand: Operand::None,
            },
        ],
        exception_handlers: vec![EhClause {
            kind: EhKind::Finally,
            try_start: 0,
            try_end: 1,
            handler_start: 1,
            handler_end: 2,
            catch_type: None,
            filter_offset: 0,
        }],
    };
    assembly.methods.push(void_method("Run", TypeDefIdx(0), Some(body)));

    let options = Options::new("in.dll", "out.pe");
    let ctx = finish(&assembly, &options);

    let image = emit_image(&ctx).unwrap();
    let section = image
        .sections
        .iter()
        .find(|section| section.kind == TableKind::ByteCode)
        .unwrap();
    let stream =
        &image.bytes[section.offset as usize..(section.offset + section.length) as usize];

    // 3 code bytes, one 12-byte finally record, one count byte.
    assert_eq!(stream.len(), 3 + 12 + 1);
    assert_eq!(&stream[..3], &[0x00, 0x00, 0x2A]);
    // kind = finally
    assert_eq!(&stream[3..5], &[0x02, 0x00]);
    // try 0..1, handler 1..2
    assert_eq!(&stream[5..13], &[0, 0, 1, 0, 1, 0, 2, 0]);
    assert_eq!(stream[15], 1);
}

#[test]
fn ignored_attributes_are_skipped_and_compression_sorts() {
    let mut assembly = corlib_assembly();

    // Two attribute types plus one from the built-in ignore list.
    for (i, (namespace, name)) in [
        ("Some", "AlphaAttribute"),
        ("Some", "ZetaAttribute"),
        ("System.Diagnostics", "DebuggableAttribute"),
    ]
    .iter()
    .enumerate()
    {
        assembly.type_refs.push(TypeRefEntry {
            name: (*name).to_string(),
            namespace: (*namespace).to_string(),
            scope: TypeRefScope::Assembly(AssemblyRefIdx(0)),
            token: 0x0100_0002 + i as u32,
        });
        assembly.member_refs.push(MemberRefEntry {
            name: ".ctor".to_string(),
            declaring: TypeHandle::Ref(TypeRefIdx(1 + i as u32)),
            sig: MemberRefSig::Method(MethodSig {
                has_this: true,
                generic_params: 0,
                return_type: TypeSig::Void,
                params: Vec::new(),
            }),
            token: 0x0A00_0001 + i as u32,
        });
    }

    add_type(&mut assembly, "Annotated", Vec::new());
    for ctor in 0..3u32 {
        assembly.attributes.push(CustomAttribute {
            owner: AttributeOwner::Type(TypeDefIdx(0)),
            ctor: MethodHandle::Ref(MemberRefIdx(ctor)),
            fixed_args: vec![],
            named_args: vec![],
            token: 0x0C00_0001 + ctor,
        });
    }

    let mut options = Options::new("in.dll", "out.pe");
    options.compress_attributes = true;
    let ctx = finish(&assembly, &options);

    // The debugger attribute is gone; the two kept ones are sorted by full
    // name descending (Zeta before Alpha).
    let records = ctx.attributes.records();
    assert_eq!(records.len(), 2);
    let zeta = ctx.method_refs.try_get_id(MemberRefIdx(1)).unwrap();
    let alpha = ctx.method_refs.try_get_id(MemberRefIdx(0)).unwrap();
    assert_eq!(records[0].ctor, zeta | 0x8000);
    assert_eq!(records[1].ctor, alpha | 0x8000);
}

#[test]
fn attribute_values_reach_the_blob() {
    let mut assembly = corlib_assembly();
    assembly.type_refs.push(TypeRefEntry {
        name: "VersionAttribute".to_string(),
        namespace: "Some".to_string(),
        scope: TypeRefScope::Assembly(AssemblyRefIdx(0)),
        token: 0x0100_0002,
    });
    assembly.member_refs.push(MemberRefEntry {
        name: ".ctor".to_string(),
        declaring: TypeHandle::Ref(TypeRefIdx(1)),
        sig: MemberRefSig::Method(MethodSig {
            has_this: true,
            generic_params: 0,
            return_type: TypeSig::Void,
            params: vec![TypeSig::I4],
        }),
        token: 0x0A00_0001,
    });
    add_type(&mut assembly, "Annotated", Vec::new());
    assembly.attributes.push(CustomAttribute {
        owner: AttributeOwner::Type(TypeDefIdx(0)),
        ctor: MethodHandle::Ref(MemberRefIdx(0)),
        fixed_args: vec![AttrValue::I4(0x11223344)],
        named_args: vec![],
        token: 0x0C00_0001,
    });

    let options = Options::new("in.dll", "out.pe");
    let ctx = finish(&assembly, &options);

    let records = ctx.attributes.records();
    assert_eq!(records.len(), 1);

    // Tagged i4 value, then a zero named-argument count, little-endian.
    let expected = [0x07, 0x44, 0x33, 0x22, 0x11, 0x00, 0x00];
    assert_eq!(
        ctx.signatures.try_get_id(&expected),
        Some(records[0].signature)
    );
}

#[test]
fn dump_renders_tokens_and_sections() {
    let mut assembly = corlib_assembly();
    add_type(&mut assembly, "Foo", vec![MethodIdx(0)]);
    assembly.methods.push(void_method(
        "Run",
        TypeDefIdx(0),
        Some(MethodBody {
            max_stack: 1,
            init_locals: false,
            local_sig_token: 0,
            instructions: vec![Instruction {
                offset: 0,
                opcode: 0x2A,
                operand: Operand::None,
            }],
            exception_handlers: Vec::new(),
        }),
    ));

    let options = Options::new("in.dll", "out.pe");
    let ctx = finish(&assembly, &options);

    let mut rendered = Vec::new();
    write_dump(&ctx, &mut rendered).unwrap();
    let text = String::from_utf8(rendered).unwrap();

    assert!(text.contains("AssemblyRefProps:"));
    assert!(text.contains("TypeDefProps:"));
    assert!(text.contains("App.Foo"));
    assert!(text.contains("[0000] /*02000001*/"));
    assert!(text.contains("IL_0000: ret"));
    assert!(text.contains("Strings:"));
}

#[test]
fn native_methods_get_stub_skeletons() {
    let mut assembly = corlib_assembly();
    add_type(&mut assembly, "Native", vec![MethodIdx(0)]);
    let mut method = void_method("Ping", TypeDefIdx(0), None);
    method.impl_flags = 0x1000; // internal call
    assembly.methods.push(method);

    let options = Options::new("in.dll", "out.pe");
    let ctx = finish(&assembly, &options);

    let dir = tempfile::tempdir().unwrap();
    let count = generate_stubs(&ctx, dir.path()).unwrap();
    assert_eq!(count, 1);

    let header = std::fs::read_to_string(dir.path().join("app.h")).unwrap();
    assert!(header.contains("HRESULT app_App_Native_Ping(CLR_RT_StackFrame &stack);"));
    assert!(header.contains("method_lookup_app"));

    let lookup = std::fs::read_to_string(dir.path().join("app_lookup.cpp")).unwrap();
    assert!(lookup.contains("app_App_Native_Ping,"));
}
