//! Textual dump of a finished tables context.
//!
//! Renders the flat layout consumed by humans comparing builds: assembly
//! references, type references with their member references, type
//! definitions with generic parameters, fields, methods (locals, exception
//! handlers, IL listing) and interface implementations, type specifications,
//! attributes, the string heap, and the user-string listing. Every token
//! renders as `[<new id>] /*<original token>*/`.

use std::io::Write;

use crate::{
    loader::{
        body::{EhKind, Operand, TokenTarget},
        FieldHandle, MemberRefSig, MethodHandle, TypeHandle, TypeSig,
    },
    tables::{token::EXTERNAL_BIT, TablesContext},
    Result,
};

fn token(new_id: u16, original: u32) -> String {
    format!("[{new_id:04x}] /*{original:08x}*/")
}

fn type_sig_name(ctx: &TablesContext<'_>, sig: &TypeSig) -> String {
    match sig {
        TypeSig::Void => "void".to_string(),
        TypeSig::Boolean => "bool".to_string(),
        TypeSig::Char => "char".to_string(),
        TypeSig::I1 => "int8".to_string(),
        TypeSig::U1 => "uint8".to_string(),
        TypeSig::I2 => "int16".to_string(),
        TypeSig::U2 => "uint16".to_string(),
        TypeSig::I4 => "int32".to_string(),
        TypeSig::U4 => "uint32".to_string(),
        TypeSig::I8 => "int64".to_string(),
        TypeSig::U8 => "uint64".to_string(),
        TypeSig::R4 => "float32".to_string(),
        TypeSig::R8 => "float64".to_string(),
        TypeSig::String => "string".to_string(),
        TypeSig::Object => "object".to_string(),
        TypeSig::IntPtr => "native int".to_string(),
        TypeSig::UIntPtr => "native uint".to_string(),
        TypeSig::Class(handle) | TypeSig::ValueType(handle) => {
            ctx.assembly.type_handle_name(*handle)
        }
        TypeSig::SzArray(element) => format!("{}[]", type_sig_name(ctx, element)),
        TypeSig::ByRef(element) => format!("{}&", type_sig_name(ctx, element)),
        TypeSig::Ptr(element) => format!("{}*", type_sig_name(ctx, element)),
        TypeSig::GenericInst { base, args, .. } => {
            let args: Vec<String> = args.iter().map(|arg| type_sig_name(ctx, arg)).collect();
            format!(
                "{}<{}>",
                ctx.assembly.type_handle_name(*base),
                args.join(", ")
            )
        }
        TypeSig::Var(number) => format!("!{number}"),
        TypeSig::MVar(number) => format!("!!{number}"),
    }
}

fn method_handle_name(ctx: &TablesContext<'_>, handle: MethodHandle) -> String {
    match handle {
        MethodHandle::Def(idx) => {
            let method = ctx.assembly.method(idx);
            format!(
                "{}::{}",
                ctx.assembly.type_def_full_name(method.declaring),
                method.name
            )
        }
        MethodHandle::Ref(idx) => {
            let member = ctx.assembly.member_ref(idx);
            format!(
                "{}::{}",
                ctx.assembly.type_handle_name(member.declaring),
                member.name
            )
        }
        MethodHandle::Spec(idx) => method_handle_name(ctx, ctx.assembly.method_spec(idx).method),
    }
}

fn field_handle_name(ctx: &TablesContext<'_>, handle: FieldHandle) -> String {
    match handle {
        FieldHandle::Def(idx) => {
            let field = ctx.assembly.field(idx);
            format!(
                "{}::{}",
                ctx.assembly.type_def_full_name(field.declaring),
                field.name
            )
        }
        FieldHandle::Ref(idx) => {
            let member = ctx.assembly.member_ref(idx);
            format!(
                "{}::{}",
                ctx.assembly.type_handle_name(member.declaring),
                member.name
            )
        }
    }
}

fn operand_text(ctx: &TablesContext<'_>, operand: &Operand) -> String {
    match operand {
        Operand::None => String::new(),
        Operand::I8(value) => format!(" {value}"),
        Operand::I32(value) => format!(" {value}"),
        Operand::I64(value) => format!(" {value}"),
        Operand::R4(value) => format!(" {value}"),
        Operand::R8(value) => format!(" {value}"),
        Operand::Var(value) => format!(" {value}"),
        Operand::Branch(target) => format!(" IL_{target:04x}"),
        Operand::Switch(targets) => {
            let targets: Vec<String> = targets
                .iter()
                .map(|target| format!("IL_{target:04x}"))
                .collect();
            format!(" ({})", targets.join(", "))
        }
        Operand::Method(handle) => format!(" {}", method_handle_name(ctx, *handle)),
        Operand::Field(handle) => format!(" {}", field_handle_name(ctx, *handle)),
        Operand::Type(handle) => format!(" {}", ctx.assembly.type_handle_name(*handle)),
        Operand::String(value) => format!(" \"{value}\""),
        Operand::Signature(_) => " <call-site>".to_string(),
        Operand::Token(TokenTarget::Type(handle)) => {
            format!(" {}", ctx.assembly.type_handle_name(*handle))
        }
        Operand::Token(TokenTarget::Method(handle)) => {
            format!(" {}", method_handle_name(ctx, *handle))
        }
        Operand::Token(TokenTarget::Field(handle)) => {
            format!(" {}", field_handle_name(ctx, *handle))
        }
    }
}

/// Render the full textual dump of a finished context.
///
/// # Errors
/// Returns I/O errors from the destination writer.
pub fn write_dump<W: Write>(ctx: &TablesContext<'_>, out: &mut W) -> Result<()> {
    let assembly = ctx.assembly;

    writeln!(out, "Assembly: {}", assembly.name)?;
    writeln!(
        out,
        "Version: {}.{}.{}.{}",
        assembly.version.major,
        assembly.version.minor,
        assembly.version.build,
        assembly.version.revision
    )?;
    writeln!(out)?;

    writeln!(out, "AssemblyRefProps:")?;
    for &idx in ctx.assembly_refs.items() {
        let entry = &assembly.assembly_refs[idx.index()];
        let id = ctx.assembly_refs.try_get_id(idx).unwrap_or(0xFFFF);
        writeln!(
            out,
            "    {}: {} ({}.{}.{}.{})",
            token(id, entry.token),
            entry.name,
            entry.version.major,
            entry.version.minor,
            entry.version.build,
            entry.version.revision
        )?;
    }
    writeln!(out)?;

    writeln!(out, "TypeRefProps:")?;
    for &idx in ctx.type_refs.items() {
        let entry = assembly.type_ref(idx);
        let id = ctx.type_refs.try_get_id(idx).unwrap_or(0xFFFF);
        writeln!(
            out,
            "    {}: {}",
            token(id, entry.token),
            assembly.type_ref_full_name(idx)
        )?;

        for &member_idx in ctx.field_refs.items() {
            let member = assembly.member_ref(member_idx);
            if member.declaring == TypeHandle::Ref(idx) {
                let member_id = ctx.field_refs.try_get_id(member_idx).unwrap_or(0xFFFF);
                let MemberRefSig::Field(ty) = &member.sig else {
                    continue;
                };
                writeln!(
                    out,
                    "        FieldRef {}: {} {}",
                    token(member_id | EXTERNAL_BIT, member.token),
                    type_sig_name(ctx, ty),
                    member.name
                )?;
            }
        }
        for &member_idx in ctx.method_refs.items() {
            let member = assembly.member_ref(member_idx);
            if member.declaring == TypeHandle::Ref(idx) {
                let member_id = ctx.method_refs.try_get_id(member_idx).unwrap_or(0xFFFF);
                writeln!(
                    out,
                    "        MethodRef {}: {}",
                    token(member_id | EXTERNAL_BIT, member.token),
                    member.name
                )?;
            }
        }
    }
    writeln!(out)?;

    writeln!(out, "TypeDefProps:")?;
    for &type_idx in ctx.type_defs.items() {
        let entry = assembly.type_def(type_idx);
        let id = ctx.type_defs.try_get_id(type_idx).unwrap_or(0xFFFF);
        writeln!(
            out,
            "    {}: {} (flags: {:08x})",
            token(id, entry.token),
            assembly.type_def_full_name(type_idx),
            entry.flags
        )?;

        for &gp_idx in &entry.generic_params {
            if let Some(gp_id) = ctx.generic_params.try_get_id(gp_idx) {
                let gp = assembly.generic_param(gp_idx);
                writeln!(
                    out,
                    "        GenericParam {}: {} ({})",
                    token(gp_id, gp.token),
                    gp.name,
                    gp.number
                )?;
            }
        }

        for &field_idx in &entry.fields {
            let Some(field_id) = ctx.field_defs.try_get_id(field_idx) else {
                continue;
            };
            let field = assembly.field(field_idx);
            writeln!(
                out,
                "        FieldDef {}: {} {} (flags: {:04x})",
                token(field_id, field.token),
                type_sig_name(ctx, &field.sig),
                field.name,
                field.flags
            )?;
        }

        for &method_idx in &entry.methods {
            let Some(method_id) = ctx.method_defs.try_get_id(method_idx) else {
                continue;
            };
            let method = assembly.method(method_idx);
            writeln!(
                out,
                "        MethodDef {}: {} (flags: {:04x})",
                token(method_id, method.token),
                method.name,
                method.flags
            )?;

            for (i, local) in method.locals.iter().enumerate() {
                writeln!(out, "            Local {:02}: {}", i, type_sig_name(ctx, local))?;
            }

            if let Some(body) = &method.body {
                for clause in &body.exception_handlers {
                    let kind = match clause.kind {
                        EhKind::Catch => "catch",
                        EhKind::Filter => "filter",
                        EhKind::Finally => "finally",
                        EhKind::Fault => "fault",
                    };
                    let catch_type = clause
                        .catch_type
                        .map(|handle| assembly.type_handle_name(handle))
                        .unwrap_or_default();
                    writeln!(
                        out,
                        "            EH {} try IL_{:04x}..IL_{:04x} handler IL_{:04x}..IL_{:04x} {}",
                        kind,
                        clause.try_start,
                        clause.try_end,
                        clause.handler_start,
                        clause.handler_end,
                        catch_type
                    )?;
                }
                for instruction in &body.instructions {
                    writeln!(
                        out,
                        "            IL_{:04x}: {}{}",
                        instruction.offset,
                        instruction.mnemonic(),
                        operand_text(ctx, &instruction.operand)
                    )?;
                }
            }
        }

        for &interface in &entry.interfaces {
            writeln!(
                out,
                "        InterfaceImpl: {}",
                assembly.type_handle_name(interface)
            )?;
        }
    }
    writeln!(out)?;

    writeln!(out, "TypeSpecProps:")?;
    for (id, bytes) in ctx.type_specs.items().iter().enumerate() {
        let rendered: Vec<String> = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        writeln!(out, "    [{:04x}]: {}", id, rendered.join(" "))?;
    }
    writeln!(out)?;

    writeln!(out, "Attributes:")?;
    for record in ctx.attributes.records() {
        writeln!(
            out,
            "    owner {:02x}:{:04x} ctor [{:04x}] sig [{:04x}]",
            record.owner_tag, record.owner_id, record.ctor, record.signature
        )?;
    }
    writeln!(out)?;

    writeln!(out, "Strings:")?;
    for (id, value) in ctx.strings.entries() {
        writeln!(out, "    {id:08x} : {value}")?;
    }
    writeln!(out)?;

    writeln!(out, "UserStrings:")?;
    for (id, original, content) in &ctx.user_string_refs {
        writeln!(
            out,
            "    {} : ({:x}) \"{}\"",
            token(*id, *original),
            content.len(),
            content
        )?;
    }

    Ok(())
}
