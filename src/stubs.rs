//! Native stub skeleton generation.
//!
//! For every surviving type that declares native or runtime-internal
//! methods, emits a C++ skeleton file plus one shared header carrying the
//! method lookup table, ready to be filled in and linked into the consuming
//! runtime's firmware.
//!
//! Output layout: one `<assembly>.h` declaring every stub function and the
//! lookup table, one `<assembly>_lookup.cpp` defining the table (one slot
//! per method-def id, empty for managed methods), and one
//! `<assembly>_<type>.cpp` of stub bodies per type.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{
    loader::{MethodIdx, TypeDefIdx},
    tables::TablesContext,
    Result,
};

/// ECMA implementation flags marking a stub candidate.
const MIFLAGS_NATIVE: u16 = 0x0001;
const MIFLAGS_INTERNAL_CALL: u16 = 0x1000;

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn stub_name(ctx: &TablesContext<'_>, type_idx: TypeDefIdx, method_idx: MethodIdx) -> String {
    let assembly = ctx.assembly;
    format!(
        "{}_{}_{}",
        sanitize(&assembly.name),
        sanitize(&assembly.type_def_full_name(type_idx)),
        sanitize(&assembly.method(method_idx).name)
    )
}

/// Generate stub skeletons into `dir`, returning the stubbed method count.
///
/// All-or-nothing: when any write fails, every file created by this run is
/// removed before the error is returned.
///
/// # Errors
/// Returns I/O errors from directory creation or file writes.
pub fn generate_stubs(ctx: &TablesContext<'_>, dir: &Path) -> Result<usize> {
    let mut created = Vec::new();
    match write_stubs(ctx, dir, &mut created) {
        Ok(count) => Ok(count),
        Err(error) => {
            for path in created {
                let _ = std::fs::remove_file(path);
            }
            Err(error)
        }
    }
}

fn create_file(dir: &Path, name: String, created: &mut Vec<PathBuf>) -> Result<std::fs::File> {
    let path = dir.join(name);
    let file = std::fs::File::create(&path)?;
    created.push(path);
    Ok(file)
}

fn write_stubs(ctx: &TablesContext<'_>, dir: &Path, created: &mut Vec<PathBuf>) -> Result<usize> {
    let assembly = ctx.assembly;

    // Lookup table slots follow method-def id order; non-native methods
    // occupy empty slots so the runtime can index by id.
    let mut table: Vec<Option<String>> = Vec::new();
    let mut per_type: Vec<(TypeDefIdx, Vec<MethodIdx>)> = Vec::new();

    for &method_idx in ctx.method_defs.items() {
        let method = assembly.method(method_idx);
        let native = method.impl_flags & (MIFLAGS_NATIVE | MIFLAGS_INTERNAL_CALL) != 0;
        if native {
            table.push(Some(stub_name(ctx, method.declaring, method_idx)));
            match per_type.last_mut() {
                Some((type_idx, methods)) if *type_idx == method.declaring => {
                    methods.push(method_idx);
                }
                _ => per_type.push((method.declaring, vec![method_idx])),
            }
        } else {
            table.push(None);
        }
    }

    let stub_count = table.iter().filter(|slot| slot.is_some()).count();
    if stub_count == 0 {
        return Ok(0);
    }

    std::fs::create_dir_all(dir)?;
    let assembly_ident = sanitize(&assembly.name);

    let mut header = create_file(dir, format!("{assembly_ident}.h"), created)?;
    writeln!(header, "#ifndef {}_H", assembly_ident.to_ascii_uppercase())?;
    writeln!(header, "#define {}_H", assembly_ident.to_ascii_uppercase())?;
    writeln!(header)?;
    writeln!(header, "#include <nanoCLR_Interop.h>")?;
    writeln!(header)?;
    for name in table.iter().flatten() {
        writeln!(header, "HRESULT {name}(CLR_RT_StackFrame &stack);")?;
    }
    writeln!(header)?;
    writeln!(
        header,
        "extern const CLR_RT_MethodHandler method_lookup_{assembly_ident}[];"
    )?;
    writeln!(header)?;
    writeln!(header, "#endif")?;

    let mut lookup = create_file(dir, format!("{assembly_ident}_lookup.cpp"), created)?;
    writeln!(lookup, "#include \"{assembly_ident}.h\"")?;
    writeln!(lookup)?;
    writeln!(
        lookup,
        "const CLR_RT_MethodHandler method_lookup_{assembly_ident}[] ="
    )?;
    writeln!(lookup, "{{")?;
    for slot in &table {
        match slot {
            Some(name) => writeln!(lookup, "    {name},")?,
            None => writeln!(lookup, "    nullptr,")?,
        }
    }
    writeln!(lookup, "}};")?;

    for (type_idx, methods) in per_type {
        let file_name = format!(
            "{assembly_ident}_{}.cpp",
            sanitize(&assembly.type_def_full_name(type_idx))
        );
        let mut source = create_file(dir, file_name, created)?;
        writeln!(source, "#include \"{assembly_ident}.h\"")?;
        for method_idx in methods {
            let name = stub_name(ctx, type_idx, method_idx);
            writeln!(source)?;
            writeln!(source, "HRESULT {name}(CLR_RT_StackFrame &stack)")?;
            writeln!(source, "{{")?;
            writeln!(source, "    NANOCLR_HEADER();")?;
            writeln!(source)?;
            writeln!(source, "    NANOCLR_SET_AND_LEAVE(CLR_E_NOTIMPL);")?;
            writeln!(source)?;
            writeln!(source, "    NANOCLR_NOCLEANUP();")?;
            writeln!(source, "}}")?;
        }
    }

    Ok(stub_count)
}
