//! The one-call pipeline front door.
//!
//! Ties the phases together: load, filter, order, build the tables context,
//! latch minimization, emit the image, and render the optional dump and
//! native stubs. On any failure after output has started, the output files
//! are removed; partial output never survives.

use crate::{
    emit, filter::{parse_type_list, Filter},
    loader::import::load_assembly,
    minimize::compute_live_set,
    options::Options,
    ordering::order_types,
    stubs::generate_stubs,
    tables::TablesContext,
    Result,
};

/// What one pipeline run produced.
pub struct BuildSummary {
    /// Types that survived minimization
    pub live_types: usize,
    /// Total image size in bytes
    pub image_size: usize,
    /// Number of generated native stubs
    pub stub_count: usize,
    /// Per-section name and unpadded length, in emission order
    pub sections: Vec<(String, u32)>,
}

/// Run the full pipeline for one assembly.
///
/// # Errors
/// Propagates loader, lowering, emission, and I/O errors; guarantees no
/// partial output file is left behind.
pub fn run(options: &Options) -> Result<BuildSummary> {
    let assembly = load_assembly(&options.input)?;

    let mut filter = Filter::new();
    if let Some(path) = &options.exclude_list {
        filter.load_excluded_types(path)?;
    }

    let explicit_order = match &options.type_order {
        Some(path) => Some(parse_type_list(path)?),
        None => None,
    };

    let live = compute_live_set(&assembly, &filter);
    let order = order_types(&assembly, &live, explicit_order.as_deref());

    let mut ctx = TablesContext::build(&assembly, &live, &order, &filter, options)?;
    ctx.complete_minimization();

    let image = emit::write_image(&ctx, &options.output)?;

    if let Some(dump_path) = &options.dump {
        let result = (|| -> Result<()> {
            let mut out = std::io::BufWriter::new(std::fs::File::create(dump_path)?);
            crate::dump::write_dump(&ctx, &mut out)?;
            use std::io::Write;
            out.flush()?;
            Ok(())
        })();
        if let Err(error) = result {
            let _ = std::fs::remove_file(dump_path);
            let _ = std::fs::remove_file(&options.output);
            return Err(error);
        }
    }

    let stub_count = match &options.stubs_dir {
        Some(dir) => match generate_stubs(&ctx, dir) {
            Ok(count) => count,
            Err(error) => {
                // Requested outputs are all-or-nothing; a stub failure takes
                // the already-written image and dump down with it.
                let _ = std::fs::remove_file(&options.output);
                if let Some(dump_path) = &options.dump {
                    let _ = std::fs::remove_file(dump_path);
                }
                return Err(error);
            }
        },
        None => 0,
    };

    Ok(BuildSummary {
        live_types: order.len(),
        image_size: image.bytes.len(),
        stub_count,
        sections: image
            .sections
            .iter()
            .map(|section| (section.kind.to_string(), section.length))
            .collect(),
    })
}
