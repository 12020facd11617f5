//! Convenient re-exports of the most commonly used types.
//!
//! ```rust,no_run
//! use nanopack::prelude::*;
//!
//! let options = Options::new("app.dll", "app.pe");
//! pipeline::run(&options)?;
//! # Ok::<(), nanopack::Error>(())
//! ```

pub use crate::{
    emit::{emit_image, write_image, Image},
    filter::Filter,
    loader::{import::load_assembly, Assembly},
    minimize::compute_live_set,
    options::Options,
    ordering::order_types,
    pipeline,
    tables::{
        token::{NanoToken, TableKind, EMPTY_INDEX, EXTERNAL_BIT},
        TablesContext,
    },
    Error, Result,
};
