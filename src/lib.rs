#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(dead_code)]

//! # nanopack
//!
//! A post-compilation metadata compactor for constrained managed runtimes.
//! `nanopack` ingests a compiled .NET assembly in the standard PE/CLI format
//! and produces the compact, little-endian binary image such a runtime loads:
//! flat tables of references and definitions, a deduplicated string heap, a
//! deduplicated signature blob, rewritten byte-code bodies, and a resource
//! section. Size reduction, table renumbering, and aggressive string and
//! signature deduplication are the point.
//!
//! # Architecture
//!
//! The pipeline is a linear dataflow with one convergence point (the tables
//! context) and a two-phase emit (resolve, then write):
//!
//! - **Loader**: parses the source assembly into an in-memory object graph
//!   (assembly references, type definitions with their fields and methods,
//!   method bodies, custom attributes, embedded resources)
//! - **Filter**: drops ignored attributes and user-excluded types
//! - **Type orderer**: produces a deterministic, dependency-respecting order
//!   of type definitions
//! - **Tables context**: constructs every table in a fixed order and wires
//!   them together
//! - **Minimizer**: removes definitions unreachable from roots, then latches
//!   *minimize-complete*, which unlocks writing
//! - **Emitter**: writes each table as fixed-width records in a fixed section
//!   order with alignment padding
//! - **Dumper**: renders a human-readable dump of the same context
//!
//! # Key Components
//!
//! - [`crate::loader::Assembly`] - The read-only object graph the core consumes
//! - [`crate::tables::TablesContext`] - Owner and orchestrator of every table
//! - [`crate::emit`] - Binary image layout and serialization
//! - [`crate::pipeline`] - One-call front door tying the phases together
//! - [`crate::Error`] and [`crate::Result`] - Error handling
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use nanopack::{pipeline, options::Options};
//!
//! let options = Options::new("app.dll", "app.pe");
//! pipeline::run(&options)?;
//! # Ok::<(), nanopack::Error>(())
//! ```

mod error;

pub mod dump;
pub mod emit;
pub mod filter;
pub mod loader;
pub mod minimize;
pub mod options;
pub mod ordering;
pub mod pipeline;
pub mod prelude;
pub mod stubs;
pub mod tables;

pub use error::{Error, Result};
pub(crate) use error::malformed_error;
