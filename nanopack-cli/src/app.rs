use std::path::PathBuf;

use clap::Parser;

/// Compact a .NET assembly into a nano-runtime image.
#[derive(Parser)]
#[command(name = "nanopack", version, about, long_about = None)]
pub struct Cli {
    /// Source PE assembly
    pub input: PathBuf,

    /// Output image path
    pub output: PathBuf,

    /// Write a textual dump of the lowered metadata
    #[arg(long, value_name = "PATH")]
    pub dump: Option<PathBuf>,

    /// File listing fully-qualified type names to exclude, one per line
    #[arg(long, value_name = "PATH")]
    pub exclude: Option<PathBuf>,

    /// File fixing the type emission order, one fully-qualified name per line
    #[arg(long, value_name = "PATH")]
    pub type_order: Option<PathBuf>,

    /// Directory for generated native stub skeletons
    #[arg(long, value_name = "DIR")]
    pub stubs: Option<PathBuf>,

    /// Pre-sort attributes per owner for runtime folding
    #[arg(long)]
    pub compress_attributes: bool,

    /// Collapse enum signatures to their underlying primitive
    #[arg(long)]
    pub expand_enums: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Translate the parsed arguments into pipeline options.
    pub fn to_options(&self) -> nanopack::options::Options {
        let mut options = nanopack::options::Options::new(&self.input, &self.output);
        options.dump = self.dump.clone();
        options.exclude_list = self.exclude.clone();
        options.type_order = self.type_order.clone();
        options.stubs_dir = self.stubs.clone();
        options.compress_attributes = self.compress_attributes;
        options.expand_enums = self.expand_enums;
        options
    }
}
