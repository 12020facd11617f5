use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type covering every failure this library can return.
///
/// # Error Categories
///
/// ## Loader errors
/// - [`Error::Malformed`] - Corrupted or invalid input assembly
/// - [`Error::OutOfBounds`] - Attempted read beyond the input boundaries
/// - [`Error::NotSupported`] - Input uses a construct the target runtime rejects
///
/// ## Lowering errors
/// - [`Error::UnresolvedReference`] - A declaring type, method, or field could
///   not be mapped to any table
/// - [`Error::InvalidRecord`] - A fixed-width record assertion failed during
///   emission
/// - [`Error::IndexOverflow`] - A table left the 16-bit identifier space
///
/// ## I/O and external errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
#[derive(Error, Debug)]
pub enum Error {
    /// The input assembly is damaged and could not be parsed.
    ///
    /// Includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The input uses a format element the target runtime does not accept.
    #[error("Not supported by the target runtime: {0}")]
    NotSupported(String),

    /// A required declaring type, method, or field could not be mapped to any
    /// table.
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A fixed-width record assertion failed during emission.
    #[error("Invalid record in table '{table}': expected {expected} bytes, produced {actual}")]
    InvalidRecord {
        /// Name of the table whose record violated its declared width
        table: &'static str,
        /// The declared record width in bytes
        expected: usize,
        /// The width the serializer actually produced
        actual: usize,
    },

    /// An identifier left the 16-bit id space of its table.
    #[error("Table '{0}' overflowed the 16-bit identifier space")]
    IndexOverflow(&'static str),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}

/// `Result<T, Error>` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) use malformed_error;
