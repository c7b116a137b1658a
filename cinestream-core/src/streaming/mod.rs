//! Direct byte-range streaming of untranscoded files.

pub mod direct;
pub mod range;

pub use direct::{DirectStream, content_type_for, range_stream};
pub use range::RangePlan;

/// Errors raised while planning or serving a byte range.
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("Range not satisfiable for {total} byte file")]
    RangeNotSatisfiable { total: u64 },

    #[error("Malformed range header: {header}")]
    MalformedRange { header: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
