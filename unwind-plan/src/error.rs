use std::path::PathBuf;

use thiserror::Error;

/// Failures of the unwind plan pipeline.
///
/// Everything up to `UnsupportedCfaForm` is scoped to a single image and is
/// downgraded to a warning by the [`Unwinder`](crate::Unwinder). The last two
/// end a per-process request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open image {path}: {reason}")]
    ImageOpen { path: PathBuf, reason: String },

    #[error("No {section} section found in {path}")]
    SectionNotFound {
        path: PathBuf,
        section: &'static str,
    },

    #[error("Failed to read {section} section of {path}: {reason}")]
    SectionRead {
        path: PathBuf,
        section: &'static str,
        reason: String,
    },

    #[error("Malformed call frame section: {0}")]
    MalformedSection(String),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("CFA for {begin:#x}..{end:#x} is not a register plus offset")]
    UnsupportedCfaForm { begin: u64, end: u64 },

    #[error("Failed to find unwind plan table for pid {0}")]
    NoUnwindTableFound(u32),

    #[error("Failed to resolve mappings for pid {pid}: {reason}")]
    MappingResolution { pid: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<gimli::Error> for Error {
    fn from(e: gimli::Error) -> Self {
        Error::MalformedSection(e.to_string())
    }
}
