use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

/// Trackforge's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Trackforge's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Failures raised while reading or rewriting a FLAC metadata chain.
///
/// None of these are fatal to the process; the boolean API on
/// [`crate::flac::FlacMetadataStore`] turns them into a stored last-error string.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Cannot open file: {}", .path.display())]
    FileNotOpenable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid FLAC file format")]
    InvalidContainerMarker,

    #[error("Cannot create temporary file: {}", .path.display())]
    TempFileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Verification of temporary file failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("Failed to replace original file")]
    ReplaceFailed(#[source] std::io::Error),

    #[error("Metadata block chain is truncated; refusing to rewrite")]
    TruncatedChain,

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("metadata block of {len} bytes does not fit a 24-bit length")]
    BlockTooLarge { len: usize },

    #[error("cover image could not be encoded")]
    Image(#[from] image::ImageError),

    #[error("io error while processing flac: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage-specific conversion failures.
///
/// The display strings are the user-visible terminal messages.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to open input file")]
    InputOpen(#[source] anyhow::Error),

    #[error("No audio stream found")]
    NoAudioStream,

    #[error("Input codec not found")]
    DecoderNotFound(#[source] anyhow::Error),

    #[error("Failed to open input codec")]
    DecoderOpen(#[source] anyhow::Error),

    #[error("Failed to create output context")]
    OutputContext(#[source] anyhow::Error),

    #[error("Failed to create output stream")]
    OutputStream(#[source] anyhow::Error),

    #[error("Failed to open output file")]
    OutputOpen(#[source] anyhow::Error),

    #[error("MP3 encoder not found")]
    EncoderNotFound(#[source] anyhow::Error),

    #[error("Failed to open output codec")]
    EncoderOpen(#[source] anyhow::Error),

    #[error("Failed to write output file header")]
    WriteHeader(#[source] anyhow::Error),

    #[error("Failed to initialize resampler")]
    ResamplerInit(#[source] anyhow::Error),

    #[error("Failed to write output file trailer")]
    WriteTrailer(#[source] anyhow::Error),

    #[error("Conversion cancelled")]
    Cancelled,
}
