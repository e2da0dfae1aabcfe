use std::borrow::Cow;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while compressing and assembling archives.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required argument was empty, or the configuration is inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    /// Worker creation, allocation, or output creation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Cow<'static, str>),

    /// The aggregate solid-mode input exceeds the in-memory buffering cap.
    #[error("solid input of {size} bytes exceeds the {limit} byte cap")]
    InputTooLarge { size: u64, limit: u64 },

    /// The encoder reported failure while compressing one item.
    #[error("codec failure on item {index}: {source}")]
    CodecFailure {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// The callback requested cancellation before or between jobs.
    #[error("operation cancelled")]
    Cancelled,

    /// Writing to the output sink (or a volume file) failed.
    #[error("output sink failure ({context}): {source}")]
    SinkFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Every job failed; no archive was written.
    #[error("all compression jobs failed")]
    CompressionFailed,
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn resource_exhausted(msg: impl Into<Cow<'static, str>>) -> Self {
        Error::ResourceExhausted(msg.into())
    }

    pub(crate) fn codec(index: usize, source: std::io::Error) -> Self {
        Error::CodecFailure { index, source }
    }

    pub(crate) fn sink(source: std::io::Error, context: impl Into<String>) -> Self {
        Error::SinkFailure {
            context: context.into(),
            source,
        }
    }

    /// The abstract kind of this error, as reported through error hooks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::InputTooLarge { .. } => ErrorKind::InputTooLarge,
            Error::CodecFailure { .. } => ErrorKind::CodecFailure,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::SinkFailure { .. } => ErrorKind::SinkFailure,
            Error::CompressionFailed => ErrorKind::CompressionFailed,
        }
    }
}

/// Lightweight error classification carried in job statuses and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidArgument,
    ResourceExhausted,
    InputTooLarge,
    CodecFailure,
    Cancelled,
    SinkFailure,
    CompressionFailed,
}
