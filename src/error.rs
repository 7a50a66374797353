//! Engine and process-level error types.

use thiserror::Error;

use crate::codec::CodecError;
use crate::wrapper::Pump;

/// Errors that end a wrapper session.
///
/// Policy rejections and stream EOF are not errors; they never show up here.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// A pump hit a malformed envelope or a broken stream.
    #[error("{pump} failed: {source}")]
    Codec {
        pump: Pump,
        #[source]
        source: CodecError,
    },

    /// A queue's writer pump was already gone when a message was pushed.
    #[error("{0} queue closed")]
    QueueClosed(Pump),

    /// The language server could not be started or its pipes captured.
    #[error("failed to start language server: {0}")]
    Spawn(String),

    /// I/O error while managing the language server process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WrapperError {
    /// The codec error code when this error came from the wire.
    pub fn codec_code(&self) -> Option<&'static str> {
        match self {
            WrapperError::Codec { source, .. } => Some(source.code()),
            _ => None,
        }
    }
}
