//! Engine-side error taxonomy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A frame could not be read or decoded by the engine
    #[error("frame {frame} unreadable: {message}")]
    FrameIngest { frame: u64, message: String },

    /// An engine produced a detection that cannot be used for matching
    #[error("malformed detection in frame {frame}: {message}")]
    DetectionParse { frame: u64, message: String },

    #[error("failed to start engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine exited with {status}: {tail}")]
    Exit { status: String, tail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
