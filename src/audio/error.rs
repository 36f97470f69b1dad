use thiserror::Error;

/// Errors surfaced by the audio pipeline.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported format {0:?}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("volume {value} dB out of range ({min}..={max} dB)")]
    VolumeOutOfRange { value: i32, min: i32, max: i32 },

    #[error("outgoing audio channel closed")]
    SinkClosed,
}
