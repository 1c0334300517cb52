use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("midi error: {0}")]
    Midi(String),

    #[error("no midi port matching {0:?}")]
    UnknownPort(String),

    #[error("dmx output thread has stopped")]
    OutputClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
