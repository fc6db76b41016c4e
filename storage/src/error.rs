use crate::object_store::ObjectStoreError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("encode error: {0}")]
    EncodeError(String),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("object store error: {0}")]
    ObjectStoreError(#[from] ObjectStoreError),
    #[error("controller error: {0}")]
    ControllerError(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("engine not started")]
    NotStarted,
    #[error("other: {0}")]
    Other(String),
}

impl Error {
    pub fn err(e: impl Into<Box<dyn std::error::Error>>) -> Self {
        Self::Other(e.into().to_string())
    }

    pub fn encode_error(e: impl Into<Box<dyn std::error::Error>>) -> Self {
        Self::EncodeError(e.into().to_string())
    }

    pub fn decode_error(e: impl Into<Box<dyn std::error::Error>>) -> Self {
        Self::DecodeError(e.into().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
