use thiserror::Error;

#[derive(Error, Debug)]
pub enum TfError {
    #[error("no transform data buffered for frame '{0}'")]
    NoData(String),

    #[error("frames '{from_frame}' and '{target}' are not connected")]
    NotConnected { from_frame: String, target: String },

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("deadline exceeded while loading transforms")]
    Timeout,

    #[error("malformed transform record: {0}")]
    MalformedRecord(String),

    #[error("ignoring transform with identical parent and child frame '{0}'")]
    SelfTransform(String),

    #[error("rotation quaternion missing, non-finite or not unit length")]
    InvalidQuaternion,
}

pub type TfResult<T> = Result<T, TfError>;
