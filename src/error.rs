use failure::Fail;
use std::io;
use std::string::FromUtf8Error;

#[derive(Fail, Debug)]
pub enum KVStoreError {
    // IO error
    #[fail(display = "IO error: {}", _0)]
    Io(#[cause] io::Error),
    // Serde error, log records and config files
    #[fail(display = "serde_json error: {}", _0)]
    Serde(#[cause] serde_json::Error),
    // Sled DB error
    #[fail(display = "sled error: {}", _0)]
    Sled(#[cause] sled::Error),
    // Stored key or value is invalid UTF-8 sequence
    #[fail(display = "UTF-8 error: {}", _0)]
    Utf8(#[cause] FromUtf8Error),
    // Script passed null where a string was required
    #[fail(display = "Key or value is null")]
    InvalidKey,
    // Invalid Command type found in a log
    #[fail(display = "Unexpected command type")]
    UnexpectedCommandType,
    // Index points into a log file that has no open reader
    #[fail(display = "Missing log file {}", _0)]
    MissingLogFile(u64),
    // Off-screen page could not be created or loaded
    #[fail(display = "render context error: {}", _0)]
    RenderContext(String),
    // PNG encoding or decoding failure
    #[fail(display = "png error: {}", _0)]
    Png(String),
    #[fail(display = "base64 error: {}", _0)]
    Base64(#[cause] base64::DecodeError),
    #[fail(display = "Not a PNG data URI")]
    InvalidDataUri,
    // Script called something the bridge does not expose
    #[fail(display = "Unknown method {}.{}", object, method)]
    UnknownMethod { object: String, method: String },
    #[fail(display = "Invalid argument: {}", _0)]
    InvalidArgument(String),
    // UI thread has shut down, script can no longer be evaluated
    #[fail(display = "UI thread closed")]
    UiThreadClosed,
    #[fail(display = "Invalid config: {}", _0)]
    Config(String),
}

impl From<io::Error> for KVStoreError {
    fn from(err: io::Error) -> Self {
        KVStoreError::Io(err)
    }
}

impl From<serde_json::Error> for KVStoreError {
    fn from(err: serde_json::Error) -> Self {
        KVStoreError::Serde(err)
    }
}

impl From<sled::Error> for KVStoreError {
    fn from(err: sled::Error) -> Self {
        KVStoreError::Sled(err)
    }
}

impl From<FromUtf8Error> for KVStoreError {
    fn from(err: FromUtf8Error) -> Self {
        KVStoreError::Utf8(err)
    }
}

impl From<base64::DecodeError> for KVStoreError {
    fn from(err: base64::DecodeError) -> Self {
        KVStoreError::Base64(err)
    }
}

impl From<png::EncodingError> for KVStoreError {
    fn from(err: png::EncodingError) -> Self {
        KVStoreError::Png(err.to_string())
    }
}

impl From<png::DecodingError> for KVStoreError {
    fn from(err: png::DecodingError) -> Self {
        KVStoreError::Png(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KVStoreError>;
