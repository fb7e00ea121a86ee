use anyhow::Error;
use thiserror::Error;

/// Application-level error types for s3mpu-rs.
///
/// Carried inside `anyhow::Error` through the pipeline and recovered with
/// `downcast_ref` where the caller needs to tell them apart.
///
/// ## Exit Codes
///
/// - 1: Runtime errors (RemoteListing, RemoteOp, Decode, Transport, Pipeline)
/// - 2: Configuration errors (InvalidConfig)
///
/// A cancelled run is not an error: the stages return `Ok(())` and the
/// caller inspects the cancellation token.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum S3mpuError {
    /// A listing request returned a non-success status.
    #[error("listing request failed with status {status}: {code} ({message})")]
    RemoteListing {
        status: u16,
        code: String,
        message: String,
    },

    /// An abort request returned a status other than 204.
    #[error("abort request failed with status {status}: {code} ({message})")]
    RemoteOp {
        status: u16,
        code: String,
        message: String,
    },

    /// A response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The HTTP exchange itself failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl S3mpuError {
    pub fn exit_code(&self) -> i32 {
        match self {
            S3mpuError::InvalidConfig(_) => 2,
            _ => 1,
        }
    }
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<S3mpuError>() {
        return err.exit_code();
    }
    1
}
