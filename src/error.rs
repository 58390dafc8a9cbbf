use std::any::Any;
use std::io;
use thiserror::Error;

/// Process-level failures: everything that stops the service from starting
/// or keeps it from serving.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or parsed
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A global logger was already installed
    #[error("logger error: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while serving a single request.
///
/// These are handed back to hyper, which closes the affected connection.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The request body exceeded the configured limit
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The request body could not be read
    #[error("body read failed: {0}")]
    Body(#[from] hyper::Error),

    /// The handler panicked and no recovery handler was configured
    #[error("handler aborted")]
    Aborted,

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// Represents errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Error when a mutex lock becomes poisoned due to a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Error when spawning a new thread fails
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(io::Error),
}

/// Type alias for Results using ExecutorError as the error type
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    /// Tests the formatting of executor errors and their conversion into
    /// the process-level error.
    #[test]
    fn test_executor_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test error");
        let exec_err = ExecutorError::ThreadSpawn(io_err);
        assert_eq!(exec_err.to_string(), "thread spawn failed: test error");

        let err = Error::from(exec_err);
        assert!(matches!(err, Error::Executor(ExecutorError::ThreadSpawn(_))));

        let serve_err = ServeError::from(ExecutorError::LockPoisoned);
        assert_eq!(serve_err.to_string(), "executor error: mutex lock poisoned");
    }

    /// Tests that bind errors keep the address and expose their source.
    #[test]
    fn test_bind_error() {
        let err = Error::Bind {
            addr: "0.0.0.0:80".to_owned(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:80: denied");
        assert!(err.source().is_some());
    }

    /// Tests the automatic conversion from io::Error.
    #[test]
    fn test_io_error_conversion() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "test error"));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = ServeError::PayloadTooLarge { limit: 1024 };
        assert_eq!(err.to_string(), "payload exceeds 1024 bytes");
    }

    /// Tests extraction of both kinds of panic payload.
    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let code = 7;
        let payload = std::panic::catch_unwind(|| panic!("formatted {}", code)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
