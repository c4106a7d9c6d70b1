//! Error type for the broker session.
//!
//! Setup problems (`ClientSetup`, `ConfigError`, `Io`) surface before the
//! first packet is sent and are fatal for the caller. Runtime problems
//! (`ClientTransfer`, `ClientConnection`) are reported per operation; the
//! connection kernel decides on its own whether a connection error is worth
//! another poll.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Client could not be assembled: TLS material unusable, bad options.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Session configuration failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// Request could not be queued for the event loop (channel full or closed).
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Network or protocol failure reported by the event loop.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// No CONNACK within the configured connection timeout.
    #[error("No CONNACK from broker within {0} seconds")]
    ConnectTimeout(u64),

    /// `start` called twice, or the kernel task is gone.
    #[error("Connection kernel error: {0}")]
    ConnectionKernel(String),

    /// Reading certificate or key files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

impl From<rustls::Error> for TransferError {
    fn from(err: rustls::Error) -> Self {
        TransferError::ClientSetup(format!("TLS: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::ClientSetup("no CA certificate in ca.crt".into());
        assert_eq!(
            err.to_string(),
            "Client setup error: no CA certificate in ca.crt"
        );
        assert_eq!(
            TransferError::ConnectTimeout(10).to_string(),
            "No CONNACK from broker within 10 seconds"
        );
    }

    #[test]
    fn test_transfer_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "ca.crt not found");
        let err: TransferError = io_err.into();
        assert!(matches!(err, TransferError::Io(_)));
        assert!(err.to_string().contains("ca.crt not found"));
    }

    #[test]
    fn test_connection_error_is_boxed() {
        let err: TransferError = rumqttc::ConnectionError::NetworkTimeout.into();
        assert!(matches!(err, TransferError::ClientConnection(_)));
    }
}
