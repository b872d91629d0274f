//! Crate-wide error types.
//!
//! Mirrors the error taxonomy from the design: configuration and concentrator
//! start-up failures are fatal and bubble up to `main`; everything else
//! (endpoint, transient network, protocol, payload errors) is handled at the
//! point it occurs and never becomes a `GatewayError`.

use std::fmt;
use std::io;

/// Fatal errors that abort the daemon at start-up or during supervised
/// shutdown. Transient per-packet and per-endpoint failures are handled
/// locally (see `downstream`, `upstream`) and never reach this type.
#[derive(Debug)]
pub enum GatewayError {
    /// The configuration file was missing, unreadable, or failed to parse.
    Config(String),
    /// The concentrator hardware abstraction failed to start.
    ConcentratorStart(String),
    /// The concentrator reported the spurious-reset trigger-counter
    /// signature (`0x7E000000`).
    SpuriousReset,
    /// A live socket's option configuration (timeout) failed.
    SocketOption(io::Error),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::ConcentratorStart(msg) => write!(f, "concentrator start failed: {msg}"),
            Self::SpuriousReset => write!(f, "concentrator reported spurious reset signature"),
            Self::SocketOption(e) => write!(f, "socket option failed: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SocketOption(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        Self::SocketOption(e)
    }
}

/// Process exit codes: 0 on clean exit, a distinct non-zero code
/// per fatal cause so operators can tell startup failure from a runtime
/// crash in a log grep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,
    ConfigError = 1,
    ConcentratorStartFailure = 2,
    SpuriousReset = 3,
    SocketOptionFailure = 4,
}

impl From<&GatewayError> for ExitCode {
    fn from(e: &GatewayError) -> Self {
        match e {
            GatewayError::Config(_) => ExitCode::ConfigError,
            GatewayError::ConcentratorStart(_) => ExitCode::ConcentratorStartFailure,
            GatewayError::SpuriousReset => ExitCode::SpuriousReset,
            GatewayError::SocketOption(_) => ExitCode::SocketOptionFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_maps_config_error() {
        let e = GatewayError::Config("missing file".into());
        assert_eq!(ExitCode::from(&e), ExitCode::ConfigError);
    }

    #[test]
    fn exit_code_maps_spurious_reset() {
        let e = GatewayError::SpuriousReset;
        assert_eq!(ExitCode::from(&e), ExitCode::SpuriousReset);
    }

    #[test]
    fn display_includes_message() {
        let e = GatewayError::Config("no such file".into());
        assert!(e.to_string().contains("no such file"));
    }
}
