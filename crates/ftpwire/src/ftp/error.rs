//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ftp::types::FtpResponse;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP connect / DNS resolution / bind failure.
    ConnectionFailed,
    /// The peer closed the stream while a reply or data was expected.
    ConnectionClosed,
    /// Malformed reply, oversized line, unparseable embedded value,
    /// unsupported address family or an out-of-set ABOR reply.
    ProtocolError,
    /// Well-formed reply whose code does not satisfy the operation.
    ReplyRejected,
    /// USER/PASS/ACCT sequence did not end in a 2xx reply.
    LoginRejected,
    /// Operation not allowed in the current session state.
    IllegalState,
    /// TLS configuration or handshake failure.
    TlsFailed,
    /// A socket step did not finish within the configured timeout.
    Timeout,
    /// Any other transport or local I/O failure.
    Io,
    /// Config / parameter validation error.
    InvalidConfig,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionClosed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IllegalState, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Io, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// A reply that is well-formed but not what the operation needed.
    /// The full server text is kept so callers can log the exact reason.
    pub fn rejected(resp: &FtpResponse) -> Self {
        Self::new(FtpErrorKind::ReplyRejected, resp.text()).with_code(resp.code)
    }

    pub fn login_rejected(resp: &FtpResponse) -> Self {
        Self::new(FtpErrorKind::LoginRejected, resp.text()).with_code(resp.code)
    }

    /// Malformed or out-of-contract reply text.
    pub fn bad_reply(resp: &FtpResponse, why: &str) -> Self {
        Self::protocol_error(format!("{}: {}", why, resp.text())).with_code(resp.code)
    }

    /// Whether the server signalled a transient (4xx) condition.
    pub fn is_transient(&self) -> bool {
        matches!(self.code, Some(400..=499))
    }

    /// Whether the server signalled a permanent (5xx) condition.
    pub fn is_permanent(&self) -> bool {
        matches!(self.code, Some(500..=599))
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            std::io::ErrorKind::UnexpectedEof => Self::connection_closed(e.to_string()),
            _ => Self::io_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: u16, text: &str) -> FtpResponse {
        FtpResponse {
            code,
            lines: vec![format!("{} {}", code, text)],
        }
    }

    #[test]
    fn rejected_keeps_code_and_text() {
        let err = FtpError::rejected(&reply(550, "No such file"));
        assert_eq!(err.kind, FtpErrorKind::ReplyRejected);
        assert_eq!(err.code, Some(550));
        assert_eq!(err.message, "550 No such file");
        assert!(err.is_permanent());
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_reply_is_flagged() {
        let err = FtpError::rejected(&reply(421, "Too many users"));
        assert!(err.is_transient());
    }

    #[test]
    fn io_timeout_maps_to_timeout_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(FtpError::from(io).kind, FtpErrorKind::Timeout);
    }

    #[test]
    fn io_eof_maps_to_connection_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "gone");
        assert_eq!(FtpError::from(io).kind, FtpErrorKind::ConnectionClosed);
    }

    #[test]
    fn display_includes_code() {
        let err = FtpError::login_rejected(&reply(530, "Login incorrect"));
        assert_eq!(err.to_string(), "[FTP LoginRejected 530] 530 Login incorrect");
    }
}
