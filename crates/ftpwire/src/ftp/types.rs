//! Shared types for the FTP crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ftp::error::{FtpError, FtpResult};

/// Default FTP control port.
pub const FTP_PORT: u16 = 21;

/// Longest physical line accepted on the control or an ASCII data channel.
pub const MAX_LINE: usize = 8192;

/// Default block size for binary transfers.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

// ─── Connection / Session ────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FtpSecurityMode {
    /// Plain-text FTP.
    #[default]
    None,
    /// Explicit FTPS: starts plain then upgrades via AUTH TLS.
    Explicit,
}

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    #[default]
    Binary,
}

impl TransferType {
    pub fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

/// How data connections are negotiated.
///
/// `Passive` and `Active` follow the control connection's address family:
/// PASV/PORT over IPv4, EPSV/EPRT over IPv6. The extended variants always
/// use EPSV/EPRT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    #[default]
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl DataChannelMode {
    pub fn is_passive(self) -> bool {
        matches!(self, Self::Passive | Self::ExtendedPassive)
    }
}

/// Single-byte text encoding for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TextEncoding {
    /// ISO-8859-1: every byte value maps to exactly one char.
    #[default]
    Latin1,
    /// 7-bit ASCII; outgoing chars above 0x7F are rejected.
    Ascii,
}

impl TextEncoding {
    pub fn encode(self, text: &str) -> FtpResult<Vec<u8>> {
        let limit = match self {
            TextEncoding::Latin1 => 0xFF,
            TextEncoding::Ascii => 0x7F,
        };
        text.chars()
            .map(|c| {
                let v = c as u32;
                if v <= limit {
                    Ok(v as u8)
                } else {
                    Err(FtpError::invalid_config(format!(
                        "character {:?} cannot be encoded as {:?}",
                        c, self
                    )))
                }
            })
            .collect()
    }

    /// Decoding is lossless for both encodings; ASCII is a Latin-1 subset.
    pub fn decode(self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// How strictly the server certificate is checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TlsVerifyMode {
    /// Accept any certificate.
    None,
    /// Verify, but only warn when verification fails.
    Optional,
    #[default]
    Required,
}

/// TLS material used for AUTH TLS and every PROT P data channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FtpTlsConfig {
    #[serde(default)]
    pub verify: TlsVerifyMode,
    /// Extra PEM trust anchors added to the native root store.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    /// PEM client certificate chain (needs `client_key_path`).
    #[serde(default)]
    pub client_cert_path: Option<String>,
    #[serde(default)]
    pub client_key_path: Option<String>,
    /// Name checked against the certificate when it differs from `host`.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Configuration for a single FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConnectionConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty means anonymous.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub security: FtpSecurityMode,
    #[serde(default)]
    pub tls: FtpTlsConfig,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// Applied to connect, every reply and every data chunk. `None` waits forever.
    #[serde(default = "default_timeout")]
    pub timeout_sec: Option<u64>,
    /// Local IP to bind outgoing sockets to and to advertise in PORT/EPRT.
    #[serde(default)]
    pub source_address: Option<String>,
    #[serde(default)]
    pub encoding: TextEncoding,
    #[serde(default = "default_max_line")]
    pub max_line_len: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_port() -> u16 {
    FTP_PORT
}
fn default_timeout() -> Option<u64> {
    Some(30)
}
fn default_max_line() -> usize {
    MAX_LINE
}
fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for FtpConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            account: String::new(),
            security: FtpSecurityMode::None,
            tls: FtpTlsConfig::default(),
            data_channel_mode: DataChannelMode::Passive,
            timeout_sec: default_timeout(),
            source_address: None,
            encoding: TextEncoding::Latin1,
            max_line_len: default_max_line(),
            block_size: default_block_size(),
        }
    }
}

impl FtpConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_sec.map(std::time::Duration::from_secs)
    }
}

/// Where the control connection is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Unconnected,
    Connected,
    Authenticated,
}

/// Whether the control channel is currently TLS-wrapped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ControlSecurity {
    PlainControl,
    SecureControl,
}

/// Data-channel protection level negotiated with PROT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataProtection {
    Clear,
    Private,
}

/// Information about an FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: SessionState,
    pub control_security: ControlSecurity,
    pub data_protection: DataProtection,
    pub welcome: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub last_response_code: Option<u16>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

// ─── FTP Response ────────────────────────────────────────────────────

/// Reply class, from the first digit of the code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReplyClass {
    Preliminary,
    Success,
    NeedsMoreInput,
    TransientFailure,
    PermanentFailure,
}

impl ReplyClass {
    pub fn from_code(code: u16) -> FtpResult<Self> {
        match code / 100 {
            1 => Ok(Self::Preliminary),
            2 => Ok(Self::Success),
            3 => Ok(Self::NeedsMoreInput),
            4 => Ok(Self::TransientFailure),
            5 => Ok(Self::PermanentFailure),
            _ => Err(FtpError::protocol_error(format!(
                "reply code {} has no valid class",
                code
            ))),
        }
    }

    /// Classes 1–3: the command was not refused.
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            Self::Preliminary | Self::Success | Self::NeedsMoreInput
        )
    }
}

/// A single FTP reply (may be multi-line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    /// Physical lines, terminators stripped, first line included.
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full reply text (all lines joined with `\n`).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    pub fn class(&self) -> FtpResult<ReplyClass> {
        ReplyClass::from_code(self.code)
    }

    /// Fails with `ReplyRejected` unless this is a 2xx reply.
    pub fn expect_success(&self) -> FtpResult<()> {
        match self.class()? {
            ReplyClass::Success => Ok(()),
            _ => Err(FtpError::rejected(self)),
        }
    }

    /// Fails with `ReplyRejected` on 4xx/5xx.
    pub fn expect_positive(&self) -> FtpResult<()> {
        if self.class()?.is_positive() {
            Ok(())
        } else {
            Err(FtpError::rejected(self))
        }
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}
