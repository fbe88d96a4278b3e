//! Stateful FTP client. Owns the control connection and issues commands.
//!
//! Lifecycle: `new()` → `connect()` (greeting) → optional `auth_tls()` →
//! `login()` → commands and transfers → `quit()` / `close()`. A closed
//! client can `connect()` again.
//!
//! The client exposes low-level command helpers used by `transfer.rs`,
//! `directory.rs` and `file_ops.rs` for higher-level operations.

use crate::ftp::connection::{self, AddressFamily};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls::{self, TlsCapability};
use crate::ftp::types::*;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Reply codes `abort()` accepts.
const ABORT_REPLIES: [u16; 3] = [426, 225, 226];

/// An FTP client session. One instance drives one control connection and
/// at most one data transfer at a time; it is not meant to be shared.
pub struct FtpClient {
    pub id: String,
    pub config: FtpConnectionConfig,
    codec: Option<FtpCodec>,
    state: SessionState,
    control_security: ControlSecurity,
    data_protection: DataProtection,
    tls: Option<TlsCapability>,
    tls_client_config: Option<Arc<ClientConfig>>,
    peer: Option<SocketAddr>,
    welcome: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
    last_response_code: Option<u16>,
    pub(crate) bytes_uploaded: u64,
    pub(crate) bytes_downloaded: u64,
}

impl FtpClient {
    /// Create an unconnected client.
    pub fn new(config: FtpConnectionConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            codec: None,
            state: SessionState::Unconnected,
            control_security: ControlSecurity::PlainControl,
            data_protection: DataProtection::Clear,
            tls: None,
            tls_client_config: None,
            peer: None,
            welcome: None,
            connected_at: None,
            last_activity: Utc::now(),
            last_response_code: None,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        }
    }

    /// Use a prepared rustls configuration instead of building one from
    /// `config.tls`.
    pub fn with_tls_client_config(mut self, tls: Arc<ClientConfig>) -> Self {
        self.tls_client_config = Some(tls);
        self
    }

    // ─── Connect ─────────────────────────────────────────────────

    /// Connect to the configured host and port; returns the greeting.
    pub async fn connect(&mut self) -> FtpResult<String> {
        let host = self.config.host.clone();
        let port = self.config.port;
        self.connect_to(&host, port).await
    }

    /// Connect to `host:port` and read the greeting, which must be 1xx–3xx.
    pub async fn connect_to(&mut self, host: &str, port: u16) -> FtpResult<String> {
        if self.codec.is_some() {
            return Err(FtpError::illegal_state("already connected; close() first"));
        }
        if host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }

        let limit = self.config.timeout();
        let source = connection::parse_source_ip(self.config.source_address.as_deref())?;
        let tcp = connection::connect_tcp(host, port, limit, source).await?;
        let peer = tcp.peer_addr()?;
        let codec = FtpCodec::from_tcp(tcp, self.config.encoding, self.config.max_line_len, limit);

        self.config.host = host.to_string();
        self.config.port = port;
        self.codec = Some(codec);
        self.peer = Some(peer);
        self.state = SessionState::Connected;
        self.control_security = ControlSecurity::PlainControl;
        self.data_protection = DataProtection::Clear;
        self.tls = None;

        let greeting = match self.read_reply().await {
            Ok(resp) => resp,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };
        if !greeting.class()?.is_positive() {
            self.close().await;
            return Err(FtpError::login_rejected(&greeting));
        }

        let text = greeting.text();
        self.welcome = Some(text.clone());
        self.connected_at = Some(Utc::now());
        info!("FTP session {} connected to {} ({})", self.id, peer, greeting.code);
        Ok(text)
    }

    // ─── Command primitives ──────────────────────────────────────

    pub(crate) fn codec_mut(&mut self) -> FtpResult<&mut FtpCodec> {
        self.codec
            .as_mut()
            .ok_or_else(|| FtpError::illegal_state("not connected"))
    }

    /// Send a command and return its reply, whatever the class.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.codec_mut()?.send_command(cmd).await?;
        self.read_reply().await
    }

    /// Send a command and require a 2xx reply.
    pub async fn void_command(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let resp = self.send_command(cmd).await?;
        resp.expect_success()?;
        Ok(resp)
    }

    /// Read the next reply from the control channel.
    pub async fn read_reply(&mut self) -> FtpResult<FtpResponse> {
        let resp = self.codec_mut()?.read_response().await?;
        self.last_response_code = Some(resp.code);
        self.touch();
        Ok(resp)
    }

    /// Read the next reply and require it to be 2xx.
    pub async fn void_response(&mut self) -> FtpResult<FtpResponse> {
        let resp = self.read_reply().await?;
        resp.expect_success()?;
        Ok(resp)
    }

    // ─── Authentication ──────────────────────────────────────────

    /// Log in with the configured username, password and account.
    pub async fn login_with_config(&mut self) -> FtpResult<FtpResponse> {
        let user = self.config.username.clone();
        let password = self.config.password.clone();
        let account = self.config.account.clone();
        self.login(&user, &password, &account).await
    }

    /// USER, then PASS and ACCT as long as the server asks for more.
    ///
    /// An empty user logs in as `anonymous`; anonymous logins without a
    /// password (or with `-`) send `anonymous@`. Under explicit FTPS the
    /// control channel is secured first.
    pub async fn login(&mut self, user: &str, password: &str, account: &str) -> FtpResult<FtpResponse> {
        if self.state == SessionState::Unconnected {
            return Err(FtpError::illegal_state("login() before connect()"));
        }
        if self.config.security == FtpSecurityMode::Explicit
            && self.control_security == ControlSecurity::PlainControl
        {
            self.auth_tls().await?;
        }

        let user = if user.is_empty() { "anonymous" } else { user };
        let password = if user == "anonymous" && (password.is_empty() || password == "-") {
            "anonymous@"
        } else {
            password
        };

        let mut resp = self.send_command(&format!("USER {}", user)).await?;
        if resp.is_intermediate() {
            resp = self.send_command(&format!("PASS {}", password)).await?;
        }
        if resp.is_intermediate() {
            resp = self.send_command(&format!("ACCT {}", account)).await?;
        }
        if !resp.is_completion() {
            warn!("FTP session {}: login as {} rejected ({})", self.id, user, resp.code);
            return Err(FtpError::login_rejected(&resp));
        }

        self.state = SessionState::Authenticated;
        info!("FTP session {} authenticated as {}", self.id, user);
        Ok(resp)
    }

    /// Send an ACCT command outside of login.
    pub async fn acct(&mut self, account: &str) -> FtpResult<FtpResponse> {
        self.void_command(&format!("ACCT {}", account)).await
    }

    // ─── TLS overlay ─────────────────────────────────────────────

    async fn tls_capability(&mut self) -> FtpResult<TlsCapability> {
        if let Some(cap) = &self.tls {
            return Ok(cap.clone());
        }
        let name = self
            .config
            .tls
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.host.clone());
        let cap = match &self.tls_client_config {
            Some(cfg) => TlsCapability::from_client_config(cfg.clone(), &name)?,
            None => TlsCapability::from_config(&self.config.tls, &self.config.host).await?,
        };
        self.tls = Some(cap.clone());
        Ok(cap)
    }

    /// `AUTH TLS` and wrap the control channel. A failed handshake leaves
    /// the session closed.
    pub async fn auth_tls(&mut self) -> FtpResult<FtpResponse> {
        if self.control_security == ControlSecurity::SecureControl {
            return Err(FtpError::illegal_state("control channel is already secured"));
        }
        let cap = self.tls_capability().await?;
        let resp = self.void_command("AUTH TLS").await?;

        let codec = self
            .codec
            .take()
            .ok_or_else(|| FtpError::illegal_state("not connected"))?;
        match tls::upgrade_to_tls(codec, &cap).await {
            Ok(codec) => {
                self.codec = Some(codec);
                self.control_security = ControlSecurity::SecureControl;
                info!("FTP session {}: control channel secured", self.id);
                Ok(resp)
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// `PBSZ 0` + `PROT P`: protect every following data connection.
    pub async fn prot_p(&mut self) -> FtpResult<FtpResponse> {
        if self.control_security != ControlSecurity::SecureControl {
            return Err(FtpError::illegal_state("PROT P requires AUTH TLS first"));
        }
        self.void_command("PBSZ 0").await?;
        let resp = self.void_command("PROT P").await?;
        self.data_protection = DataProtection::Private;
        debug!("FTP session {}: data protection private", self.id);
        Ok(resp)
    }

    /// `PROT C`: following data connections go in clear.
    pub async fn prot_c(&mut self) -> FtpResult<FtpResponse> {
        let resp = self.void_command("PROT C").await?;
        self.data_protection = DataProtection::Clear;
        debug!("FTP session {}: data protection clear", self.id);
        Ok(resp)
    }

    /// `CCC`: drop TLS on the control channel, keep data protection as is.
    pub async fn ccc(&mut self) -> FtpResult<FtpResponse> {
        if self.control_security != ControlSecurity::SecureControl {
            return Err(FtpError::illegal_state("control channel is not secured"));
        }
        let resp = self.void_command("CCC").await?;
        let codec = self
            .codec
            .take()
            .ok_or_else(|| FtpError::illegal_state("not connected"))?;
        match tls::downgrade(codec).await {
            Ok(codec) => {
                self.codec = Some(codec);
                self.control_security = ControlSecurity::PlainControl;
                info!("FTP session {}: control channel back in clear", self.id);
                Ok(resp)
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    pub(crate) fn data_tls(&self) -> FtpResult<Option<&TlsCapability>> {
        match self.data_protection {
            DataProtection::Clear => Ok(None),
            DataProtection::Private => self
                .tls
                .as_ref()
                .map(Some)
                .ok_or_else(|| FtpError::illegal_state("data protection set without TLS")),
        }
    }

    // ─── Session control ─────────────────────────────────────────

    pub async fn noop(&mut self) -> FtpResult<FtpResponse> {
        self.void_command("NOOP").await
    }

    /// Feature lines from `FEAT`, leading space trimmed.
    pub async fn feat(&mut self) -> FtpResult<Vec<String>> {
        let resp = self.void_command("FEAT").await?;
        let count = resp.lines.len();
        Ok(resp
            .lines
            .into_iter()
            .take(count.saturating_sub(1))
            .skip(1)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Switch between passive and active data connections, keeping the
    /// extended/non-extended choice.
    pub fn set_passive(&mut self, passive: bool) {
        use DataChannelMode::*;
        self.config.data_channel_mode = match (self.config.data_channel_mode, passive) {
            (Passive | Active, true) => Passive,
            (ExtendedPassive | ExtendedActive, true) => ExtendedPassive,
            (Passive | Active, false) => Active,
            (ExtendedPassive | ExtendedActive, false) => ExtendedActive,
        };
    }

    /// Send `ABOR` as urgent data and check the reply code.
    pub async fn abort(&mut self) -> FtpResult<FtpResponse> {
        self.codec_mut()?.send_urgent(b"ABOR\r\n").await?;
        let resp = self.read_reply().await?;
        if !ABORT_REPLIES.contains(&resp.code) {
            return Err(FtpError::bad_reply(&resp, "unexpected reply to ABOR"));
        }
        Ok(resp)
    }

    /// Send `QUIT` and close the connection whatever the outcome.
    pub async fn quit(&mut self) -> FtpResult<FtpResponse> {
        let res = self.void_command("QUIT").await;
        self.close().await;
        res
    }

    /// Drop the control connection without a QUIT.
    pub async fn close(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            if let Err(e) = codec.shutdown().await {
                debug!("FTP session {}: shutdown: {}", self.id, e);
            }
            info!("FTP session {} closed", self.id);
        }
        self.state = SessionState::Unconnected;
        self.control_security = ControlSecurity::PlainControl;
        self.data_protection = DataProtection::Clear;
        self.tls = None;
        self.peer = None;
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn welcome(&self) -> Option<&str> {
        self.welcome.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.codec.is_some()
    }

    pub fn control_security(&self) -> ControlSecurity {
        self.control_security
    }

    pub fn data_protection(&self) -> DataProtection {
        self.data_protection
    }

    pub fn last_response_code(&self) -> Option<u16> {
        self.last_response_code
    }

    pub(crate) fn peer(&self) -> FtpResult<SocketAddr> {
        self.peer.ok_or_else(|| FtpError::illegal_state("not connected"))
    }

    pub(crate) fn family(&self) -> FtpResult<AddressFamily> {
        self.peer().map(|p| AddressFamily::of(&p))
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn session_info(&self) -> FtpSessionInfo {
        FtpSessionInfo {
            id: self.id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            state: self.state,
            control_security: self.control_security,
            data_protection: self.data_protection,
            welcome: self.welcome.clone(),
            connected_at: self.connected_at,
            last_activity: self.last_activity,
            last_response_code: self.last_response_code,
            bytes_uploaded: self.bytes_uploaded,
            bytes_downloaded: self.bytes_downloaded,
        }
    }
}
