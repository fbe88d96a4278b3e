//! Data-channel negotiation for FTP transfers.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV** — server opens a port, client connects
//! - **EPSV** — extended passive (IPv6-ready)
//! - **PORT** — client opens a port, tells server
//! - **EPRT** — extended active (IPv6-ready)
//!
//! The data socket is TLS-wrapped when the session negotiated `PROT P`.

use crate::ftp::client::FtpClient;
use crate::ftp::connection::{self, AddressFamily, ACTIVE_PORT_RANGE};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::types::{DataChannelMode, FtpResponse};
use log::debug;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::client::TlsStream;

/// Abstraction over a plain or TLS-wrapped data stream.
#[derive(Debug)]
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl DataStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, DataStream::Tls(_))
    }
}

impl AsyncRead for DataStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            // A peer that closes without close_notify still ends the data.
            DataStream::Tls(s) => match Pin::new(s.as_mut()).poll_read(cx, buf) {
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("data channel closed without TLS close_notify");
                    Poll::Ready(Ok(()))
                }
                other => other,
            },
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connected data channel for one transfer.
#[derive(Debug)]
pub struct DataConnection {
    pub stream: DataStream,
    /// Size announced in the 150 reply, when the server gave one.
    pub expected_size: Option<u64>,
}

/// Where the data connection will come from once the command is sent.
enum Pending {
    Connected(TcpStream),
    Listening(TcpListener),
}

/// `h1,h2,h3,h4,p1,p2` for a PORT command.
pub fn port_argument(ip: std::net::Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{},{},{},{},{},{}", a, b, c, d, port >> 8, port & 0xff)
}

/// `|af|host|port|` for an EPRT command.
pub fn eprt_argument(ip: IpAddr, port: u16) -> String {
    let family = match ip {
        IpAddr::V4(_) => AddressFamily::V4,
        IpAddr::V6(_) => AddressFamily::V6,
    };
    format!("|{}|{}|{}|", family.eprt_code(), ip, port)
}

impl FtpClient {
    /// Open a data connection and issue `cmd` on it (`RETR x`, `LIST`, …).
    ///
    /// With `rest` a `REST <offset>` is sent first. The returned
    /// connection must be passed to [`FtpClient::finish_transfer`] (or the
    /// engine helpers) once the data has been moved.
    pub async fn transfer_command(&mut self, cmd: &str, rest: Option<u64>) -> FtpResult<DataConnection> {
        let mode = self.config.data_channel_mode;
        let family = self.family()?;
        let limit = self.config.timeout();
        let source = connection::parse_source_ip(self.config.source_address.as_deref())?;

        let pending = if mode.is_passive() {
            let addr = self.negotiate_passive(mode, family).await?;
            debug!("passive data connection to {}", addr);
            Pending::Connected(connection::connect_addr(addr, limit, source).await?)
        } else {
            Pending::Listening(self.negotiate_active(mode, family, source).await?)
        };

        // On failure `pending` is dropped, closing the socket or listener.
        let resp = self.send_transfer_command(cmd, rest).await?;

        let tcp = match pending {
            Pending::Connected(tcp) => tcp,
            Pending::Listening(listener) => connection::accept_one(&listener, limit).await?,
        };

        let expected_size = if resp.code == 150 {
            parser::parse_transfer_size(&resp.lines[0])?
        } else {
            None
        };

        let stream = match self.data_tls()?.cloned() {
            Some(cap) => DataStream::Tls(Box::new(cap.handshake(tcp, limit).await?)),
            None => DataStream::Plain(tcp),
        };
        debug!(
            "data connection ready for '{}' (tls: {}, size: {:?})",
            cmd,
            stream.is_tls(),
            expected_size
        );
        Ok(DataConnection {
            stream,
            expected_size,
        })
    }

    /// REST (optional), the transfer command, then wait for the 1xx mark.
    async fn send_transfer_command(&mut self, cmd: &str, rest: Option<u64>) -> FtpResult<FtpResponse> {
        if let Some(offset) = rest {
            self.send_command(&format!("REST {}", offset))
                .await?
                .expect_positive()?;
        }
        let mut resp = self.send_command(cmd).await?;
        // Some servers answer 2xx before the 1xx mark.
        if resp.is_completion() {
            resp = self.read_reply().await?;
        }
        if !resp.is_preliminary() {
            return Err(FtpError::rejected(&resp));
        }
        Ok(resp)
    }

    /// PASV over IPv4, EPSV over IPv6 or when asked for.
    async fn negotiate_passive(&mut self, mode: DataChannelMode, family: AddressFamily) -> FtpResult<SocketAddr> {
        if mode == DataChannelMode::Passive && family == AddressFamily::V4 {
            let resp = self.send_command("PASV").await?;
            let (ip, port) = parser::parse_pasv(&resp.text())?;
            Ok(SocketAddr::new(IpAddr::V4(ip), port))
        } else {
            let resp = self.send_command("EPSV").await?;
            let port = parser::parse_epsv(&resp.text())?;
            Ok(SocketAddr::new(self.peer()?.ip(), port))
        }
    }

    /// Listen on the first free port of `ACTIVE_PORT_RANGE` and announce it.
    ///
    /// The advertised address is `source_address` when configured,
    /// otherwise the loopback address of the control connection's family;
    /// that is only reachable by a server on the same host.
    async fn negotiate_active(
        &mut self,
        mode: DataChannelMode,
        family: AddressFamily,
        source: Option<IpAddr>,
    ) -> FtpResult<TcpListener> {
        let ip = source.unwrap_or_else(|| family.loopback());
        if !family.matches(&ip) {
            return Err(FtpError::protocol_error(format!(
                "data address {} does not match the control connection's family {:?}",
                ip, family
            )));
        }
        let listener = connection::bind_in_range(ip, ACTIVE_PORT_RANGE)?;
        let port = listener.local_addr()?.port();

        let cmd = match (mode, ip) {
            (DataChannelMode::Active, IpAddr::V4(v4)) => format!("PORT {}", port_argument(v4, port)),
            (DataChannelMode::Active | DataChannelMode::ExtendedActive, _) => {
                format!("EPRT {}", eprt_argument(ip, port))
            }
            _ => {
                return Err(FtpError::protocol_error(format!(
                    "{:?} is not an active mode",
                    mode
                )))
            }
        };
        self.void_command(&cmd).await?;
        debug!("active data listener on {}:{}", ip, port);
        Ok(listener)
    }
}
