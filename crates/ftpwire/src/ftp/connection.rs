//! TCP transport: control/data connects, active-mode listeners and the
//! timeout policy from `FtpConnectionConfig`.

use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use log::debug;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::Range;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};

/// Ports scanned, in order, for an active-mode data listener.
pub const ACTIVE_PORT_RANGE: Range<u16> = 40001..40100;

/// Address family of a connection, recorded at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::V4,
            SocketAddr::V6(_) => Self::V6,
        }
    }

    pub fn loopback(self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Self::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    /// RFC 2428 network protocol number.
    pub fn eprt_code(self) -> u8 {
        match self {
            Self::V4 => 1,
            Self::V6 => 2,
        }
    }

    pub fn matches(self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (Self::V4, IpAddr::V4(_)) | (Self::V6, IpAddr::V6(_))
        )
    }
}

/// Run `fut`, failing with `Timeout` once `limit` elapses.
pub(crate) async fn with_timeout<T, E, F>(limit: Option<Duration>, what: &str, fut: F) -> FtpResult<T>
where
    F: Future<Output = Result<T, E>>,
    FtpError: From<E>,
{
    match limit {
        Some(dur) => match tokio::time::timeout(dur, fut).await {
            Ok(res) => res.map_err(FtpError::from),
            Err(_) => Err(FtpError::timeout(format!("{} timed out after {:?}", what, dur))),
        },
        None => fut.await.map_err(FtpError::from),
    }
}

/// Parse the optional configured source address.
pub(crate) fn parse_source_ip(source: Option<&str>) -> FtpResult<Option<IpAddr>> {
    match source {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s
            .parse::<IpAddr>()
            .map(Some)
            .map_err(|e| FtpError::invalid_config(format!("source address '{}': {}", s, e))),
    }
}

/// Connect to `host:port`, trying each resolved address in turn.
///
/// When `source` is set only addresses of the same family are tried and
/// the socket is bound to it (ephemeral port) before connecting.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    limit: Option<Duration>,
    source: Option<IpAddr>,
) -> FtpResult<TcpStream> {
    let target = match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{}]:{}", host, port),
        Err(_) => format!("{}:{}", host, port),
    };
    let addrs: Vec<SocketAddr> = with_timeout(limit, "DNS lookup", lookup_host((host, port)))
        .await
        .map_err(|e| as_connect_failure(e, &target))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        if let Some(src) = source {
            if !AddressFamily::of(&addr).matches(&src) {
                continue;
            }
        }
        match connect_addr(addr, limit, source).await {
            Ok(tcp) => return Ok(tcp),
            Err(e) => {
                debug!("TCP connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        FtpError::connection_failed(format!("could not connect to {}: no usable address", target))
    }))
}

/// Connect to one resolved address, optionally from `source`.
pub(crate) async fn connect_addr(
    addr: SocketAddr,
    limit: Option<Duration>,
    source: Option<IpAddr>,
) -> FtpResult<TcpStream> {
    let socket = new_socket(AddressFamily::of(&addr))?;
    if let Some(src) = source {
        socket
            .bind(SocketAddr::new(src, 0))
            .map_err(|e| FtpError::connection_failed(format!("bind {}: {}", src, e)))?;
    }
    let tcp = with_timeout(limit, "TCP connect", socket.connect(addr))
        .await
        .map_err(|e| as_connect_failure(e, &addr.to_string()))?;
    tcp.set_nodelay(true).ok();
    debug!("TCP connected to {}", addr);
    Ok(tcp)
}

/// Timeouts stay `Timeout`; anything else becomes `ConnectionFailed`.
fn as_connect_failure(e: FtpError, target: &str) -> FtpError {
    match e.kind {
        FtpErrorKind::Timeout => e,
        _ => FtpError::connection_failed(format!("{}: {}", target, e.message)),
    }
}

fn new_socket(family: AddressFamily) -> FtpResult<TcpSocket> {
    let socket = match family {
        AddressFamily::V4 => TcpSocket::new_v4(),
        AddressFamily::V6 => TcpSocket::new_v6(),
    };
    socket.map_err(|e| FtpError::connection_failed(format!("socket: {}", e)))
}

/// Bind a one-slot listener on the first free port of `ports`.
///
/// Exhausting the range re-raises the last bind error.
pub fn bind_in_range(ip: IpAddr, ports: Range<u16>) -> FtpResult<TcpListener> {
    let family = match ip {
        IpAddr::V4(_) => AddressFamily::V4,
        IpAddr::V6(_) => AddressFamily::V6,
    };
    let mut last_err: Option<FtpError> = None;
    for port in ports {
        let attempt = new_socket(family).and_then(|socket| {
            socket
                .bind(SocketAddr::new(ip, port))
                .and_then(|_| socket.listen(1))
                .map_err(|e| FtpError::connection_failed(format!("bind {}:{}: {}", ip, port, e)))
        });
        match attempt {
            Ok(listener) => {
                debug!("active-mode listener bound on {}:{}", ip, port);
                return Ok(listener);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        FtpError::connection_failed("no addresses to bind a data listener on")
    }))
}

/// Accept the single inbound data connection.
pub async fn accept_one(listener: &TcpListener, limit: Option<Duration>) -> FtpResult<TcpStream> {
    let (tcp, peer) = with_timeout(limit, "data accept", listener.accept()).await?;
    debug!("accepted data connection from {}", peer);
    tcp.set_nodelay(true).ok();
    Ok(tcp)
}
