//! Scripted in-process FTP server for the integration tests.
//!
//! Each test spawns a script that plays the server side of one control
//! connection line by line, asserting on what the client sends.

#![allow(dead_code)]

use ftpwire::{FtpConnectionConfig, TlsVerifyMode};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use socket2::SockRef;
use std::future::Future;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

pub enum Control {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl Control {
    pub async fn send(&mut self, line: &str) {
        let wire = format!("{}\r\n", line);
        match self {
            Control::Plain(r) => r.get_mut().write_all(wire.as_bytes()).await.unwrap(),
            Control::Tls(r) => {
                r.get_mut().write_all(wire.as_bytes()).await.unwrap();
                r.get_mut().flush().await.unwrap();
            }
        }
    }

    /// Send raw bytes without adding a terminator.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        match self {
            Control::Plain(r) => r.get_mut().write_all(bytes).await.unwrap(),
            Control::Tls(r) => {
                r.get_mut().write_all(bytes).await.unwrap();
                r.get_mut().flush().await.unwrap();
            }
        }
    }

    /// Next command line from the client, CRLF stripped.
    pub async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = match self {
            Control::Plain(r) => r.read_line(&mut line).await.unwrap(),
            Control::Tls(r) => r.read_line(&mut line).await.unwrap(),
        };
        assert!(n > 0, "client closed the control connection");
        assert!(line.ends_with("\r\n"), "command not CRLF-terminated: {:?}", line);
        line.truncate(line.len() - 2);
        line
    }

    /// Receive a command and check it equals `expected`.
    pub async fn expect(&mut self, expected: &str) {
        let got = self.recv().await;
        assert_eq!(got, expected);
    }

    /// Receive a command, check it, and answer with `reply`.
    pub async fn exchange(&mut self, expected: &str, reply: &str) {
        self.expect(expected).await;
        self.send(reply).await;
    }

    /// Receive a command sent as TCP urgent data. The urgent mark is the
    /// final LF, so `expected` plus CR arrives in-band and the LF has to be
    /// fetched out of band.
    pub async fn expect_urgent(&mut self, expected: &str) {
        let r = match self {
            Control::Plain(r) => r,
            Control::Tls(_) => panic!("urgent data needs a plain control connection"),
        };
        let mut head = Vec::new();
        r.read_until(b'\r', &mut head).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&head), format!("{}\r", expected));

        let mut mark = [MaybeUninit::<u8>::uninit()];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let n = loop {
            match SockRef::from(r.get_ref()).recv_out_of_band(&mut mark) {
                Ok(n) => break n,
                Err(e) => {
                    assert!(tokio::time::Instant::now() < deadline, "no urgent byte: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };
        assert_eq!(n, 1);
        // recv_out_of_band initialised the one byte it reported
        let byte = unsafe { mark[0].assume_init() };
        assert_eq!(byte, b'\n');
    }

    /// `expect_urgent`, then answer with `reply`.
    pub async fn exchange_urgent(&mut self, expected: &str, reply: &str) {
        self.expect_urgent(expected).await;
        self.send(reply).await;
    }

    /// Play the anonymous login handshake.
    pub async fn anonymous_login(&mut self) {
        self.exchange("USER anonymous", "331 Guest login ok").await;
        self.exchange("PASS anonymous@", "230 Logged in").await;
    }

    /// Wrap the control connection in TLS (after replying 234 to AUTH TLS).
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> Control {
        match self {
            Control::Plain(r) => {
                assert!(r.buffer().is_empty());
                let tls = acceptor.accept(r.into_inner()).await.unwrap();
                Control::Tls(BufReader::new(tls))
            }
            Control::Tls(_) => panic!("already TLS"),
        }
    }

    /// Answer the client's close_notify after CCC and return to clear text.
    pub async fn downgrade(self) -> Control {
        match self {
            Control::Tls(mut r) => {
                let mut rest = Vec::new();
                r.read_to_end(&mut rest).await.unwrap();
                assert!(rest.is_empty());
                let mut tls = r.into_inner();
                tls.get_mut().1.send_close_notify();
                tls.flush().await.unwrap();
                let (tcp, _) = tls.into_inner();
                Control::Plain(BufReader::new(tcp))
            }
            Control::Plain(_) => panic!("not TLS"),
        }
    }

    /// Wait until the client closes the connection.
    pub async fn wait_closed(&mut self) {
        let mut rest = Vec::new();
        let _ = match self {
            Control::Plain(r) => r.read_to_end(&mut rest).await,
            Control::Tls(r) => r.read_to_end(&mut rest).await,
        };
    }
}

/// Start a server on 127.0.0.1 that runs `script` on the first connection.
pub async fn start<F, Fut>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(Control) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    start_on("127.0.0.1:0", script).await
}

/// Like `start`, listening on `bind` (e.g. `[::1]:0`).
pub async fn start_on<F, Fut>(bind: &str, script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(Control) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind(bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        script(Control::Plain(BufReader::new(tcp))).await;
    });
    (addr, handle)
}

/// True when the host can listen on the IPv6 loopback.
pub async fn ipv6_available() -> bool {
    TcpListener::bind("[::1]:0").await.is_ok()
}

pub fn config_for(addr: SocketAddr) -> FtpConnectionConfig {
    let mut config = FtpConnectionConfig::new(addr.ip().to_string(), addr.port());
    config.timeout_sec = Some(5);
    config.tls.verify = TlsVerifyMode::None;
    config.tls.server_name = Some("localhost".into());
    config
}

/// A passive-mode data listener and the matching 227 reply.
pub async fn pasv_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reply = format!(
        "227 Entering Passive Mode (127,0,0,1,{},{})",
        port >> 8,
        port & 0xff
    );
    (listener, reply)
}

/// Address announced in a `PORT h1,h2,h3,h4,p1,p2` command.
pub fn parse_port_command(cmd: &str) -> SocketAddr {
    let arg = cmd.strip_prefix("PORT ").expect("not a PORT command");
    let n: Vec<u16> = arg.split(',').map(|p| p.parse().unwrap()).collect();
    assert_eq!(n.len(), 6);
    format!("{}.{}.{}.{}:{}", n[0], n[1], n[2], n[3], n[4] * 256 + n[5])
        .parse()
        .unwrap()
}

/// Self-signed `localhost` certificate for the server side of TLS tests.
pub fn tls_acceptor() -> TlsAcceptor {
    tls_identity().0
}

/// Acceptor plus the PEM of its certificate, for clients that verify it.
pub fn tls_identity() -> (TlsAcceptor, String) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let pem = cert.serialize_pem().unwrap();
    let cert_der = CertificateDer::from(cert.serialize_der().unwrap());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();
    (TlsAcceptor::from(Arc::new(config)), pem)
}

/// A client config trusting only `pem`.
pub fn trusting_client_config(pem: &str) -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}
