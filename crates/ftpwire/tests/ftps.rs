mod common;

use common::{
    config_for, parse_port_command, pasv_listener, start, tls_acceptor, tls_identity,
    trusting_client_config,
};
use ftpwire::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_explicit_login_and_private_transfer() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 secure server").await;
        ctl.exchange("AUTH TLS", "234 Proceed with negotiation").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.anonymous_login().await;
        ctl.exchange("PBSZ 0", "200 PBSZ=0").await;
        ctl.exchange("PROT P", "200 Protection level set to P").await;

        ctl.exchange("TYPE I", "200 ok").await;
        let (data, reply) = pasv_listener().await;
        ctl.exchange("PASV", &reply).await;
        ctl.exchange("RETR secret.txt", "150 Opening BINARY mode data connection (6 bytes)")
            .await;
        let (tcp, _) = data.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        tls.write_all(b"secret").await.unwrap();
        tls.shutdown().await.unwrap();
        drop(tls);
        ctl.send("226 Transfer complete").await;

        ctl.exchange("QUIT", "221 Goodbye").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut config = config_for(addr);
    config.security = FtpSecurityMode::Explicit;
    let mut ftp = FtpClient::new(config);
    ftp.connect().await.unwrap();
    assert_eq!(ftp.control_security(), ControlSecurity::PlainControl);

    ftp.login("", "", "").await.unwrap();
    assert_eq!(ftp.control_security(), ControlSecurity::SecureControl);
    ftp.prot_p().await.unwrap();
    assert_eq!(ftp.data_protection(), DataProtection::Private);

    let mut received = Vec::new();
    ftp.retrieve_binary("RETR secret.txt", None, |chunk| {
        received.extend_from_slice(chunk);
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(received, b"secret");

    ftp.quit().await.unwrap();
    assert!(!ftp.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_tls_twice_is_illegal() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.wait_closed().await;
    })
    .await;

    let mut ftp = FtpClient::new(config_for(addr));
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    let err = ftp.auth_tls().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::IllegalState);
    // The session survives the refused call.
    assert!(ftp.is_connected());
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_prot_p_requires_secure_control() {
    let (addr, server) = start(|mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut ftp = FtpClient::new(config_for(addr));
    ftp.connect().await.unwrap();
    let err = ftp.prot_p().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::IllegalState);
    let err = ftp.ccc().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::IllegalState);
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_tls_refused() {
    let (addr, server) = start(|mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "502 TLS not available").await;
        ctl.exchange("NOOP", "200 still here").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut ftp = FtpClient::new(config_for(addr));
    ftp.connect().await.unwrap();
    let err = ftp.auth_tls().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::ReplyRejected);
    assert_eq!(err.code, Some(502));
    assert_eq!(ftp.control_security(), ControlSecurity::PlainControl);
    ftp.noop().await.unwrap();
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_clear_data_over_secure_control() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.exchange("PBSZ 0", "200 ok").await;
        ctl.exchange("PROT P", "200 ok").await;
        ctl.exchange("PROT C", "200 Protection level set to C").await;

        ctl.exchange("TYPE A", "200 ok").await;
        let (data, reply) = pasv_listener().await;
        ctl.exchange("PASV", &reply).await;
        ctl.exchange("NLST", "150 listing").await;
        let (mut conn, _) = data.accept().await.unwrap();
        conn.write_all(b"plain.txt\r\n").await.unwrap();
        drop(conn);
        ctl.send("226 ok").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut ftp = FtpClient::new(config_for(addr));
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    ftp.prot_p().await.unwrap();
    ftp.prot_c().await.unwrap();
    assert_eq!(ftp.data_protection(), DataProtection::Clear);
    assert_eq!(ftp.nlst(None).await.unwrap(), vec!["plain.txt"]);
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_ccc_returns_control_to_clear_text() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.exchange("CCC", "200 Clearing control channel").await;
        let mut ctl = ctl.downgrade().await;
        ctl.exchange("NOOP", "200 in the clear").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut ftp = FtpClient::new(config_for(addr));
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    ftp.ccc().await.unwrap();
    assert_eq!(ftp.control_security(), ControlSecurity::PlainControl);
    let resp = ftp.noop().await.unwrap();
    assert_eq!(resp.lines, vec!["200 in the clear"]);
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_failed_handshake_closes_session() {
    let (addr, server) = start(|mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        // Not a TLS server: answer the ClientHello with garbage.
        let mut junk = [0u8; 16];
        if let common::Control::Plain(r) = &mut ctl {
            let _ = r.get_mut().read(&mut junk).await;
            r.get_mut().write_all(b"not tls at all\r\n").await.unwrap();
        }
        ctl.wait_closed().await;
    })
    .await;

    let mut ftp = FtpClient::new(config_for(addr));
    ftp.connect().await.unwrap();
    let err = ftp.auth_tls().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::TlsFailed);
    assert!(!ftp.is_connected());
    assert_eq!(ftp.state(), SessionState::Unconnected);
    server.await.unwrap();
}

/// Server that upgrades on AUTH TLS and answers one NOOP.
async fn noop_over_tls(
    acceptor: tokio_rustls::TlsAcceptor,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.exchange("NOOP", "200 ok").await;
        ctl.wait_closed().await;
    })
    .await
}

#[tokio::test]
async fn test_required_verification_with_ca_file() {
    let (acceptor, pem) = tls_identity();
    let dir = tempfile::tempdir().unwrap();
    let ca = dir.path().join("ca.pem");
    std::fs::write(&ca, &pem).unwrap();
    let (addr, server) = noop_over_tls(acceptor).await;

    let mut config = config_for(addr);
    config.tls.verify = TlsVerifyMode::Required;
    config.tls.ca_cert_path = Some(ca.to_string_lossy().into_owned());
    let mut ftp = FtpClient::new(config);
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    assert_eq!(ftp.control_security(), ControlSecurity::SecureControl);
    ftp.noop().await.unwrap();
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_required_verification_rejects_unknown_issuer() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        if let common::Control::Plain(r) = ctl {
            assert!(acceptor.accept(r.into_inner()).await.is_err());
        }
    })
    .await;

    let mut config = config_for(addr);
    config.tls.verify = TlsVerifyMode::Required;
    let mut ftp = FtpClient::new(config);
    ftp.connect().await.unwrap();
    let err = ftp.auth_tls().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::TlsFailed);
    assert!(!ftp.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn test_optional_verification_accepts_self_signed() {
    let (addr, server) = noop_over_tls(tls_acceptor()).await;

    let mut config = config_for(addr);
    config.tls.verify = TlsVerifyMode::Optional;
    let mut ftp = FtpClient::new(config);
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    ftp.noop().await.unwrap();
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_caller_supplied_client_config() {
    let (acceptor, pem) = tls_identity();
    let (addr, server) = noop_over_tls(acceptor).await;

    let mut ftp = FtpClient::new(config_for(addr))
        .with_tls_client_config(trusting_client_config(&pem));
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    ftp.noop().await.unwrap();
    ftp.close().await;
    server.await.unwrap();

    // A config trusting some other certificate must fail the handshake.
    let (_, other_pem) = tls_identity();
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        if let common::Control::Plain(r) = ctl {
            assert!(acceptor.accept(r.into_inner()).await.is_err());
        }
    })
    .await;
    let mut ftp = FtpClient::new(config_for(addr))
        .with_tls_client_config(trusting_client_config(&other_pem));
    ftp.connect().await.unwrap();
    let err = ftp.auth_tls().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::TlsFailed);
    server.await.unwrap();
}

#[tokio::test]
async fn test_private_upload_reports_blocks() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.exchange("PBSZ 0", "200 ok").await;
        ctl.exchange("PROT P", "200 ok").await;
        ctl.exchange("TYPE I", "200 ok").await;
        let (data, reply) = pasv_listener().await;
        ctl.exchange("PASV", &reply).await;
        ctl.exchange("STOR up.bin", "150 Ok to send data").await;
        let (tcp, _) = data.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        let mut stored = Vec::new();
        // Ends cleanly only if the client sent close_notify.
        tls.read_to_end(&mut stored).await.unwrap();
        assert_eq!(stored, b"protected payload");
        ctl.send("226 Stored").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut config = config_for(addr);
    config.block_size = 4;
    let mut ftp = FtpClient::new(config);
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    ftp.prot_p().await.unwrap();

    let mut source: &[u8] = b"protected payload";
    let mut seen = Vec::new();
    let mut blocks = 0;
    ftp.store_binary("STOR up.bin", &mut source, None, |block| {
        blocks += 1;
        seen.extend_from_slice(block);
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(blocks, 5);
    assert_eq!(seen, b"protected payload");
    assert_eq!(ftp.session_info().bytes_uploaded, 17);
    ftp.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_private_active_transfer() {
    let acceptor = tls_acceptor();
    let (addr, server) = start(move |mut ctl| async move {
        ctl.send("220 ready").await;
        ctl.exchange("AUTH TLS", "234 ok").await;
        let mut ctl = ctl.upgrade(&acceptor).await;
        ctl.exchange("PBSZ 0", "200 ok").await;
        ctl.exchange("PROT P", "200 ok").await;
        ctl.exchange("TYPE I", "200 ok").await;
        let port = ctl.recv().await;
        let target = parse_port_command(&port);
        ctl.send("200 PORT ok").await;
        ctl.exchange("RETR a.txt", "150 Opening data connection").await;
        let tcp = TcpStream::connect(target).await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        tls.write_all(b"active secret").await.unwrap();
        tls.shutdown().await.unwrap();
        drop(tls);
        ctl.send("226 Sent").await;
        ctl.wait_closed().await;
    })
    .await;

    let mut config = config_for(addr);
    config.data_channel_mode = DataChannelMode::Active;
    let mut ftp = FtpClient::new(config);
    ftp.connect().await.unwrap();
    ftp.auth_tls().await.unwrap();
    ftp.prot_p().await.unwrap();

    let mut got = Vec::new();
    ftp.retrieve_binary("RETR a.txt", None, |c| {
        got.extend_from_slice(c);
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(got, b"active secret");
    ftp.close().await;
    server.await.unwrap();
}
