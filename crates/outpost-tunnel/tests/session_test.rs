//! End-to-end session test: mutual TLS, role-inverted multiplexing and
//! a CONNECT relay through an accepted stream

use std::sync::Arc;

use futures::future;
use outpost_identity::{AgentIdentity, TrustAnchor};
use outpost_tunnel::TunnelSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

fn test_ca() -> (rcgen::Certificate, rcgen::KeyPair) {
    let mut params = rcgen::CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert, key)
}

fn issue_server_cert(
    ca_cert: &rcgen::Certificate,
    ca_key: &rcgen::KeyPair,
) -> (rcgen::Certificate, rcgen::KeyPair) {
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, ca_cert, ca_key).unwrap();
    (cert, key)
}

fn issue_client_cert(
    name: &str,
    ca_cert: &rcgen::Certificate,
    ca_key: &rcgen::KeyPair,
) -> (rcgen::Certificate, rcgen::KeyPair) {
    let mut params = rcgen::CertificateParams::default();
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, name);
    params.distinguished_name = dn;
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, ca_cert, ca_key).unwrap();
    (cert, key)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_accepts_streams_and_relays_connect() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (ca_cert, ca_key) = test_ca();
    let (server_cert, server_key) = issue_server_cert(&ca_cert, &ca_key);
    let (client_cert, client_key) = issue_client_cert("edge-1", &ca_cert, &ca_key);

    // Control server: TLS with mandatory client certificate.
    let mut roots = rustls::RootCertStore::empty();
    roots.add(ca_cert.der().clone()).unwrap();
    let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .unwrap();
    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            vec![server_cert.der().clone()],
            rustls::pki_types::PrivateKeyDer::try_from(server_key.serialize_der()).unwrap(),
        )
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = listener.local_addr().unwrap().port();

    // Target the proxied CONNECT will dial.
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();
    let target_task = tokio::spawn(async move {
        let (mut socket, _) = target.accept().await.unwrap();
        let mut buf = [0u8; 5];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        socket.write_all(b"world").await.unwrap();
    });

    // Control-server side: accept the agent, then open a stream toward
    // it - the agent is the mux server even though it dialed out.
    let control_task = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let tls = acceptor.accept(tcp).await.unwrap();

        let mut conn = yamux::Connection::new(
            tls.compat(),
            yamux::Config::default(),
            yamux::Mode::Client,
        );
        let stream = future::poll_fn(|cx| conn.poll_new_outbound(cx))
            .await
            .expect("open stream");

        // The connection makes progress only while it is polled.
        let driver = tokio::spawn(async move {
            loop {
                match future::poll_fn(|cx| conn.poll_next_inbound(cx)).await {
                    Some(Ok(inbound)) => drop(inbound),
                    Some(Err(_)) | None => break,
                }
            }
        });

        let mut stream = stream.compat();
        stream
            .write_all(format!("CONNECT {target_addr} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut established = [0u8; 19];
        stream.read_exact(&mut established).await.unwrap();
        assert_eq!(&established, b"HTTP/1.1 200 OK\r\n\r\n");

        stream.write_all(b"hello").await.unwrap();
        let mut reply = [0u8; 5];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"world");

        driver.abort();
    });

    // Agent side.
    let identity =
        AgentIdentity::from_pem(&client_cert.pem(), &client_key.serialize_pem()).unwrap();
    let anchor = TrustAnchor::from_pem(ca_cert.pem().into_bytes()).unwrap();

    let session = TunnelSession::connect(
        &format!("localhost:{control_port}"),
        &identity,
        &anchor,
        false,
    )
    .await
    .unwrap();
    let session_task = tokio::spawn(session.run());

    control_task.await.unwrap();
    target_task.await.unwrap();
    session_task.abort();
}

#[tokio::test]
async fn test_connect_fails_against_untrusted_server() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (ca_cert, ca_key) = test_ca();
    let (client_cert, client_key) = issue_client_cert("edge-1", &ca_cert, &ca_key);

    // A server presenting a certificate from a different CA.
    let (other_ca_cert, other_ca_key) = test_ca();
    let (server_cert, server_key) = issue_server_cert(&other_ca_cert, &other_ca_key);

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![server_cert.der().clone()],
            rustls::pki_types::PrivateKeyDer::try_from(server_key.serialize_der()).unwrap(),
        )
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((tcp, _)) = listener.accept().await {
            let _ = acceptor.accept(tcp).await;
        }
    });

    let identity =
        AgentIdentity::from_pem(&client_cert.pem(), &client_key.serialize_pem()).unwrap();
    let anchor = TrustAnchor::from_pem(ca_cert.pem().into_bytes()).unwrap();

    let result = TunnelSession::connect(
        &format!("localhost:{control_port}"),
        &identity,
        &anchor,
        false,
    )
    .await;
    assert!(result.is_err());
}
