//! Mutual TLS exchanges against a local endpoint

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    identity, spawn_http_server, spawn_tls_server, LocalServer, Pki, ServerOptions, FISCAL_ID,
};
use fiscal_transmit::channel::SOAP_CONTENT_TYPE;
use fiscal_transmit::{
    CredentialStore, HostPort, PlatformRoots, SecureChannelFactory, TaxpayerIdentity,
    TransmitConfig, Transport, TransportError, TrustManagerProvider, TrustStoreBuilder,
};

const ENVELOPE: &str = "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body/></soap:Envelope>";
const REPLY: &str = "<retConsStatServ><cStat>107</cStat></retConsStatServ>";

struct Fixture {
    factory: SecureChannelFactory,
    taxpayer: TaxpayerIdentity,
    credentials: Arc<CredentialStore>,
    _root_server: LocalServer,
    _dir: tempfile::TempDir,
}

/// Factory whose trust store holds the test CA, downloaded as a root
async fn fixture(pki: &Pki, trust_test_ca: bool, send_timeout: Duration) -> Fixture {
    fixture_harvesting(pki, trust_test_ca, send_timeout, Vec::new()).await
}

/// Same, also harvesting `hosts` into the trust store
async fn fixture_harvesting(
    pki: &Pki,
    trust_test_ca: bool,
    send_timeout: Duration,
    hosts: Vec<HostPort>,
) -> Fixture {
    let ca_pem = pem::encode(&pem::Pem::new("CERTIFICATE", pki.ca_der.clone()));
    let root_server = spawn_http_server(ca_pem.into_bytes()).await;
    let dir = tempfile::tempdir().unwrap();

    let config = TransmitConfig {
        trust_store_path: dir.path().join("custom.json"),
        root_certificate_urls: if trust_test_ca {
            vec![root_server.url("http", "/ac-teste.crt")]
        } else {
            Vec::new()
        },
        platform_roots: PlatformRoots::Webpki,
        connect_timeout: send_timeout,
        send_timeout,
        harvest_timeout: Duration::from_secs(5),
        ..TransmitConfig::default()
    };

    let builder = Arc::new(TrustStoreBuilder::new(&config, hosts).unwrap());
    let trust = Arc::new(TrustManagerProvider::new(builder, config.platform_roots));
    let credentials = Arc::new(CredentialStore::new());
    let factory = SecureChannelFactory::new(Arc::clone(&credentials), trust, &config);

    Fixture {
        factory,
        taxpayer: identity(&pki.write_bundle(dir.path())),
        credentials,
        _root_server: root_server,
        _dir: dir,
    }
}

#[tokio::test]
async fn channel_presents_taxpayer_certificate() {
    let pki = Pki::generate();
    let mut server = spawn_tls_server(pki.server_config(true), 200, REPLY).await;
    let fixture = fixture(&pki, true, Duration::from_secs(10)).await;

    let channel = fixture.factory.channel_for(&fixture.taxpayer).await.expect("channel");
    assert_eq!(channel.fiscal_id(), FISCAL_ID);

    let address = server.url("https", "/ws/nfestatusservico4.asmx");
    let response = channel.post_soap(&address, ENVELOPE).await.expect("mTLS exchange");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, REPLY);

    let received = server.requests.recv().await.expect("request received");
    assert!(received.head.starts_with("POST /ws/nfestatusservico4.asmx HTTP/1.1"));
    assert!(received
        .head
        .to_ascii_lowercase()
        .contains(&format!("content-type: {SOAP_CONTENT_TYPE}")));
    assert_eq!(received.body, ENVELOPE);
    assert_eq!(received.client_certificate, Some(pki.taxpayer_der.clone()));
}

#[tokio::test]
async fn channel_is_built_once_per_taxpayer() {
    let pki = Pki::generate();
    let server = spawn_tls_server(pki.server_config(true), 200, REPLY).await;
    let fixture = fixture(&pki, true, Duration::from_secs(10)).await;

    let first = fixture.factory.channel_for(&fixture.taxpayer).await.unwrap();
    let second = fixture.factory.channel_for(&fixture.taxpayer).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // The transport seam reuses the cached channel too
    let address = server.url("https", "/ws/status");
    let response = fixture
        .factory
        .send(&fixture.taxpayer, &address, ENVELOPE)
        .await
        .unwrap();
    assert_eq!(response.body, REPLY);

    let stats = fixture.factory.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(fixture.credentials.stats().decryptions, 1);

    assert!(fixture.factory.evict(FISCAL_ID));
    let rebuilt = fixture.factory.channel_for(&fixture.taxpayer).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    // The credential itself stays cached
    assert_eq!(fixture.credentials.stats().decryptions, 1);
}

#[tokio::test]
async fn error_status_keeps_the_body() {
    let pki = Pki::generate();
    let server = spawn_tls_server(pki.server_config(true), 500, "<soap:Fault/>").await;
    let fixture = fixture(&pki, true, Duration::from_secs(10)).await;

    let result = fixture
        .factory
        .send(&fixture.taxpayer, &server.url("https", "/ws/status"), ENVELOPE)
        .await;
    assert_eq!(
        result,
        Err(TransportError::Status {
            status: 500,
            body: "<soap:Fault/>".to_string(),
        })
    );
}

#[tokio::test]
async fn untrusted_server_is_rejected() {
    let pki = Pki::generate();
    let server = spawn_tls_server(pki.server_config(true), 200, REPLY).await;
    let fixture = fixture(&pki, false, Duration::from_secs(10)).await;

    let result = fixture
        .factory
        .send(&fixture.taxpayer, &server.url("https", "/ws/status"), ENVELOPE)
        .await;
    assert!(matches!(result, Err(TransportError::Network(_))), "{result:?}");
}

#[tokio::test]
async fn silent_endpoint_times_out() {
    let pki = Pki::generate();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let fixture = fixture(&pki, true, Duration::from_secs(1)).await;

    let result = fixture
        .factory
        .send(
            &fixture.taxpayer,
            &format!("https://127.0.0.1:{port}/ws/status"),
            ENVELOPE,
        )
        .await;
    assert!(matches!(result, Err(TransportError::Timeout(_))), "{result:?}");
}

#[tokio::test]
async fn unreadable_bundle_fails_channel_construction() {
    let pki = Pki::generate();
    let fixture = fixture(&pki, true, Duration::from_secs(10)).await;
    let stranger = TaxpayerIdentity::new(
        "99888777000166",
        "/nonexistent/bundle.pfx",
        secrecy::SecretString::from("x"),
        "SP",
    );

    let result = fixture.factory.channel_for(&stranger).await;
    assert!(matches!(
        result,
        Err(fiscal_transmit::ChannelError::Credential(
            fiscal_transmit::CredentialError::BundleUnreadable { .. }
        ))
    ));
}

#[tokio::test]
async fn host_is_trusted_through_its_harvested_leaf() {
    let pki = Pki::generate();
    let mut server = spawn_tls_server(
        pki.server_config_with(ServerOptions {
            require_client_certificate: true,
            tls12_only: false,
            leaf_only: true,
        }),
        200,
        REPLY,
    )
    .await;
    let host = HostPort::new("127.0.0.1", server.port());
    let fixture = fixture_harvesting(&pki, false, Duration::from_secs(10), vec![host]).await;

    let address = server.url("https", "/ws/nfestatusservico4.asmx");
    let response = fixture
        .factory
        .send(&fixture.taxpayer, &address, ENVELOPE)
        .await
        .expect("leaf pinned by harvesting");
    assert_eq!(response.body, REPLY);

    let received = server.requests.recv().await.expect("request received");
    assert_eq!(received.client_certificate, Some(pki.taxpayer_der.clone()));
}

#[tokio::test]
async fn leaf_from_another_host_is_not_trusted() {
    let pki = Pki::generate();
    let other = Pki::named("AC OUTRA", "nfe.outra.test");
    let harvested = spawn_tls_server(
        other.server_config_with(ServerOptions {
            leaf_only: true,
            ..ServerOptions::default()
        }),
        200,
        REPLY,
    )
    .await;
    let server = spawn_tls_server(
        pki.server_config_with(ServerOptions {
            require_client_certificate: true,
            tls12_only: false,
            leaf_only: true,
        }),
        200,
        REPLY,
    )
    .await;
    let host = HostPort::new("127.0.0.1", harvested.port());
    let fixture = fixture_harvesting(&pki, false, Duration::from_secs(10), vec![host]).await;

    let address = server.url("https", "/ws/status");
    let result = fixture.factory.send(&fixture.taxpayer, &address, ENVELOPE).await;
    assert!(matches!(result, Err(TransportError::Network(_))), "{result:?}");
}
