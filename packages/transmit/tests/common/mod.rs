//! Shared fixtures: a throwaway PKI, PKCS#12 bundles and local servers

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use fiscal_transmit::TaxpayerIdentity;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair, SanType};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub const FISCAL_ID: &str = "11222333000181";
pub const PASSPHRASE: &str = "senha-do-certificado";

/// One RSA key per test binary; generation is slow
fn taxpayer_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).expect("rsa key"))
}

/// A CA issuing a server certificate for 127.0.0.1 and a taxpayer certificate
pub struct Pki {
    pub ca_der: Vec<u8>,
    pub server_der: Vec<u8>,
    pub server_key_der: Vec<u8>,
    pub taxpayer_der: Vec<u8>,
    pub taxpayer_key_der: Vec<u8>,
}

impl Pki {
    pub fn generate() -> Self {
        Self::named("AC TESTE SEFAZ", "nfe.sefaz.test")
    }

    pub fn named(ca_name: &str, server_name: &str) -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, ca_name);
        let ca_key = KeyPair::generate().expect("ca key");
        let ca_cert = ca_params.clone().self_signed(&ca_key).expect("ca certificate");
        let issuer = Issuer::new(ca_params, ca_key);

        let mut server_params = CertificateParams::new(Vec::<String>::new()).expect("server params");
        server_params.subject_alt_names = vec![
            SanType::DnsName("localhost".try_into().expect("dns name")),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ];
        server_params.distinguished_name.push(DnType::CommonName, server_name);
        let server_key = KeyPair::generate().expect("server key");
        let server_cert = server_params.signed_by(&server_key, &issuer).expect("server certificate");

        let key = taxpayer_key();
        let key_pem = key.to_pkcs8_pem(LineEnding::LF).expect("pkcs8 pem");
        let taxpayer_pair = KeyPair::from_pem(&key_pem).expect("rcgen rsa key");
        let mut taxpayer_params =
            CertificateParams::new(Vec::<String>::new()).expect("taxpayer params");
        taxpayer_params
            .distinguished_name
            .push(DnType::CommonName, format!("EMPRESA TESTE LTDA:{FISCAL_ID}"));
        let taxpayer_cert = taxpayer_params
            .signed_by(&taxpayer_pair, &issuer)
            .expect("taxpayer certificate");

        Self {
            ca_der: ca_cert.der().to_vec(),
            server_der: server_cert.der().to_vec(),
            server_key_der: server_key.serialize_der(),
            taxpayer_der: taxpayer_cert.der().to_vec(),
            taxpayer_key_der: key.to_pkcs8_der().expect("pkcs8 der").as_bytes().to_vec(),
        }
    }

    /// PKCS#12 bundle with the taxpayer key, certificate and CA
    pub fn bundle(&self, passphrase: &str) -> Vec<u8> {
        p12::PFX::new(
            &self.taxpayer_der,
            &self.taxpayer_key_der,
            Some(&self.ca_der),
            passphrase,
            "taxpayer",
        )
        .expect("pkcs12 bundle")
        .to_der()
    }

    /// PKCS#12 bundle holding the certificates and `key_entries` copies of the key
    ///
    /// Built from [`Pki::bundle`] by re-sequencing its safe contents: the
    /// encrypted certificate entry comes first, the shrouded key entry second.
    pub fn bundle_with_key_entries(&self, key_entries: usize, passphrase: &str) -> Vec<u8> {
        let pfx = p12::PFX::parse(&self.bundle(passphrase)).expect("parse bundle");
        let p12::ContentInfo::Data(contents) = &pfx.auth_safe else {
            panic!("bundle auth safe is not plain data");
        };
        let elements = der_elements(contents);
        assert_eq!(elements.len(), 2, "certificate and key contents");

        let mut rebuilt = vec![elements[0].clone()];
        rebuilt.extend(std::iter::repeat(elements[1].clone()).take(key_entries));
        let contents = der_sequence(&rebuilt);

        let bmp_passphrase: Vec<u8> = passphrase
            .encode_utf16()
            .flat_map(u16::to_be_bytes)
            .chain([0, 0])
            .collect();
        p12::PFX {
            version: 3,
            mac_data: Some(p12::MacData::new(&contents, &bmp_passphrase)),
            auth_safe: p12::ContentInfo::Data(contents),
        }
        .to_der()
    }

    pub fn write_bundle(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{FISCAL_ID}.pfx"));
        std::fs::write(&path, self.bundle(PASSPHRASE)).expect("write bundle");
        path
    }

    pub fn server_config(&self, require_client_certificate: bool) -> Arc<ServerConfig> {
        self.server_config_with(ServerOptions {
            require_client_certificate,
            ..ServerOptions::default()
        })
    }

    pub fn server_config_with(&self, options: ServerOptions) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider));
        let builder = if options.tls12_only {
            builder.with_protocol_versions(&[&rustls::version::TLS12])
        } else {
            builder.with_safe_default_protocol_versions()
        }
        .expect("protocol versions");

        let builder = if options.require_client_certificate {
            let mut roots = RootCertStore::empty();
            roots
                .add(CertificateDer::from(self.ca_der.clone()))
                .expect("client root");
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .expect("client verifier");
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        let mut chain = vec![CertificateDer::from(self.server_der.clone())];
        if !options.leaf_only {
            chain.push(CertificateDer::from(self.ca_der.clone()));
        }
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key_der.clone()));
        let mut config = builder.with_single_cert(chain, key).expect("server config");
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

/// How a local TLS server presents itself
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    pub require_client_certificate: bool,
    pub tls12_only: bool,
    /// Send the leaf without its issuing CA
    pub leaf_only: bool,
}

/// Header length and content length of the DER element at the start of `bytes`
fn der_header(bytes: &[u8]) -> (usize, usize) {
    let first = bytes[1];
    if first < 0x80 {
        return (2, usize::from(first));
    }
    let count = usize::from(first & 0x7f);
    let length = bytes[2..2 + count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    (2 + count, length)
}

/// Elements of a DER SEQUENCE, each with its own header
fn der_elements(sequence: &[u8]) -> Vec<Vec<u8>> {
    let (header, length) = der_header(sequence);
    let mut body = &sequence[header..header + length];
    let mut elements = Vec::new();
    while !body.is_empty() {
        let (header, length) = der_header(body);
        elements.push(body[..header + length].to_vec());
        body = &body[header + length..];
    }
    elements
}

fn der_sequence(elements: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = elements.concat();
    let mut encoded = vec![0x30];
    if body.len() < 0x80 {
        encoded.push(u8::try_from(body.len()).expect("short length"));
    } else {
        let length = body.len().to_be_bytes();
        let significant: Vec<u8> = length.iter().copied().skip_while(|b| *b == 0).collect();
        encoded.push(0x80 | u8::try_from(significant.len()).expect("length of length"));
        encoded.extend(significant);
    }
    encoded.extend(body);
    encoded
}

pub fn identity(bundle: &Path) -> TaxpayerIdentity {
    TaxpayerIdentity::new(FISCAL_ID, bundle, SecretString::from(PASSPHRASE), "SP")
}

/// A self-signed root as a root certificate server would publish it
pub fn root_certificate_pem(common_name: &str) -> String {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("root params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, common_name);
    let key = KeyPair::generate().expect("root key");
    params.self_signed(&key).expect("root certificate").pem()
}

/// An HTTP request as a local server received it
#[derive(Debug)]
pub struct ReceivedRequest {
    pub head: String,
    pub body: String,
    pub client_certificate: Option<Vec<u8>>,
}

pub struct LocalServer {
    pub addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<ReceivedRequest>,
    task: JoinHandle<()>,
}

impl LocalServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, scheme: &str, path: &str) -> String {
        format!("{scheme}://127.0.0.1:{}{path}", self.addr.port())
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Plain HTTP server answering every request with `body`
pub async fn spawn_http_server(body: Vec<u8>) -> LocalServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (sender, requests) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            let sender = sender.clone();
            tokio::spawn(async move {
                if let Some((head, request_body)) = read_request(&mut socket).await {
                    let _ = sender.send(ReceivedRequest {
                        head,
                        body: String::from_utf8_lossy(&request_body).into_owned(),
                        client_certificate: None,
                    });
                    write_response(&mut socket, 200, "application/x-x509-ca-cert", &body).await;
                }
            });
        }
    });

    LocalServer {
        addr,
        requests,
        task,
    }
}

/// HTTPS server answering every request with `status` and `body`
pub async fn spawn_tls_server(config: Arc<ServerConfig>, status: u16, body: &'static str) -> LocalServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let acceptor = TlsAcceptor::from(config);
    let (sender, requests) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let sender = sender.clone();
            tokio::spawn(async move {
                // Harvesting clients hang up right after the handshake
                let Ok(mut stream) = acceptor.accept(socket).await else {
                    return;
                };
                let client_certificate = stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|chain| chain.first())
                    .map(|leaf| leaf.as_ref().to_vec());
                if let Some((head, request_body)) = read_request(&mut stream).await {
                    let _ = sender.send(ReceivedRequest {
                        head,
                        body: String::from_utf8_lossy(&request_body).into_owned(),
                        client_certificate,
                    });
                    write_response(&mut stream, status, "application/soap+xml", body.as_bytes())
                        .await;
                }
            });
        }
    });

    LocalServer {
        addr,
        requests,
        task,
    }
}

/// A port nothing listens on
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Option<(String, Vec<u8>)> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(position) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break position + 4;
        }
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < head_end + content_length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    Some((head, buffer[head_end..].to_vec()))
}

async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    content_type: &str,
    body: &[u8],
) {
    let reason = if status == 200 { "OK" } else { "Error" };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(body).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}
