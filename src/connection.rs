//! IMAP transport: TCP, TLS and authentication
//!
//! Provides the low-level `connect()` used by
//! [`ImapConnection`](crate::ImapConnection). Supports implicit TLS and
//! STARTTLS, password and XOAUTH2 logins, and optional connect/auth
//! timeouts.

use crate::config::{Credentials, ImapConfig, TlsMode};
use crate::error::{Error, Result};
use async_imap::{Authenticator, Client, Session};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

type TlsStream = Compat<tokio_rustls::client::TlsStream<TcpStream>>;

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<TlsStream>;

/// Build a TLS connector.
///
/// Uses the webpki root store unless `accept_invalid_certs` is set, in
/// which case every certificate is accepted (local bridges with
/// self-signed certificates).
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    // Several rustls providers may be compiled in; pin ring. Fails
    // harmlessly when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = if accept_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Connection(format!("{what} timed out after {limit:?}")))?,
        None => fut.await,
    }
}

/// Open a fresh TLS-wrapped, authenticated IMAP session.
///
/// `connect_timeout` bounds everything up to the greeting (TCP, STARTTLS
/// and the TLS handshake); `auth_timeout` bounds the login.
///
/// # Errors
///
/// Returns [`Error::Connection`] for TCP, greeting, authentication and
/// timeout failures, and [`Error::Tls`] for handshake failures.
pub async fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {}", addr);

    let tls_client = with_timeout(
        config.connect_timeout,
        "connection setup",
        open_transport(config, &addr),
    )
    .await?;

    let session = with_timeout(
        config.auth_timeout,
        "authentication",
        authenticate(tls_client, &config.credentials),
    )
    .await?;

    info!(
        host = %config.host,
        user = config.credentials.username(),
        "Connected to IMAP server"
    );
    Ok(session)
}

/// TCP, then TLS (directly or after STARTTLS), ready for login.
async fn open_transport(config: &ImapConfig, addr: &str) -> Result<Client<TlsStream>> {
    let tcp_stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::Connection(format!("TCP connect to {addr} failed: {e}")))?;

    let connector = tls_connector(config.accept_invalid_certs);
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    match config.tls {
        TlsMode::StartTls => {
            let mut client = Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;

            let inner = client.into_inner().into_inner();
            let tls_stream = connector
                .connect(server_name, inner)
                .await
                .map_err(|e| Error::Tls(e.to_string()))?;
            Ok(Client::new(tls_stream.compat()))
        }
        TlsMode::Implicit => {
            let tls_stream = connector
                .connect(server_name, tcp_stream)
                .await
                .map_err(|e| Error::Tls(e.to_string()))?;
            let mut client = Client::new(tls_stream.compat());
            let greeting = client
                .read_response()
                .await
                .map_err(|e| Error::Connection(format!("IMAP greeting failed: {e}")))?;
            if greeting.is_none() {
                return Err(Error::Connection(
                    "IMAP server closed connection before greeting".into(),
                ));
            }
            Ok(client)
        }
    }
}

async fn authenticate(
    client: Client<TlsStream>,
    credentials: &Credentials,
) -> Result<ImapSession> {
    match credentials {
        Credentials::Password { username, password } => client
            .login(username, password)
            .await
            .map_err(|(e, _)| Error::Connection(format!("Login failed: {e}"))),
        Credentials::XOAuth2 {
            username,
            access_token,
        } => client
            .authenticate("XOAUTH2", XOAuth2::new(username, access_token))
            .await
            .map_err(|(e, _)| Error::Connection(format!("XOAUTH2 authentication failed: {e}"))),
    }
}

/// SASL XOAUTH2 initial response.
struct XOAuth2 {
    response: Vec<u8>,
}

impl XOAuth2 {
    fn new(user: &str, access_token: &str) -> Self {
        Self {
            response: format!("user={user}\x01auth=Bearer {access_token}\x01\x01").into_bytes(),
        }
    }
}

impl Authenticator for XOAuth2 {
    type Response = Vec<u8>;

    // A second challenge means the token was rejected; answering it
    // with an empty response lets the server report the failure.
    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

/// Certificate verifier that accepts all certificates.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
