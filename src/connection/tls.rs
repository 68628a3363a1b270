//! TLS configuration for secure sessions.
//!
//! A [`TlsConfig`] binds a root CA pool and, optionally, one client
//! certificate/key pair. How strictly the server certificate is checked
//! follows the libpq `sslmode` set.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// SSL/TLS connection mode matching PostgreSQL `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    #[default]
    Disable,
    /// TLS required, server certificate is not verified
    Require,
    /// TLS required, server certificate must chain to a trusted CA
    VerifyCa,
    /// TLS required, chain and hostname are both verified
    VerifyFull,
}

impl SslMode {
    /// Whether this mode negotiates TLS at all
    pub fn is_secure(&self) -> bool {
        !matches!(self, Self::Disable)
    }

    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Map the numeric transport code (0..=3).
    ///
    /// Unknown codes fall back to `Disable` with a warning.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Disable,
            1 => Self::Require,
            2 => Self::VerifyCa,
            3 => Self::VerifyFull,
            other => {
                tracing::warn!(code = other, "sslmode code is not supported, using disable");
                Self::Disable
            }
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, require, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// Compiled TLS settings for one secure session profile
#[derive(Clone)]
pub struct TlsConfig {
    mode: SslMode,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder for `mode`
    pub fn builder(mode: SslMode) -> TlsConfigBuilder {
        TlsConfigBuilder {
            mode,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }

    /// The rustls ClientConfig for the handshake
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Verification mode this profile was built for
    pub fn mode(&self) -> SslMode {
        self.mode
    }

    /// Whether a client certificate is presented
    pub fn has_client_cert(&self) -> bool {
        self.client_cert_path.is_some()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("mode", &self.mode)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for [`TlsConfig`]
#[derive(Debug, Clone)]
pub struct TlsConfigBuilder {
    mode: SslMode,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
}

impl TlsConfigBuilder {
    /// Root CA file (PEM). Without it the system roots are used.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Client certificate chain (PEM)
    pub fn client_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    /// Client private key (PEM)
    pub fn client_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Read the certificate files and compile the rustls configuration.
    ///
    /// # Errors
    ///
    /// Fails if a file cannot be read or parsed, if only one half of the
    /// client pair is given, or if `mode` is `Disable`.
    pub fn build(self) -> Result<TlsConfig> {
        if !self.mode.is_secure() {
            return Err(Error::Config("sslmode=disable has no TLS profile".into()));
        }

        let roots = match &self.ca_cert_path {
            Some(path) => load_ca_file(path)?,
            None => system_roots(),
        };

        let builder = ClientConfig::builder().with_root_certificates(roots.clone());
        let mut config = match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                let chain = load_cert_chain(cert)?;
                let key = load_private_key(key)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| Error::Tls(format!("invalid client certificate pair: {}", e)))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(Error::Config(
                    "client certificate and key must be configured together".into(),
                ))
            }
        };

        let provider = config.crypto_provider().clone();
        match self.mode {
            SslMode::Require => {
                config
                    .dangerous()
                    .set_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }));
            }
            SslMode::VerifyCa => {
                let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .map_err(|e| Error::Tls(format!("cannot build certificate verifier: {}", e)))?;
                config
                    .dangerous()
                    .set_certificate_verifier(Arc::new(SkipHostnameVerification { inner }));
            }
            SslMode::VerifyFull | SslMode::Disable => {}
        }

        Ok(TlsConfig {
            mode: self.mode,
            ca_cert_path: self.ca_cert_path,
            client_cert_path: self.client_cert_path,
            client_config: Arc::new(config),
        })
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| Error::Tls(format!("failed to read {} '{}': {}", what, path.display(), e)))
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::Tls(format!("failed to parse certificate '{}'", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no valid certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path, "private key")?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|_| Error::Tls(format!("failed to parse private key '{}'", path.display())))?
        .ok_or_else(|| Error::Tls(format!("no private key found in '{}'", path.display())))
}

fn load_ca_file(path: &Path) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(load_cert_chain(path)?);
    if added == 0 {
        return Err(Error::Tls(format!(
            "no usable CA certificates in '{}'",
            path.display()
        )));
    }
    Ok(store)
}

/// Native roots, or the bundled webpki roots when the platform has none
fn system_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::debug!(errors = native.errors.len(), "some native root certificates failed to load");
    }

    let mut store = RootCertStore::empty();
    store.add_parsable_certificates(native.certs);
    if store.is_empty() {
        tracing::warn!("no native root certificates found, using bundled webpki roots");
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

/// `sslmode=require`: encrypt, but trust whatever certificate the server shows
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// `sslmode=verify-ca`: full chain validation, hostname mismatch tolerated
#[derive(Debug)]
struct SkipHostnameVerification {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for SkipHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            // NotValidForName and its context-carrying variant
            Err(rustls::Error::InvalidCertificate(e))
                if format!("{:?}", e).starts_with("NotValidForName") =>
            {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is empty, too long, or has invalid characters.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Tls(format!("invalid hostname for TLS: '{}'", hostname)));
    }

    // ':' admits IPv6 literals
    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':')
    {
        return Err(Error::Tls(format!("invalid hostname for TLS: '{}'", hostname)));
    }

    Ok(hostname.to_string())
}
