//! Connection configuration
//!
//! [`ConnectionConfig`] is everything the supervisor needs to build a DSN:
//! credentials, network target, transport mode, timing, and certificate
//! material for secure transport.

use crate::connection::SslMode;
use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default port
pub const DEFAULT_PORT: u16 = 5432;
/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default health-check interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);
/// Default pause between connect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Certificate material: inline bytes to write, and where they live
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CertificateMaterial {
    /// Inline content; written to `paths` when all three are non-empty
    pub sources: CertSources,
    /// Target (or pre-existing) file locations
    pub paths: CertPaths,
}

impl CertificateMaterial {
    /// Material referencing existing files only
    pub fn from_paths(paths: CertPaths) -> Self {
        Self {
            sources: CertSources::default(),
            paths,
        }
    }

    /// Inline material written to `paths` on provisioning
    pub fn inline(sources: CertSources, paths: CertPaths) -> Self {
        Self { sources, paths }
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("inline", &self.sources.is_complete())
            .field("paths", &self.paths)
            .finish()
    }
}

/// Inline PEM content
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CertSources {
    /// Root CA
    pub ca: Vec<u8>,
    /// Certificate
    pub cert: Vec<u8>,
    /// Private key
    pub key: Vec<u8>,
}

impl CertSources {
    /// Inline content from PEM bytes
    pub fn new(ca: impl Into<Vec<u8>>, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            ca: ca.into(),
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// All three artifacts are present
    pub fn is_complete(&self) -> bool {
        !self.ca.is_empty() && !self.cert.is_empty() && !self.key.is_empty()
    }
}

/// File locations of the CA, certificate and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    /// Root CA file
    pub ca: PathBuf,
    /// Certificate file
    pub cert: PathBuf,
    /// Private key file
    pub key: PathBuf,
}

impl CertPaths {
    /// Paths from three locations
    pub fn new(ca: impl Into<PathBuf>, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            ca: ca.into(),
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// Default file names inside `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            ca: dir.join("db-ca-cert.pem"),
            cert: dir.join("db-server-cert.pem"),
            key: dir.join("db-server-key.pem"),
        }
    }
}

impl Default for CertPaths {
    fn default() -> Self {
        Self::in_dir("ssl")
    }
}

/// Connection settings for one supervised database
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Role name
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// Host name, address, or Unix socket directory
    pub host: String,
    /// Port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Extra driver parameters, rendered into the DSN in order
    pub options: Vec<(String, String)>,
    /// Transport mode
    pub sslmode: SslMode,
    /// Bound on one connect attempt; zero waits indefinitely
    pub connect_timeout: Duration,
    /// Health-check interval; zero disables the monitor
    pub ping_interval: Duration,
    /// Pause between failed connect attempts
    pub reconnect_interval: Duration,
    /// Certificate material for secure modes
    pub certs: CertificateMaterial,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let user = whoami::username();
        Self {
            database: user.clone(),
            user,
            password: None,
            host: "localhost".into(),
            port: DEFAULT_PORT,
            options: Vec::new(),
            sslmode: SslMode::Disable,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            certs: CertificateMaterial::default(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("options", &self.options)
            .field("sslmode", &self.sslmode)
            .field("connect_timeout", &self.connect_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("certs", &self.certs)
            .finish()
    }
}

impl ConnectionConfig {
    /// Start a builder for `database` as `user`
    pub fn builder(database: impl Into<String>, user: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                database: database.into(),
                user: user.into(),
                ..ConnectionConfig::default()
            },
        }
    }

    /// Defaults overlaid with the libpq environment variables
    /// (`PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD`, `PGDATABASE`,
    /// `PGSSLMODE`, `PGSSLROOTCERT`, `PGSSLCERT`, `PGSSLKEY`,
    /// `PGCONNECT_TIMEOUT`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = var("PGHOST") {
            config.host = host;
        }
        if let Some(port) = var("PGPORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::Config(format!("PGPORT: invalid port '{}'", port)))?;
        }
        if let Some(user) = var("PGUSER") {
            config.database = user.clone();
            config.user = user;
        }
        config.password = var("PGPASSWORD");
        if let Some(database) = var("PGDATABASE") {
            config.database = database;
        }
        if let Some(mode) = var("PGSSLMODE") {
            config.sslmode = mode.parse()?;
        }
        if let Some(ca) = var("PGSSLROOTCERT") {
            config.certs.paths.ca = ca.into();
        }
        if let Some(cert) = var("PGSSLCERT") {
            config.certs.paths.cert = cert.into();
        }
        if let Some(key) = var("PGSSLKEY") {
            config.certs.paths.key = key.into();
        }
        if let Some(timeout) = var("PGCONNECT_TIMEOUT") {
            let secs: u64 = timeout.parse().map_err(|_| {
                Error::Config(format!("PGCONNECT_TIMEOUT: invalid seconds '{}'", timeout))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Render a keyword/value DSN.
    ///
    /// In secure modes `paths` (the provisioned or configured certificate
    /// files) become `sslrootcert`/`sslcert`/`sslkey`.
    pub fn to_dsn(&self, paths: Option<&CertPaths>) -> String {
        let mut parts = vec![
            ("user", self.user.clone()),
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("dbname", self.database.clone()),
        ];
        if let Some(password) = &self.password {
            parts.insert(1, ("password", password.clone()));
        }
        if !self.connect_timeout.is_zero() {
            // libpq granularity is whole seconds
            let secs = self.connect_timeout.as_secs_f64().ceil().max(1.0) as u64;
            parts.push(("connect_timeout", secs.to_string()));
        }
        parts.push(("sslmode", self.sslmode.to_string()));

        if self.sslmode.is_secure() {
            let paths = paths.unwrap_or(&self.certs.paths);
            parts.push(("sslcert", paths.cert.display().to_string()));
            parts.push(("sslkey", paths.key.display().to_string()));
            parts.push(("sslrootcert", paths.ca.display().to_string()));
        }

        let mut dsn = parts
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote(v)))
            .collect::<Vec<_>>();
        dsn.extend(
            self.options
                .iter()
                .map(|(k, v)| format!("{}={}", k, quote(v))),
        );
        dsn.join(" ")
    }

    /// `host:port/database`, for logs
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Quote a DSN value if it is empty or contains spaces, quotes or backslashes
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set host (or Unix socket directory)
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Append an extra driver parameter
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.options.push((key.into(), value.into()));
        self
    }

    /// Set transport mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.config.sslmode = mode;
        self
    }

    /// Set transport mode from its numeric code (0..=3); unknown codes fall
    /// back to `disable`
    pub fn sslmode_code(mut self, code: u8) -> Self {
        self.config.sslmode = SslMode::from_code(code);
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set health-check interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set pause between connect attempts
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Set certificate material
    pub fn certificates(mut self, certs: CertificateMaterial) -> Self {
        self.config.certs = certs;
        self
    }

    /// Finish
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ConnectionInfo, Target};
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(1));
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
        assert_eq!(config.sslmode, SslMode::Disable);
        assert_eq!(config.certs.paths.ca, PathBuf::from("ssl/db-ca-cert.pem"));
        assert_eq!(config.certs.paths.key, PathBuf::from("ssl/db-server-key.pem"));
    }

    #[test]
    fn test_plain_dsn() {
        let config = ConnectionConfig::builder("main", "app")
            .password("secret")
            .host("db")
            .port(6432)
            .option("application_name", "keeper")
            .build();
        assert_eq!(
            config.to_dsn(None),
            "user=app password=secret host=db port=6432 dbname=main connect_timeout=10 sslmode=disable application_name=keeper"
        );
    }

    #[test]
    fn test_secure_dsn_uses_given_paths() {
        let config = ConnectionConfig::builder("main", "app")
            .sslmode(SslMode::VerifyCa)
            .connect_timeout(Duration::ZERO)
            .build();
        let paths = CertPaths::new("/tmp/ca.pem", "/tmp/c.pem", "/tmp/k.pem");
        let dsn = config.to_dsn(Some(&paths));
        assert!(dsn.ends_with(
            "sslmode=verify-ca sslcert=/tmp/c.pem sslkey=/tmp/k.pem sslrootcert=/tmp/ca.pem"
        ));
        assert!(!dsn.contains("connect_timeout"));
    }

    #[test]
    fn test_dsn_quoting_round_trips_through_parser() {
        let config = ConnectionConfig::builder("my db", "app")
            .password(r"it's a \ secret")
            .build();
        let info = ConnectionInfo::parse(&config.to_dsn(None)).unwrap();
        assert_eq!(info.password.as_deref(), Some(r"it's a \ secret"));
        assert_eq!(info.database, "my db");
        assert_eq!(
            info.target,
            Target::Tcp {
                host: "localhost".into(),
                port: 5432
            }
        );
    }

    #[test]
    fn test_unknown_sslmode_code_falls_back_to_disable() {
        let config = ConnectionConfig::builder("d", "u").sslmode_code(9).build();
        assert_eq!(config.sslmode, SslMode::Disable);
        let config = ConnectionConfig::builder("d", "u").sslmode_code(3).build();
        assert_eq!(config.sslmode, SslMode::VerifyFull);
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("PGHOST", "db.internal"),
            ("PGPORT", "6543"),
            ("PGUSER", "svc"),
            ("PGPASSWORD", "pw"),
            ("PGSSLMODE", "require"),
            ("PGSSLROOTCERT", "/etc/ca.pem"),
            ("PGCONNECT_TIMEOUT", "3"),
        ]
        .into_iter()
        .collect();
        let config =
            ConnectionConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.user, "svc");
        assert_eq!(config.database, "svc");
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.sslmode, SslMode::Require);
        assert_eq!(config.certs.paths.ca, PathBuf::from("/etc/ca.pem"));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_from_lookup_rejects_bad_port() {
        let result = ConnectionConfig::from_lookup(|k| (k == "PGPORT").then(|| "x".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ConnectionConfig::builder("d", "u").password("hunter2").build();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_cert_sources_completeness() {
        assert!(!CertSources::default().is_complete());
        assert!(!CertSources::new("ca", "", "key").is_complete());
        assert!(CertSources::new("ca", "cert", "key").is_complete());
    }
}
