//! Certificate provisioning
//!
//! When a secure transport mode is configured with complete inline
//! material, the CA, certificate and key are written to their target
//! paths before the first connect attempt. Otherwise the configured paths
//! are trusted as-is and problems surface at TLS handshake time.

use crate::config::{CertPaths, CertificateMaterial};
use crate::connection::{SslMode, TlsConfig};
use crate::{Error, Result};
use std::path::Path;

/// Materialize `material` and return the paths the driver should use.
///
/// Incomplete inline content is a no-op returning the configured paths.
/// Any directory or write failure fails the whole step.
pub async fn provision(material: &CertificateMaterial) -> Result<CertPaths> {
    let paths = &material.paths;
    if !material.sources.is_complete() {
        tracing::debug!("inline certificate material incomplete, using configured paths");
        return Ok(paths.clone());
    }

    let artifacts = [
        (&paths.ca, &material.sources.ca),
        (&paths.cert, &material.sources.cert),
        (&paths.key, &material.sources.key),
    ];

    for (path, content) in artifacts {
        ensure_parent(path).await?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| Error::Provisioning {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "certificate written");
    }

    crate::metrics::counters::certs_provisioned();
    Ok(paths.clone())
}

async fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| Error::Provisioning {
                path: dir.to_path_buf(),
                source,
            }),
        _ => Ok(()),
    }
}

/// TLS profile binding the CA pool and the certificate/key pair.
///
/// Files are read here. Without a CA file the platform roots are used;
/// the certificate and key are attached only as a pair.
pub fn tls_profile(
    mode: SslMode,
    ca: Option<&Path>,
    cert: Option<&Path>,
    key: Option<&Path>,
) -> Result<TlsConfig> {
    let mut builder = TlsConfig::builder(mode);
    if let Some(ca) = ca {
        builder = builder.ca_cert_path(ca);
    }
    if let Some(cert) = cert {
        builder = builder.client_cert_path(cert);
    }
    if let Some(key) = key {
        builder = builder.client_key_path(key);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CertSources;

    #[tokio::test]
    async fn test_complete_material_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths::in_dir(dir.path().join("nested/ssl"));
        let material = CertificateMaterial::inline(
            CertSources::new("CA-BYTES", "CERT-BYTES", "KEY-BYTES"),
            paths.clone(),
        );

        let written = provision(&material).await.unwrap();
        assert_eq!(written, paths);
        assert_eq!(std::fs::read(&paths.ca).unwrap(), b"CA-BYTES");
        assert_eq!(std::fs::read(&paths.cert).unwrap(), b"CERT-BYTES");
        assert_eq!(std::fs::read(&paths.key).unwrap(), b"KEY-BYTES");

        // existing directory is fine
        provision(&material).await.unwrap();
    }

    #[test]
    fn test_incomplete_material_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths::in_dir(dir.path().join("ssl"));
        let material = CertificateMaterial::inline(
            CertSources::new("CA-BYTES", "", "KEY-BYTES"),
            paths.clone(),
        );

        let returned = tokio_test::block_on(provision(&material)).unwrap();
        assert_eq!(returned, paths);
        assert!(!dir.path().join("ssl").exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let material = CertificateMaterial::inline(
            CertSources::new("a", "b", "c"),
            CertPaths::in_dir(blocker.join("ssl")),
        );
        let err = provision(&material).await.unwrap_err();
        assert!(matches!(err, Error::Provisioning { .. }));
    }

    #[test]
    fn test_tls_profile_missing_files_fail() {
        let paths = CertPaths::in_dir("/nonexistent/pgkeeper");
        let profile = tls_profile(
            SslMode::VerifyCa,
            Some(&paths.ca),
            Some(&paths.cert),
            Some(&paths.key),
        );
        assert!(profile.is_err());
    }
}
