//! # Transport Credentials
//!
//! Builders for client- and server-side `rustls` configurations from PEM files on
//! disk. The resulting configs plug into [`crate::dial::blocking_dial`] on the client
//! side, or into any rustls-based server acceptor.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse certificates in {path}: {source}")]
    ParseCertificates {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("a client cert file requires a client key file")]
    MissingClientKey,

    #[error("could not load system root certificates: {0}")]
    NativeRoots(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error("invalid client certificate verifier: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),
}

/// Builds a client TLS configuration.
///
/// With `insecure_skip_verify` the peer certificate is accepted without
/// verification, overriding any CA file. Otherwise `ca_cert_file`, when given,
/// replaces the system root set. A client certificate is presented when
/// `client_cert_file` is given, in which case `client_key_file` is mandatory.
pub fn client_transport_credentials(
    insecure_skip_verify: bool,
    ca_cert_file: Option<&Path>,
    client_cert_file: Option<&Path>,
    client_key_file: Option<&Path>,
) -> Result<ClientConfig, TlsError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?;

    let builder = if insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
    } else {
        let roots = match ca_cert_file {
            Some(path) => root_store_from_file(path)?,
            None => native_roots()?,
        };
        builder.with_root_certificates(roots)
    };

    match (client_cert_file, client_key_file) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            Ok(builder.with_client_auth_cert(certs, key)?)
        }
        (Some(_), None) => Err(TlsError::MissingClientKey),
        (None, _) => Ok(builder.with_no_client_auth()),
    }
}

/// Builds a server TLS configuration. `server_cert_file` and `server_key_file`
/// are mandatory.
///
/// Client certificates are required and verified when `require_client_certs` is
/// set; verified only when presented if a CA file is given without the
/// requirement; and not requested otherwise. The CA file (or, absent one, the
/// system roots) anchors client-certificate verification.
pub fn server_transport_credentials(
    ca_cert_file: Option<&Path>,
    server_cert_file: &Path,
    server_key_file: &Path,
    require_client_certs: bool,
) -> Result<ServerConfig, TlsError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let certs = load_certs(server_cert_file)?;
    let key = load_key(server_key_file)?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?;

    let builder = match (require_client_certs, ca_cert_file) {
        (false, None) => builder.with_no_client_auth(),
        (require, ca_cert_file) => {
            let roots = match ca_cert_file {
                Some(path) => root_store_from_file(path)?,
                None => native_roots()?,
            };
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if require {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            builder.with_client_cert_verifier(verifier.build()?)
        }
    };

    Ok(builder.with_single_cert(certs, key)?)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = std::fs::File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::ParseCertificates {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = std::fs::File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::ParseCertificates {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

fn root_store_from_file(path: &Path) -> Result<RootCertStore, TlsError> {
    let certs = load_certs(path)?;
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(roots)
}

fn native_roots() -> Result<RootCertStore, TlsError> {
    let loaded = rustls_native_certs::load_native_certs();
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(loaded.certs);
    if added == 0 {
        let detail = loaded
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(TlsError::NativeRoots(detail));
    }
    Ok(roots)
}

/// Accepts any server certificate. Installed only when the caller explicitly
/// opted out of verification.
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
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_cert_without_key_is_rejected() {
        let err = client_transport_credentials(
            true,
            None,
            Some(Path::new("client.crt")),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::MissingClientKey));
    }

    #[test]
    fn skip_verify_needs_no_certificate_files() {
        let config = client_transport_credentials(true, None, None, None).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn missing_server_certificate_file_is_reported() {
        let err = server_transport_credentials(
            None,
            Path::new("does/not/exist.crt"),
            Path::new("does/not/exist.key"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }
}
