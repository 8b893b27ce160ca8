//! rustls client configuration from in-memory PEM material.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::error::{ClientError, Result};
use crate::options::SecurityInfo;

/// Build a rustls ClientConfig from the session's security material.
pub fn build_client_config(security: &SecurityInfo) -> Result<ClientConfig> {
    let builder = if security.accept_invalid_certs {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
    } else {
        let mut root_store = RootCertStore::empty();
        if let Some(ca) = &security.root_ca {
            for cert in parse_certs(ca, "CA cert")? {
                root_store
                    .add(cert)
                    .map_err(|e| ClientError::Tls(format!("Failed to add CA cert: {}", e)))?;
            }
        } else {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        ClientConfig::builder().with_root_certificates(root_store)
    };

    let mut config = with_client_auth(builder, security)?;
    config.alpn_protocols = security
        .alpn_protocols
        .iter()
        .map(|p| p.as_bytes().to_vec())
        .collect();
    Ok(config)
}

fn with_client_auth(
    builder: rustls::ConfigBuilder<ClientConfig, rustls::client::WantsClientCert>,
    security: &SecurityInfo,
) -> Result<ClientConfig> {
    match (&security.client_cert, &security.private_key) {
        (Some(cert), Some(key)) => {
            let certs = parse_certs(cert, "client cert")?;
            let mut reader: &[u8] = key.as_ref();
            let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut reader)
                .map_err(|e| ClientError::Tls(format!("Failed to parse client key: {}", e)))?
                .ok_or_else(|| ClientError::Tls("No private key found".to_string()))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::Tls(format!("Failed to configure client auth: {}", e)))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn parse_certs(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Tls(format!("Failed to parse {}: {}", what, e)))?;
    if certs.is_empty() {
        return Err(ClientError::Tls(format!("No certificate found in {}", what)));
    }
    Ok(certs)
}

/// Danger: A certificate verifier that accepts any certificate.
/// Only use for testing with self-signed certificates.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}
