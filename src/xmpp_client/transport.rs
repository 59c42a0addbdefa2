//! TCP connection and in-band STARTTLS upgrade.

use std::sync::Arc;

use rcgen::{CertificateParams, DnType, DnValue};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use sha2::{Digest, Sha256};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};

use super::config::Config;
use super::error::XmppError;
use super::negotiation::negotiate_features;
use super::stanza::ns;
use super::stream::{split, BoxedStream, StanzaReader, StanzaWriter};

pub(crate) type Reader = StanzaReader<ReadHalf<BoxedStream>>;
pub(crate) type Writer = StanzaWriter<WriteHalf<BoxedStream>>;

/// Initialize rustls crypto provider (must be called once at startup)
fn init_crypto_provider() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Open the TCP connection and wrap it in a reader/writer pair.
pub(crate) async fn connect(address: &str, config: &Config) -> Result<(Reader, Writer), XmppError> {
    config.report(&format!("Making TCP connection to {address}"));
    let tcp = TcpStream::connect(address).await.map_err(|e| {
        error!(address, error = %e, "TCP connect failed");
        e
    })?;
    if let Err(e) = tcp.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    info!(address, "TCP connection established");

    Ok(split(
        Box::new(tcp),
        config.inbound_capture.clone(),
        config.outbound_capture.clone(),
    ))
}

/// Create a TLS connector trusting the configured roots, or the system's
/// native root certificates when none are configured.
fn create_tls_connector(config: &Config) -> Result<TlsConnector, XmppError> {
    init_crypto_provider();

    let mut root_store = RootCertStore::empty();
    if config.root_certificates.is_empty() {
        let native_certs = rustls_native_certs::load_native_certs();
        for e in &native_certs.errors {
            warn!(error = %e, "Failed to load a native root certificate");
        }
        if native_certs.certs.is_empty() {
            return Err(XmppError::TlsHandshake(
                "No system root certificates found. \
                Ensure CA certificates are installed (e.g., ca-certificates package on Linux)."
                    .to_string(),
            ));
        }
        for cert in native_certs.certs {
            root_store
                .add(cert)
                .map_err(|e| XmppError::TlsHandshake(format!("Failed to add cert: {}", e)))?;
        }
    } else {
        for cert in &config.root_certificates {
            root_store
                .add(cert.clone())
                .map_err(|e| XmppError::TlsHandshake(format!("Failed to add cert: {}", e)))?;
        }
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Perform XMPP STARTTLS negotiation on the plaintext stream.
///
/// Protocol flow:
/// 1. Open a stream to `domain` and read its features (must contain `<starttls>`)
/// 2. Send `<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>`
/// 3. Read `<proceed/>`; anything else aborts
/// 4. Run the TLS handshake on the same socket, with `domain` for SNI
/// 5. Check the presented chain and the certificate name
///
/// Returns a fresh reader/writer pair over the encrypted channel.
pub(crate) async fn starttls(
    mut reader: Reader,
    mut writer: Writer,
    domain: &str,
    config: &Config,
) -> Result<(Reader, Writer), XmppError> {
    let features = negotiate_features(&mut reader, &mut writer, domain).await?;
    if features.starttls.is_none() {
        warn!(domain, "STARTTLS: Server does not offer STARTTLS");
        return Err(XmppError::TlsNotOffered);
    }
    debug!("STARTTLS: Server offers STARTTLS, proceeding");

    writer
        .send(&format!("<starttls xmlns='{}'/>", ns::TLS))
        .await?;

    let proceed = reader.next_element().await?;
    if !proceed.is(ns::TLS, "proceed") {
        warn!(namespace = %proceed.namespace, name = %proceed.name, "STARTTLS: Unexpected response");
        return Err(XmppError::unexpected(
            "proceed",
            &proceed.namespace,
            &proceed.name,
        ));
    }
    info!(domain, "STARTTLS: Received <proceed/>, upgrading to TLS");
    config.report("Starting TLS handshake");

    let connector = create_tls_connector(config)?;
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|e| XmppError::TlsHandshake(format!("Invalid server name: {}", e)))?;

    let stream = reader.unsplit(writer);
    let tls_stream = connector.connect(server_name, stream).await.map_err(|e| {
        error!(domain, error = %e, "TLS handshake failed");
        XmppError::TlsHandshake(e.to_string())
    })?;

    let chain = tls_stream.get_ref().1.peer_certificates().unwrap_or_default();
    for (i, cert) in chain.iter().enumerate() {
        let line = match subject_name(cert) {
            Some(subject) => format!("  certificate {}: {} SHA-256 {}", i, subject, fingerprint(cert)),
            None => format!("  certificate {}: SHA-256 {}", i, fingerprint(cert)),
        };
        config.report(&line);
    }
    verify_peer_chain(chain, domain)?;
    info!(domain, certificates = chain.len(), "STARTTLS: TLS handshake complete");

    Ok(split(
        Box::new(tls_stream),
        config.inbound_capture.clone(),
        config.outbound_capture.clone(),
    ))
}

/// Require a non-empty chain whose end-entity certificate is valid for `domain`.
pub(crate) fn verify_peer_chain(
    chain: &[CertificateDer<'_>],
    domain: &str,
) -> Result<(), XmppError> {
    let Some(end_entity) = chain.first() else {
        error!(domain, "Server presented no certificates");
        return Err(XmppError::CertificateVerification);
    };

    let mismatch = |reason: String| XmppError::HostnameMismatch {
        domain: domain.to_string(),
        reason,
    };
    let name = ServerName::try_from(domain).map_err(|e| mismatch(e.to_string()))?;
    let cert = webpki::EndEntityCert::try_from(end_entity).map_err(|e| mismatch(e.to_string()))?;
    cert.verify_is_valid_for_subject_name(&name)
        .map_err(|e| mismatch(e.to_string()))
}

/// Subject as `O=.../OU=.../CN=.../`, or `None` if the certificate can't be parsed.
fn subject_name(cert: &CertificateDer<'_>) -> Option<String> {
    let params = CertificateParams::from_ca_cert_der(cert)
        .map_err(|e| debug!(error = %e, "Could not read certificate subject"))
        .ok()?;
    let subject = &params.distinguished_name;

    let mut name = String::new();
    for (label, field) in [
        ("O", DnType::OrganizationName),
        ("OU", DnType::OrganizationalUnitName),
        ("CN", DnType::CommonName),
    ] {
        if let Some(value) = subject.get(&field).and_then(dn_text) {
            name.push_str(&format!("{label}={value}/"));
        }
    }
    Some(name)
}

fn dn_text(value: &DnValue) -> Option<&str> {
    match value {
        DnValue::Utf8String(s) => Some(s.as_str()),
        DnValue::PrintableString(s) => Some(s.as_str()),
        DnValue::Ia5String(s) => Some(s.as_str()),
        DnValue::TeletexString(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Colon-separated uppercase SHA-256 of a DER certificate.
fn fingerprint(cert: &CertificateDer<'_>) -> String {
    Sha256::digest(cert.as_ref())
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp_client::error::ErrorKind;

    fn self_signed(name: &str) -> CertificateDer<'static> {
        let rcgen::CertifiedKey { cert, .. } =
            rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        cert.der().clone()
    }

    #[test]
    fn test_create_tls_connector_with_custom_root() {
        let cert = self_signed("example.com");
        let config = Config::new().root_certificate(cert);
        assert!(create_tls_connector(&config).is_ok());
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        let err = verify_peer_chain(&[], "example.com").unwrap_err();
        assert!(matches!(err, XmppError::CertificateVerification));
        assert_eq!(err.kind(), ErrorKind::Tls);
    }

    #[test]
    fn test_certificate_for_other_host_is_rejected() {
        let cert = self_signed("other.org");
        let err = verify_peer_chain(&[cert], "example.com").unwrap_err();
        assert!(matches!(err, XmppError::HostnameMismatch { ref domain, .. } if domain == "example.com"));
        assert_eq!(err.kind(), ErrorKind::Tls);
    }

    #[test]
    fn test_matching_certificate_is_accepted() {
        let cert = self_signed("example.com");
        assert!(verify_peer_chain(&[cert], "example.com").is_ok());
    }

    #[test]
    fn test_subject_name_lists_organization_and_common_name() {
        let mut params = rcgen::CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Example Org");
        params
            .distinguished_name
            .push(DnType::OrganizationalUnitName, "Chat");
        params.distinguished_name.push(DnType::CommonName, "example.com");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        assert_eq!(
            subject_name(cert.der()).as_deref(),
            Some("O=Example Org/OU=Chat/CN=example.com/")
        );
    }

    #[test]
    fn test_subject_name_of_garbage_is_none() {
        let junk = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
        assert_eq!(subject_name(&junk), None);
    }

    #[test]
    fn test_fingerprint_format() {
        let cert = self_signed("example.com");
        let fp = fingerprint(&cert);
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp.split(':').all(|b| b.len() == 2));
    }
}
