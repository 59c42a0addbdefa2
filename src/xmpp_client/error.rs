use thiserror::Error;

/// Broad failure classes. Every bootstrap phase stops at its first error of
/// any class; nothing here is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect/read/write failure on the byte stream.
    Transport,
    /// An element arrived whose namespace or name is wrong for the phase.
    Protocol,
    /// Handshake failure, empty verified chain, or hostname mismatch.
    Tls,
    /// Mechanism unavailable locally or rejected by the server.
    Authentication,
    /// Malformed XML or an element the decoder does not know.
    Decode,
}

#[derive(Debug, Error)]
pub enum XmppError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("server closed the XML stream")]
    StreamClosed,

    #[error("expected <{expected}> but got <{local}> in {namespace}")]
    UnexpectedElement {
        expected: &'static str,
        namespace: String,
        local: String,
    },

    #[error("server doesn't support TLS")]
    TlsNotOffered,

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("failed to verify TLS certificate")]
    CertificateVerification,

    #[error("failed to match TLS certificate to name {domain}: {reason}")]
    HostnameMismatch { domain: String, reason: String },

    #[error("{0} authentication is not an option")]
    MechanismUnavailable(&'static str),

    #[error("authentication failure: {0}")]
    AuthenticationFailed(String),

    #[error("<iq> result missing <bind>")]
    BindResultMissing,

    #[error("session establishment failed (iq type '{0}')")]
    SessionFailed(String),

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("unexpected XMPP message {namespace} <{local}/>")]
    UnknownElement { namespace: String, local: String },
}

impl XmppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            XmppError::Transport(_) | XmppError::StreamClosed => ErrorKind::Transport,
            XmppError::UnexpectedElement { .. }
            | XmppError::BindResultMissing
            | XmppError::SessionFailed(_) => ErrorKind::Protocol,
            XmppError::TlsNotOffered
            | XmppError::TlsHandshake(_)
            | XmppError::CertificateVerification
            | XmppError::HostnameMismatch { .. } => ErrorKind::Tls,
            XmppError::MechanismUnavailable(_) | XmppError::AuthenticationFailed(_) => {
                ErrorKind::Authentication
            }
            XmppError::MalformedXml(_) | XmppError::UnknownElement { .. } => ErrorKind::Decode,
        }
    }

    pub(crate) fn unexpected(expected: &'static str, namespace: &str, local: &str) -> Self {
        XmppError::UnexpectedElement {
            expected,
            namespace: namespace.to_string(),
            local: local.to_string(),
        }
    }
}

impl From<quick_xml::Error> for XmppError {
    fn from(e: quick_xml::Error) -> Self {
        XmppError::MalformedXml(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_transport() {
        let err: XmppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_unexpected_element_message_names_element() {
        let err = XmppError::unexpected("proceed", "urn:ietf:params:xml:ns:xmpp-tls", "failure");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.to_string(),
            "expected <proceed> but got <failure> in urn:ietf:params:xml:ns:xmpp-tls"
        );
    }

    #[test]
    fn test_taxonomy_classes() {
        assert_eq!(XmppError::TlsNotOffered.kind(), ErrorKind::Tls);
        assert_eq!(XmppError::CertificateVerification.kind(), ErrorKind::Tls);
        assert_eq!(
            XmppError::MechanismUnavailable("PLAIN").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            XmppError::UnknownElement {
                namespace: "urn:example".into(),
                local: "thing".into()
            }
            .kind(),
            ErrorKind::Decode
        );
    }
}
