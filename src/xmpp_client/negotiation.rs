//! Stream feature discovery, SASL PLAIN, resource binding, legacy session.

use base64::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::error::XmppError;
use super::framing::xml_escape;
use super::stanza::{self, ns, Payload, StreamFeatures};
use super::stream::{StanzaReader, StanzaWriter};

/// Open (or reopen) the stream to `domain` and return what the server offers.
///
/// RFC 6120 §4.3: every new stream is answered with a header followed by
/// `<stream:features/>`.
pub(crate) async fn negotiate_features<R, W>(
    reader: &mut StanzaReader<R>,
    writer: &mut StanzaWriter<W>,
    domain: &str,
) -> Result<StreamFeatures, XmppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let header = format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{}' xmlns:stream='{}' version='1.0'>\n",
        xml_escape(domain),
        ns::CLIENT,
        ns::STREAM
    );
    writer.send(&header).await?;

    let opened = reader.next_stream_header().await?;
    debug!(id = opened.attr("id").unwrap_or_default(), "Stream opened");

    let element = reader.next_element().await?;
    match stanza::decode(&element)?.payload {
        Payload::StreamFeatures(features) => {
            debug!(
                starttls = features.starttls.is_some(),
                mechanisms = ?features.mechanisms,
                bind = features.bind,
                session = features.session,
                "Stream features"
            );
            Ok(features)
        }
        _ => Err(XmppError::unexpected(
            "features",
            &element.namespace,
            &element.name,
        )),
    }
}

/// `\0authcid\0password`, base64-encoded (RFC 4616).
fn plain_credentials(user: &str, password: &str) -> String {
    BASE64_STANDARD.encode(format!("\0{user}\0{password}"))
}

/// SASL PLAIN. The `<auth/>` element goes through the unlogged path only.
pub(crate) async fn authenticate<R, W>(
    reader: &mut StanzaReader<R>,
    writer: &mut StanzaWriter<W>,
    features: &StreamFeatures,
    user: &str,
    password: &str,
) -> Result<(), XmppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !features.offers_mechanism("PLAIN") {
        warn!(offered = ?features.mechanisms, "PLAIN not offered by server");
        return Err(XmppError::MechanismUnavailable("PLAIN"));
    }

    let auth = format!(
        "<auth xmlns='{}' mechanism='PLAIN'>{}</auth>\n",
        ns::SASL,
        plain_credentials(user, password)
    );
    writer.send_unlogged(&auth).await?;

    let reply = reader.next_element().await?;
    match stanza::decode(&reply).map(|s| s.payload) {
        Ok(Payload::SaslSuccess) => {
            info!(user, "SASL PLAIN authentication succeeded");
            Ok(())
        }
        Ok(Payload::SaslFailure(failure)) => {
            warn!(condition = %failure.condition, text = %failure.text, "SASL authentication failed");
            Err(XmppError::AuthenticationFailed(failure.condition))
        }
        _ => Err(XmppError::unexpected(
            "success or failure",
            &reply.namespace,
            &reply.name,
        )),
    }
}

/// Bind a server-assigned resource and return the full JID, unescaped.
pub(crate) async fn bind<R, W>(
    reader: &mut StanzaReader<R>,
    writer: &mut StanzaWriter<W>,
) -> Result<String, XmppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .send(&format!(
            "<iq type='set' id='bind_1'><bind xmlns='{}'/></iq>",
            ns::BIND
        ))
        .await?;

    let reply = reader.next_element().await?;
    let Payload::Iq(iq) = stanza::decode(&reply)?.payload else {
        return Err(XmppError::unexpected("iq", &reply.namespace, &reply.name));
    };

    let jid = iq
        .bind
        .map(|b| b.jid)
        .filter(|jid| !jid.is_empty())
        .ok_or(XmppError::BindResultMissing)?;
    info!(jid = %jid, "Resource bound");
    Ok(jid)
}

/// RFC 3921 §3 session establishment, for servers that still ask for it.
pub(crate) async fn establish_session<R, W>(
    reader: &mut StanzaReader<R>,
    writer: &mut StanzaWriter<W>,
    domain: &str,
) -> Result<(), XmppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .send(&format!(
            "<iq to='{}' type='set' id='sess_1'><session xmlns='{}'/></iq>",
            xml_escape(domain),
            ns::SESSION
        ))
        .await?;

    let reply = reader.next_element().await?;
    let Payload::Iq(iq) = stanza::decode(&reply)?.payload else {
        return Err(XmppError::unexpected("iq", &reply.namespace, &reply.name));
    };
    if iq.kind != "result" {
        warn!(kind = %iq.kind, "Session establishment failed");
        return Err(XmppError::SessionFailed(iq.kind));
    }
    info!("Session established");
    Ok(())
}
