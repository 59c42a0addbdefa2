//! XMPP client connection.
//!
//! [`dial`] runs the whole bootstrap in order:
//! 1. TCP connect to `address`
//! 2. STARTTLS, when [`Config::tls_required`] is set
//! 3. Stream features
//! 4. SASL PLAIN
//! 5. Stream features again, on the authenticated stream
//! 6. Resource binding
//! 7. Legacy session, only when the server advertised `<session/>`
//!
//! Each phase must succeed before the next begins. The first error ends the
//! bootstrap and the connection is dropped; there is no retry.

mod config;
mod error;
mod framing;
pub mod jid;
mod negotiation;
mod outbound;
mod router;
pub mod stanza;
mod stream;
mod transport;

pub use config::{capture_sink, CaptureSink, Config};
pub use error::{ErrorKind, XmppError};
pub use framing::xml_escape;
pub use outbound::{Affiliation, Role, Sender};
pub use router::{Handler, Listener, LoggingHandler, OnlineRoster};
pub use stanza::{Payload, QualifiedName, Stanza};

use tracing::info;

/// An authenticated, bound XMPP session.
pub struct Connection {
    sender: Sender,
    listener: Listener,
}

impl Connection {
    /// Full JID assigned by the server.
    pub fn jid(&self) -> &str {
        self.sender.jid()
    }

    pub fn domain(&self) -> &str {
        self.sender.domain()
    }

    pub fn sender(&mut self) -> &mut Sender {
        &mut self.sender
    }

    pub fn listener(&mut self) -> &mut Listener {
        &mut self.listener
    }

    /// Separate the two directions so the listener can run on its own task.
    pub fn into_split(self) -> (Sender, Listener) {
        (self.sender, self.listener)
    }
}

/// Connect to `address`, authenticate `user` with `password`, and bind a resource.
pub async fn dial(
    address: &str,
    user: &str,
    domain: &str,
    password: &str,
    config: Config,
) -> Result<Connection, XmppError> {
    let (mut reader, mut writer) = transport::connect(address, &config).await?;

    if config.tls_required {
        (reader, writer) = transport::starttls(reader, writer, domain, &config).await?;
    }

    let features = negotiation::negotiate_features(&mut reader, &mut writer, domain).await?;

    config.report(&format!("Authenticating as {user}"));
    negotiation::authenticate(&mut reader, &mut writer, &features, user, password).await?;
    config.report("Authentication successful");

    let features = negotiation::negotiate_features(&mut reader, &mut writer, domain).await?;

    let jid = negotiation::bind(&mut reader, &mut writer).await?;
    config.report(&jid);

    if features.session {
        negotiation::establish_session(&mut reader, &mut writer, domain).await?;
    }

    info!(jid = %jid, domain, tls = config.tls_required, "XMPP session ready");
    Ok(Connection {
        sender: Sender::new(writer, jid, domain.to_string()),
        listener: Listener::new(reader),
    })
}
