//! Outbound stanza helpers. Every caller-supplied string is escaped before it
//! is embedded in markup.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::error::XmppError;
use super::framing::xml_escape;
use super::stanza::{ns, ChatState};
use super::transport::Writer;

/// Request ids, unique for the lifetime of the process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> String {
    format!("{:x}", NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

/// XEP-0045 room role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    Visitor,
    Participant,
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Visitor => "visitor",
            Role::Participant => "participant",
            Role::Moderator => "moderator",
        }
    }
}

/// XEP-0045 room affiliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affiliation {
    None,
    Outcast,
    Member,
    Admin,
    Owner,
}

impl Affiliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Affiliation::None => "none",
            Affiliation::Outcast => "outcast",
            Affiliation::Member => "member",
            Affiliation::Admin => "admin",
            Affiliation::Owner => "owner",
        }
    }
}

/// The sending direction of an established connection.
pub struct Sender {
    writer: Writer,
    jid: String,
    domain: String,
}

impl Sender {
    pub(crate) fn new(writer: Writer, jid: String, domain: String) -> Self {
        Self { writer, jid, domain }
    }

    /// Full JID assigned at bind time.
    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Write pre-built markup as-is. Callers are responsible for escaping.
    pub async fn send_stanza(&mut self, xml: &str) -> Result<(), XmppError> {
        self.writer.send(xml).await
    }

    async fn send_message(&mut self, to: &str, body: &str, kind: &str) -> Result<(), XmppError> {
        let xml = format!(
            "<message to='{}' from='{}' type='{}'><body>{}</body></message>",
            xml_escape(to),
            xml_escape(&self.jid),
            kind,
            xml_escape(body)
        );
        self.send_stanza(&xml).await
    }

    /// One-to-one chat message.
    pub async fn send_chat(&mut self, to: &str, body: &str) -> Result<(), XmppError> {
        self.send_message(to, body, "chat").await
    }

    pub async fn send_groupchat(&mut self, room: &str, body: &str) -> Result<(), XmppError> {
        self.send_message(room, body, "groupchat").await
    }

    /// XEP-0085 chat state notification.
    pub async fn send_chat_state(&mut self, to: &str, state: ChatState) -> Result<(), XmppError> {
        let xml = format!(
            "<message to='{}' from='{}' type='chat'><{} xmlns='{}'/></message>",
            xml_escape(to),
            xml_escape(&self.jid),
            state.as_str(),
            ns::CHAT_STATES
        );
        self.send_stanza(&xml).await
    }

    pub async fn send_composing(&mut self, to: &str) -> Result<(), XmppError> {
        self.send_chat_state(to, ChatState::Composing).await
    }

    pub async fn send_active(&mut self, to: &str) -> Result<(), XmppError> {
        self.send_chat_state(to, ChatState::Active).await
    }

    /// Broadcast availability with a `<show/>` value (away, chat, dnd, xa).
    pub async fn signal_presence(&mut self, show: &str) -> Result<(), XmppError> {
        let xml = format!("<presence><show>{}</show></presence>", xml_escape(show));
        self.send_stanza(&xml).await
    }

    /// Available, but with negative priority so no messages are routed here.
    pub async fn silence_presence(&mut self) -> Result<(), XmppError> {
        self.send_stanza("<presence><priority>-1</priority></presence>")
            .await
    }

    /// Enter (`joined = true`) or leave a room occupant JID.
    pub async fn presence_muc(&mut self, to: &str, joined: bool) -> Result<(), XmppError> {
        let xml = if joined {
            format!(
                "<presence to='{}' from='{}'><x xmlns='{}'/></presence>",
                xml_escape(to),
                xml_escape(&self.jid),
                ns::MUC
            )
        } else {
            format!(
                "<presence to='{}' from='{}' type='unavailable'/>",
                xml_escape(to),
                xml_escape(&self.jid)
            )
        };
        self.send_stanza(&xml).await
    }

    pub async fn join_muc(&mut self, room: &str, nickname: &str) -> Result<(), XmppError> {
        info!(room, nickname, "Joining room");
        let xml = format!(
            "<presence from='{}' to='{}/{}'><x xmlns='{}'/></presence>",
            xml_escape(&self.jid),
            xml_escape(room),
            xml_escape(nickname),
            ns::MUC
        );
        self.send_stanza(&xml).await
    }

    /// XEP-0249 direct invitation, sent straight to the invitee.
    pub async fn send_direct_invitation(
        &mut self,
        to: &str,
        room: &str,
        reason: &str,
    ) -> Result<(), XmppError> {
        let xml = format!(
            "<message to='{}' from='{}'><x xmlns='{}' jid='{}' reason='{}'/></message>",
            xml_escape(to),
            xml_escape(&self.jid),
            ns::CONFERENCE,
            xml_escape(room),
            xml_escape(reason)
        );
        self.send_stanza(&xml).await
    }

    /// XEP-0045 mediated invitation, relayed by the room.
    pub async fn send_mediated_invitation(
        &mut self,
        to: &str,
        room: &str,
        reason: &str,
    ) -> Result<(), XmppError> {
        let xml = format!(
            "<message from='{}' to='{}' id='{}'><x xmlns='{}'><invite to='{}'><reason>{}</reason></invite></x></message>",
            xml_escape(&self.jid),
            xml_escape(room),
            next_id(),
            ns::MUC_USER,
            xml_escape(to),
            xml_escape(reason)
        );
        self.send_stanza(&xml).await
    }

    pub async fn destroy_room(&mut self, room: &str) -> Result<(), XmppError> {
        info!(room, "Destroying room");
        let xml = format!(
            "<iq from='{}' id='{}' to='{}' type='set'><query xmlns='{}'><destroy jid='{}'/></query></iq>",
            xml_escape(&self.jid),
            next_id(),
            xml_escape(room),
            ns::MUC_OWNER,
            xml_escape(room)
        );
        self.send_stanza(&xml).await
    }

    pub async fn set_role(&mut self, room: &str, nick: &str, role: Role) -> Result<(), XmppError> {
        let xml = format!(
            "<iq from='{}' id='{}' to='{}' type='set'><query xmlns='{}'><item nick='{}' role='{}'/></query></iq>",
            xml_escape(&self.jid),
            next_id(),
            xml_escape(room),
            ns::MUC_ADMIN,
            xml_escape(nick),
            role.as_str()
        );
        self.send_stanza(&xml).await
    }

    pub async fn set_affiliation(
        &mut self,
        room: &str,
        jid: &str,
        affiliation: Affiliation,
    ) -> Result<(), XmppError> {
        let xml = format!(
            "<iq from='{}' id='{}' to='{}' type='set'><query xmlns='{}'><item affiliation='{}' jid='{}'/></query></iq>",
            xml_escape(&self.jid),
            next_id(),
            xml_escape(room),
            ns::MUC_ADMIN,
            affiliation.as_str(),
            xml_escape(jid)
        );
        self.send_stanza(&xml).await
    }

    /// Ask a conference service for its rooms. The answer arrives through the
    /// listener as an `<iq/>` with a disco#items query.
    pub async fn discover_rooms(&mut self, service: &str) -> Result<String, XmppError> {
        let id = next_id();
        let xml = format!(
            "<iq type='get' id='{}' from='{}' to='{}'><query xmlns='{}'/></iq>",
            id,
            xml_escape(&self.jid),
            xml_escape(service),
            ns::DISCO_ITEMS
        );
        self.send_stanza(&xml).await?;
        Ok(id)
    }

    /// Close the XML stream and shut down the write side.
    pub async fn close(&mut self) -> Result<(), XmppError> {
        self.writer.send("</stream:stream>").await?;
        self.writer.shutdown().await
    }
}
