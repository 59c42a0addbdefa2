//! Typed stanza payloads and the (namespace, name) decoder registry.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::error::XmppError;
use super::framing::Element;

/// XMPP namespace constants.
pub mod ns {
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    pub const STREAMS_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
    pub const CLIENT: &str = "jabber:client";
    pub const CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";
    pub const CAPS: &str = "http://jabber.org/protocol/caps";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
    pub const MUC_ADMIN: &str = "http://jabber.org/protocol/muc#admin";
    pub const MUC_OWNER: &str = "http://jabber.org/protocol/muc#owner";
    pub const CONFERENCE: &str = "jabber:x:conference";
    pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
    pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
    pub const ROSTER: &str = "jabber:iq:roster";
    pub const VERSION: &str = "jabber:iq:version";
}

/// Namespace plus local name of a decoded element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: String,
    pub local: String,
}

/// One decoded top-level element.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    pub name: QualifiedName,
    pub payload: Payload,
}

/// Every shape the decoder can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    StreamFeatures(StreamFeatures),
    StreamError(StreamError),
    StartTls(StartTls),
    TlsProceed,
    TlsFailure,
    SaslMechanisms(Vec<String>),
    SaslChallenge(String),
    SaslResponse(String),
    SaslAbort,
    SaslSuccess,
    SaslFailure(SaslFailure),
    Bind(BindResult),
    Message(ClientMessage),
    Presence(ClientPresence),
    Iq(ClientIq),
    Error(ClientError),
}

// RFC 6120 stream features

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFeatures {
    pub starttls: Option<StartTls>,
    pub mechanisms: Vec<String>,
    pub bind: bool,
    /// Present when the server advertises legacy session establishment (RFC 3921 §3).
    pub session: bool,
}

impl StreamFeatures {
    pub fn offers_mechanism(&self, mechanism: &str) -> bool {
        self.mechanisms.iter().any(|m| m == mechanism)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartTls {
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamError {
    /// Defined condition, e.g. `host-unknown`.
    pub condition: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaslFailure {
    /// Defined condition, e.g. `not-authorized`.
    pub condition: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindResult {
    pub resource: String,
    pub jid: String,
}

// RFC 6121 jabber:client

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}

impl ChatState {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "active" => Some(ChatState::Active),
            "composing" => Some(ChatState::Composing),
            "paused" => Some(ChatState::Paused),
            "inactive" => Some(ChatState::Inactive),
            "gone" => Some(ChatState::Gone),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatState::Active => "active",
            ChatState::Composing => "composing",
            ChatState::Paused => "paused",
            ChatState::Inactive => "inactive",
            ChatState::Gone => "gone",
        }
    }
}

/// XEP-0249 direct room invitation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectInvite {
    pub jid: String,
    pub reason: String,
}

/// XEP-0045 mediated invitation, as relayed by the room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediatedInvite {
    pub from: String,
    pub to: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientMessage {
    pub from: String,
    pub id: String,
    pub to: String,
    /// chat, error, groupchat, headline, or normal
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub thread: String,
    pub chat_state: Option<ChatState>,
    pub direct_invite: Option<DirectInvite>,
    pub mediated_invite: Option<MediatedInvite>,
    pub error: Option<ClientError>,
}

impl ClientMessage {
    pub fn is_composing(&self) -> bool {
        self.chat_state == Some(ChatState::Composing)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MucItem {
    pub affiliation: String,
    pub role: String,
    pub jid: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientPresence {
    pub from: String,
    pub id: String,
    pub to: String,
    /// error, probe, subscribe, subscribed, unavailable, unsubscribe, unsubscribed
    pub kind: String,
    pub lang: String,
    /// away, chat, dnd, xa
    pub show: String,
    pub status: String,
    pub priority: String,
    /// XEP-0115 entity capabilities node.
    pub caps_node: String,
    pub caps_ver: String,
    /// Present when the presence carries a `muc#user` extension.
    pub muc_item: Option<MucItem>,
    pub error: Option<ClientError>,
}

impl ClientPresence {
    pub fn is_muc(&self) -> bool {
        self.muc_item.is_some()
    }

    pub fn is_online(&self) -> bool {
        self.kind.is_empty()
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == "unavailable"
    }

    pub fn has_node(&self) -> bool {
        !self.caps_node.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterItem {
    pub jid: String,
    pub subscription: String,
    pub name: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoIdentity {
    pub category: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoInfo {
    pub node: String,
    pub identities: Vec<DiscoIdentity>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoItem {
    pub jid: String,
    pub node: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoftwareVersion {
    pub name: String,
    pub version: String,
    pub os: String,
}

/// The first child of an `<iq/>`, when it is one the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum IqQuery {
    Roster(Vec<RosterItem>),
    DiscoInfo(DiscoInfo),
    DiscoItems(Vec<DiscoItem>),
    Version(SoftwareVersion),
    /// Anything else, kept as markup.
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientIq {
    pub from: String,
    pub id: String,
    pub to: String,
    /// error, get, result, set
    pub kind: String,
    pub error: Option<ClientError>,
    pub bind: Option<BindResult>,
    pub query: Option<IqQuery>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientError {
    pub code: String,
    pub kind: String,
    /// Defined condition, e.g. `item-not-found`.
    pub condition: String,
    pub text: String,
}

type DecodeFn = fn(&Element) -> Result<Payload, XmppError>;

/// Registry of every top-level element the client accepts. Built once, never mutated.
fn registry() -> &'static HashMap<(&'static str, &'static str), DecodeFn> {
    static REGISTRY: OnceLock<HashMap<(&'static str, &'static str), DecodeFn>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let entries: [((&'static str, &'static str), DecodeFn); 16] = [
            ((ns::STREAM, "features"), |el| {
                Ok(Payload::StreamFeatures(decode_features(el)))
            }),
            ((ns::STREAM, "error"), |el| {
                Ok(Payload::StreamError(StreamError {
                    condition: first_condition(el, ns::STREAMS_ERRORS),
                    text: el.child_text("text"),
                }))
            }),
            ((ns::TLS, "starttls"), |el| {
                Ok(Payload::StartTls(StartTls {
                    required: el.child("required").is_some(),
                }))
            }),
            ((ns::TLS, "proceed"), |_| Ok(Payload::TlsProceed)),
            ((ns::TLS, "failure"), |_| Ok(Payload::TlsFailure)),
            ((ns::SASL, "mechanisms"), |el| {
                Ok(Payload::SaslMechanisms(decode_mechanisms(el)))
            }),
            ((ns::SASL, "challenge"), |el| Ok(Payload::SaslChallenge(el.text()))),
            ((ns::SASL, "response"), |el| Ok(Payload::SaslResponse(el.text()))),
            ((ns::SASL, "abort"), |_| Ok(Payload::SaslAbort)),
            ((ns::SASL, "success"), |_| Ok(Payload::SaslSuccess)),
            ((ns::SASL, "failure"), |el| {
                Ok(Payload::SaslFailure(SaslFailure {
                    condition: first_condition(el, ns::SASL),
                    text: el.child_text("text"),
                }))
            }),
            ((ns::BIND, "bind"), |el| Ok(Payload::Bind(decode_bind(el)))),
            ((ns::CLIENT, "message"), |el| {
                Ok(Payload::Message(decode_message(el)))
            }),
            ((ns::CLIENT, "presence"), |el| {
                Ok(Payload::Presence(decode_presence(el)))
            }),
            ((ns::CLIENT, "iq"), |el| Ok(Payload::Iq(decode_iq(el)))),
            ((ns::CLIENT, "error"), |el| Ok(Payload::Error(decode_error(el)))),
        ];
        entries.into_iter().collect()
    })
}

/// Classify and decode an element. Unregistered (namespace, name) pairs are an error.
pub fn decode(element: &Element) -> Result<Stanza, XmppError> {
    let decode_fn = registry()
        .get(&(element.namespace.as_str(), element.name.as_str()))
        .ok_or_else(|| XmppError::UnknownElement {
            namespace: element.namespace.clone(),
            local: element.name.clone(),
        })?;
    let payload = decode_fn(element)?;
    Ok(Stanza {
        name: QualifiedName {
            namespace: element.namespace.clone(),
            local: element.name.clone(),
        },
        payload,
    })
}

/// Name of the first child element other than `<text/>`, preferring `namespace`.
fn first_condition(el: &Element, namespace: &str) -> String {
    el.elements()
        .find(|c| c.namespace == namespace && c.name != "text")
        .or_else(|| el.elements().find(|c| c.name != "text"))
        .map(|c| c.name.clone())
        .unwrap_or_default()
}

fn decode_mechanisms(el: &Element) -> Vec<String> {
    el.children_named("mechanism")
        .map(|m| m.text().trim().to_string())
        .collect()
}

fn decode_features(el: &Element) -> StreamFeatures {
    StreamFeatures {
        starttls: el.child_ns(ns::TLS, "starttls").map(|s| StartTls {
            required: s.child("required").is_some(),
        }),
        mechanisms: el
            .child_ns(ns::SASL, "mechanisms")
            .map(decode_mechanisms)
            .unwrap_or_default(),
        bind: el.child_ns(ns::BIND, "bind").is_some(),
        session: el.child("session").is_some(),
    }
}

fn decode_bind(el: &Element) -> BindResult {
    BindResult {
        resource: el.child_text("resource"),
        jid: el.child_text("jid"),
    }
}

fn decode_error(el: &Element) -> ClientError {
    ClientError {
        code: el.attr_string("code"),
        kind: el.attr_string("type"),
        condition: first_condition(el, ns::STANZAS),
        text: el.child_text("text"),
    }
}

fn decode_message(el: &Element) -> ClientMessage {
    let chat_state = el
        .elements()
        .filter(|c| c.namespace == ns::CHAT_STATES)
        .find_map(|c| ChatState::from_name(&c.name));

    let direct_invite = el.child_ns(ns::CONFERENCE, "x").map(|x| DirectInvite {
        jid: x.attr_string("jid"),
        reason: x.attr_string("reason"),
    });

    let mediated_invite = el
        .child_ns(ns::MUC_USER, "x")
        .and_then(|x| x.child("invite"))
        .map(|invite| MediatedInvite {
            from: invite.attr_string("from"),
            to: invite.attr_string("to"),
            reason: invite.child_text("reason").trim().to_string(),
        });

    ClientMessage {
        from: el.attr_string("from"),
        id: el.attr_string("id"),
        to: el.attr_string("to"),
        kind: el.attr_string("type"),
        subject: el.child_text("subject"),
        body: el.child_text("body"),
        thread: el.child_text("thread"),
        chat_state,
        direct_invite,
        mediated_invite,
        error: el.child("error").map(decode_error),
    }
}

fn decode_presence(el: &Element) -> ClientPresence {
    let caps = el.child_ns(ns::CAPS, "c");
    let muc_item = el.child_ns(ns::MUC_USER, "x").map(|x| {
        x.child("item")
            .map(|item| MucItem {
                affiliation: item.attr_string("affiliation"),
                role: item.attr_string("role"),
                jid: item.attr_string("jid"),
            })
            .unwrap_or_default()
    });

    ClientPresence {
        from: el.attr_string("from"),
        id: el.attr_string("id"),
        to: el.attr_string("to"),
        kind: el.attr_string("type"),
        lang: el.attr_string("xml:lang"),
        show: el.child_text("show"),
        status: el.child_text("status"),
        priority: el.child_text("priority"),
        caps_node: caps.map(|c| c.attr_string("node")).unwrap_or_default(),
        caps_ver: caps.map(|c| c.attr_string("ver")).unwrap_or_default(),
        muc_item,
        error: el.child("error").map(decode_error),
    }
}

fn decode_query(el: &Element) -> IqQuery {
    match (el.namespace.as_str(), el.name.as_str()) {
        (ns::ROSTER, "query") => IqQuery::Roster(
            el.children_named("item")
                .map(|item| RosterItem {
                    jid: item.attr_string("jid"),
                    subscription: item.attr_string("subscription"),
                    name: item.attr_string("name"),
                    groups: item.children_named("group").map(Element::text).collect(),
                })
                .collect(),
        ),
        (ns::DISCO_INFO, "query") => IqQuery::DiscoInfo(DiscoInfo {
            node: el.attr_string("node"),
            identities: el
                .children_named("identity")
                .map(|id| DiscoIdentity {
                    category: id.attr_string("category"),
                    kind: id.attr_string("type"),
                    name: id.attr_string("name"),
                })
                .collect(),
            features: el
                .children_named("feature")
                .map(|f| f.attr_string("var"))
                .collect(),
        }),
        (ns::DISCO_ITEMS, "query") => IqQuery::DiscoItems(
            el.children_named("item")
                .map(|item| DiscoItem {
                    jid: item.attr_string("jid"),
                    node: item.attr_string("node"),
                    name: item.attr_string("name"),
                })
                .collect(),
        ),
        (ns::VERSION, "query") => IqQuery::Version(SoftwareVersion {
            name: el.child_text("name"),
            version: el.child_text("version"),
            os: el.child_text("os"),
        }),
        _ => IqQuery::Other(el.to_xml()),
    }
}

fn decode_iq(el: &Element) -> ClientIq {
    let query = el
        .elements()
        .find(|c| c.name != "error" && !c.is(ns::BIND, "bind"))
        .map(decode_query);

    ClientIq {
        from: el.attr_string("from"),
        id: el.attr_string("id"),
        to: el.attr_string("to"),
        kind: el.attr_string("type"),
        error: el.child("error").map(decode_error),
        bind: el.child_ns(ns::BIND, "bind").map(decode_bind),
        query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp_client::framing::{parse_element, parse_stream_header};

    fn decode_str(xml: &str) -> Result<Stanza, XmppError> {
        let (_, scope) = parse_stream_header(
            "<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>",
        )
        .unwrap();
        decode(&parse_element(xml, &scope).unwrap())
    }

    #[test]
    fn test_every_registered_key_decodes_to_its_shape() {
        let fixtures: [(&str, &str, &str); 16] = [
            (ns::STREAM, "features", "<stream:features/>"),
            (ns::STREAM, "error", "<stream:error><host-unknown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>"),
            (ns::TLS, "starttls", "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>"),
            (ns::TLS, "proceed", "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"),
            (ns::TLS, "failure", "<failure xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"),
            (ns::SASL, "mechanisms", "<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>"),
            (ns::SASL, "challenge", "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>cmVhbG0=</challenge>"),
            (ns::SASL, "response", "<response xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>dGVzdA==</response>"),
            (ns::SASL, "abort", "<abort xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>"),
            (ns::SASL, "success", "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>"),
            (ns::SASL, "failure", "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>"),
            (ns::BIND, "bind", "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>a@b/c</jid></bind>"),
            (ns::CLIENT, "message", "<message from='a@b'><body>hi</body></message>"),
            (ns::CLIENT, "presence", "<presence from='a@b/c'/>"),
            (ns::CLIENT, "iq", "<iq type='result' id='1'/>"),
            (ns::CLIENT, "error", "<error type='cancel'><item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>"),
        ];

        for (namespace, local, xml) in fixtures {
            let stanza = decode_str(xml).unwrap();
            assert_eq!(stanza.name.namespace, namespace, "{xml}");
            assert_eq!(stanza.name.local, local, "{xml}");
            let shape_matches = match (local, &stanza.payload) {
                ("features", Payload::StreamFeatures(_)) => true,
                ("error", Payload::StreamError(_)) => namespace == ns::STREAM,
                ("error", Payload::Error(_)) => namespace == ns::CLIENT,
                ("starttls", Payload::StartTls(s)) => s.required,
                ("proceed", Payload::TlsProceed) => true,
                ("failure", Payload::TlsFailure) => namespace == ns::TLS,
                ("failure", Payload::SaslFailure(f)) => f.condition == "not-authorized",
                ("mechanisms", Payload::SaslMechanisms(m)) => m == &["PLAIN".to_string()],
                ("challenge", Payload::SaslChallenge(c)) => c == "cmVhbG0=",
                ("response", Payload::SaslResponse(r)) => r == "dGVzdA==",
                ("abort", Payload::SaslAbort) => true,
                ("success", Payload::SaslSuccess) => true,
                ("bind", Payload::Bind(b)) => b.jid == "a@b/c",
                ("message", Payload::Message(m)) => m.body == "hi",
                ("presence", Payload::Presence(p)) => p.from == "a@b/c",
                ("iq", Payload::Iq(iq)) => iq.kind == "result",
                _ => false,
            };
            assert!(shape_matches, "wrong payload for {xml}: {:?}", stanza.payload);
        }
    }

    #[test]
    fn test_unregistered_key_is_decode_error() {
        let err = decode_str("<r xmlns='urn:xmpp:sm:3'/>").unwrap_err();
        match err {
            XmppError::UnknownElement { namespace, local } => {
                assert_eq!(namespace, "urn:xmpp:sm:3");
                assert_eq!(local, "r");
            }
            other => panic!("expected UnknownElement, got {other:?}"),
        }
    }

    #[test]
    fn test_known_name_in_wrong_namespace_is_rejected() {
        assert!(decode_str("<message xmlns='urn:example'/>").is_err());
        assert!(decode_str("<success xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>").is_err());
    }

    #[test]
    fn test_features_decode() {
        let stanza = decode_str(
            "<stream:features>\
               <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>\
               <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                 <mechanism>SCRAM-SHA-1</mechanism><mechanism>PLAIN</mechanism>\
               </mechanisms>\
               <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
               <session xmlns='urn:ietf:params:xml:ns:xmpp-session'/>\
             </stream:features>",
        )
        .unwrap();
        let Payload::StreamFeatures(features) = stanza.payload else {
            panic!("expected features");
        };
        assert_eq!(features.starttls, Some(StartTls { required: false }));
        assert!(features.offers_mechanism("PLAIN"));
        assert!(!features.offers_mechanism("EXTERNAL"));
        assert!(features.bind);
        assert!(features.session);
    }

    #[test]
    fn test_message_extensions() {
        let stanza = decode_str(
            "<message from='room@conf.example.com' to='me@example.com' type='normal' id='m1'>\
               <composing xmlns='http://jabber.org/protocol/chatstates'/>\
               <x xmlns='jabber:x:conference' jid='room@conf.example.com' reason='come &amp; see'/>\
               <x xmlns='http://jabber.org/protocol/muc#user'>\
                 <invite from='crone@example.com'><reason> witches </reason></invite>\
               </x>\
             </message>",
        )
        .unwrap();
        let Payload::Message(message) = stanza.payload else {
            panic!("expected message");
        };
        assert!(message.is_composing());
        assert_eq!(message.kind, "normal");
        assert_eq!(
            message.direct_invite,
            Some(DirectInvite {
                jid: "room@conf.example.com".into(),
                reason: "come & see".into()
            })
        );
        let mediated = message.mediated_invite.unwrap();
        assert_eq!(mediated.from, "crone@example.com");
        assert_eq!(mediated.reason, "witches");
    }

    #[test]
    fn test_presence_helpers() {
        let stanza = decode_str(
            "<presence from='room@conf.example.com/nick' xml:lang='en'>\
               <show>away</show><status>lunch</status><priority>5</priority>\
               <c xmlns='http://jabber.org/protocol/caps' node='https://fluux.io' ver='abc='/>\
               <x xmlns='http://jabber.org/protocol/muc#user'>\
                 <item affiliation='member' role='participant' jid='nick@example.com/x'/>\
               </x>\
             </presence>",
        )
        .unwrap();
        let Payload::Presence(presence) = stanza.payload else {
            panic!("expected presence");
        };
        assert!(presence.is_online());
        assert!(!presence.is_unavailable());
        assert!(presence.is_muc());
        assert!(presence.has_node());
        assert_eq!(presence.lang, "en");
        assert_eq!(presence.show, "away");
        assert_eq!(presence.priority, "5");
        assert_eq!(presence.muc_item.unwrap().role, "participant");

        let Payload::Presence(gone) = decode_str("<presence type='unavailable'/>").unwrap().payload
        else {
            panic!("expected presence");
        };
        assert!(gone.is_unavailable());
        assert!(!gone.is_muc());
    }

    #[test]
    fn test_iq_queries() {
        let roster = decode_str(
            "<iq type='result' id='r1'><query xmlns='jabber:iq:roster'>\
               <item jid='juliet@example.com' subscription='both' name='Juliet'><group>Friends</group></item>\
             </query></iq>",
        )
        .unwrap();
        let Payload::Iq(iq) = roster.payload else {
            panic!("expected iq");
        };
        let Some(IqQuery::Roster(items)) = iq.query else {
            panic!("expected roster query");
        };
        assert_eq!(items[0].jid, "juliet@example.com");
        assert_eq!(items[0].groups, vec!["Friends".to_string()]);

        let disco = decode_str(
            "<iq type='result'><query xmlns='http://jabber.org/protocol/disco#items'>\
               <item jid='room@conf.example.com' name='Room'/>\
             </query></iq>",
        )
        .unwrap();
        let Payload::Iq(iq) = disco.payload else {
            panic!("expected iq");
        };
        assert!(matches!(iq.query, Some(IqQuery::DiscoItems(ref items)) if items.len() == 1));

        let other = decode_str("<iq type='get'><ping xmlns='urn:xmpp:ping'/></iq>").unwrap();
        let Payload::Iq(iq) = other.payload else {
            panic!("expected iq");
        };
        assert_eq!(
            iq.query,
            Some(IqQuery::Other("<ping xmlns='urn:xmpp:ping'/>".to_string()))
        );

        let prefixed = decode_str(
            "<iq type='set' xmlns:ext='urn:example:ext'><cmd xmlns='urn:example' ext:mode='fast'/></iq>",
        )
        .unwrap();
        let Payload::Iq(iq) = prefixed.payload else {
            panic!("expected iq");
        };
        assert_eq!(
            iq.query,
            Some(IqQuery::Other(
                "<cmd xmlns='urn:example' xmlns:ext='urn:example:ext' ext:mode='fast'/>".to_string()
            ))
        );
    }

    #[test]
    fn test_iq_bind_and_error() {
        let Payload::Iq(iq) = decode_str(
            "<iq type='error' id='bind_1'>\
               <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
               <error type='modify'><bad-request xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>\
             </iq>",
        )
        .unwrap()
        .payload
        else {
            panic!("expected iq");
        };
        assert_eq!(iq.bind.as_ref().map(|b| b.jid.as_str()), Some(""));
        let error = iq.error.unwrap();
        assert_eq!(error.kind, "modify");
        assert_eq!(error.condition, "bad-request");
        assert!(iq.query.is_none());
    }
}
