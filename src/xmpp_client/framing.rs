//! XMPP XML framing: fragment extraction and element-tree parsing.
//!
//! The inbound TCP byte stream is carved into top-level fragments (stream
//! header, stream end, or one complete element) with a depth-tracking
//! quick-xml scan. Each element fragment is then parsed into an [`Element`]
//! tree, resolving namespace prefixes against the declarations carried by the
//! most recent `<stream:stream>` header.

use std::borrow::Cow;

use quick_xml::errors::SyntaxError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};
use quick_xml::{NsReader, Reader};
use tracing::trace;

use super::error::XmppError;

/// One top-level unit of the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// The `<stream:stream ...>` start tag, including any XML declaration before it.
    StreamHeader(String),
    /// `</stream:stream>`.
    StreamEnd,
    /// A complete top-level element (stanza or nonza).
    Element(String),
}

/// State machine for fragment boundary detection.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    /// Waiting for an element to start (between stanzas, or before stream open).
    Idle,
    /// Inside a top-level element, collecting events.
    InElement,
}

/// Convert a byte slice to a String, trying zero-copy UTF-8 first.
fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn is_stream_tag(qname: &[u8]) -> bool {
    qname == b"stream" || qname.ends_with(b":stream")
}

/// Whether a syntax error only means the buffer stops inside a construct.
/// `rest` starts at the markup that failed (its `<` may already be consumed).
fn is_truncated(err: &SyntaxError, rest: &[u8]) -> bool {
    match err {
        SyntaxError::UnclosedTag
        | SyntaxError::UnclosedComment
        | SyntaxError::UnclosedCData
        | SyntaxError::UnclosedDoctype
        | SyntaxError::UnclosedPIOrXmlDecl => true,
        // `<!` cut off before the reader can tell CDATA from a comment
        SyntaxError::InvalidBangMarkup => {
            let rest = rest.strip_prefix(b"<").unwrap_or(rest);
            [&b"![CDATA["[..], b"!--", b"!DOCTYPE"]
                .iter()
                .any(|markup| markup.starts_with(rest))
        }
        _ => false,
    }
}

/// Extract a single complete fragment from the start of `buffer`.
///
/// Returns `Ok(Some((fragment, bytes_consumed)))` once a complete fragment is
/// present, `Ok(None)` if more bytes are needed. The caller advances past the
/// consumed bytes.
pub fn extract_fragment(buffer: &[u8]) -> Result<Option<(Fragment, usize)>, XmppError> {
    // </stream:stream> arrives without its opening tag in the buffer
    let trimmed = buffer.iter().position(|b| !b.is_ascii_whitespace());
    if let Some(start) = trimmed {
        if buffer[start..].starts_with(b"</stream:stream>") {
            return Ok(Some((Fragment::StreamEnd, start + b"</stream:stream>".len())));
        }
    }

    let mut reader = Reader::from_reader(buffer);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut depth: u32 = 0;
    let mut state = ParserState::Idle;
    let mut element_start: usize = 0;

    loop {
        let pos = reader.buffer_position() as usize;

        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) => {
                continue;
            }
            Ok(Event::Start(e)) => {
                if state == ParserState::Idle && is_stream_tag(e.name().as_ref()) {
                    let tag_end = reader.buffer_position() as usize;
                    let header = bytes_to_string(&buffer[..tag_end]);
                    return Ok(Some((Fragment::StreamHeader(header), tag_end)));
                }

                depth += 1;
                if state == ParserState::Idle && depth == 1 {
                    state = ParserState::InElement;
                    element_start = pos;
                }
            }
            Ok(Event::Empty(e)) => {
                if state == ParserState::Idle && depth == 0 {
                    let tag_end = reader.buffer_position() as usize;
                    let text = bytes_to_string(&buffer[pos..tag_end]);
                    if is_stream_tag(e.name().as_ref()) {
                        return Ok(Some((Fragment::StreamHeader(text), tag_end)));
                    }
                    return Ok(Some((Fragment::Element(text), tag_end)));
                }
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) => {}
            Ok(Event::End(e)) => {
                if depth == 0 && is_stream_tag(e.name().as_ref()) {
                    let tag_end = reader.buffer_position() as usize;
                    return Ok(Some((Fragment::StreamEnd, tag_end)));
                }

                depth = depth.saturating_sub(1);
                if state == ParserState::InElement && depth == 0 {
                    let tag_end = reader.buffer_position() as usize;
                    let text = bytes_to_string(&buffer[element_start..tag_end]);
                    return Ok(Some((Fragment::Element(text), tag_end)));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(quick_xml::Error::Syntax(err)) if is_truncated(&err, &buffer[pos..]) => {
                // Partial markup at the end of the buffer; the next read completes it.
                trace!(error = %err, "Fragment incomplete, waiting for more data");
                return Ok(None);
            }
            Err(e) => return Err(XmppError::MalformedXml(e.to_string())),
        }
    }
}

/// A node in a parsed element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// Prefix binding: `None` is the default namespace.
type Binding = (Option<String>, String);

/// A namespace-resolved XML element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub namespace: String,
    pub name: String,
    /// Prefix of the name as written, if any.
    pub prefix: Option<String>,
    /// Attributes by their qualified name as written (`xmlns` declarations excluded).
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Namespace bindings this element declares or relies on for its own
    /// name and attributes. Used to write it back out standalone.
    bindings: Vec<Binding>,
}

impl Element {
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attribute value, or the empty string when absent.
    pub fn attr_string(&self, name: &str) -> String {
        self.attr(name).unwrap_or_default().to_string()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// First child with the given local name, in any namespace.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }

    pub fn child_ns(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.is(namespace, name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |el| el.name == name)
    }

    /// Concatenated character data directly inside this element.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Text of the first child with the given local name, or the empty string.
    pub fn child_text(&self, name: &str) -> String {
        self.child(name).map(Element::text).unwrap_or_default()
    }

    /// Serialize the element itself, declaring every namespace and prefix it
    /// needs so the result stands on its own.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_element(&mut out, self, &mut Vec::new());
        out
    }

    fn qualified_name(&self) -> Cow<'_, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{prefix}:{}", self.name)),
            None => Cow::Borrowed(self.name.as_str()),
        }
    }
}

fn write_node(out: &mut String, node: &Node, in_scope: &mut Vec<Binding>) {
    match node {
        Node::Text(text) => out.push_str(&xml_escape(text)),
        Node::Element(el) => write_element(out, el, in_scope),
    }
}

fn write_element(out: &mut String, el: &Element, in_scope: &mut Vec<Binding>) {
    let mark = in_scope.len();
    let qname = el.qualified_name();
    out.push('<');
    out.push_str(&qname);

    for (prefix, uri) in &el.bindings {
        let current = in_scope
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
            .or(if prefix.is_none() { Some("") } else { None });
        if current == Some(uri.as_str()) {
            continue;
        }
        match prefix {
            Some(p) => out.push_str(&format!(" xmlns:{}='{}'", p, xml_escape(uri))),
            None => out.push_str(&format!(" xmlns='{}'", xml_escape(uri))),
        }
        in_scope.push((prefix.clone(), uri.clone()));
    }
    for (key, value) in &el.attributes {
        out.push_str(&format!(" {}='{}'", key, xml_escape(value)));
    }

    if el.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for child in &el.children {
            write_node(out, child, in_scope);
        }
        out.push_str(&format!("</{}>", qname));
    }
    in_scope.truncate(mark);
}

/// Namespace declarations made by the `<stream:stream>` header, in force for
/// every element of the stream.
#[derive(Debug, Clone, Default)]
pub struct StreamNamespaces {
    /// (`xmlns` or `xmlns:prefix`, namespace)
    declarations: Vec<(String, String)>,
}

impl StreamNamespaces {
    /// Open tag of a wrapper element that re-declares the stream's namespaces,
    /// so a fragment can be parsed on its own.
    fn wrapper_open(&self) -> String {
        let mut open = String::from("<stream-fragment");
        for (key, uri) in &self.declarations {
            open.push_str(&format!(" {}='{}'", key, xml_escape(uri)));
        }
        open.push('>');
        open
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, XmppError> {
    std::str::from_utf8(bytes).map_err(|e| XmppError::MalformedXml(e.to_string()))
}

fn resolved(result: ResolveResult<'_>, qname: &str) -> Result<String, XmppError> {
    match result {
        ResolveResult::Bound(ns) => Ok(utf8(ns.as_ref())?.to_string()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(_) => Err(XmppError::MalformedXml(format!(
            "unbound namespace prefix in <{qname}>"
        ))),
    }
}

fn push_binding(bindings: &mut Vec<Binding>, prefix: Option<&str>, uri: &str) {
    if prefix == Some("xml") || bindings.iter().any(|(p, _)| p.as_deref() == prefix) {
        return;
    }
    bindings.push((prefix.map(str::to_string), uri.to_string()));
}

/// Build an element from a start tag the reader has just produced. The
/// reader's scope already includes the tag's own declarations.
fn start_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<(Element, Vec<(String, String)>), XmppError> {
    let start_name = start.name();
    let qname = utf8(start_name.as_ref())?;
    let (result, local) = reader.resolve_element(start_name);
    let namespace = resolved(result, qname)?;
    let prefix = match start_name.prefix() {
        Some(p) => Some(utf8(p.as_ref())?.to_string()),
        None => None,
    };

    let mut declarations = Vec::new();
    let mut bindings = Vec::new();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmppError::MalformedXml(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_namespace_binding() {
            Some(PrefixDeclaration::Default) => {
                push_binding(&mut bindings, None, &value);
                declarations.push((key, value));
            }
            Some(PrefixDeclaration::Named(p)) => {
                push_binding(&mut bindings, Some(utf8(p)?), &value);
                declarations.push((key, value));
            }
            None => {
                if let Some(p) = attr.key.prefix() {
                    let (result, _) = reader.resolve_attribute(attr.key);
                    let uri = resolved(result, &key)?;
                    push_binding(&mut bindings, Some(utf8(p.as_ref())?), &uri);
                }
                attributes.push((key, value));
            }
        }
    }
    push_binding(&mut bindings, prefix.as_deref(), &namespace);

    let element = Element {
        namespace,
        name: utf8(local.as_ref())?.to_string(),
        prefix,
        attributes,
        children: Vec::new(),
        bindings,
    };
    Ok((element, declarations))
}

/// Parse a stream header fragment. Returns the header (without children) and
/// the namespaces it declares for the rest of the stream.
pub fn parse_stream_header(xml: &str) -> Result<(Element, StreamNamespaces), XmppError> {
    let mut reader = NsReader::from_str(xml);

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let (header, declarations) = start_element(&reader, &e)?;
                return Ok((header, StreamNamespaces { declarations }));
            }
            Event::Eof => {
                return Err(XmppError::MalformedXml("empty stream header".to_string()));
            }
            _ => {}
        }
    }
}

/// Parse one complete element fragment into a tree.
pub fn parse_element(xml: &str, stream: &StreamNamespaces) -> Result<Element, XmppError> {
    let wrapped = format!("{}{xml}</stream-fragment>", stream.wrapper_open());
    let mut reader = NsReader::from_str(&wrapped);
    reader.config_mut().trim_text(false);

    let mut opened = false;
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if !opened {
                    opened = true;
                    continue;
                }
                let (element, _) = start_element(&reader, &e)?;
                stack.push(element);
            }
            Event::Empty(e) => {
                let (element, _) = start_element(&reader, &e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmppError::MalformedXml("empty fragment".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => return Ok(element),
                }
            }
            Event::Text(t) => {
                if let Some(element) = stack.last_mut() {
                    let text = t.unescape()?;
                    if !text.is_empty() {
                        element.children.push(Node::Text(text.into_owned()));
                    }
                }
            }
            Event::CData(c) => {
                if let Some(element) = stack.last_mut() {
                    let text = bytes_to_string(&c.into_inner());
                    element.children.push(Node::Text(text));
                }
            }
            Event::Eof => {
                return Err(XmppError::MalformedXml(
                    "element ended before its closing tag".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Escape the five XML-reserved characters for use in text or attribute values.
pub fn xml_escape(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}
