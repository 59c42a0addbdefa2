//! Buffered stanza reader and writer over a boxed byte stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, error, trace};

use super::config::{copy_to, CaptureSink};
use super::error::XmppError;
use super::framing::{
    extract_fragment, parse_element, parse_stream_header, Element, Fragment, StreamNamespaces,
};
use super::stanza::{self, ns, Stanza};

/// Anything usable as the connection's byte stream: plain TCP, TLS, or an
/// in-memory pipe in tests.
pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadAndWrite>;

const READ_CHUNK: usize = 8192;

/// Maximum bytes held while waiting for a fragment to complete (1 MiB).
/// Prevents unbounded memory growth from a peer that never closes an element.
pub const MAX_STANZA_BUFFER_SIZE: usize = 1_024 * 1_024;

/// Reads top-level fragments off the stream and decodes them.
pub struct StanzaReader<R> {
    inner: R,
    buffer: Vec<u8>,
    capture: Option<CaptureSink>,
    namespaces: StreamNamespaces,
}

impl<R: AsyncRead + Unpin> StanzaReader<R> {
    pub fn new(inner: R, capture: Option<CaptureSink>) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            capture,
            namespaces: StreamNamespaces::default(),
        }
    }

    async fn fill(&mut self) -> Result<(), XmppError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut chunk).await?;
        if n == 0 {
            return Err(XmppError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        if let Some(sink) = &self.capture {
            copy_to(sink, &chunk[..n]);
        }
        trace!(bytes = n, "Received data");
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn next_fragment(&mut self) -> Result<Fragment, XmppError> {
        loop {
            // Whitespace keepalives between stanzas
            let leading = self
                .buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            if leading > 0 {
                self.buffer.drain(..leading);
            }

            if let Some((fragment, consumed)) = extract_fragment(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(fragment);
            }

            // Guard against unbounded buffer growth from incomplete/malformed XML
            if self.buffer.len() > MAX_STANZA_BUFFER_SIZE {
                error!(
                    buffer_bytes = self.buffer.len(),
                    limit = MAX_STANZA_BUFFER_SIZE,
                    "Stanza buffer exceeded size limit"
                );
                return Err(XmppError::MalformedXml(format!(
                    "incomplete element exceeds {} bytes",
                    MAX_STANZA_BUFFER_SIZE
                )));
            }
            self.fill().await?;
        }
    }

    /// Read the server's `<stream:stream>` header and adopt its namespace declarations.
    pub async fn next_stream_header(&mut self) -> Result<Element, XmppError> {
        match self.next_fragment().await? {
            Fragment::StreamHeader(xml) => {
                debug!(header = %xml, "Received stream header");
                let (header, namespaces) = parse_stream_header(&xml)?;
                if !header.is(ns::STREAM, "stream") {
                    return Err(XmppError::unexpected(
                        "stream",
                        &header.namespace,
                        &header.name,
                    ));
                }
                self.namespaces = namespaces;
                Ok(header)
            }
            Fragment::Element(xml) => {
                let element = parse_element(&xml, &self.namespaces)?;
                Err(XmppError::unexpected(
                    "stream",
                    &element.namespace,
                    &element.name,
                ))
            }
            Fragment::StreamEnd => Err(XmppError::StreamClosed),
        }
    }

    /// Read the next complete top-level element.
    pub async fn next_element(&mut self) -> Result<Element, XmppError> {
        match self.next_fragment().await? {
            Fragment::Element(xml) => {
                debug!(stanza = %xml, "Received");
                parse_element(&xml, &self.namespaces)
            }
            // A header in mid-stream is handed on as-is; the decoder rejects it.
            Fragment::StreamHeader(xml) => Ok(parse_stream_header(&xml)?.0),
            Fragment::StreamEnd => Err(XmppError::StreamClosed),
        }
    }

    /// Read and decode the next stanza.
    pub async fn next_stanza(&mut self) -> Result<Stanza, XmppError> {
        let element = self.next_element().await?;
        stanza::decode(&element)
    }
}

impl StanzaReader<ReadHalf<BoxedStream>> {
    /// Rejoin with the writer half to get the whole stream back.
    pub fn unsplit(self, writer: StanzaWriter<WriteHalf<BoxedStream>>) -> BoxedStream {
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "Discarding unread bytes at stream swap");
        }
        self.inner.unsplit(writer.inner)
    }
}

/// Writes markup to the stream.
pub struct StanzaWriter<W> {
    inner: W,
    capture: Option<CaptureSink>,
}

impl<W: AsyncWrite + Unpin> StanzaWriter<W> {
    pub fn new(inner: W, capture: Option<CaptureSink>) -> Self {
        Self { inner, capture }
    }

    /// Write markup, copying it to the outbound capture sink.
    pub async fn send(&mut self, xml: &str) -> Result<(), XmppError> {
        debug!(stanza = %xml, "Sending");
        self.write_raw(xml).await?;
        if let Some(sink) = &self.capture {
            copy_to(sink, xml.as_bytes());
        }
        Ok(())
    }

    /// Write markup that must not show up in any log or capture (credentials).
    pub async fn send_unlogged(&mut self, xml: &str) -> Result<(), XmppError> {
        debug!(bytes = xml.len(), "Sending unlogged data");
        self.write_raw(xml).await
    }

    async fn write_raw(&mut self, xml: &str) -> Result<(), XmppError> {
        self.inner.write_all(xml.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), XmppError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Split a stream into a reader/writer pair sharing the config's capture sinks.
pub fn split(
    stream: BoxedStream,
    inbound: Option<CaptureSink>,
    outbound: Option<CaptureSink>,
) -> (
    StanzaReader<ReadHalf<BoxedStream>>,
    StanzaWriter<WriteHalf<BoxedStream>>,
) {
    let (read, write) = tokio::io::split(stream);
    (
        StanzaReader::new(read, inbound),
        StanzaWriter::new(write, outbound),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp_client::config::capture_sink;
    use crate::xmpp_client::error::ErrorKind;
    use crate::xmpp_client::stanza::Payload;
    use std::sync::{Arc, Mutex};

    const HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='s1' version='1.0'>";

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_reads_header_then_stanzas_across_chunks() {
        let (mut server, client) = tokio::io::duplex(64);
        let captured = Shared::default();
        let mut reader = StanzaReader::new(client, Some(capture_sink(captured.clone())));

        let wire = format!("{HEADER}\n  <presence from='a@b/c'/>\n<message from='x@y'><body>hi</body></message> ");
        let writer = tokio::spawn(async move {
            // Small writes so fragments straddle reads
            for chunk in wire.as_bytes().chunks(7) {
                server.write_all(chunk).await.unwrap();
            }
            server
        });

        let header = reader.next_stream_header().await.unwrap();
        assert_eq!(header.attr("id"), Some("s1"));

        let presence = reader.next_stanza().await.unwrap();
        assert!(matches!(presence.payload, Payload::Presence(ref p) if p.from == "a@b/c"));
        let message = reader.next_stanza().await.unwrap();
        assert!(matches!(message.payload, Payload::Message(ref m) if m.body == "hi"));

        let _server = writer.await.unwrap();
        assert!(captured.text().starts_with(HEADER));
        assert!(captured.text().contains("<body>hi</body>"));
    }

    #[tokio::test]
    async fn test_header_in_wrong_namespace_is_protocol_error() {
        let (mut server, client) = tokio::io::duplex(1024);
        let mut reader = StanzaReader::new(client, None);
        server
            .write_all(b"<stream:stream xmlns:stream='urn:example'>")
            .await
            .unwrap();
        let err = reader.next_stream_header().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_stream_end_and_eof() {
        let (mut server, client) = tokio::io::duplex(1024);
        let mut reader = StanzaReader::new(client, None);
        server
            .write_all(format!("{HEADER}</stream:stream>").as_bytes())
            .await
            .unwrap();
        reader.next_stream_header().await.unwrap();
        assert!(matches!(
            reader.next_element().await,
            Err(XmppError::StreamClosed)
        ));

        drop(server);
        let err = reader.next_element().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_unterminated_element_hits_buffer_limit() {
        let (mut server, client) = tokio::io::duplex(64 * 1024);
        let mut reader = StanzaReader::new(client, None);

        let flood = tokio::spawn(async move {
            let _ = server.write_all(HEADER.as_bytes()).await;
            let _ = server.write_all(b"<message><body>").await;
            let filler = vec![b'a'; 64 * 1024];
            for _ in 0..(2 * MAX_STANZA_BUFFER_SIZE / filler.len()) {
                if server.write_all(&filler).await.is_err() {
                    break;
                }
            }
            server
        });

        reader.next_stream_header().await.unwrap();
        let err = reader.next_element().await.unwrap_err();
        assert!(matches!(err, XmppError::MalformedXml(_)));
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(reader.buffer.len() <= MAX_STANZA_BUFFER_SIZE + READ_CHUNK);

        drop(reader);
        let _server = flood.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_unlogged_skips_capture() {
        let (client, mut server) = tokio::io::duplex(1024);
        let captured = Shared::default();
        let mut writer = StanzaWriter::new(client, Some(capture_sink(captured.clone())));

        writer.send("<presence/>").await.unwrap();
        writer.send_unlogged("<auth>secret</auth>").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut wire = String::new();
        server.read_to_string(&mut wire).await.unwrap();
        assert_eq!(wire, "<presence/><auth>secret</auth>");
        assert_eq!(captured.text(), "<presence/>");
    }
}
