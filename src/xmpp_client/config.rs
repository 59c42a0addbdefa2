use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use rustls::pki_types::CertificateDer;
use tracing::warn;

/// A shared byte sink. Shared so the same sink keeps receiving data after the
/// stream is swapped for its TLS-wrapped replacement.
pub type CaptureSink = Arc<Mutex<dyn Write + Send>>;

/// Wrap any writer as a [`CaptureSink`].
pub fn capture_sink<W: Write + Send + 'static>(writer: W) -> CaptureSink {
    Arc::new(Mutex::new(writer))
}

/// Connection options. None of the sinks change protocol behavior.
#[derive(Clone, Default)]
pub struct Config {
    /// Force the STARTTLS branch before any other negotiation.
    pub tls_required: bool,
    /// Receives a copy of every raw byte read from the transport.
    pub inbound_capture: Option<CaptureSink>,
    /// Receives a copy of every raw byte written, except credentials.
    pub outbound_capture: Option<CaptureSink>,
    /// Receives short status lines at phase transitions.
    pub progress: Option<CaptureSink>,
    /// Trust anchors for the server certificate. Empty means the platform's native roots.
    pub root_certificates: Vec<CertificateDer<'static>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tls_required(mut self, required: bool) -> Self {
        self.tls_required = required;
        self
    }

    pub fn inbound_capture(mut self, sink: CaptureSink) -> Self {
        self.inbound_capture = Some(sink);
        self
    }

    pub fn outbound_capture(mut self, sink: CaptureSink) -> Self {
        self.outbound_capture = Some(sink);
        self
    }

    pub fn progress(mut self, sink: CaptureSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Write one status line to the progress sink, if any.
    pub(crate) fn report(&self, line: &str) {
        if let Some(sink) = &self.progress {
            copy_to(sink, format!("{line}\n").as_bytes());
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("tls_required", &self.tls_required)
            .field("inbound_capture", &self.inbound_capture.is_some())
            .field("outbound_capture", &self.outbound_capture.is_some())
            .field("progress", &self.progress.is_some())
            .field("root_certificates", &self.root_certificates.len())
            .finish()
    }
}

/// Copy bytes to a sink. Sink failures are logged and otherwise ignored.
pub(crate) fn copy_to(sink: &CaptureSink, bytes: &[u8]) {
    let mut guard = match sink.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = guard.write_all(bytes).and_then(|_| guard.flush()) {
        warn!(error = %e, "Capture sink write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_report_writes_lines_to_progress_sink() {
        let buf = Shared::default();
        let config = Config::new().progress(capture_sink(buf.clone()));
        config.report("Making TCP connection to localhost:5222");
        config.report("Authentication successful");
        assert_eq!(
            String::from_utf8(buf.0.lock().unwrap().clone()).unwrap(),
            "Making TCP connection to localhost:5222\nAuthentication successful\n"
        );
    }

    #[test]
    fn test_report_without_sink_is_noop() {
        Config::new().tls_required(true).report("nothing to see");
    }

    #[test]
    fn test_debug_hides_sinks() {
        let config = Config::new().inbound_capture(capture_sink(Vec::new()));
        let debug = format!("{config:?}");
        assert!(debug.contains("inbound_capture: true"));
        assert!(debug.contains("tls_required: false"));
    }
}
