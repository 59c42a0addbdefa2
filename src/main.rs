use fluux_xmpp_client::xmpp_client::{self, capture_sink, Config, LoggingHandler};
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_usage() {
    eprintln!("fluux-xmpp-client v{} (build {})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    eprintln!();
    eprintln!("Usage: fluux-xmpp-client --address=HOST:PORT --user=NAME --domain=DOMAIN [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("      --address=HOST:PORT  Server to connect to (default: DOMAIN:5222)");
    eprintln!("      --user=NAME          Authentication identity (local part)");
    eprintln!("      --domain=DOMAIN      XMPP domain of the account");
    eprintln!("      --tls                Require STARTTLS before authenticating");
    eprintln!("  -v, --verbose            Enable verbose logging to stderr (no XMPP traffic)");
    eprintln!("      --verbose=xmpp       Enable verbose logging including XMPP packet content");
    eprintln!("      --log-file=PATH      Override log file directory (default: platform log dir)");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Once connected, each stdin line of the form `JID message text` is sent");
    eprintln!("as a chat message. `/quit` closes the stream.");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  XMPP_PASSWORD         Account password (required)");
    eprintln!("  RUST_LOG              Override log filter (e.g. RUST_LOG=debug)");
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .find_map(|arg| arg.strip_prefix(name).map(|s| s.to_string()))
}

fn main() {
    // Parse CLI flags early, before tracing subscriber init
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        std::process::exit(0);
    }

    // Parse verbose level: --verbose / -v (default, no XMPP packets) or --verbose=xmpp (with packets)
    let verbose_level = args.iter().find_map(|arg| {
        if arg == "--verbose" || arg == "-v" {
            Some("default")
        } else {
            arg.strip_prefix("--verbose=")
        }
    });
    let verbose = verbose_level.is_some();

    // Parse --log-file=<path> option
    let log_file_path = arg_value(&args, "--log-file=");

    let (Some(user), Some(domain)) = (arg_value(&args, "--user="), arg_value(&args, "--domain="))
    else {
        print_usage();
        std::process::exit(2);
    };
    let address = arg_value(&args, "--address=").unwrap_or_else(|| format!("{domain}:5222"));
    let tls_required = args.iter().any(|arg| arg == "--tls");
    let Ok(password) = std::env::var("XMPP_PASSWORD") else {
        eprintln!("XMPP_PASSWORD is not set");
        std::process::exit(2);
    };

    // Determine the log directory: --log-file=<path> overrides the default platform path
    let log_dir = if let Some(ref path) = log_file_path {
        std::path::PathBuf::from(path)
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."))
    } else {
        // Platform log directory:
        //   macOS:   ~/Library/Logs/com.processone.fluux-xmpp-client/
        //   Linux:   ~/.local/share/com.processone.fluux-xmpp-client/logs/  (or $XDG_DATA_HOME)
        //   Windows: %APPDATA%\com.processone.fluux-xmpp-client\logs\
        let base = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let dir = base.join("com.processone.fluux-xmpp-client").join("logs");

        #[cfg(target_os = "macos")]
        let dir = dirs::home_dir()
            .map(|h| h.join("Library").join("Logs").join("com.processone.fluux-xmpp-client"))
            .unwrap_or(dir);

        dir
    };

    // Initialize tracing subscriber:
    // - Always write to a log file in the platform log directory
    // - Optionally add stderr output when --verbose is passed
    {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("Warning: could not create log directory '{}': {}", log_dir.display(), e);
        }

        let file_filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new("fluux_xmpp_client=info,info")
        };

        // File layer: daily-rotating log file, non-blocking writes
        let file_appender = tracing_appender::rolling::daily(&log_dir, "fluux-xmpp-client.log");
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        // Stderr layer: only when --verbose or --log-file is passed
        let stderr_layer = if verbose || log_file_path.is_some() || std::env::var("RUST_LOG").is_ok() {
            let effective_level = verbose_level.or(if log_file_path.is_some() { Some("default") } else { None });

            let stderr_filter = if std::env::var("RUST_LOG").is_ok() {
                EnvFilter::from_default_env()
            } else if effective_level == Some("xmpp") {
                EnvFilter::new("fluux_xmpp_client=debug,info")
            } else {
                EnvFilter::new("fluux_xmpp_client=info,info")
            };

            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(stderr_filter),
            )
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .init();

        // Keep the non-blocking guard alive until process exit.
        std::mem::forget(_guard);

        eprintln!("Log file: {}", log_dir.display());
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let config = Config::new()
        .tls_required(tls_required)
        .progress(capture_sink(std::io::stderr()));

    if let Err(e) = runtime.block_on(run(address, user, domain, password, config)) {
        tracing::error!(error = %e, kind = ?e.kind(), "Session ended with error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(
    address: String,
    user: String,
    domain: String,
    password: String,
    config: Config,
) -> Result<(), xmpp_client::XmppError> {
    let conn = xmpp_client::dial(&address, &user, &domain, &password, config).await?;
    eprintln!("Connected as {}", conn.jid());

    let (mut sender, mut listener) = conn.into_split();
    listener.set_handler(Box::new(LoggingHandler));
    let roster = listener.roster();
    let mut listen_task = tokio::spawn(listener.listen());

    sender.signal_presence("chat").await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if line == "/roster" {
                    eprintln!("Seen online: {:?}", roster.snapshot());
                    continue;
                }
                match line.split_once(' ') {
                    Some((to, body)) if !to.is_empty() => sender.send_chat(to, body).await?,
                    _ => eprintln!("Expected `JID message text`"),
                }
            }
            ended = &mut listen_task => {
                match ended {
                    Ok(e) => tracing::warn!(error = %e, "Server connection lost"),
                    Err(e) => tracing::error!(error = %e, "Listener task failed"),
                }
                return Ok(());
            }
        }
    }

    sender.close().await?;
    listen_task.abort();
    Ok(())
}
