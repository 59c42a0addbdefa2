pub mod xmpp_client;

pub use xmpp_client::{dial, Config, Connection, ErrorKind, Handler, XmppError};
