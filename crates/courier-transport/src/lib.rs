//! courier-transport — the persistent push connection to the relay.

pub mod credentials;
pub mod tls;
pub mod transport;

pub use credentials::{CredentialsProvider, StaticCredentials};
pub use tls::TlsError;
pub use transport::{backoff_delay, socket_url, PushTransport, TransportError};
