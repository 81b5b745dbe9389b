//! courier-core — shared types for the courier push pipeline.
//! All other courier crates depend on this one.

pub mod config;
pub mod encoding;
pub mod frame;
pub mod message;
pub mod protocol;

pub use frame::{Envelope, RequestFrame, ResponseFrame};
pub use message::{InboundMessage, MessageKind, Outcome};
pub use protocol::{ProtocolError, RemoteDevice};
