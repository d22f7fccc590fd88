//! Transport Server: the single viewer connection and its wire format.

pub mod cache;
pub mod codec;
pub mod discovery;
pub mod pairing;
pub mod server;

pub use cache::GopCache;
pub use codec::{Handshake, InputMessage, ServerCodec, ViewerCodec};
pub use discovery::{Announcement, DiscoveryResponder};
pub use server::{ConnectionHandle, TransportEvent, TransportServer, TransportSetup, TransportStats};
