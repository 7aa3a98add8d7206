//! Device-to-cloud protocol stack.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         engine                            │
//! │     handshake · dispatch · publish/subscribe · time       │
//! ├──────────────┬──────────────┬──────────────┬──────────────┤
//! │   message    │     ota      │    events    │  keepalive   │
//! ├──────────────┴──────────────┴──────────────┴──────────────┤
//! │                coap (header, options, PKCS#7)             │
//! ├───────────────────────────────┬───────────────────────────┤
//! │  session (AES-CBC, IV chain)  │   transport (blocking I/O)│
//! ├───────────────────────────────┴───────────────────────────┤
//! │                       crypto port                         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Only `engine` touches more than one collaborator; everything below it
//! is a pure function or a small state machine and is tested in place.

pub mod coap;
pub mod crypto;
pub mod engine;
pub mod events;
pub mod handshake;
pub mod keepalive;
pub mod message;
pub mod ota;
pub mod session;
pub mod transport;

pub use crypto::Crypto;
pub use engine::{DEFAULT_BUFFER_SIZE, Ports, Protocol};
pub use events::{EventType, SubscriptionScope};
pub use message::MessageKind;
pub use session::Session;
pub use transport::Transport;
