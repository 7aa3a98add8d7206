//! Adapters: host implementations of the protocol ports.
//!
//! | Adapter | Implements  | Connects to               |
//! |---------|-------------|---------------------------|
//! | `tcp`   | Transport   | `std::net::TcpStream`     |
//! | `time`  | Clock       | `std::time::Instant`      |
//!
//! Target firmware supplies its own transport and clock; these exist for
//! host tools, simulators and tests.

pub mod tcp;
pub mod time;

pub use tcp::TcpTransport;
pub use time::SystemClock;
