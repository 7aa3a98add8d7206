//! CloudLink device protocol library.
//!
//! Implements the device side of an encrypted, CoAP-style cloud session:
//! RSA handshake, AES-128-CBC framing with chained IVs, remote function
//! and variable access, OTA chunk transfer, and event publish/subscribe.
//!
//! The protocol core is `no_std` and heap-free. Platform services reach
//! it through the traits in [`ports`] and [`protocol::Transport`] /
//! [`protocol::Crypto`]; host adapters live behind the `std` feature.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod ports;
pub mod protocol;
pub mod queue;

#[cfg(feature = "std")]
pub mod adapters;

pub use config::ProtocolConfig;
pub use error::{ProtocolError, Result};
