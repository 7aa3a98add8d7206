//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives the protocol engine
//! against the scripted mock cloud in `mock_cloud`. All tests run on the
//! host with no network.

mod events_tests;
mod keepalive_tests;
mod mock_cloud;
