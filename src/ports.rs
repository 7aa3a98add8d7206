//! Port traits: the boundary between the protocol engine and the device.
//!
//! ```text
//!   cloud ──▶ Protocol (engine) ──▶ Port trait ──▶ firmware adapter
//! ```
//!
//! The engine is generic over these traits, so it never touches flash,
//! timers or the user's function table directly. The byte transport and
//! the crypto primitives are ports too; they live next to the code that
//! drives them in [`crate::protocol::transport`] and
//! [`crate::protocol::crypto`].

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock. Wraps at `u32::MAX`; callers compare
/// timestamps with `wrapping_sub`.
pub trait Clock {
    fn millis(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Firmware port (OTA storage, signalling, wall clock)
// ───────────────────────────────────────────────────────────────

/// Firmware storage and device-side hooks used by the OTA path.
pub trait FirmwarePort {
    /// Erase/prepare the staging area before the first chunk.
    fn prepare_for_firmware_update(&mut self);

    /// Commit the staged image. Called after the cloud's UPDATE_DONE.
    fn finish_firmware_update(&mut self);

    /// Abandon a partial image after the session died mid-transfer.
    fn abort_firmware_update(&mut self) {}

    /// CRC over a chunk payload, compared against the cloud's value.
    fn calculate_crc(&mut self, data: &[u8]) -> u32;

    /// Store a verified chunk. Returns the index of the next chunk the
    /// device expects.
    fn save_firmware_chunk(&mut self, data: &[u8]) -> u16;

    /// Start or stop the "find my device" indication.
    fn signal(&mut self, on: bool);

    /// Whether the image applied before this boot came from a successful OTA.
    fn was_ota_upgrade_successful(&self) -> bool;

    /// Told once the hello carrying the OTA result has gone out.
    fn ota_upgrade_status_sent(&mut self);

    /// Wall-clock time (Unix seconds) received from the cloud.
    fn set_time(&mut self, _unix_secs: u32) {}
}

// ───────────────────────────────────────────────────────────────
// Descriptor port (cloud functions, variables, subscribed events)
// ───────────────────────────────────────────────────────────────

/// Wire type of a cloud variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    Boolean,
    Int,
    String,
    Double,
}

impl VariableType {
    /// Type code used in the describe document and on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Self::Boolean => 1,
            Self::Int => 2,
            Self::String => 4,
            Self::Double => 9,
        }
    }
}

/// Current value of a cloud variable, borrowed from the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableValue<'a> {
    Boolean(bool),
    Int(i32),
    String(&'a str),
    Double(f64),
}

impl VariableValue<'_> {
    pub const fn var_type(&self) -> VariableType {
        match self {
            Self::Boolean(_) => VariableType::Boolean,
            Self::Int(_) => VariableType::Int,
            Self::String(_) => VariableType::String,
            Self::Double(_) => VariableType::Double,
        }
    }
}

/// Registry of user-exposed cloud functions and variables.
///
/// Keys are at most 12 bytes on the wire; longer keys are truncated in
/// the describe document and can never match an inbound request.
pub trait DescriptorPort {
    fn num_functions(&self) -> usize;
    fn function_key(&self, index: usize) -> Option<&str>;
    /// Invoke a function. Unknown keys should return a negative value.
    fn call_function(&mut self, key: &str, arg: &str) -> i32;

    fn num_variables(&self) -> usize;
    fn variable_key(&self, index: usize) -> Option<&str>;
    fn variable_type(&self, key: &str) -> Option<VariableType>;
    fn get_variable(&self, key: &str) -> Option<VariableValue<'_>>;

    /// Event delivered by the cloud for one of the device's subscriptions.
    fn on_event(&mut self, _name: &str, _data: &[u8]) {}
}
