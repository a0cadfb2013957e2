//! Error types for queue/mailbox construction and executor failures.
//!
//! Capacity and timeout conditions are not errors: they surface as `0`,
//! `None` or a returned value and are expected to be retried by the caller.

use thiserror::Error;

/// Errors raised while building queues, channels, mailboxes or pools.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Ring capacity must be a power of two so `seq & mask` addresses a slot
    #[error("capacity {capacity} is not a power of two")]
    CapacityNotPowerOfTwo { capacity: usize },

    /// Ring capacity below the minimum of two slots
    #[error("capacity {capacity} is below the minimum of {min}")]
    CapacityTooSmall { capacity: usize, min: usize },

    /// A batch parameter must lie in `1..capacity`
    #[error("{name} = {value} must lie in 1..{capacity}")]
    BatchOutOfRange {
        name: &'static str,
        value: usize,
        capacity: usize,
    },

    /// An argument region would not be addressable with 32-bit offsets
    #[error("{region} region of {len} entries exceeds the addressable limit")]
    RegionTooLarge { region: &'static str, len: usize },

    /// A numeric setting outside its accepted range
    #[error("invalid setting {name} = {value}")]
    InvalidSetting { name: &'static str, value: u64 },
}

/// Failures reported by (or on behalf of) a message executor.
///
/// These are isolated to the call that produced them: the drain loop logs
/// them and moves on to the next message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// An argument was requested outside any call
    #[error("no call is being decoded")]
    NoCall,

    /// The call carries fewer argument bytes than requested
    #[error("argument of {wanted} bytes requested but only {left} remain in the call")]
    ArgOverrun { wanted: usize, left: usize },

    /// The call carries no further reference argument
    #[error("no reference argument left in the call")]
    MissingRef,

    /// The reference argument is not of the requested type
    #[error("reference argument is not a {expected}")]
    RefMismatch { expected: &'static str },

    /// The executor rejected the call
    #[error("call failed: {0}")]
    Failed(String),

    /// The executor panicked
    #[error("executor panicked: {0}")]
    Panicked(String),
}
