//! Crate-wide status codes.
//!
//! Every fallible core operation reports one of these. `Ignored` is
//! informational (a redundant or locked request), not a failure the caller
//! must act on.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvError {
    /// Redundant or locked request; nothing happened, nothing is wrong.
    Ignored,
    /// Out-of-range guest id, or no device claimed an emulated access.
    BadAccess,
    /// No free list-register slot, or the resource is already claimed.
    Busy,
    /// Controller revision or topology the driver does not model.
    UnsupportedFeature,
    /// Unclassified internal failure.
    Unknown,
}

pub type Result<T> = core::result::Result<T, HvError>;

impl fmt::Display for HvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HvError::Ignored => "ignored",
            HvError::BadAccess => "bad access",
            HvError::Busy => "busy",
            HvError::UnsupportedFeature => "unsupported feature",
            HvError::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}
