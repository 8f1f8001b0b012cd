//! Peripheral firmware version.

use crate::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Firmware version reported by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Patch version
    pub patch: u8,
}

impl FirmwareVersion {
    /// Parse the `major | minor | patch` answer payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, WireError> {
        match payload {
            [major, minor, patch, ..] => Ok(Self {
                major: *major,
                minor: *minor,
                patch: *patch,
            }),
            _ => Err(WireError::Malformed("firmware version")),
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
