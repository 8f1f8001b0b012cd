//! Command identifiers and status codes for both protocol layers.

use crate::WireError;
use std::fmt;

/// Serial commands understood by the radio peripheral firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Read the firmware version
    FirmwareVersion = 0x10,
    /// Send a radio message and wait for the answer
    Transfer = 0x30,
    /// Send a radio message without waiting for an answer
    SendNoReply = 0x31,
    /// Echo test
    Test = 0x61,
    /// Test interrupt
    TestIrq = 0x80,
    /// Radio message received (unsolicited push)
    RadioReceive = 0x81,
}

impl Command {
    /// Raw command byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Command::FirmwareVersion),
            0x30 => Ok(Command::Transfer),
            0x31 => Ok(Command::SendNoReply),
            0x61 => Ok(Command::Test),
            0x80 => Ok(Command::TestIrq),
            0x81 => Ok(Command::RadioReceive),
            _ => Err(WireError::Malformed("serial command")),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::FirmwareVersion => "firmware-version",
            Command::Transfer => "transfer",
            Command::SendNoReply => "send-no-reply",
            Command::Test => "test",
            Command::TestIrq => "test-irq",
            Command::RadioReceive => "radio-receive",
        };
        write!(f, "{}", name)
    }
}

/// Commands of the outward TCP bridge protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BridgeCommand {
    /// Radio transfer request and its answer
    Transfer = 0x10,
    /// Register a listener for pushed radio messages
    RegisterListener = 0x20,
    /// Pushed radio message
    Notification = 0x21,
}

impl BridgeCommand {
    /// Raw command byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<BridgeCommand> for u8 {
    fn from(cmd: BridgeCommand) -> Self {
        cmd as u8
    }
}

impl TryFrom<u8> for BridgeCommand {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(BridgeCommand::Transfer),
            0x20 => Ok(BridgeCommand::RegisterListener),
            0x21 => Ok(BridgeCommand::Notification),
            _ => Err(WireError::Malformed("bridge command")),
        }
    }
}

/// Error byte carried in bridge answers.
///
/// A non-zero error reported by the peripheral is forwarded verbatim and
/// therefore does not necessarily map to one of these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BridgeStatus {
    /// Success
    Ok = 0x00,
    /// Request payload has an invalid size
    PayloadSize = 0x01,
    /// Transfer to the peripheral failed
    TransferError = 0x02,
    /// Unknown bridge command
    UnknownCommand = 0x03,
}

impl BridgeStatus {
    /// Raw error byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<BridgeStatus> for u8 {
    fn from(status: BridgeStatus) -> Self {
        status as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_conversion() {
        for cmd in [
            Command::FirmwareVersion,
            Command::Transfer,
            Command::SendNoReply,
            Command::Test,
            Command::TestIrq,
            Command::RadioReceive,
        ] {
            assert_eq!(Command::try_from(cmd.as_u8()), Ok(cmd));
        }
        assert!(Command::try_from(0x42).is_err());
        assert_eq!(u8::from(Command::RadioReceive), 0x81);
    }

    #[test]
    fn test_bridge_command_conversion() {
        assert_eq!(BridgeCommand::try_from(0x10), Ok(BridgeCommand::Transfer));
        assert_eq!(
            BridgeCommand::try_from(0x20),
            Ok(BridgeCommand::RegisterListener)
        );
        assert_eq!(
            BridgeCommand::try_from(0x21),
            Ok(BridgeCommand::Notification)
        );
        assert!(BridgeCommand::try_from(0x30).is_err());
    }

    #[test]
    fn test_status_bytes() {
        assert_eq!(BridgeStatus::Ok.as_u8(), 0);
        assert_eq!(BridgeStatus::PayloadSize.as_u8(), 1);
        assert_eq!(BridgeStatus::TransferError.as_u8(), 2);
        assert_eq!(BridgeStatus::UnknownCommand.as_u8(), 3);
    }
}
