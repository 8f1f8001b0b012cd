//! Radio API of the ESB peripheral.

use crate::{DeviceConfig, DeviceError, SerialTransport, TransportStats};
use esb_routing::{PushRouter, SubscriptionId};
use esb_wire::{Command, FirmwareVersion, ListenFilter, RadioMessage, MAX_RADIO_PAYLOAD};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Handle to an open ESB peripheral
#[derive(Debug)]
pub struct EsbDevice {
    transport: SerialTransport,
}

impl EsbDevice {
    /// Open the peripheral on the serial device at `path`
    pub fn open(path: &str, config: &DeviceConfig) -> Result<Self, DeviceError> {
        Ok(Self {
            transport: SerialTransport::open(path, config)?,
        })
    }

    /// Drive the peripheral over an already open byte stream
    pub fn from_stream<S>(name: impl Into<String>, stream: S, config: &DeviceConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            transport: SerialTransport::from_stream(name, stream, config),
        }
    }

    /// Whether the peripheral is connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Listener registry for pushed radio messages
    pub fn router(&self) -> &Arc<PushRouter> {
        self.transport.router()
    }

    /// Transport counters
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Read the firmware version
    pub async fn firmware_version(&self) -> Result<FirmwareVersion, DeviceError> {
        let answer = self
            .transport
            .send(Command::FirmwareVersion.as_u8(), &[])
            .await?;
        if answer.error != 0 {
            return Err(DeviceError::Peripheral(answer.error));
        }

        let version = FirmwareVersion::from_payload(&answer.payload)?;
        debug!("Peripheral firmware version {}", version);
        Ok(version)
    }

    /// Send a radio message and wait for the answer of the target
    pub async fn transfer(&self, msg: &RadioMessage) -> Result<RadioMessage, DeviceError> {
        let reply = self.transfer_answer(msg).await?;
        if reply.error != 0 {
            return Err(DeviceError::Peripheral(reply.error));
        }

        debug!(
            "Transfer 0x{:02x} to {} answered with {} bytes",
            msg.command,
            msg.address,
            reply.payload.len()
        );
        Ok(reply)
    }

    /// Send a radio message and return the answer of the target, which may
    /// carry a non-zero radio error byte. Only a USB level error byte fails.
    pub async fn transfer_answer(&self, msg: &RadioMessage) -> Result<RadioMessage, DeviceError> {
        let payload = self.request_payload(msg)?;
        let answer = self
            .transport
            .send(Command::Transfer.as_u8(), &payload)
            .await?;
        if answer.error != 0 {
            return Err(DeviceError::Peripheral(answer.error));
        }

        Ok(RadioMessage::decode_answer(msg.address, &answer.payload)?)
    }

    /// Send a radio message without waiting for an answer
    pub async fn send(&self, msg: &RadioMessage) -> Result<(), DeviceError> {
        let payload = self.request_payload(msg)?;
        self.transport
            .post(Command::SendNoReply.as_u8(), &payload)
            .await
    }

    /// Deliver radio pushes passing `filter` to `sender`
    pub fn add_listener(
        &self,
        filter: ListenFilter,
        sender: mpsc::Sender<RadioMessage>,
    ) -> Result<SubscriptionId, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        Ok(self.router().subscribe(filter, sender)?)
    }

    /// Remove every listener bound to `sender`
    pub fn remove_listener(&self, sender: &mpsc::Sender<RadioMessage>) -> usize {
        self.router().unsubscribe(sender)
    }

    /// Close the peripheral. Pending transfers fail and listeners are dropped.
    pub async fn close(&self) {
        info!("Closing ESB device {}", self.transport.name());
        self.transport.close().await;
    }

    fn request_payload(&self, msg: &RadioMessage) -> Result<bytes::Bytes, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        if msg.payload.len() > MAX_RADIO_PAYLOAD {
            return Err(DeviceError::Size {
                size: msg.payload.len(),
                limit: MAX_RADIO_PAYLOAD,
            });
        }
        Ok(msg.encode_addressed()?)
    }
}
