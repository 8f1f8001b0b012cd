//! Per-connection bridge session.
//!
//! A session reads requests sequentially from its socket and, in the same
//! loop, forwards radio pushes for the listeners it registered. The session
//! holds at most one device subscription and keeps its filters locally, so a
//! push matching several of them is forwarded once.

use crate::BridgeError;
use bytes::{Bytes, BytesMut};
use esb_device::{DeviceError, EsbDevice};
use esb_routing::{PushRouter, SubscriptionId};
use esb_wire::{
    BridgeAnswer, BridgeCommand, BridgeRequest, BridgeStatus, ListenFilter, RadioMessage,
    ADDRESS_SIZE, MAX_RADIO_PAYLOAD,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// State of one connected bridge client
#[derive(Debug)]
pub struct BridgeSession {
    device: Arc<EsbDevice>,
    peer: SocketAddr,
    listener_buffer: usize,
}

/// Listener filters of one session and its device subscription. Dropping
/// it removes the subscription, including when the session task is aborted.
struct SessionListeners {
    router: Arc<PushRouter>,
    sender: mpsc::Sender<RadioMessage>,
    peer: SocketAddr,
    filters: Vec<ListenFilter>,
    subscription: Option<SubscriptionId>,
}

impl SessionListeners {
    fn wants(&self, msg: &RadioMessage) -> bool {
        self.filters.iter().any(|filter| filter.matches(msg))
    }
}

impl Drop for SessionListeners {
    fn drop(&mut self) {
        if self.router.unsubscribe(&self.sender) > 0 {
            info!(
                "Removed {} listeners of bridge client {}",
                self.filters.len(),
                self.peer
            );
        }
    }
}

impl BridgeSession {
    /// Create a session for a client at `peer`
    pub fn new(device: Arc<EsbDevice>, peer: SocketAddr, listener_buffer: usize) -> Self {
        Self {
            device,
            peer,
            listener_buffer: listener_buffer.max(1),
        }
    }

    /// Serve the client until it disconnects
    pub async fn run<S>(self, stream: S) -> Result<(), BridgeError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (push_tx, mut push_rx) = mpsc::channel(self.listener_buffer);
        let mut listeners = SessionListeners {
            router: self.device.router().clone(),
            sender: push_tx,
            peer: self.peer,
            filters: Vec::new(),
            subscription: None,
        };

        let mut buf = BytesMut::with_capacity(1024);
        loop {
            tokio::select! {
                read = reader.read_buf(&mut buf) => {
                    if read? == 0 {
                        debug!("Bridge client {} closed the connection", self.peer);
                        break;
                    }

                    while let Some(request) = BridgeRequest::decode(&mut buf)? {
                        let answer = self.handle_request(request, &mut listeners).await;
                        writer.write_all(&answer.encode()?).await?;
                    }
                }

                Some(msg) = push_rx.recv() => {
                    if !listeners.wants(&msg) {
                        continue;
                    }
                    let notification = BridgeAnswer::notification(&msg)?;
                    writer.write_all(&notification.encode()?).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_request(
        &self,
        request: BridgeRequest,
        listeners: &mut SessionListeners,
    ) -> BridgeAnswer {
        match BridgeCommand::try_from(request.command) {
            Ok(BridgeCommand::Transfer) => self.handle_transfer(&request.payload).await,
            Ok(BridgeCommand::RegisterListener) => {
                self.handle_register(&request.payload, listeners)
            }
            Ok(BridgeCommand::Notification) | Err(_) => {
                warn!(
                    "Unknown bridge command 0x{:02x} from {}",
                    request.command, self.peer
                );
                BridgeAnswer::failure(request.command, BridgeStatus::UnknownCommand.as_u8())
            }
        }
    }

    async fn handle_transfer(&self, payload: &Bytes) -> BridgeAnswer {
        let command = BridgeCommand::Transfer.as_u8();

        let len = payload.len();
        if !(ADDRESS_SIZE + 1..=ADDRESS_SIZE + 1 + MAX_RADIO_PAYLOAD).contains(&len) {
            warn!("Transfer from {} with invalid payload size {}", self.peer, len);
            return BridgeAnswer::failure(command, BridgeStatus::PayloadSize.as_u8());
        }
        let msg = match RadioMessage::decode_addressed(payload) {
            Ok(msg) => msg,
            Err(_) => return BridgeAnswer::failure(command, BridgeStatus::PayloadSize.as_u8()),
        };

        match self.device.transfer_answer(&msg).await {
            Ok(reply) => {
                let status = if reply.error == 0 {
                    BridgeStatus::Ok
                } else {
                    warn!(
                        "Transfer to {} for {} answered with radio error 0x{:02x}",
                        msg.address, self.peer, reply.error
                    );
                    BridgeStatus::TransferError
                };
                match reply.encode_answer() {
                    Ok(answer) => BridgeAnswer::new(command, status.as_u8(), answer),
                    Err(_) => BridgeAnswer::failure(command, BridgeStatus::TransferError.as_u8()),
                }
            }
            Err(e) => {
                warn!("Transfer to {} for {} failed: {}", msg.address, self.peer, e);
                BridgeAnswer::failure(command, transfer_status(&e))
            }
        }
    }

    fn handle_register(
        &self,
        payload: &Bytes,
        listeners: &mut SessionListeners,
    ) -> BridgeAnswer {
        let command = BridgeCommand::RegisterListener.as_u8();

        let filter = match ListenFilter::decode(payload) {
            Ok(filter) => filter,
            Err(_) => {
                warn!(
                    "Listener registration from {} with invalid payload size {}",
                    self.peer,
                    payload.len()
                );
                return BridgeAnswer::failure(command, BridgeStatus::PayloadSize.as_u8());
            }
        };

        if listeners.subscription.is_none() {
            match self
                .device
                .add_listener(ListenFilter::any(), listeners.sender.clone())
            {
                Ok(id) => listeners.subscription = Some(id),
                Err(e) => {
                    warn!("Listener registration for {} failed: {}", self.peer, e);
                    return BridgeAnswer::failure(command, BridgeStatus::TransferError.as_u8());
                }
            }
        }

        listeners.filters.push(filter);
        info!(
            "Bridge client {} listening on {} ({} filters)",
            self.peer,
            filter,
            listeners.filters.len()
        );
        BridgeAnswer::ok(command, Bytes::new())
    }
}

/// Error byte reported to the bridge client for a failed transfer. Only
/// bridge side size validation reports `0x01`.
pub fn transfer_status(err: &DeviceError) -> u8 {
    match err {
        DeviceError::Size { .. } => BridgeStatus::PayloadSize.as_u8(),
        _ => BridgeStatus::TransferError.as_u8(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_status_mapping() {
        assert_eq!(transfer_status(&DeviceError::Peripheral(0x42)), 0x02);
        assert_eq!(transfer_status(&DeviceError::Peripheral(0x01)), 0x02);
        assert_eq!(
            transfer_status(&DeviceError::Size { size: 33, limit: 32 }),
            0x01
        );
        assert_eq!(transfer_status(&DeviceError::Timeout(0x30)), 0x02);
        assert_eq!(transfer_status(&DeviceError::NotConnected), 0x02);
        assert_eq!(
            transfer_status(&DeviceError::CommandMismatch {
                expected: 0x30,
                actual: 0x10
            }),
            0x02
        );
    }
}
