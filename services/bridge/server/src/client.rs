//! Bridge protocol client.
//!
//! The client applies the same two primitives as the device layer one level
//! up: answers from the bridge resolve the single outstanding request, and
//! notification packets are fanned out to local listeners.

use crate::BridgeError;
use bytes::BytesMut;
use esb_routing::{PushRouter, RequestCorrelator, SubscriptionId};
use esb_wire::{BridgeAnswer, BridgeRequest, ListenFilter, RadioMessage, MAX_RADIO_PAYLOAD};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default time to wait for a bridge answer
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Connection to a running bridge server
#[derive(Debug)]
pub struct BridgeClient {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    correlator: Arc<RequestCorrelator<BridgeAnswer>>,
    router: Arc<PushRouter>,
    timeout: Duration,
}

impl BridgeClient {
    /// Connect to the bridge at `addr`
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, BridgeError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to bridge at {}", stream.peer_addr()?);

        let (read_half, write_half) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let correlator = Arc::new(RequestCorrelator::new());
        let router = Arc::new(PushRouter::new());

        let reader = tokio::spawn(read_loop(
            read_half,
            connected.clone(),
            correlator.clone(),
            router.clone(),
        ));

        Ok(Self {
            writer: tokio::sync::Mutex::new(Some(write_half)),
            reader: Mutex::new(Some(reader)),
            connected,
            correlator,
            router,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        })
    }

    /// Use `timeout` when waiting for answers
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the connection is alive
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a request and wait for the answer carrying the same command
    pub async fn request(&self, request: &BridgeRequest) -> Result<BridgeAnswer, BridgeError> {
        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if self.is_connected() => writer,
            _ => return Err(BridgeError::NotConnected),
        };
        let bytes = request.encode()?;

        let pending = self.correlator.begin(request.command);
        if let Err(e) = writer.write_all(&bytes).await {
            self.correlator.abandon(pending);
            return Err(e.into());
        }

        Ok(self.correlator.await_reply(pending, self.timeout).await?)
    }

    /// Transfer a radio message through the bridge
    pub async fn transfer(&self, msg: &RadioMessage) -> Result<RadioMessage, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        if msg.payload.len() > MAX_RADIO_PAYLOAD {
            return Err(BridgeError::Size {
                size: msg.payload.len(),
                limit: MAX_RADIO_PAYLOAD,
            });
        }

        let answer = self.request(&BridgeRequest::transfer(msg)?).await?;
        if answer.error != 0 && answer.payload.is_empty() {
            return Err(BridgeError::Remote(answer.error));
        }

        let reply = RadioMessage::decode_answer(msg.address, &answer.payload)?;
        if reply.error != 0 {
            return Err(BridgeError::Peripheral(reply.error));
        }
        if answer.error != 0 {
            return Err(BridgeError::Remote(answer.error));
        }
        Ok(reply)
    }

    /// Register `sender` with the bridge for pushes passing `filter`
    pub async fn add_listener(
        &self,
        filter: ListenFilter,
        sender: tokio::sync::mpsc::Sender<RadioMessage>,
    ) -> Result<SubscriptionId, BridgeError> {
        if sender.is_closed() {
            return Err(BridgeError::InvalidParameter(
                esb_routing::RouterError::InvalidChannel,
            ));
        }

        let answer = self
            .request(&BridgeRequest::register_listener(&filter))
            .await?;
        if answer.error != 0 {
            return Err(BridgeError::Remote(answer.error));
        }

        let id = self.router.subscribe(filter, sender)?;
        debug!("Registered bridge listener {} for {}", id, filter);
        Ok(id)
    }

    /// Remove every local listener bound to `sender`.
    ///
    /// The bridge protocol has no deregistration, so the server keeps
    /// forwarding until the connection closes; those pushes are dropped here.
    pub fn remove_listener(&self, sender: &tokio::sync::mpsc::Sender<RadioMessage>) -> usize {
        self.router.unsubscribe(sender)
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }

        self.correlator.cancel();
        self.router.clear();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Failed to shut down bridge connection: {}", e);
            }
        }

        if was_connected {
            info!("Disconnected from bridge");
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    connected: Arc<AtomicBool>,
    correlator: Arc<RequestCorrelator<BridgeAnswer>>,
    router: Arc<PushRouter>,
) {
    let mut buf = BytesMut::with_capacity(1024);

    'read: loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                info!("Bridge closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Bridge read failed: {}", e);
                break;
            }
        }

        loop {
            let answer = match BridgeAnswer::decode(&mut buf) {
                Ok(Some(answer)) => answer,
                Ok(None) => break,
                Err(e) => {
                    warn!("Invalid bridge packet: {}", e);
                    break 'read;
                }
            };

            if answer.is_notification() {
                match RadioMessage::decode_addressed(&answer.payload) {
                    Ok(msg) => {
                        router.dispatch(&msg);
                    }
                    Err(e) => warn!("Dropping malformed notification: {}", e),
                }
            } else if let Some(answer) = correlator.resolve(answer) {
                warn!("Dropping unsolicited bridge answer 0x{:02x}", answer.command);
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    correlator.cancel();
}
