//! Serial transport to the radio peripheral.
//!
//! One background task is the sole reader of the serial stream. It decodes
//! frames, hands frames whose command is a configured push command to the
//! [`PushRouter`], and offers everything else to the [`RequestCorrelator`].
//! Writers take an async mutex that is held across write and reply wait, so
//! at most one request is ever in flight on a transport.

use crate::DeviceError;
use bytes::BytesMut;
use esb_routing::{PushRouter, RequestCorrelator};
use esb_wire::{frame, Command, Frame, FrameDecoder, RadioMessage, FRAME_SIZE};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, trace, warn};

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default time to wait for an answer
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Serial baud rate
    pub baud_rate: u32,
    /// Time to wait for the answer to a request
    pub reply_timeout: Duration,
    /// Commands the firmware uses for unsolicited pushes
    pub push_commands: Vec<u8>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            push_commands: vec![Command::RadioReceive.as_u8()],
        }
    }
}

/// Transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Valid frames received
    pub frames_received: u64,
    /// Decode failures (bad sync, bad CRC, malformed payload)
    pub frames_dropped: u64,
    /// Push frames handed to the router
    pub pushes_dispatched: u64,
    /// Answers nobody was waiting for
    pub unsolicited: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    pushes_dispatched: AtomicU64,
    unsolicited: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            pushes_dispatched: self.pushes_dispatched.load(Ordering::Relaxed),
            unsolicited: self.unsolicited.load(Ordering::Relaxed),
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open byte stream to the peripheral plus its correlation state
pub struct SerialTransport {
    name: String,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    correlator: Arc<RequestCorrelator<Frame>>,
    router: Arc<PushRouter>,
    counters: Arc<Counters>,
    reply_timeout: Duration,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}

impl SerialTransport {
    /// Open the serial device at `path` and start the reader.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &str, config: &DeviceConfig) -> Result<Self, DeviceError> {
        let port = tokio_serial::new(path, config.baud_rate)
            .open_native_async()
            .map_err(std::io::Error::from)?;

        info!(
            "Opened serial device {} at {} baud",
            path, config.baud_rate
        );
        Ok(Self::from_stream(path, port, config))
    }

    /// Run the transport over an already open byte stream
    pub fn from_stream<S>(name: impl Into<String>, stream: S, config: &DeviceConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let name = name.into();
        let (read_half, write_half) = tokio::io::split(stream);

        let connected = Arc::new(AtomicBool::new(true));
        let correlator = Arc::new(RequestCorrelator::new());
        let router = Arc::new(PushRouter::new());
        let counters = Arc::new(Counters::default());

        let reader = FrameReader {
            name: name.clone(),
            push_commands: config.push_commands.clone(),
            connected: connected.clone(),
            correlator: correlator.clone(),
            router: router.clone(),
            counters: counters.clone(),
        };
        let handle = tokio::spawn(reader.run(read_half));

        Self {
            name,
            writer: tokio::sync::Mutex::new(Some(Box::new(write_half))),
            reader: Mutex::new(Some(handle)),
            connected,
            correlator,
            router,
            counters,
            reply_timeout: config.reply_timeout,
        }
    }

    /// Device path or stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the transport is open and its reader is alive
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Listener registry fed by the reader
    pub fn router(&self) -> &Arc<PushRouter> {
        &self.router
    }

    /// Current counters
    pub fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    /// Write a frame and wait for the answer carrying the same command
    pub async fn send(&self, command: u8, payload: &[u8]) -> Result<Frame, DeviceError> {
        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if self.is_connected() => writer,
            _ => return Err(DeviceError::NotConnected),
        };
        let bytes = frame::encode(command, payload)?;

        let pending = self.correlator.begin(command);
        if let Err(e) = write_frame(writer, &bytes).await {
            self.correlator.abandon(pending);
            error!("Serial write to {} failed: {}", self.name, e);
            return Err(e.into());
        }
        trace!("Sent frame 0x{:02x} ({} bytes payload)", command, payload.len());

        let reply = self
            .correlator
            .await_reply(pending, self.reply_timeout)
            .await?;
        Ok(reply)
    }

    /// Write a frame without waiting for an answer
    pub async fn post(&self, command: u8, payload: &[u8]) -> Result<(), DeviceError> {
        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if self.is_connected() => writer,
            _ => return Err(DeviceError::NotConnected),
        };
        let bytes = frame::encode(command, payload)?;

        write_frame(writer, &bytes).await?;
        trace!("Posted frame 0x{:02x}", command);
        Ok(())
    }

    /// Stop the reader, fail the pending request, drop all listeners and
    /// release the stream. Idempotent.
    pub async fn close(&self) {
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
                debug!("Serial shutdown of {} failed: {}", self.name, e);
            }
        }

        if was_connected {
            let stats = self.stats();
            info!(
                "Closed serial device {} (received {}, dropped {}, pushes {}, unsolicited {})",
                self.name,
                stats.frames_received,
                stats.frames_dropped,
                stats.pushes_dispatched,
                stats.unsolicited
            );
        }
    }
}

impl Drop for SerialTransport {
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

async fn write_frame(writer: &mut BoxedWriter, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Background reader state
struct FrameReader {
    name: String,
    push_commands: Vec<u8>,
    connected: Arc<AtomicBool>,
    correlator: Arc<RequestCorrelator<Frame>>,
    router: Arc<PushRouter>,
    counters: Arc<Counters>,
}

impl FrameReader {
    async fn run<R: AsyncRead + Unpin>(self, mut reader: R) {
        let mut buf = BytesMut::with_capacity(FRAME_SIZE * 4);
        let mut decoder = FrameDecoder::new();

        loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    warn!("Serial stream {} closed", self.name);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Serial read from {} failed: {}", self.name, e);
                    break;
                }
            }

            loop {
                match decoder.decode(&mut buf) {
                    Ok(Some(frame)) => self.handle_frame(frame),
                    Ok(None) => break,
                    Err(e) => {
                        Counters::bump(&self.counters.frames_dropped);
                        debug!("Dropping serial bytes: {}", e);
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.router.clear();
        self.correlator.cancel();
    }

    fn handle_frame(&self, frame: Frame) {
        Counters::bump(&self.counters.frames_received);

        if self.push_commands.contains(&frame.command) {
            match RadioMessage::decode_push(&frame.payload) {
                Ok(msg) => {
                    Counters::bump(&self.counters.pushes_dispatched);
                    self.router.dispatch(&msg);
                }
                Err(e) => {
                    Counters::bump(&self.counters.frames_dropped);
                    warn!("Dropping malformed push frame 0x{:02x}: {}", frame.command, e);
                }
            }
            return;
        }

        if let Some(frame) = self.correlator.resolve(frame) {
            Counters::bump(&self.counters.unsolicited);
            warn!(
                "Dropping unsolicited frame 0x{:02x} from {}",
                frame.command, self.name
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use esb_wire::{Address, ListenFilter};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    pub(crate) async fn read_frame(peer: &mut DuplexStream) -> Frame {
        let mut buf = [0u8; FRAME_SIZE];
        peer.read_exact(&mut buf).await.unwrap();
        Frame::decode(&buf).unwrap()
    }

    pub(crate) async fn write_frame_to(peer: &mut DuplexStream, frame: Frame) {
        peer.write_all(&frame.encode().unwrap()).await.unwrap();
    }

    pub(crate) async fn assert_nothing_written(peer: &mut DuplexStream) {
        let mut buf = [0u8; FRAME_SIZE];
        match tokio::time::timeout(Duration::from_millis(50), peer.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => {}
            other => panic!("unexpected bytes written: {:?}", other),
        }
    }

    fn transport(config: &DeviceConfig) -> (SerialTransport, DuplexStream) {
        let (local, peer) = tokio::io::duplex(1024);
        (SerialTransport::from_stream("test", local, config), peer)
    }

    async fn wait_for<F: Fn(TransportStats) -> bool>(transport: &SerialTransport, check: F) {
        for _ in 0..100 {
            if check(transport.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", transport.stats());
    }

    #[tokio::test]
    async fn test_send_receives_matching_answer() {
        let (transport, mut peer) = transport(&DeviceConfig::default());

        let peripheral = tokio::spawn(async move {
            let request = read_frame(&mut peer).await;
            assert_eq!(request.command, 0x10);
            assert!(request.payload.is_empty());
            write_frame_to(&mut peer, Frame::new(0x10, vec![1, 2, 3]).unwrap()).await;
            peer
        });

        let reply = transport.send(0x10, &[]).await.unwrap();
        assert_eq!(reply.payload.as_ref(), &[1, 2, 3]);
        peripheral.await.unwrap();
        assert_eq!(transport.stats().frames_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out() {
        let (transport, _peer) = transport(&DeviceConfig::default());
        let err = transport.send(0x30, &[1]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(0x30)));
    }

    #[tokio::test]
    async fn test_send_command_mismatch() {
        let (transport, mut peer) = transport(&DeviceConfig::default());

        tokio::spawn(async move {
            read_frame(&mut peer).await;
            write_frame_to(&mut peer, Frame::new(0x10, Bytes::new()).unwrap()).await;
            peer
        });

        let err = transport.send(0x30, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::CommandMismatch {
                expected: 0x30,
                actual: 0x10
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (transport, mut peer) = transport(&DeviceConfig::default());

        tokio::spawn(async move {
            read_frame(&mut peer).await;
            let mut corrupted = Frame::new(0x30, vec![9]).unwrap().encode().unwrap().to_vec();
            corrupted[20] ^= 0x01;
            peer.write_all(&[0x00, 0x42]).await.unwrap();
            peer.write_all(&corrupted).await.unwrap();
            write_frame_to(&mut peer, Frame::new(0x30, vec![7]).unwrap()).await;
            peer
        });

        let reply = transport.send(0x30, &[]).await.unwrap();
        assert_eq!(reply.payload.as_ref(), &[7]);
        assert!(transport.stats().frames_dropped > 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_io() {
        let (transport, mut peer) = transport(&DeviceConfig::default());
        let err = transport.send(0x30, &[0u8; 59]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Size { size: 59, limit: 58 }));
        assert_nothing_written(&mut peer).await;
    }

    #[tokio::test]
    async fn test_push_frames_dispatched() {
        let (transport, mut peer) = transport(&DeviceConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        transport.router().subscribe(ListenFilter::any(), tx).unwrap();

        let addr = Address::new([1, 2, 3, 4, 5]);
        let push = RadioMessage::new(addr, 0x42, vec![0xAB]).unwrap();
        write_frame_to(
            &mut peer,
            Frame::new(0x81, push.encode_push().unwrap()).unwrap(),
        )
        .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, push);
        assert_eq!(transport.stats().pushes_dispatched, 1);
    }

    #[tokio::test]
    async fn test_configurable_push_commands() {
        let config = DeviceConfig {
            push_commands: vec![0x81, 0x80],
            ..DeviceConfig::default()
        };
        let (transport, mut peer) = transport(&config);
        let (tx, mut rx) = mpsc::channel(4);
        transport.router().subscribe(ListenFilter::any(), tx).unwrap();

        let push = RadioMessage::new(Address::new([5; 5]), 0x01, Bytes::new()).unwrap();
        write_frame_to(
            &mut peer,
            Frame::new(0x80, push.encode_push().unwrap()).unwrap(),
        )
        .await;

        assert_eq!(rx.recv().await.unwrap().address, Address::new([5; 5]));
    }

    #[tokio::test]
    async fn test_unsolicited_answer_dropped() {
        let (transport, mut peer) = transport(&DeviceConfig::default());
        write_frame_to(&mut peer, Frame::new(0x30, Bytes::new()).unwrap()).await;
        wait_for(&transport, |s| s.unsolicited == 1).await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let (transport, mut peer) = transport(&DeviceConfig::default());
        let transport = Arc::new(transport);

        tokio::spawn(async move {
            for _ in 0..2 {
                let request = read_frame(&mut peer).await;
                let answer = Frame::new(request.command, request.payload.clone()).unwrap();
                write_frame_to(&mut peer, answer).await;
            }
            peer
        });

        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(0x10, &[1]).await })
        };
        let second = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(0x30, &[2]).await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), &[1]);
        assert_eq!(second.payload.as_ref(), &[2]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, mut peer) = transport(&DeviceConfig::default());
        let (tx, _rx) = mpsc::channel(4);
        transport.router().subscribe(ListenFilter::any(), tx).unwrap();

        transport.close().await;
        transport.close().await;

        assert!(!transport.is_connected());
        assert!(transport.router().is_empty());
        assert!(matches!(
            transport.send(0x10, &[]).await,
            Err(DeviceError::NotConnected)
        ));
        assert!(matches!(
            transport.post(0x31, &[]).await,
            Err(DeviceError::NotConnected)
        ));
        assert_nothing_written(&mut peer).await;
    }

    #[tokio::test]
    async fn test_peer_hangup_disconnects() {
        let (transport, peer) = transport(&DeviceConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        transport.router().subscribe(ListenFilter::any(), tx).unwrap();
        drop(peer);

        for _ in 0..100 {
            if !transport.is_connected() && transport.router().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(transport.router().is_empty());
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            transport.send(0x10, &[]).await,
            Err(DeviceError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let err = SerialTransport::open("/dev/esb-bridge-missing", &DeviceConfig::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));
    }
}
