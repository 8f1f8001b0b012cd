//! gRPC surface of the bridge (`grpc` feature).

use crate::proto::v1::esb_bridge_server::{EsbBridge, EsbBridgeServer};
use crate::proto::v1::{EsbMessage, Listener, VersionRequest, VersionResponse};
use crate::BridgeError;
use esb_device::{DeviceError, EsbDevice};
use esb_wire::{Address, ListenFilter, RadioMessage, ADDRESS_SIZE};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::{debug, error, info};

/// `EsbBridge` service backed by an [`EsbDevice`]
#[derive(Debug)]
pub struct EsbBridgeService {
    device: Arc<EsbDevice>,
    listener_buffer: usize,
}

impl EsbBridgeService {
    /// Create a new service
    pub fn new(device: Arc<EsbDevice>, listener_buffer: usize) -> Self {
        Self {
            device,
            listener_buffer: listener_buffer.max(1),
        }
    }
}

fn parse_address(bytes: &[u8], allow_empty: bool) -> Result<Address, Status> {
    if allow_empty && bytes.is_empty() {
        return Ok(Address::ZERO);
    }
    if bytes.len() != ADDRESS_SIZE {
        return Err(Status::invalid_argument(format!(
            "address must be {} bytes, got {}",
            ADDRESS_SIZE,
            bytes.len()
        )));
    }
    Address::from_slice(bytes).map_err(|e| Status::invalid_argument(e.to_string()))
}

fn parse_command(cmd: u32) -> Result<u8, Status> {
    u8::try_from(cmd).map_err(|_| Status::invalid_argument(format!("command {} out of range", cmd)))
}

fn to_proto(msg: &RadioMessage) -> EsbMessage {
    EsbMessage {
        addr: msg.address.as_bytes().to_vec(),
        cmd: msg.command as u32,
        payload: msg.payload.to_vec(),
        error: msg.error as u32,
    }
}

fn device_status(err: DeviceError) -> Status {
    match err {
        DeviceError::NotConnected => Status::unavailable(err.to_string()),
        DeviceError::Timeout(_) => Status::deadline_exceeded(err.to_string()),
        DeviceError::Size { .. } | DeviceError::InvalidParameter(_) => {
            Status::invalid_argument(err.to_string())
        }
        _ => Status::internal(err.to_string()),
    }
}

#[tonic::async_trait]
impl EsbBridge for EsbBridgeService {
    async fn transfer(&self, request: Request<EsbMessage>) -> Result<Response<EsbMessage>, Status> {
        let req = request.into_inner();
        let address = parse_address(&req.addr, false)?;
        let command = parse_command(req.cmd)?;
        let msg = RadioMessage::new(address, command, req.payload)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        match self.device.transfer(&msg).await {
            Ok(reply) => Ok(Response::new(to_proto(&reply))),
            // Peripheral errors are part of the answer, not a call failure
            Err(DeviceError::Peripheral(code)) => Ok(Response::new(EsbMessage {
                addr: address.as_bytes().to_vec(),
                cmd: command as u32,
                payload: Vec::new(),
                error: code as u32,
            })),
            Err(e) => Err(device_status(e)),
        }
    }

    type ListenStream = ReceiverStream<Result<EsbMessage, Status>>;

    async fn listen(
        &self,
        request: Request<Listener>,
    ) -> Result<Response<Self::ListenStream>, Status> {
        let req = request.into_inner();
        let filter = ListenFilter::new(parse_address(&req.addr, true)?, parse_command(req.cmd)?);

        let (radio_tx, mut radio_rx) = mpsc::channel(self.listener_buffer);
        let id = self
            .device
            .add_listener(filter, radio_tx)
            .map_err(device_status)?;
        info!("gRPC listener {} registered for {}", id, filter);

        let (out_tx, out_rx) = mpsc::channel(self.listener_buffer);
        let router = self.device.router().clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = out_tx.closed() => break,
                    msg = radio_rx.recv() => match msg {
                        Some(msg) => {
                            if out_tx.send(Ok(to_proto(&msg))).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            router.remove(id);
            debug!("gRPC listener {} removed", id);
        });

        Ok(Response::new(ReceiverStream::new(out_rx)))
    }

    async fn get_firmware_version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        let version = self
            .device
            .firmware_version()
            .await
            .map_err(device_status)?;
        Ok(Response::new(VersionResponse {
            version: version.to_string(),
        }))
    }
}

/// Serve the gRPC service and reflection on `addr` until `shutdown` resolves
pub async fn serve_grpc<F>(
    addr: SocketAddr,
    device: Arc<EsbDevice>,
    listener_buffer: usize,
    shutdown: F,
) -> Result<(), BridgeError>
where
    F: Future<Output = ()>,
{
    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(crate::proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| {
            BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("failed to create reflection service: {}", e),
            ))
        })?;

    info!("gRPC server listening on {}", addr);
    Server::builder()
        .add_service(EsbBridgeServer::new(EsbBridgeService::new(
            device,
            listener_buffer,
        )))
        .add_service(reflection_service)
        .serve_with_shutdown(addr, shutdown)
        .await
        .map_err(|e| {
            error!("gRPC server error: {}", e);
            BridgeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
        })
}
