//! Outward bridge protocol for esb-bridge.
//!
//! Remote callers reach the radio peripheral through a small length prefixed
//! TCP protocol ([`BridgeServer`], [`BridgeClient`]) or, with the `grpc`
//! feature, through the `EsbBridge` gRPC service. Both re-expose the device's
//! request/reply path and its push listener registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod connection;
pub mod error;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod server;

pub use client::{BridgeClient, DEFAULT_CLIENT_TIMEOUT};
pub use connection::BridgeSession;
pub use error::BridgeError;
pub use server::{BridgeServer, BridgeServerConfig};

/// Generated protobuf code and gRPC service definitions
#[cfg(feature = "grpc")]
pub mod proto {
    /// Version 1 of the bridge service
    #[allow(missing_docs)]
    pub mod v1 {
        tonic::include_proto!("esbbridge.v1");
    }

    /// File descriptor set for reflection
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("esbbridge_descriptor");
}
