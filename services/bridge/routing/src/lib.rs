//! Request/reply correlation and push listener fan-out for esb-bridge.
//!
//! Both layers of the bridge (the serial link to the peripheral and the TCP
//! bridge protocol) multiplex request/reply traffic and unsolicited pushes
//! over one byte stream. This crate holds the two primitives they share:
//! a single-slot [`RequestCorrelator`] and a [`PushRouter`] registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlator;
pub mod error;
pub mod router;

pub use correlator::{Correlated, PendingReply, RequestCorrelator};
pub use error::{CorrelationError, RouterError};
pub use router::{PushRouter, SubscriptionId};
