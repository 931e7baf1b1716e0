//! Request/reply over correlation-framed sockets
//!
//! [`RpcLink`] is the requesting client, [`Responder`] the replying peer.
//! Both speak [`RpcFrame`]s: correlation id, sequence and body.

pub mod factory;
pub mod link;
pub mod pending;
pub mod responder;
pub mod wire;

pub use factory::{MessageQueueFactory, SocketFactory};
pub use link::{LinkSettings, RpcLink};
pub use pending::{Delivery, PendingStore};
pub use responder::{AppendSuffix, RequestHandler, Responder};
pub use wire::RpcFrame;
