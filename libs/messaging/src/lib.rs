//! Netmon Messaging
//!
//! The abstractions netmon processes talk through:
//!
//! - [`PullChannel`] / [`PushChannel`]: one-directional frame delivery
//! - [`RpcLink`]: synchronous and correlated asynchronous request/reply
//! - [`Responder`]: the reply side of an RPC link
//!
//! Raw reference and record framing for co-located peers lives apart in
//! [`trusted`].

pub mod pull;
pub mod push;
pub mod rpc;
pub mod trusted;

pub use pull::{PullChannel, ReceiveMode};
pub use push::PushChannel;
pub use rpc::{
    AppendSuffix, LinkSettings, MessageQueueFactory, RequestHandler, Responder, RpcLink,
    SocketFactory,
};
pub use trusted::PayloadRecord;

// Transport types callers need alongside the channels
pub use network::{AttachMode, Endpoint, MessageBuffer, TransportError};
