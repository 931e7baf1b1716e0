//! Message-Queue Transport
//!
//! The socket layer the netmon messaging abstractions ride on: contexts,
//! typed sockets (`Pull`, `Push`, `Dealer`, `Router`), bind/connect over
//! `ipc://`, `tcp://` and `inproc://` endpoints, length-prefixed frames and
//! ledgered receive buffers.

pub mod buffer;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod framing;
pub mod reclaim;
pub mod socket;
pub mod transports;

// Re-export commonly used types
pub use buffer::{BufferLedger, MessageBuffer, PeerId};
pub use context::Context;
pub use endpoint::{Endpoint, Scheme, MAX_IPC_PATH_LEN};
pub use error::{Result, TransportError};
pub use socket::{AttachMode, Socket, SocketKind, SocketOptions};
