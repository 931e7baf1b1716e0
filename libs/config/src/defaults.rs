//! Messaging defaults
//!
//! Default values shared by the transport, the RPC link and the services
//! built on them.

/// Logging defaults
pub mod logging {
    /// Level used when neither a flag nor `RUST_LOG` chooses one
    pub const LOG_LEVEL: &str = "info";
}

/// Transport socket defaults
pub mod socket {
    /// Frames queued per direction before senders wait
    pub const HIGH_WATER_MARK: usize = 1_000;

    /// Delay between reconnect attempts of a connecting socket (milliseconds)
    pub const RECONNECT_INTERVAL_MS: u64 = 100;

    /// Largest frame accepted off the wire
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

    /// Send wait once the outbound queue is full (milliseconds)
    pub const SEND_TIMEOUT_MS: u64 = 1_000;
}

/// RPC link defaults
pub mod link {
    /// Upper bound on a synchronous round trip (milliseconds)
    pub const RECEIVE_TIMEOUT_MS: u64 = 1_000;

    /// Longest single poll of the socket while collecting replies (milliseconds)
    pub const POLL_SLICE_MS: u64 = 10;
}

/// Pending reply store defaults
pub mod pending {
    /// Age after which an uncollected entry may be reclaimed (seconds)
    pub const RETENTION_SECS: u64 = 5 * 60;

    /// Period of the background sweep (seconds)
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
}

/// Responder service defaults
pub mod responder {
    /// Text appended to every request by the default reply handler
    pub const REPLY_SUFFIX: &str = " reply";

    /// Receive slice of the listen-and-reply loop (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 100;
}
