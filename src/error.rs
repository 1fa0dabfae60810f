//! Public error surface (§7). Only the caller-visible kinds get a variant:
//! `ParseFailure` and `OversizedSingleAnswer` are handled silently (drop /
//! log-and-continue) deeper in `wire` and `query` and never reach here.

use thiserror::Error;

/// Errors returned by the public `Scanner` API.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// A discovery call was made after `close()` (*ImplementationError*).
    #[error("scanner is closed")]
    Closed,

    /// A broadcast could not be handed to the transport (*TransportSendFailure*).
    /// The query timer keeps running regardless, so the next interval retries.
    #[error("failed to send mdns datagram: {0}")]
    Send(#[from] std::io::Error),

    /// No usable network interface could be opened at construction time.
    #[error("no usable multicast socket could be created: {0}")]
    NoTransport(#[source] anyhow::Error),
}
