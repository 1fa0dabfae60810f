//! Time dependency (§6): monotonic now, one-shot timer, periodic timer. Kept
//! behind a trait so scenario tests (§8) can drive the scanner with virtual
//! time instead of real sleeps, grounded on `mdns2::mod.rs`'s use of
//! `tokio::time::Instant`/`interval`.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Monotonic clock and timer primitive.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Resolve after `dur` elapses. Boxed since traits can't return `impl
    /// Future` in object-safe position.
    fn sleep(&self, dur: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production clock backed by Tokio's timer wheel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(dur))
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! A clock usable with `#[tokio::test(start_paused = true)]` plus
    //! `tokio::time::advance`: it simply delegates to Tokio's paused virtual
    //! clock so scenario tests can fast-forward through back-off intervals
    //! and timeouts without real-time delay (§8).
    use super::*;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct MockClock;

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            tokio::time::Instant::now().into_std()
        }

        fn sleep(&self, dur: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(tokio::time::sleep(dur))
        }
    }
}
