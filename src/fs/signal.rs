//! Shutdown on SIGINT, SIGTERM or SIGHUP
//!
//! The binary creates a [`ShutdownListener`] before mounting, so a signal
//! that lands while the mount is still coming up is queued rather than lost.
//! It then blocks in [`ShutdownListener::wait`] and drops the background
//! session once it returns, which unmounts and stops the watcher.

use std::io;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::debug;

/// Signals that end a mount
pub const SHUTDOWN_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Queue of shutdown signals received by the process
pub struct ShutdownListener {
    signals: Signals,
}

impl ShutdownListener {
    /// Start listening for [`SHUTDOWN_SIGNALS`]
    pub fn new() -> io::Result<Self> {
        Self::listen(&SHUTDOWN_SIGNALS)
    }

    fn listen(signals: &[i32]) -> io::Result<Self> {
        debug!(?signals, "registering shutdown signals");
        Ok(ShutdownListener {
            signals: Signals::new(signals)?,
        })
    }

    /// Block until a shutdown signal arrives and return its number
    ///
    /// Returns `None` if the underlying signal queue was closed first.
    pub fn wait(&mut self) -> Option<i32> {
        self.signals.forever().next()
    }
}

/// Name of a shutdown signal, for the log line
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_hook::consts::SIGUSR1;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(SIGINT), "SIGINT");
        assert_eq!(signal_name(SIGTERM), "SIGTERM");
        assert_eq!(signal_name(SIGHUP), "SIGHUP");
        assert_eq!(signal_name(SIGUSR1), "unknown");
    }

    #[test]
    fn test_wait_returns_received_signal() {
        // SIGUSR1 so the test process's own SIGINT handling is left alone
        let mut listener = ShutdownListener::listen(&[SIGUSR1]).unwrap();
        signal_hook::low_level::raise(SIGUSR1).unwrap();
        assert_eq!(listener.wait(), Some(SIGUSR1));
    }

    #[test]
    fn test_closed_listener_stops_waiting() {
        let mut listener = ShutdownListener::listen(&[]).unwrap();
        let handle = listener.signals.handle();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.close();
        });

        assert_eq!(listener.wait(), None);
        closer.join().unwrap();
    }
}
