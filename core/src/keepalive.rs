//! Background keep-alive task of a session.
//!
//! One named thread per session. It waits on a stop channel with a timeout
//! equal to the keep-alive interval, so cancellation is immediate instead of
//! waiting out a sleep. Failures are retried on the next tick; once
//! `keep_alive_failure_threshold` ticks in a row have failed the task revokes
//! the token (best-effort), closes the session and exits.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::session::{SessionCore, SessionState};

pub(crate) struct KeepAliveHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl KeepAliveHandle {
    pub(crate) fn spawn(core: Arc<SessionCore>) -> io::Result<Self> {
        let (stop, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("keep-alive-{}", core.id))
            .spawn(move || run(&core, &stop_rx))?;
        Ok(Self { stop, thread })
    }

    /// Signal the task and wait for it to finish. After this returns no
    /// further keep-alive request will be sent.
    pub(crate) fn cancel(self) {
        // A closed channel means the task already exited on its own.
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            warn!("keep-alive thread panicked");
        }
    }
}

fn run(core: &SessionCore, stop: &mpsc::Receiver<()>) {
    let interval = core.config.keep_alive_interval();
    let threshold = core.config.keep_alive_failure_threshold.max(1);
    let mut failures = 0u32;

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if core.state() != SessionState::Active {
            break;
        }

        match core.keep_alive_tick() {
            Ok(()) => {
                if failures > 0 {
                    info!(session_id = %core.id, failures, "keep-alive recovered");
                }
                failures = 0;
            }
            Err(err) => {
                failures += 1;
                warn!(session_id = %core.id, failures, threshold, error = %err, "keep-alive failed");
                if failures >= threshold {
                    error!(session_id = %core.id, failures, "keep-alive gave up, closing session");
                    if let Err(err) = core.revoke_token() {
                        warn!(session_id = %core.id, error = %err, "best-effort token revocation failed");
                    }
                    core.close();
                    break;
                }
            }
        }
    }
}
