use std::{
    io::{self, BufRead, BufReader, Read},
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

/// Continuously reads the diagnostic stream of a child process on a separate thread and
/// forwards every line to the log. Without this, a chatty child can fill the pipe and
/// stall while we are waiting for its regular output.
pub(crate) struct ErrorDrain {
    handle: JoinHandle<()>,
    // disconnects as soon as the drain thread has finished
    finished: Receiver<()>,
}

impl ErrorDrain {
    pub(crate) fn spawn<R: Read + Send + 'static>(stream: R, prefix: String) -> io::Result<Self> {
        let (done, finished) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("generator-stderr".into())
            .spawn(move || {
                let _done = done;
                for line in BufReader::new(stream).lines() {
                    match line {
                        Ok(line) => info!("{prefix}> {line}"),
                        Err(e) => {
                            // nothing depends on the diagnostics, so we just stop reading
                            warn!("{prefix}: could not read diagnostic output: {e}");
                            break;
                        }
                    }
                }
            })?;
        Ok(Self { handle, finished })
    }

    /// Waits at most `timeout` for the drain to finish. Returns whether the thread was
    /// joined, if not it is left to finish on its own.
    pub(crate) fn join(self, timeout: Duration) -> bool {
        match self.finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("diagnostic drain did not finish within {timeout:?}, detaching it");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.handle.join().is_ok(),
        }
    }
}
