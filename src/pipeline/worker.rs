use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::EncodeSession;
use crate::foundation::error::{ImgseqError, ImgseqResult};
use crate::pipeline::orchestrator::{CancelToken, Pipeline};

/// Handle to an encode running on its own thread. Delivers exactly one result.
///
/// Dropping the handle cancels the encode and waits for the thread to clean up.
pub struct EncodeJob {
    cancel: CancelToken,
    result_rx: Receiver<ImgseqResult<PathBuf>>,
    handle: Option<JoinHandle<()>>,
}

/// Start encoding `session` with the system ffmpeg on a background thread.
pub fn spawn(session: EncodeSession) -> ImgseqResult<EncodeJob> {
    spawn_with(Pipeline::new(), session)
}

pub fn spawn_with(pipeline: Pipeline, session: EncodeSession) -> ImgseqResult<EncodeJob> {
    let cancel = CancelToken::new();
    let (result_tx, result_rx) = crossbeam_channel::bounded(1);
    let worker_cancel = cancel.clone();
    let handle = std::thread::Builder::new()
        .name("imgseq-encode".to_string())
        .spawn(move || {
            let result = pipeline.run(&session, &worker_cancel);
            let _ = result_tx.send(result);
        })
        .map_err(|e| ImgseqError::io("failed to spawn encode thread", e))?;
    Ok(EncodeJob {
        cancel,
        result_rx,
        handle: Some(handle),
    })
}

impl EncodeJob {
    /// Ask the encode to stop. It finishes with [`ImgseqError::Cancelled`] unless it already
    /// completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Block until the encode ends.
    pub fn wait(mut self) -> ImgseqResult<PathBuf> {
        let result = self.result_rx.recv().unwrap_or_else(|_| Err(worker_lost()));
        self.join();
        result
    }

    /// Wait up to `timeout`; hands the job back if it is still running.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<ImgseqResult<PathBuf>, Self> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                Ok(result)
            }
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Ok(Err(worker_lost()))
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("encode thread panicked");
        }
    }
}

impl Drop for EncodeJob {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            self.join();
        }
    }
}

impl std::fmt::Debug for EncodeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeJob")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn worker_lost() -> ImgseqError {
    ImgseqError::Other(anyhow::anyhow!("encode thread exited without a result"))
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/worker.rs"]
mod tests;
