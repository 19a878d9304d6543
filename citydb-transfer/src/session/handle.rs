use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use crate::error::{SessionError, TransferError};

/// Sending half handed to the worker.
pub(crate) type Completion<T> = SyncSender<Result<T, TransferError>>;

/// Pending result of a submitted unit of work.
///
/// Dropping the handle does not cancel the work; the result is discarded.
#[derive(Debug)]
#[must_use = "the handle is the only way to observe the outcome"]
pub struct TransferHandle<T> {
    receiver: Receiver<Result<T, TransferError>>,
}

impl<T> TransferHandle<T> {
    pub(crate) fn channel() -> (Completion<T>, Self) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (sender, Self { receiver })
    }

    /// Handle that is already complete with `error`.
    pub(crate) fn failed(error: impl Into<TransferError>) -> Self {
        let (sender, handle) = Self::channel();
        // The channel has room for exactly this one message.
        if sender.send(Err(error.into())).is_err() {
            log::debug!("pre-failed handle lost its receiver");
        }
        handle
    }

    /// Block until the unit of work finishes.
    ///
    /// # Errors
    /// Returns the unit's failure, or [`SessionError::WorkerLost`] when the
    /// worker went away without answering.
    pub fn wait(self) -> Result<T, TransferError> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(SessionError::WorkerLost.into()))
    }

    /// Result if the unit of work has already finished.
    pub fn try_wait(&self) -> Option<Result<T, TransferError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SessionError::WorkerLost.into())),
        }
    }

    /// Wait at most `timeout` for the unit of work.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TransferError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(SessionError::WorkerLost.into())),
        }
    }
}
