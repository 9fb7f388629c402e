//! Process-wide user interrupt.
//!
//! Ctrl-C is observed by one listener task for the life of the process and
//! published through a watch channel. Child processes and backoff sleeps
//! race against the same [`Interrupt`], so a signal that arrives between
//! external calls is still seen by the next await point.

use std::future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::warn;

use super::RunnerError;

/// Read side of the interrupt flag. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Interrupt {
    receiver: watch::Receiver<bool>,
}

/// Write side of the interrupt flag.
#[derive(Debug)]
pub struct InterruptTrigger {
    sender: watch::Sender<bool>,
}

impl Interrupt {
    /// Creates a connected trigger and listener.
    #[must_use]
    pub fn channel() -> (InterruptTrigger, Self) {
        let (sender, receiver) = watch::channel(false);
        (InterruptTrigger { sender }, Self { receiver })
    }

    /// A listener that is never raised.
    #[must_use]
    pub fn never() -> Self {
        Self::channel().1
    }

    /// Spawns the single Ctrl-C listener for this process.
    ///
    /// Must be called from inside a Tokio runtime.
    #[must_use]
    pub fn listen_for_ctrl_c() -> Self {
        let (trigger, interrupt) = Self::channel();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling the current operation");
                trigger.raise();
            }
        });
        interrupt
    }

    /// Returns `true` once the interrupt has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when the interrupt is raised; pends forever if it never is.
    pub async fn raised(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|raised| *raised).await.is_err() {
            future::pending::<()>().await;
        }
    }

    /// Sleeps for `delay` unless interrupted first.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Interrupted`] naming `program` when the
    /// interrupt is raised before or during the sleep.
    pub async fn sleep(&self, delay: Duration, program: &str) -> Result<(), RunnerError> {
        let interrupted = || RunnerError::Interrupted {
            program: program.to_owned(),
        };
        if self.is_raised() {
            return Err(interrupted());
        }
        tokio::select! {
            () = sleep(delay) => Ok(()),
            () = self.raised() => Err(interrupted()),
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::never()
    }
}

impl InterruptTrigger {
    /// Raises the interrupt for every listener.
    pub fn raise(&self) {
        self.sender.send_replace(true);
    }
}
