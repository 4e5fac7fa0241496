//! Response completion policies.
//!
//! A request registered in the frame table is completed either by its first
//! response or by a timer that collects everything arriving before it fires.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::trace;

/// Callback invoked once with every value accumulated by a request.
pub type Completion<V> = Box<dyn FnOnce(Vec<V>) + Send + 'static>;

/// How a request decides it has received all its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBehavior {
    /// Complete on the first response.
    ShutdownFirstResponse,
    /// Collect every response until the duration elapses.
    CollectUntilTimeout(Duration),
}

/// State of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Complete,
    /// Cancelled before completion; the completion callback never runs.
    Abandoned,
}

/// Cancellable one-shot timer backed by a thread.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub(crate) struct Timer {
    _cancel: Sender<()>,
}

impl Timer {
    /// Run `on_fire` after `after`, unless the timer is dropped first.
    pub(crate) fn start(after: Duration, on_fire: impl FnOnce() + Send + 'static) -> Self {
        let (cancel, rx) = mpsc::channel::<()>();
        thread::spawn(move || match rx.recv_timeout(after) {
            Err(RecvTimeoutError::Timeout) => on_fire(),
            _ => trace!("timer cancelled"),
        });
        Self { _cancel: cancel }
    }
}

/// A request waiting for its responses.
pub(crate) struct PendingRequest<V> {
    behavior: ResponseBehavior,
    accumulated: Vec<V>,
    completion: Option<Completion<V>>,
    timer: Option<Timer>,
    state: RequestState,
}

impl<V> PendingRequest<V> {
    pub(crate) fn new(behavior: ResponseBehavior, completion: Completion<V>) -> Self {
        Self {
            behavior,
            accumulated: Vec::new(),
            completion: Some(completion),
            timer: None,
            state: RequestState::Pending,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> RequestState {
        self.state
    }

    /// Attach the timer backing a collect-until-timeout request.
    pub(crate) fn set_timer(&mut self, timer: Timer) {
        self.timer = Some(timer);
    }

    /// Feed one response.
    ///
    /// Returns the completion and its values when this response completes
    /// the request. Responses fed after completion are dropped.
    pub(crate) fn feed(&mut self, value: V) -> Option<(Completion<V>, Vec<V>)> {
        if self.state != RequestState::Pending {
            return None;
        }
        self.accumulated.push(value);
        match self.behavior {
            ResponseBehavior::ShutdownFirstResponse => self.complete(),
            ResponseBehavior::CollectUntilTimeout(_) => None,
        }
    }

    /// Handle the timer firing.
    pub(crate) fn expire(&mut self) -> Option<(Completion<V>, Vec<V>)> {
        match self.behavior {
            ResponseBehavior::CollectUntilTimeout(_) if self.state == RequestState::Pending => {
                self.complete()
            }
            _ => None,
        }
    }

    /// Cancel the request without invoking its completion.
    pub(crate) fn abandon(&mut self) {
        if self.state == RequestState::Pending {
            self.state = RequestState::Abandoned;
        }
        self.timer = None;
        self.completion = None;
        self.accumulated.clear();
    }

    fn complete(&mut self) -> Option<(Completion<V>, Vec<V>)> {
        self.state = RequestState::Complete;
        self.timer = None;
        let completion = self.completion.take()?;
        Some((completion, std::mem::take(&mut self.accumulated)))
    }
}

impl<V> std::fmt::Debug for PendingRequest<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("behavior", &self.behavior)
            .field("accumulated", &self.accumulated.len())
            .field("state", &self.state)
            .finish()
    }
}
