//! Client state, snapshots, and subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::message::UiMessage;

/// A snapshot of a [`ChatClient`](super::ChatClient).
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// The conversation.
    pub messages: Vec<UiMessage>,
    /// Whether a run is in flight.
    pub is_loading: bool,
    /// The last run's error. Cleared when the next run starts.
    pub error: Option<Arc<LlmError>>,
}

/// Called with a fresh snapshot after every change.
pub type Subscriber = Arc<dyn Fn(&ChatState) + Send + Sync>;

/// Handle returned by [`ChatClient::subscribe`](super::ChatClient::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct ClientCore {
    pub messages: Vec<UiMessage>,
    pub is_loading: bool,
    pub error: Option<Arc<LlmError>>,
    /// Token and id of the run currently in flight.
    pub active: Option<(u64, CancellationToken)>,
    next_run: u64,
}

impl ClientCore {
    pub(crate) fn snapshot(&self) -> ChatState {
        ChatState {
            messages: self.messages.clone(),
            is_loading: self.is_loading,
            error: self.error.clone(),
        }
    }

    /// Marks a new run active and returns its id and token.
    pub(crate) fn begin_run(&mut self) -> (u64, CancellationToken) {
        self.next_run += 1;
        let token = CancellationToken::new();
        self.active = Some((self.next_run, token.clone()));
        self.is_loading = true;
        self.error = None;
        (self.next_run, token)
    }

    /// Whether `run` is still the active run.
    pub(crate) fn is_active(&self, run: u64) -> bool {
        self.active.as_ref().is_some_and(|(id, _)| *id == run)
    }

    /// Cancels the active run, if any.
    pub(crate) fn cancel_active(&mut self) {
        if let Some((_, token)) = self.active.take() {
            token.cancel();
        }
        self.is_loading = false;
    }
}

#[derive(Default)]
pub(crate) struct Shared {
    core: Mutex<ClientCore>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber: AtomicU64,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ClientCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` and notifies subscribers. Subscribers run after the
    /// lock is released, so they may call back into the client.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut ClientCore) -> R) -> R {
        let (out, snapshot) = {
            let mut core = self.lock();
            let out = f(&mut core);
            (out, core.snapshot())
        };
        self.notify(&snapshot);
        out
    }

    /// Applies `f` to the message with id `id`. Returns `false` (and
    /// notifies nobody) when the message is gone.
    pub(crate) fn update_message(&self, id: &str, f: impl FnOnce(&mut UiMessage)) -> bool {
        let snapshot = {
            let mut core = self.lock();
            let Some(msg) = core.messages.iter_mut().rev().find(|m| m.id == id) else {
                return false;
            };
            f(msg);
            core.snapshot()
        };
        self.notify(&snapshot);
        true
    }

    pub(crate) fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        SubscriptionId(id)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id.0);
        subscribers.len() != before
    }

    fn notify(&self, state: &ChatState) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(state);
        }
    }
}
