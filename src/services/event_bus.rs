//! CI event bus.
//!
//! Filtered pub/sub over [`CiEvent`]s with a bounded history ring. Each
//! subscriber owns an unbounded channel, so delivery per subscriber is
//! FIFO in emit order and a slow consumer never blocks `emit`. Dropped
//! receivers are pruned and logged, never propagated.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::models::{CiEvent, CiEventType};

/// Subscription filter. Empty `event_types` matches every type; empty
/// `branches` matches every branch. An event without a branch only passes
/// an empty branch filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub event_types: Vec<CiEventType>,
    pub branches: Vec<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_types(event_types: impl Into<Vec<CiEventType>>) -> Self {
        Self {
            event_types: event_types.into(),
            branches: Vec::new(),
        }
    }

    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            event_types: Vec::new(),
            branches: vec![branch.into()],
        }
    }

    pub fn matches(&self, event: &CiEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if self.branches.is_empty() {
            return true;
        }
        match &event.branch {
            Some(branch) => self.branches.contains(branch),
            None => false,
        }
    }
}

/// A live subscription: drop it (or call `unsubscribe`) to detach.
pub struct EventSubscription {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<CiEvent>,
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<CiEvent>,
}

struct BusState {
    subscribers: Vec<Subscriber>,
    history: VecDeque<CiEvent>,
    next_id: u64,
}

/// Shared CI event bus.
pub struct CiEventBus {
    state: StdMutex<BusState>,
    history_limit: usize,
}

impl CiEventBus {
    pub const DEFAULT_HISTORY_LIMIT: usize = 100;

    pub fn new(history_limit: usize) -> Self {
        Self {
            state: StdMutex::new(BusState {
                subscribers: Vec::new(),
                history: VecDeque::new(),
                next_id: 0,
            }),
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscriber with a filter.
    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(Subscriber { id, filter, tx });
        debug!(subscription = id, "event bus subscriber added");
        EventSubscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.retain(|s| s.id != id);
    }

    /// Deliver an event to every matching subscriber and record it in the
    /// history ring.
    pub fn emit(&self, event: CiEvent) {
        let mut state = self.lock();

        state.history.push_back(event.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }

        let mut dead = Vec::new();
        for sub in &state.subscribers {
            if !sub.filter.matches(&event) {
                continue;
            }
            if sub.tx.send(event.clone()).is_err() {
                dead.push(sub.id);
            }
        }
        for id in dead {
            warn!(subscription = id, "event subscriber gone, pruning");
            state.subscribers.retain(|s| s.id != id);
        }
    }

    /// Matching events from the bounded history, oldest first.
    pub fn history(&self, filter: &EventFilter, limit: Option<usize>) -> Vec<CiEvent> {
        let state = self.lock();
        let matching: Vec<CiEvent> = state
            .history
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        match limit {
            Some(limit) if matching.len() > limit => {
                matching[matching.len() - limit..].to_vec()
            }
            _ => matching,
        }
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl Default for CiEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HISTORY_LIMIT)
    }
}
