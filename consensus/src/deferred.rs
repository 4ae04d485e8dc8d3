//! Events waiting for a missing parent

use crate::event::Event;
use hashweave_core::EventHash;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Bounded buffer of verified events keyed by the parent they wait for
pub struct DeferredEvents {
    capacity: usize,
    /// Parked event with the parent it waits for
    events: HashMap<EventHash, (Event, EventHash)>,
    waiting_on: HashMap<EventHash, Vec<EventHash>>,
    /// Arrival order, used for eviction; may hold already released hashes
    arrival: VecDeque<EventHash>,
}

impl DeferredEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: HashMap::new(),
            waiting_on: HashMap::new(),
            arrival: VecDeque::new(),
        }
    }

    pub fn contains(&self, hash: &EventHash) -> bool {
        self.events.contains_key(hash)
    }

    /// Park `event` until `parent` arrives. Evicts the oldest entry when full.
    pub fn defer(&mut self, hash: EventHash, event: Event, parent: EventHash) {
        if self.capacity == 0 || self.events.contains_key(&hash) {
            return;
        }
        while self.events.len() >= self.capacity {
            match self.arrival.pop_front() {
                Some(oldest) => {
                    if let Some((_, awaited)) = self.events.remove(&oldest) {
                        warn!("Deferred buffer full, dropping event {}", oldest);
                        self.forget_waiter(&awaited, &oldest);
                    }
                }
                None => break,
            }
        }

        self.events.insert(hash, (event, parent));
        self.waiting_on.entry(parent).or_default().push(hash);
        self.arrival.push_back(hash);
    }

    /// Take every event that was waiting for `parent`
    pub fn release(&mut self, parent: &EventHash) -> Vec<Event> {
        let waiting = self.waiting_on.remove(parent).unwrap_or_default();
        let released: Vec<Event> = waiting
            .iter()
            .filter_map(|hash| self.events.remove(hash))
            .map(|(event, _)| event)
            .collect();
        if self.events.is_empty() {
            self.arrival.clear();
            self.waiting_on.clear();
        } else if self.arrival.len() > 2 * self.capacity {
            let events = &self.events;
            self.arrival.retain(|hash| events.contains_key(hash));
        }
        released
    }

    fn forget_waiter(&mut self, parent: &EventHash, hash: &EventHash) {
        if let Some(waiting) = self.waiting_on.get_mut(parent) {
            waiting.retain(|h| h != hash);
            if waiting.is_empty() {
                self.waiting_on.remove(parent);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
