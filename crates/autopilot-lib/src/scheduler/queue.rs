//! Ordered schedule of pending dispatches

use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

/// Pending dispatches keyed by `(fire_at, registration order)`, with a name
/// index so a task's entry can be replaced or removed in place.
///
/// A task has at most one entry.
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    entries: BTreeMap<(Instant, usize), String>,
    by_name: HashMap<String, (Instant, usize)>,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `name` at `fire_at`, replacing any existing entry
    pub fn schedule(&mut self, name: &str, order: usize, fire_at: Instant) {
        self.remove(name);
        self.entries.insert((fire_at, order), name.to_string());
        self.by_name.insert(name.to_string(), (fire_at, order));
    }

    /// Returns true when an entry was removed
    pub fn remove(&mut self, name: &str) -> bool {
        match self.by_name.remove(name) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn fire_at(&self, name: &str) -> Option<Instant> {
        self.by_name.get(name).map(|(at, _)| *at)
    }

    pub fn is_due(&self, name: &str, now: Instant) -> bool {
        self.fire_at(name).is_some_and(|at| at <= now)
    }

    /// Names due at `now`, in registration order
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<(usize, &String)> = self
            .entries
            .range(..=(now, usize::MAX))
            .map(|((_, order), name)| (*order, name))
            .collect();
        due.sort_by_key(|(order, _)| *order);
        due.into_iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_name.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_due_in_registration_order() {
        let now = Instant::now();
        let mut queue = ScheduleQueue::new();
        queue.schedule("late_registered", 2, now - Duration::from_secs(10));
        queue.schedule("first", 0, now);
        queue.schedule("second", 1, now - Duration::from_secs(5));
        queue.schedule("future", 3, now + Duration::from_secs(60));

        assert_eq!(queue.due(now), ["first", "second", "late_registered"]);
    }

    #[test]
    fn test_reschedule_replaces_entry() {
        let now = Instant::now();
        let mut queue = ScheduleQueue::new();
        queue.schedule("task", 0, now);
        queue.schedule("task", 0, now + Duration::from_secs(30));

        assert_eq!(queue.len(), 1);
        assert!(!queue.is_due("task", now));
        assert_eq!(queue.fire_at("task"), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn test_remove_and_clear() {
        let now = Instant::now();
        let mut queue = ScheduleQueue::new();
        queue.schedule("a", 0, now);
        queue.schedule("b", 1, now);

        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert!(!queue.contains("a"));
        assert_eq!(queue.due(now), ["b"]);

        queue.clear();
        assert!(queue.is_empty());
    }
}
