// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-slot cache holding the most recently delivered message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::message::Message;

/// Mutex-guarded slot for the latest message.
///
/// The critical section is a pointer swap: messages are wrapped in an
/// `Arc` before the lock is taken, and the replaced message is dropped
/// after it is released. Readers get a shared snapshot and can never
/// observe a partially written message.
///
/// # Examples
///
/// ```
/// use mqtt_sensor_lib::{LatestMessageCache, Message, Qos};
///
/// let cache = LatestMessageCache::new();
/// assert!(cache.get().is_none());
///
/// cache.set(Message::new("sensors/t", "21.5", Qos::AtMostOnce, false));
/// assert_eq!(cache.get().unwrap().topic(), "sensors/t");
///
/// cache.clear();
/// assert!(cache.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct LatestMessageCache {
    slot: Mutex<Option<Arc<Message>>>,
    /// Number of `set` calls since creation.
    writes: AtomicU64,
}

impl LatestMessageCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `message`, replacing any previous one.
    pub fn set(&self, message: Message) {
        let message = Arc::new(message);
        let previous = self.slot.lock().replace(message);
        self.writes.fetch_add(1, Ordering::Relaxed);
        drop(previous);
    }

    /// Returns a snapshot of the current message, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Message>> {
        self.slot.lock().clone()
    }

    /// Resets the cache to empty.
    pub fn clear(&self) {
        let previous = self.slot.lock().take();
        drop(previous);
    }

    /// Returns true if no message is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Returns how many messages have been stored since creation.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::Qos;

    fn msg(topic: &str, payload: &str) -> Message {
        Message::new(topic, payload, Qos::AtMostOnce, false)
    }

    #[test]
    fn starts_empty() {
        let cache = LatestMessageCache::new();
        assert!(cache.is_empty());
        assert!(cache.get().is_none());
        assert_eq!(cache.write_count(), 0);
    }

    #[test]
    fn last_write_wins() {
        let cache = LatestMessageCache::new();
        for i in 0..100 {
            cache.set(msg("t", &i.to_string()));
        }
        assert_eq!(cache.get().unwrap().payload(), b"99");
        assert_eq!(cache.write_count(), 100);
    }

    #[test]
    fn clear_resets() {
        let cache = LatestMessageCache::new();
        cache.set(msg("t", "1"));
        cache.clear();
        assert!(cache.get().is_none());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_survives_overwrite() {
        let cache = LatestMessageCache::new();
        cache.set(msg("a", "1"));
        let snapshot = cache.get().unwrap();
        cache.set(msg("b", "2"));
        assert_eq!(snapshot.topic(), "a");
        assert_eq!(cache.get().unwrap().topic(), "b");
    }

    #[test]
    fn concurrent_readers_never_see_unwritten_values() {
        const WRITES: u32 = 10_000;
        const READERS: usize = 4;

        let cache = Arc::new(LatestMessageCache::new());

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let mut last_seen: Option<u32> = None;
                    loop {
                        if let Some(message) = cache.get() {
                            let text = std::str::from_utf8(message.payload()).unwrap();
                            let value: u32 = text.parse().unwrap();
                            assert!(value < WRITES);
                            assert_eq!(message.topic(), format!("seq/{value}"));
                            // Single writer, so observed values never go backwards
                            if let Some(last) = last_seen {
                                assert!(value >= last);
                            }
                            last_seen = Some(value);
                            if value == WRITES - 1 {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..WRITES {
                    cache.set(msg(&format!("seq/{i}"), &i.to_string()));
                }
            })
        };

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(cache.get().unwrap().payload(), (WRITES - 1).to_string().as_bytes());
        assert_eq!(cache.write_count(), u64::from(WRITES));
    }
}
