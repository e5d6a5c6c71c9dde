//! Temporarily blocked identifiers.

use dashmap::DashMap;
use serde::Serialize;

use super::clock::Timestamp;

/// A blocked identifier and when it is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedIdentifier {
    pub identifier: String,
    pub unblock_time: Timestamp,
}

/// Map of identifier to unblock time.
///
/// Entries expire lazily: a lookup at or after the unblock time removes the
/// entry and reports the identifier as free.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    entries: DashMap<String, Timestamp>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `unblock_time`, replacing any existing block.
    pub fn block(&self, identifier: &str, unblock_time: Timestamp) {
        self.entries.insert(identifier.to_string(), unblock_time);
    }

    /// Lift a block. Returns `true` if the identifier was blocked.
    pub fn unblock(&self, identifier: &str) -> bool {
        self.entries.remove(identifier).is_some()
    }

    /// The unblock time if the identifier is still blocked at `now`.
    pub fn blocked_until(&self, identifier: &str, now: Timestamp) -> Option<Timestamp> {
        let unblock_time = *self.entries.get(identifier)?;
        if now >= unblock_time {
            self.entries.remove_if(identifier, |_, t| now >= *t);
            None
        } else {
            Some(unblock_time)
        }
    }

    /// Active blocks, soonest release first.
    pub fn list(&self, now: Timestamp) -> Vec<BlockedIdentifier> {
        let mut blocked: Vec<BlockedIdentifier> = self
            .entries
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| BlockedIdentifier {
                identifier: entry.key().clone(),
                unblock_time: *entry.value(),
            })
            .collect();

        blocked.sort_by(|a, b| {
            a.unblock_time
                .cmp(&b.unblock_time)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        blocked
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, unblock_time| *unblock_time > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
