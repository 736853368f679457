//! Ordered, identifier-keyed row collection
//!
//! Every merge goes through here: rows are unique by id and always kept in
//! the row type's presentation order, whatever order changes arrive in.

use std::collections::HashSet;

use uuid::Uuid;

use super::feed::FeedEvent;
use crate::models::Record;

/// Rows of one synced collection, deduplicated and sorted
#[derive(Debug, Clone)]
pub struct OrderedCollection<T> {
    entries: Vec<T>,
    /// Ids removed so far; ids are never reused
    removed: HashSet<Uuid>,
}

impl<T> Default for OrderedCollection<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            removed: HashSet::new(),
        }
    }
}

impl<T: Record> OrderedCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a bulk fetch
    pub fn from_rows(rows: Vec<T>) -> Self {
        let mut collection = Self::new();
        collection.reset(rows);
        collection
    }

    /// Replace the contents with a bulk fetch
    ///
    /// The fetch order is not trusted: rows are deduplicated (last one wins)
    /// and re-sorted. Removed ids are remembered across resets.
    pub fn reset(&mut self, rows: Vec<T>) {
        self.entries.clear();
        for row in rows {
            self.upsert(row);
        }
    }

    /// Merge a row acknowledged by our own write
    ///
    /// The feed may already have delivered this row, and newer changes to
    /// it, before the acknowledgement arrives. Only a row never seen and
    /// never removed is added; returns whether it was.
    pub fn merge_ack(&mut self, row: T) -> bool {
        if self.removed.contains(&row.id()) || self.contains(row.id()) {
            return false;
        }
        self.upsert(row)
    }

    /// Insert a new row, or replace the row with the same id
    ///
    /// Returns `true` if the row was not present before.
    pub fn upsert(&mut self, row: T) -> bool {
        let existed = self.take(row.id()).is_some();
        let at = self
            .entries
            .partition_point(|e| e.order_cmp(&row) == std::cmp::Ordering::Less);
        self.entries.insert(at, row);
        !existed
    }

    /// Replace the row with the same id, keeping its position
    ///
    /// Returns `false` (and changes nothing) if no such row is present.
    pub fn replace(&mut self, row: T) -> bool {
        let Some(pos) = self.position(row.id()) else {
            return false;
        };
        if self.entries[pos].created_at() == row.created_at() {
            self.entries[pos] = row;
        } else {
            // Sort key changed; re-slot it
            self.entries.remove(pos);
            self.upsert(row);
        }
        true
    }

    /// Remove the row with `id`, if present
    pub fn remove(&mut self, id: Uuid) -> Option<T> {
        self.removed.insert(id);
        self.take(id)
    }

    /// Whether `id` has been removed
    pub fn was_removed(&self, id: Uuid) -> bool {
        self.removed.contains(&id)
    }

    /// Apply one feed event; returns whether anything changed
    pub fn apply(&mut self, event: FeedEvent<T>) -> bool {
        match event {
            FeedEvent::Inserted(row) => {
                self.upsert(row);
                true
            }
            FeedEvent::Updated(row) => self.replace(row),
            FeedEvent::Deleted(id) => self.remove(id).is_some(),
            FeedEvent::Resubscribed => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    fn take(&mut self, id: Uuid) -> Option<T> {
        self.position(id).map(|pos| self.entries.remove(pos))
    }
}

impl<'a, T: Record> IntoIterator for &'a OrderedCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
