use crate::date_key::DateKey;
use crate::errors::TrackerError;
use crate::models::{DatedRecord, Fields, Mutation, SubItem};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// At most one record per day for a single tracked domain. No I/O.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordStore {
    days: BTreeMap<DateKey, DatedRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn contains(&self, key: &DateKey) -> bool {
        self.days.contains_key(key)
    }

    /// The record for `key`, or an empty one when nothing is stored yet.
    pub fn get(&self, key: &DateKey) -> DatedRecord {
        self.days
            .get(key)
            .cloned()
            .unwrap_or_else(|| DatedRecord::empty(*key))
    }

    pub fn get_existing(&self, key: &DateKey) -> Option<&DatedRecord> {
        self.days.get(key)
    }

    pub fn upsert_partial(&mut self, key: DateKey, fields: Fields) -> &DatedRecord {
        let record = self.entry(key);
        record.merge_fields(fields);
        record
    }

    /// A second save for the same day merges into the first.
    pub fn merge_record(&mut self, record: DatedRecord) -> &DatedRecord {
        let entry = self.entry(record.date);
        entry.merge_record(record);
        entry
    }

    pub fn add_sub_item(&mut self, key: DateKey, item: SubItem) -> &DatedRecord {
        let record = self.entry(key);
        record.push_item(item);
        record
    }

    /// Removing an unknown id is a no-op.
    pub fn remove_sub_item(&mut self, key: &DateKey, item_id: &str) -> Option<SubItem> {
        self.days.get_mut(key)?.remove_item(item_id)
    }

    pub fn toggle_sub_item(&mut self, key: &DateKey, item_id: &str) -> Result<&SubItem, TrackerError> {
        match self.days.get_mut(key) {
            Some(record) => record.toggle_item(item_id, Utc::now()),
            None => Err(TrackerError::item_not_found(key, item_id)),
        }
    }

    /// Replaces the stored record wholesale, or removes it for `None`.
    pub fn replace(&mut self, key: DateKey, record: Option<DatedRecord>) {
        match record {
            Some(record) => {
                self.days.insert(key, record);
            }
            None => {
                self.days.remove(&key);
            }
        }
    }

    pub fn remove(&mut self, key: &DateKey) -> Option<DatedRecord> {
        self.days.remove(key)
    }

    pub fn apply(&mut self, key: DateKey, mutation: &Mutation) -> Result<Option<&DatedRecord>, TrackerError> {
        let current = self.days.get(&key).cloned();
        let next = mutation.apply_to(key, current, Utc::now())?;
        self.replace(key, next);
        Ok(self.days.get(&key))
    }

    /// Records in ascending date order.
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &DatedRecord> {
        self.days.values()
    }

    pub fn range(&self, window: RangeInclusive<DateKey>) -> impl DoubleEndedIterator<Item = &DatedRecord> {
        self.days.range(window).map(|(_, record)| record)
    }

    /// Newest first, at most `limit` records.
    pub fn latest(&self, limit: usize) -> Vec<DatedRecord> {
        self.days.values().rev().take(limit).cloned().collect()
    }

    fn entry(&mut self, key: DateKey) -> &mut DatedRecord {
        self.days
            .entry(key)
            .or_insert_with(|| DatedRecord::empty(key))
    }
}
