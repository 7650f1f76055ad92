//! # In-Memory Packet Store
//!
//! Evaluates [`Filter`]/[`Options`] against a buffer of captured packets.
//! Used when no external store is attached, and as the store for tests.
//! The buffer holds at most `capacity` packets; inserting past it evicts the
//! oldest one.

use super::{PacketStore, Setting, StoreError};
use async_trait::async_trait;
use cs_core::{Field, Filter, Options, PacketRecord, SortKey};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use tokio::sync::RwLock;

pub const DEFAULT_MAX_RECORDS: usize = 100_000;

pub struct MemoryStore {
    records: RwLock<VecDeque<PacketRecord>>,
    settings: RwLock<HashMap<String, BTreeMap<String, String>>>,
    capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECORDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::bounded(Vec::new(), capacity)
    }

    pub fn with_records(records: Vec<PacketRecord>) -> Self {
        Self::bounded(records, DEFAULT_MAX_RECORDS)
    }

    /// Keeps the last `capacity` of `records`.
    pub fn bounded(records: Vec<PacketRecord>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut records = VecDeque::from(records);
        if records.len() > capacity {
            let evicted = records.len() - capacity;
            records.drain(..evicted);
            tracing::warn!(
                evicted,
                capacity,
                "seed exceeds store capacity, oldest packets dropped"
            );
        }
        Self {
            records: RwLock::new(records),
            settings: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Load a JSON-lines file, one [`PacketRecord`] per line. Blank lines
    /// are skipped.
    pub fn load_jsonl(path: &Path, capacity: usize) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let records = parse_jsonl(&content)?;
        Ok(Self::bounded(records, capacity))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

pub fn parse_jsonl(content: &str) -> Result<Vec<PacketRecord>, StoreError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| StoreError::Decode {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

#[async_trait]
impl PacketStore for MemoryStore {
    async fn find(
        &self,
        filter: &Filter,
        options: &Options,
    ) -> Result<Vec<PacketRecord>, StoreError> {
        let like = compile_like(&filter.like)?;
        let records = self.records.read().await;

        let mut matched: Vec<PacketRecord> = records
            .iter()
            .filter(|r| matches(r, filter, &like))
            .cloned()
            .collect();
        drop(records);

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| compare(a, b, &options.sort));
        }

        if options.unique_call_id {
            let mut seen = HashSet::new();
            matched.retain(|r| seen.insert(r.call_id.clone()));
        }

        if let Some(limit) = options.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn insert(&self, record: PacketRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    async fn get_settings(&self, group: &str) -> Result<Vec<Setting>, StoreError> {
        let settings = self.settings.read().await;
        Ok(settings
            .get(group)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, value)| Setting {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_setting(&self, group: &str, setting: Setting) -> Result<(), StoreError> {
        let mut settings = self.settings.write().await;
        settings
            .entry(group.to_string())
            .or_default()
            .insert(setting.key, setting.value);
        Ok(())
    }

    async fn delete_setting(&self, group: &str, key: &str) -> Result<(), StoreError> {
        let mut settings = self.settings.write().await;
        let removed = settings
            .get_mut(group)
            .and_then(|entries| entries.remove(key));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::SettingNotFound {
                group: group.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

fn compile_like(like: &BTreeMap<Field, String>) -> Result<Vec<(Field, Regex)>, StoreError> {
    like.iter()
        .map(|(field, pattern)| {
            like_to_regex(pattern)
                .map(|re| (*field, re))
                .map_err(|source| StoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// `%` matches any run, `_` any single char, `\` makes the next char literal.
/// The pattern may match anywhere in the value.
fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("(?s)");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => match chars.next() {
                Some(next) => re.push_str(&regex::escape(next.encode_utf8(&mut [0; 4]))),
                None => re.push_str(r"\\"),
            },
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    Regex::new(&re)
}

fn matches(record: &PacketRecord, filter: &Filter, like: &[(Field, Regex)]) -> bool {
    let equals_ok = filter
        .equals
        .iter()
        .all(|(field, value)| record.text(*field) == *value);

    let like_ok = like.iter().all(|(field, re)| re.is_match(&record.text(*field)));

    let or_ok = filter.or.is_empty()
        || filter
            .or
            .iter()
            .any(|(field, value)| record.text(*field) == *value);

    let since_ok = match filter.start_date {
        Some(start) => record.date_time >= start,
        None => true,
    };
    let until_ok = match filter.end_date {
        Some(end) => record.date_time <= end,
        None => true,
    };

    equals_ok && like_ok && or_ok && since_ok && until_ok
}

fn compare(a: &PacketRecord, b: &PacketRecord, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ord = a.cmp_field(b, key.field);
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
