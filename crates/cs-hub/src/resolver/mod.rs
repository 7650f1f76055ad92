//! # Call-Leg Resolver
//!
//! Expands a seed Call-ID into every packet of the logical call. A leg is
//! linked to another when its `callIdALeg` names that leg's Call-ID, so the
//! legs form a graph held only in the store. The graph is walked with an
//! explicit worklist and a visited set: each leg is queried exactly once and
//! cyclic graphs terminate.

use crate::store::{PacketStore, StoreError};
use cs_core::{normalize_owned, Filter, Options, PacketRecord};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

pub const DEFAULT_MAX_LEGS: usize = 256;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("call resolution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("call spans more than {limit} legs")]
    TooManyLegs { limit: usize },
}

pub struct CallResolver<'a> {
    store: &'a dyn PacketStore,
    max_legs: usize,
    timeout: Duration,
}

impl<'a> CallResolver<'a> {
    pub fn new(store: &'a dyn PacketStore) -> Self {
        Self {
            store,
            max_legs: DEFAULT_MAX_LEGS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn max_legs(mut self, max_legs: usize) -> Self {
        self.max_legs = max_legs;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every packet of every leg reachable from `seed`, unsorted and with
    /// duplicates. `exclude` names the leg the seed was reached from (empty
    /// at the top level); it is never descended into.
    pub async fn resolve(
        &self,
        seed: &str,
        exclude: &str,
    ) -> Result<Vec<PacketRecord>, ResolveError> {
        tokio::time::timeout(self.timeout, self.walk(seed, exclude))
            .await
            .map_err(|_| ResolveError::TimedOut(self.timeout))?
    }

    /// [`resolve`](Self::resolve) followed by chronological dedup.
    pub async fn call_packets(&self, call_id: &str) -> Result<Vec<PacketRecord>, ResolveError> {
        let packets = self.resolve(call_id, "").await?;
        Ok(normalize_owned(packets))
    }

    async fn walk(&self, seed: &str, exclude: &str) -> Result<Vec<PacketRecord>, ResolveError> {
        let options = Options::chronological();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<(String, String)> = VecDeque::new();
        let mut packets = Vec::new();

        // `exclude` is marked visited but never queried, so it does not
        // count toward the leg limit.
        if !exclude.is_empty() {
            visited.insert(exclude.to_string());
        }
        visited.insert(seed.to_string());
        pending.push_back((seed.to_string(), exclude.to_string()));
        let mut legs = 1;

        while let Some((leg, parent)) = pending.pop_front() {
            let records = self.store.find(&Filter::call_leg(&leg), &options).await?;
            tracing::debug!(leg = %leg, parent = %parent, records = records.len(), "resolved call leg");

            for next in leg_ids(&records, &leg, &parent) {
                if visited.contains(&next) {
                    continue;
                }
                if legs >= self.max_legs {
                    return Err(ResolveError::TooManyLegs {
                        limit: self.max_legs,
                    });
                }
                legs += 1;
                visited.insert(next.clone());
                pending.push_back((next, leg.clone()));
            }

            packets.extend(records);
        }

        Ok(packets)
    }
}

/// Call-IDs of legs other than `leg` found in its records, skipping records
/// whose A-leg is `parent`.
pub fn leg_ids(records: &[PacketRecord], leg: &str, parent: &str) -> Vec<String> {
    let mut ids: Vec<String> = records
        .iter()
        .filter(|r| parent.is_empty() || r.call_id_a_leg != parent)
        .filter(|r| r.call_id != leg)
        .map(|r| r.call_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}
