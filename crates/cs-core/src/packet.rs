//! # Packet Records
//!
//! A [`PacketRecord`] is one observed SIP packet as returned by the store.
//! Records carry no synthetic id: two records are the same record iff every
//! field is equal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::filter::Field;

/// One captured signaling packet.
///
/// # Ordering Key
///
/// Records are ordered by `(date_time, microseconds)` first, then by every
/// remaining field in declaration order. The order is total and consistent
/// with [`PartialEq`], so sorting places identical records next to each
/// other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketRecord {
    /// Call-ID advertised by this packet's dialog.
    pub call_id: String,
    /// Call-ID of the leg this dialog was spawned from (empty if none).
    #[serde(default)]
    pub call_id_a_leg: String,
    pub source_ip: String,
    pub source_port: u16,
    pub destination_ip: String,
    pub destination_port: u16,
    #[serde(default)]
    pub from_user: String,
    #[serde(default)]
    pub to_user: String,
    /// Capture instant, second resolution.
    pub date_time: DateTime<Utc>,
    /// Sub-second offset of the capture instant.
    #[serde(default)]
    pub microseconds: u32,
    /// Raw signaling text.
    #[serde(default)]
    pub message: String,
}

impl Ord for PacketRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            self.date_time,
            self.microseconds,
            &self.call_id,
            &self.call_id_a_leg,
            &self.source_ip,
            self.source_port,
            &self.destination_ip,
            self.destination_port,
            &self.from_user,
            &self.to_user,
            &self.message,
        )
            .cmp(&(
                other.date_time,
                other.microseconds,
                &other.call_id,
                &other.call_id_a_leg,
                &other.source_ip,
                other.source_port,
                &other.destination_ip,
                other.destination_port,
                &other.from_user,
                &other.to_user,
                &other.message,
            ))
    }
}

impl PartialOrd for PacketRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PacketRecord {
    /// Textual value of a field, as matched by `equals`/`like`/`or` clauses.
    pub fn text(&self, field: Field) -> String {
        match field {
            Field::CallId => self.call_id.clone(),
            Field::CallIdALeg => self.call_id_a_leg.clone(),
            Field::SourceIp => self.source_ip.clone(),
            Field::SourcePort => self.source_port.to_string(),
            Field::DestinationIp => self.destination_ip.clone(),
            Field::DestinationPort => self.destination_port.to_string(),
            Field::FromUser => self.from_user.clone(),
            Field::ToUser => self.to_user.clone(),
            Field::DateTime => self.date_time.to_rfc3339(),
            Field::Microseconds => self.microseconds.to_string(),
            Field::Message => self.message.clone(),
        }
    }

    /// Compare two records on a single field using that field's natural order.
    pub fn cmp_field(&self, other: &Self, field: Field) -> Ordering {
        match field {
            Field::CallId => self.call_id.cmp(&other.call_id),
            Field::CallIdALeg => self.call_id_a_leg.cmp(&other.call_id_a_leg),
            Field::SourceIp => self.source_ip.cmp(&other.source_ip),
            Field::SourcePort => self.source_port.cmp(&other.source_port),
            Field::DestinationIp => self.destination_ip.cmp(&other.destination_ip),
            Field::DestinationPort => self.destination_port.cmp(&other.destination_port),
            Field::FromUser => self.from_user.cmp(&other.from_user),
            Field::ToUser => self.to_user.cmp(&other.to_user),
            Field::DateTime => self.date_time.cmp(&other.date_time),
            Field::Microseconds => self.microseconds.cmp(&other.microseconds),
            Field::Message => self.message.cmp(&other.message),
        }
    }
}

/// Sort records chronologically and collapse adjacent identical records.
///
/// The input is left untouched; a new sequence is returned.
pub fn normalize(records: &[PacketRecord]) -> Vec<PacketRecord> {
    normalize_owned(records.to_vec())
}

/// Owned variant of [`normalize`] for callers that discard their input.
pub fn normalize_owned(mut records: Vec<PacketRecord>) -> Vec<PacketRecord> {
    records.sort();
    records.dedup();
    records
}
