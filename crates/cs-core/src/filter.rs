//! # Query Descriptors
//!
//! [`Filter`] and [`Options`] form the contract between the front end and
//! any packet store. A filter is the AND of its present clauses; an absent
//! entry never acts as a wildcard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Queryable packet fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    CallId,
    CallIdALeg,
    SourceIp,
    SourcePort,
    DestinationIp,
    DestinationPort,
    FromUser,
    ToUser,
    DateTime,
    Microseconds,
    Message,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::CallId,
        Field::CallIdALeg,
        Field::SourceIp,
        Field::SourcePort,
        Field::DestinationIp,
        Field::DestinationPort,
        Field::FromUser,
        Field::ToUser,
        Field::DateTime,
        Field::Microseconds,
        Field::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallId => "callid",
            Self::CallIdALeg => "callidaleg",
            Self::SourceIp => "sourceip",
            Self::SourcePort => "sourceport",
            Self::DestinationIp => "destinationip",
            Self::DestinationPort => "destinationport",
            Self::FromUser => "fromuser",
            Self::ToUser => "touser",
            Self::DateTime => "datetime",
            Self::Microseconds => "microseconds",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field: '{0}'")]
pub struct FieldParseError(pub String);

impl FromStr for Field {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| FieldParseError(s.to_string()))
    }
}

/// One sort criterion. Textual form is the field name, prefixed with `-`
/// for descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: Field,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: Field) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn desc(field: Field) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

impl FromStr for SortKey {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix('-') {
            Some(rest) => Ok(Self::desc(rest.parse()?)),
            None => Ok(Self::asc(s.parse()?)),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

impl Serialize for SortKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SortKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Structured packet filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Field must equal the value exactly.
    #[serde(default)]
    pub equals: BTreeMap<Field, String>,
    /// Field must match the pattern (`%` any run, `_` any char, `\` escape).
    #[serde(default)]
    pub like: BTreeMap<Field, String>,
    /// At least one of these fields must equal its value.
    #[serde(default)]
    pub or: BTreeMap<Field, String>,
    /// Inclusive lower bound on `date_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `date_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets of the call itself or of any leg spawned from it.
    pub fn call_leg(call_id: &str) -> Self {
        let mut filter = Self::default();
        filter.or.insert(Field::CallId, call_id.to_string());
        filter.or.insert(Field::CallIdALeg, call_id.to_string());
        filter
    }
}

/// Query shaping applied by the store after filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Maximum records returned; `None` means unlimited.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    /// Keep only the first record (in sort order) of each call id.
    #[serde(default)]
    pub unique_call_id: bool,
}

impl Options {
    /// Chronological, unlimited, every duplicate kept.
    pub fn chronological() -> Self {
        Self {
            limit: None,
            sort: vec![SortKey::asc(Field::DateTime), SortKey::asc(Field::Microseconds)],
            unique_call_id: false,
        }
    }
}
