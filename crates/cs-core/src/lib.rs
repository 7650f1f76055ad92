//! # cs-core — packet model of callscope
//!
//! Defines the [`PacketRecord`] read from the capture store, the
//! chronological total order used to present a call, and the query
//! descriptors ([`Filter`], [`Options`]) handed to any packet store.

pub mod dump;
pub mod filter;
pub mod packet;

pub use dump::format_dump;
pub use filter::{Field, FieldParseError, Filter, Options, SortKey};
pub use packet::{normalize, normalize_owned, PacketRecord};
