//! Plain-text call dump, one block per packet.

use crate::packet::PacketRecord;
use std::fmt::Write;

/// Render packets as `U src:port -> dst:port` headers followed by the raw
/// message. When `ip` is given, only packets sent from or to it are kept.
pub fn format_dump(records: &[PacketRecord], ip: Option<&str>) -> String {
    let mut dump = String::new();
    for packet in records {
        if let Some(ip) = ip {
            if packet.source_ip != ip && packet.destination_ip != ip {
                continue;
            }
        }
        let _ = writeln!(
            dump,
            "U {}:{} -> {}:{}",
            packet.source_ip, packet.source_port, packet.destination_ip, packet.destination_port
        );
        dump.push_str(&packet.message);
        dump.push_str("\n\n");
    }
    dump
}
