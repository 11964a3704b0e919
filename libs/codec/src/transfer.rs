//! Transfer scanner
//!
//! Collects the ports reachable from a value, in encounter order, so the
//! transport layer can account for ownership moving with the message.

use crate::port::PortId;
use crate::value::Value;

/// Every port reachable through records, sequences, map values and objects
pub fn collect_transfers(value: &Value) -> Vec<PortId> {
    let mut transfers = Vec::new();
    scan(value, &mut transfers);
    transfers
}

fn scan(value: &Value, transfers: &mut Vec<PortId>) {
    match value {
        Value::Port(port) => transfers.push(port.id()),
        Value::Record(fields) => fields.values().for_each(|field| scan(field, transfers)),
        Value::Seq(items) => items.iter().for_each(|item| scan(item, transfers)),
        Value::Map(entries) => entries.iter().for_each(|(key, entry)| {
            scan(key, transfers);
            scan(entry, transfers);
        }),
        Value::Object(object) => transfers.extend(object.transfer_ports()),
        _ => {}
    }
}
