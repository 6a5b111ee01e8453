// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory registry of known printers and the per-cycle diff against it.
//
// The registry only remembers what the latest probe reported.  A printer
// missing from one result is dropped, and if it comes back later it is
// reported as new again.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use fleetpress_core::types::{
    DiscoveryDelta, FieldChange, PrinterField, PrinterId, PrinterRecord, PrinterUpdate,
};

#[derive(Debug, Default)]
pub struct PrinterRegistry {
    printers: HashMap<PrinterId, PrinterRecord>,
}

impl PrinterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.printers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.printers.is_empty()
    }

    pub fn get(&self, id: &PrinterId) -> Option<&PrinterRecord> {
        self.printers.get(id)
    }

    pub fn contains(&self, id: &PrinterId) -> bool {
        self.printers.contains_key(id)
    }

    /// All known printers, sorted by id.
    pub fn snapshot(&self) -> Vec<PrinterRecord> {
        let mut printers: Vec<_> = self.printers.values().cloned().collect();
        printers.sort_by(|a, b| a.id.cmp(&b.id));
        printers
    }

    /// Compare a probe result against the registry without modifying it.
    ///
    /// New and updated printers keep the probe's order; lost printers are
    /// sorted by id.
    pub fn diff(&self, latest: &[PrinterRecord]) -> DiscoveryDelta {
        let latest = dedup_by_id(latest.to_vec());
        let mut delta = DiscoveryDelta::default();

        for printer in &latest {
            match self.printers.get(&printer.id) {
                None => delta.new_printers.push(printer.clone()),
                Some(known) => {
                    let changes = field_changes(known, printer);
                    if !changes.is_empty() {
                        delta.updated_printers.push(PrinterUpdate {
                            printer: printer.clone(),
                            changes,
                        });
                    }
                }
            }
        }

        let mut lost: Vec<_> = self
            .printers
            .values()
            .filter(|known| !latest.iter().any(|p| p.id == known.id))
            .cloned()
            .collect();
        lost.sort_by(|a, b| a.id.cmp(&b.id));
        delta.lost_printers = lost;

        delta
    }

    /// Replace the registry contents with `latest`, stamping `last_seen`.
    pub fn replace(&mut self, latest: Vec<PrinterRecord>, seen_at: DateTime<Utc>) {
        self.printers = dedup_by_id(latest)
            .into_iter()
            .map(|mut printer| {
                printer.last_seen = seen_at;
                (printer.id.clone(), printer)
            })
            .collect();
    }

    /// Diff then replace, returning the delta.  Records in the returned
    /// delta carry the new `last_seen` stamp.
    pub fn apply(&mut self, latest: Vec<PrinterRecord>, seen_at: DateTime<Utc>) -> DiscoveryDelta {
        let stamped: Vec<_> = latest
            .into_iter()
            .map(|mut printer| {
                printer.last_seen = seen_at;
                printer
            })
            .collect();
        let delta = self.diff(&stamped);
        self.replace(stamped, seen_at);
        delta
    }
}

/// Collapse repeated ids, keeping the first position and the last record.
fn dedup_by_id(printers: Vec<PrinterRecord>) -> Vec<PrinterRecord> {
    let mut index: HashMap<PrinterId, usize> = HashMap::new();
    let mut unique: Vec<PrinterRecord> = Vec::with_capacity(printers.len());
    for printer in printers {
        match index.get(&printer.id) {
            Some(&i) => unique[i] = printer,
            None => {
                index.insert(printer.id.clone(), unique.len());
                unique.push(printer);
            }
        }
    }
    unique
}

fn field_changes(known: &PrinterRecord, latest: &PrinterRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut push = |field, previous: String, current: String| {
        if previous != current {
            changes.push(FieldChange {
                field,
                previous,
                current,
            });
        }
    };

    push(PrinterField::Status, known.status.to_string(), latest.status.to_string());
    push(PrinterField::Ip, display_opt(&known.ip), display_opt(&latest.ip));
    push(PrinterField::Port, display_opt(&known.port), display_opt(&latest.port));
    push(
        PrinterField::Connection,
        known.connection.to_string(),
        latest.connection.to_string(),
    );
    // BTreeSet iteration is sorted, so this comparison ignores probe order.
    push(
        PrinterField::Capabilities,
        join_set(&known.capabilities),
        join_set(&latest.capabilities),
    );

    changes
}

fn display_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".into())
}

fn join_set(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use fleetpress_core::types::{ConnectionKind, PrinterStatus, PrinterType};

    use super::*;

    fn printer(id: &str) -> PrinterRecord {
        PrinterRecord::new(id, format!("Printer {id}"), PrinterType::Thermal, ConnectionKind::Network)
            .with_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 20)), 9100)
    }

    #[test]
    fn first_sighting_is_new() {
        let registry = PrinterRegistry::new();
        let delta = registry.diff(&[printer("A"), printer("B")]);
        assert_eq!(delta.new_printers.len(), 2);
        assert!(delta.updated_printers.is_empty());
        assert!(delta.lost_printers.is_empty());
    }

    #[test]
    fn unchanged_result_gives_empty_delta() {
        let mut registry = PrinterRegistry::new();
        registry.apply(vec![printer("A"), printer("B")], Utc::now());
        let before = registry.snapshot();

        let delta = registry.apply(vec![printer("B"), printer("A")], Utc::now());
        assert!(delta.is_empty());

        let after = registry.snapshot();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.id, a.id);
            assert_eq!(b.status, a.status);
            assert_eq!(b.ip, a.ip);
        }
    }

    #[test]
    fn status_and_port_changes_are_reported() {
        let mut registry = PrinterRegistry::new();
        registry.apply(vec![printer("A")], Utc::now());

        let mut changed = printer("A").with_status(PrinterStatus::Offline);
        changed.port = Some(515);
        let delta = registry.diff(&[changed]);

        assert_eq!(delta.updated_printers.len(), 1);
        let fields: Vec<_> = delta.updated_printers[0]
            .changes
            .iter()
            .map(|c| c.field)
            .collect();
        assert_eq!(fields, vec![PrinterField::Status, PrinterField::Port]);
        assert_eq!(delta.updated_printers[0].changes[1].previous, "9100");
        assert_eq!(delta.updated_printers[0].changes[1].current, "515");
    }

    #[test]
    fn capability_order_does_not_matter() {
        let mut registry = PrinterRegistry::new();
        registry.apply(
            vec![printer("A").with_capability("cut").with_capability("qr")],
            Utc::now(),
        );
        let delta = registry.diff(&[printer("A").with_capability("qr").with_capability("cut")]);
        assert!(delta.is_empty());

        let delta = registry.diff(&[printer("A").with_capability("qr")]);
        assert_eq!(delta.updated_printers[0].changes[0].field, PrinterField::Capabilities);
    }

    #[test]
    fn name_change_alone_is_not_an_update() {
        let mut registry = PrinterRegistry::new();
        registry.apply(vec![printer("A")], Utc::now());
        let mut renamed = printer("A");
        renamed.name = "Bar".into();
        assert!(registry.diff(&[renamed]).is_empty());
    }

    #[test]
    fn missing_printer_is_lost_and_removed() {
        let mut registry = PrinterRegistry::new();
        registry.apply(vec![printer("X")], Utc::now());

        let delta = registry.apply(Vec::new(), Utc::now());
        assert_eq!(delta.lost_printers.len(), 1);
        assert_eq!(delta.lost_printers[0].id.as_str(), "X");
        assert!(!registry.contains(&"X".into()));

        // Reappearing printers are new again.
        let delta = registry.apply(vec![printer("X")], Utc::now());
        assert_eq!(delta.new_printers.len(), 1);
    }

    #[test]
    fn last_seen_is_stamped() {
        let mut registry = PrinterRegistry::new();
        let stamp = Utc::now() + chrono::Duration::seconds(60);
        let delta = registry.apply(vec![printer("A")], stamp);
        assert_eq!(delta.new_printers[0].last_seen, stamp);
        assert_eq!(registry.get(&"A".into()).expect("present").last_seen, stamp);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let mut registry = PrinterRegistry::new();
        let delta = registry.apply(
            vec![printer("A"), printer("A").with_status(PrinterStatus::Busy)],
            Utc::now(),
        );
        assert_eq!(delta.new_printers.len(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&"A".into()).expect("present").status,
            PrinterStatus::Busy
        );
    }
}
