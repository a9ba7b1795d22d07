//! Reassembly of concatenated SMS fragments into one logical message.
//!
//! Groups are keyed by originator, then by reference number. A group is
//! complete once every part number `1..=total_parts` has been seen, at which
//! point it is removed and its text returned in part-number order.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::types::FragmentHeader;

/// Accumulated fragments of one message.
#[derive(Debug)]
struct FragmentGroup {
    total_parts: u8,
    /// Part number → text. A re-delivered part replaces the earlier copy.
    parts: BTreeMap<u8, String>,
    first_seen: DateTime<Utc>,
    created: Instant,
}

impl FragmentGroup {
    fn new(total_parts: u8, first_seen: DateTime<Utc>) -> Self {
        Self {
            total_parts,
            parts: BTreeMap::new(),
            first_seen,
            created: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.parts.len() == usize::from(self.total_parts)
    }

    fn concat(self) -> String {
        self.parts.into_values().collect()
    }
}

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub text: String,
    /// Timestamp of the first fragment seen for the group.
    pub first_seen: DateTime<Utc>,
}

/// In-memory tracker for partially received messages.
#[derive(Debug, Default)]
pub struct ReassemblyTracker {
    groups: HashMap<String, HashMap<u16, FragmentGroup>>,
}

impl ReassemblyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fragment. Returns the full text when this fragment completes
    /// its group.
    pub fn ingest_fragment(
        &mut self,
        originator: &str,
        header: FragmentHeader,
        timestamp: DateTime<Utc>,
        text: &str,
    ) -> Option<Reassembled> {
        let FragmentHeader {
            reference,
            total_parts,
            part_number,
        } = header;

        if part_number == 0 || part_number > total_parts {
            warn!(
                originator,
                reference, part_number, total_parts, "Fragment part number out of range, ignoring"
            );
            return None;
        }

        let by_reference = self.groups.entry(originator.to_string()).or_default();
        let group = by_reference
            .entry(reference)
            .or_insert_with(|| FragmentGroup::new(total_parts, timestamp));

        // A reused reference with a different part count is a new message;
        // the unfinished group it collides with is abandoned.
        if group.total_parts != total_parts {
            warn!(
                originator,
                reference,
                expected = group.total_parts,
                got = total_parts,
                received = group.parts.len(),
                "Fragment total changed, restarting group"
            );
            *group = FragmentGroup::new(total_parts, timestamp);
        }

        if group.parts.insert(part_number, text.to_string()).is_some() {
            debug!(originator, reference, part_number, "Duplicate fragment replaced earlier copy");
        }

        if !group.is_complete() {
            debug!(
                originator,
                reference,
                received = group.parts.len(),
                total = group.total_parts,
                "Fragment stored, waiting for more"
            );
            return None;
        }

        let group = by_reference.remove(&reference)?;
        if by_reference.is_empty() {
            self.groups.remove(originator);
        }

        Some(Reassembled {
            first_seen: group.first_seen,
            text: group.concat(),
        })
    }

    /// Drop groups that have waited longer than `ttl` for their missing
    /// parts. Returns how many were dropped.
    pub fn evict_stale(&mut self, ttl: Duration) -> usize {
        let mut evicted = 0;
        self.groups.retain(|originator, by_reference| {
            by_reference.retain(|reference, group| {
                let keep = group.created.elapsed() < ttl;
                if !keep {
                    warn!(
                        originator = %originator,
                        reference,
                        received = group.parts.len(),
                        total = group.total_parts,
                        "Dropping incomplete fragment group"
                    );
                    evicted += 1;
                }
                keep
            });
            !by_reference.is_empty()
        });
        evicted
    }

    /// Number of incomplete groups across all originators.
    pub fn pending_groups(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }
}
