// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Internal stand-in for the "delta index" primitive that the surrounding
//! system treats as an opaque, swappable dependency (see SPEC_FULL.md §4.5
//! and §6.1). This module is the simplest implementation that satisfies the
//! contract the volume index is specified against -- a sorted-by-address,
//! per-list store with a cursor for locating and mutating entries, and a
//! byte-exact save/restore format. It is not a bit-packed encoding; entries
//! are stored as plain structs, and [`DeltaIndex::bits_used_in_zone`] reports
//! a modeled bit cost rather than actual memory footprint.
//!
//! Unlike the real primitive, every entry carries its full fingerprint
//! unconditionally rather than only when a collision is detected -- the
//! production format saves that memory by re-deriving the name lazily;
//! since this stand-in isn't bit-packed there is nothing to gain from the
//! same trick, and collision status is simply computed from how many
//! entries currently share an address.

mod io;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::zone::ZonePartition;

pub use io::GUARD_MARKER;

/// A single entry in a delta list: an address within the list, its payload
/// (an index-chapter number), and the full fingerprint that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaEntry {
    pub address: u32,
    pub value: u32,
    pub name: Fingerprint,
}

/// A handle into a specific delta list produced by [`DeltaIndex::start_search`].
///
/// Mirrors the external cursor contract of §6.1: it remembers a list and a
/// position (found or insertion point) so that `put`/`remove`/`set_value`
/// can act without re-searching.
#[derive(Copy, Clone, Debug)]
pub struct Cursor {
    pub list: u32,
    pub index: usize,
    pub found: bool,
}

/// Per-zone entry-count/bit accounting, returned by [`DeltaIndex::stats`].
#[derive(Copy, Clone, Debug, Default)]
pub struct DeltaIndexStats {
    pub record_count: u64,
    pub collision_count: u64,
}

/// Sorted-by-address, per-zone delta list store.
pub struct DeltaIndex {
    lists: Vec<Vec<DeltaEntry>>,
    zones: ZonePartition,
    tag: u8,
}

impl DeltaIndex {
    #[must_use]
    pub fn new(zones: ZonePartition) -> Self {
        let num_lists = zones.num_lists() as usize;
        Self {
            lists: vec![Vec::new(); num_lists],
            zones,
            tag: b'?',
        }
    }

    pub fn set_tag(&mut self, tag: u8) {
        self.tag = tag;
    }

    #[must_use]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    #[must_use]
    pub fn num_lists(&self) -> u32 {
        self.zones.num_lists()
    }

    #[must_use]
    pub fn zone_number_of(&self, list: u32) -> u32 {
        self.zones.zone_of_list(list)
    }

    #[must_use]
    pub fn first_list_in_zone(&self, zone: u32) -> u32 {
        self.zones.first_list_in_zone(zone)
    }

    #[must_use]
    pub fn list_count_in_zone(&self, zone: u32) -> u32 {
        self.zones.list_count_in_zone(zone)
    }

    pub fn empty_all(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
    }

    pub fn empty_zone(&mut self, zone: u32) {
        let first = self.first_list_in_zone(zone);
        let count = self.list_count_in_zone(zone);
        for list in &mut self.lists[first as usize..(first + count) as usize] {
            list.clear();
        }
    }

    /// Locates the entry for `(address, name)` in `list`. Returns a cursor
    /// positioned on the match (`found = true`) or on the sorted insertion
    /// point for `address` (`found = false`).
    #[must_use]
    pub fn start_search(&self, list: u32, address: u32, name: &Fingerprint) -> Cursor {
        let entries = &self.lists[list as usize];

        let start = entries.partition_point(|e| e.address < address);
        let mut idx = start;

        while idx < entries.len() && entries[idx].address == address {
            if &entries[idx].name == name {
                return Cursor {
                    list,
                    index: idx,
                    found: true,
                };
            }
            idx += 1;
        }

        Cursor {
            list,
            index: start,
            found: false,
        }
    }

    /// Convenience wrapper over `start_search` for callers that only care
    /// whether the entry exists.
    #[must_use]
    pub fn get_entry(&self, list: u32, address: u32, name: &Fingerprint) -> Option<Cursor> {
        let cursor = self.start_search(list, address, name);
        cursor.found.then_some(cursor)
    }

    #[must_use]
    pub fn get_value(&self, cursor: &Cursor) -> Option<u32> {
        cursor
            .found
            .then(|| self.lists[cursor.list as usize][cursor.index].value)
    }

    /// How many entries (including `cursor`'s own, if found) currently share
    /// its address -- more than one means the address is a collision.
    #[must_use]
    pub fn collisions_at(&self, list: u32, address: u32) -> usize {
        self.lists[list as usize]
            .iter()
            .filter(|e| e.address == address)
            .count()
    }

    pub fn remove(&mut self, cursor: &Cursor) {
        if cursor.found {
            self.lists[cursor.list as usize].remove(cursor.index);
        }
    }

    pub fn set_value(&mut self, cursor: &Cursor, value: u32) {
        if cursor.found {
            self.lists[cursor.list as usize][cursor.index].value = value;
        }
    }

    /// Inserts a new entry at `cursor`'s insertion point. `cursor.found`
    /// must be `false` (callers update in place via `set_value` instead).
    pub fn insert(&mut self, cursor: &Cursor, address: u32, value: u32, name: Fingerprint) {
        debug_assert!(!cursor.found);
        self.lists[cursor.list as usize].insert(cursor.index, DeltaEntry { address, value, name });
    }

    #[must_use]
    pub fn entries_in_list(&self, list: u32) -> &[DeltaEntry] {
        &self.lists[list as usize]
    }

    pub fn retain_in_list<F: FnMut(&DeltaEntry) -> bool>(&mut self, list: u32, mut keep: F) {
        self.lists[list as usize].retain(|e| keep(e));
    }

    #[must_use]
    pub fn list_len(&self, list: u32) -> usize {
        self.lists[list as usize].len()
    }

    /// Modeled bit cost of every entry currently stored in `zone`'s lists,
    /// given a per-entry bit cost (see `crate::config::derive_dense_params`).
    #[must_use]
    pub fn bits_used_in_zone(&self, zone: u32, bits_per_entry: u64) -> u64 {
        let first = self.first_list_in_zone(zone);
        let count = self.list_count_in_zone(zone);
        self.lists[first as usize..(first + count) as usize]
            .iter()
            .map(|l| l.len() as u64 * bits_per_entry)
            .sum()
    }

    #[must_use]
    pub fn stats(&self) -> DeltaIndexStats {
        let mut stats = DeltaIndexStats::default();
        for (list_num, list) in self.lists.iter().enumerate() {
            stats.record_count += list.len() as u64;
            for entry in list {
                if self.collisions_at(list_num as u32, entry.address) > 1 {
                    stats.collision_count += 1;
                }
            }
        }
        stats
    }

    pub fn save_zone<W: std::io::Write>(&self, zone: u32, writer: &mut W) -> Result<()> {
        io::save_zone(self, zone, writer)
    }

    pub fn restore_zone<R: std::io::Read>(&mut self, zone: u32, reader: &mut R) -> Result<()> {
        io::restore_zone(self, zone, reader)
    }

    pub(crate) fn lists_mut(&mut self) -> &mut [Vec<DeltaEntry>] {
        &mut self.lists
    }

    /// Resets a zone's partition after a failed restore, leaving the index
    /// well-formed instead of half-populated.
    pub fn abort_restore(&mut self, zone: u32) {
        self.empty_zone(zone);
    }
}

impl Clone for DeltaIndex {
    fn clone(&self) -> Self {
        Self {
            lists: self.lists.clone(),
            zones: self.zones.clone(),
            tag: self.tag,
        }
    }
}
