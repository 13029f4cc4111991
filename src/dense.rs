// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `DenseIndex` (V5): an associative array of fingerprint -> virtual chapter
//! with a lazy per-delta-list LRU, zone sharding, and a byte-exact
//! save/restore format. See SPEC_FULL.md §4.2.

use crate::chapter::ChapterMask;
use crate::config::{derive_dense_params, Config, DenseParams};
use crate::delta_list::DeltaIndex;
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FingerprintCodec};
use crate::record::Record;
use crate::zone::ZonePartition;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const MAGIC_5: &[u8; 8] = b"MI5-0005";

/// Per-zone chapter range and early-flush counter. Cache-line sized in the
/// original to avoid false sharing between zone-owning threads; that
/// alignment concern doesn't apply to a `Vec<ZoneState>` accessed by index
/// from a single thread at a time the way this crate uses it, so it is left
/// as a plain struct.
#[derive(Copy, Clone, Debug, Default)]
pub struct ZoneState {
    pub virtual_low: u64,
    pub virtual_high: u64,
    pub early_flush_count: u64,
}

/// Header of a single zone's vi005 stream, read ahead of its delta payload
/// so [`DenseIndex::restore_all`] can reconcile state across zones before
/// any payload is restored.
struct ZoneHeader {
    first_list: u32,
    virtual_low: u64,
    virtual_high: u64,
    flush_chapters: Vec<u64>,
}

/// Aggregate counters reported by [`DenseIndex::stats`].
#[derive(Copy, Clone, Debug, Default)]
pub struct DenseStats {
    pub record_count: u64,
    pub collision_count: u64,
    pub early_flush_count: u64,
}

pub struct DenseIndex {
    delta: DeltaIndex,
    codec: FingerprintCodec,
    zones: ZonePartition,
    zone_states: Vec<ZoneState>,
    flush_chapters: Vec<u64>,
    chapter_mask: ChapterMask,
    params: DenseParams,
    volume_nonce: u64,
    overflow_log_count: u64,
}

impl DenseIndex {
    pub fn new(config: &Config, volume_nonce: u64) -> Result<Self> {
        config.validate()?;
        if config.geometry.is_sparse() {
            return Err(Error::InvalidArgument(
                "DenseIndex cannot be built from a geometry with sparse chapters; use CompositeIndex".into(),
            ));
        }

        let params = derive_dense_params(
            config.geometry.records_per_chapter,
            config.geometry.chapters_per_volume,
            config.mean_delta,
            config.zone_count,
            config.min_delta_lists,
        )?;

        let zones = ZonePartition::new(params.num_lists, config.zone_count);
        let codec = FingerprintCodec::new(params.address_bits, params.num_lists);
        let delta = DeltaIndex::new(zones.clone());
        let chapter_mask = ChapterMask::new(params.chapter_bits);

        Ok(Self {
            delta,
            codec,
            zone_states: vec![ZoneState::default(); config.zone_count as usize],
            flush_chapters: vec![0u64; params.num_lists as usize],
            zones,
            chapter_mask,
            params,
            volume_nonce,
            overflow_log_count: 0,
        })
    }

    #[must_use]
    pub fn num_zones(&self) -> u32 {
        self.zones.num_zones()
    }

    pub fn set_tag(&mut self, tag: u8) {
        self.delta.set_tag(tag);
    }

    #[must_use]
    pub fn zone_of(&self, fp: &Fingerprint) -> u32 {
        self.zones.zone_of(&self.codec, fp)
    }

    #[must_use]
    pub fn is_sample(&self, _fp: &Fingerprint) -> bool {
        false
    }

    #[must_use]
    pub fn zone_state(&self, zone: u32) -> ZoneState {
        self.zone_states[zone as usize]
    }

    fn bits_per_entry(&self) -> u64 {
        crate::config::bits_per_entry(self.params.chapter_bits, self.params.mean_delta)
    }

    /// Applies the lazy per-delta-list LRU: removes entries whose index
    /// chapter has rolled below the zone's current `virtual_low`, advancing
    /// `flush_chapters[list]` to the smallest surviving virtual chapter
    /// (clamped to `virtual_high`).
    fn flush_stale_entries(&mut self, list: u32, zone: u32) {
        let low = self.zone_states[zone as usize].virtual_low;
        let high = self.zone_states[zone as usize].virtual_high;

        if self.flush_chapters[list as usize] >= low {
            return;
        }

        let mask = self.chapter_mask;
        let mut smallest_surviving: Option<u64> = None;

        log::trace!("flushing stale entries for list {list} (zone {zone}, low={low})");

        self.delta.retain_in_list(list, |entry| {
            let virt = mask.to_virtual(entry.value, low);
            let keep = virt >= low;
            if keep {
                smallest_surviving = Some(smallest_surviving.map_or(virt, |s| s.min(virt)));
            }
            keep
        });

        self.flush_chapters[list as usize] = smallest_surviving.unwrap_or(high).min(high);
    }

    pub fn get_record(&mut self, fp: &Fingerprint) -> Result<Record> {
        let (address, list) = self.codec.address_and_list(fp);
        let zone = self.zones.zone_of_list(list);

        self.flush_stale_entries(list, zone);

        let cursor = self.delta.start_search(list, address, fp);
        let is_found = cursor.found;
        let is_collision = is_found && self.delta.collisions_at(list, address) > 1;

        let virtual_chapter = if is_found {
            let low = self.zone_states[zone as usize].virtual_low;
            let index_chapter = self
                .delta
                .get_value(&cursor)
                .expect("cursor.found implies a value exists");
            Some(self.chapter_mask.to_virtual(index_chapter, low))
        } else {
            None
        };

        Ok(Record::located(
            *fp,
            address,
            zone,
            cursor,
            is_found,
            is_collision,
            virtual_chapter,
            false,
        ))
    }

    pub fn put_record(&mut self, record: &mut Record, virtual_chapter: u64) -> Result<()> {
        record.require_live()?;

        let zone = record.zone;
        let (low, high) = {
            let state = self.zone_states[zone as usize];
            (state.virtual_low, state.virtual_high)
        };

        if virtual_chapter < low || virtual_chapter > high {
            return Err(Error::InvalidArgument(format!(
                "virtual chapter {virtual_chapter} outside zone range [{low}, {high}]",
            )));
        }

        let index_chapter = self.chapter_mask.to_index(virtual_chapter) as u32;

        if record.is_found {
            self.delta.set_value(&record.cursor, index_chapter);
            record.mark_updated(virtual_chapter);
            return Ok(());
        }

        let projected = self.delta.bits_used_in_zone(zone, self.bits_per_entry()) + self.bits_per_entry();
        if projected > self.params.max_zone_bits {
            self.overflow_log_count += 1;
            if self.overflow_log_count % 100 == 1 {
                log::warn!(
                    "volume index zone {zone} bit budget exhausted ({projected} > {}); dropping entry (occurrence {})",
                    self.params.max_zone_bits,
                    self.overflow_log_count,
                );
            }
            return Err(Error::Overflow);
        }

        self.delta
            .insert(&record.cursor, record.address, index_chapter, record.fingerprint);
        record.mark_inserted(virtual_chapter);

        Ok(())
    }

    pub fn set_record_chapter(&mut self, record: &mut Record, virtual_chapter: u64) -> Result<()> {
        record.require_found()?;

        let zone = record.zone;
        let (low, high) = {
            let state = self.zone_states[zone as usize];
            (state.virtual_low, state.virtual_high)
        };
        if virtual_chapter < low || virtual_chapter > high {
            return Err(Error::InvalidArgument(format!(
                "virtual chapter {virtual_chapter} outside zone range [{low}, {high}]",
            )));
        }

        let index_chapter = self.chapter_mask.to_index(virtual_chapter) as u32;
        self.delta.set_value(&record.cursor, index_chapter);
        record.mark_updated(virtual_chapter);
        Ok(())
    }

    pub fn remove_record(&mut self, record: &mut Record) -> Result<()> {
        record.require_found()?;
        self.delta.remove(&record.cursor);
        record.mark_removed();
        Ok(())
    }

    /// Read-only lookup: returns the stored chapter if `fp` is present and
    /// within `[low, high]` for its zone. Never mutates (no lazy flush).
    #[must_use]
    pub fn lookup_sampled(&self, fp: &Fingerprint) -> Option<u64> {
        let (address, list) = self.codec.address_and_list(fp);
        let zone = self.zones.zone_of_list(list);
        let state = self.zone_states[zone as usize];

        let cursor = self.delta.get_entry(list, address, fp)?;
        let index_chapter = self.delta.get_value(&cursor)?;
        let virt = self.chapter_mask.to_virtual(index_chapter, state.virtual_low);

        (virt >= state.virtual_low && virt <= state.virtual_high).then_some(virt)
    }

    fn new_low_for_forward_move(&self, v: u64) -> u64 {
        v.saturating_sub(u64::from(self.params.num_chapters) - 1)
    }

    pub fn set_zone_open_chapter(&mut self, zone: u32, v: u64) {
        let (low, high) = {
            let state = self.zone_states[zone as usize];
            (state.virtual_low, state.virtual_high)
        };

        if v <= low {
            // Case 1: reopening at or before the current low empties the
            // zone and collapses the range to [v, v]. Preserved exactly as
            // the original does it, even when v < low (see SPEC_FULL.md §9
            // open question) -- this can discard records that arguably
            // still belong to chapters in [v, low).
            self.delta.empty_zone(zone);
            self.reset_flush_watermarks_for_zone(zone, v);
            self.zone_states[zone as usize] = ZoneState {
                virtual_low: v,
                virtual_high: v,
                early_flush_count: self.zone_states[zone as usize].early_flush_count,
            };
        } else if v <= high {
            // Case 2: backward move within the current range. Discard
            // entries newer than v; flush watermarks for this zone's lists
            // are left where they are since flush_stale_entries will pick
            // up the new, tighter low lazily.
            let mask = self.chapter_mask;
            let first = self.zones.first_list_in_zone(zone);
            let count = self.zones.list_count_in_zone(zone);
            for list in first..first + count {
                self.delta.retain_in_list(list, |entry| {
                    let virt = mask.to_virtual(entry.value, low);
                    !(virt > v && virt <= high)
                });
            }
            self.zone_states[zone as usize].virtual_high = v;
        } else {
            let new_low = self.new_low_for_forward_move(v);

            if new_low < low {
                // Case 3: forward move that still keeps every old chapter.
                self.zone_states[zone as usize].virtual_high = v;
            } else if new_low <= high {
                // Case 4: forward move that drops the oldest chapters, but
                // the new window still overlaps the old range.
                self.zone_states[zone as usize].virtual_low = new_low;
                self.zone_states[zone as usize].virtual_high = v;
            } else {
                // Case 5: discontinuous jump -- the new window doesn't
                // overlap the old range at all, so the zone collapses to
                // [v, v] same as case 1, just via a forward move.
                self.zone_states[zone as usize].virtual_low = v;
                self.zone_states[zone as usize].virtual_high = v;
            }
        }

        self.apply_early_flush_if_needed(zone);
    }

    fn reset_flush_watermarks_for_zone(&mut self, zone: u32, v: u64) {
        let first = self.zones.first_list_in_zone(zone);
        let count = self.zones.list_count_in_zone(zone);
        for list in first..first + count {
            self.flush_chapters[list as usize] = v;
        }
    }

    fn apply_early_flush_if_needed(&mut self, zone: u32) {
        let used = self.delta.bits_used_in_zone(zone, self.bits_per_entry());
        if used <= self.params.max_zone_bits {
            return;
        }

        let overage = used - self.params.max_zone_bits;
        let per_chapter = self.params.bits_per_chapter_per_zone.max(1);
        let expire = 1 + overage / per_chapter;

        let state = &mut self.zone_states[zone as usize];
        let new_low = state.virtual_low.saturating_add(expire).min(state.virtual_high);
        let advanced = new_low - state.virtual_low;
        state.virtual_low = new_low;
        // At least one early-flush event occurred even when `advanced` is 0
        // (already clamped to `virtual_high`), so the counter stays
        // monotone per call, matching invariant 6 ("early_flush_count never
        // decreases").
        state.early_flush_count += advanced.max(1);

        log::warn!(
            "volume index zone {zone} early-flushed {expire} chapter(s), new low = {}",
            state.virtual_low,
        );
    }

    pub fn set_open_chapter(&mut self, v: u64) {
        for zone in 0..self.num_zones() {
            self.set_zone_open_chapter(zone, v);
        }
    }

    #[must_use]
    pub fn stats(&self) -> DenseStats {
        let delta_stats = self.delta.stats();
        let early_flush_count = self.zone_states.iter().map(|z| z.early_flush_count).sum();
        DenseStats {
            record_count: delta_stats.record_count,
            collision_count: delta_stats.collision_count,
            early_flush_count,
        }
    }

    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.delta.stats().record_count as usize * std::mem::size_of::<crate::delta_list::DeltaEntry>()
    }

    pub fn save_zone<W: Write>(&self, zone: u32, writer: &mut W) -> Result<()> {
        let state = self.zone_states[zone as usize];
        let first = self.zones.first_list_in_zone(zone);
        let count = self.zones.list_count_in_zone(zone);

        log::debug!(
            "saving dense volume index zone {zone} (lists [{first}, {})], range [{}, {}])",
            first + count,
            state.virtual_low,
            state.virtual_high,
        );

        writer.write_all(MAGIC_5)?;
        writer.write_u64::<LittleEndian>(self.volume_nonce)?;
        writer.write_u64::<LittleEndian>(state.virtual_low)?;
        writer.write_u64::<LittleEndian>(state.virtual_high)?;
        writer.write_u32::<LittleEndian>(first)?;
        writer.write_u32::<LittleEndian>(count)?;

        for list in first..first + count {
            writer.write_u64::<LittleEndian>(self.flush_chapters[list as usize])?;
        }

        self.delta.save_zone(zone, writer)?;

        Ok(())
    }

    /// Reads a zone's vi005 header and flush table without touching its
    /// delta payload or committing any state, so that [`Self::restore_all`]
    /// can read every zone's header before deciding the reconciled
    /// `(virtual_low, virtual_high)` to apply across all of them.
    fn restore_zone_header<R: Read>(&self, zone: u32, reader: &mut R) -> Result<ZoneHeader> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC_5 {
            return Err(Error::CorruptData(format!(
                "bad vi005 magic: {:?}",
                String::from_utf8_lossy(&magic),
            )));
        }

        let nonce = reader.read_u64::<LittleEndian>()?;
        if nonce != self.volume_nonce {
            return Err(Error::CorruptData(format!(
                "volume nonce mismatch: expected {}, got {nonce}",
                self.volume_nonce,
            )));
        }

        let virtual_low = reader.read_u64::<LittleEndian>()?;
        let virtual_high = reader.read_u64::<LittleEndian>()?;
        let first_list = reader.read_u32::<LittleEndian>()?;
        let num_lists = reader.read_u32::<LittleEndian>()?;

        let expected_first = self.zones.first_list_in_zone(zone);
        let expected_count = self.zones.list_count_in_zone(zone);
        if first_list != expected_first || num_lists != expected_count {
            return Err(Error::CorruptData(format!(
                "zone {zone} list range mismatch: stream has [{first_list}, {first_list}+{num_lists}), expected [{expected_first}, {expected_first}+{expected_count})",
            )));
        }

        let mut flush_chapters = Vec::with_capacity(num_lists as usize);
        for _ in 0..num_lists {
            flush_chapters.push(reader.read_u64::<LittleEndian>()?);
        }

        Ok(ZoneHeader {
            first_list,
            virtual_low,
            virtual_high,
            flush_chapters,
        })
    }

    /// Restores a zone's delta payload and commits its state, using the
    /// `(virtual_low, virtual_high)` already reconciled across every zone in
    /// the stream by [`Self::restore_all`].
    fn finish_restore_zone<R: Read>(
        &mut self,
        zone: u32,
        reader: &mut R,
        header: &ZoneHeader,
        virtual_low: u64,
        virtual_high: u64,
    ) -> Result<()> {
        match self.delta.restore_zone(zone, reader) {
            Ok(()) => {}
            Err(e) => {
                log::warn!("aborting restore of dense volume index zone {zone}: {e}");
                self.delta.abort_restore(zone);
                return Err(e);
            }
        }

        log::trace!("restored dense volume index zone {zone}: range [{virtual_low}, {virtual_high}]");

        for (i, list) in (header.first_list..header.first_list + header.flush_chapters.len() as u32).enumerate() {
            self.flush_chapters[list as usize] = header.flush_chapters[i];
        }
        self.zone_states[zone as usize] = ZoneState {
            virtual_low,
            virtual_high,
            early_flush_count: 0,
        };

        Ok(())
    }

    /// Restores a single zone in isolation, with no cross-zone reconciliation
    /// (the zone's own stream `virtual_low`/`virtual_high` are applied
    /// as-is). A convenience for callers that only ever handle one zone, such
    /// as [`crate::composite::CompositeIndex`]'s single-zone tests; multi-zone
    /// callers must use [`Self::restore_all`] instead so that `virtual_high`
    /// is checked for agreement and `virtual_low` is reconciled to the
    /// maximum observed across zones, per SPEC_FULL.md §4.2.
    pub fn restore_zone<R: Read>(&mut self, zone: u32, reader: &mut R) -> Result<()> {
        log::debug!("restoring dense volume index zone {zone}");
        let header = self.restore_zone_header(zone, reader)?;
        let (low, high) = (header.virtual_low, header.virtual_high);
        self.finish_restore_zone(zone, reader, &header, low, high)
    }

    /// Restores every zone from `readers` (one reader per zone, in zone
    /// order), reconciling state across all of them the way the original
    /// implementation's restore loop does: every zone stream's
    /// `virtual_high` must agree exactly, and the reconciled `virtual_low`
    /// applied to every zone is the maximum `virtual_low` observed across all
    /// zone streams, not each zone's own value.
    pub fn restore_all<R: Read>(&mut self, readers: &mut [R]) -> Result<()> {
        log::debug!("restoring dense volume index ({} zones)", readers.len());

        let mut headers = Vec::with_capacity(readers.len());
        for (zone, reader) in readers.iter_mut().enumerate() {
            headers.push(self.restore_zone_header(zone as u32, reader)?);
        }

        let virtual_high = headers[0].virtual_high;
        for (zone, header) in headers.iter().enumerate() {
            if header.virtual_high != virtual_high {
                return Err(Error::CorruptData(format!(
                    "inconsistent volume index zone streams: chapter range is [.., {virtual_high}], zone {zone} has high {}",
                    header.virtual_high,
                )));
            }
        }
        let virtual_low = headers.iter().map(|h| h.virtual_low).max().unwrap_or(0);

        for (zone, (reader, header)) in readers.iter_mut().zip(headers.iter()).enumerate() {
            self.finish_restore_zone(zone as u32, reader, header, virtual_low, virtual_high)?;
        }

        Ok(())
    }

    #[must_use]
    pub fn volume_nonce(&self) -> u64 {
        self.volume_nonce
    }

    #[must_use]
    pub fn params(&self) -> &DenseParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;

    fn small_config(zones: u32) -> Config {
        Config::new(Geometry::dense(16, 8), 16, zones).with_min_delta_lists(4)
    }

    fn fp_with(addr_list_bits: u64) -> Fingerprint {
        // Place the desired value in the volume-index window (last 8 bytes).
        let mut bytes = [0u8; 16];
        bytes[8..16].copy_from_slice(&addr_list_bits.to_le_bytes());
        Fingerprint::new(bytes)
    }

    fn fp_in_zone(idx: &DenseIndex, zone: u32) -> Fingerprint {
        let mut v = 0u64;
        loop {
            let fp = fp_with(v);
            if idx.zone_of(&fp) == zone {
                return fp;
            }
            v += 1;
        }
    }

    #[test]
    fn s1_put_get() {
        let mut idx = DenseIndex::new(&small_config(1), 42).unwrap();
        idx.set_open_chapter(7);

        let fp = fp_with(3); // address=3 (addr_bits small), list derived from codec
        let mut record = idx.get_record(&fp).unwrap();
        assert!(!record.is_found);

        idx.put_record(&mut record, 5).unwrap();

        let record = idx.get_record(&fp).unwrap();
        assert!(record.is_found);
        assert_eq!(record.virtual_chapter, Some(5));
    }

    #[test]
    fn s2_collision() {
        let mut idx = DenseIndex::new(&small_config(1), 42).unwrap();
        idx.set_open_chapter(7);

        // Construct two fingerprints that collide: same volume-index window
        // (same address+list) but different full bytes.
        let mut b1 = [0u8; 16];
        b1[8..16].copy_from_slice(&3u64.to_le_bytes());
        b1[0] = 0xAA;
        let fp1 = Fingerprint::new(b1);

        let mut b2 = b1;
        b2[0] = 0xBB;
        let fp2 = Fingerprint::new(b2);

        let mut r1 = idx.get_record(&fp1).unwrap();
        idx.put_record(&mut r1, 5).unwrap();

        let mut r2 = idx.get_record(&fp2).unwrap();
        idx.put_record(&mut r2, 6).unwrap();

        let r1_after = idx.get_record(&fp1).unwrap();
        let r2_after = idx.get_record(&fp2).unwrap();

        assert_eq!(r1_after.virtual_chapter, Some(5));
        assert_eq!(r2_after.virtual_chapter, Some(6));
        assert!(r1_after.is_collision);
        assert!(r2_after.is_collision);
    }

    #[test]
    fn s3_expiry() {
        let mut idx = DenseIndex::new(&small_config(1), 42).unwrap();
        idx.set_open_chapter(0);

        let fp = fp_with(3);
        let mut record = idx.get_record(&fp).unwrap();
        idx.put_record(&mut record, 0).unwrap();

        // num_chapters = 8 (chapters_per_volume=8) => opening chapter 9
        // advances low to max(0, 9-8+1) = 2.
        idx.set_open_chapter(9);

        let record = idx.get_record(&fp).unwrap();
        assert!(!record.is_found);
    }

    #[test]
    fn s4_backward_reset() {
        let mut idx = DenseIndex::new(&small_config(1), 42).unwrap();
        idx.set_open_chapter(10);
        idx.set_zone_open_chapter(0, 4);

        let state = idx.zone_state(0);
        assert_eq!(state.virtual_low, 4);
        assert_eq!(state.virtual_high, 4);
    }

    #[test]
    fn no_zone_exceeds_budget_after_many_inserts() {
        let mut idx = DenseIndex::new(&small_config(1), 1).unwrap();
        idx.set_open_chapter(0);
        for i in 0..64 {
            let fp = fp_with(i);
            let mut r = idx.get_record(&fp).unwrap();
            let _ = idx.put_record(&mut r, 0);
        }
        let used = idx.delta.bits_used_in_zone(0, idx.bits_per_entry());
        assert!(used <= idx.params.max_zone_bits);
    }

    #[test]
    fn early_flush_count_never_decreases() {
        let mut idx = DenseIndex::new(&small_config(1), 1).unwrap();
        idx.set_open_chapter(0);
        let mut last = 0u64;
        for chapter in 0..40 {
            for i in 0..20u64 {
                let fp = fp_with(chapter * 100 + i);
                let mut r = idx.get_record(&fp).unwrap();
                let _ = idx.put_record(&mut r, chapter);
            }
            idx.set_open_chapter(chapter + 1);
            let current = idx.zone_state(0).early_flush_count;
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn forward_jump_past_high_collapses_to_v_v() {
        // Case 5: new_low computed from v lands past the zone's current
        // high, so the window doesn't overlap the old range at all.
        let mut idx = DenseIndex::new(&small_config(1), 42).unwrap();
        idx.set_open_chapter(10);

        let state = idx.zone_state(0);
        assert_eq!(state.virtual_low, 10);
        assert_eq!(state.virtual_high, 10);
    }

    #[test]
    fn zones_hold_independent_records() {
        let mut idx = DenseIndex::new(&small_config(4), 42).unwrap();
        idx.set_open_chapter(3);

        let fps: Vec<_> = (0..4).map(|z| fp_in_zone(&idx, z)).collect();
        for fp in &fps {
            let mut r = idx.get_record(fp).unwrap();
            idx.put_record(&mut r, 3).unwrap();
        }

        for (zone, fp) in fps.iter().enumerate() {
            assert_eq!(idx.zone_of(fp), zone as u32);
            assert_eq!(idx.get_record(fp).unwrap().virtual_chapter, Some(3));
        }

        // Resetting zone 0 alone must not disturb the other zones' records.
        idx.set_zone_open_chapter(0, 0);
        assert!(!idx.get_record(&fps[0]).unwrap().is_found);
        for fp in &fps[1..] {
            assert!(idx.get_record(fp).unwrap().is_found);
        }
    }

    #[test]
    fn restore_all_reconciles_virtual_low_to_max_across_zones() {
        let mut idx = DenseIndex::new(&small_config(2), 42).unwrap();

        idx.set_zone_open_chapter(0, 7);
        idx.set_zone_open_chapter(1, 100);
        idx.set_zone_open_chapter(1, 7);

        assert_eq!(idx.zone_state(0).virtual_low, 0);
        assert_eq!(idx.zone_state(0).virtual_high, 7);
        assert_eq!(idx.zone_state(1).virtual_low, 7);
        assert_eq!(idx.zone_state(1).virtual_high, 7);

        let mut bufs: Vec<Vec<u8>> = (0..2).map(|_| Vec::new()).collect();
        for zone in 0..2u32 {
            idx.save_zone(zone, &mut bufs[zone as usize]).unwrap();
        }

        let mut restored = DenseIndex::new(&small_config(2), 42).unwrap();
        let mut readers: Vec<&[u8]> = bufs.iter().map(|b| b.as_slice()).collect();
        restored.restore_all(&mut readers).unwrap();

        // Both zones reconcile to low=7 (the max across streams), even
        // though zone 0's own stream said 0.
        assert_eq!(restored.zone_state(0).virtual_low, 7);
        assert_eq!(restored.zone_state(1).virtual_low, 7);
        assert_eq!(restored.zone_state(0).virtual_high, 7);
        assert_eq!(restored.zone_state(1).virtual_high, 7);
    }

    #[test]
    fn restore_all_rejects_inconsistent_virtual_high_across_zones() {
        let mut idx = DenseIndex::new(&small_config(2), 42).unwrap();
        idx.set_zone_open_chapter(0, 7);
        idx.set_zone_open_chapter(1, 9);

        let mut bufs: Vec<Vec<u8>> = (0..2).map(|_| Vec::new()).collect();
        for zone in 0..2u32 {
            idx.save_zone(zone, &mut bufs[zone as usize]).unwrap();
        }

        let mut restored = DenseIndex::new(&small_config(2), 42).unwrap();
        let mut readers: Vec<&[u8]> = bufs.iter().map(|b| b.as_slice()).collect();
        let err = restored.restore_all(&mut readers).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }
}
