// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `CompositeIndex` (V6): wraps a `non_hook` and a `hook` [`DenseIndex`] and
//! dispatches every call on [`FingerprintCodec::is_sample`], so that a single
//! sparse-sample rate can be tuned independently of the dense geometry. See
//! SPEC_FULL.md §4.3.

use crate::config::{Config, SplitConfig};
use crate::dense::{DenseIndex, DenseStats};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FingerprintCodec};
use crate::record::Record;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::sync::Mutex;

const MAGIC_6: &[u8; 8] = b"MI6-0001";

/// Per-zone mutex guarding the `hook` sub-index. Only the hook side needs
/// one: non-hook operations are single-threaded per zone by construction
/// (one worker owns its zone), while `hook` may additionally be touched by
/// the routing thread's `lookup_name` calls (SPEC_FULL.md §5).
pub struct CompositeIndex {
    non_hook: DenseIndex,
    hook: DenseIndex,
    hook_locks: Vec<Mutex<()>>,
    sparse_sample_rate: u32,
}

impl CompositeIndex {
    pub fn new(config: &Config, volume_nonce: u64) -> Result<Self> {
        config.validate()?;
        let split = SplitConfig::from_config(config)?;

        let non_hook = DenseIndex::new(&split.non_hook, volume_nonce)?;
        let hook = DenseIndex::new(&split.hook, volume_nonce)?;
        let hook_locks = (0..hook.num_zones()).map(|_| Mutex::new(())).collect();

        Ok(Self {
            non_hook,
            hook,
            hook_locks,
            sparse_sample_rate: config.sparse_sample_rate,
        })
    }

    #[must_use]
    pub fn num_zones(&self) -> u32 {
        self.non_hook.num_zones()
    }

    pub fn set_tag(&mut self, tag: u8) {
        self.non_hook.set_tag(tag);
        self.hook.set_tag(tag);
    }

    #[must_use]
    pub fn is_sample(&self, fp: &Fingerprint) -> bool {
        FingerprintCodec::is_sample(fp, self.sparse_sample_rate)
    }

    #[must_use]
    pub fn zone_of(&self, fp: &Fingerprint) -> u32 {
        if self.is_sample(fp) {
            self.hook.zone_of(fp)
        } else {
            self.non_hook.zone_of(fp)
        }
    }

    fn hook_zone_lock(&self, zone: u32) -> std::sync::MutexGuard<'_, ()> {
        self.hook_locks[zone as usize]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn get_record(&mut self, fp: &Fingerprint) -> Result<Record> {
        if self.is_sample(fp) {
            let zone = self.hook.zone_of(fp);
            let _guard = self.hook_zone_lock(zone);
            let mut record = self.hook.get_record(fp)?;
            record.via_hook = true;
            Ok(record)
        } else {
            self.non_hook.get_record(fp)
        }
    }

    pub fn put_record(&mut self, record: &mut Record, virtual_chapter: u64) -> Result<()> {
        if record.via_hook {
            let _guard = self.hook_zone_lock(record.zone);
            self.hook.put_record(record, virtual_chapter)
        } else {
            self.non_hook.put_record(record, virtual_chapter)
        }
    }

    pub fn set_record_chapter(&mut self, record: &mut Record, virtual_chapter: u64) -> Result<()> {
        if record.via_hook {
            let _guard = self.hook_zone_lock(record.zone);
            self.hook.set_record_chapter(record, virtual_chapter)
        } else {
            self.non_hook.set_record_chapter(record, virtual_chapter)
        }
    }

    pub fn remove_record(&mut self, record: &mut Record) -> Result<()> {
        if record.via_hook {
            let _guard = self.hook_zone_lock(record.zone);
            self.hook.remove_record(record)
        } else {
            self.non_hook.remove_record(record)
        }
    }

    /// Routing-thread entry point: `NONE` immediately for non-sampled
    /// fingerprints, otherwise a locked, read-only lookup against `hook`.
    #[must_use]
    pub fn lookup_name(&self, fp: &Fingerprint) -> Option<u64> {
        if !self.is_sample(fp) {
            return None;
        }
        let zone = self.hook.zone_of(fp);
        let _guard = self.hook_zone_lock(zone);
        self.hook.lookup_sampled(fp)
    }

    /// Read-only lookup against whichever sub-index the fingerprint is
    /// addressed to; used by the façade's `lookup_sampled`.
    #[must_use]
    pub fn lookup_sampled(&self, fp: &Fingerprint) -> Option<u64> {
        if self.is_sample(fp) {
            let zone = self.hook.zone_of(fp);
            let _guard = self.hook_zone_lock(zone);
            self.hook.lookup_sampled(fp)
        } else {
            self.non_hook.lookup_sampled(fp)
        }
    }

    pub fn set_zone_open_chapter(&mut self, zone: u32, v: u64) {
        self.non_hook.set_zone_open_chapter(zone, v);
        let _guard = self.hook_zone_lock(zone);
        self.hook.set_zone_open_chapter(zone, v);
    }

    pub fn set_open_chapter(&mut self, v: u64) {
        for zone in 0..self.num_zones() {
            self.set_zone_open_chapter(zone, v);
        }
    }

    #[must_use]
    pub fn stats(&self) -> (DenseStats, DenseStats) {
        (self.non_hook.stats(), self.hook.stats())
    }

    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.non_hook.memory_used() + self.hook.memory_used()
    }

    pub fn save_zone<W: Write>(&self, zone: u32, writer: &mut W) -> Result<()> {
        log::debug!("saving composite volume index zone {zone}");

        writer.write_all(MAGIC_6)?;
        writer.write_u32::<LittleEndian>(self.sparse_sample_rate)?;
        self.non_hook.save_zone(zone, writer)?;
        self.hook.save_zone(zone, writer)?;
        Ok(())
    }

    pub fn restore_zone<R: Read>(&mut self, zone: u32, reader: &mut R) -> Result<()> {
        log::debug!("restoring composite volume index zone {zone}");

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC_6 {
            return Err(Error::CorruptData(format!(
                "bad vi006 magic: {:?}",
                String::from_utf8_lossy(&magic),
            )));
        }

        let rate = reader.read_u32::<LittleEndian>()?;
        if rate != self.sparse_sample_rate {
            return Err(Error::CorruptData(format!(
                "sparse sample rate mismatch: expected {}, got {rate}",
                self.sparse_sample_rate,
            )));
        }

        self.non_hook.restore_zone(zone, reader)?;
        self.hook.restore_zone(zone, reader)?;

        Ok(())
    }

    /// Restores every zone from `readers`, reconciling `virtual_low`/
    /// `virtual_high` across zones independently for each sub-index (see
    /// [`DenseIndex::restore_all`]). Each reader's bytes are the vi006
    /// header, then the full `non_hook` vi005 stream, then the full `hook`
    /// vi005 stream, so the `non_hook` and `hook` header/payload passes each
    /// leave every reader positioned exactly where the next pass needs it.
    pub fn restore_all<R: Read>(&mut self, readers: &mut [R]) -> Result<()> {
        log::debug!("restoring composite volume index ({} zones)", readers.len());

        for reader in readers.iter_mut() {
            let mut magic = [0u8; 8];
            reader.read_exact(&mut magic)?;
            if &magic != MAGIC_6 {
                return Err(Error::CorruptData(format!(
                    "bad vi006 magic: {:?}",
                    String::from_utf8_lossy(&magic),
                )));
            }

            let rate = reader.read_u32::<LittleEndian>()?;
            if rate != self.sparse_sample_rate {
                return Err(Error::CorruptData(format!(
                    "sparse sample rate mismatch: expected {}, got {rate}",
                    self.sparse_sample_rate,
                )));
            }
        }

        self.non_hook.restore_all(readers)?;
        self.hook.restore_all(readers)?;

        Ok(())
    }

    #[must_use]
    pub fn volume_nonce(&self) -> u64 {
        self.non_hook.volume_nonce()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;
    use test_log::test;

    fn composite_config() -> Config {
        Config::new(Geometry::dense(16, 8).with_sparse_chapters(2), 16, 1)
            .with_sparse_sample_rate(4)
            .with_min_delta_lists(4)
    }

    fn sample_fp(sampling_bits: u64, volume_index_bits: u64) -> Fingerprint {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&sampling_bits.to_le_bytes());
        bytes[8..16].copy_from_slice(&volume_index_bits.to_le_bytes());
        Fingerprint::new(bytes)
    }

    #[test]
    fn s6_composite_routing() {
        let mut idx = CompositeIndex::new(&composite_config(), 7).unwrap();
        idx.set_open_chapter(3);

        let sampled = sample_fp(8, 1); // 8 % 4 == 0
        let non_sampled = sample_fp(1, 1); // 1 % 4 != 0

        assert!(idx.is_sample(&sampled));
        assert!(!idx.is_sample(&non_sampled));

        let mut r = idx.get_record(&non_sampled).unwrap();
        idx.put_record(&mut r, 3).unwrap();
        // non_hook mutation must never surface through lookup_name.
        assert_eq!(idx.lookup_name(&non_sampled), None);

        let mut r = idx.get_record(&sampled).unwrap();
        idx.put_record(&mut r, 3).unwrap();
        assert_eq!(idx.lookup_name(&sampled), Some(3));
    }

    #[test]
    fn non_hook_and_hook_stats_are_independent() {
        let mut idx = CompositeIndex::new(&composite_config(), 7).unwrap();
        idx.set_open_chapter(0);

        let sampled = sample_fp(4, 1);
        let non_sampled = sample_fp(1, 2);

        let mut r = idx.get_record(&sampled).unwrap();
        idx.put_record(&mut r, 0).unwrap();
        let mut r = idx.get_record(&non_sampled).unwrap();
        idx.put_record(&mut r, 0).unwrap();

        let (dense, sparse) = idx.stats();
        assert_eq!(dense.record_count, 1);
        assert_eq!(sparse.record_count, 1);
    }

    fn multi_zone_config() -> Config {
        Config::new(Geometry::dense(16, 8).with_sparse_chapters(2), 16, 4)
            .with_sparse_sample_rate(4)
            .with_min_delta_lists(16)
    }

    /// Scans `volume_index_bits` upward for a fingerprint that both samples
    /// into `hook` (fixing `sampling_bits=0` so `is_sample` is unconditionally
    /// true regardless of the configured rate) and lands in `zone`.
    fn sampled_fp_in_zone(idx: &CompositeIndex, zone: u32) -> Fingerprint {
        let mut vib = 0u64;
        loop {
            let fp = sample_fp(0, vib);
            if idx.zone_of(&fp) == zone {
                return fp;
            }
            vib += 1;
        }
    }

    #[test]
    fn concurrent_lookup_name_across_zones_is_thread_safe() {
        let config = multi_zone_config();
        let mut idx = CompositeIndex::new(&config, 7).unwrap();
        idx.set_open_chapter(3);

        let num_zones = idx.num_zones();
        assert!(num_zones > 1, "test requires a multi-zone config");

        let mut fps = Vec::new();
        for zone in 0..num_zones {
            let fp = sampled_fp_in_zone(&idx, zone);
            let mut r = idx.get_record(&fp).unwrap();
            idx.put_record(&mut r, 3).unwrap();
            fps.push(fp);
        }

        // Every zone's hook_locks entry gets hammered from its own thread at
        // once; this would deadlock or panic on a poisoned/misindexed mutex.
        std::thread::scope(|scope| {
            for fp in &fps {
                scope.spawn(|| {
                    for _ in 0..50 {
                        assert_eq!(idx.lookup_name(fp), Some(3));
                    }
                });
            }
        });
    }

    #[test]
    fn save_restore_round_trip() {
        let mut idx = CompositeIndex::new(&composite_config(), 99).unwrap();
        idx.set_open_chapter(3);

        let sampled = sample_fp(8, 11);
        let non_sampled = sample_fp(1, 12);

        let mut r = idx.get_record(&sampled).unwrap();
        idx.put_record(&mut r, 3).unwrap();
        let mut r = idx.get_record(&non_sampled).unwrap();
        idx.put_record(&mut r, 3).unwrap();

        let mut buf = Vec::new();
        idx.save_zone(0, &mut buf).unwrap();

        let mut restored = CompositeIndex::new(&composite_config(), 99).unwrap();
        restored.restore_zone(0, &mut &buf[..]).unwrap();

        assert_eq!(restored.lookup_name(&sampled), Some(3));
        assert_eq!(restored.lookup_sampled(&non_sampled), Some(3));
    }
}
