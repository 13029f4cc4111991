// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::error::{Error, Result};

/// Chapter geometry of the backing volume, as seen by the volume index.
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    /// Records expected per chapter (`R`).
    pub records_per_chapter: u32,

    /// Number of chapters the dense part of the index covers (`C`).
    pub chapters_per_volume: u32,

    /// Number of chapters carried by the sparse (sampled) part of a
    /// composite index. Zero means "dense only" (V5).
    pub sparse_chapters_per_volume: u32,
}

impl Geometry {
    #[must_use]
    pub fn dense(records_per_chapter: u32, chapters_per_volume: u32) -> Self {
        Self {
            records_per_chapter,
            chapters_per_volume,
            sparse_chapters_per_volume: 0,
        }
    }

    #[must_use]
    pub fn with_sparse_chapters(mut self, sparse_chapters_per_volume: u32) -> Self {
        self.sparse_chapters_per_volume = sparse_chapters_per_volume;
        self
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.sparse_chapters_per_volume > 0
    }
}

/// Top-level volume index configuration.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub geometry: Geometry,

    /// Mean delta between successive addresses in a delta list (`M`);
    /// drives the address-bit width.
    pub mean_delta: u32,

    /// `0` disables the sparse (composite) path; a nonzero value enables it
    /// and is the divisor in the sample predicate.
    pub sparse_sample_rate: u32,

    /// Number of zones the index is sharded into.
    pub zone_count: u32,

    /// Overrides the default `zone_count^2` minimum delta-list count.
    /// `None` uses the default. Exists for tests that want to run with a
    /// small, fixed number of delta lists (see `min_volume_index_delta_lists`
    /// in the original implementation).
    pub min_delta_lists: Option<u32>,
}

impl Config {
    #[must_use]
    pub fn new(geometry: Geometry, mean_delta: u32, zone_count: u32) -> Self {
        Self {
            geometry,
            mean_delta,
            sparse_sample_rate: 0,
            zone_count,
            min_delta_lists: None,
        }
    }

    #[must_use]
    pub fn with_sparse_sample_rate(mut self, rate: u32) -> Self {
        self.sparse_sample_rate = rate;
        self
    }

    #[must_use]
    pub fn with_min_delta_lists(mut self, n: u32) -> Self {
        self.min_delta_lists = Some(n);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.geometry.records_per_chapter == 0 {
            return Err(Error::InvalidArgument("records_per_chapter is 0".into()));
        }
        if self.geometry.chapters_per_volume == 0 {
            return Err(Error::InvalidArgument("chapters_per_volume is 0".into()));
        }
        if self.mean_delta == 0 {
            return Err(Error::InvalidArgument("mean_delta is 0".into()));
        }
        if self.zone_count == 0 {
            return Err(Error::InvalidArgument("zone_count is 0".into()));
        }
        if self.geometry.is_sparse() && self.sparse_sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "sparse chapters configured but sparse_sample_rate is 0".into(),
            ));
        }
        if !self.geometry.is_sparse() && self.sparse_sample_rate != 0 {
            return Err(Error::InvalidArgument(
                "sparse_sample_rate set without sparse chapters (dense-only geometry)".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.geometry.is_sparse()
    }
}

/// Parameters derived from a [`Config`] for a single [`crate::dense::DenseIndex`].
#[derive(Copy, Clone, Debug)]
pub struct DenseParams {
    /// `L`: number of delta lists.
    pub num_lists: u32,

    /// `A`: address bits (`<= 31`).
    pub address_bits: u32,

    /// `C`: chapter bits, `index_chapter = virtual_chapter mod 2^C`.
    pub chapter_bits: u32,

    /// Number of chapters tracked.
    pub num_chapters: u32,

    /// Hard cap on delta-payload bits used by a single zone.
    pub max_zone_bits: u64,

    /// Expected bits per chapter, for a single zone (drives early-flush math).
    pub bits_per_chapter_per_zone: u64,

    /// Mean delta between successive addresses (`M`), carried through so
    /// [`crate::dense::DenseIndex`] can recompute the same per-entry bit
    /// cost [`bits_per_entry`] used to derive `bits_per_chapter_per_zone`.
    pub mean_delta: u32,
}

fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        return 0;
    }
    (u64::BITS - (n - 1).leading_zeros()) as u32
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Fixed per-entry bit cost for the internal `delta_list` stand-in: a
/// collision flag plus a chapter payload plus delta-coded address overhead
/// proportional to `log2(mean_delta)`. This is *not* the real bit-packing
/// scheme of a production delta index (that primitive is out of scope, see
/// SPEC_FULL.md §4.5) -- it only needs to produce a monotonic, believable
/// cost so the OVERFLOW / early-flush paths have something real to trip on.
pub(crate) fn bits_per_entry(chapter_bits: u32, mean_delta: u32) -> u64 {
    u64::from(chapter_bits) + 1 + u64::from(ceil_log2(u64::from(mean_delta.max(1)))) + 2
}

/// Derives [`DenseParams`] the way the original `compute_volume_index_parameters005`
/// does: from records/chapter, chapter count and mean delta, reserving slack
/// for projected growth.
pub fn derive_dense_params(
    records_per_chapter: u32,
    num_chapters: u32,
    mean_delta: u32,
    zone_count: u32,
    min_delta_lists_override: Option<u32>,
) -> Result<DenseParams> {
    let min_lists = min_delta_lists_override.unwrap_or_else(|| zone_count.saturating_mul(zone_count).max(1));

    let chapter_bits = ceil_log2(u64::from(num_chapters)).max(1);

    let projected_lists = ceil_div(
        u64::from(records_per_chapter) * u64::from(num_chapters),
        256,
    );
    let num_lists = (projected_lists.max(u64::from(min_lists))) as u32;

    let address_bits = ceil_log2(u64::from(mean_delta) * 256);
    if address_bits > 31 {
        return Err(Error::InvalidArgument(format!(
            "mean_delta {mean_delta} yields {address_bits} address bits, exceeds the 31-bit limit",
        )));
    }

    let bits_per_entry = bits_per_entry(chapter_bits, mean_delta);
    let bits_per_chapter = u64::from(records_per_chapter) * bits_per_entry;

    let total_projected_bits = bits_per_chapter * u64::from(num_chapters);
    // Reserve ~6% slack above the projected size.
    let total_allocated_bits = total_projected_bits + total_projected_bits * 6 / 100;
    // Target 5% free space out of the allocated total.
    let target_free_bits = total_allocated_bits * 5 / 100;

    let max_zone_bits = (total_allocated_bits - target_free_bits) / u64::from(zone_count);
    let bits_per_chapter_per_zone = ceil_div(bits_per_chapter, u64::from(zone_count));

    Ok(DenseParams {
        num_lists,
        address_bits,
        chapter_bits,
        num_chapters,
        max_zone_bits,
        bits_per_chapter_per_zone,
        mean_delta,
    })
}

/// The split of a [`Config`] into hook (sampled) and non-hook (dense) halves,
/// used by [`crate::composite::CompositeIndex`].
#[derive(Copy, Clone, Debug)]
pub struct SplitConfig {
    pub hook: Config,
    pub non_hook: Config,
}

impl SplitConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.sparse_sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "cannot split a config with sparse_sample_rate 0".into(),
            ));
        }

        let r = config.geometry.records_per_chapter;
        let hook_records = r / config.sparse_sample_rate;
        let non_hook_records = r - hook_records;

        let hook_geometry = Geometry::dense(hook_records.max(1), 1);
        let non_hook_geometry =
            Geometry::dense(non_hook_records.max(1), config.geometry.chapters_per_volume);

        let hook = Config::new(hook_geometry, config.mean_delta, config.zone_count)
            .with_min_delta_lists(config.min_delta_lists.unwrap_or(config.zone_count * config.zone_count));
        let non_hook = Config::new(non_hook_geometry, config.mean_delta, config.zone_count)
            .with_min_delta_lists(config.min_delta_lists.unwrap_or(config.zone_count * config.zone_count));

        Ok(Self { hook, non_hook })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_only_config_validates() {
        let config = Config::new(Geometry::dense(16, 8), 16, 1);
        assert!(config.validate().is_ok());
        assert!(!config.is_composite());
    }

    #[test]
    fn sparse_without_rate_rejected() {
        let config = Config::new(Geometry::dense(16, 8).with_sparse_chapters(4), 16, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rate_without_sparse_rejected() {
        let config = Config::new(Geometry::dense(16, 8), 16, 1).with_sparse_sample_rate(4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn too_large_mean_delta_rejected() {
        let err = derive_dense_params(16, 8, u32::MAX, 1, None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn min_lists_defaults_to_zone_count_squared() {
        let params = derive_dense_params(1, 1, 1, 4, None).unwrap();
        assert!(params.num_lists >= 16);
    }

    #[test]
    fn split_config_divides_records() {
        let config = Config::new(Geometry::dense(16, 8).with_sparse_chapters(2), 16, 1)
            .with_sparse_sample_rate(4);
        let split = SplitConfig::from_config(&config).unwrap();
        assert_eq!(split.hook.geometry.records_per_chapter, 4);
        assert_eq!(split.non_hook.geometry.records_per_chapter, 12);
    }
}
