// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// 128-bit opaque identifier for a content block (a "chunk name").
///
/// Two disjoint 8-byte windows of the fingerprint are read by the codec:
/// the last 8 bytes feed [`Fingerprint::volume_index_bits`] (address + list),
/// the first 8 bytes feed [`Fingerprint::sampling_bits`] (the sample predicate).
/// These windows are part of the on-disk contract and must never move.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    #[must_use]
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The 8-byte window used to derive address and delta-list number.
    #[must_use]
    pub fn volume_index_bits(&self) -> u64 {
        LittleEndian::read_u64(&self.0[8..16])
    }

    /// The 8-byte window used to derive the sample predicate input.
    #[must_use]
    pub fn sampling_bits(&self) -> u64 {
        LittleEndian::read_u64(&self.0[0..8])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl From<[u8; 16]> for Fingerprint {
    fn from(value: [u8; 16]) -> Self {
        Self(value)
    }
}

impl From<u128> for Fingerprint {
    fn from(value: u128) -> Self {
        Self(value.to_le_bytes())
    }
}

/// Extracts the address, delta-list number and sample-bits fields from a
/// fingerprint according to a fixed geometry.
///
/// The codec is deterministic: the same `(fingerprint, address_bits, num_lists,
/// sample_rate)` tuple always yields the same triple, independent of any mutable
/// index state.
#[derive(Copy, Clone, Debug)]
pub struct FingerprintCodec {
    address_bits: u32,
    address_mask: u64,
    num_lists: u32,
}

impl FingerprintCodec {
    /// `address_bits` must be `<= 31` (enforced by [`crate::config::Geometry`]
    /// at construction, not here, since the codec itself has no way to fail).
    #[must_use]
    pub fn new(address_bits: u32, num_lists: u32) -> Self {
        debug_assert!(address_bits <= 31);
        debug_assert!(num_lists > 0);
        Self {
            address_bits,
            address_mask: (1u64 << address_bits) - 1,
            num_lists,
        }
    }

    #[must_use]
    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    #[must_use]
    pub fn num_lists(&self) -> u32 {
        self.num_lists
    }

    /// The address within the fingerprint's delta list (the low `address_bits`
    /// bits of the volume-index window).
    #[must_use]
    pub fn address(&self, fp: &Fingerprint) -> u32 {
        (fp.volume_index_bits() & self.address_mask) as u32
    }

    /// The delta-list number the fingerprint is addressed to.
    #[must_use]
    pub fn list(&self, fp: &Fingerprint) -> u32 {
        ((fp.volume_index_bits() >> self.address_bits) % u64::from(self.num_lists)) as u32
    }

    /// Both `(address, list)` in one pass over the fingerprint.
    #[must_use]
    pub fn address_and_list(&self, fp: &Fingerprint) -> (u32, u32) {
        (self.address(fp), self.list(fp))
    }

    /// Sample predicate input used only by the composite index.
    #[must_use]
    pub fn is_sample(fp: &Fingerprint, sample_rate: u32) -> bool {
        sample_rate != 0 && fp.sampling_bits() % u64::from(sample_rate) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_windows_are_disjoint() {
        let fp = Fingerprint::from(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10u128);
        // sampling reads bytes [0..8), volume-index reads bytes [8..16)
        assert_ne!(fp.sampling_bits(), fp.volume_index_bits());
    }

    #[test]
    fn codec_is_deterministic() {
        let codec = FingerprintCodec::new(4, 4);
        let fp = Fingerprint::from(0xdead_beef_u128);

        let a1 = codec.address(&fp);
        let l1 = codec.list(&fp);
        let a2 = codec.address(&fp);
        let l2 = codec.list(&fp);

        assert_eq!(a1, a2);
        assert_eq!(l1, l2);
    }

    #[test]
    fn address_fits_in_mask() {
        let codec = FingerprintCodec::new(4, 4);
        for i in 0u128..1000 {
            let fp = Fingerprint::from(i.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            assert!(codec.address(&fp) < 16);
            assert!(codec.list(&fp) < 4);
        }
    }

    #[test]
    fn sample_predicate() {
        assert!(FingerprintCodec::is_sample(&Fingerprint::from(0u128), 4));
        assert!(FingerprintCodec::is_sample(&Fingerprint::from(8u128), 4));
        assert!(!FingerprintCodec::is_sample(&Fingerprint::from(1u128), 4));
    }
}
