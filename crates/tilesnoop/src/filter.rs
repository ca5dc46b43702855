//! Membership pre-filter: a k=3 Bloom filter over fingerprints.
//! Answers "definitely absent" or "possibly present" before the exact
//! dictionary scan runs. Populated only through explicit bit loads.

use crate::config::FilterConfig;
use crate::error::{Result, SnoopError};
use crate::fingerprint::Fingerprint;

/// Number of bit addresses derived per fingerprint.
pub const FILTER_HASHES: usize = 3;

/// Mask XORed into the fingerprint for the third address.
pub const H3_MASK: u16 = 0x5A5A;

/// Owned bit array for one pipeline instance.
#[derive(Debug, Clone)]
pub struct MembershipFilter {
    words: Vec<u64>,
    bits: usize,
    mask: usize,
}

impl MembershipFilter {
    /// Create an all-clear filter. `config.bits` must be a power of two.
    pub fn new(config: &FilterConfig) -> Self {
        let bits = config.bits;
        Self {
            words: vec![0u64; bits.div_ceil(64)],
            bits,
            mask: bits.saturating_sub(1),
        }
    }

    /// Filter size in bits
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// The three bit addresses for a fingerprint: the value itself, its
    /// byte swap, and the value XOR 0x5A5A, each masked to the index width.
    #[inline]
    pub fn bit_addresses(&self, fp: Fingerprint) -> [usize; FILTER_HASHES] {
        let v = fp.value();
        [
            v as usize & self.mask,
            v.swap_bytes() as usize & self.mask,
            (v ^ H3_MASK) as usize & self.mask,
        ]
    }

    /// True if all three derived bits are set. Pure; the one-tick latency
    /// is accounted for by the coordinator.
    #[inline]
    pub fn test(&self, fp: Fingerprint) -> bool {
        self.bit_addresses(fp).iter().all(|&i| self.get(i))
    }

    /// Set or clear one bit. The only mutation path.
    pub fn load(&mut self, index: usize, value: bool) -> Result<()> {
        if index >= self.bits {
            return Err(SnoopError::FilterAddressOutOfRange {
                index,
                bits: self.bits,
            });
        }
        let (word, bit) = (index / 64, index % 64);
        if value {
            self.words[word] |= 1u64 << bit;
        } else {
            self.words[word] &= !(1u64 << bit);
        }
        Ok(())
    }

    /// Read one bit. Out-of-range indices read as clear.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        index < self.bits && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Number of set bits.
    pub fn population(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Fraction of bits set.
    pub fn fill_ratio(&self) -> f64 {
        self.population() as f64 / self.bits as f64
    }

    /// Expected false-positive rate after loading `entries` fingerprints:
    /// (1 - e^(-k n / m))^k.
    pub fn expected_false_positive_rate(&self, entries: usize) -> f64 {
        let k = FILTER_HASHES as f64;
        let exponent = -k * entries as f64 / self.bits as f64;
        (1.0 - exponent.exp()).powf(k)
    }
}
