//! Exact dictionary index: fingerprint -> payload through fixed-depth
//! collision chains. Buckets are chosen by the low fingerprint bits.

use serde::{Deserialize, Serialize};

use crate::config::DictionaryConfig;
use crate::error::{Result, SnoopError};
use crate::fingerprint::Fingerprint;

/// Width of a packed entry on the load interface.
pub const ENTRY_BITS: u32 = 41;

const VALID_SHIFT: u32 = 40;
const FINGERPRINT_SHIFT: u32 = 24;
const CHARACTER_SHIFT: u32 = 16;

/// What a match hands to the substitution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    /// Replacement character code
    pub character_code: u8,
    /// Pointer into the translation table
    pub translation_pointer: u16,
}

/// One chain slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DictionaryEntry {
    /// Slot holds an entry; an invalid slot ends the chain
    pub valid: bool,
    /// Fingerprint this slot answers for
    pub fingerprint: u16,
    /// Replacement character code
    pub character_code: u8,
    /// Pointer into the translation table
    pub translation_pointer: u16,
}

impl DictionaryEntry {
    /// A valid entry for `fp` carrying `payload`.
    pub fn new(fp: Fingerprint, payload: Payload) -> Self {
        Self {
            valid: true,
            fingerprint: fp.value(),
            character_code: payload.character_code,
            translation_pointer: payload.translation_pointer,
        }
    }

    /// Payload carried by this slot.
    pub fn payload(&self) -> Payload {
        Payload {
            character_code: self.character_code,
            translation_pointer: self.translation_pointer,
        }
    }

    /// True if this slot answers for `fp`.
    #[inline]
    pub fn matches(&self, fp: Fingerprint) -> bool {
        self.valid && self.fingerprint == fp.value()
    }

    /// Pack as valid(1) | fingerprint(16) | character(8) | pointer(16),
    /// most-significant field first.
    pub fn pack(&self) -> u64 {
        ((self.valid as u64) << VALID_SHIFT)
            | ((self.fingerprint as u64) << FINGERPRINT_SHIFT)
            | ((self.character_code as u64) << CHARACTER_SHIFT)
            | self.translation_pointer as u64
    }

    /// Inverse of [`pack`](Self::pack). Rejects words wider than 41 bits.
    pub fn unpack(word: u64) -> Result<Self> {
        if word >> ENTRY_BITS != 0 {
            return Err(SnoopError::MalformedEntry(word));
        }
        Ok(Self {
            valid: (word >> VALID_SHIFT) & 1 == 1,
            fingerprint: (word >> FINGERPRINT_SHIFT) as u16,
            character_code: (word >> CHARACTER_SHIFT) as u8,
            translation_pointer: word as u16,
        })
    }
}

/// Verdict for one chain slot read during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCheck {
    /// Slot answers for the fingerprint
    Hit(Payload),
    /// Invalid slot; the chain ends here
    EndOfChain,
    /// Last slot of the chain read without a hit
    Exhausted,
    /// Valid slot for another fingerprint; scan the next slot
    Continue,
}

/// Result of a whole-chain probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainProbe {
    /// Payload of the matching slot, if any
    pub payload: Option<Payload>,
    /// Slots read before the scan stopped
    pub slots_scanned: usize,
}

/// Owned slot array for one pipeline instance.
#[derive(Debug, Clone)]
pub struct DictionaryIndex {
    slots: Vec<DictionaryEntry>,
    bucket_bits: u32,
    chain_depth: usize,
}

impl DictionaryIndex {
    /// Create an index with every slot invalid.
    pub fn new(config: &DictionaryConfig) -> Self {
        Self {
            slots: vec![DictionaryEntry::default(); config.slot_count()],
            bucket_bits: config.bucket_bits,
            chain_depth: config.chain_depth,
        }
    }

    /// Slots per bucket
    pub fn chain_depth(&self) -> usize {
        self.chain_depth
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        1usize << self.bucket_bits
    }

    /// Total slot count
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Bucket selected by a fingerprint.
    #[inline]
    pub fn bucket_of(&self, fp: Fingerprint) -> usize {
        fp.low_bits(self.bucket_bits)
    }

    /// Load-interface address of a chain slot.
    #[inline]
    pub fn slot_address(&self, bucket: usize, slot: usize) -> usize {
        bucket * self.chain_depth + slot
    }

    /// Read one chain slot; `slot` must be below the chain depth.
    #[inline]
    pub fn slot(&self, bucket: usize, slot: usize) -> &DictionaryEntry {
        &self.slots[self.slot_address(bucket, slot)]
    }

    /// Write one slot directly. Callers keep loads out of in-flight scans.
    pub fn load(&mut self, address: usize, entry: DictionaryEntry) -> Result<()> {
        let slots = self.slots.len();
        let target = self
            .slots
            .get_mut(address)
            .ok_or(SnoopError::SlotAddressOutOfRange { address, slots })?;
        *target = entry;
        Ok(())
    }

    /// Write one slot from its packed 41-bit form.
    pub fn load_packed(&mut self, address: usize, word: u64) -> Result<()> {
        self.load(address, DictionaryEntry::unpack(word)?)
    }

    /// Check slot `slot` of `bucket` against `fp`. This is the single
    /// stop rule shared by [`probe`](Self::probe) and the tick-driven scan.
    #[inline]
    pub fn check_slot(&self, bucket: usize, slot: usize, fp: Fingerprint) -> SlotCheck {
        let entry = self.slot(bucket, slot);
        if !entry.valid {
            SlotCheck::EndOfChain
        } else if entry.matches(fp) {
            SlotCheck::Hit(entry.payload())
        } else if slot + 1 == self.chain_depth {
            SlotCheck::Exhausted
        } else {
            SlotCheck::Continue
        }
    }

    /// Scan a whole chain at once, as the coordinator would over
    /// `slots_scanned` ticks.
    pub fn probe(&self, fp: Fingerprint) -> ChainProbe {
        let bucket = self.bucket_of(fp);
        let mut slot = 0;
        loop {
            let slots_scanned = slot + 1;
            match self.check_slot(bucket, slot, fp) {
                SlotCheck::Hit(payload) => {
                    return ChainProbe {
                        payload: Some(payload),
                        slots_scanned,
                    }
                }
                SlotCheck::EndOfChain | SlotCheck::Exhausted => {
                    return ChainProbe {
                        payload: None,
                        slots_scanned,
                    }
                }
                SlotCheck::Continue => slot += 1,
            }
        }
    }

    /// Valid slots in a bucket, counting from slot 0 up to the first gap.
    pub fn chain_len(&self, bucket: usize) -> usize {
        (0..self.chain_depth)
            .take_while(|&i| self.slot(bucket, i).valid)
            .count()
    }
}
