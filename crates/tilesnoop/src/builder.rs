//! Dictionary images and load plans.
//!
//! A [`DictionaryImage`] is the host-side list of known tiles. The
//! [`DictionaryBuilder`] places each record with the same bucket rule the
//! lookup uses and turns the result into a [`LoadPlan`] of raw filter-bit
//! and slot loads. Records that would not fit in their chain are reported
//! as overflow here, at load time, instead of vanishing at lookup time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::SnoopConfig;
use crate::dictionary::{DictionaryEntry, DictionaryIndex, Payload};
use crate::error::{Result, SnoopError};
use crate::filter::MembershipFilter;
use crate::fingerprint::{fingerprint, Fingerprint};

/// One record of a dictionary image. Keyed either by a precomputed
/// fingerprint or by the raw tile bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Precomputed fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<u16>,
    /// Raw tile bytes; fingerprinted on load when `fingerprint` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile: Option<Vec<u8>>,
    /// Replacement character code
    pub character_code: u8,
    /// Pointer into the translation table
    pub translation_pointer: u16,
}

impl ImageRecord {
    /// Resolve the record's key.
    pub fn key(&self) -> Result<Fingerprint> {
        match (self.fingerprint, &self.tile) {
            (Some(fp), _) => Ok(Fingerprint(fp)),
            (None, Some(tile)) => Ok(fingerprint(tile)),
            (None, None) => Err(SnoopError::Parse(
                "record has neither fingerprint nor tile".to_string(),
            )),
        }
    }

    /// Resolve the record's key for blocks of `block_size` bytes. A tile
    /// must be exactly one block long, and a record carrying both keys
    /// must have them agree.
    pub fn checked_key(&self, block_size: usize) -> Result<Fingerprint> {
        let Some(tile) = &self.tile else {
            return self.key();
        };
        if tile.len() != block_size {
            return Err(SnoopError::Parse(format!(
                "tile is {} bytes, block size is {}",
                tile.len(),
                block_size
            )));
        }
        let computed = fingerprint(tile);
        match self.fingerprint {
            Some(given) if given != computed.value() => Err(SnoopError::Parse(format!(
                "fingerprint {:04x} does not match tile fingerprint {}",
                given, computed
            ))),
            _ => Ok(computed),
        }
    }

    /// Payload carried by the record.
    pub fn payload(&self) -> Payload {
        Payload {
            character_code: self.character_code,
            translation_pointer: self.translation_pointer,
        }
    }
}

/// Serialized dictionary as shipped to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryImage {
    /// Records in priority order; earlier records claim chain slots first
    pub records: Vec<ImageRecord>,
}

impl DictionaryImage {
    /// Parse a JSON image.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SnoopError::Parse(e.to_string()))
    }

    /// Read and parse a JSON image file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// A record that could not be placed because its chain was full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOverflow {
    /// Fingerprint left unreachable
    pub fingerprint: Fingerprint,
    /// Bucket whose chain was full
    pub bucket: usize,
}

/// Raw loads that populate a pipeline's memories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    /// Filter bit loads: (bit index, value)
    pub filter_loads: Vec<(usize, bool)>,
    /// Slot loads: (slot address, entry)
    pub entry_loads: Vec<(usize, DictionaryEntry)>,
    /// Records left out because their chain was full
    pub overflows: Vec<ChainOverflow>,
}

impl LoadPlan {
    /// Records that made it into a chain.
    pub fn placed(&self) -> usize {
        self.entry_loads.len()
    }

    /// True when every record was placed.
    pub fn is_complete(&self) -> bool {
        self.overflows.is_empty()
    }
}

/// Places dictionary records into chains for a given geometry.
pub struct DictionaryBuilder {
    block_size: usize,
    filter: MembershipFilter,
    index: DictionaryIndex,
    seen: HashSet<Fingerprint>,
    plan: LoadPlan,
}

impl DictionaryBuilder {
    /// Builder for the filter and dictionary geometry of `config`.
    /// Rejects a configuration the pipeline itself would reject.
    pub fn new(config: &SnoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            block_size: config.capture.block_size,
            filter: MembershipFilter::new(&config.filter),
            index: DictionaryIndex::new(&config.dictionary),
            seen: HashSet::new(),
            plan: LoadPlan::default(),
        })
    }

    /// Place one fingerprint. Returns the slot address it was given, or
    /// `None` if its chain was already full (recorded as overflow).
    pub fn add(&mut self, fp: Fingerprint, payload: Payload) -> Result<Option<usize>> {
        if !self.seen.insert(fp) {
            return Err(SnoopError::DuplicateFingerprint(fp.value()));
        }

        let bucket = self.index.bucket_of(fp);
        let depth = self.index.chain_len(bucket);
        if depth == self.index.chain_depth() {
            warn!(fingerprint = %fp, bucket, "chain full, entry will be unreachable");
            self.plan.overflows.push(ChainOverflow {
                fingerprint: fp,
                bucket,
            });
            return Ok(None);
        }

        let address = self.index.slot_address(bucket, depth);
        let entry = DictionaryEntry::new(fp, payload);
        self.index.load(address, entry)?;
        self.plan.entry_loads.push((address, entry));

        for bit in self.filter.bit_addresses(fp) {
            if !self.filter.get(bit) {
                self.filter.load(bit, true)?;
                self.plan.filter_loads.push((bit, true));
            }
        }
        debug!(fingerprint = %fp, bucket, slot = depth, "entry placed");
        Ok(Some(address))
    }

    /// Place every record of an image, in order.
    pub fn add_image(&mut self, image: &DictionaryImage) -> Result<()> {
        for record in &image.records {
            self.add(record.checked_key(self.block_size)?, record.payload())?;
        }
        Ok(())
    }

    /// Expected filter false-positive rate for what has been placed.
    pub fn expected_false_positive_rate(&self) -> f64 {
        self.filter
            .expected_false_positive_rate(self.plan.entry_loads.len())
    }

    /// Finish and return the load plan.
    pub fn build(self) -> LoadPlan {
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DictionaryConfig;

    fn config(bucket_bits: u32, chain_depth: usize) -> SnoopConfig {
        SnoopConfig {
            dictionary: DictionaryConfig {
                bucket_bits,
                chain_depth,
            },
            ..Default::default()
        }
    }

    fn payload(c: u8) -> Payload {
        Payload {
            character_code: c,
            translation_pointer: c as u16 * 2,
        }
    }

    #[test]
    fn places_in_chain_order() {
        let mut b = DictionaryBuilder::new(&config(4, 4)).unwrap();
        assert_eq!(b.add(Fingerprint(0x0013), payload(1)).unwrap(), Some(12));
        assert_eq!(b.add(Fingerprint(0x0023), payload(2)).unwrap(), Some(13));
        assert_eq!(b.add(Fingerprint(0x0004), payload(3)).unwrap(), Some(16));
        let plan = b.build();
        assert_eq!(plan.placed(), 3);
        assert!(plan.is_complete());
    }

    #[test]
    fn filter_loads_are_deduplicated() {
        let mut b = DictionaryBuilder::new(&config(12, 4)).unwrap();
        b.add(Fingerprint(0xABAB), payload(1)).unwrap();
        let plan = b.build();
        // 0xABAB byte-swaps to itself
        assert_eq!(plan.filter_loads.len(), 2);
    }

    #[test]
    fn overflow_reported() {
        let mut b = DictionaryBuilder::new(&config(4, 2)).unwrap();
        b.add(Fingerprint(0x0015), payload(1)).unwrap();
        b.add(Fingerprint(0x0025), payload(2)).unwrap();
        assert_eq!(b.add(Fingerprint(0x0035), payload(3)).unwrap(), None);
        let plan = b.build();
        assert_eq!(plan.placed(), 2);
        assert_eq!(
            plan.overflows,
            vec![ChainOverflow {
                fingerprint: Fingerprint(0x0035),
                bucket: 5
            }]
        );
        assert!(!plan.is_complete());
    }

    #[test]
    fn duplicate_rejected() {
        let mut b = DictionaryBuilder::new(&config(4, 4)).unwrap();
        b.add(Fingerprint(7), payload(1)).unwrap();
        assert!(matches!(
            b.add(Fingerprint(7), payload(2)),
            Err(SnoopError::DuplicateFingerprint(7))
        ));
    }

    #[test]
    fn image_from_json_with_tile_keys() {
        let json = r#"{
            "records": [
                { "fingerprint": 4660, "character_code": 65, "translation_pointer": 256 },
                { "tile": [0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15],
                  "character_code": 66, "translation_pointer": 257 }
            ]
        }"#;
        let image = DictionaryImage::from_json(json).unwrap();
        assert_eq!(image.records.len(), 2);
        assert_eq!(image.records[0].key().unwrap(), Fingerprint(0x1234));
        assert_eq!(image.records[1].key().unwrap(), Fingerprint(0x3B37));

        let mut b = DictionaryBuilder::new(&SnoopConfig::default()).unwrap();
        b.add_image(&image).unwrap();
        assert!(b.expected_false_positive_rate() > 0.0);
        assert_eq!(b.build().placed(), 2);
    }

    #[test]
    fn record_without_key_rejected() {
        let record = ImageRecord {
            fingerprint: None,
            tile: None,
            character_code: 0,
            translation_pointer: 0,
        };
        assert!(matches!(record.key(), Err(SnoopError::Parse(_))));
    }

    fn tile_record(tile: Vec<u8>, fingerprint: Option<u16>) -> ImageRecord {
        ImageRecord {
            fingerprint,
            tile: Some(tile),
            character_code: 1,
            translation_pointer: 2,
        }
    }

    #[test]
    fn tile_of_wrong_length_rejected() {
        let mut b = DictionaryBuilder::new(&SnoopConfig::default()).unwrap();
        let image = DictionaryImage {
            records: vec![tile_record(vec![0; 8], None)],
        };
        assert!(matches!(b.add_image(&image), Err(SnoopError::Parse(_))));
        assert_eq!(b.build().placed(), 0);
    }

    #[test]
    fn fingerprint_disagreeing_with_tile_rejected() {
        let sequential: Vec<u8> = (0..16).collect();
        let record = tile_record(sequential.clone(), Some(0x1234));
        assert!(matches!(record.checked_key(16), Err(SnoopError::Parse(_))));

        let agreeing = tile_record(sequential, Some(0x3B37));
        assert_eq!(agreeing.checked_key(16).unwrap(), Fingerprint(0x3B37));
    }

    #[test]
    fn fingerprint_only_record_skips_tile_checks() {
        let record = ImageRecord {
            fingerprint: Some(0x0042),
            tile: None,
            character_code: 0,
            translation_pointer: 0,
        };
        assert_eq!(record.checked_key(16).unwrap(), Fingerprint(0x0042));
    }

    #[test]
    fn invalid_geometry_rejected() {
        let mut zero_filter = SnoopConfig::default();
        zero_filter.filter.bits = 0;
        assert!(matches!(
            DictionaryBuilder::new(&zero_filter),
            Err(SnoopError::InvalidConfig(_))
        ));

        assert!(matches!(
            DictionaryBuilder::new(&config(4, 0)),
            Err(SnoopError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            DictionaryImage::from_json("{ not json"),
            Err(SnoopError::Parse(_))
        ));
    }
}
