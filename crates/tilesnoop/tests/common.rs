//! Common fixtures for tilesnoop integration tests.
#![allow(dead_code)]

use tilesnoop::{
    CaptureConfig, Completion, DictionaryEntry, DictionaryIndex, Fingerprint, LookupCoordinator,
    MembershipFilter, Payload, PipelineTick, SnoopConfig, SnoopPipeline, WriteEvent,
};

/// Default geometry with every address inside the window.
pub fn open_config() -> SnoopConfig {
    SnoopConfig {
        capture: CaptureConfig {
            window_start: 0,
            window_end: 0xFFFF,
            block_size: 16,
        },
        ..Default::default()
    }
}

pub fn pipeline() -> SnoopPipeline {
    SnoopPipeline::new(open_config()).unwrap()
}

pub fn payload(character_code: u8, translation_pointer: u16) -> Payload {
    Payload {
        character_code,
        translation_pointer,
    }
}

/// Write `data` to consecutive offsets of block `index`, one byte per tick.
pub fn write_block(p: &mut SnoopPipeline, index: u32, data: &[u8]) -> Vec<PipelineTick> {
    let base = index * p.config().capture.block_size as u32;
    data.iter()
        .enumerate()
        .map(|(i, &b)| p.tick(Some(WriteEvent::write(base + i as u32, b))))
        .collect()
}

/// Run `n` idle ticks and return every tick record.
pub fn idle(p: &mut SnoopPipeline, n: usize) -> Vec<PipelineTick> {
    (0..n).map(|_| p.tick(None)).collect()
}

/// Set the three filter bits of `fp` through the load interface.
pub fn load_filter(p: &mut SnoopPipeline, fp: Fingerprint) {
    let bits = p.filter().bit_addresses(fp);
    for bit in bits {
        p.load_filter_bit(bit, true).unwrap();
    }
}

/// Load `fp` into a slot and set its filter bits.
pub fn load(p: &mut SnoopPipeline, fp: Fingerprint, address: usize, payload: Payload) {
    load_filter(p, fp);
    p.load_entry(address, DictionaryEntry::new(fp, payload))
        .unwrap();
}

/// Drive a standalone coordinator over the given memories until it reports.
pub fn lookup(filter: &MembershipFilter, index: &DictionaryIndex, fp: Fingerprint) -> Completion {
    let mut coordinator = LookupCoordinator::new();
    let mut input = Some(fp);
    for _ in 0..64 {
        if let Some(done) = coordinator.tick(input.take(), filter, index).completion {
            return done;
        }
    }
    panic!("lookup for {} never completed", fp);
}
