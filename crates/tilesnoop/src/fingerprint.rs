//! Block fingerprinting: CRC-16 (poly 0x1021, init 0xFFFF, MSB-first, no
//! reflection, no final XOR) with one-byte-per-tick and eight-bytes-per-tick
//! streaming hashers.

use serde::{Deserialize, Serialize};

/// Accumulator value at the start of every sequence.
pub const CRC16_INIT: u16 = 0xFFFF;

/// Generator polynomial x^16 + x^12 + x^5 + 1.
pub const CRC16_POLY: u16 = 0x1021;

/// Bytes consumed per tick by [`WideHasher`].
pub const WIDE_LANES: usize = 8;

/// A 16-bit digest of a block's bytes in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u16);

impl Fingerprint {
    /// Raw digest value
    #[inline]
    pub fn value(self) -> u16 {
        self.0
    }

    /// The low `bits` bits, used as a bucket or bit address.
    #[inline]
    pub fn low_bits(self, bits: u32) -> usize {
        (self.0 as usize) & ((1usize << bits) - 1)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl From<u16> for Fingerprint {
    fn from(value: u16) -> Self {
        Fingerprint(value)
    }
}

/// Generates the MSB-first CRC-16 lookup table at compile time.
const fn make_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC16_TABLE: [u16; 256] = make_crc16_table();

/// Advance the accumulator by one byte.
#[inline]
pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    let idx = ((crc >> 8) as u8 ^ byte) as usize;
    (crc << 8) ^ CRC16_TABLE[idx]
}

/// Fingerprint of a complete byte sequence.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    Fingerprint(data.iter().fold(CRC16_INIT, |crc, &b| crc16_update(crc, b)))
}

/// One item of the completed-block byte stream. `None` on a tick means
/// the byte-valid strobe is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamByte {
    /// Byte value
    pub byte: u8,
    /// Final byte of the sequence
    pub last: bool,
}

/// One-byte-per-tick streaming hasher.
///
/// The digest of a sequence is reported on the tick after its `last` byte
/// was consumed. The accumulator resets on that same `last` tick, so the
/// next sequence may start immediately.
#[derive(Debug)]
pub struct SerialHasher {
    crc: u16,
    in_sequence: bool,
    ready: Option<Fingerprint>,
}

impl Default for SerialHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialHasher {
    /// Create a hasher with a fresh accumulator.
    pub fn new() -> Self {
        Self {
            crc: CRC16_INIT,
            in_sequence: false,
            ready: None,
        }
    }

    /// Advance one tick. Returns the digest latched on the previous tick.
    pub fn tick(&mut self, input: Option<StreamByte>) -> Option<Fingerprint> {
        let out = self.ready.take();
        if let Some(item) = input {
            self.crc = crc16_update(self.crc, item.byte);
            self.in_sequence = !item.last;
            if item.last {
                self.ready = Some(Fingerprint(self.crc));
                self.crc = CRC16_INIT;
            }
        }
        out
    }

    /// Current accumulator value
    pub fn accumulator(&self) -> u16 {
        self.crc
    }

    /// No partial sequence and no digest waiting to be reported.
    pub fn is_idle(&self) -> bool {
        !self.in_sequence && self.ready.is_none()
    }
}

/// One word of the wide stream: eight bytes in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideWord {
    /// Bytes, lowest address first
    pub bytes: [u8; WIDE_LANES],
    /// Final word of the sequence
    pub last: bool,
}

/// Eight-bytes-per-tick hasher. A 16-byte block takes two ticks and yields
/// the same digest as [`SerialHasher`].
#[derive(Debug)]
pub struct WideHasher {
    crc: u16,
    ready: Option<Fingerprint>,
}

impl Default for WideHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl WideHasher {
    /// Create a hasher with a fresh accumulator.
    pub fn new() -> Self {
        Self {
            crc: CRC16_INIT,
            ready: None,
        }
    }

    /// Advance one tick. Returns the digest latched on the previous tick.
    pub fn tick(&mut self, input: Option<WideWord>) -> Option<Fingerprint> {
        let out = self.ready.take();
        if let Some(word) = input {
            let mut crc = self.crc;
            for &b in &word.bytes {
                crc = crc16_update(crc, b);
            }
            self.crc = crc;
            if word.last {
                self.ready = Some(Fingerprint(self.crc));
                self.crc = CRC16_INIT;
            }
        }
        out
    }

    /// Split a block into wide words. The block length must be a multiple
    /// of [`WIDE_LANES`]; a trailing partial word is returned as `None`.
    pub fn words(block: &[u8]) -> Option<Vec<WideWord>> {
        if block.is_empty() || block.len() % WIDE_LANES != 0 {
            return None;
        }
        let n = block.len() / WIDE_LANES;
        Some(
            block
                .chunks_exact(WIDE_LANES)
                .enumerate()
                .map(|(i, chunk)| {
                    let mut bytes = [0u8; WIDE_LANES];
                    bytes.copy_from_slice(chunk);
                    WideWord {
                        bytes,
                        last: i + 1 == n,
                    }
                })
                .collect(),
        )
    }
}
