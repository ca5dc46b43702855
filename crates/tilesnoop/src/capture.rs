//! Tile capture: reassembles scattered byte writes into complete blocks.
//! Single-buffered; a write into a different block abandons the partial one.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CaptureConfig;
use crate::fingerprint::StreamByte;

/// One write event on the snooped bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEvent {
    /// Target address
    pub address: u32,
    /// Byte written
    pub data: u8,
    /// Write strobe; events with the strobe low are ignored
    #[serde(default = "strobe_high")]
    pub write_enable: bool,
}

fn strobe_high() -> bool {
    true
}

impl WriteEvent {
    /// A write with the strobe asserted.
    pub fn write(address: u32, data: u8) -> Self {
        Self {
            address,
            data,
            write_enable: true,
        }
    }
}

/// Where the capture buffer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing buffered
    Idle,
    /// Accumulating bytes for `index`; `present` is the offset bitmap
    Capturing {
        /// Block index being captured
        index: u32,
        /// Bit `i` set once offset `i` has been written
        present: u64,
    },
    /// Emitting the completed block, `next` is the offset sent on the next tick
    Streaming {
        /// Block index being streamed
        index: u32,
        /// Next offset to emit
        next: usize,
    },
}

/// What a single tick did with its write event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No event, or write strobe low
    NoWrite,
    /// Address outside the monitored window
    OutsideWindow,
    /// Byte stored into the capture buffer
    Stored {
        /// Block index the byte belongs to
        index: u32,
        /// This write opened a new capture
        started: bool,
        /// Partial block abandoned to make room for this one
        discarded: Option<u32>,
        /// This write completed the block
        completed: bool,
    },
    /// In-window write arrived while the buffer was streaming
    DroppedWhileStreaming {
        /// Block index the write was aimed at
        index: u32,
        /// First write to this block index during the current stream,
        /// i.e. a capture that never got to start
        new_block: bool,
    },
}

/// Result of one capture tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTick {
    /// Byte handed to the fingerprint stage this tick
    pub stream: Option<StreamByte>,
    /// Disposition of this tick's write event
    pub outcome: WriteOutcome,
}

/// Single-buffered block reassembler.
pub struct TileCapture {
    config: CaptureConfig,
    full_mask: u64,
    buf: Vec<u8>,
    state: CaptureState,
    // Last block index whose writes were dropped during the current stream
    dropping: Option<u32>,
}

impl TileCapture {
    /// Create a capture stage for the given window and block size.
    pub fn new(config: CaptureConfig) -> Self {
        let n = config.block_size;
        let full_mask = if n >= 64 { u64::MAX } else { (1u64 << n) - 1 };
        Self {
            buf: vec![0u8; n],
            full_mask,
            config,
            state: CaptureState::Idle,
            dropping: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Block size in bytes
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Advance one tick: emit the next streamed byte if any, then accept
    /// the write event. Never stalls the writer.
    pub fn tick(&mut self, event: Option<WriteEvent>) -> CaptureTick {
        let stream = self.stream_next();
        let streaming = stream.is_some();

        let outcome = match event {
            Some(ev) if ev.write_enable => {
                if !self.config.contains(ev.address) {
                    WriteOutcome::OutsideWindow
                } else if streaming {
                    self.drop_write(ev.address)
                } else {
                    self.store(ev.address, ev.data)
                }
            }
            _ => WriteOutcome::NoWrite,
        };

        CaptureTick { stream, outcome }
    }

    fn stream_next(&mut self) -> Option<StreamByte> {
        let CaptureState::Streaming { index, next } = self.state else {
            return None;
        };
        let last = next + 1 == self.config.block_size;
        let byte = self.buf[next];
        self.state = if last {
            debug!(index, "block streamed");
            CaptureState::Idle
        } else {
            CaptureState::Streaming {
                index,
                next: next + 1,
            }
        };
        Some(StreamByte { byte, last })
    }

    fn drop_write(&mut self, address: u32) -> WriteOutcome {
        let index = address / self.config.block_size as u32;
        let new_block = self.dropping != Some(index);
        if new_block {
            debug!(index, "capture lost, buffer busy streaming");
            self.dropping = Some(index);
        }
        WriteOutcome::DroppedWhileStreaming { index, new_block }
    }

    fn store(&mut self, address: u32, data: u8) -> WriteOutcome {
        let n = self.config.block_size as u32;
        let index = address / n;
        let offset = (address % n) as usize;

        let (mut present, started, discarded) = match self.state {
            CaptureState::Capturing {
                index: current,
                present,
            } if current == index => (present, false, None),
            CaptureState::Capturing {
                index: current,
                present,
            } => {
                debug!(
                    discarded = current,
                    filled = present.count_ones(),
                    next = index,
                    "partial block discarded"
                );
                (0, true, Some(current))
            }
            _ => (0, true, None),
        };
        if started {
            self.buf.fill(0);
            debug!(index, "capture started");
        }

        self.buf[offset] = data;
        present |= 1u64 << offset;

        let completed = present == self.full_mask;
        self.state = if completed {
            debug!(index, "block complete");
            self.dropping = None;
            CaptureState::Streaming { index, next: 0 }
        } else {
            CaptureState::Capturing { index, present }
        };

        WriteOutcome::Stored {
            index,
            started,
            discarded,
            completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_window() -> CaptureConfig {
        CaptureConfig {
            window_start: 0,
            window_end: 0xFFFF,
            block_size: 16,
        }
    }

    fn drain(capture: &mut TileCapture) -> Vec<StreamByte> {
        let mut out = Vec::new();
        while let Some(b) = capture.tick(None).stream {
            out.push(b);
        }
        out
    }

    #[test]
    fn sequential_block_streams_in_order() {
        let mut capture = TileCapture::new(open_window());
        for i in 0..16u32 {
            let tick = capture.tick(Some(WriteEvent::write(i, i as u8)));
            assert!(tick.stream.is_none());
        }
        assert_eq!(capture.state(), CaptureState::Streaming { index: 0, next: 0 });

        let out = drain(&mut capture);
        assert_eq!(out.len(), 16);
        for (i, b) in out.iter().enumerate() {
            assert_eq!(b.byte, i as u8);
            assert_eq!(b.last, i == 15);
        }
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn out_of_order_writes_stream_in_offset_order() {
        let mut capture = TileCapture::new(open_window());
        for i in (0..16u32).rev() {
            capture.tick(Some(WriteEvent::write(0x40 + i, 0xA0 + i as u8)));
        }
        let bytes: Vec<u8> = drain(&mut capture).iter().map(|b| b.byte).collect();
        let expected: Vec<u8> = (0..16).map(|i| 0xA0 + i).collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn repeated_writes_do_not_complete_block() {
        let mut capture = TileCapture::new(open_window());
        for _ in 0..32 {
            let tick = capture.tick(Some(WriteEvent::write(0x10, 0x11)));
            assert!(matches!(tick.outcome, WriteOutcome::Stored { completed: false, .. }));
        }
        assert!(matches!(
            capture.state(),
            CaptureState::Capturing { index: 1, present: 1 }
        ));
        assert!(drain(&mut capture).is_empty());
    }

    #[test]
    fn rewrite_keeps_latest_value() {
        let mut capture = TileCapture::new(open_window());
        capture.tick(Some(WriteEvent::write(0, 0x01)));
        capture.tick(Some(WriteEvent::write(0, 0x02)));
        for i in 1..16u32 {
            capture.tick(Some(WriteEvent::write(i, 0)));
        }
        assert_eq!(drain(&mut capture)[0].byte, 0x02);
    }

    #[test]
    fn switching_block_discards_partial() {
        let mut capture = TileCapture::new(open_window());
        for i in 0..8u32 {
            capture.tick(Some(WriteEvent::write(5 * 16 + i, 0xEE)));
        }
        let tick = capture.tick(Some(WriteEvent::write(6 * 16, 0x01)));
        assert_eq!(
            tick.outcome,
            WriteOutcome::Stored {
                index: 6,
                started: true,
                discarded: Some(5),
                completed: false,
            }
        );
        assert_eq!(
            capture.state(),
            CaptureState::Capturing { index: 6, present: 1 }
        );
    }

    #[test]
    fn returning_to_block_starts_over() {
        let mut capture = TileCapture::new(open_window());
        for i in 0..15u32 {
            capture.tick(Some(WriteEvent::write(i, 0)));
        }
        capture.tick(Some(WriteEvent::write(16, 0)));
        // Only offset 15 of block 0 written since the restart
        let tick = capture.tick(Some(WriteEvent::write(15, 0)));
        assert!(matches!(
            tick.outcome,
            WriteOutcome::Stored { index: 0, started: true, completed: false, .. }
        ));
    }

    #[test]
    fn outside_window_ignored() {
        let mut capture = TileCapture::new(CaptureConfig::default());
        let tick = capture.tick(Some(WriteEvent::write(0x7FFF, 0x12)));
        assert_eq!(tick.outcome, WriteOutcome::OutsideWindow);
        let tick = capture.tick(Some(WriteEvent::write(0x9800, 0x12)));
        assert_eq!(tick.outcome, WriteOutcome::OutsideWindow);
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn strobe_low_ignored() {
        let mut capture = TileCapture::new(open_window());
        let tick = capture.tick(Some(WriteEvent {
            address: 0,
            data: 1,
            write_enable: false,
        }));
        assert_eq!(tick.outcome, WriteOutcome::NoWrite);
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn writes_during_streaming_are_dropped() {
        let mut capture = TileCapture::new(open_window());
        for i in 0..16u32 {
            capture.tick(Some(WriteEvent::write(i, 0)));
        }
        let mut dropped = 0;
        for i in 0..16u32 {
            let tick = capture.tick(Some(WriteEvent::write(32 + i, 0)));
            assert!(tick.stream.is_some());
            if let WriteOutcome::DroppedWhileStreaming { index, new_block } = tick.outcome {
                assert_eq!(index, 2);
                assert_eq!(new_block, i == 0);
                dropped += 1;
            }
        }
        assert_eq!(dropped, 16);
        assert_eq!(capture.state(), CaptureState::Idle);
        // The next write is accepted and opens a fresh capture
        let tick = capture.tick(Some(WriteEvent::write(48, 0)));
        assert!(matches!(
            tick.outcome,
            WriteOutcome::Stored { index: 3, started: true, discarded: None, .. }
        ));
    }

    #[test]
    fn each_block_lost_while_streaming_is_flagged_once() {
        let mut capture = TileCapture::new(open_window());
        for i in 0..16u32 {
            capture.tick(Some(WriteEvent::write(i, 0)));
        }
        let writes = [0x20, 0x21, 0x30, 0x22, 0x31];
        let flags: Vec<(u32, bool)> = writes
            .iter()
            .map(|&a| match capture.tick(Some(WriteEvent::write(a, 0))).outcome {
                WriteOutcome::DroppedWhileStreaming { index, new_block } => (index, new_block),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            flags,
            vec![(2, true), (2, false), (3, true), (2, true), (3, true)]
        );

        // A fresh stream starts with a clean slate
        drain(&mut capture);
        for i in 0..16u32 {
            capture.tick(Some(WriteEvent::write(0x40 + i, 0)));
        }
        let tick = capture.tick(Some(WriteEvent::write(0x31, 0)));
        assert_eq!(
            tick.outcome,
            WriteOutcome::DroppedWhileStreaming {
                index: 3,
                new_block: true
            }
        );
    }

    #[test]
    fn window_base_need_not_be_block_aligned() {
        let mut capture = TileCapture::new(CaptureConfig {
            window_start: 0x0104,
            window_end: 0x01FF,
            block_size: 16,
        });
        // Offsets 0..3 of block 0x10 are outside the window, so it never completes
        for a in 0x0100..0x0110u32 {
            capture.tick(Some(WriteEvent::write(a, 0)));
        }
        assert!(drain(&mut capture).is_empty());
    }

    #[test]
    fn full_width_bitmap() {
        let mut capture = TileCapture::new(CaptureConfig {
            window_start: 0,
            window_end: 0xFFFF,
            block_size: 64,
        });
        for i in 0..64u32 {
            capture.tick(Some(WriteEvent::write(i, i as u8)));
        }
        assert_eq!(drain(&mut capture).len(), 64);
    }

    proptest! {
        #[test]
        fn prop_never_streams_incomplete_block(
            writes in prop::collection::vec((0u32..64, any::<u8>()), 0..200)
        ) {
            let mut capture = TileCapture::new(open_window());
            let mut present = std::collections::HashMap::<u32, u64>::new();
            let mut current: Option<u32> = None;
            for (addr, data) in writes {
                let tick = capture.tick(Some(WriteEvent::write(addr, data)));
                if let WriteOutcome::Stored { index, started, completed, .. } = tick.outcome {
                    if started {
                        present.clear();
                    }
                    current = Some(index);
                    let bits = present.entry(index).or_insert(0);
                    *bits |= 1u64 << (addr % 16);
                    prop_assert_eq!(completed, *bits == 0xFFFF);
                    if completed {
                        present.clear();
                    }
                }
                // Never more than one block tracked at once
                prop_assert!(present.len() <= 1);
                if let CaptureState::Capturing { index, .. } = capture.state() {
                    prop_assert_eq!(Some(index), current);
                }
            }
        }

        #[test]
        fn prop_streamed_block_has_exactly_block_size_bytes(order in Just((0u32..16).collect::<Vec<_>>()).prop_shuffle()) {
            let mut capture = TileCapture::new(open_window());
            for off in &order {
                capture.tick(Some(WriteEvent::write(0x20 + off, *off as u8)));
            }
            let out = drain(&mut capture);
            prop_assert_eq!(out.len(), 16);
            prop_assert_eq!(out.iter().filter(|b| b.last).count(), 1);
            prop_assert!(out[15].last);
        }
    }
}
