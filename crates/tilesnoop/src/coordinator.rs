//! Lookup coordinator: sequences filter check and chain scan for one
//! fingerprint at a time.
//!
//! ```text
//! Idle --fp--> FilterCheck --pos--> IndexLookup --> ChainScan --match/end--> Done --> Idle
//!                   |                                                         ^
//!                   +------------------------neg------------------------------+
//! ```
//!
//! The state is a plain enum and [`step`] is a pure function of the state,
//! the tick's input and the two memories, so tests can drive it directly.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dictionary::{DictionaryIndex, Payload, SlotCheck};
use crate::filter::MembershipFilter;
use crate::fingerprint::Fingerprint;

/// Output register of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LookupResult {
    /// Dictionary hit
    pub match_found: bool,
    /// Replacement character code (zero on a miss)
    pub character_code: u8,
    /// Translation pointer (zero on a miss)
    pub translation_pointer: u16,
    /// One-tick pulse marking a fresh result
    pub done: bool,
}

impl LookupResult {
    fn hit(payload: Payload) -> Self {
        Self {
            match_found: true,
            character_code: payload.character_code,
            translation_pointer: payload.translation_pointer,
            done: true,
        }
    }

    fn miss() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    /// Payload carried by a hit.
    pub fn payload(&self) -> Option<Payload> {
        self.match_found.then_some(Payload {
            character_code: self.character_code,
            translation_pointer: self.translation_pointer,
        })
    }
}

/// Why a lookup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupOutcome {
    /// Filter said definitely absent
    FilterReject,
    /// Chain scan found the fingerprint
    Match,
    /// Scan stopped at an invalid slot
    EndOfChain,
    /// Every slot of the chain was checked
    ChainExhausted,
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    /// Waiting for a fingerprint
    Idle,
    /// Fingerprint latched; filter is read this tick
    FilterCheck {
        /// Fingerprint in flight
        fingerprint: Fingerprint,
    },
    /// Filter passed; bucket address is formed this tick
    IndexLookup {
        /// Fingerprint in flight
        fingerprint: Fingerprint,
    },
    /// Reading chain slot `slot` of `bucket`
    ChainScan {
        /// Fingerprint in flight
        fingerprint: Fingerprint,
        /// Selected bucket
        bucket: usize,
        /// Slot read this tick
        slot: usize,
    },
    /// Result is presented this tick
    Done {
        /// Final result
        result: LookupResult,
        /// Why the lookup ended
        outcome: LookupOutcome,
    },
}

impl LookupState {
    /// True when a new fingerprint would be accepted.
    pub fn is_idle(&self) -> bool {
        matches!(self, LookupState::Idle)
    }
}

/// One step of the state machine.
///
/// `input` is only consumed in `Idle`; the returned flag reports whether it
/// was accepted. A result leaves the machine on the tick spent in `Done`.
pub fn step(
    state: LookupState,
    input: Option<Fingerprint>,
    filter: &MembershipFilter,
    index: &DictionaryIndex,
) -> (LookupState, Option<(LookupResult, LookupOutcome)>, bool) {
    match state {
        LookupState::Idle => match input {
            Some(fingerprint) => (LookupState::FilterCheck { fingerprint }, None, true),
            None => (LookupState::Idle, None, false),
        },
        LookupState::FilterCheck { fingerprint } => {
            let next = if filter.test(fingerprint) {
                LookupState::IndexLookup { fingerprint }
            } else {
                LookupState::Done {
                    result: LookupResult::miss(),
                    outcome: LookupOutcome::FilterReject,
                }
            };
            (next, None, false)
        }
        LookupState::IndexLookup { fingerprint } => (
            LookupState::ChainScan {
                fingerprint,
                bucket: index.bucket_of(fingerprint),
                slot: 0,
            },
            None,
            false,
        ),
        LookupState::ChainScan {
            fingerprint,
            bucket,
            slot,
        } => {
            let next = match index.check_slot(bucket, slot, fingerprint) {
                SlotCheck::Hit(payload) => LookupState::Done {
                    result: LookupResult::hit(payload),
                    outcome: LookupOutcome::Match,
                },
                SlotCheck::EndOfChain => LookupState::Done {
                    result: LookupResult::miss(),
                    outcome: LookupOutcome::EndOfChain,
                },
                SlotCheck::Exhausted => LookupState::Done {
                    result: LookupResult::miss(),
                    outcome: LookupOutcome::ChainExhausted,
                },
                SlotCheck::Continue => LookupState::ChainScan {
                    fingerprint,
                    bucket,
                    slot: slot + 1,
                },
            };
            (next, None, false)
        }
        LookupState::Done { result, outcome } => (LookupState::Idle, Some((result, outcome)), false),
    }
}

/// Completed lookup as reported by [`LookupCoordinator::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Result register contents on the done tick
    pub result: LookupResult,
    /// Why the lookup ended
    pub outcome: LookupOutcome,
    /// Ticks from accepting the fingerprint to this result, inclusive
    pub latency: u32,
}

/// Result of one coordinator tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorTick {
    /// Set on the done pulse
    pub completion: Option<Completion>,
    /// A fingerprint arrived while a lookup was in flight and was lost
    pub overrun: Option<Fingerprint>,
}

/// Stateful wrapper around [`step`] holding the result register.
#[derive(Debug)]
pub struct LookupCoordinator {
    state: LookupState,
    register: LookupResult,
    started_at: u64,
    ticks: u64,
}

impl Default for LookupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupCoordinator {
    /// Create an idle coordinator with a cleared result register.
    pub fn new() -> Self {
        Self {
            state: LookupState::Idle,
            register: LookupResult::default(),
            started_at: 0,
            ticks: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> LookupState {
        self.state
    }

    /// Result register. `done` is only high on the tick a result lands.
    pub fn result(&self) -> LookupResult {
        self.register
    }

    /// Advance one tick. There is no backpressure: a fingerprint offered
    /// while busy is dropped and reported as an overrun.
    pub fn tick(
        &mut self,
        input: Option<Fingerprint>,
        filter: &MembershipFilter,
        index: &DictionaryIndex,
    ) -> CoordinatorTick {
        let was_idle = self.state.is_idle();
        let (next, done, accepted) = step(self.state, input, filter, index);
        self.ticks += 1;
        self.register.done = false;

        let overrun = match input {
            Some(fp) if !accepted => {
                warn!(fingerprint = %fp, state = ?self.state, "lookup overrun, fingerprint dropped");
                Some(fp)
            }
            _ => None,
        };
        if accepted && was_idle {
            self.started_at = self.ticks;
        }
        self.state = next;

        let completion = done.map(|(result, outcome)| {
            self.register = result;
            let latency = (self.ticks - self.started_at + 1) as u32;
            debug!(?outcome, matched = result.match_found, latency, "lookup done");
            Completion {
                result,
                outcome,
                latency,
            }
        });

        CoordinatorTick {
            completion,
            overrun,
        }
    }
}
