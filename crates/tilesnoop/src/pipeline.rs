//! The detection pipeline: capture → fingerprint → filter → chain scan.
//!
//! One call to [`SnoopPipeline::tick`] is one tick for every stage. The
//! pipeline is single-threaded and never blocks; results leave through the
//! return value (and optionally a [`ResultPublisher`]).

use tracing::{debug, info, instrument, warn};

use crate::builder::LoadPlan;
use crate::capture::{CaptureState, TileCapture, WriteEvent, WriteOutcome};
use crate::config::SnoopConfig;
use crate::coordinator::{Completion, LookupCoordinator, LookupOutcome, LookupResult, LookupState};
use crate::dictionary::{DictionaryEntry, DictionaryIndex, Payload};
use crate::error::Result;
use crate::filter::MembershipFilter;
use crate::fingerprint::{Fingerprint, SerialHasher};
use crate::handoff::ResultPublisher;
use crate::metrics::MetricsHandle;

/// Everything observable about one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineTick {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Fingerprint that entered the coordinator this tick
    pub fingerprint: Option<Fingerprint>,
    /// Lookup that finished this tick
    pub completion: Option<Completion>,
}

/// One independent pipeline instance with its own memories.
pub struct SnoopPipeline {
    config: SnoopConfig,
    capture: TileCapture,
    hasher: SerialHasher,
    filter: MembershipFilter,
    index: DictionaryIndex,
    coordinator: LookupCoordinator,
    metrics: MetricsHandle,
    publisher: Option<ResultPublisher>,
    ticks: u64,
}

impl SnoopPipeline {
    /// Build a pipeline with empty filter and dictionary.
    pub fn new(config: SnoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            capture: TileCapture::new(config.capture.clone()),
            hasher: SerialHasher::new(),
            filter: MembershipFilter::new(&config.filter),
            index: DictionaryIndex::new(&config.dictionary),
            coordinator: LookupCoordinator::new(),
            metrics: MetricsHandle::new(),
            publisher: None,
            ticks: 0,
            config,
        })
    }

    /// Forward every result to `publisher` as well as returning it.
    pub fn with_publisher(mut self, publisher: ResultPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Configuration this pipeline was built with
    pub fn config(&self) -> &SnoopConfig {
        &self.config
    }

    /// Shared handle to this pipeline's counters
    pub fn metrics(&self) -> MetricsHandle {
        self.metrics.clone()
    }

    /// Membership filter (read-only)
    pub fn filter(&self) -> &MembershipFilter {
        &self.filter
    }

    /// Dictionary index (read-only)
    pub fn index(&self) -> &DictionaryIndex {
        &self.index
    }

    /// Capture stage state
    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    /// Coordinator state
    pub fn lookup_state(&self) -> LookupState {
        self.coordinator.state()
    }

    /// Coordinator result register
    pub fn result(&self) -> LookupResult {
        self.coordinator.result()
    }

    /// Ticks executed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// True when nothing is buffered, hashing or being looked up.
    pub fn is_quiescent(&self) -> bool {
        matches!(self.capture.state(), CaptureState::Idle | CaptureState::Capturing { .. })
            && self.hasher.is_idle()
            && self.coordinator.state().is_idle()
    }

    /// Answer a lookup for `fp` from the loaded memories without ticking:
    /// filter test, then a whole-chain probe.
    pub fn lookup_now(&self, fp: Fingerprint) -> Option<Payload> {
        if !self.filter.test(fp) {
            return None;
        }
        self.index.probe(fp).payload
    }

    /// Advance every stage by one tick.
    pub fn tick(&mut self, event: Option<WriteEvent>) -> PipelineTick {
        self.ticks += 1;
        let metrics = self.metrics.metrics();

        let capture = self.capture.tick(event);
        match capture.outcome {
            WriteOutcome::NoWrite => {}
            WriteOutcome::OutsideWindow => metrics.record_write(false),
            WriteOutcome::DroppedWhileStreaming { new_block, .. } => {
                metrics.record_write(true);
                metrics.record_dropped_while_streaming();
                if new_block {
                    metrics.record_capture_lost();
                }
            }
            WriteOutcome::Stored {
                started,
                discarded,
                completed,
                ..
            } => {
                metrics.record_write(true);
                if discarded.is_some() {
                    metrics.record_capture_discarded();
                }
                if started {
                    metrics.record_capture_started();
                }
                if completed {
                    metrics.record_capture_completed();
                }
            }
        }

        let fingerprint = self.hasher.tick(capture.stream);
        if let Some(fp) = fingerprint {
            metrics.record_fingerprint();
            debug!(tick = self.ticks, fingerprint = %fp, "block fingerprinted");
        }

        let was_filter_check = matches!(self.coordinator.state(), LookupState::FilterCheck { .. });
        let step = self.coordinator.tick(fingerprint, &self.filter, &self.index);
        if was_filter_check {
            let rejected = matches!(
                self.coordinator.state(),
                LookupState::Done {
                    outcome: LookupOutcome::FilterReject,
                    ..
                }
            );
            metrics.record_filter(!rejected);
        }
        if step.overrun.is_some() {
            metrics.record_overrun();
        }
        if let Some(done) = step.completion {
            match done.outcome {
                LookupOutcome::Match => metrics.record_match(),
                LookupOutcome::EndOfChain => metrics.record_false_positive(false),
                LookupOutcome::ChainExhausted => metrics.record_false_positive(true),
                LookupOutcome::FilterReject => {}
            }
            metrics.record_lookup_latency(done.latency as u64);
            if let Some(publisher) = &self.publisher {
                publisher.publish(self.ticks, done.result);
            }
        }

        PipelineTick {
            tick: self.ticks,
            fingerprint,
            completion: step.completion,
        }
    }

    /// Run idle ticks until nothing is in flight, at most `limit` ticks.
    /// Returns the lookups that completed.
    pub fn drain(&mut self, limit: usize) -> Vec<Completion> {
        let mut done = Vec::new();
        for _ in 0..limit {
            if let Some(c) = self.tick(None).completion {
                done.push(c);
            }
            if self.is_quiescent() {
                break;
            }
        }
        done
    }

    fn note_hazard(&self, what: &str) {
        if !self.coordinator.state().is_idle() {
            warn!(what, state = ?self.coordinator.state(), "load while lookup in flight");
            self.metrics.metrics().record_load_hazard();
        }
    }

    /// Filter load interface: set or clear one bit.
    pub fn load_filter_bit(&mut self, index: usize, value: bool) -> Result<()> {
        self.note_hazard("filter");
        self.filter.load(index, value)
    }

    /// Dictionary load interface: write one slot.
    pub fn load_entry(&mut self, address: usize, entry: DictionaryEntry) -> Result<()> {
        self.note_hazard("dictionary");
        self.index.load(address, entry)
    }

    /// Dictionary load interface taking the packed 41-bit record.
    pub fn load_packed_entry(&mut self, address: usize, word: u64) -> Result<()> {
        self.load_entry(address, DictionaryEntry::unpack(word)?)
    }

    /// Apply a whole load plan in one maintenance window.
    #[instrument(skip(self, plan), fields(filter_loads = plan.filter_loads.len(), entry_loads = plan.entry_loads.len()))]
    pub fn apply(&mut self, plan: &LoadPlan) -> Result<()> {
        for &(index, value) in &plan.filter_loads {
            self.load_filter_bit(index, value)?;
        }
        for &(address, entry) in &plan.entry_loads {
            self.load_entry(address, entry)?;
        }
        info!(
            placed = plan.placed(),
            overflowed = plan.overflows.len(),
            filter_fill = self.filter.fill_ratio(),
            "dictionary loaded"
        );
        Ok(())
    }
}
