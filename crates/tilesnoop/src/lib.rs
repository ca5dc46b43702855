#![warn(missing_docs)]

//! tilesnoop: recognizes known graphics tiles as they are written to video memory.
//!
//! Detect path: Write → Capture (tile window) → Fingerprint (CRC-16) → Filter (3-hash) → Chain scan → Result
//! Load path:   Image → Builder (bucket placement) → LoadPlan → filter bits + dictionary slots

pub mod builder;
pub mod capture;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dictionary;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod handoff;
pub mod metrics;
pub mod pipeline;

pub use builder::{ChainOverflow, DictionaryBuilder, DictionaryImage, ImageRecord, LoadPlan};
pub use capture::{CaptureState, TileCapture, WriteEvent, WriteOutcome};
pub use config::{CaptureConfig, DictionaryConfig, FilterConfig, SnoopConfig};
pub use coordinator::{Completion, LookupCoordinator, LookupOutcome, LookupResult, LookupState};
pub use dictionary::{ChainProbe, DictionaryEntry, DictionaryIndex, Payload, SlotCheck};
pub use error::SnoopError;
pub use filter::MembershipFilter;
pub use fingerprint::{fingerprint, Fingerprint, SerialHasher, StreamByte, WideHasher, WideWord};
pub use handoff::{Delivery, Received, ResultPublisher, ResultSubscriber};
pub use metrics::{MetricKind, MetricValue, MetricsHandle, MetricsSnapshot, SnoopMetric, SnoopMetrics};
pub use pipeline::{PipelineTick, SnoopPipeline};
