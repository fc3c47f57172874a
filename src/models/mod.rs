//! Data models for extractd.
//!
//! Requests flow in, outcomes flow out; everything in between is built from
//! these types.

mod deadline;
mod facts;
mod outcome;
mod request;
mod tier;

pub use deadline::Deadline;
pub use facts::{CASUAL_INTENT, EmotionalState, EventKind, EventStatus, Facts, MemoryEvent};
pub use outcome::{DegradedReason, ErrorKind, ExtractionOutcome};
pub use request::{CONVERSATION_CONTEXT_KEY, Priority, Request, RequestKind};
pub use tier::Tier;
