//! Event sink system for observability.
//!
//! Sinks are injected into the coordinator rather than installed globally, so
//! two coordinators in one process can report to different places.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
