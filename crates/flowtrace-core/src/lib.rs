//! Debug-session tracing engine.
//!
//! Attaches to a JVM over JDWP, drives the thread of interest one source
//! line at a time, and reconstructs a parent-linked control-flow trace:
//! lines visited, functions entered and exited with rendered argument and
//! return values. The wire protocol lives in `flowtrace-jdwp`; this crate
//! owns the trace model, the event loop, and everything between.

mod correlator;
mod error;
mod render;
mod requests;

pub mod export;
pub mod scan;
pub mod scope;
pub mod session;
pub mod staging;
pub mod trace;

pub use error::{Result, SessionError};
pub use scan::{scan_sources, ScanError};
pub use scope::InstrumentationScope;
pub use session::DebugSession;
pub use staging::StagedProgram;
pub use trace::{ControlFlowEvent, EventUid, LineRef, Trace};
