//! Async JDWP wire client for the flowtrace engine.
//!
//! This crate speaks the JDWP binary protocol over TCP: handshake, id-size
//! negotiation, the command subset the tracer needs (event requests, stack
//! and value inspection, method invocation), and composite event delivery.
//! It knows nothing about traces; `flowtrace-core` drives it.

mod client;
mod codec;
mod launch;
pub mod types;

pub use client::{EventModifier, JdwpClient, JdwpClientConfig};
pub use launch::LaunchedVm;
pub use types::{
    EventSet, FrameId, FrameInfo, InvokeResult, JdwpError, JdwpEvent, JdwpIdSizes, JdwpValue,
    LineTable, LineTableEntry, Location, MethodId, MethodInfo, ObjectId, ReferenceTypeId,
    ThreadId, VariableInfo,
};

// The scripted mock VM is only needed by tests. Compile it for this crate's
// own unit tests unconditionally (via `cfg(test)`), while keeping it behind
// the `wire-test-support` feature for normal builds and for downstream
// crates' integration suites.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
