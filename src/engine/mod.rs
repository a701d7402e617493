//! Per-call execution pipeline: prompt construction, provider fallback,
//! response post-processing.

pub mod archetype;
pub mod context;
pub mod core;

pub use archetype::Archetype;
pub use context::{ExecutionContext, ExecutionInput, Turn};
pub use core::{ExecutionCore, ExecutionOutcome, StickyProviders, StreamHandle};
