//! Hookline - call interception and tracing engine
//!
//! This library installs non-invasive probes on managed methods and native
//! exports and emits structured enter/exit trace events, with optional
//! argument/result rewriting and stack snapshots.
//!
//! The engine consumes its host through capability traits (`runtime`,
//! `symbols`, `native`) and writes through a `TraceSink`, so every piece
//! can be substituted in tests.

pub mod cli;
pub mod config;
pub mod emitter;
pub mod error;
pub mod hook;
pub mod managed;
pub mod monitor;
pub mod native;
pub mod runtime;
pub mod stack;
pub mod symbols;
pub mod target;

pub use error::{Fault, HookError};
pub use hook::{ActiveHook, HookSpec};
pub use monitor::Monitor;
