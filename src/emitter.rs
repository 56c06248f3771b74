//! Trace emitter: event rendering and the output sink
//!
//! Text rendering is byte-exact and stable:
//!
//! ```text
//! enter [pkg.Greeter.greet]: Ann #=># Bob
//! exit [pkg.Greeter.greet]: hi Bob #=># HI BOB
//! libc::open @ 0x7f3a2c0e1d20
//! /etc/hosts
//! retval: 3
//! ```
//!
//! Every event is written with a single write call so concurrent hooks
//! never interleave inside a line. Sink failures are swallowed: a broken
//! stdout must not break the instrumented call.

use crate::cli::OutputFormat;
use crate::error::HookError;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// A structured trace event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Shim entry, with the transformed arguments if `inject_args` ran
    Enter {
        path: String,
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rewritten: Option<Vec<String>>,
    },
    /// Normal return, with the transformed result if `inject_ret` ran
    Exit {
        path: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rewritten: Option<String>,
    },
    /// The original raised; the fault is re-raised after this event
    Fault { path: String, fault: String },
    /// Managed stack snapshot taken on entry
    Backtrace { path: String, stack: String },
    /// Native probe attached to a resolved export
    NativeAttach {
        module: String,
        symbol: String,
        address: usize,
    },
    /// Decoded argument of a native call
    NativeEnter { call_id: u64, value: String },
    /// Return value of a native call whose activation was marked on entry,
    /// with the argument decoded by the same call
    NativeRetval {
        call_id: u64,
        value: isize,
        #[serde(skip_serializing_if = "Option::is_none")]
        entry: Option<String>,
    },
    /// Native stack captured on entry
    NativeBacktrace { call_id: u64, stack: String },
}

/// Separator between an original value and its rewrite
pub const REWRITE_MARK: &str = " #=># ";

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Enter {
                path,
                args,
                rewritten,
            } => {
                write!(f, "enter [{}]: {}", path, args.join(", "))?;
                if let Some(rewritten) = rewritten {
                    write!(f, "{}{}", REWRITE_MARK, rewritten.join(","))?;
                }
                Ok(())
            }
            TraceEvent::Exit {
                path,
                result,
                rewritten,
            } => {
                write!(f, "exit [{}]: {}", path, result)?;
                if let Some(rewritten) = rewritten {
                    write!(f, "{}{}", REWRITE_MARK, rewritten)?;
                }
                Ok(())
            }
            TraceEvent::Fault { path, fault } => write!(f, "fault [{}]: {}", path, fault),
            TraceEvent::Backtrace { stack, .. } => f.write_str(stack),
            TraceEvent::NativeAttach {
                module,
                symbol,
                address,
            } => write!(f, "{}::{} @ {:#x}", module, symbol, address),
            TraceEvent::NativeEnter { value, .. } => f.write_str(value),
            TraceEvent::NativeRetval { value, .. } => write!(f, "retval: {}", value),
            TraceEvent::NativeBacktrace { stack, .. } => f.write_str(stack),
        }
    }
}

/// Destination for rendered lines
pub trait TraceSink: Send + Sync {
    /// Write one trace line
    fn emit(&self, line: &str);

    /// Write one diagnostic line (console error channel)
    fn diagnostic(&self, line: &str);
}

/// Traces to stdout, diagnostics to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    fn write_line(mut out: impl Write, line: &str) {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        if let Err(e) = out.write_all(buf.as_bytes()) {
            tracing::debug!("trace sink write failed: {}", e);
        }
    }
}

impl TraceSink for ConsoleSink {
    fn emit(&self, line: &str) {
        Self::write_line(std::io::stdout().lock(), line);
    }

    fn diagnostic(&self, line: &str) {
        Self::write_line(std::io::stderr().lock(), line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    diagnostics: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace lines emitted so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Diagnostic lines emitted so far
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }

    fn diagnostic(&self, line: &str) {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

/// Renders events in the configured format and hands them to the sink
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn TraceSink>,
    format: OutputFormat,
}

impl Emitter {
    pub fn new(sink: Arc<dyn TraceSink>, format: OutputFormat) -> Self {
        Self { sink, format }
    }

    /// Text emitter writing to the console
    pub fn console() -> Self {
        Self::new(Arc::new(ConsoleSink), OutputFormat::Text)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn emit(&self, event: &TraceEvent) {
        let line = match self.format {
            OutputFormat::Text => event.to_string(),
            OutputFormat::Json => match serde_json::to_string(event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::debug!("failed to serialize trace event: {}", e);
                    return;
                }
            },
        };
        self.sink.emit(&line);
    }

    /// Report a fail-soft error; the caller carries on
    pub fn diagnostic(&self, err: &HookError) {
        tracing::warn!("{}", err);
        self.sink.diagnostic(&format!("error: {}", err));
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
