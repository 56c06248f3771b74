//! Native boundary probes
//!
//! A probe wraps calls crossing an exported native symbol with an
//! enter/leave listener pair. State for one call lives in a
//! `CallActivation` that the boundary allocates per invocation and threads
//! from `on_enter` to `on_leave` of that same call. Listeners never see
//! another call's activation, so concurrent calls on many threads cannot
//! cross-attribute their return values.
//!
//! `BoundaryTable` is the in-process boundary: hosts route calls to
//! instrumented addresses through `BoundaryTable::call`.

use crate::emitter::{Emitter, TraceEvent};
use crate::error::HookError;
use crate::stack;
use crate::symbols::{module_label, SymbolLookup};
use regex::Regex;
use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Raw register-sized arguments of one native call
#[derive(Debug, Clone, Copy)]
pub struct NativeArgs<'a> {
    raw: &'a [usize],
}

impl<'a> NativeArgs<'a> {
    /// # Safety
    /// Every argument a listener decodes as a C string must be null or
    /// point to a NUL-terminated buffer that stays valid for the call.
    pub unsafe fn from_raw(raw: &'a [usize]) -> Self {
        Self { raw }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn get(&self, n: usize) -> Option<usize> {
        self.raw.get(n).copied()
    }

    /// Decode argument `n` as a C string (lossy UTF-8)
    ///
    /// Returns `None` for a missing argument or a null pointer.
    pub fn c_string(&self, n: usize) -> Option<String> {
        let ptr = self.get(n)? as *const c_char;
        if ptr.is_null() {
            return None;
        }
        // SAFETY: upheld by the contract of `from_raw`.
        let text = unsafe { CStr::from_ptr(ptr) };
        Some(text.to_string_lossy().into_owned())
    }
}

/// Per-invocation state shared by one enter/leave pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallActivation {
    call_id: u64,
    report_retval: bool,
    entry_value: Option<String>,
}

impl CallActivation {
    pub fn new(call_id: u64) -> Self {
        Self {
            call_id,
            report_retval: false,
            entry_value: None,
        }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Request the return value to be reported on leave
    pub fn mark(&mut self) {
        self.report_retval = true;
    }

    pub fn is_marked(&self) -> bool {
        self.report_retval
    }

    pub fn entry_value(&self) -> Option<&str> {
        self.entry_value.as_deref()
    }

    pub fn set_entry_value(&mut self, value: String) {
        self.entry_value = Some(value);
    }
}

/// Enter/leave callbacks around one native symbol
pub trait BoundaryListener: Send + Sync {
    fn on_enter(&self, args: &NativeArgs<'_>, activation: &mut CallActivation);
    fn on_leave(&self, retval: isize, activation: &mut CallActivation);
}

/// Capability to wrap a native address with a listener
pub trait BoundaryAttach: Send + Sync {
    fn attach_native_boundary(
        &self,
        address: usize,
        listener: Arc<dyn BoundaryListener>,
    ) -> Result<(), HookError>;
}

/// In-process boundary: address -> listener, last writer wins
#[derive(Default)]
pub struct BoundaryTable {
    listeners: RwLock<HashMap<usize, Arc<dyn BoundaryListener>>>,
    next_call_id: AtomicU64,
}

impl BoundaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self, address: usize) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&address)
    }

    /// Run `original` as a call to `address`, notifying its listener
    ///
    /// The activation is created here, on this call's stack, and dropped
    /// when the call returns.
    ///
    /// # Safety
    /// `args` must satisfy the contract of [`NativeArgs::from_raw`] for
    /// whatever the attached listener decodes.
    pub unsafe fn call<F>(&self, address: usize, args: &[usize], original: F) -> isize
    where
        F: FnOnce(&[usize]) -> isize,
    {
        let listener = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&address)
            .cloned();

        let Some(listener) = listener else {
            return original(args);
        };

        let mut activation = CallActivation::new(self.next_call_id.fetch_add(1, Ordering::Relaxed));
        // SAFETY: forwarded from this function's contract.
        let native_args = unsafe { NativeArgs::from_raw(args) };
        listener.on_enter(&native_args, &mut activation);
        let retval = original(args);
        listener.on_leave(retval, &mut activation);
        retval
    }
}

impl BoundaryAttach for BoundaryTable {
    fn attach_native_boundary(
        &self,
        address: usize,
        listener: Arc<dyn BoundaryListener>,
    ) -> Result<(), HookError> {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address, listener);
        Ok(())
    }
}

/// Probe options
#[derive(Debug, Clone, Default)]
pub struct NativeProbeSpec {
    /// Argument decoded as a C string on entry
    pub arg_index: usize,
    /// Report the return value only when the decoded argument matches;
    /// every call is reported when unset
    pub report_when: Option<Regex>,
    /// Emit a native stack snapshot on entry
    pub backtrace: bool,
}

impl NativeProbeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg_index(mut self, arg_index: usize) -> Self {
        self.arg_index = arg_index;
        self
    }

    /// Compile `pattern` as the report condition
    pub fn with_report_when(mut self, pattern: &str) -> Result<Self, HookError> {
        let re = Regex::new(pattern).map_err(|e| HookError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.report_when = Some(re);
        Ok(self)
    }

    pub fn with_backtrace(mut self, backtrace: bool) -> Self {
        self.backtrace = backtrace;
        self
    }
}

/// A probe attached to a resolved export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeProbe {
    pub module_path: String,
    pub symbol_name: String,
    pub resolved_address: usize,
}

/// Listener emitting the decoded argument and, when marked, the return value
struct ProbeListener {
    spec: NativeProbeSpec,
    emitter: Emitter,
}

impl BoundaryListener for ProbeListener {
    fn on_enter(&self, args: &NativeArgs<'_>, activation: &mut CallActivation) {
        let value = args
            .c_string(self.spec.arg_index)
            .unwrap_or_else(|| "<null>".to_string());

        self.emitter.emit(&TraceEvent::NativeEnter {
            call_id: activation.call_id(),
            value: value.clone(),
        });

        if self.spec.backtrace {
            self.emitter.emit(&TraceEvent::NativeBacktrace {
                call_id: activation.call_id(),
                stack: stack::capture_native(),
            });
        }

        let report = match &self.spec.report_when {
            Some(re) => re.is_match(&value),
            None => true,
        };
        if report {
            activation.mark();
        }
        activation.set_entry_value(value);
    }

    fn on_leave(&self, retval: isize, activation: &mut CallActivation) {
        if activation.is_marked() {
            self.emitter.emit(&TraceEvent::NativeRetval {
                call_id: activation.call_id(),
                value: retval,
                entry: activation.entry_value().map(str::to_string),
            });
        }
    }
}

/// Resolve `symbol` in `module_path` and attach a probe to it
///
/// Fail-soft: on any failure a diagnostic is emitted and `None` returned.
pub fn attach(
    lookup: &dyn SymbolLookup,
    boundary: &dyn BoundaryAttach,
    emitter: &Emitter,
    module_path: &str,
    symbol: &str,
    spec: NativeProbeSpec,
) -> Option<NativeProbe> {
    let address = match lookup.find_exported_symbol(module_path, symbol) {
        Ok(address) => address,
        Err(e) => {
            emitter.diagnostic(&e);
            return None;
        }
    };

    let listener = Arc::new(ProbeListener {
        spec,
        emitter: emitter.clone(),
    });
    if let Err(e) = boundary.attach_native_boundary(address, listener) {
        emitter.diagnostic(&e);
        return None;
    }

    emitter.emit(&TraceEvent::NativeAttach {
        module: module_label(module_path),
        symbol: symbol.to_string(),
        address,
    });
    tracing::debug!(module = module_path, symbol, address, "attached native probe");

    Some(NativeProbe {
        module_path: module_path.to_string(),
        symbol_name: symbol.to_string(),
        resolved_address: address,
    })
}
