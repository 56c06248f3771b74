//! Managed call interceptor
//!
//! `install` swaps an overload's dispatch for a shim that traces the call
//! and forwards to the pristine original. Per invocation the shim:
//!
//! 1. renders the caller's arguments and (optionally) rewrites them
//! 2. emits `enter`, then a stack snapshot if requested
//! 3. forwards the rewritten arguments to the original
//! 4. on a fault, emits `fault` and re-raises it unchanged
//! 5. otherwise optionally rewrites the result, emits `exit`, returns it
//!
//! Shims keep no state across invocations. The only per-thread state is
//! the forwarding set below, which makes a recursive call into a shim that
//! is already forwarding on this thread go straight to the original. The
//! set holds shim ids rather than overload keys: an overload with the same
//! key in another runtime is a different shim and is traced.

use crate::emitter::{Emitter, TraceEvent};
use crate::error::{Fault, HookError};
use crate::runtime::{HostRuntime, Implementation, Invocation, OverloadHandle, Value};
use crate::stack;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Rewrites the argument list before forwarding
pub type ArgsTransform = Arc<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// Rewrites the result before it reaches the caller
pub type RetTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Per-hook options
#[derive(Clone, Default)]
pub struct HookSpec {
    /// Emit a managed stack snapshot on entry
    pub backtrace: bool,
    pub inject_args: Option<ArgsTransform>,
    pub inject_ret: Option<RetTransform>,
}

impl HookSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backtrace(mut self, backtrace: bool) -> Self {
        self.backtrace = backtrace;
        self
    }

    pub fn with_inject_args<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    {
        self.inject_args = Some(Arc::new(f));
        self
    }

    pub fn with_inject_ret<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.inject_ret = Some(Arc::new(f));
        self
    }

    /// Same spec without argument/result rewriting
    pub fn trace_only(&self) -> Self {
        Self {
            backtrace: self.backtrace,
            inject_args: None,
            inject_ret: None,
        }
    }
}

impl fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSpec")
            .field("backtrace", &self.backtrace)
            .field("inject_args", &self.inject_args.is_some())
            .field("inject_ret", &self.inject_ret.is_some())
            .finish()
    }
}

/// An installed shim bound to one overload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveHook {
    pub overload: OverloadHandle,
    /// Tag carried by every event of this hook
    pub path: String,
}

/// Process-unique shim ids
static NEXT_SHIM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static FORWARDING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

fn is_forwarding(shim_id: u64) -> bool {
    FORWARDING
        .try_with(|f| f.borrow().contains(&shim_id))
        .unwrap_or(false)
}

/// Marks a shim as forwarding on this thread until dropped
struct ForwardGuard;

impl ForwardGuard {
    fn enter(shim_id: u64) -> Self {
        FORWARDING.with(|f| f.borrow_mut().push(shim_id));
        ForwardGuard
    }
}

impl Drop for ForwardGuard {
    fn drop(&mut self) {
        let _ = FORWARDING.try_with(|f| f.borrow_mut().pop());
    }
}

fn render(values: &[Value]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Build the instrumented body wrapping `original`
fn make_shim(
    original: Implementation,
    path: &str,
    spec: &HookSpec,
    stack_source: Arc<dyn HostRuntime>,
    emitter: Emitter,
) -> Implementation {
    let shim_id = NEXT_SHIM_ID.fetch_add(1, Ordering::Relaxed);
    let path = path.to_string();
    let spec = spec.clone();

    Arc::new(move |inv: &Invocation<'_>| -> Result<Value, Fault> {
        if is_forwarding(shim_id) {
            return original(inv);
        }

        let args = render(inv.args);
        let (forwarded, rewritten) = match &spec.inject_args {
            Some(inject) => {
                let forwarded = inject(inv.args.to_vec());
                let rewritten = render(&forwarded);
                (forwarded, Some(rewritten))
            }
            None => (inv.args.to_vec(), None),
        };

        emitter.emit(&TraceEvent::Enter {
            path: path.clone(),
            args,
            rewritten,
        });

        if spec.backtrace {
            emitter.emit(&TraceEvent::Backtrace {
                path: path.clone(),
                stack: stack::capture(&*stack_source),
            });
        }

        let started = Instant::now();
        let outcome = {
            let _guard = ForwardGuard::enter(shim_id);
            original(&inv.with_args(&forwarded))
        };
        tracing::trace!(
            path = %path,
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = outcome.is_ok(),
            "forwarded call"
        );

        let ret = match outcome {
            Ok(ret) => ret,
            Err(fault) => {
                emitter.emit(&TraceEvent::Fault {
                    path: path.clone(),
                    fault: fault.to_string(),
                });
                return Err(fault);
            }
        };

        match &spec.inject_ret {
            Some(inject) => {
                let result = ret.to_string();
                let ret = inject(ret);
                emitter.emit(&TraceEvent::Exit {
                    path: path.clone(),
                    result,
                    rewritten: Some(ret.to_string()),
                });
                Ok(ret)
            }
            None => {
                emitter.emit(&TraceEvent::Exit {
                    path: path.clone(),
                    result: ret.to_string(),
                    rewritten: None,
                });
                Ok(ret)
            }
        }
    })
}

/// Install a tracing shim on one overload
///
/// Re-installing on the same overload replaces the previous shim; the new
/// shim always wraps the original body, never the old shim.
pub fn install(
    runtime: &Arc<dyn HostRuntime>,
    emitter: &Emitter,
    overload: &OverloadHandle,
    path: &str,
    spec: &HookSpec,
) -> Result<ActiveHook, HookError> {
    let original = runtime.original_implementation(overload)?;
    let shim = make_shim(original, path, spec, Arc::clone(runtime), emitter.clone());
    runtime.replace_implementation(overload, shim)?;

    tracing::debug!(overload = %overload, path, ?spec, "installed hook");

    Ok(ActiveHook {
        overload: overload.clone(),
        path: path.to_string(),
    })
}
