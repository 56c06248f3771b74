//! Stack snapshots
//!
//! Managed snapshots come from the host's `StackSource`; native snapshots
//! walk this thread's own stack with the backtrace crate. Both are pure
//! diagnostics: they never panic and never alter control flow.

use crate::runtime::StackSource;

/// Maximum native frames rendered (prevents huge snapshots)
const MAX_NATIVE_FRAMES: usize = 32;

/// Render the managed call stack at the point of invocation
pub fn capture<S: StackSource + ?Sized>(source: &S) -> String {
    render(&source.frames())
}

/// Render frames, innermost first
pub fn render(frames: &[String]) -> String {
    let mut out = String::from("Backtrace:");
    if frames.is_empty() {
        out.push_str("\n\t<no frames>");
    }
    for frame in frames {
        out.push_str("\n\tat ");
        out.push_str(frame);
    }
    out
}

/// Render the native stack of the calling thread
///
/// Symbol names are used where available, raw instruction pointers
/// otherwise.
pub fn capture_native() -> String {
    let mut frames = Vec::with_capacity(16);

    backtrace::trace(|frame| {
        let ip = frame.ip() as usize;
        let mut name = None;
        backtrace::resolve_frame(frame, |symbol| {
            if name.is_none() {
                name = symbol.name().map(|n| n.to_string());
            }
        });
        frames.push(name.unwrap_or_else(|| format!("{:#x}", ip)));
        frames.len() < MAX_NATIVE_FRAMES
    });

    render(&frames)
}
