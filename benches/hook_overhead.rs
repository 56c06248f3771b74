//! Interception overhead benchmark
//!
//! Measures what a traced call costs compared with an untouched one. The
//! hot path is the shim: render arguments, emit two lines, forward.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench hook_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hookline::cli::OutputFormat;
use hookline::emitter::{Emitter, TraceSink};
use hookline::managed::ManagedRuntime;
use hookline::native::{BoundaryTable, NativeProbeSpec};
use hookline::runtime::{Dispatch, Value};
use hookline::symbols::SymbolTable;
use hookline::{HookSpec, Monitor};
use std::ffi::CString;
use std::sync::Arc;

/// Discards everything so only interception cost is measured
struct NullSink;

impl TraceSink for NullSink {
    fn emit(&self, line: &str) {
        black_box(line);
    }

    fn diagnostic(&self, line: &str) {
        black_box(line);
    }
}

fn runtime() -> Arc<ManagedRuntime> {
    let rt = Arc::new(ManagedRuntime::new());
    rt.define_method("bench.Echo", "echo", &["String"], |inv| Ok(inv.args[0].clone()))
        .expect("fresh runtime");
    rt
}

fn monitor(rt: &Arc<ManagedRuntime>, format: OutputFormat) -> Monitor {
    Monitor::new(Emitter::new(Arc::new(NullSink), format)).with_runtime(rt.clone())
}

/// Baseline: dispatch with no hook installed
fn bench_untraced_call(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("untraced_call", |b| {
        b.iter(|| {
            black_box(
                rt.invoke("bench.Echo", "echo", Value::Null, vec![black_box("x").into()])
                    .expect("echo"),
            )
        });
    });
}

/// Traced call per output format
fn bench_traced_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("traced_call");

    for format in [OutputFormat::Text, OutputFormat::Json] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", format)),
            &format,
            |b, &format| {
                let rt = runtime();
                let monitor = monitor(&rt, format);
                monitor.monitor_method("bench.Echo.echo", &HookSpec::new());

                b.iter(|| {
                    black_box(
                        rt.invoke("bench.Echo", "echo", Value::Null, vec![black_box("x").into()])
                            .expect("echo"),
                    )
                });
            },
        );
    }

    group.finish();
}

/// Traced call with both rewrites active
fn bench_rewritten_call(c: &mut Criterion) {
    let rt = runtime();
    let monitor = monitor(&rt, OutputFormat::Text);
    let spec = HookSpec::new()
        .with_inject_args(|mut args| {
            args.push(Value::Int(1));
            args.truncate(1);
            args
        })
        .with_inject_ret(|ret| match ret {
            Value::Str(s) => Value::Str(s.to_uppercase()),
            other => other,
        });
    monitor.monitor_method("bench.Echo.echo", &spec);

    c.bench_function("rewritten_call", |b| {
        b.iter(|| {
            black_box(
                rt.invoke("bench.Echo", "echo", Value::Null, vec![black_box("x").into()])
                    .expect("echo"),
            )
        });
    });
}

/// Native boundary with a filtered probe attached
fn bench_native_boundary(c: &mut Criterion) {
    let boundary = Arc::new(BoundaryTable::new());
    let symbols = SymbolTable::new().with_export("libc.so.6", "open", 0x1000);
    let monitor = Monitor::new(Emitter::new(Arc::new(NullSink), OutputFormat::Text))
        .with_native(Arc::new(symbols), boundary.clone());
    monitor.monitor_native_export_with(
        "libc.so.6",
        "open",
        NativeProbeSpec::new()
            .with_report_when("^/etc/")
            .expect("valid pattern"),
    );

    let path = CString::new("/etc/hosts").expect("no interior nul");
    let args = [path.as_ptr() as usize, 0];

    c.bench_function("native_boundary_call", |b| {
        b.iter(|| black_box(unsafe { boundary.call(0x1000, black_box(&args), |_| 3) }));
    });
}

criterion_group!(
    benches,
    bench_untraced_call,
    bench_traced_call,
    bench_rewritten_call,
    bench_native_boundary
);
criterion_main!(benches);
