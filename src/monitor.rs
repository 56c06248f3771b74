//! Monitor: the three entry points of the engine
//!
//! - `monitor_method("pkg.Greeter.greet", spec)`
//! - `monitor_class("pkg.Greeter", spec)`
//! - `monitor_native_export("libc.so.6", "open")`
//!
//! Every entry point is fail-soft: a failure is reported as a diagnostic
//! and the call returns an empty result, so one bad target never stops the
//! others. Installs are idempotent in the last-writer-wins sense.

use crate::config::HookPlan;
use crate::emitter::Emitter;
use crate::error::HookError;
use crate::hook::{self, ActiveHook, HookSpec};
use crate::native::{self, BoundaryAttach, NativeProbe, NativeProbeSpec};
use crate::runtime::{ContainerHandle, HostRuntime, OverloadHandle, Resolution};
use crate::symbols::SymbolLookup;
use crate::target::TargetDescriptor;
use std::sync::Arc;

/// Native capabilities of the host process
#[derive(Clone)]
struct NativeHost {
    lookup: Arc<dyn SymbolLookup>,
    boundary: Arc<dyn BoundaryAttach>,
}

/// Summary of `Monitor::apply_plan`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanReport {
    pub hooks: Vec<ActiveHook>,
    pub probes: Vec<NativeProbe>,
}

/// Engine front-end bound to the capabilities of one attach session
#[derive(Clone)]
pub struct Monitor {
    runtime: Option<Arc<dyn HostRuntime>>,
    native: Option<NativeHost>,
    emitter: Emitter,
}

impl Monitor {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            runtime: None,
            native: None,
            emitter,
        }
    }

    /// Attach a managed runtime
    pub fn with_runtime(mut self, runtime: Arc<dyn HostRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Attach symbol lookup and boundary interception
    pub fn with_native(
        mut self,
        lookup: Arc<dyn SymbolLookup>,
        boundary: Arc<dyn BoundaryAttach>,
    ) -> Self {
        self.native = Some(NativeHost { lookup, boundary });
        self
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    fn managed(&self) -> Option<&Arc<dyn HostRuntime>> {
        if self.runtime.is_none() {
            self.emitter
                .diagnostic(&HookError::CapabilityUnavailable("managed runtime"));
        }
        self.runtime.as_ref()
    }

    /// Resolve a bare container name; unknown names produce a diagnostic
    pub fn resolve(&self, container_name: &str) -> Resolution<ContainerHandle> {
        let Some(runtime) = self.managed() else {
            return Resolution::NotFound;
        };
        let resolution = runtime.resolve_container(container_name);
        if !resolution.is_resolved() {
            self.emitter
                .diagnostic(&HookError::ContainerNotFound(container_name.to_string()));
        }
        resolution
    }

    /// Overloads of one member, in runtime order
    pub fn overloads_of(&self, container: &ContainerHandle, member: &str) -> Vec<OverloadHandle> {
        self.runtime
            .as_ref()
            .map(|rt| rt.resolve_overloads(container, member))
            .unwrap_or_default()
    }

    /// Declared member names, each listed once, in first-seen order
    pub fn declared_members_of(&self, container: &ContainerHandle) -> Vec<String> {
        let mut members = self
            .runtime
            .as_ref()
            .map(|rt| rt.declared_members(container))
            .unwrap_or_default();
        let mut seen = std::collections::HashSet::new();
        members.retain(|m| seen.insert(m.clone()));
        members
    }

    /// Hook every overload of `member`, reporting per-overload failures
    fn hook_member(
        &self,
        runtime: &Arc<dyn HostRuntime>,
        container: &ContainerHandle,
        member: &str,
        path: &str,
        spec: &HookSpec,
    ) -> Vec<ActiveHook> {
        let overloads = runtime.resolve_overloads(container, member);
        if overloads.is_empty() {
            tracing::debug!(path, "no overloads, nothing to hook");
        }

        overloads
            .iter()
            .filter_map(
                |overload| match hook::install(runtime, &self.emitter, overload, path, spec) {
                    Ok(active) => Some(active),
                    Err(e) => {
                        self.emitter.diagnostic(&e);
                        None
                    }
                },
            )
            .collect()
    }

    /// Hook every overload of one `container.member` target
    pub fn monitor_method(&self, qualified_name: &str, spec: &HookSpec) -> Vec<ActiveHook> {
        let target = match TargetDescriptor::parse(qualified_name) {
            Ok(target) => target,
            Err(e) => {
                self.emitter.diagnostic(&e);
                return Vec::new();
            }
        };

        let Resolution::Resolved(container) = self.resolve(target.container_name()) else {
            return Vec::new();
        };
        let Some(runtime) = self.runtime.as_ref() else {
            return Vec::new();
        };

        let member = target.member_name();
        let hooks = self.hook_member(runtime, &container, member, target.qualified_name(), spec);

        // No overloads is fine for a declared member; anything else is a typo.
        if hooks.is_empty() && !self.declared_members_of(&container).iter().any(|m| m == member) {
            self.emitter.diagnostic(&HookError::MemberNotFound {
                container: container.name().to_string(),
                member: member.to_string(),
            });
        }
        hooks
    }

    /// Hook every overload of every declared member of a container
    ///
    /// Class sweeps trace only: argument and result rewrites in `spec` are
    /// not applied, since one rewrite cannot fit every member's signature.
    pub fn monitor_class(&self, container_name: &str, spec: &HookSpec) -> Vec<ActiveHook> {
        let Resolution::Resolved(container) = self.resolve(container_name) else {
            return Vec::new();
        };
        let Some(runtime) = self.runtime.as_ref() else {
            return Vec::new();
        };

        let spec = spec.trace_only();
        let mut hooks = Vec::new();
        for member in self.declared_members_of(&container) {
            let path = format!("{}.{}", container_name, member);
            hooks.extend(self.hook_member(runtime, &container, &member, &path, &spec));
        }

        tracing::debug!(
            class = container_name,
            hooks = hooks.len(),
            "class sweep done"
        );
        hooks
    }

    /// Probe an exported native symbol with default options
    pub fn monitor_native_export(&self, module_path: &str, symbol: &str) -> Option<NativeProbe> {
        self.monitor_native_export_with(module_path, symbol, NativeProbeSpec::new())
    }

    pub fn monitor_native_export_with(
        &self,
        module_path: &str,
        symbol: &str,
        spec: NativeProbeSpec,
    ) -> Option<NativeProbe> {
        let Some(host) = self.native.as_ref() else {
            self.emitter
                .diagnostic(&HookError::CapabilityUnavailable("native interception"));
            return None;
        };
        native::attach(
            host.lookup.as_ref(),
            host.boundary.as_ref(),
            &self.emitter,
            module_path,
            symbol,
            spec,
        )
    }

    /// Install every entry of a plan; entries are independent
    pub fn apply_plan(&self, plan: &HookPlan) -> PlanReport {
        let mut report = PlanReport::default();

        for entry in &plan.method {
            report
                .hooks
                .extend(self.monitor_method(&entry.target, &entry.hook_spec()));
        }
        for entry in &plan.class {
            report
                .hooks
                .extend(self.monitor_class(&entry.name, &entry.hook_spec()));
        }
        for entry in &plan.native {
            let spec = match entry.probe_spec() {
                Ok(spec) => spec,
                Err(e) => {
                    self.emitter.diagnostic(&e);
                    continue;
                }
            };
            report.probes.extend(self.monitor_native_export_with(
                &entry.module,
                &entry.symbol,
                spec,
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::emitter::MemorySink;
    use crate::error::Fault;
    use crate::managed::ManagedRuntime;
    use crate::native::BoundaryTable;
    use crate::runtime::{Dispatch, Value};
    use crate::symbols::SymbolTable;

    fn runtime() -> Arc<ManagedRuntime> {
        let rt = Arc::new(ManagedRuntime::new());
        rt.define_method("pkg.Greeter", "greet", &["String"], |inv| {
            Ok(Value::Str(format!("hi {}", inv.args[0])))
        })
        .unwrap();
        rt.define_method("pkg.Greeter", "greet", &["String", "String"], |inv| {
            Ok(Value::Str(format!("hi {} and {}", inv.args[0], inv.args[1])))
        })
        .unwrap();
        rt.define_method("pkg.Greeter", "wave", &[], |_| Ok(Value::Void))
            .unwrap();
        rt.define_abstract("pkg.Greeter", "describe");
        rt.define_class("pkg.Empty");
        rt
    }

    fn monitor(rt: &Arc<ManagedRuntime>) -> (Monitor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let monitor = Monitor::new(Emitter::new(sink.clone(), OutputFormat::Text))
            .with_runtime(rt.clone());
        (monitor, sink)
    }

    #[test]
    fn test_monitor_method_hooks_all_overloads() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        let hooks = monitor.monitor_method("pkg.Greeter.greet", &HookSpec::new());
        assert_eq!(hooks.len(), 2);
        assert!(hooks.iter().all(|h| h.path == "pkg.Greeter.greet"));

        rt.invoke("pkg.Greeter", "greet", Value::Null, vec!["Ann".into()])
            .unwrap();
        rt.invoke("pkg.Greeter", "greet", Value::Null, vec!["Ann".into(), "Bo".into()])
            .unwrap();
        assert_eq!(
            sink.lines(),
            vec![
                "enter [pkg.Greeter.greet]: Ann",
                "exit [pkg.Greeter.greet]: hi Ann",
                "enter [pkg.Greeter.greet]: Ann, Bo",
                "exit [pkg.Greeter.greet]: hi Ann and Bo",
            ]
        );
    }

    #[test]
    fn test_unknown_container_is_fail_soft() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        assert!(monitor
            .monitor_method("pkg.Missing.run", &HookSpec::new())
            .is_empty());
        assert_eq!(sink.diagnostics(), vec!["error: \"pkg.Missing\" not found"]);

        // The session keeps going.
        assert_eq!(
            monitor
                .monitor_method("pkg.Greeter.wave", &HookSpec::new())
                .len(),
            1
        );
    }

    #[test]
    fn test_invalid_target_is_fail_soft() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        assert!(monitor.monitor_method("greet", &HookSpec::new()).is_empty());
        assert_eq!(sink.diagnostics().len(), 1);
    }

    #[test]
    fn test_member_without_overloads_is_not_an_error() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        assert!(monitor
            .monitor_method("pkg.Greeter.describe", &HookSpec::new())
            .is_empty());
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_undeclared_member_is_reported() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        assert!(monitor
            .monitor_method("pkg.Greeter.gret", &HookSpec::new())
            .is_empty());
        assert_eq!(
            sink.diagnostics(),
            vec!["error: member \"gret\" not found in \"pkg.Greeter\""]
        );
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_monitor_class_sweeps_members() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        let hooks = monitor.monitor_class("pkg.Greeter", &HookSpec::new());
        let paths: Vec<&str> = hooks.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["pkg.Greeter.greet", "pkg.Greeter.greet", "pkg.Greeter.wave"]
        );

        rt.invoke("pkg.Greeter", "wave", Value::Null, vec![]).unwrap();
        assert_eq!(
            sink.lines(),
            vec!["enter [pkg.Greeter.wave]: ", "exit [pkg.Greeter.wave]: void"]
        );
    }

    #[test]
    fn test_monitor_class_ignores_rewrites() {
        let rt = runtime();
        let (monitor, _sink) = monitor(&rt);
        let spec = HookSpec::new().with_inject_ret(|_| Value::from("rewritten"));
        monitor.monitor_class("pkg.Greeter", &spec);

        let ret = rt
            .invoke("pkg.Greeter", "greet", Value::Null, vec!["Ann".into()])
            .unwrap();
        assert_eq!(ret, Value::from("hi Ann"));
    }

    #[test]
    fn test_monitor_empty_class() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        assert!(monitor.monitor_class("pkg.Empty", &HookSpec::new()).is_empty());
        assert!(sink.lines().is_empty());
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_monitor_unknown_class() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        assert!(monitor.monitor_class("pkg.Nope", &HookSpec::new()).is_empty());
        assert!(sink.lines().is_empty());
        assert_eq!(sink.diagnostics(), vec!["error: \"pkg.Nope\" not found"]);
    }

    #[test]
    fn test_declared_members_deduplicated() {
        let rt = runtime();
        let (monitor, _sink) = monitor(&rt);
        let class = monitor.resolve("pkg.Greeter").into_option().unwrap();
        assert_eq!(
            monitor.declared_members_of(&class),
            vec!["greet", "wave", "describe"]
        );
        assert_eq!(monitor.overloads_of(&class, "greet").len(), 2);
    }

    #[test]
    fn test_second_install_wins() {
        let rt = runtime();
        let (monitor, sink) = monitor(&rt);
        monitor.monitor_method(
            "pkg.Greeter.greet",
            &HookSpec::new().with_inject_ret(|_| Value::from("one")),
        );
        monitor.monitor_method(
            "pkg.Greeter.greet",
            &HookSpec::new().with_inject_ret(|_| Value::from("two")),
        );

        let ret = rt
            .invoke("pkg.Greeter", "greet", Value::Null, vec!["Ann".into()])
            .unwrap();
        assert_eq!(ret, Value::from("two"));
        assert_eq!(sink.lines().len(), 2);
    }

    #[test]
    fn test_missing_capabilities() {
        let sink = Arc::new(MemorySink::new());
        let monitor = Monitor::new(Emitter::new(sink.clone(), OutputFormat::Text));
        assert!(monitor.monitor_method("a.b", &HookSpec::new()).is_empty());
        assert!(monitor.monitor_native_export("libc.so.6", "open").is_none());
        assert_eq!(
            sink.diagnostics(),
            vec![
                "error: no managed runtime attached",
                "error: no native interception attached"
            ]
        );
    }

    #[test]
    fn test_apply_plan() {
        let rt = runtime();
        let sink = Arc::new(MemorySink::new());
        let monitor = Monitor::new(Emitter::new(sink.clone(), OutputFormat::Text))
            .with_runtime(rt.clone())
            .with_native(
                Arc::new(SymbolTable::new().with_export("libc.so.6", "open", 0x40)),
                Arc::new(BoundaryTable::new()),
            );
        let plan = HookPlan::from_toml_str(
            r#"
            [[method]]
            target = "pkg.Greeter.greet"
            inject_ret = { op = "uppercase" }

            [[method]]
            target = "pkg.Missing.greet"

            [[class]]
            name = "pkg.Empty"

            [[native]]
            module = "libc.so.6"
            symbol = "open"

            [[native]]
            module = "libc.so.6"
            symbol = "close"
            "#,
        )
        .unwrap();

        let report = monitor.apply_plan(&plan);
        assert_eq!(report.hooks.len(), 2);
        assert_eq!(report.probes.len(), 1);
        assert_eq!(sink.diagnostics().len(), 2);

        let ret = rt
            .invoke("pkg.Greeter", "greet", Value::Null, vec!["Ann".into()])
            .unwrap();
        assert_eq!(ret, Value::from("HI ANN"));
    }

    #[test]
    fn test_fault_through_monitor() {
        let rt = runtime();
        rt.define_method("pkg.Greeter", "fail", &[], |_| Err(Fault::new("E", "boom")))
            .unwrap();
        let (monitor, sink) = monitor(&rt);
        monitor.monitor_method("pkg.Greeter.fail", &HookSpec::new());

        let err = rt.invoke("pkg.Greeter", "fail", Value::Null, vec![]).unwrap_err();
        assert_eq!(err, Fault::new("E", "boom"));
        assert_eq!(sink.lines().last().unwrap(), "fault [pkg.Greeter.fail]: E: boom");
    }
}
