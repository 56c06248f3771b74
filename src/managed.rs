//! In-process managed runtime
//!
//! A small reflective object model: classes hold members, members hold
//! overloads, overloads hold an original body plus at most one installed
//! replacement. It implements every capability in `runtime`, so it is the
//! host the engine runs against in tests and in the CLI.
//!
//! Dispatch clones the body out of the registry before calling it, so a
//! body may re-enter the runtime (or install hooks) without deadlocking.

use crate::error::{Fault, HookError};
use crate::runtime::{
    ContainerHandle, Dispatch, Implementation, Interception, Invocation, ObjectModel,
    OverloadHandle, Resolution, Signature, StackSource, Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

thread_local! {
    static FRAMES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame pushed by `FrameGuard::push` on drop
struct FrameGuard;

impl FrameGuard {
    fn push(frame: String) -> Self {
        FRAMES.with(|f| f.borrow_mut().push(frame));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = FRAMES.try_with(|f| f.borrow_mut().pop());
    }
}

struct OverloadEntry {
    handle: OverloadHandle,
    original: Implementation,
    installed: Option<Implementation>,
}

impl OverloadEntry {
    fn current(&self) -> Implementation {
        self.installed
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.original))
    }
}

#[derive(Default)]
struct ClassEntry {
    name: String,
    /// Declared member names, one per overload (reflection order)
    declared: Vec<String>,
    overloads: HashMap<String, Vec<OverloadEntry>>,
}

#[derive(Default)]
struct Registry {
    classes: Vec<ClassEntry>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    fn class_mut(&mut self, name: &str) -> &mut ClassEntry {
        let slot = match self.by_name.get(name) {
            Some(&slot) => slot,
            None => {
                self.classes.push(ClassEntry {
                    name: name.to_string(),
                    ..ClassEntry::default()
                });
                self.by_name.insert(name.to_string(), self.classes.len() - 1);
                self.classes.len() - 1
            }
        };
        &mut self.classes[slot]
    }

    fn overload(&self, handle: &OverloadHandle) -> Option<&OverloadEntry> {
        let slot = *self.by_name.get(&handle.container)?;
        self.classes[slot]
            .overloads
            .get(&handle.member)?
            .iter()
            .find(|o| o.handle == *handle)
    }

    fn overload_mut(&mut self, handle: &OverloadHandle) -> Option<&mut OverloadEntry> {
        let slot = *self.by_name.get(&handle.container)?;
        self.classes[slot]
            .overloads
            .get_mut(&handle.member)?
            .iter_mut()
            .find(|o| o.handle == *handle)
    }
}

/// Reflective managed runtime living in this process
#[derive(Default)]
pub struct ManagedRuntime {
    registry: RwLock<Registry>,
}

impl ManagedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a class (possibly without any members)
    pub fn define_class(&self, name: &str) {
        self.write().class_mut(name);
    }

    /// Declare an overload with its body
    ///
    /// Fails if the same `(class, member, signature)` already exists.
    pub fn define_method<F>(
        &self,
        class: &str,
        member: &str,
        params: &[&str],
        body: F,
    ) -> Result<OverloadHandle, HookError>
    where
        F: Fn(&Invocation<'_>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        let handle = OverloadHandle::new(class, member, Signature::new(params));
        let mut registry = self.write();
        let entry = registry.class_mut(class);
        let overloads = entry.overloads.entry(member.to_string()).or_default();

        if overloads.iter().any(|o| o.handle == handle) {
            return Err(HookError::AlreadyDeclared(handle.key()));
        }

        overloads.push(OverloadEntry {
            handle: handle.clone(),
            original: Arc::new(body),
            installed: None,
        });
        entry.declared.push(member.to_string());
        Ok(handle)
    }

    /// Declare a member that reflection reports but that has no callable body
    pub fn define_abstract(&self, class: &str, member: &str) {
        let mut registry = self.write();
        let entry = registry.class_mut(class);
        entry.overloads.entry(member.to_string()).or_default();
        entry.declared.push(member.to_string());
    }

    /// Whether an instrumented body is currently installed on `overload`
    pub fn is_instrumented(&self, overload: &OverloadHandle) -> bool {
        self.read()
            .overload(overload)
            .is_some_and(|o| o.installed.is_some())
    }

    /// Call a specific overload through current dispatch
    pub fn invoke_overload(
        &self,
        overload: &OverloadHandle,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        let body = self
            .read()
            .overload(overload)
            .map(OverloadEntry::current)
            .ok_or_else(|| Fault::no_such_overload(&overload.key(), args.len()))?;
        self.run(overload, body, &receiver, &args)
    }

    fn run(
        &self,
        overload: &OverloadHandle,
        body: Implementation,
        receiver: &Value,
        args: &[Value],
    ) -> Result<Value, Fault> {
        let _frame = FrameGuard::push(overload.key());
        body(&Invocation {
            dispatch: self,
            receiver,
            args,
        })
    }
}

impl Dispatch for ManagedRuntime {
    /// Call the first overload whose signature accepts `args`
    fn invoke(
        &self,
        container: &str,
        member: &str,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        let target = {
            let registry = self.read();
            registry
                .by_name
                .get(container)
                .and_then(|&slot| registry.classes[slot].overloads.get(member))
                .and_then(|overloads| overloads.iter().find(|o| o.handle.signature.accepts(&args)))
                .map(|o| (o.handle.clone(), o.current()))
        };

        match target {
            Some((handle, body)) => self.run(&handle, body, &receiver, &args),
            None => Err(Fault::no_such_overload(
                &format!("{}.{}", container, member),
                args.len(),
            )),
        }
    }
}

impl ObjectModel for ManagedRuntime {
    fn resolve_container(&self, name: &str) -> Resolution<ContainerHandle> {
        let registry = self.read();
        registry
            .by_name
            .get(name)
            .map(|&slot| ContainerHandle::new(name, slot))
            .into()
    }

    fn resolve_overloads(&self, container: &ContainerHandle, member: &str) -> Vec<OverloadHandle> {
        let registry = self.read();
        registry
            .classes
            .get(container.slot())
            .filter(|c| c.name == container.name())
            .and_then(|c| c.overloads.get(member))
            .map(|overloads| overloads.iter().map(|o| o.handle.clone()).collect())
            .unwrap_or_default()
    }

    fn declared_members(&self, container: &ContainerHandle) -> Vec<String> {
        let registry = self.read();
        registry
            .classes
            .get(container.slot())
            .filter(|c| c.name == container.name())
            .map(|c| c.declared.clone())
            .unwrap_or_default()
    }
}

impl Interception for ManagedRuntime {
    fn original_implementation(
        &self,
        overload: &OverloadHandle,
    ) -> Result<Implementation, HookError> {
        self.read()
            .overload(overload)
            .map(|o| Arc::clone(&o.original))
            .ok_or_else(|| HookError::UnknownOverload(overload.key()))
    }

    fn replace_implementation(
        &self,
        overload: &OverloadHandle,
        shim: Implementation,
    ) -> Result<(), HookError> {
        let mut registry = self.write();
        let entry = registry
            .overload_mut(overload)
            .ok_or_else(|| HookError::UnknownOverload(overload.key()))?;
        entry.installed = Some(shim);
        Ok(())
    }
}

impl StackSource for ManagedRuntime {
    fn frames(&self) -> Vec<String> {
        FRAMES
            .try_with(|f| f.borrow().iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}
