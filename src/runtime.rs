//! Capabilities the engine consumes from the host runtime
//!
//! The engine never owns a managed object model. It is handed one through
//! these traits, which keeps resolution, enumeration and method replacement
//! mockable and lets the same `Monitor` drive any reflective runtime.
//!
//! - `ObjectModel`: reflective queries (containers, overloads, members)
//! - `Interception`: swapping an overload's implementation
//! - `StackSource`: the managed frames active on the calling thread
//! - `Dispatch`: calling back into the runtime from inside a method body

use crate::error::{Fault, HookError};
use std::fmt;
use std::sync::Arc;

/// A managed value as seen by hooks
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of a method without a return value
    Void,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Reference to a managed object
    Object { class: String, id: u64 },
}

impl Value {
    /// Runtime type name used for overload matching
    pub fn type_name(&self) -> &str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Object { class, .. } => class,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => f.write_str(&join_values(items, ",")),
            Value::Object { class, id } => write!(f, "{}@{:x}", class, id),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Render values with their textual form, joined by `sep`
pub fn join_values(values: &[Value], sep: &str) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Ordered parameter type list of one overload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature(Vec<String>);

impl Signature {
    pub fn new<S: AsRef<str>>(params: &[S]) -> Self {
        Self(params.iter().map(|p| p.as_ref().to_string()).collect())
    }

    pub fn params(&self) -> &[String] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Whether `args` can be passed to this overload
    ///
    /// `null` is accepted for any reference parameter, `Object` accepts any
    /// reference, and an `int` argument widens to a `double` parameter.
    pub fn accepts(&self, args: &[Value]) -> bool {
        self.0.len() == args.len()
            && self
                .0
                .iter()
                .zip(args)
                .all(|(param, arg)| param_accepts(param, arg))
    }
}

fn param_accepts(param: &str, arg: &Value) -> bool {
    const PRIMITIVES: [&str; 3] = ["boolean", "int", "double"];
    match arg {
        Value::Null => !PRIMITIVES.contains(&param),
        Value::Int(_) if param == "double" => true,
        Value::Void => false,
        other => {
            param == other.type_name()
                || (param == "Object" && !PRIMITIVES.contains(&other.type_name()))
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// Opaque handle to a live container (class/type)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    name: String,
    slot: usize,
}

impl ContainerHandle {
    pub fn new(name: impl Into<String>, slot: usize) -> Self {
        Self {
            name: name.into(),
            slot,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime-private slot, meaningful only to the runtime that issued it
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// One concrete overload: `(container, member, signature)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverloadHandle {
    pub container: String,
    pub member: String,
    pub signature: Signature,
}

impl OverloadHandle {
    pub fn new(container: &str, member: &str, signature: Signature) -> Self {
        Self {
            container: container.to_string(),
            member: member.to_string(),
            signature,
        }
    }

    /// `container.member(params)`, unique per overload
    pub fn key(&self) -> String {
        format!("{}.{}{}", self.container, self.member, self.signature)
    }
}

impl fmt::Display for OverloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Outcome of a reflective lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    NotFound,
}

impl<T> Resolution<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Resolution::Resolved(t) => Some(t),
            Resolution::NotFound => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

impl<T> From<Option<T>> for Resolution<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Resolution::Resolved(t),
            None => Resolution::NotFound,
        }
    }
}

/// Calls back into the runtime (used by method bodies)
pub trait Dispatch: Send + Sync {
    fn invoke(
        &self,
        container: &str,
        member: &str,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Fault>;
}

/// A single call as seen by an implementation
pub struct Invocation<'a> {
    pub dispatch: &'a dyn Dispatch,
    pub receiver: &'a Value,
    pub args: &'a [Value],
}

impl<'a> Invocation<'a> {
    /// Same call with a different argument list
    pub fn with_args<'b>(&'b self, args: &'b [Value]) -> Invocation<'b>
    where
        'a: 'b,
    {
        Invocation {
            dispatch: self.dispatch,
            receiver: self.receiver,
            args,
        }
    }
}

/// Body of an overload, original or instrumented
pub type Implementation = Arc<dyn Fn(&Invocation<'_>) -> Result<Value, Fault> + Send + Sync>;

/// Reflective queries over the managed object model
pub trait ObjectModel: Send + Sync {
    fn resolve_container(&self, name: &str) -> Resolution<ContainerHandle>;

    /// Overloads of `member` in runtime-reported order; empty if none
    fn resolve_overloads(&self, container: &ContainerHandle, member: &str) -> Vec<OverloadHandle>;

    /// Declared member names, possibly repeating overloaded names
    fn declared_members(&self, container: &ContainerHandle) -> Vec<String>;
}

/// Replacement of overload implementations
pub trait Interception: Send + Sync {
    /// The pre-instrumentation body, regardless of installed shims
    fn original_implementation(
        &self,
        overload: &OverloadHandle,
    ) -> Result<Implementation, HookError>;

    /// Install `shim` in place of whatever is currently dispatched
    fn replace_implementation(
        &self,
        overload: &OverloadHandle,
        shim: Implementation,
    ) -> Result<(), HookError>;
}

/// Managed frames on the calling thread, innermost first
pub trait StackSource: Send + Sync {
    fn frames(&self) -> Vec<String>;
}

/// Everything the managed half of the engine needs from a host
pub trait HostRuntime: ObjectModel + Interception + StackSource {}

impl<T: ObjectModel + Interception + StackSource> HostRuntime for T {}
