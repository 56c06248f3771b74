//! Hook plan files
//!
//! A plan declares what to instrument. Transforms are declarative so a plan
//! can be written without code.
//!
//! # Example hooks.toml
//!
//! ```toml
//! [[method]]
//! target = "pkg.Greeter.greet"
//! backtrace = true
//! inject_args = [{ op = "set", index = 0, value = "Bob" }]
//! inject_ret = { op = "uppercase" }
//!
//! [[class]]
//! name = "pkg.Greeter"
//!
//! [[native]]
//! module = "libc.so.6"
//! symbol = "open"
//! report_when = "^/etc/"
//! ```

use crate::error::HookError;
use crate::hook::HookSpec;
use crate::native::NativeProbeSpec;
use crate::runtime::Value;
use crate::target::TargetDescriptor;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Root of a plan file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HookPlan {
    #[serde(default)]
    pub method: Vec<MethodEntry>,
    #[serde(default)]
    pub class: Vec<ClassEntry>,
    #[serde(default)]
    pub native: Vec<NativeEntry>,
}

/// `[[method]]`: one `container.member` target
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MethodEntry {
    pub target: String,
    #[serde(default)]
    pub backtrace: bool,
    /// Applied in order
    #[serde(default)]
    pub inject_args: Vec<ArgEdit>,
    pub inject_ret: Option<RetEdit>,
}

/// `[[class]]`: every declared method of a container
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClassEntry {
    pub name: String,
    #[serde(default)]
    pub backtrace: bool,
}

/// `[[native]]`: one exported symbol
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NativeEntry {
    pub module: String,
    pub symbol: String,
    #[serde(default)]
    pub arg_index: usize,
    pub report_when: Option<String>,
    #[serde(default)]
    pub backtrace: bool,
}

/// Argument list edit
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ArgEdit {
    /// Replace argument `index` (no-op when out of range)
    Set { index: usize, value: toml::Value },
    /// Append an argument
    Append { value: toml::Value },
    /// Remove argument `index` (no-op when out of range)
    Drop { index: usize },
}

/// Result edit
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RetEdit {
    /// Uppercase string results, leave others as-is
    Uppercase,
    /// Lowercase string results, leave others as-is
    Lowercase,
    /// Replace the result
    Constant { value: toml::Value },
}

/// Convert a plan literal into a managed value
pub fn value_from_toml(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Int(*i),
        toml::Value::Float(x) => Value::Float(*x),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(items) => Value::List(items.iter().map(value_from_toml).collect()),
        other => Value::Str(other.to_string()),
    }
}

impl ArgEdit {
    pub fn apply(&self, args: &mut Vec<Value>) {
        match self {
            ArgEdit::Set { index, value } => {
                if let Some(slot) = args.get_mut(*index) {
                    *slot = value_from_toml(value);
                }
            }
            ArgEdit::Append { value } => args.push(value_from_toml(value)),
            ArgEdit::Drop { index } => {
                if *index < args.len() {
                    args.remove(*index);
                }
            }
        }
    }
}

impl RetEdit {
    pub fn apply(&self, ret: Value) -> Value {
        match (self, ret) {
            (RetEdit::Uppercase, Value::Str(s)) => Value::Str(s.to_uppercase()),
            (RetEdit::Lowercase, Value::Str(s)) => Value::Str(s.to_lowercase()),
            (RetEdit::Constant { value }, _) => value_from_toml(value),
            (_, other) => other,
        }
    }
}

impl MethodEntry {
    pub fn hook_spec(&self) -> HookSpec {
        let mut spec = HookSpec::new().with_backtrace(self.backtrace);
        if !self.inject_args.is_empty() {
            let edits = self.inject_args.clone();
            spec = spec.with_inject_args(move |mut args| {
                for edit in &edits {
                    edit.apply(&mut args);
                }
                args
            });
        }
        if let Some(edit) = self.inject_ret.clone() {
            spec = spec.with_inject_ret(move |ret| edit.apply(ret));
        }
        spec
    }
}

impl ClassEntry {
    pub fn hook_spec(&self) -> HookSpec {
        HookSpec::new().with_backtrace(self.backtrace)
    }
}

impl NativeEntry {
    pub fn probe_spec(&self) -> Result<NativeProbeSpec, HookError> {
        let spec = NativeProbeSpec::new()
            .with_arg_index(self.arg_index)
            .with_backtrace(self.backtrace);
        match &self.report_when {
            Some(pattern) => spec.with_report_when(pattern),
            None => Ok(spec),
        }
    }
}

impl HookPlan {
    /// Load a plan from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
    }

    /// Load a plan from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Every problem that would make an entry fail at install time
    pub fn validate(&self) -> Vec<HookError> {
        let mut problems = Vec::new();

        for entry in &self.method {
            if let Err(e) = TargetDescriptor::parse(&entry.target) {
                problems.push(e);
            }
        }
        for entry in &self.class {
            if entry.name.is_empty() {
                problems.push(HookError::InvalidTarget(entry.name.clone()));
            }
        }
        for entry in &self.native {
            if let Err(e) = entry.probe_spec() {
                problems.push(e);
            }
        }

        problems
    }

    pub fn is_empty(&self) -> bool {
        self.method.is_empty() && self.class.is_empty() && self.native.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
        [[method]]
        target = "pkg.Greeter.greet"
        backtrace = true
        inject_args = [{ op = "set", index = 0, value = "Bob" }, { op = "append", value = 3 }]
        inject_ret = { op = "uppercase" }

        [[class]]
        name = "pkg.Empty"

        [[native]]
        module = "libc.so.6"
        symbol = "open"
        report_when = "^/etc/"
    "#;

    #[test]
    fn test_parse_plan() {
        let plan = HookPlan::from_toml_str(PLAN).unwrap();
        assert_eq!(plan.method.len(), 1);
        assert_eq!(plan.class.len(), 1);
        assert_eq!(plan.native.len(), 1);
        assert!(plan.method[0].backtrace);
        assert_eq!(plan.method[0].inject_ret, Some(RetEdit::Uppercase));
        assert_eq!(plan.native[0].arg_index, 0);
        assert!(plan.validate().is_empty());
    }

    #[test]
    fn test_empty_plan() {
        let plan = HookPlan::from_toml_str("").unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = HookPlan::from_toml_str("[[method]]\ntarget = \"a.b\"\nbogus = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_method_spec_applies_edits() {
        let plan = HookPlan::from_toml_str(PLAN).unwrap();
        let spec = plan.method[0].hook_spec();

        let inject_args = spec.inject_args.unwrap();
        assert_eq!(
            inject_args(vec![Value::from("Ann")]),
            vec![Value::from("Bob"), Value::Int(3)]
        );

        let inject_ret = spec.inject_ret.unwrap();
        assert_eq!(inject_ret(Value::from("hi Bob")), Value::from("HI BOB"));
        assert_eq!(inject_ret(Value::Int(1)), Value::Int(1));
    }

    #[test]
    fn test_arg_edits_out_of_range_are_noops() {
        let mut args = vec![Value::Int(1)];
        ArgEdit::Set {
            index: 4,
            value: toml::Value::Integer(9),
        }
        .apply(&mut args);
        ArgEdit::Drop { index: 4 }.apply(&mut args);
        assert_eq!(args, vec![Value::Int(1)]);

        ArgEdit::Drop { index: 0 }.apply(&mut args);
        assert!(args.is_empty());
    }

    #[test]
    fn test_constant_ret() {
        let edit = RetEdit::Constant {
            value: toml::Value::Boolean(false),
        };
        assert_eq!(edit.apply(Value::from("x")), Value::Bool(false));
    }

    #[test]
    fn test_validate_reports_problems() {
        let plan = HookPlan::from_toml_str(
            r#"
            [[method]]
            target = "nodot"

            [[native]]
            module = "libc.so.6"
            symbol = "open"
            report_when = "("
            "#,
        )
        .unwrap();
        let problems = plan.validate();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0], HookError::InvalidTarget("nodot".to_string()));
        assert!(matches!(problems[1], HookError::InvalidPattern { .. }));
    }

    #[test]
    fn test_value_from_toml() {
        let table: toml::Table = toml::from_str("x = [1, \"a\", 2.5]").unwrap();
        let v = table["x"].clone();
        assert_eq!(
            value_from_toml(&v),
            Value::List(vec![Value::Int(1), Value::from("a"), Value::Float(2.5)])
        );
    }
}
