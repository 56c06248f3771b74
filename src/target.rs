//! Target descriptors: dotted `container.member` identifiers
//!
//! The split happens on the LAST `.` so nested packages stay in the
//! container part: `pkg.sub.Greeter.greet` -> (`pkg.sub.Greeter`, `greet`).

use crate::error::HookError;
use std::fmt;

/// Immutable `<container>.<member>` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    qualified_name: String,
    split: usize,
}

impl TargetDescriptor {
    /// Parse a qualified name, splitting on the last `.`
    ///
    /// Both halves must be non-empty.
    pub fn parse(qualified_name: &str) -> Result<Self, HookError> {
        let split = qualified_name
            .rfind('.')
            .ok_or_else(|| HookError::InvalidTarget(qualified_name.to_string()))?;

        if split == 0 || split + 1 == qualified_name.len() {
            return Err(HookError::InvalidTarget(qualified_name.to_string()));
        }

        Ok(Self {
            qualified_name: qualified_name.to_string(),
            split,
        })
    }

    /// Build a descriptor from already separated parts
    pub fn from_parts(container: &str, member: &str) -> Result<Self, HookError> {
        Self::parse(&format!("{}.{}", container, member))
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn container_name(&self) -> &str {
        &self.qualified_name[..self.split]
    }

    pub fn member_name(&self) -> &str {
        &self.qualified_name[self.split + 1..]
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name)
    }
}
