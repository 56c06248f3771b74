//! Error types for hook installation and forwarded calls
//!
//! `HookError` covers everything that can go wrong while resolving or
//! installing a probe. All of these are fail-soft at the `Monitor` level:
//! they turn into a diagnostic line and the session moves on.
//!
//! `Fault` is what an original implementation raises. Shims never
//! construct or alter one, they only pass it through.

use thiserror::Error;

/// Failure to resolve or install a hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// Container (class/type) is unknown to the object model
    #[error("\"{0}\" not found")]
    ContainerNotFound(String),

    /// Native module is not loaded or could not be read
    #[error("module \"{0}\" not found")]
    ModuleNotFound(String),

    /// Module is present but does not export the symbol
    #[error("symbol \"{symbol}\" not found in \"{module}\"")]
    SymbolNotFound { module: String, symbol: String },

    /// Container resolved but declares no member by that name
    #[error("member \"{member}\" not found in \"{container}\"")]
    MemberNotFound { container: String, member: String },

    /// Qualified name has no `container.member` shape
    #[error("invalid target \"{0}\": expected <container>.<member>")]
    InvalidTarget(String),

    /// Regex in a probe or plan entry failed to compile
    #[error("invalid pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Overload does not belong to the runtime it was handed to
    #[error("overload {0} is not registered")]
    UnknownOverload(String),

    /// Session was attached without the needed capability
    #[error("no {0} attached")]
    CapabilityUnavailable(&'static str),

    /// Class or overload declared twice in a managed runtime
    #[error("\"{0}\" is already declared")]
    AlreadyDeclared(String),
}

/// Exception raised by a managed method body
///
/// Propagates through shims untouched so callers observe exactly what
/// the original raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {message}")]
pub struct Fault {
    /// Exception class name, e.g. `IllegalStateException`
    pub class: String,
    /// Human-readable message
    pub message: String,
}

impl Fault {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Raised when no overload accepts the given arguments
    pub fn no_such_overload(path: &str, arity: usize) -> Self {
        Self::new(
            "NoSuchMethodError",
            format!("no overload of {} accepts {} argument(s)", path, arity),
        )
    }
}
