//! Error types for ferry

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Summary of an exception thrown inside the engine.
///
/// Structured exceptions (objects carrying `name` and `message`) keep both
/// fields; anything else thrown is stringified into `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignException {
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl ForeignException {
    /// Exception built from a bare thrown value (`throw "abc"`).
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            stack: None,
        }
    }

    /// Exception built from an `Error`-like object.
    pub fn structured(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        self.stack = (!stack.trim().is_empty()).then_some(stack);
        self
    }

    /// `"<type>: <message>"`, or the bare message when the thrown value had no type.
    pub fn summary(&self) -> String {
        match &self.name {
            Some(name) => format!("{}: {}", name, self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{}", stack)?;
        }
        Ok(())
    }
}

/// Errors surfaced by the interpreter and the marshaling layer
#[derive(Debug, Error)]
pub enum Error {
    /// The engine could not allocate a runtime or context
    #[error("failed to initialize interpreter: {0}")]
    Init(String),

    /// Source text failed to parse
    #[error("{0}")]
    Syntax(ForeignException),

    /// Exception thrown while running foreign code
    #[error("{0}")]
    Runtime(ForeignException),

    /// A value kind neither converter handles
    #[error("unsupported value type: {0}")]
    UnsupportedType(String),

    /// A mapping key that is not a string
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// Function proxy used after its backing reference was released
    #[error("function is not initialized")]
    NotInitialized,

    /// Lower-level marshaling failure, e.g. a malformed array length
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Failure reported by a host callable
    #[error("{kind}: {message}")]
    Host { kind: String, message: String },

    /// A host callable panicked while the engine was calling it
    #[error("host function panicked: {0}")]
    Panic(String),
}

impl Error {
    /// Failure raised by a host callable, surfaced in the engine as `"<kind>: <message>"`.
    pub fn host(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Host {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_type(what: impl Into<String>) -> Self {
        Self::UnsupportedType(what.into())
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Type name used when this error crosses into the engine.
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Init(_) => "InitError",
            Self::Syntax(exc) => exc.name.as_deref().unwrap_or("SyntaxError"),
            Self::Runtime(exc) => exc.name.as_deref().unwrap_or("RuntimeError"),
            Self::UnsupportedType(_) => "UnsupportedType",
            Self::UnsupportedKeyType(_) => "UnsupportedKeyType",
            Self::NotInitialized => "NotInitialized",
            Self::Conversion(_) => "ConversionError",
            Self::Host { kind, .. } => kind,
            Self::Panic(_) => "Panic",
        }
    }

    /// Message without the type prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Init(message)
            | Self::UnsupportedType(message)
            | Self::UnsupportedKeyType(message)
            | Self::Conversion(message)
            | Self::Panic(message) => message.clone(),
            Self::Syntax(exc) | Self::Runtime(exc) => exc.message.clone(),
            Self::Host { message, .. } => message.clone(),
            Self::NotInitialized => "function is not initialized".into(),
        }
    }

    /// The engine-side exception this error was captured from, if any.
    pub fn foreign_exception(&self) -> Option<&ForeignException> {
        match self {
            Self::Syntax(exc) | Self::Runtime(exc) => Some(exc),
            _ => None,
        }
    }

    pub fn is_syntax_error(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }
}
