//! Error type shared by all quarry crates.
//!
//! Errors double as translation diagnostics. Every error has a kind, a
//! message, and an ordered list of fields. Two fields are well-known: `pass`
//! holds the name of the rewrite pass that detected the problem and `node`
//! holds a rendering of the offending expression.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

use serde::Serialize;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Field name used for the pass that reported an error.
pub const PASS_FIELD: &str = "pass";
/// Field name used for the expression an error is about.
pub const NODE_FIELD: &str = "node";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// An invocation whose callee can't be resolved to a lambda at compile
    /// time.
    UnresolvedInvocationTarget,
    /// Equality between expressions of two different entity types.
    IncompatibleEntityComparison,
    /// No catalog function overload accepts the given arguments.
    UnresolvedFunctionOverload,
    /// A row-set returning function used where a scalar is expected.
    TableValuedFunctionInScalarPosition,
    /// A node that can't be normalized safely.
    UnsupportedExpressionShape,
    /// Everything else, mostly programmer errors.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnresolvedInvocationTarget => "unresolved invocation target",
            Self::IncompatibleEntityComparison => "incompatible entity comparison",
            Self::UnresolvedFunctionOverload => "unresolved function overload",
            Self::TableValuedFunctionInScalarPosition => {
                "table-valued function in scalar position"
            }
            Self::UnsupportedExpressionShape => "unsupported expression shape",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    kind: ErrorKind,
    msg: String,
    fields: Vec<(String, String)>,
    source: Option<Box<dyn Error + Send + Sync>>,
    backtrace: Backtrace,
}

impl DbError {
    /// Create a new internal error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind,
                msg: msg.into(),
                fields: Vec::new(),
                source: None,
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(mut self, source: Box<dyn Error + Send + Sync>) -> Self {
        self.inner.source = Some(source);
        self
    }

    /// Attach a named field to the error.
    ///
    /// Fields are rendered in insertion order.
    pub fn with_field(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((name.into(), value.to_string()));
        self
    }

    /// Set a field only if it isn't present yet.
    pub fn with_field_if_absent(self, name: &str, value: impl fmt::Display) -> Self {
        if self.field(name).is_some() {
            return self;
        }
        self.with_field(name, value)
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Name of the pass that reported this error, if known.
    pub fn pass(&self) -> Option<&str> {
        self.field(PASS_FIELD)
    }

    /// Rendering of the offending node, if known.
    pub fn node(&self) -> Option<&str> {
        self.field(NODE_FIELD)
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }

    /// Get the data needed to render a user-facing diagnostic.
    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            kind: self.kind(),
            pass: self.pass().map(|s| s.to_string()),
            node: self.node().map(|s| s.to_string()),
            message: self.message().to_string(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        if !self.inner.fields.is_empty() {
            write!(f, " (")?;
            for (idx, (name, value)) in self.inner.fields.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}: {value}")?;
            }
            write!(f, ")")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace: {}", self.inner.backtrace)?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Pure data describing an error at the point of detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub pass: Option<String>,
    pub node: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(pass) = &self.pass {
            write!(f, " [{pass}]")?;
        }
        if let Some(node) = &self.node {
            write!(f, " at '{node}'")?;
        }
        Ok(())
    }
}

pub trait ResultExt<T> {
    /// Wrap an error with an outer message, keeping the kind and fields of the
    /// original error.
    fn context(self, msg: &'static str) -> Result<T>;

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| wrap_with_context(e, msg.to_string()))
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| wrap_with_context(e, f()))
    }
}

fn wrap_with_context(mut err: DbError, msg: String) -> DbError {
    err.inner.msg = format!("{msg}: {}", err.inner.msg);
    err
}

pub trait OptionExt<T> {
    /// Return an internal error with the given message if the option is none.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::new(msg)),
        }
    }
}

/// Return an internal error for something we deliberately don't handle yet.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::DbError::new(format!("Not yet implemented: {}", format!($($arg)*))))
    };
}
