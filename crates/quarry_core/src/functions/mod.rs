//! Database functions that can be called from query expressions.
//!
//! A function is identified by the method it is exposed through. Each
//! function may have multiple overloads, resolved against the argument types
//! at the call site.

pub mod catalog;
pub mod executor;
pub mod implicit;

use std::fmt;

use implicit::{ANY_SCORE, implicit_cast_score};
use quarry_error::{DbError, ErrorKind, Result};
use serde::{Deserialize, Serialize};

use crate::datatype::{DataType, DataTypeId};
use crate::operators::MethodRef;

/// Whether a function returns a single value or a set of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Scalar,
    TableValued,
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Expected positional input argument types for this signature.
    pub positional_args: Vec<DataTypeId>,

    /// Type of the variadic args if this function is variadic.
    #[serde(default)]
    pub variadic_arg: Option<DataTypeId>,

    /// The concrete return type.
    ///
    /// Table-valued functions return a deferred query.
    pub return_type: DataType,
}

impl Signature {
    pub fn new(positional_args: impl Into<Vec<DataTypeId>>, return_type: DataType) -> Self {
        Signature {
            positional_args: positional_args.into(),
            variadic_arg: None,
            return_type,
        }
    }

    pub const fn is_variadic(&self) -> bool {
        self.variadic_arg.is_some()
    }

    fn arity_matches(&self, num_inputs: usize) -> bool {
        if self.is_variadic() {
            num_inputs >= self.positional_args.len()
        } else {
            num_inputs == self.positional_args.len()
        }
    }

    /// Expected type for the input at `idx`.
    fn expected_at(&self, idx: usize) -> Option<DataTypeId> {
        self.positional_args.get(idx).copied().or(self.variadic_arg)
    }

    /// Return if inputs given data types exactly satisfy the signature.
    pub fn exact_match(&self, inputs: &[DataType]) -> bool {
        if !self.arity_matches(inputs.len()) {
            return false;
        }

        inputs.iter().enumerate().all(|(idx, have)| {
            match self.expected_at(idx) {
                // Any is never an exact match, always goes through candidate
                // scoring.
                Some(DataTypeId::Any) | None => false,
                Some(expected) => have.datatype_id() == expected,
            }
        })
    }

    /// Score the signature for inputs that require implicit casts.
    ///
    /// Returns None if any input can't be cast.
    pub fn candidate_score(&self, inputs: &[DataType]) -> Option<u32> {
        if !self.arity_matches(inputs.len()) {
            return None;
        }

        let mut score = 0;
        for (idx, have) in inputs.iter().enumerate() {
            score += match self.expected_at(idx)? {
                DataTypeId::Any => ANY_SCORE,
                expected => implicit_cast_score(have.datatype_id(), expected)?,
            };
        }
        Some(score)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, arg) in self.positional_args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        if let Some(variadic) = self.variadic_arg {
            if !self.positional_args.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "{variadic}...")?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}

/// A single function overload as known by the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbFunctionDescriptor {
    /// Name of the function in SQL.
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub kind: FunctionKind,
    pub signature: Signature,
}

impl DbFunctionDescriptor {
    pub fn scalar(name: impl Into<String>, signature: Signature) -> Self {
        DbFunctionDescriptor {
            name: name.into(),
            schema: None,
            kind: FunctionKind::Scalar,
            signature,
        }
    }

    pub fn table_valued(name: impl Into<String>, signature: Signature) -> Self {
        DbFunctionDescriptor {
            name: name.into(),
            schema: None,
            kind: FunctionKind::TableValued,
            signature,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub const fn is_table_valued(&self) -> bool {
        matches!(self.kind, FunctionKind::TableValued)
    }

    pub fn return_type(&self) -> &DataType {
        &self.signature.return_type
    }

    /// Qualified SQL name.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// All overloads of a function exposed through a single method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbFunctionSet {
    /// Method identity. Generic arguments are ignored.
    pub method: MethodRef,
    pub overloads: Vec<DbFunctionDescriptor>,
}

impl DbFunctionSet {
    /// Pick the overload for the given argument types.
    ///
    /// An exact match wins. Otherwise the overload with the best implicit
    /// cast score is used, and a tie for the best score is an error.
    pub fn resolve(&self, inputs: &[DataType]) -> Result<&DbFunctionDescriptor> {
        if let Some(exact) = self
            .overloads
            .iter()
            .find(|f| f.signature.exact_match(inputs))
        {
            return Ok(exact);
        }

        let mut best: Option<(u32, &DbFunctionDescriptor)> = None;
        let mut tied = false;
        for overload in &self.overloads {
            let Some(score) = overload.signature.candidate_score(inputs) else {
                continue;
            };
            match best {
                Some((best_score, _)) if score < best_score => (),
                Some((best_score, _)) if score == best_score => tied = true,
                _ => {
                    best = Some((score, overload));
                    tied = false;
                }
            }
        }

        let input_list = inputs
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        match best {
            Some((_, overload)) if !tied => Ok(overload),
            Some(_) => Err(DbError::with_kind(
                ErrorKind::UnresolvedFunctionOverload,
                format!(
                    "Ambiguous call to {} with inputs ({input_list})",
                    self.method
                ),
            )),
            None => {
                let candidates = self
                    .overloads
                    .iter()
                    .map(|f| f.signature.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(DbError::with_kind(
                    ErrorKind::UnresolvedFunctionOverload,
                    format!(
                        "No overload of {} accepts inputs ({input_list})",
                        self.method
                    ),
                )
                .with_field("candidates", candidates))
            }
        }
    }
}
