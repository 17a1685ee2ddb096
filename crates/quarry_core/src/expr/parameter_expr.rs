use std::fmt;

use crate::datatype::DataType;

/// A named, typed placeholder.
///
/// Used both for lambda parameters and for extracted query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterExpr {
    pub name: String,
    pub datatype: DataType,
}

impl ParameterExpr {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        ParameterExpr {
            name: name.into(),
            datatype,
        }
    }
}

impl fmt::Display for ParameterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Value bound to a named query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryParameter {
    pub name: String,
    pub value: super::scalar::ConstantValue,
}
