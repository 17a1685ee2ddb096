use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical result shape of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Boolean,
    Int32,
    Int64,
    Float64,
    Decimal,
    Utf8,
    Timestamp,
    /// A mapped entity type, by name.
    Entity(String),
    /// In-memory sequence of elements.
    Sequence(Box<DataType>),
    /// Deferred query producing elements.
    Queryable(Box<DataType>),
    /// Result of an object construction.
    Anonymous(Vec<(String, DataType)>),
    /// Shape of a lambda.
    Function {
        params: Vec<DataType>,
        ret: Box<DataType>,
    },
}

/// Id for a data type, ignoring any nested type information.
///
/// Used in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataTypeId {
    /// Matches any type when used in a signature.
    Any,
    Null,
    Boolean,
    Int32,
    Int64,
    Float64,
    Decimal,
    Utf8,
    Timestamp,
    Entity,
    Sequence,
    Queryable,
    Anonymous,
    Function,
}

impl DataType {
    pub fn sequence(element: DataType) -> Self {
        DataType::Sequence(Box::new(element))
    }

    pub fn queryable(element: DataType) -> Self {
        DataType::Queryable(Box::new(element))
    }

    pub fn entity(name: impl Into<String>) -> Self {
        DataType::Entity(name.into())
    }

    pub fn datatype_id(&self) -> DataTypeId {
        match self {
            Self::Null => DataTypeId::Null,
            Self::Boolean => DataTypeId::Boolean,
            Self::Int32 => DataTypeId::Int32,
            Self::Int64 => DataTypeId::Int64,
            Self::Float64 => DataTypeId::Float64,
            Self::Decimal => DataTypeId::Decimal,
            Self::Utf8 => DataTypeId::Utf8,
            Self::Timestamp => DataTypeId::Timestamp,
            Self::Entity(_) => DataTypeId::Entity,
            Self::Sequence(_) => DataTypeId::Sequence,
            Self::Queryable(_) => DataTypeId::Queryable,
            Self::Anonymous(_) => DataTypeId::Anonymous,
            Self::Function { .. } => DataTypeId::Function,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, DataType::Null)
    }

    /// Returns the entity name if this is an entity type.
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            Self::Entity(name) => Some(name),
            _ => None,
        }
    }

    pub const fn is_queryable(&self) -> bool {
        matches!(self, DataType::Queryable(_))
    }

    /// If this is either an in-memory or deferred sequence.
    pub const fn is_sequence_like(&self) -> bool {
        matches!(self, DataType::Sequence(_) | DataType::Queryable(_))
    }

    /// Element type for sequence-like types.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            Self::Sequence(elem) | Self::Queryable(elem) => Some(elem),
            _ => None,
        }
    }

    /// Return type of a function shape.
    pub fn return_type(&self) -> Option<&DataType> {
        match self {
            Self::Function { ret, .. } => Some(ret),
            _ => None,
        }
    }

    /// Turn an in-memory sequence type into a deferred one. Other types are
    /// returned as-is.
    pub fn into_queryable(self) -> Self {
        match self {
            Self::Sequence(elem) => Self::Queryable(elem),
            other => other,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float64 => write!(f, "Float64"),
            Self::Decimal => write!(f, "Decimal"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::Timestamp => write!(f, "Timestamp"),
            Self::Entity(name) => write!(f, "{name}"),
            Self::Sequence(elem) => write!(f, "Sequence<{elem}>"),
            Self::Queryable(elem) => write!(f, "Queryable<{elem}>"),
            Self::Anonymous(fields) => {
                write!(f, "{{")?;
                for (idx, (name, datatype)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {datatype}")?;
                }
                write!(f, "}}")
            }
            Self::Function { params, ret } => {
                write!(f, "Fn(")?;
                for (idx, param) in params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

impl fmt::Display for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_queryable_only_changes_sequences() {
        let seq = DataType::sequence(DataType::Int32);
        assert_eq!(DataType::queryable(DataType::Int32), seq.into_queryable());
        assert_eq!(DataType::Utf8, DataType::Utf8.into_queryable());
    }

    #[test]
    fn display_nested() {
        let dt = DataType::queryable(DataType::Anonymous(vec![
            ("a".to_string(), DataType::Int32),
            ("b".to_string(), DataType::entity("Order")),
        ]));
        assert_eq!("Queryable<{a: Int32, b: Order}>", dt.to_string());
    }
}
