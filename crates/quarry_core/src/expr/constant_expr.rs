use std::fmt;

use super::scalar::{ConstantValue, ScalarValue};
use crate::datatype::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantExpr {
    pub value: ConstantValue,
    pub datatype: DataType,
}

impl ConstantExpr {
    /// Create a scalar literal with its natural data type.
    pub fn scalar(value: impl Into<ScalarValue>) -> Self {
        let value = value.into();
        let datatype = value.datatype();
        ConstantExpr {
            value: ConstantValue::Scalar(value),
            datatype,
        }
    }

    /// Create a literal null with an explicit type.
    pub fn typed_null(datatype: DataType) -> Self {
        ConstantExpr {
            value: ConstantValue::Scalar(ScalarValue::Null),
            datatype,
        }
    }

    pub const fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

impl fmt::Display for ConstantExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
