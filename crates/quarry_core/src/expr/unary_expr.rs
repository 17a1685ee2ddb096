use std::fmt;

use super::ExprRef;
use crate::datatype::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnaryExpr {
    pub op: UnaryOperator,
    pub expr: ExprRef,
}

impl UnaryExpr {
    pub fn datatype(&self) -> DataType {
        match self.op {
            UnaryOperator::Negate => self.expr.datatype(),
            UnaryOperator::Not | UnaryOperator::IsNull | UnaryOperator::IsNotNull => {
                DataType::Boolean
            }
        }
    }
}

impl fmt::Display for UnaryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            UnaryOperator::Not => write!(f, "NOT {}", self.expr),
            UnaryOperator::Negate => write!(f, "-{}", self.expr),
            UnaryOperator::IsNull => write!(f, "{} IS NULL", self.expr),
            UnaryOperator::IsNotNull => write!(f, "{} IS NOT NULL", self.expr),
        }
    }
}
