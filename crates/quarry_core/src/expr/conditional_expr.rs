use std::fmt;

use super::ExprRef;
use crate::datatype::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionalExpr {
    pub test: ExprRef,
    pub then: ExprRef,
    pub else_expr: ExprRef,
    pub datatype: DataType,
}

impl fmt::Display for ConditionalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} ? {} : {})", self.test, self.then, self.else_expr)
    }
}
