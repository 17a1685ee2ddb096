use std::fmt;

use super::parameter_expr::ParameterExpr;
use super::{ExprRef, Expression};
use crate::datatype::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LambdaExpr {
    pub params: Vec<ParameterExpr>,
    pub body: ExprRef,
}

impl LambdaExpr {
    pub fn datatype(&self) -> DataType {
        DataType::Function {
            params: self.params.iter().map(|p| p.datatype.clone()).collect(),
            ret: Box::new(self.body.datatype()),
        }
    }
}

impl fmt::Display for LambdaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.len() == 1 {
            write!(f, "{} => {}", self.params[0], self.body)
        } else {
            write!(f, "(")?;
            for (idx, param) in self.params.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{param}")?;
            }
            write!(f, ") => {}", self.body)
        }
    }
}

/// A lambda kept as data instead of as a compiled delegate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteExpr {
    pub lambda: ExprRef,
}

impl QuoteExpr {
    /// Get the quoted lambda.
    pub fn try_as_lambda(&self) -> Option<&LambdaExpr> {
        match self.lambda.as_ref() {
            Expression::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quote({})", self.lambda)
    }
}

/// Application of a callee to arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokeExpr {
    pub callee: ExprRef,
    pub args: Vec<ExprRef>,
    pub datatype: DataType,
}

impl fmt::Display for InvokeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invoke({}", self.callee)?;
        for arg in &self.args {
            write!(f, ", {arg}")?;
        }
        write!(f, ")")
    }
}
