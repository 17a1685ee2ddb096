use std::fmt;

use super::ExprRef;
use crate::datatype::DataType;

/// Access of a named property or navigation on a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberExpr {
    pub target: ExprRef,
    pub member: String,
    pub datatype: DataType,
}

impl fmt::Display for MemberExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.member)
    }
}
