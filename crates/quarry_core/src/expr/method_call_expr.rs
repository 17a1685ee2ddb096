use std::fmt;

use super::ExprRef;
use crate::datatype::DataType;
use crate::operators::MethodRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodCallExpr {
    pub method: MethodRef,
    /// Receiver for instance methods.
    pub object: Option<ExprRef>,
    pub args: Vec<ExprRef>,
    pub datatype: DataType,
}

impl MethodCallExpr {
    /// Check if this calls the method `name` on `owner`.
    pub fn is_method(&self, owner: &str, name: &str) -> bool {
        self.method.owner == owner && self.method.name == name
    }
}

impl fmt::Display for MethodCallExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object {
            Some(object) => write!(f, "{object}.{}(", self.method.name)?,
            None => write!(f, "{}.{}(", self.method.owner, self.method.name)?,
        }
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}
