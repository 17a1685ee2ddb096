use std::fmt;

use super::ExprRef;
use crate::datatype::DataType;

/// Construction of an anonymous object from named members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewExpr {
    pub members: Vec<(String, ExprRef)>,
}

impl NewExpr {
    pub fn datatype(&self) -> DataType {
        DataType::Anonymous(
            self.members
                .iter()
                .map(|(name, expr)| (name.clone(), expr.datatype()))
                .collect(),
        )
    }

    pub fn member(&self, name: &str) -> Option<&ExprRef> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }
}

impl fmt::Display for NewExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new {{ ")?;
        for (idx, (name, expr)) in self.members.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name} = {expr}")?;
        }
        write!(f, " }}")
    }
}
