use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::Result;

use super::QuerySourceAlias;
use crate::datatype::DataType;
use crate::expr::ExprRef;
use crate::expr::extension::{ExtensionNode, check_children_len, eq_downcast, hash_with_name};

/// Reference to the current row of an aliased row source.
///
/// Member accesses on this node read columns of that source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRefExpr {
    pub alias: QuerySourceAlias,
    pub entity: String,
}

impl ExtensionNode for SourceRefExpr {
    fn name(&self) -> &'static str {
        "SourceRef"
    }

    fn datatype(&self) -> DataType {
        DataType::entity(&self.entity)
    }

    fn children(&self) -> Vec<&ExprRef> {
        Vec::new()
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        check_children_len(self.name(), &children, 0)?;
        Ok(Box::new(self.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_node(&self, other: &dyn ExtensionNode) -> bool {
        eq_downcast(self, other)
    }

    fn hash_node(&self, state: &mut dyn Hasher) {
        hash_with_name(self.name(), self, state)
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias)
    }
}
