use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::Result;

use super::{QuerySourceAlias, TableExpression, TableExpressionVisitor};
use crate::datatype::DataType;
use crate::expr::ExprRef;
use crate::expr::extension::{ExtensionNode, check_children_len, eq_downcast, hash_with_name};

/// A mapped table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseTableExpr {
    pub alias: QuerySourceAlias,
    pub table: String,
    pub schema: Option<String>,
    /// Entity type stored in the table.
    pub entity: String,
}

impl TableExpression for BaseTableExpr {
    fn alias(&self) -> QuerySourceAlias {
        self.alias
    }

    fn accept(&self, visitor: &mut dyn TableExpressionVisitor) -> Result<()> {
        visitor.visit_base_table(self)
    }
}

impl ExtensionNode for BaseTableExpr {
    fn name(&self) -> &'static str {
        "BaseTable"
    }

    fn datatype(&self) -> DataType {
        DataType::queryable(DataType::entity(&self.entity))
    }

    fn children(&self) -> Vec<&ExprRef> {
        Vec::new()
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        check_children_len(self.name(), &children, 0)?;
        Ok(Box::new(self.clone()))
    }

    fn as_table_expression(&self) -> Option<&dyn TableExpression> {
        Some(self)
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
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{} AS {}", self.table, self.alias),
            None => write!(f, "{} AS {}", self.table, self.alias),
        }
    }
}
