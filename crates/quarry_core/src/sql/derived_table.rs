use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::Result;

use super::{QuerySourceAlias, TableExpression, TableExpressionVisitor};
use crate::datatype::DataType;
use crate::expr::ExprRef;
use crate::expr::extension::{ExtensionNode, check_children_len, eq_downcast, hash_with_name};

/// A subquery used as a row source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedTableExpr {
    pub alias: QuerySourceAlias,
    pub subquery: ExprRef,
}

impl TableExpression for DerivedTableExpr {
    fn alias(&self) -> QuerySourceAlias {
        self.alias
    }

    fn accept(&self, visitor: &mut dyn TableExpressionVisitor) -> Result<()> {
        visitor.visit_derived_table(self)
    }
}

impl ExtensionNode for DerivedTableExpr {
    fn name(&self) -> &'static str {
        "DerivedTable"
    }

    fn datatype(&self) -> DataType {
        self.subquery.datatype()
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![&self.subquery]
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        check_children_len(self.name(), &children, 1)?;
        let mut children = children;
        Ok(Box::new(DerivedTableExpr {
            alias: self.alias,
            subquery: children.remove(0),
        }))
    }

    fn child_is_row_source(&self, idx: usize) -> bool {
        idx == 0
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
        write!(f, "({}) AS {}", self.subquery, self.alias)
    }
}
