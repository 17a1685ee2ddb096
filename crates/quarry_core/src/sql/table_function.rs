use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::Result;

use super::function_call::FunctionCallExpr;
use super::{QuerySourceAlias, TableExpression, TableExpressionVisitor};
use crate::datatype::DataType;
use crate::expr::ExprRef;
use crate::expr::extension::{ExtensionNode, check_children_len, eq_downcast, hash_with_name};

/// A table-valued function call used as a row source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableValuedFunctionExpr {
    pub alias: QuerySourceAlias,
    pub call: FunctionCallExpr,
}

impl TableExpression for TableValuedFunctionExpr {
    fn alias(&self) -> QuerySourceAlias {
        self.alias
    }

    fn accept(&self, visitor: &mut dyn TableExpressionVisitor) -> Result<()> {
        visitor.visit_table_valued_function(self)
    }
}

impl ExtensionNode for TableValuedFunctionExpr {
    fn name(&self) -> &'static str {
        "TableValuedFunction"
    }

    fn datatype(&self) -> DataType {
        self.call.function.return_type().clone()
    }

    fn children(&self) -> Vec<&ExprRef> {
        self.call.args.iter().collect()
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        check_children_len(self.name(), &children, self.call.args.len())?;
        Ok(Box::new(TableValuedFunctionExpr {
            alias: self.alias,
            call: FunctionCallExpr {
                function: self.call.function.clone(),
                args: children,
            },
        }))
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
        self.call.fmt_node(f)?;
        write!(f, " AS {}", self.alias)
    }
}
