//! Nodes that only exist once a query is lowered towards SQL.
//!
//! All nodes here plug into the core tree through `ExtensionNode`. Table
//! expressions additionally implement `TableExpression` so SQL generation can
//! dispatch on the row source kind.

pub mod base_table;
pub mod derived_table;
pub mod function_call;
pub mod navigation_join;
pub mod pivot;
pub mod source_ref;
pub mod table_function;

use std::fmt;

use quarry_error::Result;

use self::base_table::BaseTableExpr;
use self::derived_table::DerivedTableExpr;
use self::pivot::PivotTableExpr;
use self::table_function::TableValuedFunctionExpr;
use crate::expr::Expression;

/// Identity of a row source.
///
/// Aliases are handed out per compilation in creation order, so the same
/// query always gets the same aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySourceAlias(pub u32);

impl fmt::Display for QuerySourceAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A node that appears as a row source.
pub trait TableExpression: fmt::Debug {
    fn alias(&self) -> QuerySourceAlias;

    /// Dispatch to the visitor method for this table kind.
    fn accept(&self, visitor: &mut dyn TableExpressionVisitor) -> Result<()>;
}

/// Callbacks for each kind of table expression.
pub trait TableExpressionVisitor {
    fn visit_base_table(&mut self, table: &BaseTableExpr) -> Result<()>;
    fn visit_derived_table(&mut self, table: &DerivedTableExpr) -> Result<()>;
    fn visit_table_valued_function(&mut self, table: &TableValuedFunctionExpr) -> Result<()>;
    fn visit_pivot_table(&mut self, table: &PivotTableExpr) -> Result<()>;
}

/// Get the table expression for a node, if it is one.
pub fn try_as_table_expression(expr: &Expression) -> Option<&dyn TableExpression> {
    match expr {
        Expression::Extension(node) => node.as_table_expression(),
        _ => None,
    }
}
