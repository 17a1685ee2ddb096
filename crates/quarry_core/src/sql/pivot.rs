use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::{DbError, Result};

use super::{QuerySourceAlias, TableExpression, TableExpressionVisitor};
use crate::datatype::DataType;
use crate::expr::ExprRef;
use crate::expr::extension::{ExtensionNode, eq_downcast, hash_with_name};

/// Rotates distinct values of a key into columns, aggregating each group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PivotTableExpr {
    pub alias: QuerySourceAlias,
    pub source: ExprRef,
    /// Lambda selecting the pivot key from a source row.
    pub pivot_key: ExprRef,
    /// Lambda aggregating a group of source rows.
    pub aggregate: ExprRef,
    /// Optional lambda shaping the result from key and aggregate.
    pub result_selector: Option<ExprRef>,
}

impl PivotTableExpr {
    fn lambda_return(expr: &ExprRef) -> DataType {
        expr.try_as_lambda()
            .map(|l| l.body.datatype())
            .unwrap_or(DataType::Null)
    }
}

impl TableExpression for PivotTableExpr {
    fn alias(&self) -> QuerySourceAlias {
        self.alias
    }

    fn accept(&self, visitor: &mut dyn TableExpressionVisitor) -> Result<()> {
        visitor.visit_pivot_table(self)
    }
}

impl ExtensionNode for PivotTableExpr {
    fn name(&self) -> &'static str {
        "PivotTable"
    }

    fn datatype(&self) -> DataType {
        match &self.result_selector {
            Some(selector) => DataType::queryable(Self::lambda_return(selector)),
            None => DataType::queryable(DataType::Anonymous(vec![
                ("Key".to_string(), Self::lambda_return(&self.pivot_key)),
                ("Value".to_string(), Self::lambda_return(&self.aggregate)),
            ])),
        }
    }

    fn children(&self) -> Vec<&ExprRef> {
        let mut children = vec![&self.source, &self.pivot_key, &self.aggregate];
        if let Some(selector) = &self.result_selector {
            children.push(selector);
        }
        children
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        let expected = if self.result_selector.is_some() { 4 } else { 3 };
        if children.len() != expected {
            return Err(DbError::new(format!(
                "Expected {expected} children for pivot, got {}",
                children.len()
            )));
        }

        let mut children = children.into_iter();
        let mut next = || children.next().ok_or_else(|| DbError::new("Missing pivot child"));
        Ok(Box::new(PivotTableExpr {
            alias: self.alias,
            source: next()?,
            pivot_key: next()?,
            aggregate: next()?,
            result_selector: match self.result_selector {
                Some(_) => Some(next()?),
                None => None,
            },
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
        write!(
            f,
            "PIVOT({} ON {} AGG {}",
            self.source, self.pivot_key, self.aggregate
        )?;
        if let Some(selector) = &self.result_selector {
            write!(f, " SELECT {selector}")?;
        }
        write!(f, ") AS {}", self.alias)
    }
}
