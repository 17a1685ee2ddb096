use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::Result;

use super::QuerySourceAlias;
use crate::datatype::DataType;
use crate::expr::ExprRef;
use crate::expr::extension::{ExtensionNode, check_children_len, eq_downcast, hash_with_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    /// Standard INNER join.
    Inner,
    /// Standard LEFT join.
    LeftOuter,
}

/// Join of a row source with the target table of a to-one navigation.
///
/// Rows keep the shape of the outer source. Columns of the joined table are
/// read through `SourceRef` nodes carrying the join's alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationJoinExpr {
    pub alias: QuerySourceAlias,
    /// Name of the navigation that produced the join.
    pub navigation: String,
    pub kind: JoinKind,
    pub outer: ExprRef,
    pub inner: ExprRef,
    /// Lambda over an outer row.
    pub outer_key: ExprRef,
    /// Lambda over an inner row.
    pub inner_key: ExprRef,
}

impl ExtensionNode for NavigationJoinExpr {
    fn name(&self) -> &'static str {
        "NavigationJoin"
    }

    fn datatype(&self) -> DataType {
        self.outer.datatype()
    }

    fn children(&self) -> Vec<&ExprRef> {
        vec![&self.outer, &self.inner, &self.outer_key, &self.inner_key]
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        check_children_len(self.name(), &children, 4)?;
        let [outer, inner, outer_key, inner_key]: [ExprRef; 4] = match children.try_into() {
            Ok(children) => children,
            Err(_) => return Err(quarry_error::DbError::new("Invalid join children")),
        };
        Ok(Box::new(NavigationJoinExpr {
            alias: self.alias,
            navigation: self.navigation.clone(),
            kind: self.kind,
            outer,
            inner,
            outer_key,
            inner_key,
        }))
    }

    fn child_is_row_source(&self, idx: usize) -> bool {
        idx < 2
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
        let join = match self.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::LeftOuter => "LEFT JOIN",
        };
        write!(
            f,
            "{} {join} {} ON {} = {}",
            self.outer, self.inner, self.outer_key, self.inner_key
        )
    }
}
