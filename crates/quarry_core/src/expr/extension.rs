use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};

use dyn_clone::DynClone;
use quarry_error::Result;

use super::ExprRef;
use crate::datatype::DataType;
use crate::sql::TableExpression;

/// A node kind defined outside the core expression set.
///
/// SQL-specific nodes (tables, functions, joins) are added through this
/// trait. The generic visitor reaches an extension's children through
/// `children` and `with_new_children`, so passes that don't know about a
/// node still traverse it.
pub trait ExtensionNode: Debug + Sync + Send + DynClone {
    /// Name of the node kind, used in diagnostics.
    fn name(&self) -> &'static str;

    fn datatype(&self) -> DataType;

    /// Child expressions in a fixed order.
    fn children(&self) -> Vec<&ExprRef>;

    /// Rebuild this node with new children, in the same order as
    /// `children`.
    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>>;

    /// Whether the child at `idx` is a row source rather than a scalar.
    fn child_is_row_source(&self, _idx: usize) -> bool {
        false
    }

    /// Get the node as a table expression if it is one.
    fn as_table_expression(&self) -> Option<&dyn TableExpression> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn eq_node(&self, other: &dyn ExtensionNode) -> bool;

    fn hash_node(&self, state: &mut dyn Hasher);

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Helper for implementing `eq_node` for nodes that implement `PartialEq`.
pub fn eq_downcast<T: PartialEq + 'static>(this: &T, other: &dyn ExtensionNode) -> bool {
    other
        .as_any()
        .downcast_ref::<T>()
        .is_some_and(|other| other == this)
}

/// Helper for implementing `hash_node` for nodes that implement `Hash`.
pub fn hash_with_name<T: Hash>(name: &'static str, this: &T, mut state: &mut dyn Hasher) {
    name.hash(&mut state);
    this.hash(&mut state);
}

/// Check that a node got the number of children it expects.
pub fn check_children_len(node: &'static str, children: &[ExprRef], expected: usize) -> Result<()> {
    if children.len() != expected {
        return Err(quarry_error::DbError::new(format!(
            "Expected {expected} children for {node}, got {}",
            children.len()
        )));
    }
    Ok(())
}

impl Clone for Box<dyn ExtensionNode> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

impl PartialEq<dyn ExtensionNode> for Box<dyn ExtensionNode + '_> {
    fn eq(&self, other: &dyn ExtensionNode) -> bool {
        self.as_ref() == other
    }
}

impl PartialEq for dyn ExtensionNode + '_ {
    fn eq(&self, other: &dyn ExtensionNode) -> bool {
        self.name() == other.name() && self.eq_node(other)
    }
}

impl Eq for dyn ExtensionNode {}

impl Hash for dyn ExtensionNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_node(state)
    }
}

impl fmt::Display for dyn ExtensionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f)
    }
}
