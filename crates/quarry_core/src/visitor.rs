use std::sync::Arc;

use quarry_error::Result;

use crate::expr::binary_expr::BinaryExpr;
use crate::expr::conditional_expr::ConditionalExpr;
use crate::expr::constant_expr::ConstantExpr;
use crate::expr::extension::ExtensionNode;
use crate::expr::lambda_expr::{InvokeExpr, LambdaExpr, QuoteExpr};
use crate::expr::member_expr::MemberExpr;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::new_expr::NewExpr;
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::unary_expr::UnaryExpr;
use crate::expr::{ExprRef, Expression};

/// Rewriting visitor over expression trees.
///
/// Every `visit_*` method gets the shared node along with the typed node
/// data, and returns the node to use in its place. The defaults visit all
/// children and return the original node unchanged if no child changed,
/// which keeps untouched subtrees shared between input and output.
///
/// Implementations override only the node kinds they care about.
pub trait ExpressionVisitor {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        dispatch(self, expr)
    }

    fn visit_constant(&mut self, expr: &ExprRef, _constant: &ConstantExpr) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_parameter(&mut self, expr: &ExprRef, _param: &ParameterExpr) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_method_call(&mut self, expr: &ExprRef, _call: &MethodCallExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_member(&mut self, expr: &ExprRef, _member: &MemberExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_lambda(&mut self, expr: &ExprRef, _lambda: &LambdaExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_quote(&mut self, expr: &ExprRef, _quote: &QuoteExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_invoke(&mut self, expr: &ExprRef, _invoke: &InvokeExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_unary(&mut self, expr: &ExprRef, _unary: &UnaryExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_binary(&mut self, expr: &ExprRef, _binary: &BinaryExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_conditional(&mut self, expr: &ExprRef, _cond: &ConditionalExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_new(&mut self, expr: &ExprRef, _new: &NewExpr) -> Result<ExprRef> {
        walk_children(self, expr)
    }

    fn visit_extension(
        &mut self,
        expr: &ExprRef,
        _node: &dyn ExtensionNode,
    ) -> Result<ExprRef> {
        walk_children(self, expr)
    }
}

/// Route a node to the matching `visit_*` method.
pub fn dispatch<V>(visitor: &mut V, expr: &ExprRef) -> Result<ExprRef>
where
    V: ExpressionVisitor + ?Sized,
{
    match expr.as_ref() {
        Expression::Constant(constant) => visitor.visit_constant(expr, constant),
        Expression::Parameter(param) => visitor.visit_parameter(expr, param),
        Expression::MethodCall(call) => visitor.visit_method_call(expr, call),
        Expression::Member(member) => visitor.visit_member(expr, member),
        Expression::Lambda(lambda) => visitor.visit_lambda(expr, lambda),
        Expression::Quote(quote) => visitor.visit_quote(expr, quote),
        Expression::Invoke(invoke) => visitor.visit_invoke(expr, invoke),
        Expression::Unary(unary) => visitor.visit_unary(expr, unary),
        Expression::Binary(binary) => visitor.visit_binary(expr, binary),
        Expression::Conditional(cond) => visitor.visit_conditional(expr, cond),
        Expression::New(new) => visitor.visit_new(expr, new),
        Expression::Extension(node) => visitor.visit_extension(expr, node.as_ref()),
    }
}

/// Visit every child of `expr`, rebuilding the node only if at least one
/// child was replaced.
pub fn walk_children<V>(visitor: &mut V, expr: &ExprRef) -> Result<ExprRef>
where
    V: ExpressionVisitor + ?Sized,
{
    let children = expr.children();
    if children.is_empty() {
        return Ok(expr.clone());
    }

    let mut changed = false;
    let mut new_children = Vec::with_capacity(children.len());
    for child in children {
        let new_child = visitor.visit(child)?;
        changed |= !Arc::ptr_eq(child, &new_child);
        new_children.push(new_child);
    }

    if !changed {
        return Ok(expr.clone());
    }

    Ok(Arc::new(expr.with_new_children(new_children)?))
}

/// Replace the children of `expr` with the given nodes, reusing `expr` if
/// every new child is the same node as the old one.
pub fn rebuild_if_changed(expr: &ExprRef, new_children: Vec<ExprRef>) -> Result<ExprRef> {
    let unchanged = expr
        .children()
        .iter()
        .zip(new_children.iter())
        .all(|(old, new)| Arc::ptr_eq(old, new));
    if unchanged && expr.children().len() == new_children.len() {
        return Ok(expr.clone());
    }
    Ok(Arc::new(expr.with_new_children(new_children)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::expr;

    /// Replaces integer literal 1 with 2.
    struct ReplaceOnes;

    impl ExpressionVisitor for ReplaceOnes {
        fn visit_constant(&mut self, expr: &ExprRef, constant: &ConstantExpr) -> Result<ExprRef> {
            if constant == &ConstantExpr::scalar(1) {
                return Ok(expr::lit(2));
            }
            Ok(expr.clone())
        }
    }

    #[test]
    fn unchanged_tree_is_shared() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let tree = expr::lambda(vec![x.clone()], expr::eq(expr::param(&x), expr::lit(5)));
        let out = ReplaceOnes.visit(&tree).unwrap();
        assert!(Arc::ptr_eq(&tree, &out));
    }

    #[test]
    fn only_changed_path_rebuilt() {
        let left = expr::eq(expr::lit(3), expr::lit(4));
        let right = expr::eq(expr::lit(1), expr::lit(4));
        let tree = expr::and(left.clone(), right);

        let out = ReplaceOnes.visit(&tree).unwrap();
        assert_eq!("((3 == 4) AND (2 == 4))", out.to_string());

        let Expression::Binary(binary) = out.as_ref() else {
            panic!("expected binary");
        };
        assert!(Arc::ptr_eq(&left, &binary.left));
    }

    #[test]
    fn rebuild_if_changed_reuses() {
        let tree = expr::and(expr::lit(true), expr::lit(false));
        let children: Vec<_> = tree.children().into_iter().cloned().collect();
        let out = rebuild_if_changed(&tree, children).unwrap();
        assert!(Arc::ptr_eq(&tree, &out));
    }
}
