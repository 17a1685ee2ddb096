use quarry_error::Result;

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::binary_expr::BinaryOperator;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::{self, ExprRef, Expression};
use crate::operators::{ENUMERABLE, QUERYABLE, call_operator};
use crate::visitor::{ExpressionVisitor, walk_children};

/// Rewrite quantifiers over a plain equality into membership tests.
///
/// `src.Any(x => x == v)` becomes `src.Contains(v)` and
/// `src.All(x => x != v)` becomes `!src.Contains(v)`, as long as `v` doesn't
/// depend on `x`. Entity-typed elements are left for entity equality
/// rewriting.
#[derive(Debug)]
pub struct AllAnyToContains;

impl QueryRewritePass for AllAnyToContains {
    fn name(&self) -> &'static str {
        "all_any_to_contains"
    }

    fn rewrite(&self, _state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        QuantifierRewriter.visit(expr)
    }
}

struct QuantifierRewriter;

impl ExpressionVisitor for QuantifierRewriter {
    fn visit_method_call(&mut self, expr: &ExprRef, _call: &MethodCallExpr) -> Result<ExprRef> {
        let expr = walk_children(self, expr)?;
        let rewritten = match expr.as_ref() {
            Expression::MethodCall(call) => rewrite_quantifier(call)?,
            _ => None,
        };
        Ok(rewritten.unwrap_or(expr))
    }
}

fn rewrite_quantifier(call: &MethodCallExpr) -> Result<Option<ExprRef>> {
    let owner = call.method.owner.as_str();
    if (owner != ENUMERABLE && owner != QUERYABLE) || call.args.len() != 2 {
        return Ok(None);
    }
    let wanted = match call.method.name.as_str() {
        "Any" => BinaryOperator::Eq,
        "All" => BinaryOperator::NotEq,
        _ => return Ok(None),
    };

    let Some(lambda) = call.args[1].try_as_lambda() else {
        return Ok(None);
    };
    let [element] = lambda.params.as_slice() else {
        return Ok(None);
    };
    if element.datatype.entity_name().is_some() {
        return Ok(None);
    }

    let Expression::Binary(binary) = lambda.body.as_ref() else {
        return Ok(None);
    };
    if binary.op != wanted {
        return Ok(None);
    }

    let Some(value) = compared_value(element, &binary.left, &binary.right)
        .or_else(|| compared_value(element, &binary.right, &binary.left))
    else {
        return Ok(None);
    };

    let contains = call_operator(owner, "Contains", vec![call.args[0].clone(), value.clone()])?;
    Ok(Some(match wanted {
        BinaryOperator::NotEq => expr::not(contains),
        _ => contains,
    }))
}

/// Get `value` if `element_side` is exactly the element parameter and
/// `value` doesn't reference it.
fn compared_value<'a>(
    element: &ParameterExpr,
    element_side: &ExprRef,
    value: &'a ExprRef,
) -> Option<&'a ExprRef> {
    match element_side.as_ref() {
        Expression::Parameter(p) if p == element && !value.references_parameter(element) => {
            Some(value)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datatype::DataType;
    use crate::expr::scalar::ScalarValue;
    use crate::functions::catalog::StaticFunctionCatalog;
    use crate::model::Model;
    use crate::testutil::{compiled, enumerable, get, quoted, queryable, row};

    fn rewrite(expr: &ExprRef) -> ExprRef {
        let model = Model::default();
        let catalog = StaticFunctionCatalog::new();
        let mut state = CompilationState::new(&model, &catalog);
        AllAnyToContains.rewrite(&mut state, expr).unwrap()
    }

    fn ids() -> ExprRef {
        expr::list(
            DataType::Int32,
            [ScalarValue::Int32(1), ScalarValue::Int32(2), ScalarValue::Int32(3)],
        )
    }

    #[test]
    fn any_equality_to_contains() {
        let o = row("o", "Order");
        let x = ParameterExpr::new("x", DataType::Int32);
        let order_id = get(&expr::param(&o), "Id");

        // ids.Any(x => x == o.Id) inside a filter.
        let any = enumerable(
            "Any",
            vec![
                ids(),
                compiled(&[&x], expr::eq(expr::param(&x), order_id.clone())),
            ],
        )
        .unwrap();
        let input = queryable("Where", vec![expr::entity_set("Order"), quoted(&[&o], any)]).unwrap();

        let contains = enumerable("Contains", vec![ids(), order_id]).unwrap();
        let expected = queryable(
            "Where",
            vec![expr::entity_set("Order"), quoted(&[&o], contains)],
        )
        .unwrap();

        assert_eq!(expected, rewrite(&input));
    }

    #[test]
    fn reversed_operands() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let input = enumerable(
            "Any",
            vec![ids(), compiled(&[&x], expr::eq(expr::lit(2), expr::param(&x)))],
        )
        .unwrap();
        let expected = enumerable("Contains", vec![ids(), expr::lit(2)]).unwrap();
        assert_eq!(expected, rewrite(&input));
    }

    #[test]
    fn all_inequality_to_not_contains() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let input = enumerable(
            "All",
            vec![ids(), compiled(&[&x], expr::not_eq(expr::param(&x), expr::lit(2)))],
        )
        .unwrap();
        let expected = expr::not(enumerable("Contains", vec![ids(), expr::lit(2)]).unwrap());
        assert_eq!(expected, rewrite(&input));
    }

    #[test]
    fn complex_predicate_untouched() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let body = expr::and(
            expr::eq(expr::param(&x), expr::lit(2)),
            expr::not_eq(expr::param(&x), expr::lit(3)),
        );
        let input = enumerable("Any", vec![ids(), compiled(&[&x], body)]).unwrap();
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));
    }

    #[test]
    fn all_with_equality_untouched() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let input = enumerable(
            "All",
            vec![ids(), compiled(&[&x], expr::eq(expr::param(&x), expr::lit(2)))],
        )
        .unwrap();
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));
    }

    #[test]
    fn value_depending_on_element_untouched() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let body = expr::eq(
            expr::param(&x),
            expr::binary(BinaryOperator::Add, expr::param(&x), expr::lit(0)),
        );
        let input = enumerable("Any", vec![ids(), compiled(&[&x], body)]).unwrap();
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));
    }

    #[test]
    fn queryable_source_keeps_owner() {
        let o = row("o", "Order");
        let totals = queryable(
            "Select",
            vec![
                expr::entity_set("Order"),
                quoted(&[&o], get(&expr::param(&o), "Id")),
            ],
        )
        .unwrap();
        let x = ParameterExpr::new("x", DataType::Int32);
        let input = queryable(
            "Any",
            vec![
                totals.clone(),
                quoted(&[&x], expr::eq(expr::param(&x), expr::lit(7))),
            ],
        )
        .unwrap();

        let expected = queryable("Contains", vec![totals, expr::lit(7)]).unwrap();
        assert_eq!(expected, rewrite(&input));
    }
}
