use quarry_error::{DbError, ErrorKind, NODE_FIELD, PASS_FIELD, Result};

use crate::expr::scalar::ConstantValue;
use crate::expr::{ExprRef, Expression};
use crate::model::Model;

/// Name reported on verification errors.
pub const VERIFY_PASS_NAME: &str = "verify";

/// Check that a translated tree only contains normalized constructs.
///
/// Rejects invocations of compile-time known lambdas, equality between
/// entities, and navigation member accesses. Runs in pre-order and reports
/// the first offending node.
pub fn verify_normalized(model: &Model, expr: &ExprRef) -> Result<()> {
    if let Some(msg) = violation(model, expr) {
        return Err(DbError::with_kind(ErrorKind::UnsupportedExpressionShape, msg)
            .with_field(PASS_FIELD, VERIFY_PASS_NAME)
            .with_field(NODE_FIELD, expr));
    }
    for child in expr.children() {
        verify_normalized(model, child)?;
    }
    Ok(())
}

fn violation(model: &Model, expr: &ExprRef) -> Option<String> {
    match expr.as_ref() {
        Expression::Invoke(invoke) => {
            let inlinable = match invoke.callee.as_ref() {
                Expression::Lambda(_) | Expression::Quote(_) => true,
                Expression::Constant(c) => matches!(&c.value, ConstantValue::Delegate(d) if d.lambda.is_some()),
                _ => false,
            };
            inlinable.then(|| "Invocation of a known lambda was not inlined".to_string())
        }
        Expression::Binary(binary) if binary.op.is_equality() => {
            let left = binary.left.datatype();
            let right = binary.right.datatype();
            left.entity_name()
                .or(right.entity_name())
                .map(|entity| format!("Equality on entity type {entity} was not rewritten"))
        }
        Expression::Member(member) => {
            let target = member.target.datatype();
            let entity = target.entity_name()?;
            model
                .navigation(entity, &member.member)
                .map(|nav| format!("Navigation {entity}.{} was not expanded", nav.name))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::expr;
    use crate::testutil::{compiled, get, quoted, queryable, row, sample_model};

    #[test]
    fn normalized_tree_passes() {
        let model = sample_model();
        let o = row("o", "Order");
        let input = queryable(
            "Where",
            vec![
                expr::entity_set("Order"),
                quoted(&[&o], expr::eq(get(&expr::param(&o), "CustomerId"), expr::lit(3))),
            ],
        )
        .unwrap();
        verify_normalized(&model, &input).unwrap();
    }

    #[test]
    fn leftover_navigation_rejected() {
        let model = sample_model();
        let o = row("o", "Order");
        let input = get(&get(&expr::param(&o), "Customer"), "Name");
        let err = verify_normalized(&model, &input).unwrap_err();
        assert_eq!(ErrorKind::UnsupportedExpressionShape, err.kind());
        assert_eq!(Some(VERIFY_PASS_NAME), err.pass());
        assert_eq!(Some("o.Customer"), err.node());
    }

    #[test]
    fn leftover_entity_equality_rejected() {
        let model = sample_model();
        let a = row("a", "Customer");
        let input = expr::not_eq(expr::param(&a), expr::null(DataType::entity("Customer")));
        let err = verify_normalized(&model, &input).unwrap_err();
        assert_eq!(ErrorKind::UnsupportedExpressionShape, err.kind());
    }

    #[test]
    fn leftover_lambda_invocation_rejected() {
        let model = sample_model();
        let x = crate::expr::parameter_expr::ParameterExpr::new("x", DataType::Int32);
        let input = expr::invoke(compiled(&[&x], expr::param(&x)), vec![expr::lit(1)]);
        assert!(verify_normalized(&model, &input).is_err());
    }

    #[test]
    fn opaque_delegate_invocation_allowed() {
        let model = sample_model();
        let callee = expr::opaque_delegate(
            "Check",
            DataType::Function {
                params: vec![DataType::Int32],
                ret: Box::new(DataType::Boolean),
            },
        );
        let input = expr::invoke(callee, vec![expr::lit(1)]);
        verify_normalized(&model, &input).unwrap();
    }
}
