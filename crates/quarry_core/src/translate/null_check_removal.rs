use quarry_error::Result;

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::binary_expr::BinaryOperator;
use crate::expr::conditional_expr::ConditionalExpr;
use crate::expr::lambda_expr::LambdaExpr;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::scalar::ConstantValue;
use crate::expr::unary_expr::UnaryOperator;
use crate::expr::{ExprRef, Expression};
use crate::model::{Cardinality, Model};
use crate::operators::{ENUMERABLE, QUERYABLE};
use crate::visitor::{ExpressionVisitor, rebuild_if_changed, walk_children};

/// Drop null guards around expressions that can't be null.
///
/// Only the exact shapes `x == null ? null : f` and `x != null ? f : null`
/// (and their `IS NULL` forms) are recognized, and only when the model says
/// `x` is never null. Rows from the inner side of a left join, or from a
/// collection ending in `DefaultIfEmpty`, may be null and keep their guards.
#[derive(Debug)]
pub struct NullCheckRemoval;

impl QueryRewritePass for NullCheckRemoval {
    fn name(&self) -> &'static str {
        "null_check_removal"
    }

    fn rewrite(&self, state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        GuardRemover {
            model: state.model,
            scopes: Vec::new(),
        }
        .visit(expr)
    }
}

struct GuardRemover<'a> {
    model: &'a Model,
    /// Lambda parameters in scope, innermost last, with whether the row
    /// they're bound to may be missing.
    scopes: Vec<(ParameterExpr, bool)>,
}

impl ExpressionVisitor for GuardRemover<'_> {
    fn visit_method_call(&mut self, expr: &ExprRef, call: &MethodCallExpr) -> Result<ExprRef> {
        let Some((selector_idx, nullable_param)) = optional_row_binding(call) else {
            return walk_children(self, expr);
        };

        let offset = usize::from(call.object.is_some());
        let children = expr
            .children()
            .into_iter()
            .enumerate()
            .map(|(idx, child)| {
                if idx == offset + selector_idx {
                    self.visit_selector(child, nullable_param)
                } else {
                    self.visit(child)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        rebuild_if_changed(expr, children)
    }

    fn visit_lambda(&mut self, expr: &ExprRef, lambda: &LambdaExpr) -> Result<ExprRef> {
        self.visit_scoped_lambda(expr, lambda, None)
    }

    fn visit_conditional(&mut self, expr: &ExprRef, _cond: &ConditionalExpr) -> Result<ExprRef> {
        let expr = walk_children(self, expr)?;
        let Expression::Conditional(cond) = expr.as_ref() else {
            return Ok(expr);
        };

        let guarded = match null_test(&cond.test) {
            Some((checked, true)) if cond.then.is_null_constant() => Some((checked, &cond.else_expr)),
            Some((checked, false)) if cond.else_expr.is_null_constant() => {
                Some((checked, &cond.then))
            }
            _ => None,
        };

        match guarded {
            Some((checked, value)) if self.is_non_nullable(checked) => Ok(value.clone()),
            _ => Ok(expr),
        }
    }
}

impl GuardRemover<'_> {
    fn visit_selector(&mut self, arg: &ExprRef, nullable_param: usize) -> Result<ExprRef> {
        match arg.as_ref() {
            Expression::Quote(quote) => {
                let lambda = self.visit_selector(&quote.lambda, nullable_param)?;
                rebuild_if_changed(arg, vec![lambda])
            }
            Expression::Lambda(lambda) => self.visit_scoped_lambda(arg, lambda, Some(nullable_param)),
            _ => self.visit(arg),
        }
    }

    fn visit_scoped_lambda(
        &mut self,
        expr: &ExprRef,
        lambda: &LambdaExpr,
        nullable_param: Option<usize>,
    ) -> Result<ExprRef> {
        let depth = self.scopes.len();
        for (idx, param) in lambda.params.iter().enumerate() {
            self.scopes.push((param.clone(), nullable_param == Some(idx)));
        }
        let body = self.visit(&lambda.body);
        self.scopes.truncate(depth);
        rebuild_if_changed(expr, vec![body?])
    }

    fn is_optional_param(&self, param: &ParameterExpr) -> bool {
        self.scopes
            .iter()
            .rev()
            .find(|(bound, _)| bound.name == param.name)
            .is_some_and(|(_, nullable)| *nullable)
    }

    /// Check if the model guarantees the expression is never null.
    ///
    /// Entity-typed lambda parameters range over rows and are treated as non
    /// null, unless bound to a row that may be missing.
    fn is_non_nullable(&self, expr: &ExprRef) -> bool {
        match expr.as_ref() {
            Expression::Constant(constant) => match &constant.value {
                ConstantValue::Scalar(v) => !v.is_null(),
                ConstantValue::List(_) | ConstantValue::EntitySet(_) => true,
                ConstantValue::Delegate(_) => false,
            },
            Expression::New(_) => true,
            Expression::Parameter(param) => {
                param.datatype.entity_name().is_some() && !self.is_optional_param(param)
            }
            Expression::Member(member) => {
                let Some(entity) = member
                    .target
                    .datatype()
                    .entity_name()
                    .and_then(|name| self.model.entity(name))
                else {
                    return false;
                };

                let member_non_null = if let Some(prop) = entity.property(&member.member) {
                    !prop.nullable
                } else if let Some(nav) = entity.navigation(&member.member) {
                    match nav.cardinality {
                        Cardinality::One => nav.required,
                        Cardinality::Many => true,
                    }
                } else {
                    false
                };

                member_non_null && self.is_non_nullable(&member.target)
            }
            _ => false,
        }
    }
}

/// Find the result selector of an operator whose second row may be missing.
///
/// Returns the argument index of the selector and the index of its
/// parameter bound to the optional row.
fn optional_row_binding(call: &MethodCallExpr) -> Option<(usize, usize)> {
    let owner = call.method.owner.as_str();
    if owner != QUERYABLE && owner != ENUMERABLE {
        return None;
    }
    match (call.method.name.as_str(), call.args.len()) {
        ("LeftJoin", 5) => Some((4, 1)),
        ("SelectMany", 3) if ends_in_default_if_empty(&call.args[1]) => Some((2, 1)),
        _ => None,
    }
}

/// Check if a collection selector produces its rows through `DefaultIfEmpty`.
fn ends_in_default_if_empty(selector: &ExprRef) -> bool {
    let mut current = selector;
    loop {
        match current.as_ref() {
            Expression::Quote(quote) => current = &quote.lambda,
            Expression::Lambda(lambda) => current = &lambda.body,
            Expression::MethodCall(call)
                if call.method.name == "AsQueryable" && call.args.len() == 1 =>
            {
                current = &call.args[0]
            }
            Expression::MethodCall(call) => return call.method.name == "DefaultIfEmpty",
            _ => return false,
        }
    }
}

/// Match a null test, returning the tested expression and whether the test
/// is for null (as opposed to not null).
fn null_test(test: &ExprRef) -> Option<(&ExprRef, bool)> {
    match test.as_ref() {
        Expression::Binary(binary) if binary.op.is_equality() => {
            let is_null = binary.op == BinaryOperator::Eq;
            if binary.right.is_null_constant() {
                Some((&binary.left, is_null))
            } else if binary.left.is_null_constant() {
                Some((&binary.right, is_null))
            } else {
                None
            }
        }
        Expression::Unary(unary) => match unary.op {
            UnaryOperator::IsNull => Some((&unary.expr, true)),
            UnaryOperator::IsNotNull => Some((&unary.expr, false)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datatype::DataType;
    use crate::expr;
    use crate::testutil::{get, quoted, queryable, row, sample_catalog, sample_model};

    fn rewrite(expr: &ExprRef) -> ExprRef {
        let model = sample_model();
        let catalog = sample_catalog();
        let mut state = CompilationState::new(&model, &catalog);
        NullCheckRemoval.rewrite(&mut state, expr).unwrap()
    }

    #[test]
    fn guard_on_required_navigation_removed() {
        let o = row("o", "Order");
        let customer = get(&expr::param(&o), "Customer");
        let name = get(&customer, "Name");

        let guarded = expr::conditional(
            expr::eq(customer.clone(), expr::null(DataType::entity("Customer"))),
            expr::null(DataType::Utf8),
            name.clone(),
        );
        let input = queryable(
            "Select",
            vec![expr::entity_set("Order"), quoted(&[&o], guarded)],
        )
        .unwrap();

        let expected = queryable(
            "Select",
            vec![expr::entity_set("Order"), quoted(&[&o], name)],
        )
        .unwrap();
        assert_eq!(expected, rewrite(&input));
    }

    #[test]
    fn negated_guard_removed() {
        let o = row("o", "Order");
        let customer = get(&expr::param(&o), "Customer");
        let name = get(&customer, "Name");

        let input = expr::conditional(
            expr::is_not_null(customer),
            name.clone(),
            expr::null(DataType::Utf8),
        );
        assert_eq!(name, rewrite(&input));
    }

    #[test]
    fn guard_on_optional_navigation_kept() {
        let c = row("c", "Customer");
        let address = get(&expr::param(&c), "Address");
        let input = expr::conditional(
            expr::eq(expr::null(DataType::entity("Address")), address.clone()),
            expr::null(DataType::Utf8),
            get(&address, "Street"),
        );
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));
    }

    #[test]
    fn guard_on_nullable_property_kept() {
        let o = row("o", "Order");
        let status = get(&expr::param(&o), "Status");
        let input = expr::conditional(
            expr::eq(status.clone(), expr::null(DataType::Utf8)),
            expr::null(DataType::Utf8),
            status,
        );
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));
    }

    /// `row == null ? null : row.member`
    fn guard(row: &ParameterExpr, member: &str) -> ExprRef {
        let value = get(&expr::param(row), member);
        expr::conditional(
            expr::eq(expr::param(row), expr::null(row.datatype.clone())),
            expr::null(value.datatype()),
            value,
        )
    }

    #[test]
    fn left_join_inner_row_guard_kept() {
        let c = row("c", "Customer");
        let o = row("o", "Order");
        let left_join = |name: ExprRef, total: ExprRef| {
            queryable(
                "LeftJoin",
                vec![
                    expr::entity_set("Customer"),
                    expr::entity_set("Order"),
                    quoted(&[&c], get(&expr::param(&c), "Id")),
                    quoted(&[&o], get(&expr::param(&o), "CustomerId")),
                    quoted(
                        &[&c, &o],
                        expr::new_object(vec![
                            ("Name".to_string(), name),
                            ("Total".to_string(), total),
                        ]),
                    ),
                ],
            )
            .unwrap()
        };

        let input = left_join(guard(&c, "Name"), guard(&o, "Total"));
        let expected = left_join(get(&expr::param(&c), "Name"), guard(&o, "Total"));
        assert_eq!(expected, rewrite(&input));
    }

    fn orders_of(c: &ParameterExpr, o: &ParameterExpr, default_if_empty: bool) -> ExprRef {
        let mut orders = queryable(
            "Where",
            vec![
                expr::entity_set("Order"),
                quoted(
                    &[o],
                    expr::eq(get(&expr::param(o), "CustomerId"), get(&expr::param(c), "Id")),
                ),
            ],
        )
        .unwrap();
        if default_if_empty {
            orders = queryable("DefaultIfEmpty", vec![orders]).unwrap();
        }
        quoted(&[c], orders)
    }

    #[test]
    fn default_if_empty_row_guard_kept() {
        let c = row("c", "Customer");
        let o = row("o", "Order");
        let input = queryable(
            "SelectMany",
            vec![
                expr::entity_set("Customer"),
                orders_of(&c, &o, true),
                quoted(&[&c, &o], guard(&o, "Total")),
            ],
        )
        .unwrap();
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));

        // Every row from a plain collection exists.
        let input = queryable(
            "SelectMany",
            vec![
                expr::entity_set("Customer"),
                orders_of(&c, &o, false),
                quoted(&[&c, &o], guard(&o, "Total")),
            ],
        )
        .unwrap();
        let got = rewrite(&input);
        let call = got.try_as_method_call().unwrap();
        assert_eq!("quote((c, o) => o.Total)", call.args[2].to_string());
    }

    #[test]
    fn optional_row_shadowed_by_inner_lambda() {
        let c = row("c", "Customer");
        let o = row("o", "Order");
        // The inner `o` ranges over a plain entity set.
        let inner = queryable(
            "Select",
            vec![expr::entity_set("Order"), quoted(&[&o], guard(&o, "Total"))],
        )
        .unwrap();
        let input = queryable(
            "LeftJoin",
            vec![
                expr::entity_set("Customer"),
                expr::entity_set("Order"),
                quoted(&[&c], get(&expr::param(&c), "Id")),
                quoted(&[&o], get(&expr::param(&o), "CustomerId")),
                quoted(&[&c, &o], inner),
            ],
        )
        .unwrap();

        let got = rewrite(&input);
        assert!(got.to_string().contains("quote(o => o.Total)"));
    }

    #[test]
    fn other_conditionals_kept() {
        let o = row("o", "Order");
        let id = get(&expr::param(&o), "Id");
        // Non-null branch on the wrong side.
        let input = expr::conditional(
            expr::eq(id.clone(), expr::null(DataType::Int32)),
            id.clone(),
            expr::null(DataType::Int32),
        );
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));

        let input = expr::conditional(
            expr::eq(id.clone(), expr::lit(1)),
            expr::null(DataType::Int32),
            id,
        );
        assert!(Arc::ptr_eq(&input, &rewrite(&input)));
    }
}
