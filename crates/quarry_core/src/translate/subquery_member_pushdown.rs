use quarry_error::Result;

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::member_expr::MemberExpr;
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::{self, ExprRef, Expression};
use crate::operators::{ELEMENT_OPERATORS, QUERYABLE, call_operator};
use crate::visitor::{ExpressionVisitor, walk_children};

/// Move member accesses on single-element subqueries into the subquery's
/// projection.
///
/// `q.First().Name` becomes `q.Select(x => x.Name).First()`, and
/// `q.First(p).Name` becomes `q.Where(p).Select(x => x.Name).First()`.
#[derive(Debug)]
pub struct SubqueryMemberPushdown;

impl QueryRewritePass for SubqueryMemberPushdown {
    fn name(&self) -> &'static str {
        "subquery_member_pushdown"
    }

    fn rewrite(&self, _state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        Pushdown.visit(expr)
    }
}

struct Pushdown;

impl ExpressionVisitor for Pushdown {
    fn visit_member(&mut self, expr: &ExprRef, _member: &MemberExpr) -> Result<ExprRef> {
        // Inner accesses first so chains like `q.First().A.B` end up as a
        // single projection.
        let expr = walk_children(self, expr)?;
        let pushed = match expr.as_ref() {
            Expression::Member(member) => push_down(member)?,
            _ => None,
        };
        Ok(pushed.unwrap_or(expr))
    }
}

fn push_down(member: &MemberExpr) -> Result<Option<ExprRef>> {
    let Some(call) = member.target.try_as_method_call() else {
        return Ok(None);
    };
    if call.method.owner != QUERYABLE || !ELEMENT_OPERATORS.contains(&call.method.name.as_str()) {
        return Ok(None);
    }

    let source = match call.args.as_slice() {
        [source] => source.clone(),
        [source, predicate] => {
            call_operator(QUERYABLE, "Where", vec![source.clone(), predicate.clone()])?
        }
        _ => return Ok(None),
    };

    let projected = match existing_projection(&source) {
        Some((inner_source, params, body)) => {
            let body = access(body, member);
            call_operator(
                QUERYABLE,
                "Select",
                vec![
                    inner_source.clone(),
                    expr::quote(expr::lambda(params.to_vec(), body)),
                ],
            )?
        }
        None => {
            let Some(element) = source.datatype().element_type().cloned() else {
                return Ok(None);
            };
            let x = ParameterExpr::new("x", element);
            let body = access(&expr::param(&x), member);
            call_operator(
                QUERYABLE,
                "Select",
                vec![source, expr::quote(expr::lambda(vec![x], body))],
            )?
        }
    };

    Ok(Some(call_operator(
        QUERYABLE,
        &call.method.name,
        vec![projected],
    )?))
}

/// Get the source, lambda parameters and body of a deferred `Select`.
fn existing_projection(source: &ExprRef) -> Option<(&ExprRef, &[ParameterExpr], &ExprRef)> {
    let call = source.try_as_method_call()?;
    if call.method.owner != QUERYABLE || call.method.name != "Select" || call.args.len() != 2 {
        return None;
    }
    let lambda = call.args[1].try_as_lambda()?;
    Some((&call.args[0], lambda.params.as_slice(), &lambda.body))
}

/// Apply the member access to a projected value, reading anonymous object
/// members directly.
fn access(value: &ExprRef, member: &MemberExpr) -> ExprRef {
    if let Expression::New(new) = value.as_ref() {
        if let Some(existing) = new.member(&member.member) {
            return existing.clone();
        }
    }
    expr::member(value.clone(), &member.member, member.datatype.clone())
}
