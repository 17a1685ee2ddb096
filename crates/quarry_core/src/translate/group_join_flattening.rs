use quarry_error::Result;

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::substitute::substitute_member_access;
use crate::expr::{self, ExprRef, Expression};
use crate::operators::{ENUMERABLE, QUERYABLE, call_operator};
use crate::visitor::{ExpressionVisitor, walk_children};

/// Flatten a group join immediately unpacked by a `SelectMany` into a flat
/// join.
///
/// ```text
/// outer.GroupJoin(inner, ok, ik, (o, g) => new { O = o, G = g })
///      .SelectMany(t => t.G.DefaultIfEmpty(), (t, i) => f(t.O, i))
/// ```
///
/// becomes `outer.LeftJoin(inner, ok, ik, (o, i) => f(o, i))`. Without the
/// `DefaultIfEmpty` the result is an inner join.
#[derive(Debug)]
pub struct GroupJoinFlattening;

impl QueryRewritePass for GroupJoinFlattening {
    fn name(&self) -> &'static str {
        "group_join_flattening"
    }

    fn rewrite(&self, _state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        Flattener.visit(expr)
    }
}

struct Flattener;

impl ExpressionVisitor for Flattener {
    fn visit_method_call(&mut self, expr: &ExprRef, _call: &MethodCallExpr) -> Result<ExprRef> {
        let expr = walk_children(self, expr)?;
        let flattened = match expr.as_ref() {
            Expression::MethodCall(call) => flatten(call)?,
            _ => None,
        };
        Ok(flattened.unwrap_or(expr))
    }
}

/// Group join parts needed to build the flat join.
struct GroupJoinParts<'a> {
    call: &'a MethodCallExpr,
    outer_param: &'a ParameterExpr,
    /// Member of the transparent identifier holding the outer row.
    outer_member: &'a str,
    /// Member of the transparent identifier holding the group.
    group_member: &'a str,
}

fn group_join_parts(source: &ExprRef) -> Option<GroupJoinParts<'_>> {
    let call = source.try_as_method_call()?;
    if call.method.name != "GroupJoin" || call.args.len() != 5 {
        return None;
    }

    let selector = call.args[4].try_as_lambda()?;
    let [outer_param, group_param] = selector.params.as_slice() else {
        return None;
    };
    let Expression::New(new) = selector.body.as_ref() else {
        return None;
    };
    if new.members.len() != 2 {
        return None;
    }

    let mut outer_member = None;
    let mut group_member = None;
    for (name, value) in &new.members {
        match value.try_as_parameter() {
            Some(p) if p == outer_param => outer_member = Some(name.as_str()),
            Some(p) if p == group_param => group_member = Some(name.as_str()),
            _ => return None,
        }
    }

    Some(GroupJoinParts {
        call,
        outer_param,
        outer_member: outer_member?,
        group_member: group_member?,
    })
}

/// Check the collection selector unpacks the group, returning whether it
/// keeps unmatched outer rows.
fn unpacks_group(selector: &ExprRef, group_member: &str) -> Option<bool> {
    let lambda = selector.try_as_lambda()?;
    let [transparent] = lambda.params.as_slice() else {
        return None;
    };

    let mut body = &lambda.body;
    let mut outer = false;
    loop {
        match body.as_ref() {
            Expression::MethodCall(call)
                if call.args.len() == 1
                    && (call.method.owner == ENUMERABLE || call.method.owner == QUERYABLE) =>
            {
                match call.method.name.as_str() {
                    "DefaultIfEmpty" if !outer => outer = true,
                    "AsQueryable" => (),
                    _ => return None,
                }
                body = &call.args[0];
            }
            Expression::Member(member) if member.member == group_member => {
                return match member.target.try_as_parameter() {
                    Some(p) if p == transparent => Some(outer),
                    _ => None,
                };
            }
            _ => return None,
        }
    }
}

fn flatten(call: &MethodCallExpr) -> Result<Option<ExprRef>> {
    let owner = call.method.owner.as_str();
    if (owner != ENUMERABLE && owner != QUERYABLE)
        || call.method.name != "SelectMany"
        || !(call.args.len() == 2 || call.args.len() == 3)
    {
        return Ok(None);
    }

    let Some(parts) = group_join_parts(&call.args[0]) else {
        return Ok(None);
    };
    let Some(left_outer) = unpacks_group(&call.args[1], parts.group_member) else {
        return Ok(None);
    };

    let join_name = if left_outer { "LeftJoin" } else { "Join" };
    if left_outer && owner != QUERYABLE {
        return Ok(None);
    }

    let result = match call.args.get(2) {
        Some(selector) => {
            let Some(lambda) = selector.try_as_lambda() else {
                return Ok(None);
            };
            let [transparent, inner_param] = lambda.params.as_slice() else {
                return Ok(None);
            };
            let body = substitute_member_access(
                &lambda.body,
                transparent,
                parts.outer_member,
                &expr::param(parts.outer_param),
            )?;
            if body.references_parameter(transparent) {
                // The group itself is still used.
                return Ok(None);
            }
            expr::lambda(vec![parts.outer_param.clone(), inner_param.clone()], body)
        }
        None => {
            let Some(inner_elem) = parts.call.args[1].datatype().element_type().cloned() else {
                return Ok(None);
            };
            let inner_param = ParameterExpr::new("i", inner_elem);
            let body = expr::param(&inner_param);
            expr::lambda(vec![parts.outer_param.clone(), inner_param], body)
        }
    };
    let result = if owner == QUERYABLE {
        expr::quote(result)
    } else {
        result
    };

    let args = vec![
        parts.call.args[0].clone(),
        parts.call.args[1].clone(),
        parts.call.args[2].clone(),
        parts.call.args[3].clone(),
        result,
    ];
    Ok(Some(call_operator(owner, join_name, args)?))
}
