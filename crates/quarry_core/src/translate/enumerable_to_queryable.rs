use quarry_error::Result;

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::{self, ExprRef, Expression};
use crate::operators::{ENUMERABLE, OperatorRegistry, ParamShape, QUERYABLE, call_operator};
use crate::visitor::{ExpressionVisitor, walk_children};

/// Rewrite in-memory sequence operators applied to query sources into their
/// deferred equivalents.
///
/// A source qualifies if it's already a deferred query, or if it's a
/// collection member access that navigation expansion can turn into one.
/// Constants and parameters holding in-memory collections are left alone.
#[derive(Debug)]
pub struct EnumerableToQueryable;

impl QueryRewritePass for EnumerableToQueryable {
    fn name(&self) -> &'static str {
        "enumerable_to_queryable"
    }

    fn rewrite(&self, _state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        Converter.visit(expr)
    }
}

struct Converter;

impl ExpressionVisitor for Converter {
    fn visit_method_call(&mut self, expr: &ExprRef, _call: &MethodCallExpr) -> Result<ExprRef> {
        // Inner operators first so chains convert from the source outwards.
        let expr = walk_children(self, expr)?;
        let converted = match expr.as_ref() {
            Expression::MethodCall(call) => convert(call)?,
            _ => None,
        };
        Ok(converted.unwrap_or(expr))
    }
}

fn is_query_source(source: &Expression) -> bool {
    let datatype = source.datatype();
    datatype.is_queryable()
        || (matches!(source, Expression::Member(_)) && datatype.is_sequence_like())
}

fn convert(call: &MethodCallExpr) -> Result<Option<ExprRef>> {
    if call.method.owner != ENUMERABLE || call.object.is_some() {
        return Ok(None);
    }
    let Some(source) = call.args.first() else {
        return Ok(None);
    };
    if !is_query_source(source) {
        return Ok(None);
    }

    let registry = OperatorRegistry::global();
    if registry.find_for_call(call).is_none() {
        return Ok(None);
    }

    let mut args = Vec::with_capacity(call.args.len());
    for (idx, arg) in call.args.iter().enumerate() {
        let arg = match arg.as_ref() {
            _ if idx == 0 && !arg.datatype().is_queryable() => {
                call_operator(QUERYABLE, "AsQueryable", vec![arg.clone()])?
            }
            Expression::Lambda(_) => expr::quote(arg.clone()),
            _ => arg.clone(),
        };
        args.push(arg);
    }

    let shapes: Vec<_> = args.iter().map(|a| ParamShape::of_arg(a)).collect();
    if registry
        .find(QUERYABLE, &call.method.name, &shapes)
        .is_none()
    {
        // No deferred counterpart, e.g. ToList.
        return Ok(None);
    }

    Ok(Some(call_operator(QUERYABLE, &call.method.name, args)?))
}
