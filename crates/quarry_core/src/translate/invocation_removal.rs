use quarry_error::{DbError, ErrorKind, NODE_FIELD, Result};

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::lambda_expr::{InvokeExpr, LambdaExpr};
use crate::expr::scalar::ConstantValue;
use crate::expr::substitute::substitute_parameters;
use crate::expr::{ExprRef, Expression};
use crate::visitor::ExpressionVisitor;

/// Max number of nested inlines before giving up.
///
/// Only reachable through self-applying lambdas.
const MAX_INLINE_DEPTH: usize = 64;

/// Inline invocations of lambdas and known delegates by substituting the
/// arguments into the lambda body.
#[derive(Debug)]
pub struct InvocationRemoval;

impl QueryRewritePass for InvocationRemoval {
    fn name(&self) -> &'static str {
        "invocation_removal"
    }

    fn rewrite(&self, _state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        Inliner { depth: 0 }.visit(expr)
    }
}

struct Inliner {
    depth: usize,
}

impl ExpressionVisitor for Inliner {
    fn visit_invoke(&mut self, expr: &ExprRef, invoke: &InvokeExpr) -> Result<ExprRef> {
        // Substitute before visiting the callee so invocations of the
        // lambda's own parameters become resolvable.
        let callee = match resolve_callee(&invoke.callee) {
            Some(_) => invoke.callee.clone(),
            None => self.visit(&invoke.callee)?,
        };

        let lambda = resolve_callee(&callee).ok_or_else(|| {
            DbError::with_kind(
                ErrorKind::UnresolvedInvocationTarget,
                "Invocation target is not a lambda known at compile time",
            )
            .with_field(NODE_FIELD, expr)
        })?;

        if lambda.params.len() != invoke.args.len() {
            return Err(DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                format!(
                    "Invocation passes {} arguments to a lambda taking {}",
                    invoke.args.len(),
                    lambda.params.len()
                ),
            )
            .with_field(NODE_FIELD, expr));
        }

        if self.depth >= MAX_INLINE_DEPTH {
            return Err(DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                "Invocation nesting too deep",
            )
            .with_field(NODE_FIELD, expr));
        }

        let bindings: Vec<_> = lambda
            .params
            .iter()
            .cloned()
            .zip(invoke.args.iter().cloned())
            .collect();
        let body = substitute_parameters(&lambda.body, &bindings)?;

        self.depth += 1;
        let out = self.visit(&body);
        self.depth -= 1;
        out
    }
}

fn resolve_callee(callee: &Expression) -> Option<&LambdaExpr> {
    match callee {
        Expression::Lambda(_) | Expression::Quote(_) => callee.try_as_lambda(),
        Expression::Constant(constant) => match &constant.value {
            ConstantValue::Delegate(delegate) => delegate
                .lambda
                .as_ref()
                .and_then(|lambda| lambda.try_as_lambda()),
            _ => None,
        },
        _ => None,
    }
}
