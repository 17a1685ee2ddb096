use quarry_error::Result;

use super::lambda_expr::LambdaExpr;
use super::parameter_expr::ParameterExpr;
use super::{ExprRef, Expression};
use crate::visitor::{ExpressionVisitor, walk_children};

/// Replace free occurrences of parameters with expressions.
///
/// A lambda that declares a parameter with the same name hides the outer
/// binding for its body.
pub fn substitute_parameters(
    expr: &ExprRef,
    bindings: &[(ParameterExpr, ExprRef)],
) -> Result<ExprRef> {
    let mut substitution = ParameterSubstitution {
        scopes: vec![bindings.to_vec()],
    };
    substitution.visit(expr)
}

/// Replace `target.member` accesses on a parameter with an expression.
///
/// Used to drop a layer of transparent identifiers, e.g. `t.Outer` becomes
/// `o`.
pub fn substitute_member_access(
    expr: &ExprRef,
    target: &ParameterExpr,
    member: &str,
    replacement: &ExprRef,
) -> Result<ExprRef> {
    let mut substitution = MemberSubstitution {
        target,
        member,
        replacement,
        hidden: 0,
    };
    substitution.visit(expr)
}

#[derive(Debug)]
struct ParameterSubstitution {
    scopes: Vec<Vec<(ParameterExpr, ExprRef)>>,
}

impl ExpressionVisitor for ParameterSubstitution {
    fn visit_parameter(&mut self, expr: &ExprRef, param: &ParameterExpr) -> Result<ExprRef> {
        let current = match self.scopes.last() {
            Some(scope) => scope,
            None => return Ok(expr.clone()),
        };
        match current.iter().find(|(p, _)| p == param) {
            Some((_, replacement)) => Ok(replacement.clone()),
            None => Ok(expr.clone()),
        }
    }

    fn visit_lambda(&mut self, expr: &ExprRef, lambda: &LambdaExpr) -> Result<ExprRef> {
        let current = self.scopes.last().cloned().unwrap_or_default();
        let visible: Vec<_> = current
            .into_iter()
            .filter(|(p, _)| !lambda.params.iter().any(|lp| lp.name == p.name))
            .collect();

        if visible.is_empty() {
            return Ok(expr.clone());
        }

        self.scopes.push(visible);
        let out = walk_children(self, expr);
        self.scopes.pop();
        out
    }
}

#[derive(Debug)]
struct MemberSubstitution<'a> {
    target: &'a ParameterExpr,
    member: &'a str,
    replacement: &'a ExprRef,
    hidden: usize,
}

impl ExpressionVisitor for MemberSubstitution<'_> {
    fn visit_member(
        &mut self,
        expr: &ExprRef,
        member: &super::member_expr::MemberExpr,
    ) -> Result<ExprRef> {
        if self.hidden == 0
            && member.member == self.member
            && matches!(member.target.as_ref(), Expression::Parameter(p) if p == self.target)
        {
            return Ok(self.replacement.clone());
        }
        walk_children(self, expr)
    }

    fn visit_lambda(&mut self, expr: &ExprRef, lambda: &LambdaExpr) -> Result<ExprRef> {
        let hides = lambda.params.iter().any(|p| p.name == self.target.name);
        if hides {
            self.hidden += 1;
        }
        let out = walk_children(self, expr);
        if hides {
            self.hidden -= 1;
        }
        out
    }
}
