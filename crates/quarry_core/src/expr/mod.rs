//! Typed expression trees.
//!
//! Trees are immutable. Nodes are shared through `ExprRef`, and rewrites
//! build new nodes only along the path from a changed node to the root.

pub mod binary_expr;
pub mod conditional_expr;
pub mod constant_expr;
pub mod extension;
pub mod lambda_expr;
pub mod member_expr;
pub mod method_call_expr;
pub mod new_expr;
pub mod parameter_expr;
pub mod scalar;
pub mod substitute;
pub mod unary_expr;

use std::fmt;
use std::sync::Arc;

use binary_expr::{BinaryExpr, BinaryOperator};
use conditional_expr::ConditionalExpr;
use constant_expr::ConstantExpr;
use extension::ExtensionNode;
use lambda_expr::{InvokeExpr, LambdaExpr, QuoteExpr};
use member_expr::MemberExpr;
use method_call_expr::MethodCallExpr;
use new_expr::NewExpr;
use parameter_expr::ParameterExpr;
use quarry_error::{DbError, Result};
use scalar::{ConstantValue, DelegateValue, ScalarValue};
use unary_expr::{UnaryExpr, UnaryOperator};

use crate::datatype::DataType;

/// Shared reference to an expression node.
pub type ExprRef = Arc<Expression>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Constant(ConstantExpr),
    Parameter(ParameterExpr),
    MethodCall(MethodCallExpr),
    Member(MemberExpr),
    Lambda(LambdaExpr),
    Quote(QuoteExpr),
    Invoke(InvokeExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Conditional(ConditionalExpr),
    New(NewExpr),
    Extension(Box<dyn ExtensionNode>),
}

impl Expression {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Constant(expr) => expr.datatype.clone(),
            Self::Parameter(expr) => expr.datatype.clone(),
            Self::MethodCall(expr) => expr.datatype.clone(),
            Self::Member(expr) => expr.datatype.clone(),
            Self::Lambda(expr) => expr.datatype(),
            Self::Quote(expr) => expr.lambda.datatype(),
            Self::Invoke(expr) => expr.datatype.clone(),
            Self::Unary(expr) => expr.datatype(),
            Self::Binary(expr) => expr.datatype(),
            Self::Conditional(expr) => expr.datatype.clone(),
            Self::New(expr) => expr.datatype(),
            Self::Extension(ext) => ext.datatype(),
        }
    }

    /// Short name of the node kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "Constant",
            Self::Parameter(_) => "Parameter",
            Self::MethodCall(_) => "MethodCall",
            Self::Member(_) => "Member",
            Self::Lambda(_) => "Lambda",
            Self::Quote(_) => "Quote",
            Self::Invoke(_) => "Invoke",
            Self::Unary(_) => "Unary",
            Self::Binary(_) => "Binary",
            Self::Conditional(_) => "Conditional",
            Self::New(_) => "New",
            Self::Extension(ext) => ext.name(),
        }
    }

    /// Children of this node in a fixed order.
    ///
    /// Lambda parameters are binding sites, not children. Constant delegates
    /// don't expose their body.
    pub fn children(&self) -> Vec<&ExprRef> {
        match self {
            Self::Constant(_) | Self::Parameter(_) => Vec::new(),
            Self::MethodCall(call) => call.object.iter().chain(call.args.iter()).collect(),
            Self::Member(member) => vec![&member.target],
            Self::Lambda(lambda) => vec![&lambda.body],
            Self::Quote(quote) => vec![&quote.lambda],
            Self::Invoke(invoke) => std::iter::once(&invoke.callee)
                .chain(invoke.args.iter())
                .collect(),
            Self::Unary(unary) => vec![&unary.expr],
            Self::Binary(binary) => vec![&binary.left, &binary.right],
            Self::Conditional(cond) => vec![&cond.test, &cond.then, &cond.else_expr],
            Self::New(new) => new.members.iter().map(|(_, e)| e).collect(),
            Self::Extension(ext) => ext.children(),
        }
    }

    /// Rebuild this node with new children in the order returned by
    /// `children`.
    ///
    /// Data types stored on the node are kept as-is.
    pub fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Expression> {
        let expected = self.children().len();
        if children.len() != expected {
            return Err(DbError::new(format!(
                "Expected {expected} children when rebuilding {}, got {}",
                self.kind_name(),
                children.len()
            )));
        }

        let mut children = children.into_iter();
        let mut next = || children.next().ok_or_else(|| DbError::new("Missing child"));

        Ok(match self {
            Self::Constant(_) | Self::Parameter(_) => self.clone(),
            Self::MethodCall(call) => {
                let object = match call.object {
                    Some(_) => Some(next()?),
                    None => None,
                };
                let args = (0..call.args.len())
                    .map(|_| next())
                    .collect::<Result<Vec<_>>>()?;
                Self::MethodCall(MethodCallExpr {
                    method: call.method.clone(),
                    object,
                    args,
                    datatype: call.datatype.clone(),
                })
            }
            Self::Member(member) => Self::Member(MemberExpr {
                target: next()?,
                member: member.member.clone(),
                datatype: member.datatype.clone(),
            }),
            Self::Lambda(lambda) => Self::Lambda(LambdaExpr {
                params: lambda.params.clone(),
                body: next()?,
            }),
            Self::Quote(_) => Self::Quote(QuoteExpr { lambda: next()? }),
            Self::Invoke(invoke) => {
                let callee = next()?;
                let args = (0..invoke.args.len())
                    .map(|_| next())
                    .collect::<Result<Vec<_>>>()?;
                Self::Invoke(InvokeExpr {
                    callee,
                    args,
                    datatype: invoke.datatype.clone(),
                })
            }
            Self::Unary(unary) => Self::Unary(UnaryExpr {
                op: unary.op,
                expr: next()?,
            }),
            Self::Binary(binary) => Self::Binary(BinaryExpr {
                op: binary.op,
                left: next()?,
                right: next()?,
            }),
            Self::Conditional(cond) => Self::Conditional(ConditionalExpr {
                test: next()?,
                then: next()?,
                else_expr: next()?,
                datatype: cond.datatype.clone(),
            }),
            Self::New(new) => Self::New(NewExpr {
                members: new
                    .members
                    .iter()
                    .map(|(name, _)| Ok((name.clone(), next()?)))
                    .collect::<Result<Vec<_>>>()?,
            }),
            Self::Extension(ext) => {
                let children = (0..expected)
                    .map(|_| next())
                    .collect::<Result<Vec<_>>>()?;
                Self::Extension(ext.with_new_children(children)?)
            }
        })
    }

    /// Check if this node or any descendant satisfies the predicate.
    pub fn any<F>(&self, pred: &mut F) -> bool
    where
        F: FnMut(&Expression) -> bool,
    {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|child| child.any(pred))
    }

    /// Check if this expression references the given parameter.
    ///
    /// Occurrences under a lambda that rebinds the same name are not
    /// counted.
    pub fn references_parameter(&self, param: &ParameterExpr) -> bool {
        match self {
            Self::Parameter(p) => p == param,
            Self::Lambda(lambda) if lambda.params.iter().any(|p| p.name == param.name) => false,
            _ => self
                .children()
                .into_iter()
                .any(|child| child.references_parameter(param)),
        }
    }

    pub fn try_as_constant(&self) -> Option<&ConstantExpr> {
        match self {
            Self::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn try_as_method_call(&self) -> Option<&MethodCallExpr> {
        match self {
            Self::MethodCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn try_as_member(&self) -> Option<&MemberExpr> {
        match self {
            Self::Member(member) => Some(member),
            _ => None,
        }
    }

    pub fn try_as_parameter(&self) -> Option<&ParameterExpr> {
        match self {
            Self::Parameter(param) => Some(param),
            _ => None,
        }
    }

    /// Get a lambda from either a bare or a quoted lambda node.
    pub fn try_as_lambda(&self) -> Option<&LambdaExpr> {
        match self {
            Self::Lambda(lambda) => Some(lambda),
            Self::Quote(quote) => quote.try_as_lambda(),
            _ => None,
        }
    }

    /// Downcast an extension node to a concrete type.
    pub fn try_as_extension<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Extension(ext) => ext.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// If this is a literal null (of any type).
    pub fn is_null_constant(&self) -> bool {
        matches!(self, Self::Constant(c) if c.is_null())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(expr) => write!(f, "{expr}"),
            Self::Parameter(expr) => write!(f, "{expr}"),
            Self::MethodCall(expr) => write!(f, "{expr}"),
            Self::Member(expr) => write!(f, "{expr}"),
            Self::Lambda(expr) => write!(f, "{expr}"),
            Self::Quote(expr) => write!(f, "{expr}"),
            Self::Invoke(expr) => write!(f, "{expr}"),
            Self::Unary(expr) => write!(f, "{expr}"),
            Self::Binary(expr) => write!(f, "{expr}"),
            Self::Conditional(expr) => write!(f, "{expr}"),
            Self::New(expr) => write!(f, "{expr}"),
            Self::Extension(ext) => ext.fmt_node(f),
        }
    }
}

/// Create a scalar literal.
pub fn lit(value: impl Into<ScalarValue>) -> ExprRef {
    Arc::new(Expression::Constant(ConstantExpr::scalar(value)))
}

/// Create a literal null with the given type.
pub fn null(datatype: DataType) -> ExprRef {
    Arc::new(Expression::Constant(ConstantExpr::typed_null(datatype)))
}

/// Create a literal in-memory list.
pub fn list(element: DataType, values: impl IntoIterator<Item = ScalarValue>) -> ExprRef {
    Arc::new(Expression::Constant(ConstantExpr {
        value: ConstantValue::List(values.into_iter().collect()),
        datatype: DataType::sequence(element),
    }))
}

/// Create a root entity set for an entity type.
pub fn entity_set(entity: impl Into<String>) -> ExprRef {
    let entity = entity.into();
    Arc::new(Expression::Constant(ConstantExpr {
        datatype: DataType::queryable(DataType::Entity(entity.clone())),
        value: ConstantValue::EntitySet(entity),
    }))
}

/// Create a delegate constant whose body is known.
pub fn delegate(name: impl Into<String>, lambda: ExprRef) -> ExprRef {
    let datatype = lambda.datatype();
    Arc::new(Expression::Constant(ConstantExpr {
        value: ConstantValue::Delegate(DelegateValue {
            name: name.into(),
            lambda: Some(lambda),
        }),
        datatype,
    }))
}

/// Create a delegate constant with an unknown body.
pub fn opaque_delegate(name: impl Into<String>, datatype: DataType) -> ExprRef {
    Arc::new(Expression::Constant(ConstantExpr {
        value: ConstantValue::Delegate(DelegateValue {
            name: name.into(),
            lambda: None,
        }),
        datatype,
    }))
}

pub fn param(param: &ParameterExpr) -> ExprRef {
    Arc::new(Expression::Parameter(param.clone()))
}

pub fn member(target: ExprRef, name: impl Into<String>, datatype: DataType) -> ExprRef {
    Arc::new(Expression::Member(MemberExpr {
        target,
        member: name.into(),
        datatype,
    }))
}

pub fn lambda(params: Vec<ParameterExpr>, body: ExprRef) -> ExprRef {
    Arc::new(Expression::Lambda(LambdaExpr { params, body }))
}

pub fn quote(lambda: ExprRef) -> ExprRef {
    Arc::new(Expression::Quote(QuoteExpr { lambda }))
}

/// Create an invocation. The result type is taken from the callee's
/// function shape.
pub fn invoke(callee: ExprRef, args: Vec<ExprRef>) -> ExprRef {
    let datatype = callee
        .datatype()
        .return_type()
        .cloned()
        .unwrap_or(DataType::Null);
    Arc::new(Expression::Invoke(InvokeExpr {
        callee,
        args,
        datatype,
    }))
}

pub fn binary(op: BinaryOperator, left: ExprRef, right: ExprRef) -> ExprRef {
    Arc::new(Expression::Binary(BinaryExpr { op, left, right }))
}

pub fn eq(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinaryOperator::Eq, left, right)
}

pub fn not_eq(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinaryOperator::NotEq, left, right)
}

pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinaryOperator::And, left, right)
}

pub fn or(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinaryOperator::Or, left, right)
}

pub fn unary(op: UnaryOperator, expr: ExprRef) -> ExprRef {
    Arc::new(Expression::Unary(UnaryExpr { op, expr }))
}

pub fn not(expr: ExprRef) -> ExprRef {
    unary(UnaryOperator::Not, expr)
}

pub fn is_null(expr: ExprRef) -> ExprRef {
    unary(UnaryOperator::IsNull, expr)
}

pub fn is_not_null(expr: ExprRef) -> ExprRef {
    unary(UnaryOperator::IsNotNull, expr)
}

/// Create a conditional. The result type is the first non-null branch type.
pub fn conditional(test: ExprRef, then: ExprRef, else_expr: ExprRef) -> ExprRef {
    let then_type = then.datatype();
    let datatype = if then_type.is_null() {
        else_expr.datatype()
    } else {
        then_type
    };
    Arc::new(Expression::Conditional(ConditionalExpr {
        test,
        then,
        else_expr,
        datatype,
    }))
}

pub fn new_object(members: Vec<(String, ExprRef)>) -> ExprRef {
    Arc::new(Expression::New(NewExpr { members }))
}

pub fn extension(node: impl ExtensionNode + 'static) -> ExprRef {
    Arc::new(Expression::Extension(Box::new(node)))
}

/// Fold expressions into a left-deep chain of binary nodes.
///
/// Returns `None` if there are no expressions.
pub fn fold_binary(
    op: BinaryOperator,
    exprs: impl IntoIterator<Item = ExprRef>,
) -> Option<ExprRef> {
    exprs.into_iter().reduce(|acc, expr| binary(op, acc, expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_new_children_roundtrip_shape() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let body = eq(param(&x), lit(4));
        let l = lambda(vec![x.clone()], body);

        let children: Vec<ExprRef> = l.children().into_iter().cloned().collect();
        let rebuilt: ExprRef = l.with_new_children(children).unwrap().into();
        assert_eq!(l, rebuilt);

        let err = l.with_new_children(Vec::new()).unwrap_err();
        assert!(err.message().contains("Expected 1 children"));
    }

    #[test]
    fn references_parameter_respects_shadowing() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let inner = lambda(vec![x.clone()], param(&x));
        let outer_body = new_object(vec![("a".to_string(), inner)]);
        assert!(!outer_body.references_parameter(&x));

        let direct = eq(param(&x), lit(1));
        assert!(direct.references_parameter(&x));
    }

    #[test]
    fn display() {
        let x = ParameterExpr::new("x", DataType::Int32);
        let expr = lambda(vec![x.clone()], and(eq(param(&x), lit(1)), lit(true)));
        assert_eq!("x => ((x == 1) AND true)", expr.to_string());
        assert_eq!("'a'", lit("a").to_string());
        assert_eq!("Set<Order>", entity_set("Order").to_string());
    }

    #[test]
    fn structural_equality_and_hash() {
        use std::collections::HashSet;

        let a = eq(lit(1), lit(2));
        let b = eq(lit(1), lit(2));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&eq(lit(1), lit(3))));
    }

    #[test]
    fn fold_binary_left_deep() {
        let folded = fold_binary(BinaryOperator::And, vec![lit(1), lit(2), lit(3)]).unwrap();
        assert_eq!("((1 AND 2) AND 3)", folded.to_string());
        assert!(fold_binary(BinaryOperator::And, Vec::new()).is_none());
    }
}
