//! Query operator identities and the operator registry.
//!
//! Operators exist in two flavors, one over in-memory sequences taking
//! compiled lambdas (`Enumerable`) and one over deferred queries taking
//! quoted lambdas (`Queryable`). The registry lists the overloads of both so
//! passes can map between them by name and parameter shape.

use std::fmt;
use std::sync::{Arc, LazyLock};

use hashbrown::HashMap;
use quarry_error::{DbError, ErrorKind, Result};
use serde::{Deserialize, Serialize};

use crate::datatype::DataType;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::{ExprRef, Expression};

/// Owner of in-memory sequence operators.
pub const ENUMERABLE: &str = "Enumerable";
/// Owner of deferred query operators.
pub const QUERYABLE: &str = "Queryable";

/// Identity of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Declaring type.
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub generic_args: Vec<DataType>,
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        MethodRef {
            owner: owner.into(),
            name: name.into(),
            generic_args: Vec::new(),
        }
    }

    pub fn with_generic_args(mut self, generic_args: Vec<DataType>) -> Self {
        self.generic_args = generic_args;
        self
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Marker operators that carry query metadata and don't affect results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    TagWith,
    AsTracking,
    AsNoTracking,
    IgnoreQueryFilters,
}

impl MarkerKind {
    /// Get the marker kind for a call, if it is one.
    pub fn from_call(call: &MethodCallExpr) -> Option<Self> {
        if call.method.owner != QUERYABLE {
            return None;
        }
        match call.method.name.as_str() {
            "TagWith" => Some(Self::TagWith),
            "AsTracking" => Some(Self::AsTracking),
            "AsNoTracking" => Some(Self::AsNoTracking),
            "IgnoreQueryFilters" => Some(Self::IgnoreQueryFilters),
            _ => None,
        }
    }
}

/// Shape of an operator parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamShape {
    /// Any sequence, in-memory or deferred.
    Sequence,
    /// Deferred query only.
    Queryable,
    /// Compiled lambda with the given number of parameters.
    Lambda(usize),
    /// Quoted lambda with the given number of parameters.
    QuotedLambda(usize),
    /// Any other value.
    Value,
}

impl ParamShape {
    /// Shape of an argument expression.
    pub fn of_arg(arg: &Expression) -> Self {
        match arg {
            Expression::Lambda(lambda) => ParamShape::Lambda(lambda.params.len()),
            Expression::Quote(quote) => match quote.try_as_lambda() {
                Some(lambda) => ParamShape::QuotedLambda(lambda.params.len()),
                None => ParamShape::Value,
            },
            other => match other.datatype() {
                DataType::Queryable(_) => ParamShape::Queryable,
                DataType::Sequence(_) => ParamShape::Sequence,
                _ => ParamShape::Value,
            },
        }
    }

    /// Score how well an argument shape fits this parameter. Higher is
    /// better, `None` means no fit.
    fn accepts(&self, arg: ParamShape) -> Option<u32> {
        match (self, arg) {
            (a, b) if *a == b => Some(2),
            (ParamShape::Sequence, ParamShape::Queryable) => Some(1),
            _ => None,
        }
    }
}

/// How the result type of an operator is derived from its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    /// Same elements as the source.
    Source,
    /// Elements are the results of the lambda at the index.
    Projection(usize),
    /// Elements are the elements of the sequence returned by the lambda at
    /// the index.
    Flatten(usize),
    /// A single source element.
    Element,
    /// Return type of the lambda at the index.
    LambdaResult(usize),
    Boolean,
    Count,
    /// Source elements as a deferred query.
    AsQueryable,
    /// Same as the source.
    Passthrough,
}

/// A single operator overload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSignature {
    pub owner: &'static str,
    pub name: &'static str,
    pub params: Vec<ParamShape>,
    pub returns: ReturnShape,
}

impl OperatorSignature {
    fn score(&self, args: &[ParamShape]) -> Option<u32> {
        if self.params.len() != args.len() {
            return None;
        }
        let mut total = 0;
        for (param, arg) in self.params.iter().zip(args) {
            total += param.accepts(*arg)?;
        }
        Some(total)
    }

    /// Compute the result type of a call to this overload.
    pub fn return_type(&self, args: &[ExprRef]) -> Result<DataType> {
        let source_elem = || -> Result<DataType> {
            args.first()
                .and_then(|a| a.datatype().element_type().cloned())
                .ok_or_else(|| {
                    DbError::with_kind(
                        ErrorKind::UnsupportedExpressionShape,
                        format!("Source for {} is not a sequence", self.name),
                    )
                })
        };
        let lambda_ret = |idx: usize| -> Result<DataType> {
            args.get(idx)
                .and_then(|a| a.try_as_lambda())
                .map(|l| l.body.datatype())
                .ok_or_else(|| {
                    DbError::with_kind(
                        ErrorKind::UnsupportedExpressionShape,
                        format!("Argument {idx} for {} is not a lambda", self.name),
                    )
                })
        };
        let wrap = |elem: DataType| {
            if self.owner == QUERYABLE {
                DataType::queryable(elem)
            } else {
                DataType::sequence(elem)
            }
        };

        Ok(match self.returns {
            ReturnShape::Source => wrap(source_elem()?),
            ReturnShape::Projection(idx) => wrap(lambda_ret(idx)?),
            ReturnShape::Flatten(idx) => {
                let ret = lambda_ret(idx)?;
                let elem = ret.element_type().cloned().ok_or_else(|| {
                    DbError::with_kind(
                        ErrorKind::UnsupportedExpressionShape,
                        format!("Selector for {} doesn't return a sequence", self.name),
                    )
                })?;
                wrap(elem)
            }
            ReturnShape::Element => source_elem()?,
            ReturnShape::LambdaResult(idx) => lambda_ret(idx)?,
            ReturnShape::Boolean => DataType::Boolean,
            ReturnShape::Count => DataType::Int32,
            ReturnShape::AsQueryable => DataType::queryable(source_elem()?),
            ReturnShape::Passthrough => args
                .first()
                .map(|a| a.datatype())
                .ok_or_else(|| DbError::new("Missing source argument"))?,
        })
    }
}

/// Which operator families a template is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owners {
    Both,
    EnumerableOnly,
    QueryableOnly,
}

/// Shape placeholders resolved per owner.
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// The source sequence.
    Src,
    /// A secondary sequence, always accepts any sequence.
    Seq,
    /// Lambda with the given arity.
    L(usize),
    Val,
}

const TEMPLATES: &[(Owners, &str, &[Slot], ReturnShape)] = &[
    (Owners::Both, "Where", &[Slot::Src, Slot::L(1)], ReturnShape::Source),
    (Owners::Both, "Where", &[Slot::Src, Slot::L(2)], ReturnShape::Source),
    (Owners::Both, "Select", &[Slot::Src, Slot::L(1)], ReturnShape::Projection(1)),
    (Owners::Both, "Select", &[Slot::Src, Slot::L(2)], ReturnShape::Projection(1)),
    (Owners::Both, "SelectMany", &[Slot::Src, Slot::L(1)], ReturnShape::Flatten(1)),
    (Owners::Both, "SelectMany", &[Slot::Src, Slot::L(1), Slot::L(2)], ReturnShape::Projection(2)),
    (Owners::Both, "OrderBy", &[Slot::Src, Slot::L(1)], ReturnShape::Source),
    (Owners::Both, "OrderByDescending", &[Slot::Src, Slot::L(1)], ReturnShape::Source),
    (Owners::Both, "ThenBy", &[Slot::Src, Slot::L(1)], ReturnShape::Source),
    (Owners::Both, "ThenByDescending", &[Slot::Src, Slot::L(1)], ReturnShape::Source),
    (Owners::Both, "Take", &[Slot::Src, Slot::Val], ReturnShape::Source),
    (Owners::Both, "Skip", &[Slot::Src, Slot::Val], ReturnShape::Source),
    (Owners::Both, "Distinct", &[Slot::Src], ReturnShape::Source),
    (Owners::Both, "DefaultIfEmpty", &[Slot::Src], ReturnShape::Source),
    (Owners::Both, "First", &[Slot::Src], ReturnShape::Element),
    (Owners::Both, "First", &[Slot::Src, Slot::L(1)], ReturnShape::Element),
    (Owners::Both, "FirstOrDefault", &[Slot::Src], ReturnShape::Element),
    (Owners::Both, "FirstOrDefault", &[Slot::Src, Slot::L(1)], ReturnShape::Element),
    (Owners::Both, "Single", &[Slot::Src], ReturnShape::Element),
    (Owners::Both, "Single", &[Slot::Src, Slot::L(1)], ReturnShape::Element),
    (Owners::Both, "SingleOrDefault", &[Slot::Src], ReturnShape::Element),
    (Owners::Both, "SingleOrDefault", &[Slot::Src, Slot::L(1)], ReturnShape::Element),
    (Owners::Both, "Last", &[Slot::Src], ReturnShape::Element),
    (Owners::Both, "Last", &[Slot::Src, Slot::L(1)], ReturnShape::Element),
    (Owners::Both, "LastOrDefault", &[Slot::Src], ReturnShape::Element),
    (Owners::Both, "LastOrDefault", &[Slot::Src, Slot::L(1)], ReturnShape::Element),
    (Owners::Both, "Any", &[Slot::Src], ReturnShape::Boolean),
    (Owners::Both, "Any", &[Slot::Src, Slot::L(1)], ReturnShape::Boolean),
    (Owners::Both, "All", &[Slot::Src, Slot::L(1)], ReturnShape::Boolean),
    (Owners::Both, "Contains", &[Slot::Src, Slot::Val], ReturnShape::Boolean),
    (Owners::Both, "Count", &[Slot::Src], ReturnShape::Count),
    (Owners::Both, "Count", &[Slot::Src, Slot::L(1)], ReturnShape::Count),
    (Owners::Both, "Sum", &[Slot::Src, Slot::L(1)], ReturnShape::LambdaResult(1)),
    (Owners::Both, "Min", &[Slot::Src, Slot::L(1)], ReturnShape::LambdaResult(1)),
    (Owners::Both, "Max", &[Slot::Src, Slot::L(1)], ReturnShape::LambdaResult(1)),
    (Owners::Both, "Average", &[Slot::Src, Slot::L(1)], ReturnShape::LambdaResult(1)),
    (
        Owners::Both,
        "Join",
        &[Slot::Src, Slot::Seq, Slot::L(1), Slot::L(1), Slot::L(2)],
        ReturnShape::Projection(4),
    ),
    (
        Owners::Both,
        "GroupJoin",
        &[Slot::Src, Slot::Seq, Slot::L(1), Slot::L(1), Slot::L(2)],
        ReturnShape::Projection(4),
    ),
    (
        Owners::QueryableOnly,
        "LeftJoin",
        &[Slot::Src, Slot::Seq, Slot::L(1), Slot::L(1), Slot::L(2)],
        ReturnShape::Projection(4),
    ),
    (Owners::QueryableOnly, "AsQueryable", &[Slot::Seq], ReturnShape::AsQueryable),
    (Owners::QueryableOnly, "TagWith", &[Slot::Src, Slot::Val], ReturnShape::Passthrough),
    (Owners::QueryableOnly, "AsTracking", &[Slot::Src], ReturnShape::Passthrough),
    (Owners::QueryableOnly, "AsNoTracking", &[Slot::Src], ReturnShape::Passthrough),
    (Owners::QueryableOnly, "IgnoreQueryFilters", &[Slot::Src], ReturnShape::Passthrough),
    (Owners::EnumerableOnly, "ToList", &[Slot::Src], ReturnShape::Source),
];

/// Operators that keep the rows of their source, only filtering or
/// reordering them.
pub const ROW_PRESERVING_OPERATORS: &[&str] = &[
    "Where",
    "OrderBy",
    "OrderByDescending",
    "ThenBy",
    "ThenByDescending",
    "Take",
    "Skip",
    "Distinct",
    "DefaultIfEmpty",
    "AsQueryable",
    "TagWith",
    "AsTracking",
    "AsNoTracking",
    "IgnoreQueryFilters",
];

/// Operators returning a single element of their source.
pub const ELEMENT_OPERATORS: &[&str] = &[
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
];

type OverloadMap =
    HashMap<(&'static str, &'static str), Vec<Arc<OperatorSignature>>, ahash::RandomState>;

/// All known operator overloads, keyed by owner and name.
#[derive(Debug)]
pub struct OperatorRegistry {
    overloads: OverloadMap,
}

static REGISTRY: LazyLock<OperatorRegistry> = LazyLock::new(OperatorRegistry::build);

impl OperatorRegistry {
    pub fn global() -> &'static OperatorRegistry {
        &REGISTRY
    }

    fn build() -> Self {
        let mut overloads = OverloadMap::with_hasher(ahash::RandomState::new());

        for (owners, name, templates, returns) in TEMPLATES {
            let families: &[&'static str] = match owners {
                Owners::Both => &[ENUMERABLE, QUERYABLE],
                Owners::EnumerableOnly => &[ENUMERABLE],
                Owners::QueryableOnly => &[QUERYABLE],
            };

            for owner in families {
                let queryable = *owner == QUERYABLE;
                let params = templates
                    .iter()
                    .map(|t| match t {
                        Slot::Src if queryable => ParamShape::Queryable,
                        Slot::Src | Slot::Seq => ParamShape::Sequence,
                        Slot::L(n) if queryable => ParamShape::QuotedLambda(*n),
                        Slot::L(n) => ParamShape::Lambda(*n),
                        Slot::Val => ParamShape::Value,
                    })
                    .collect();

                overloads
                    .entry((*owner, *name))
                    .or_default()
                    .push(Arc::new(OperatorSignature {
                        owner: *owner,
                        name: *name,
                        params,
                        returns: *returns,
                    }));
            }
        }

        OperatorRegistry { overloads }
    }

    /// Check if the registry has any overloads for the method.
    pub fn is_operator(&self, method: &MethodRef) -> bool {
        self.overloads
            .keys()
            .any(|(owner, name)| *owner == method.owner && *name == method.name)
    }

    /// Find the best overload for the given argument shapes.
    pub fn find(&self, owner: &str, name: &str, args: &[ParamShape]) -> Option<Arc<OperatorSignature>> {
        let (_, candidates) = self
            .overloads
            .iter()
            .find(|((o, n), _)| *o == owner && *n == name)?;

        candidates
            .iter()
            .filter_map(|sig| sig.score(args).map(|score| (score, sig)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, sig)| sig.clone())
    }

    /// Find the overload a call resolves to.
    pub fn find_for_call(&self, call: &MethodCallExpr) -> Option<Arc<OperatorSignature>> {
        let shapes: Vec<_> = call.args.iter().map(|a| ParamShape::of_arg(a)).collect();
        self.find(&call.method.owner, &call.method.name, &shapes)
    }
}

/// Build a call to a registered operator, computing the result type and
/// generic arguments from the arguments.
///
/// Generic arguments are the element types of all sequence arguments
/// followed by the return types of all lambda arguments.
pub fn call_operator(owner: &str, name: &str, args: Vec<ExprRef>) -> Result<ExprRef> {
    let shapes: Vec<_> = args.iter().map(|a| ParamShape::of_arg(a)).collect();
    let sig = OperatorRegistry::global()
        .find(owner, name, &shapes)
        .ok_or_else(|| {
            DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                format!("No operator overload for {owner}.{name}"),
            )
            .with_field("shapes", format!("{shapes:?}"))
        })?;

    let datatype = sig.return_type(&args)?;

    let mut generic_args: Vec<DataType> = args
        .iter()
        .filter_map(|a| a.datatype().element_type().cloned())
        .collect();
    generic_args.extend(
        args.iter()
            .filter_map(|a| a.try_as_lambda().map(|l| l.body.datatype())),
    );

    Ok(Arc::new(Expression::MethodCall(MethodCallExpr {
        method: MethodRef::new(owner, name).with_generic_args(generic_args),
        object: None,
        args,
        datatype,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;
    use crate::expr::parameter_expr::ParameterExpr;

    #[test]
    fn registry_maps_shapes_per_owner() {
        let reg = OperatorRegistry::global();
        let sig = reg
            .find(
                QUERYABLE,
                "Where",
                &[ParamShape::Queryable, ParamShape::QuotedLambda(1)],
            )
            .unwrap();
        assert_eq!(ReturnShape::Source, sig.returns);

        // Compiled lambdas don't match queryable overloads.
        assert!(
            reg.find(
                QUERYABLE,
                "Where",
                &[ParamShape::Queryable, ParamShape::Lambda(1)]
            )
            .is_none()
        );

        // Deferred queries are accepted where any sequence is.
        assert!(
            reg.find(
                ENUMERABLE,
                "Where",
                &[ParamShape::Queryable, ParamShape::Lambda(1)]
            )
            .is_some()
        );
    }

    #[test]
    fn call_operator_computes_types() {
        let o = ParameterExpr::new("o", DataType::entity("Order"));
        let pred = expr::quote(expr::lambda(
            vec![o.clone()],
            expr::eq(
                expr::member(expr::param(&o), "Id", DataType::Int32),
                expr::lit(1),
            ),
        ));
        let filtered = call_operator(QUERYABLE, "Where", vec![expr::entity_set("Order"), pred]).unwrap();
        assert_eq!(DataType::queryable(DataType::entity("Order")), filtered.datatype());

        let first = call_operator(QUERYABLE, "First", vec![filtered]).unwrap();
        assert_eq!(DataType::entity("Order"), first.datatype());

        let count = call_operator(QUERYABLE, "Count", vec![expr::entity_set("Order")]).unwrap();
        assert_eq!(DataType::Int32, count.datatype());
    }

    #[test]
    fn call_operator_unknown_overload() {
        let err = call_operator(QUERYABLE, "Where", vec![expr::entity_set("Order")]).unwrap_err();
        assert_eq!(ErrorKind::UnsupportedExpressionShape, err.kind());
    }

    #[test]
    fn markers_only_on_queryable() {
        let call = MethodCallExpr {
            method: MethodRef::new(ENUMERABLE, "TagWith"),
            object: None,
            args: Vec::new(),
            datatype: DataType::Null,
        };
        assert_eq!(None, MarkerKind::from_call(&call));
    }
}
