use quarry_error::{DbError, ErrorKind, NODE_FIELD, Result};
use tracing::trace;

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::extension::ExtensionNode;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::{self, ExprRef, Expression};
use crate::operators::{OperatorRegistry, ParamShape};
use crate::sql::function_call::FunctionCallExpr;
use crate::sql::table_function::TableValuedFunctionExpr;
use crate::visitor::{ExpressionVisitor, dispatch, rebuild_if_changed, walk_children};

/// Resolve calls of catalog functions into function call nodes.
///
/// Scalar functions become `FunctionCall` nodes wherever they appear.
/// Table-valued functions become table expressions, and are only accepted
/// where a row source is expected: the query root, operator sequence
/// arguments, the collection selector of `SelectMany`, and row source
/// children of extension nodes.
#[derive(Debug)]
pub struct FunctionPreprocessing;

impl QueryRewritePass for FunctionPreprocessing {
    fn name(&self) -> &'static str {
        "function_preprocessing"
    }

    fn rewrite(&self, state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        let mut resolver = FunctionResolver {
            state,
            row_source: true,
        };
        resolver.visit(expr)
    }
}

struct FunctionResolver<'s, 'a> {
    state: &'s mut CompilationState<'a>,
    /// Whether the next visited node is in row source position. Reset on
    /// every visit.
    row_source: bool,
}

impl ExpressionVisitor for FunctionResolver<'_, '_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let row_source = std::mem::take(&mut self.row_source);
        match expr.as_ref() {
            Expression::MethodCall(call) => self.resolve_call(expr, call, row_source),
            _ => dispatch(self, expr),
        }
    }

    fn visit_extension(&mut self, expr: &ExprRef, node: &dyn ExtensionNode) -> Result<ExprRef> {
        let mut children = Vec::with_capacity(node.children().len());
        for (idx, child) in node.children().into_iter().enumerate() {
            self.row_source = node.child_is_row_source(idx);
            children.push(self.visit(child)?);
        }
        rebuild_if_changed(expr, children)
    }
}

impl FunctionResolver<'_, '_> {
    fn resolve_call(
        &mut self,
        expr: &ExprRef,
        call: &MethodCallExpr,
        row_source: bool,
    ) -> Result<ExprRef> {
        let catalog = self.state.catalog;
        if let Some(set) = catalog.find_function(&call.method) {
            let args = call
                .args
                .iter()
                .map(|arg| self.visit(arg))
                .collect::<Result<Vec<_>>>()?;
            let inputs: Vec<_> = args.iter().map(|arg| arg.datatype()).collect();
            let function = set
                .resolve(&inputs)
                .map_err(|e| e.with_field(NODE_FIELD, expr))?
                .clone();

            trace!(method = %call.method, function = %function.qualified_name(), "resolved function");

            let call = FunctionCallExpr { function, args };
            if !call.function.is_table_valued() {
                return Ok(expr::extension(call));
            }
            if !row_source {
                return Err(DbError::with_kind(
                    ErrorKind::TableValuedFunctionInScalarPosition,
                    format!(
                        "Table-valued function '{}' can only be used as a row source",
                        call.function.qualified_name()
                    ),
                )
                .with_field(NODE_FIELD, expr));
            }
            return Ok(expr::extension(TableValuedFunctionExpr {
                alias: self.state.next_alias(),
                call,
            }));
        }

        let Some(sig) = OperatorRegistry::global().find_for_call(call) else {
            return walk_children(self, expr);
        };

        let mut args = Vec::with_capacity(call.args.len());
        for (idx, (arg, shape)) in call.args.iter().zip(&sig.params).enumerate() {
            let arg = match shape {
                ParamShape::Queryable | ParamShape::Sequence => {
                    self.row_source = true;
                    self.visit(arg)?
                }
                ParamShape::Lambda(_) | ParamShape::QuotedLambda(_)
                    if call.method.name == "SelectMany" && idx == 1 =>
                {
                    self.visit_row_source_lambda(arg)?
                }
                _ => self.visit(arg)?,
            };
            args.push(arg);
        }
        rebuild_if_changed(expr, args)
    }

    /// Visit a lambda whose body produces rows.
    fn visit_row_source_lambda(&mut self, arg: &ExprRef) -> Result<ExprRef> {
        match arg.as_ref() {
            Expression::Quote(quote) => {
                let lambda = self.visit_row_source_lambda(&quote.lambda)?;
                rebuild_if_changed(arg, vec![lambda])
            }
            Expression::Lambda(lambda) => {
                self.row_source = true;
                let body = self.visit(&lambda.body)?;
                rebuild_if_changed(arg, vec![body])
            }
            _ => self.visit(arg),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datatype::DataType;
    use crate::sql::QuerySourceAlias;
    use crate::testutil::{db_function, get, quoted, queryable, row, sample_catalog, sample_model};

    fn rewrite(expr: &ExprRef) -> Result<ExprRef> {
        let model = sample_model();
        let catalog = sample_catalog();
        let mut state = CompilationState::new(&model, &catalog);
        FunctionPreprocessing.rewrite(&mut state, expr)
    }

    #[test]
    fn scalar_function_resolved() {
        let c = row("c", "Customer");
        let soundex = db_function("Soundex", vec![get(&expr::param(&c), "Name")], DataType::Utf8);
        let input = queryable(
            "Where",
            vec![
                expr::entity_set("Customer"),
                quoted(&[&c], expr::eq(soundex, expr::lit("R163"))),
            ],
        )
        .unwrap();

        let got = rewrite(&input).unwrap();
        assert_eq!(
            "Queryable.Where(Set<Customer>, quote(c => (soundex(c.Name) == 'R163')))",
            got.to_string()
        );
    }

    #[test]
    fn two_argument_overload_picked_by_arity() {
        let l = row("l", "OrderLine");
        let input = db_function(
            "Round",
            vec![get(&expr::param(&l), "Quantity"), expr::lit(2)],
            DataType::Decimal,
        );
        let got = rewrite(&input).unwrap();
        let call = got.try_as_extension::<FunctionCallExpr>().unwrap();
        assert_eq!(2, call.function.signature.positional_args.len());
        assert_eq!(DataType::Decimal, got.datatype());
    }

    #[test]
    fn arity_mismatch_unresolved() {
        let input = db_function("Soundex", vec![expr::lit("a"), expr::lit("b")], DataType::Utf8);
        let err = rewrite(&input).unwrap_err();
        assert_eq!(ErrorKind::UnresolvedFunctionOverload, err.kind());
        assert!(err.node().is_some());
    }

    #[test]
    fn table_valued_function_as_row_source() {
        let o = row("o", "Order");
        let recent = db_function(
            "RecentOrders",
            vec![expr::lit(7)],
            DataType::queryable(DataType::entity("Order")),
        );
        let input = queryable(
            "Where",
            vec![
                recent,
                quoted(&[&o], expr::eq(get(&expr::param(&o), "Id"), expr::lit(1))),
            ],
        )
        .unwrap();

        let got = rewrite(&input).unwrap();
        let call = got.try_as_method_call().unwrap();
        let tvf = call.args[0].try_as_extension::<TableValuedFunctionExpr>().unwrap();
        assert_eq!(QuerySourceAlias(0), tvf.alias);
        assert_eq!("sales.recent_orders", tvf.call.function.qualified_name());
    }

    #[test]
    fn table_valued_function_as_query_root() {
        let input = db_function(
            "RecentOrders",
            vec![expr::lit(7)],
            DataType::queryable(DataType::entity("Order")),
        );
        let got = rewrite(&input).unwrap();
        assert!(got.try_as_extension::<TableValuedFunctionExpr>().is_some());
    }

    #[test]
    fn table_valued_function_in_scalar_position() {
        let c = row("c", "Customer");
        let recent = db_function(
            "RecentOrders",
            vec![get(&expr::param(&c), "Id")],
            DataType::queryable(DataType::entity("Order")),
        );
        let input = queryable(
            "Select",
            vec![
                expr::entity_set("Customer"),
                quoted(&[&c], expr::new_object(vec![("Recent".to_string(), recent)])),
            ],
        )
        .unwrap();
        let err = rewrite(&input).unwrap_err();
        assert_eq!(ErrorKind::TableValuedFunctionInScalarPosition, err.kind());
    }

    #[test]
    fn select_many_collection_is_row_source() {
        let c = row("c", "Customer");
        let recent = db_function(
            "RecentOrders",
            vec![get(&expr::param(&c), "Id")],
            DataType::queryable(DataType::entity("Order")),
        );
        let input = queryable(
            "SelectMany",
            vec![expr::entity_set("Customer"), quoted(&[&c], recent)],
        )
        .unwrap();
        let got = rewrite(&input).unwrap();
        assert!(got.any(&mut |e| e.try_as_extension::<TableValuedFunctionExpr>().is_some()));
    }

    #[test]
    fn second_run_is_identity() {
        let c = row("c", "Customer");
        let soundex = db_function("Soundex", vec![get(&expr::param(&c), "Name")], DataType::Utf8);
        let input = queryable(
            "Select",
            vec![expr::entity_set("Customer"), quoted(&[&c], soundex)],
        )
        .unwrap();
        let once = rewrite(&input).unwrap();
        let twice = rewrite(&once).unwrap();
        assert!(Arc::ptr_eq(&once, &twice));
    }
}
