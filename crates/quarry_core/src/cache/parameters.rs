use quarry_error::Result;

use crate::expr::constant_expr::ConstantExpr;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::parameter_expr::{ParameterExpr, QueryParameter};
use crate::expr::scalar::ConstantValue;
use crate::expr::{self, ExprRef};
use crate::operators::MarkerKind;
use crate::visitor::{ExpressionVisitor, rebuild_if_changed, walk_children};

/// Prefix of names given to extracted parameters.
pub const PARAMETER_PREFIX: &str = "__p_";

/// Replace literal values with query parameters.
///
/// Returns the parameterized tree and the extracted values in left-to-right
/// order. Null literals, entity sets, delegates and arguments of marker
/// calls are kept since passes make decisions based on them.
pub fn extract_parameters(expr: &ExprRef) -> Result<(ExprRef, Vec<QueryParameter>)> {
    let mut extractor = ParameterExtractor {
        parameters: Vec::new(),
    };
    let expr = extractor.visit(expr)?;
    Ok((expr, extractor.parameters))
}

struct ParameterExtractor {
    parameters: Vec<QueryParameter>,
}

impl ExpressionVisitor for ParameterExtractor {
    fn visit_constant(&mut self, expr: &ExprRef, constant: &ConstantExpr) -> Result<ExprRef> {
        let extract = match &constant.value {
            ConstantValue::Scalar(v) => !v.is_null(),
            ConstantValue::List(_) => true,
            ConstantValue::EntitySet(_) | ConstantValue::Delegate(_) => false,
        };
        if !extract {
            return Ok(expr.clone());
        }

        let name = format!("{PARAMETER_PREFIX}{}", self.parameters.len());
        let param = ParameterExpr::new(name.clone(), constant.datatype.clone());
        self.parameters.push(QueryParameter {
            name,
            value: constant.value.clone(),
        });
        Ok(expr::param(&param))
    }

    fn visit_method_call(&mut self, expr: &ExprRef, call: &MethodCallExpr) -> Result<ExprRef> {
        if MarkerKind::from_call(call).is_none() {
            return walk_children(self, expr);
        }
        // Only the source of a marker is a query, the rest is settings.
        let mut children: Vec<ExprRef> = expr.children().into_iter().cloned().collect();
        if let Some(source) = children.first_mut() {
            *source = self.visit(source)?;
        }
        rebuild_if_changed(expr, children)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datatype::DataType;
    use crate::expr::scalar::ScalarValue;
    use crate::testutil::{get, quoted, queryable, row};

    fn filter(value: ExprRef) -> ExprRef {
        let o = row("o", "Order");
        queryable(
            "Where",
            vec![
                expr::entity_set("Order"),
                quoted(&[&o], expr::eq(get(&expr::param(&o), "Status"), value)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn literals_become_parameters() {
        let (a, a_params) = extract_parameters(&filter(expr::lit("open"))).unwrap();
        let (b, b_params) = extract_parameters(&filter(expr::lit("closed"))).unwrap();

        assert_eq!(a, b);
        assert_eq!(
            vec![QueryParameter {
                name: "__p_0".to_string(),
                value: ConstantValue::Scalar(ScalarValue::Utf8("open".to_string())),
            }],
            a_params
        );
        assert_eq!("__p_0", b_params[0].name);
        assert_eq!(
            "Queryable.Where(Set<Order>, quote(o => (o.Status == __p_0)))",
            a.to_string()
        );
    }

    #[test]
    fn numbered_left_to_right() {
        let input = expr::and(
            expr::eq(expr::lit(1), expr::lit(2)),
            expr::eq(expr::lit(3), expr::lit(4)),
        );
        let (_, params) = extract_parameters(&input).unwrap();
        let values: Vec<_> = params
            .iter()
            .map(|p| (p.name.as_str(), p.value.clone()))
            .collect();
        assert_eq!(
            vec![
                ("__p_0", ConstantValue::Scalar(ScalarValue::Int32(1))),
                ("__p_1", ConstantValue::Scalar(ScalarValue::Int32(2))),
                ("__p_2", ConstantValue::Scalar(ScalarValue::Int32(3))),
                ("__p_3", ConstantValue::Scalar(ScalarValue::Int32(4))),
            ],
            values
        );
    }

    #[test]
    fn nulls_and_roots_kept() {
        let input = filter(expr::null(DataType::Utf8));
        let (got, params) = extract_parameters(&input).unwrap();
        assert!(params.is_empty());
        assert!(Arc::ptr_eq(&input, &got));
    }

    #[test]
    fn marker_arguments_kept() {
        let tagged = queryable(
            "TagWith",
            vec![filter(expr::lit("open")), expr::lit("report")],
        )
        .unwrap();
        let (got, params) = extract_parameters(&tagged).unwrap();
        assert_eq!(1, params.len());
        let call = got.try_as_method_call().unwrap();
        assert_eq!(expr::lit("report"), call.args[1]);
    }

    #[test]
    fn lists_extracted() {
        let list = expr::list(DataType::Int32, [ScalarValue::Int32(1), ScalarValue::Int32(2)]);
        let (got, params) = extract_parameters(&list).unwrap();
        assert_eq!(1, params.len());
        assert_eq!(DataType::sequence(DataType::Int32), got.datatype());
    }
}
