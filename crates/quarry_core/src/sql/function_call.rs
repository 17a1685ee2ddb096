use std::any::Any;
use std::fmt;
use std::hash::Hasher;

use quarry_error::{DbError, ErrorKind, Result};

use crate::datatype::DataType;
use crate::expr::extension::{ExtensionNode, eq_downcast, hash_with_name};
use crate::expr::parameter_expr::QueryParameter;
use crate::expr::scalar::{ConstantValue, ScalarValue};
use crate::expr::{ExprRef, Expression};
use crate::functions::DbFunctionDescriptor;
use crate::functions::executor::ScalarFunctionExecutor;

/// Call of a resolved database function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionCallExpr {
    pub function: DbFunctionDescriptor,
    pub args: Vec<ExprRef>,
}

impl FunctionCallExpr {
    /// Evaluate the call through an executor.
    ///
    /// Every argument must be a scalar constant or a parameter with a bound
    /// scalar value.
    pub fn execute_scalar(
        &self,
        executor: &dyn ScalarFunctionExecutor,
        parameters: &[QueryParameter],
    ) -> Result<ScalarValue> {
        if self.function.is_table_valued() {
            return Err(DbError::with_kind(
                ErrorKind::TableValuedFunctionInScalarPosition,
                format!(
                    "Cannot execute table-valued function '{}' as a scalar",
                    self.function.qualified_name()
                ),
            ));
        }

        let args = self
            .args
            .iter()
            .map(|arg| Self::evaluate_arg(arg, parameters))
            .collect::<Result<Vec<_>>>()?;

        executor.execute(&self.function, &args)
    }

    fn evaluate_arg(arg: &ExprRef, parameters: &[QueryParameter]) -> Result<ScalarValue> {
        let value = match arg.as_ref() {
            Expression::Constant(constant) => Some(&constant.value),
            Expression::Parameter(param) => parameters
                .iter()
                .find(|p| p.name == param.name)
                .map(|p| &p.value),
            _ => None,
        };

        match value {
            Some(ConstantValue::Scalar(v)) => Ok(v.clone()),
            _ => Err(DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                "Function argument is not a known scalar value",
            )
            .with_field("node", arg)),
        }
    }
}

impl ExtensionNode for FunctionCallExpr {
    fn name(&self) -> &'static str {
        "FunctionCall"
    }

    fn datatype(&self) -> DataType {
        self.function.return_type().clone()
    }

    fn children(&self) -> Vec<&ExprRef> {
        self.args.iter().collect()
    }

    fn with_new_children(&self, children: Vec<ExprRef>) -> Result<Box<dyn ExtensionNode>> {
        crate::expr::extension::check_children_len(self.name(), &children, self.args.len())?;
        Ok(Box::new(FunctionCallExpr {
            function: self.function.clone(),
            args: children,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_node(&self, other: &dyn ExtensionNode) -> bool {
        eq_downcast(self, other)
    }

    fn hash_node(&self, state: &mut dyn Hasher) {
        hash_with_name(self.name(), self, state)
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.function.qualified_name())?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataTypeId;
    use crate::expr;
    use crate::expr::parameter_expr::ParameterExpr;
    use crate::functions::Signature;

    #[derive(Debug)]
    struct Concat;

    impl ScalarFunctionExecutor for Concat {
        fn execute(&self, _function: &DbFunctionDescriptor, args: &[ScalarValue]) -> Result<ScalarValue> {
            let s: String = args
                .iter()
                .map(|a| a.try_as_str().unwrap_or_default().to_string())
                .collect();
            Ok(ScalarValue::Utf8(s))
        }
    }

    fn concat_fn() -> DbFunctionDescriptor {
        DbFunctionDescriptor::scalar(
            "concat",
            Signature::new([DataTypeId::Utf8, DataTypeId::Utf8], DataType::Utf8),
        )
    }

    #[test]
    fn execute_with_constants_and_parameters() {
        let p = ParameterExpr::new("__p_0", DataType::Utf8);
        let call = FunctionCallExpr {
            function: concat_fn(),
            args: vec![expr::lit("a"), expr::param(&p)],
        };
        let params = [QueryParameter {
            name: "__p_0".to_string(),
            value: ConstantValue::Scalar(ScalarValue::from("b")),
        }];
        let out = call.execute_scalar(&Concat, &params).unwrap();
        assert_eq!(ScalarValue::from("ab"), out);
    }

    #[test]
    fn execute_rejects_unbound_parameter() {
        let p = ParameterExpr::new("__p_9", DataType::Utf8);
        let call = FunctionCallExpr {
            function: concat_fn(),
            args: vec![expr::lit("a"), expr::param(&p)],
        };
        let err = call.execute_scalar(&Concat, &[]).unwrap_err();
        assert_eq!(ErrorKind::UnsupportedExpressionShape, err.kind());
    }

    #[test]
    fn execute_rejects_table_valued() {
        let call = FunctionCallExpr {
            function: DbFunctionDescriptor::table_valued(
                "rows",
                Signature::new(Vec::new(), DataType::queryable(DataType::Int32)),
            ),
            args: Vec::new(),
        };
        let err = call.execute_scalar(&Concat, &[]).unwrap_err();
        assert_eq!(ErrorKind::TableValuedFunctionInScalarPosition, err.kind());
    }
}
