use quarry_error::{DbError, ErrorKind, NODE_FIELD, Result};

use super::QueryRewritePass;
use super::state::{CompilationState, QueryMetadata, TrackingBehavior};
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::scalar::{ConstantValue, ScalarValue};
use crate::expr::{ExprRef, Expression};
use crate::operators::MarkerKind;
use crate::visitor::{ExpressionVisitor, walk_children};

/// Strip marker operators from the tree, recording what they carry into the
/// query metadata.
#[derive(Debug)]
pub struct MetadataExtraction;

impl QueryRewritePass for MetadataExtraction {
    fn name(&self) -> &'static str {
        "metadata_extraction"
    }

    fn rewrite(&self, state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        let mut extractor = Extractor {
            metadata: &mut state.metadata,
        };
        extractor.visit(expr)
    }
}

struct Extractor<'a> {
    metadata: &'a mut QueryMetadata,
}

impl ExpressionVisitor for Extractor<'_> {
    fn visit_method_call(&mut self, expr: &ExprRef, call: &MethodCallExpr) -> Result<ExprRef> {
        let Some(marker) = MarkerKind::from_call(call) else {
            return walk_children(self, expr);
        };

        let source = call.args.first().ok_or_else(|| {
            DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                "Marker call without a source",
            )
            .with_field(NODE_FIELD, expr)
        })?;

        // Inner markers are recorded first, so tags keep source order and the
        // outermost tracking marker wins.
        let source = self.visit(source)?;

        match marker {
            MarkerKind::TagWith => {
                let tag = match call.args.get(1).map(|a| a.as_ref()) {
                    Some(Expression::Constant(c)) => match &c.value {
                        ConstantValue::Scalar(ScalarValue::Utf8(s)) => s.clone(),
                        _ => return Err(bad_tag(expr)),
                    },
                    _ => return Err(bad_tag(expr)),
                };
                self.metadata.tags.push(tag);
            }
            MarkerKind::AsTracking => self.metadata.tracking = TrackingBehavior::Tracking,
            MarkerKind::AsNoTracking => self.metadata.tracking = TrackingBehavior::NoTracking,
            MarkerKind::IgnoreQueryFilters => self.metadata.ignore_query_filters = true,
        }

        Ok(source)
    }
}

fn bad_tag(expr: &ExprRef) -> DbError {
    DbError::with_kind(
        ErrorKind::UnsupportedExpressionShape,
        "Query tag must be a string constant",
    )
    .with_field(NODE_FIELD, expr)
}
