use quarry_error::{DbError, ErrorKind, NODE_FIELD, Result};

use super::QueryRewritePass;
use super::state::CompilationState;
use crate::expr::binary_expr::{BinaryExpr, BinaryOperator};
use crate::expr::{self, ExprRef, Expression};
use crate::model::{Cardinality, EntityTypeDescriptor, Model, PropertyDescriptor};
use crate::visitor::{ExpressionVisitor, walk_children};

/// Rewrite equality between entities into equality between their keys.
///
/// `a == b` becomes `a.K1 == b.K1 AND a.K2 == b.K2 ...` in key order, and
/// `a != b` becomes the `OR` of the per-key inequalities. Comparing against
/// null checks every key property for null.
#[derive(Debug)]
pub struct EntityEquality;

impl QueryRewritePass for EntityEquality {
    fn name(&self) -> &'static str {
        "entity_equality"
    }

    fn rewrite(&self, state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        KeyComparisonRewriter { model: state.model }.visit(expr)
    }
}

struct KeyComparisonRewriter<'a> {
    model: &'a Model,
}

impl ExpressionVisitor for KeyComparisonRewriter<'_> {
    fn visit_binary(&mut self, expr: &ExprRef, _binary: &BinaryExpr) -> Result<ExprRef> {
        let expr = walk_children(self, expr)?;
        match expr.as_ref() {
            Expression::Binary(binary) if binary.op.is_equality() => {
                Ok(self.rewrite_equality(&expr, binary)?.unwrap_or(expr))
            }
            _ => Ok(expr),
        }
    }
}

impl KeyComparisonRewriter<'_> {
    fn rewrite_equality(&self, expr: &ExprRef, binary: &BinaryExpr) -> Result<Option<ExprRef>> {
        let left_type = binary.left.datatype();
        let right_type = binary.right.datatype();
        let left_null = binary.left.is_null_constant();
        let right_null = binary.right.is_null_constant();

        let equal = binary.op == BinaryOperator::Eq;
        let (combine, compare) = if equal {
            (BinaryOperator::And, BinaryOperator::Eq)
        } else {
            (BinaryOperator::Or, BinaryOperator::NotEq)
        };

        if left_null && right_null {
            if left_type.entity_name().is_none() && right_type.entity_name().is_none() {
                return Ok(None);
            }
            return Ok(Some(expr::lit(equal)));
        }

        // Typed nulls take the null comparison path.
        let left_entity = left_type.entity_name().filter(|_| !left_null);
        let right_entity = right_type.entity_name().filter(|_| !right_null);

        let (entity_side, entity_name, other) = match (left_entity, right_entity) {
            (None, None) => return Ok(None),
            (Some(left), Some(right)) if left != right => {
                return Err(DbError::with_kind(
                    ErrorKind::IncompatibleEntityComparison,
                    format!("Cannot compare entities of type {left} and {right}"),
                )
                .with_field(NODE_FIELD, expr));
            }
            (Some(left), Some(_)) => {
                let entity = self.entity(expr, left)?;
                let comparisons = entity
                    .key_properties()
                    .map(|key| {
                        expr::binary(
                            compare,
                            self.key_access(&binary.left, key),
                            self.key_access(&binary.right, key),
                        )
                    })
                    .collect::<Vec<_>>();
                return Ok(expr::fold_binary(combine, comparisons));
            }
            (Some(name), None) => (&binary.left, name, &binary.right),
            (None, Some(name)) => (&binary.right, name, &binary.left),
        };

        if !other.is_null_constant() {
            return Err(DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                format!("Cannot compare entity of type {entity_name} with a non-entity value"),
            )
            .with_field(NODE_FIELD, expr));
        }

        let entity = self.entity(expr, entity_name)?;
        let checks = entity
            .key_properties()
            .map(|key| {
                let access = self.key_access(entity_side, key);
                if equal {
                    expr::is_null(access)
                } else {
                    expr::is_not_null(access)
                }
            })
            .collect::<Vec<_>>();
        Ok(expr::fold_binary(combine, checks))
    }

    fn entity(&self, expr: &ExprRef, name: &str) -> Result<&EntityTypeDescriptor> {
        self.model.entity(name).ok_or_else(|| {
            DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                format!("Entity type {name} is not in the model"),
            )
            .with_field(NODE_FIELD, expr)
        })
    }

    /// Access a key property of an entity-typed expression.
    ///
    /// If the entity is reached through a to-one navigation whose foreign
    /// key lives on the declaring side, the foreign key property is read
    /// instead, avoiding a join.
    fn key_access(&self, entity_expr: &ExprRef, key: &PropertyDescriptor) -> ExprRef {
        if let Expression::Member(member) = entity_expr.as_ref() {
            let dependent = member
                .target
                .datatype()
                .entity_name()
                .and_then(|name| self.model.entity(name))
                .and_then(|declaring| {
                    let nav = declaring.navigation(&member.member)?;
                    if nav.cardinality != Cardinality::One || !nav.foreign_key_on_source {
                        return None;
                    }
                    let column = nav.foreign_key.iter().find(|c| c.principal == key.name)?;
                    declaring.property(&column.dependent)
                });

            if let Some(dependent) = dependent {
                return expr::member(
                    member.target.clone(),
                    &dependent.name,
                    dependent.datatype.clone(),
                );
            }
        }
        expr::member(entity_expr.clone(), &key.name, key.datatype.clone())
    }
}
