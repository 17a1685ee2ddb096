//! Expansion of navigation member accesses.
//!
//! To-one navigations become joins against the target entity's table. The
//! join is attached to the row source the navigation was reached from, and
//! the access itself becomes a `SourceRef` to the joined row. Joins are
//! recorded in the compilation state so following the same navigation from
//! the same source again reuses the existing join.
//!
//! To-many navigations become correlated subqueries over the target entity
//! set.
//!
//! Lambda parameters are bound to the source keys of the operator sequences
//! they range over. Joins created while visiting a lambda are held as
//! pending until the operator owning the source they hang off has been
//! visited, then wrapped around that source in creation order.

use quarry_error::{DbError, ErrorKind, NODE_FIELD, Result};
use tracing::trace;

use super::QueryRewritePass;
use super::state::{CompilationState, JoinedNavigation, SourceKey};
use crate::datatype::DataType;
use crate::expr::binary_expr::BinaryOperator;
use crate::expr::lambda_expr::LambdaExpr;
use crate::expr::member_expr::MemberExpr;
use crate::expr::method_call_expr::MethodCallExpr;
use crate::expr::parameter_expr::ParameterExpr;
use crate::expr::{self, ExprRef, Expression};
use crate::model::{Cardinality, EntityTypeDescriptor, ForeignKeyColumn, NavigationDescriptor};
use crate::operators::{OperatorRegistry, ParamShape, QUERYABLE, ROW_PRESERVING_OPERATORS, call_operator};
use crate::sql::QuerySourceAlias;
use crate::sql::base_table::BaseTableExpr;
use crate::sql::navigation_join::{JoinKind, NavigationJoinExpr};
use crate::sql::source_ref::SourceRefExpr;
use crate::visitor::{ExpressionVisitor, rebuild_if_changed, walk_children};

#[derive(Debug)]
pub struct NavigationExpansion;

impl QueryRewritePass for NavigationExpansion {
    fn name(&self) -> &'static str {
        "navigation_expansion"
    }

    fn rewrite(&self, state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef> {
        let mut expander = Expander {
            state,
            scopes: Vec::new(),
            pending: Vec::new(),
        };
        let out = expander.visit(expr)?;

        if let Some(join) = expander.pending.first() {
            return Err(DbError::new("Navigation join was never attached to a row source")
                .with_field("alias", join.alias)
                .with_field("navigation", &join.navigation));
        }

        Ok(out)
    }
}

/// A join waiting for its anchor source.
#[derive(Debug)]
struct PendingJoin {
    anchor: SourceKey,
    alias: QuerySourceAlias,
    navigation: String,
    kind: JoinKind,
    inner: ExprRef,
    outer_key: ExprRef,
    inner_key: ExprRef,
}

struct Expander<'s, 'a> {
    state: &'s mut CompilationState<'a>,
    /// Lambda parameters in scope, innermost last. Parameters not ranging
    /// over a known source map to None.
    scopes: Vec<(ParameterExpr, Option<SourceKey>)>,
    pending: Vec<PendingJoin>,
}

impl ExpressionVisitor for Expander<'_, '_> {
    fn visit_method_call(&mut self, expr: &ExprRef, call: &MethodCallExpr) -> Result<ExprRef> {
        let (expr, _) = self.expand_operator(expr, call)?;
        Ok(expr)
    }

    fn visit_lambda(&mut self, expr: &ExprRef, lambda: &LambdaExpr) -> Result<ExprRef> {
        let keys = vec![None; lambda.params.len()];
        self.visit_bound_lambda(expr, lambda, &keys)
    }

    fn visit_member(&mut self, expr: &ExprRef, member: &MemberExpr) -> Result<ExprRef> {
        // Left to right, so `a.B.C` expands `a.B` first.
        let target = self.visit(&member.target)?;
        let rebuilt = rebuild_if_changed(expr, vec![target.clone()])?;

        let model = self.state.model;
        let target_type = target.datatype();
        let Some(declaring) = target_type.entity_name().and_then(|name| model.entity(name))
        else {
            return Ok(rebuilt);
        };
        let Some(nav) = declaring.navigation(&member.member) else {
            return Ok(rebuilt);
        };

        match nav.cardinality {
            Cardinality::One => match self.row_key(&target) {
                Some(key) => self.expand_reference(&rebuilt, key, declaring, nav),
                // Not a row of a known source. Left for verification to
                // report.
                None => Ok(rebuilt),
            },
            Cardinality::Many => self.expand_collection(&rebuilt, &target, nav),
        }
    }
}

impl<'a> Expander<'_, 'a> {
    /// Expand an operator call, returning the new node and the source key
    /// for its rows if it produces a sequence.
    fn expand_operator(
        &mut self,
        expr: &ExprRef,
        call: &MethodCallExpr,
    ) -> Result<(ExprRef, Option<SourceKey>)> {
        let Some(sig) = OperatorRegistry::global().find_for_call(call) else {
            return Ok((walk_children(self, expr)?, None));
        };

        let mut args = Vec::with_capacity(call.args.len());
        let mut seq_keys: Vec<(usize, SourceKey)> = Vec::new();
        for (idx, (arg, shape)) in call.args.iter().zip(&sig.params).enumerate() {
            match shape {
                ParamShape::Queryable | ParamShape::Sequence => {
                    let (arg, key) = self.expand_sequence(arg)?;
                    seq_keys.push((idx, key));
                    args.push(arg);
                }
                _ => args.push(arg.clone()),
            }
        }

        for (idx, (arg, shape)) in call.args.iter().zip(&sig.params).enumerate() {
            match shape {
                ParamShape::Lambda(n) | ParamShape::QuotedLambda(n) => {
                    let keys: Vec<_> = lambda_bindings(&call.method.name, idx, *n)
                        .into_iter()
                        .map(|ordinal| ordinal.and_then(|o| seq_keys.get(o)).map(|(_, k)| *k))
                        .collect();
                    args[idx] = self.visit_lambda_arg(arg, &keys)?;
                }
                ParamShape::Value => args[idx] = self.visit(arg)?,
                _ => (),
            }
        }

        for (idx, key) in &seq_keys {
            let anchor = self.state.anchor_of(*key).unwrap_or(*key);
            args[*idx] = self.attach_joins(anchor, args[*idx].clone());
        }

        let first_key = seq_keys.first().map(|(_, k)| *k);
        if call.method.name == "AsQueryable" && args[0].datatype().is_queryable() {
            // Source already deferred after expansion.
            return Ok((args[0].clone(), first_key));
        }

        let expr = rebuild_if_changed(expr, args)?;
        let key = if ROW_PRESERVING_OPERATORS.contains(&call.method.name.as_str()) {
            first_key
        } else {
            match expr.datatype().element_type() {
                Some(element) if expr.datatype().is_sequence_like() => {
                    Some(self.state.new_root(element.clone()))
                }
                _ => None,
            }
        };
        Ok((expr, key))
    }

    /// Expand an operator sequence argument and get its source key.
    fn expand_sequence(&mut self, arg: &ExprRef) -> Result<(ExprRef, SourceKey)> {
        let expr = match arg.as_ref() {
            Expression::MethodCall(call) => match self.expand_operator(arg, call)? {
                (expr, Some(key)) => return Ok((expr, key)),
                (expr, None) => expr,
            },
            _ => self.visit(arg)?,
        };
        let element = expr
            .datatype()
            .element_type()
            .cloned()
            .unwrap_or(DataType::Null);
        Ok((expr, self.state.new_root(element)))
    }

    fn visit_lambda_arg(&mut self, arg: &ExprRef, keys: &[Option<SourceKey>]) -> Result<ExprRef> {
        match arg.as_ref() {
            Expression::Quote(quote) => {
                let lambda = self.visit_lambda_arg(&quote.lambda, keys)?;
                rebuild_if_changed(arg, vec![lambda])
            }
            Expression::Lambda(lambda) => self.visit_bound_lambda(arg, lambda, keys),
            _ => self.visit(arg),
        }
    }

    fn visit_bound_lambda(
        &mut self,
        expr: &ExprRef,
        lambda: &LambdaExpr,
        keys: &[Option<SourceKey>],
    ) -> Result<ExprRef> {
        let depth = self.scopes.len();
        for (idx, param) in lambda.params.iter().enumerate() {
            let key = keys.get(idx).copied().flatten();
            self.scopes.push((param.clone(), key));
        }
        let body = self.visit(&lambda.body);
        self.scopes.truncate(depth);
        rebuild_if_changed(expr, vec![body?])
    }

    /// Get the source key of an expression denoting a row.
    fn row_key(&self, expr: &ExprRef) -> Option<SourceKey> {
        match expr.as_ref() {
            Expression::Parameter(param) => self
                .scopes
                .iter()
                .rev()
                .find(|(p, _)| p.name == param.name)
                .and_then(|(p, key)| if p == param { *key } else { None }),
            Expression::Extension(_) => expr
                .try_as_extension::<SourceRefExpr>()
                .map(|source| SourceKey::Alias(source.alias)),
            _ => None,
        }
    }

    fn expand_reference(
        &mut self,
        access: &ExprRef,
        key: SourceKey,
        declaring: &EntityTypeDescriptor,
        nav: &NavigationDescriptor,
    ) -> Result<ExprRef> {
        if let Some(existing) = self.state.find_join(key, &nav.name) {
            return Ok(expr::extension(SourceRefExpr {
                alias: existing.alias,
                entity: existing.target.clone(),
            }));
        }

        let model = self.state.model;
        let target = model.entity(&nav.target).ok_or_else(|| {
            DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                format!("Navigation target {} is not in the model", nav.target),
            )
            .with_field(NODE_FIELD, access)
        })?;

        let anchor = self.state.anchor_of(key).ok_or_else(|| {
            DbError::new("Navigation reached from an unknown source").with_field(NODE_FIELD, access)
        })?;
        let anchor_row = self
            .state
            .root_element_type(anchor)
            .cloned()
            .ok_or_else(|| DbError::new("Missing root source").with_field(NODE_FIELD, access))?;

        let r = ParameterExpr::new("r", anchor_row);
        let outer_row = match key {
            SourceKey::Root(_) => expr::param(&r),
            SourceKey::Alias(alias) => expr::extension(SourceRefExpr {
                alias,
                entity: declaring.name.clone(),
            }),
        };
        let i = ParameterExpr::new("i", DataType::entity(&target.name));
        let inner_row = expr::param(&i);

        let (outer_cols, inner_cols): (Vec<_>, Vec<_>) = if nav.foreign_key_on_source {
            nav.foreign_key.iter().map(|c| (&c.dependent, &c.principal)).unzip()
        } else {
            nav.foreign_key.iter().map(|c| (&c.principal, &c.dependent)).unzip()
        };
        let names: Vec<_> = nav.foreign_key.iter().map(|c| c.principal.as_str()).collect();
        let outer_key = key_expr(&outer_row, declaring, &outer_cols, &names, access)?;
        let inner_key = key_expr(&inner_row, target, &inner_cols, &names, access)?;

        let alias = self.state.next_alias();
        // Rows reached through a left join may be missing, so every hop
        // after it stays outer.
        let kind = if nav.required && !self.state.is_optional_source(key) {
            JoinKind::Inner
        } else {
            JoinKind::LeftOuter
        };
        trace!(navigation = %nav.name, %alias, ?kind, "expanded navigation into join");

        self.state.insert_join(
            key,
            &nav.name,
            JoinedNavigation {
                alias,
                target: target.name.clone(),
                anchor,
                kind,
            },
        );
        self.pending.push(PendingJoin {
            anchor,
            alias,
            navigation: nav.name.clone(),
            kind,
            inner: expr::extension(BaseTableExpr {
                alias,
                table: target.table.clone(),
                schema: target.schema.clone(),
                entity: target.name.clone(),
            }),
            outer_key: expr::lambda(vec![r], outer_key),
            inner_key: expr::lambda(vec![i], inner_key),
        });

        Ok(expr::extension(SourceRefExpr {
            alias,
            entity: target.name.clone(),
        }))
    }

    /// Turn a collection navigation into a filter over the target set.
    fn expand_collection(
        &mut self,
        access: &ExprRef,
        owner: &ExprRef,
        nav: &NavigationDescriptor,
    ) -> Result<ExprRef> {
        let model = self.state.model;
        let declaring = owner
            .datatype()
            .entity_name()
            .and_then(|name| model.entity(name))
            .ok_or_else(|| DbError::new("Missing declaring entity").with_field(NODE_FIELD, access))?;
        let target = model.entity(&nav.target).ok_or_else(|| {
            DbError::with_kind(
                ErrorKind::UnsupportedExpressionShape,
                format!("Navigation target {} is not in the model", nav.target),
            )
            .with_field(NODE_FIELD, access)
        })?;

        let e = ParameterExpr::new("e", DataType::entity(&target.name));
        let element = expr::param(&e);
        let predicates = nav
            .foreign_key
            .iter()
            .map(|ForeignKeyColumn { dependent, principal }| {
                let (target_col, owner_col) = if nav.foreign_key_on_source {
                    (principal, dependent)
                } else {
                    (dependent, principal)
                };
                Ok(expr::eq(
                    property(&element, target, target_col, access)?,
                    property(owner, declaring, owner_col, access)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let predicate = expr::fold_binary(BinaryOperator::And, predicates).ok_or_else(|| {
            DbError::new("Navigation without foreign key").with_field(NODE_FIELD, access)
        })?;

        trace!(navigation = %nav.name, "expanded collection navigation into subquery");
        call_operator(
            QUERYABLE,
            "Where",
            vec![
                expr::entity_set(&target.name),
                expr::quote(expr::lambda(vec![e], predicate)),
            ],
        )
    }

    /// Wrap a source in all pending joins anchored at the given key.
    fn attach_joins(&mut self, anchor: SourceKey, mut source: ExprRef) -> ExprRef {
        let (ready, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|join| join.anchor == anchor);
        self.pending = rest;

        for join in ready {
            source = expr::extension(NavigationJoinExpr {
                alias: join.alias,
                navigation: join.navigation,
                kind: join.kind,
                outer: source,
                inner: join.inner,
                outer_key: join.outer_key,
                inner_key: join.inner_key,
            });
        }
        source
    }
}

/// Map the parameters of the lambda at `arg_idx` to the ordinal of the
/// sequence argument they range over.
fn lambda_bindings(operator: &str, arg_idx: usize, params: usize) -> Vec<Option<usize>> {
    let mut bindings = vec![None; params];
    match (operator, arg_idx) {
        ("Join" | "LeftJoin" | "GroupJoin", 2) => bindings[0] = Some(0),
        ("Join" | "LeftJoin" | "GroupJoin", 3) => bindings[0] = Some(1),
        ("Join" | "LeftJoin", 4) if params == 2 => {
            bindings[0] = Some(0);
            bindings[1] = Some(1);
        }
        // The second parameter of a group join result selector is a group.
        ("GroupJoin", 4) => bindings[0] = Some(0),
        _ if params > 0 => bindings[0] = Some(0),
        _ => (),
    }
    bindings
}

fn property(
    row: &ExprRef,
    entity: &EntityTypeDescriptor,
    name: &str,
    access: &ExprRef,
) -> Result<ExprRef> {
    let prop = entity.property(name).ok_or_else(|| {
        DbError::new(format!("Missing property {name} on {}", entity.name))
            .with_field(NODE_FIELD, access)
    })?;
    Ok(expr::member(row.clone(), &prop.name, prop.datatype.clone()))
}

/// Build a join key over a row. Composite keys become an anonymous object
/// with members named after the principal key properties.
fn key_expr(
    row: &ExprRef,
    entity: &EntityTypeDescriptor,
    columns: &[&String],
    names: &[&str],
    access: &ExprRef,
) -> Result<ExprRef> {
    if let [column] = columns {
        return property(row, entity, column, access);
    }
    let members = columns
        .iter()
        .zip(names)
        .map(|(column, name)| Ok((name.to_string(), property(row, entity, column, access)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(expr::new_object(members))
}
