//! The query translation pipeline.
//!
//! A fixed sequence of rewrite passes turns a host-language query tree into a
//! normalized tree that only uses constructs SQL generation understands.

pub mod all_any_to_contains;
pub mod entity_equality;
pub mod enumerable_to_queryable;
pub mod function_preprocessing;
pub mod group_join_flattening;
pub mod invocation_removal;
pub mod metadata_extraction;
pub mod navigation_expansion;
pub mod null_check_removal;
pub mod state;
pub mod subquery_member_pushdown;
pub mod verify;

use std::fmt::{self, Debug};
use std::time::{Duration, Instant};

use quarry_error::{PASS_FIELD, Result};
use state::{CompilationState, QueryMetadata};
use tracing::{debug, trace};

use crate::expr::ExprRef;
use crate::functions::catalog::FunctionCatalog;
use crate::model::Model;

/// A single tree-to-tree rewrite.
///
/// Passes must be idempotent and must return the input node unchanged when
/// nothing in it matches.
pub trait QueryRewritePass: Debug + Sync + Send {
    /// Name used in diagnostics and profiling.
    fn name(&self) -> &'static str;

    fn rewrite(&self, state: &mut CompilationState, expr: &ExprRef) -> Result<ExprRef>;
}

/// Timings for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineProfileData {
    pub total: Duration,
    pub timings: Vec<(&'static str, Duration)>,
}

impl fmt::Display for PipelineProfileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[allow(clippy::write_literal)]
        writeln!(f, "{:<30} {:>14}", "Pass", "Elapsed (micro)")?;
        for (pass, elapsed) in &self.timings {
            writeln!(f, "{:<30} {:>14}", pass, elapsed.as_micros())?;
        }
        writeln!(f, "{:<30} {:>14}", "total", self.total.as_micros())
    }
}

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct TranslatedQuery {
    pub expr: ExprRef,
    pub metadata: QueryMetadata,
    pub profile: PipelineProfileData,
}

/// Runs the rewrite passes in order.
#[derive(Debug)]
pub struct QueryTranslationPipeline {
    passes: Vec<Box<dyn QueryRewritePass>>,
}

impl Default for QueryTranslationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTranslationPipeline {
    pub fn new() -> Self {
        QueryTranslationPipeline {
            passes: vec![
                Box::new(enumerable_to_queryable::EnumerableToQueryable),
                Box::new(metadata_extraction::MetadataExtraction),
                Box::new(invocation_removal::InvocationRemoval),
                Box::new(all_any_to_contains::AllAnyToContains),
                Box::new(group_join_flattening::GroupJoinFlattening),
                Box::new(null_check_removal::NullCheckRemoval),
                Box::new(entity_equality::EntityEquality),
                Box::new(subquery_member_pushdown::SubqueryMemberPushdown),
                Box::new(navigation_expansion::NavigationExpansion),
                Box::new(function_preprocessing::FunctionPreprocessing),
            ],
        }
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    /// Run every pass over the tree.
    ///
    /// Stops at the first failing pass. Errors get the failing pass's name
    /// attached if the pass didn't set one itself.
    pub fn translate(
        &self,
        model: &Model,
        catalog: &dyn FunctionCatalog,
        expr: &ExprRef,
    ) -> Result<TranslatedQuery> {
        let mut state = CompilationState::new(model, catalog);
        let start = Instant::now();
        let mut timings = Vec::with_capacity(self.passes.len());

        let mut current = expr.clone();
        for pass in &self.passes {
            let pass_start = Instant::now();
            current = pass
                .rewrite(&mut state, &current)
                .map_err(|e| e.with_field_if_absent(PASS_FIELD, pass.name()))?;
            let elapsed = pass_start.elapsed();

            trace!(
                pass = pass.name(),
                elapsed_us = elapsed.as_micros() as u64,
                "ran rewrite pass"
            );
            timings.push((pass.name(), elapsed));
        }

        let profile = PipelineProfileData {
            total: start.elapsed(),
            timings,
        };
        debug!(
            total_us = profile.total.as_micros() as u64,
            joins = state.num_joins(),
            tags = state.metadata.tags.len(),
            "translated query"
        );

        Ok(TranslatedQuery {
            expr: current,
            metadata: state.metadata,
            profile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_order() {
        let pipeline = QueryTranslationPipeline::new();
        let names: Vec<_> = pipeline.pass_names().collect();
        assert_eq!(
            vec![
                "enumerable_to_queryable",
                "metadata_extraction",
                "invocation_removal",
                "all_any_to_contains",
                "group_join_flattening",
                "null_check_removal",
                "entity_equality",
                "subquery_member_pushdown",
                "navigation_expansion",
                "function_preprocessing",
            ],
            names
        );
    }

    #[test]
    fn profile_display() {
        let profile = PipelineProfileData {
            total: Duration::from_micros(30),
            timings: vec![("a", Duration::from_micros(10))],
        };
        let s = profile.to_string();
        assert!(s.contains("Elapsed (micro)"));
        assert!(s.lines().any(|l| l.starts_with("a ") && l.ends_with("10")));
        assert!(s.lines().any(|l| l.starts_with("total") && l.ends_with("30")));
    }
}
