use std::sync::Arc;

use quarry_error::Result;
use tracing::debug;

use crate::cache::parameters::extract_parameters;
use crate::cache::{CacheStats, CompiledQueryCache, ShapeKey};
use crate::config::translation::TranslationConfig;
use crate::expr::ExprRef;
use crate::expr::parameter_expr::QueryParameter;
use crate::functions::catalog::FunctionCatalog;
use crate::model::Model;
use crate::translate::state::QueryMetadata;
use crate::translate::verify::verify_normalized;
use crate::translate::{PipelineProfileData, QueryTranslationPipeline};

/// Result of translating one query shape. Shared between all queries with
/// that shape.
#[derive(Debug, Clone)]
pub struct CompiledEntry {
    pub expr: ExprRef,
    pub metadata: QueryMetadata,
    /// Pass timings, only recorded when profiling is enabled.
    pub profile: Option<PipelineProfileData>,
}

/// A compiled query along with the literal values pulled out of it.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub entry: Arc<CompiledEntry>,
    pub parameters: Vec<QueryParameter>,
    /// If the entry came from the cache.
    pub cached: bool,
}

/// Compiles query trees into normalized trees, caching by query shape.
///
/// Safe to share between threads. Translation happens outside of the cache
/// lock, so concurrent misses on the same shape may translate it more than
/// once, with the last result stored.
#[derive(Debug)]
pub struct QueryCompiler {
    model: Arc<Model>,
    catalog: Arc<dyn FunctionCatalog>,
    pipeline: QueryTranslationPipeline,
    config: TranslationConfig,
    cache: CompiledQueryCache<Arc<CompiledEntry>>,
}

impl QueryCompiler {
    pub fn new(model: Arc<Model>, catalog: Arc<dyn FunctionCatalog>) -> Self {
        Self::with_config(model, catalog, TranslationConfig::default())
    }

    pub fn with_config(
        model: Arc<Model>,
        catalog: Arc<dyn FunctionCatalog>,
        config: TranslationConfig,
    ) -> Self {
        QueryCompiler {
            model,
            catalog,
            pipeline: QueryTranslationPipeline::new(),
            cache: CompiledQueryCache::new(config.query_cache_capacity),
            config,
        }
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn compile(&self, expr: &ExprRef) -> Result<CompiledQuery> {
        let (shape, parameters) = if self.config.parameterize_literals {
            extract_parameters(expr)?
        } else {
            (expr.clone(), Vec::new())
        };

        let key = ShapeKey(shape);
        if self.config.enable_query_cache {
            if let Some(entry) = self.cache.get(&key) {
                return Ok(CompiledQuery {
                    entry,
                    parameters,
                    cached: true,
                });
            }
        }

        let entry = Arc::new(self.translate(&key.0)?);
        if self.config.enable_query_cache {
            self.cache.insert(key, entry.clone());
        }

        Ok(CompiledQuery {
            entry,
            parameters,
            cached: false,
        })
    }

    fn translate(&self, shape: &ExprRef) -> Result<CompiledEntry> {
        let translated = self
            .pipeline
            .translate(&self.model, self.catalog.as_ref(), shape)?;

        if self.config.verify_normalized_tree {
            verify_normalized(&self.model, &translated.expr)?;
        }

        if self.config.profile_passes {
            debug!(profile = %translated.profile, "pass timings");
        }

        Ok(CompiledEntry {
            expr: translated.expr,
            metadata: translated.metadata,
            profile: self.config.profile_passes.then_some(translated.profile),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear()
    }
}
