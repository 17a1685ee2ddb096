use hashbrown::HashMap;

use crate::datatype::DataType;
use crate::functions::catalog::FunctionCatalog;
use crate::model::Model;
use crate::sql::QuerySourceAlias;
use crate::sql::navigation_join::JoinKind;

/// Change tracking behavior requested by the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingBehavior {
    #[default]
    Default,
    Tracking,
    NoTracking,
}

/// Query-level settings pulled out of marker calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryMetadata {
    /// Tags in the order they appear in the query source chain.
    pub tags: Vec<String>,
    pub tracking: TrackingBehavior,
    pub ignore_query_filters: bool,
}

/// Identity of a row source within a single compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKey {
    /// A source that isn't the target of a navigation join, e.g. an entity
    /// set or a projection.
    Root(u32),
    /// The joined side of a navigation join.
    Alias(QuerySourceAlias),
}

/// A navigation that has been expanded into a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedNavigation {
    pub alias: QuerySourceAlias,
    pub target: String,
    /// Root source the join is attached to.
    pub anchor: SourceKey,
    /// Left outer if this hop or any hop before it may be missing.
    pub kind: JoinKind,
}

/// State shared by all passes of a single pipeline run.
///
/// Created by the pipeline for each run and dropped when the run returns.
#[derive(Debug)]
pub struct CompilationState<'a> {
    pub model: &'a Model,
    pub catalog: &'a dyn FunctionCatalog,
    pub metadata: QueryMetadata,
    /// Expanded navigations keyed by the source they were reached from.
    joins: HashMap<(SourceKey, String), JoinedNavigation, ahash::RandomState>,
    /// Element types of root sources, indexed by root id.
    roots: Vec<DataType>,
    next_alias: u32,
}

impl<'a> CompilationState<'a> {
    pub fn new(model: &'a Model, catalog: &'a dyn FunctionCatalog) -> Self {
        CompilationState {
            model,
            catalog,
            metadata: QueryMetadata::default(),
            joins: HashMap::with_hasher(ahash::RandomState::new()),
            roots: Vec::new(),
            next_alias: 0,
        }
    }

    /// Hand out the next row source alias.
    pub fn next_alias(&mut self) -> QuerySourceAlias {
        let alias = QuerySourceAlias(self.next_alias);
        self.next_alias += 1;
        alias
    }

    /// Register a new root source with the given element type.
    pub fn new_root(&mut self, element: DataType) -> SourceKey {
        let key = SourceKey::Root(self.roots.len() as u32);
        self.roots.push(element);
        key
    }

    pub fn root_element_type(&self, key: SourceKey) -> Option<&DataType> {
        match key {
            SourceKey::Root(idx) => self.roots.get(idx as usize),
            SourceKey::Alias(_) => None,
        }
    }

    pub fn find_join(&self, source: SourceKey, navigation: &str) -> Option<&JoinedNavigation> {
        self.joins.get(&(source, navigation.to_string()))
    }

    pub fn insert_join(&mut self, source: SourceKey, navigation: &str, joined: JoinedNavigation) {
        self.joins.insert((source, navigation.to_string()), joined);
    }

    /// Get the join that produced an alias.
    pub fn join_for_alias(&self, alias: QuerySourceAlias) -> Option<&JoinedNavigation> {
        self.joins.values().find(|j| j.alias == alias)
    }

    /// Get the root a source key ultimately hangs off.
    ///
    /// Returns None for aliases not created during this run.
    pub fn anchor_of(&self, key: SourceKey) -> Option<SourceKey> {
        match key {
            SourceKey::Root(_) => Some(key),
            SourceKey::Alias(alias) => self.join_for_alias(alias).map(|j| j.anchor),
        }
    }

    /// Check if rows of a source may be missing because it was reached
    /// through a left outer join.
    pub fn is_optional_source(&self, key: SourceKey) -> bool {
        match key {
            SourceKey::Root(_) => false,
            SourceKey::Alias(alias) => self
                .join_for_alias(alias)
                .is_some_and(|j| j.kind == JoinKind::LeftOuter),
        }
    }

    pub fn num_joins(&self) -> usize {
        self.joins.len()
    }
}
