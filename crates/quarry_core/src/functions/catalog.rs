use std::fmt::Debug;

use hashbrown::HashMap;
use quarry_error::{DbError, Result};
use serde::Deserialize;

use super::DbFunctionSet;
use crate::operators::MethodRef;

/// Lookup of database functions by the method they're exposed through.
pub trait FunctionCatalog: Debug + Sync + Send {
    /// Get the function set for a method, ignoring generic arguments.
    fn find_function(&self, method: &MethodRef) -> Option<&DbFunctionSet>;
}

/// Catalog backed by an in-memory map.
#[derive(Debug, Default)]
pub struct StaticFunctionCatalog {
    functions: HashMap<(String, String), DbFunctionSet, ahash::RandomState>,
}

#[derive(Debug, Deserialize)]
struct CatalogDefinition {
    functions: Vec<DbFunctionSet>,
}

impl StaticFunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function set. Errors if the method is already registered.
    pub fn register(&mut self, set: DbFunctionSet) -> Result<()> {
        if set.overloads.is_empty() {
            return Err(DbError::new(format!(
                "Function set for {} has no overloads",
                set.method
            )));
        }

        let key = (set.method.owner.clone(), set.method.name.clone());
        if self.functions.contains_key(&key) {
            return Err(DbError::new(format!(
                "Duplicate function for {}",
                set.method
            )));
        }
        self.functions.insert(key, set);
        Ok(())
    }

    /// Load a catalog from its JSON definition.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: CatalogDefinition = serde_json::from_str(json).map_err(|e| {
            DbError::new("Failed to parse function catalog").with_source(Box::new(e))
        })?;
        let mut catalog = Self::new();
        for set in def.functions {
            catalog.register(set)?;
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FunctionCatalog for StaticFunctionCatalog {
    fn find_function(&self, method: &MethodRef) -> Option<&DbFunctionSet> {
        self.functions
            .get(&(method.owner.clone(), method.name.clone()))
    }
}
