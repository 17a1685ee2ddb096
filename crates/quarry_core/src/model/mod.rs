//! Entity model metadata.
//!
//! The model describes entity types, their keys, and the navigations between
//! them. Passes only read it.

use std::collections::BTreeMap;

use quarry_error::{DbError, Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::datatype::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub datatype: DataType,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// A single property pair in a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyColumn {
    /// Property on the dependent entity.
    pub dependent: String,
    /// Key property on the principal entity.
    pub principal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationDescriptor {
    pub name: String,
    /// Entity type on the other end.
    pub target: String,
    pub cardinality: Cardinality,
    /// A required to-one navigation is never null.
    #[serde(default)]
    pub required: bool,
    pub foreign_key: Vec<ForeignKeyColumn>,
    /// Whether the foreign key properties live on the declaring entity. If
    /// false they live on the target.
    pub foreign_key_on_source: bool,
}

impl NavigationDescriptor {
    pub fn datatype(&self) -> DataType {
        match self.cardinality {
            Cardinality::One => DataType::entity(&self.target),
            Cardinality::Many => DataType::sequence(DataType::entity(&self.target)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDescriptor {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
    /// Names of the primary key properties, in key order.
    pub key: Vec<String>,
    #[serde(default)]
    pub navigations: Vec<NavigationDescriptor>,
}

impl EntityTypeDescriptor {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationDescriptor> {
        self.navigations.iter().find(|n| n.name == name)
    }

    /// Key properties in key order.
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.key.iter().filter_map(|k| self.property(k))
    }

    /// Data type of a property or navigation.
    pub fn member_datatype(&self, member: &str) -> Option<DataType> {
        if let Some(prop) = self.property(member) {
            return Some(prop.datatype.clone());
        }
        self.navigation(member).map(|nav| nav.datatype())
    }
}

#[derive(Debug, Deserialize)]
struct ModelDefinition {
    entities: Vec<EntityTypeDescriptor>,
}

/// Validated set of entity types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    entities: BTreeMap<String, EntityTypeDescriptor>,
}

impl Model {
    /// Create a model, checking that keys and navigations are consistent.
    pub fn try_new(entities: impl IntoIterator<Item = EntityTypeDescriptor>) -> Result<Self> {
        let mut model = Model::default();
        for entity in entities {
            if model.entities.contains_key(&entity.name) {
                return Err(DbError::new(format!("Duplicate entity type '{}'", entity.name)));
            }
            model.entities.insert(entity.name.clone(), entity);
        }

        for entity in model.entities.values() {
            model
                .validate_entity(entity)
                .context_fn(|| format!("Invalid entity type '{}'", entity.name))?;
        }

        Ok(model)
    }

    /// Load a model from its JSON definition.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: ModelDefinition = serde_json::from_str(json)
            .map_err(|e| DbError::new("Failed to parse model definition").with_source(Box::new(e)))?;
        Self::try_new(def.entities)
    }

    fn validate_entity(&self, entity: &EntityTypeDescriptor) -> Result<()> {
        if entity.key.is_empty() {
            return Err(DbError::new("Entity type has no key"));
        }
        for key in &entity.key {
            if entity.property(key).is_none() {
                return Err(DbError::new(format!("Missing key property '{key}'")));
            }
        }

        for nav in &entity.navigations {
            let target = self.entity(&nav.target).ok_or_else(|| {
                DbError::new(format!(
                    "Navigation '{}' targets unknown entity '{}'",
                    nav.name, nav.target
                ))
            })?;

            if nav.cardinality == Cardinality::Many && nav.foreign_key_on_source {
                return Err(DbError::new(format!(
                    "Collection navigation '{}' must have its foreign key on the target",
                    nav.name
                )));
            }

            let (dependent, principal) = if nav.foreign_key_on_source {
                (entity, target)
            } else {
                (target, entity)
            };

            if nav.foreign_key.len() != principal.key.len() {
                return Err(DbError::new(format!(
                    "Foreign key for '{}' doesn't cover the key of '{}'",
                    nav.name, principal.name
                )));
            }

            for col in &nav.foreign_key {
                if dependent.property(&col.dependent).is_none() {
                    return Err(DbError::new(format!(
                        "Foreign key property '{}' missing on '{}'",
                        col.dependent, dependent.name
                    )));
                }
                if !principal.key.contains(&col.principal) {
                    return Err(DbError::new(format!(
                        "Foreign key property '{}' isn't a key of '{}'",
                        col.principal, principal.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityTypeDescriptor> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityTypeDescriptor> {
        self.entities.values()
    }

    /// Find a navigation declared on an entity type.
    pub fn navigation(&self, entity: &str, name: &str) -> Option<&NavigationDescriptor> {
        self.entity(entity)?.navigation(name)
    }

    /// Find a property declared on an entity type.
    pub fn property(&self, entity: &str, name: &str) -> Option<&PropertyDescriptor> {
        self.entity(entity)?.property(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "entities": [
            {
                "name": "Blog",
                "table": "blogs",
                "properties": [{"name": "Id", "datatype": "Int32"}],
                "key": ["Id"],
                "navigations": [{
                    "name": "Posts",
                    "target": "Post",
                    "cardinality": "Many",
                    "foreign_key": [{"dependent": "BlogId", "principal": "Id"}],
                    "foreign_key_on_source": false
                }]
            },
            {
                "name": "Post",
                "table": "posts",
                "schema": "content",
                "properties": [
                    {"name": "Id", "datatype": "Int32"},
                    {"name": "BlogId", "datatype": "Int32"},
                    {"name": "Title", "datatype": "Utf8", "nullable": true}
                ],
                "key": ["Id"]
            }
        ]
    }"#;

    #[test]
    fn load_from_json() {
        let model = Model::from_json(JSON).unwrap();
        let post = model.entity("Post").unwrap();
        assert_eq!(Some("content"), post.schema.as_deref());
        assert!(post.property("Title").unwrap().nullable);

        let nav = model.navigation("Blog", "Posts").unwrap();
        assert_eq!(DataType::sequence(DataType::entity("Post")), nav.datatype());
    }

    #[test]
    fn reject_unknown_navigation_target() {
        let json = JSON.replace(r#""target": "Post""#, r#""target": "Comment""#);
        let err = Model::from_json(&json).unwrap_err();
        assert!(err.message().contains("unknown entity 'Comment'"), "{err}");
    }

    #[test]
    fn reject_missing_key_property() {
        let json = JSON.replacen(r#""key": ["Id"]"#, r#""key": ["Nope"]"#, 1);
        let err = Model::from_json(&json).unwrap_err();
        assert!(err.message().contains("Missing key property"), "{err}");
    }

    #[test]
    fn reject_bad_json() {
        let err = Model::from_json("{").unwrap_err();
        assert!(err.message().contains("Failed to parse"));
    }
}
