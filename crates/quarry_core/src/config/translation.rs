use hashbrown::HashMap;
use std::sync::LazyLock;

use quarry_error::{DbError, Result};

pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 256;

/// Configuration for a query compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationConfig {
    pub enable_query_cache: bool,
    pub query_cache_capacity: usize,
    pub parameterize_literals: bool,
    pub verify_normalized_tree: bool,
    pub profile_passes: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        TranslationConfig {
            enable_query_cache: true,
            query_cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            parameterize_literals: true,
            verify_normalized_tree: true,
            profile_passes: false,
        }
    }
}

impl TranslationConfig {
    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_string(&self, name: &str) -> Result<String> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        let value = (func.get)(&def_conf);
        (func.set)(&value, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names and descriptions of all settings, sorted by name.
    pub fn settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, func)| (*name, func.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(value: &str, conf: &mut TranslationConfig) -> Result<()>,
    get: fn(conf: &TranslationConfig) -> String,
}

impl SettingFunctions {
    const fn new<S: TranslationSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_str as _,
            get: S::get_as_string as _,
        }
    }
}

type SettingsMap = HashMap<&'static str, SettingFunctions, ahash::RandomState>;

fn insert_setting<S: TranslationSetting>(map: &mut SettingsMap) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<SettingsMap> = LazyLock::new(|| {
    let mut map = HashMap::with_hasher(ahash::RandomState::new());

    insert_setting::<EnableQueryCache>(&mut map);
    insert_setting::<QueryCacheCapacity>(&mut map);
    insert_setting::<ParameterizeLiterals>(&mut map);
    insert_setting::<VerifyNormalizedTree>(&mut map);
    insert_setting::<ProfilePasses>(&mut map);

    map
});

pub trait TranslationSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_str(value: &str, conf: &mut TranslationConfig) -> Result<()>;
    fn get_as_string(conf: &TranslationConfig) -> String;
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(DbError::new(format!(
            "Invalid value '{value}' for setting '{name}', expected a boolean"
        ))),
    }
}

pub struct EnableQueryCache;

impl TranslationSetting for EnableQueryCache {
    const NAME: &'static str = "enable_query_cache";
    const DESCRIPTION: &'static str = "Reuse compiled queries with the same shape";

    fn set_from_str(value: &str, conf: &mut TranslationConfig) -> Result<()> {
        conf.enable_query_cache = parse_bool(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &TranslationConfig) -> String {
        conf.enable_query_cache.to_string()
    }
}

const MIN_CACHE_CAPACITY: usize = 1;
const MAX_CACHE_CAPACITY: usize = 65536;

pub struct QueryCacheCapacity;

impl QueryCacheCapacity {
    pub fn validate_value(val: usize) -> Result<()> {
        if val < MIN_CACHE_CAPACITY {
            return Err(DbError::new(format!(
                "Query cache capacity cannot be less than {MIN_CACHE_CAPACITY}"
            )));
        }

        if val > MAX_CACHE_CAPACITY {
            return Err(DbError::new(format!(
                "Query cache capacity cannot be greater than {MAX_CACHE_CAPACITY}"
            )));
        }

        Ok(())
    }
}

impl TranslationSetting for QueryCacheCapacity {
    const NAME: &'static str = "query_cache_capacity";
    const DESCRIPTION: &'static str = "Max number of query shapes kept in the cache";

    fn set_from_str(value: &str, conf: &mut TranslationConfig) -> Result<()> {
        let val: usize = value.trim().parse().map_err(|e| {
            DbError::new(format!("Invalid value '{value}' for setting '{}'", Self::NAME))
                .with_source(Box::new(e))
        })?;
        Self::validate_value(val)?;

        conf.query_cache_capacity = val;
        Ok(())
    }

    fn get_as_string(conf: &TranslationConfig) -> String {
        conf.query_cache_capacity.to_string()
    }
}

pub struct ParameterizeLiterals;

impl TranslationSetting for ParameterizeLiterals {
    const NAME: &'static str = "parameterize_literals";
    const DESCRIPTION: &'static str = "Replace literals with query parameters before caching";

    fn set_from_str(value: &str, conf: &mut TranslationConfig) -> Result<()> {
        conf.parameterize_literals = parse_bool(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &TranslationConfig) -> String {
        conf.parameterize_literals.to_string()
    }
}

pub struct VerifyNormalizedTree;

impl TranslationSetting for VerifyNormalizedTree {
    const NAME: &'static str = "verify_normalized_tree";
    const DESCRIPTION: &'static str = "Check translated trees for constructs that should have been rewritten";

    fn set_from_str(value: &str, conf: &mut TranslationConfig) -> Result<()> {
        conf.verify_normalized_tree = parse_bool(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &TranslationConfig) -> String {
        conf.verify_normalized_tree.to_string()
    }
}

pub struct ProfilePasses;

impl TranslationSetting for ProfilePasses {
    const NAME: &'static str = "profile_passes";
    const DESCRIPTION: &'static str = "Record time spent in each rewrite pass";

    fn set_from_str(value: &str, conf: &mut TranslationConfig) -> Result<()> {
        conf.profile_passes = parse_bool(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &TranslationConfig) -> String {
        conf.profile_passes.to_string()
    }
}

#[cfg(test)]
mod tests {
    use quarry_error::ErrorKind;

    use super::*;

    #[test]
    fn set_and_get_by_name() {
        let mut conf = TranslationConfig::default();
        conf.set_from_str("enable_query_cache", "off").unwrap();
        conf.set_from_str("query_cache_capacity", "12").unwrap();

        assert!(!conf.enable_query_cache);
        assert_eq!(12, conf.query_cache_capacity);
        assert_eq!("false", conf.get_as_string("enable_query_cache").unwrap());
        assert_eq!("12", conf.get_as_string("query_cache_capacity").unwrap());
    }

    #[test]
    fn unknown_setting() {
        let mut conf = TranslationConfig::default();
        let err = conf.set_from_str("optimizer_level", "3").unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
        assert!(err.message().contains("optimizer_level"));
        assert!(conf.get_as_string("optimizer_level").is_err());
    }

    #[test]
    fn invalid_values() {
        let mut conf = TranslationConfig::default();
        assert!(conf.set_from_str("profile_passes", "maybe").is_err());
        assert!(conf.set_from_str("query_cache_capacity", "-1").is_err());
        assert!(conf.set_from_str("query_cache_capacity", "0").is_err());
        assert_eq!(TranslationConfig::default(), conf);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut conf = TranslationConfig::default();
        conf.set_from_str("verify_normalized_tree", "false").unwrap();
        conf.set_from_str("profile_passes", "true").unwrap();

        conf.reset("verify_normalized_tree").unwrap();
        assert!(conf.verify_normalized_tree);
        assert!(conf.profile_passes);

        conf.reset_all();
        assert_eq!(TranslationConfig::default(), conf);
    }

    #[test]
    fn every_setting_listed() {
        let names: Vec<_> = TranslationConfig::settings()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            vec![
                "enable_query_cache",
                "parameterize_literals",
                "profile_passes",
                "query_cache_capacity",
                "verify_normalized_tree",
            ],
            names
        );
    }
}
