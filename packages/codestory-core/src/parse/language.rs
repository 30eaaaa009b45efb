//! Language configuration registry
//!
//! Each language is described by a JSON bundle of tree-sitter queries:
//! scopes, shared tokens (general references + definitions) and comments.
//! Built-in bundles ship with the crate; a custom config file can override
//! or extend them.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, Result};

const BUILTIN_LANGUAGES: &str = include_str!("../../assets/languages.json");

/// Token queries split into general references and definition sites
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SharedTokenQueries {
    #[serde(default)]
    pub general: Vec<String>,
    #[serde(default)]
    pub definitions: Vec<String>,
}

/// Query bundle for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub root_node_name: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub scope_queries: Vec<String>,
    #[serde(default)]
    pub shared_token_queries: SharedTokenQueries,
    #[serde(default)]
    pub comment_queries: Vec<String>,
    #[serde(default = "default_share_tokens")]
    pub share_tokens_between_files: bool,
}

fn default_share_tokens() -> bool {
    true
}

impl LanguageConfig {
    pub fn scope_query_source(&self) -> String {
        self.scope_queries.join("\n")
    }

    pub fn definition_query_source(&self) -> String {
        self.shared_token_queries.definitions.join("\n")
    }

    pub fn general_query_source(&self) -> String {
        self.shared_token_queries.general.join("\n")
    }

    pub fn comment_query_source(&self) -> String {
        self.comment_queries.join("\n")
    }
}

/// All known languages, keyed by name, with an extension lookup
pub struct LanguageRegistry {
    configs: BTreeMap<String, LanguageConfig>,
    by_extension: FxHashMap<String, String>,
}

impl LanguageRegistry {
    /// Registry with the built-in language bundles
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_LANGUAGES)
    }

    /// Registry with built-ins overlaid by a custom config file's languages
    pub fn with_custom(custom_json: &str) -> Result<Self> {
        let mut registry = Self::builtin()?;
        let custom: BTreeMap<String, LanguageConfig> = serde_json::from_str(custom_json)
            .map_err(|e| CoreError::config(format!("invalid language config: {e}")))?;
        for (name, config) in custom {
            registry.insert(name, config);
        }
        Ok(registry)
    }

    fn from_json(json: &str) -> Result<Self> {
        let configs: BTreeMap<String, LanguageConfig> = serde_json::from_str(json)
            .map_err(|e| CoreError::config(format!("invalid language config: {e}")))?;
        let mut registry = Self {
            configs: BTreeMap::new(),
            by_extension: FxHashMap::default(),
        };
        for (name, config) in configs {
            registry.insert(name, config);
        }
        Ok(registry)
    }

    fn insert(&mut self, name: String, config: LanguageConfig) {
        for ext in &config.extensions {
            self.by_extension.insert(ext.clone(), name.clone());
        }
        self.configs.insert(name, config);
    }

    pub fn config(&self, language: &str) -> Option<&LanguageConfig> {
        self.configs.get(language)
    }

    /// Language name for a file path, by extension
    pub fn language_for_path(&self, path: &str) -> Option<&str> {
        let ext = std::path::Path::new(path).extension()?.to_str()?;
        self.by_extension.get(ext).map(|s| s.as_str())
    }

    /// Compiled tree-sitter grammar for a known language name
    pub fn grammar(language: &str) -> Option<tree_sitter::Language> {
        match language {
            "python" => Some(tree_sitter_python::language()),
            "rust" => Some(tree_sitter_rust::language()),
            "javascript" => Some(tree_sitter_javascript::language()),
            _ => None,
        }
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_languages_parse() {
        let registry = LanguageRegistry::builtin().unwrap();
        for lang in ["python", "rust", "javascript"] {
            let config = registry.config(lang).unwrap();
            assert!(!config.scope_queries.is_empty(), "{lang} has no scopes");
            assert!(LanguageRegistry::grammar(lang).is_some());
        }
    }

    #[test]
    fn test_extension_lookup() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.language_for_path("pkg/util.py"), Some("python"));
        assert_eq!(registry.language_for_path("src/main.rs"), Some("rust"));
        assert_eq!(registry.language_for_path("web/app.js"), Some("javascript"));
        assert_eq!(registry.language_for_path("README.md"), None);
        assert_eq!(registry.language_for_path("Makefile"), None);
    }

    #[test]
    fn test_custom_config_overlays_builtin() {
        let custom = r#"{
            "toml": {
                "root_node_name": "document",
                "extensions": ["toml"],
                "scope_queries": [],
                "share_tokens_between_files": false
            }
        }"#;
        let registry = LanguageRegistry::with_custom(custom).unwrap();
        assert!(registry.config("toml").is_some());
        assert!(registry.config("python").is_some());
        // unknown grammar stays unknown; such files take the fallback path
        assert!(LanguageRegistry::grammar("toml").is_none());
    }
}
