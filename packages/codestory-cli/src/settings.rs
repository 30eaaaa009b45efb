//! Configuration hierarchy
//!
//! Resolution order, highest first: CLI flags, explicit config file, local
//! repo config, `CODESTORY_*` environment variables, global user config,
//! built-in defaults. Every key is typed; writes through `codestory config`
//! are validated against the same constraints.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use codestory_core::{
    BatchingStrategy, ChunkingLevel, CoreError, FallbackStrategy, PipelineConfig, Result,
    ScannerAggression,
};
use serde_json::{Map, Value};

use crate::args::GlobalOptions;

pub const ENV_PREFIX: &str = "CODESTORY_";
pub const LOCAL_CONFIG_FILE: &str = ".codestory.json";

/// Constraint attached to a configuration key
pub enum KeyKind {
    Bool,
    Float { min: f64, max: f64 },
    Int { min: i64, max: i64 },
    Choice(&'static [&'static str]),
    Text,
}

pub struct KeySpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: KeyKind,
}

pub const KEY_SPECS: &[KeySpec] = &[
    KeySpec {
        name: "model",
        description: "Model in provider:name form",
        kind: KeyKind::Text,
    },
    KeySpec {
        name: "api_key",
        description: "API key for the model provider",
        kind: KeyKind::Text,
    },
    KeySpec {
        name: "api_base",
        description: "API base URL for the model provider",
        kind: KeyKind::Text,
    },
    KeySpec {
        name: "temperature",
        description: "Sampling temperature for model responses",
        kind: KeyKind::Float { min: 0.0, max: 1.0 },
    },
    KeySpec {
        name: "max_tokens",
        description: "Token budget for model requests",
        kind: KeyKind::Int {
            min: 256,
            max: 1_000_000,
        },
    },
    KeySpec {
        name: "relevance_filtering",
        description: "Drop groups unrelated to the provided intent",
        kind: KeyKind::Bool,
    },
    KeySpec {
        name: "relevance_filter_similarity_threshold",
        description: "Minimum similarity for a group to survive filtering",
        kind: KeyKind::Float { min: 0.0, max: 1.0 },
    },
    KeySpec {
        name: "secret_scanner_aggression",
        description: "How aggressively to scan for secrets",
        kind: KeyKind::Choice(&["none", "safe", "standard", "strict"]),
    },
    KeySpec {
        name: "fallback_grouping_strategy",
        description: "Grouping for files without analysis context",
        kind: KeyKind::Choice(&["all_together", "by_file", "by_extension"]),
    },
    KeySpec {
        name: "chunking_level",
        description: "How finely hunks are split into atomic chunks",
        kind: KeyKind::Choice(&["none", "full_files", "all_files"]),
    },
    KeySpec {
        name: "custom_language_config",
        description: "Extra language-config JSON overlaying the built-ins",
        kind: KeyKind::Text,
    },
    KeySpec {
        name: "cluster_strictness",
        description: "How aggressively the model may merge groups",
        kind: KeyKind::Float { min: 0.0, max: 1.0 },
    },
    KeySpec {
        name: "batching_strategy",
        description: "How groups are packed into model requests",
        kind: KeyKind::Choice(&["auto", "requests", "prompt"]),
    },
    KeySpec {
        name: "num_retries",
        description: "Retries per model request",
        kind: KeyKind::Int { min: 0, max: 10 },
    },
    KeySpec {
        name: "fail_on_syntax_errors",
        description: "Treat syntax errors in touched files as fatal",
        kind: KeyKind::Bool,
    },
    KeySpec {
        name: "ask_for_commit_message",
        description: "Prompt for a message override per proposed commit",
        kind: KeyKind::Bool,
    },
    KeySpec {
        name: "display_diff_type",
        description: "Preview style in the confirmation prompt",
        kind: KeyKind::Choice(&["semantic", "git"]),
    },
    KeySpec {
        name: "auto_accept",
        description: "Skip the confirmation prompt",
        kind: KeyKind::Bool,
    },
    KeySpec {
        name: "silent",
        description: "Only print what requires a decision",
        kind: KeyKind::Bool,
    },
    KeySpec {
        name: "verbose",
        description: "Verbose diagnostics",
        kind: KeyKind::Bool,
    },
    KeySpec {
        name: "custom_embedding_model",
        description: "Embedding provider used for relevance scoring",
        kind: KeyKind::Text,
    },
];

pub fn key_spec(name: &str) -> Option<&'static KeySpec> {
    KEY_SPECS.iter().find(|s| s.name == name)
}

/// Parse and validate a raw string against a key's constraint
pub fn parse_value(spec: &KeySpec, raw: &str) -> Result<Value> {
    match &spec.kind {
        KeyKind::Bool => match raw {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(CoreError::config(format!(
                "{} expects a boolean, got {raw:?}",
                spec.name
            ))),
        },
        KeyKind::Float { min, max } => {
            let value: f64 = raw
                .parse()
                .map_err(|_| CoreError::config(format!("{} expects a number", spec.name)))?;
            if value < *min || value > *max {
                return Err(CoreError::config(format!(
                    "{} must be within {min}..={max}",
                    spec.name
                )));
            }
            Ok(Value::from(value))
        }
        KeyKind::Int { min, max } => {
            let value: i64 = raw
                .parse()
                .map_err(|_| CoreError::config(format!("{} expects an integer", spec.name)))?;
            if value < *min || value > *max {
                return Err(CoreError::config(format!(
                    "{} must be within {min}..={max}",
                    spec.name
                )));
            }
            Ok(Value::from(value))
        }
        KeyKind::Choice(choices) => {
            if choices.contains(&raw) {
                Ok(Value::String(raw.to_string()))
            } else {
                Err(CoreError::config(format!(
                    "{} must be one of {}",
                    spec.name,
                    choices.join("|")
                )))
            }
        }
        KeyKind::Text => Ok(Value::String(raw.to_string())),
    }
}

/// Path of the per-repository config file
pub fn local_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(LOCAL_CONFIG_FILE)
}

/// Path of the global user config file
pub fn global_config_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME") {
        if !base.is_empty() {
            return Some(PathBuf::from(base).join("codestory").join("config.json"));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config/codestory/config.json"))
}

pub fn load_config_file(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| CoreError::config(format!("invalid config file {}: {e}", path.display())))
}

pub fn store_config_file(path: &Path, map: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(map).unwrap_or_default() + "\n")?;
    Ok(())
}

fn env_layer() -> Map<String, Value> {
    let mut map = Map::new();
    for spec in KEY_SPECS {
        let variable = format!("{ENV_PREFIX}{}", spec.name.to_uppercase());
        if let Ok(raw) = std::env::var(&variable) {
            if let Ok(value) = parse_value(spec, &raw) {
                map.insert(spec.name.to_string(), value);
            }
        }
    }
    map
}

fn options_layer(options: &GlobalOptions) -> Map<String, Value> {
    let mut map = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            map.insert(key.to_string(), value);
        }
    };
    put("model", options.model.clone().map(Value::String));
    put("api_key", options.api_key.clone().map(Value::String));
    put("api_base", options.api_base.clone().map(Value::String));
    put("temperature", options.temperature.map(Value::from));
    put("max_tokens", options.max_tokens.map(Value::from));
    put(
        "relevance_filtering",
        options.relevance_filtering.map(Value::Bool),
    );
    put(
        "relevance_filter_similarity_threshold",
        options
            .relevance_filter_similarity_threshold
            .map(Value::from),
    );
    put(
        "secret_scanner_aggression",
        options.secret_scanner_aggression.clone().map(Value::String),
    );
    put(
        "fallback_grouping_strategy",
        options.fallback_grouping_strategy.clone().map(Value::String),
    );
    put(
        "chunking_level",
        options.chunking_level.clone().map(Value::String),
    );
    put(
        "custom_language_config",
        options.custom_language_config.clone().map(Value::String),
    );
    put(
        "cluster_strictness",
        options.cluster_strictness.map(Value::from),
    );
    put(
        "batching_strategy",
        options.batching_strategy.clone().map(Value::String),
    );
    put("num_retries", options.num_retries.map(Value::from));
    put(
        "fail_on_syntax_errors",
        options.fail_on_syntax_errors.map(Value::Bool),
    );
    put(
        "ask_for_commit_message",
        options.ask_for_commit_message.map(Value::Bool),
    );
    put(
        "display_diff_type",
        options.display_diff_type.clone().map(Value::String),
    );
    put(
        "auto_accept",
        options.auto_accept.then_some(Value::Bool(true)),
    );
    put("silent", options.silent.then_some(Value::Bool(true)));
    put("verbose", options.verbose.then_some(Value::Bool(true)));
    put(
        "custom_embedding_model",
        options.custom_embedding_model.clone().map(Value::String),
    );
    map
}

/// Fully resolved settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    /// Apply the hierarchy: later layers only fill holes left by earlier
    /// ones
    pub fn resolve(options: &GlobalOptions, repo_root: &Path) -> Result<Self> {
        let mut layers: Vec<Map<String, Value>> = vec![options_layer(options)];
        if let Some(explicit) = &options.config_file {
            layers.push(load_config_file(Path::new(explicit))?);
        }
        layers.push(load_config_file(&local_config_path(repo_root))?);
        layers.push(env_layer());
        if let Some(global) = global_config_path() {
            layers.push(load_config_file(&global)?);
        }

        let mut values = BTreeMap::new();
        for layer in layers {
            for (key, value) in layer {
                values.entry(key).or_insert(value);
            }
        }
        Ok(Self { values })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.values.get(key).and_then(|v| v.as_f64()).map(|v| v as f32)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.values.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
    }

    /// Materialize the pipeline options
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default();

        if let Some(level) = self.get_str("chunking_level") {
            config.chunking_level = match level {
                "none" => ChunkingLevel::None,
                "full_files" => ChunkingLevel::FullFiles,
                "all_files" => ChunkingLevel::AllFiles,
                other => {
                    return Err(CoreError::config(format!("unknown chunking_level {other}")))
                }
            };
        }
        if let Some(level) = self.get_str("secret_scanner_aggression") {
            config.secret_scanner_aggression = match level {
                "none" => ScannerAggression::None,
                "safe" => ScannerAggression::Safe,
                "standard" => ScannerAggression::Standard,
                "strict" => ScannerAggression::Strict,
                other => {
                    return Err(CoreError::config(format!(
                        "unknown secret_scanner_aggression {other}"
                    )))
                }
            };
        }
        if let Some(strategy) = self.get_str("fallback_grouping_strategy") {
            config.fallback_grouping_strategy = match strategy {
                "all_together" => FallbackStrategy::AllTogether,
                "by_file" => FallbackStrategy::ByFile,
                "by_extension" => FallbackStrategy::ByExtension,
                other => {
                    return Err(CoreError::config(format!(
                        "unknown fallback_grouping_strategy {other}"
                    )))
                }
            };
        }
        if let Some(strategy) = self.get_str("batching_strategy") {
            config.batching_strategy = match strategy {
                "auto" => BatchingStrategy::Auto,
                "requests" => BatchingStrategy::Requests,
                "prompt" => BatchingStrategy::Prompt,
                other => {
                    return Err(CoreError::config(format!(
                        "unknown batching_strategy {other}"
                    )))
                }
            };
        }
        if let Some(value) = self.get_f32("cluster_strictness") {
            config.cluster_strictness = value;
        }
        if let Some(value) = self.get_bool("relevance_filtering") {
            config.relevance_filtering = value;
        }
        if let Some(value) = self.get_f32("relevance_filter_similarity_threshold") {
            config.relevance_filter_similarity_threshold = value;
        }
        if let Some(value) = self.get_bool("fail_on_syntax_errors") {
            config.fail_on_syntax_errors = value;
        }
        if let Some(value) = self.get_u32("num_retries") {
            config.num_retries = value;
        }
        if let Some(value) = self.get_u32("max_tokens") {
            config.max_tokens = value;
        }
        if let Some(value) = self.get_f32("temperature") {
            config.temperature = value;
        }
        if let Some(value) = self.get_bool("auto_accept") {
            config.auto_accept = value;
        }
        if let Some(value) = self.get_bool("ask_for_commit_message") {
            config.ask_for_commit_message = value;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_specs_cover_pipeline_settings() {
        for key in [
            "model",
            "temperature",
            "secret_scanner_aggression",
            "chunking_level",
            "cluster_strictness",
            "num_retries",
        ] {
            assert!(key_spec(key).is_some(), "missing spec for {key}");
        }
    }

    #[test]
    fn test_parse_value_constraints() {
        let spec = key_spec("temperature").unwrap();
        assert!(parse_value(spec, "0.5").is_ok());
        assert!(parse_value(spec, "1.5").is_err());
        assert!(parse_value(spec, "abc").is_err());

        let spec = key_spec("secret_scanner_aggression").unwrap();
        assert!(parse_value(spec, "strict").is_ok());
        assert!(parse_value(spec, "extreme").is_err());

        let spec = key_spec("auto_accept").unwrap();
        assert_eq!(parse_value(spec, "true").unwrap(), Value::Bool(true));
        assert!(parse_value(spec, "maybe").is_err());
    }

    #[test]
    fn test_flags_override_files() {
        let dir = tempfile::tempdir().unwrap();
        store_config_file(
            &local_config_path(dir.path()),
            &serde_json::from_str(r#"{"cluster_strictness": 0.1, "num_retries": 7}"#).unwrap(),
        )
        .unwrap();

        let mut options = GlobalOptions::default();
        options.cluster_strictness = Some(0.9);

        let settings = Settings::resolve(&options, dir.path()).unwrap();
        let config = settings.pipeline_config().unwrap();
        assert_eq!(config.cluster_strictness, 0.9);
        assert_eq!(config.num_retries, 7);
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::resolve(&GlobalOptions::default(), dir.path()).unwrap();
        let config = settings.pipeline_config().unwrap();
        assert_eq!(config.num_retries, PipelineConfig::default().num_retries);
    }

    #[test]
    fn test_invalid_enum_value_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = GlobalOptions::default();
        options.chunking_level = Some("everything".to_string());
        let settings = Settings::resolve(&options, dir.path()).unwrap();
        assert!(settings.pipeline_config().is_err());
    }
}
