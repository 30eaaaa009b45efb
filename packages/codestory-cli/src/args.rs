//! Command-line surface

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "codestory",
    about = "Rebuild unstructured changes into atomic, logically grouped commits",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub options: GlobalOptions,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decompose the working-tree delta against HEAD into commits
    Commit {
        /// Restrict the run to these pathspecs
        pathspecs: Vec<String>,

        /// Guidance describing what this commit is meant to do
        #[arg(long)]
        intent: Option<String>,
    },

    /// Rewrite an existing commit into multiple atomic commits
    Fix {
        /// The commit to rewrite
        rev: String,
    },

    /// Rewrite every linear commit from a tip down to the first merge
    Clean {
        /// Tip to start from (defaults to HEAD)
        rev: Option<String>,

        /// Keep commits with fewer changed lines than this untouched
        #[arg(long, value_name = "N")]
        min_size: Option<usize>,
    },

    /// Inspect or modify stored configuration
    Config {
        /// Configuration key
        key: Option<String>,

        /// New value for the key
        value: Option<String>,

        /// Which configuration file to operate on
        #[arg(long, value_enum, default_value = "local")]
        scope: ConfigScope,

        /// Remove the key from the selected scope
        #[arg(long)]
        delete: bool,

        /// Remove every key from the selected scope
        #[arg(long)]
        deleteall: bool,

        /// Describe known keys instead of reading or writing them
        #[arg(long)]
        describe: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigScope {
    Local,
    Global,
}

/// Options recognized on every command; unset options fall through the
/// configuration hierarchy
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOptions {
    /// Model in provider:name form
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// API key for the model provider
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// API base URL for the model provider
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Sampling temperature (0-1)
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Token budget for model requests
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    /// Score groups against the intent and drop unrelated ones
    #[arg(long, global = true)]
    pub relevance_filtering: Option<bool>,

    /// Minimum similarity for a group to survive relevance filtering (0-1)
    #[arg(long, global = true)]
    pub relevance_filter_similarity_threshold: Option<f32>,

    /// Secret scanner pattern breadth
    #[arg(long, global = true, value_name = "none|safe|standard|strict")]
    pub secret_scanner_aggression: Option<String>,

    /// Grouping for files without analysis context
    #[arg(long, global = true, value_name = "all_together|by_file|by_extension")]
    pub fallback_grouping_strategy: Option<String>,

    /// How finely hunks are split
    #[arg(long, global = true, value_name = "none|full_files|all_files")]
    pub chunking_level: Option<String>,

    /// Extra language-config JSON file overlaying the built-ins
    #[arg(long, global = true, value_name = "PATH")]
    pub custom_language_config: Option<String>,

    /// How aggressively the model may merge groups (0-1)
    #[arg(long, global = true)]
    pub cluster_strictness: Option<f32>,

    /// Request batching strategy
    #[arg(long, global = true, value_name = "auto|requests|prompt")]
    pub batching_strategy: Option<String>,

    /// Retries per model request (0-10)
    #[arg(long, global = true)]
    pub num_retries: Option<u32>,

    /// Treat syntax errors in touched files as fatal
    #[arg(long, global = true)]
    pub fail_on_syntax_errors: Option<bool>,

    /// Prompt for a message override per proposed commit
    #[arg(long, global = true)]
    pub ask_for_commit_message: Option<bool>,

    /// Preview style in the confirmation prompt
    #[arg(long, global = true, value_name = "semantic|git")]
    pub display_diff_type: Option<String>,

    /// Skip the confirmation prompt
    #[arg(long, global = true)]
    pub auto_accept: bool,

    /// Only print what requires a decision
    #[arg(long, global = true)]
    pub silent: bool,

    /// Verbose diagnostics
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Embedding provider name for relevance scoring
    #[arg(long, global = true)]
    pub custom_embedding_model: Option<String>,

    /// Explicit configuration file consulted after CLI flags
    #[arg(long, global = true, value_name = "PATH")]
    pub config_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_commit_with_intent_and_pathspecs() {
        let cli = Cli::parse_from([
            "codestory",
            "commit",
            "src/",
            "--intent",
            "fix the login flow",
        ]);
        match cli.command {
            Command::Commit { pathspecs, intent } => {
                assert_eq!(pathspecs, vec!["src/"]);
                assert_eq!(intent.as_deref(), Some("fix the login flow"));
            }
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn test_clean_min_size() {
        let cli = Cli::parse_from(["codestory", "clean", "--min-size", "12"]);
        match cli.command {
            Command::Clean { rev, min_size } => {
                assert_eq!(rev, None);
                assert_eq!(min_size, Some(12));
            }
            _ => panic!("expected clean"),
        }
    }

    #[test]
    fn test_global_flag_after_subcommand() {
        let cli = Cli::parse_from(["codestory", "fix", "HEAD~2", "--auto-accept", "--verbose"]);
        assert!(cli.options.auto_accept);
        assert!(cli.options.verbose);
    }
}
