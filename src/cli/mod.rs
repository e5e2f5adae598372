//! CLI module for meeple-rag
//!
//! Provides command-line interface parsing and handling for the meeple-rag binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod commands;
pub mod output;

use crate::utils::toml_config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// meeple-rag - retrieval indexing and evaluation for the MeepleAI rules assistant
#[derive(Parser, Debug)]
#[command(
    name = "meeple-rag",
    author = "MeepleAI <dev@meepleai.dev>",
    version,
    about = "Index board-game knowledge and measure retrieval quality",
    long_about = "Chunks and embeds board-game rule knowledge into a category-scoped vector\n\
                  index, and evaluates retrieval quality (Precision@K, Recall@K, MRR,\n\
                  latency percentiles) against a labelled query dataset.",
    after_help = "EXAMPLES:\n    \
                  meeple-rag index --category chess --input chess.json\n    \
                  meeple-rag evaluate --dataset datasets/chess-v1.json --enforce-gates\n    \
                  meeple-rag validate-dataset datasets/chess-v1.json\n    \
                  meeple-rag health\n    \
                  meeple-rag --config my.toml config --validate"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and index knowledge items under a category
    Index {
        /// Category (game or knowledge domain) to index into
        #[arg(long)]
        category: String,

        /// JSON file with an array of knowledge items
        #[arg(short, long)]
        input: PathBuf,

        /// Delete everything in the category before indexing
        #[arg(long)]
        replace: bool,
    },

    /// Run a retrieval evaluation and write JSON + Markdown reports
    Evaluate {
        /// Evaluation dataset file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Results retrieved per query (overrides config)
        #[arg(long)]
        top_k: Option<usize>,

        /// Queries in flight at once (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Report directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit non-zero when a quality gate fails
        #[arg(long)]
        enforce_gates: bool,
    },

    /// Check an evaluation dataset without running it
    ValidateDataset {
        /// Evaluation dataset file
        path: PathBuf,
    },

    /// Probe the vector store
    Health,

    /// Show the effective configuration
    Config {
        /// Validate the configuration and list warnings
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether `--config` still points at the default file name.
    pub fn uses_default_config(&self) -> bool {
        self.config == PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_evaluate() {
        let cli = Cli::try_parse_from([
            "meeple-rag",
            "evaluate",
            "--dataset",
            "chess.json",
            "--top-k",
            "5",
            "--enforce-gates",
        ])
        .unwrap();

        assert!(cli.uses_default_config());
        match cli.command {
            Commands::Evaluate {
                dataset,
                top_k,
                enforce_gates,
                ..
            } => {
                assert_eq!(dataset, PathBuf::from("chess.json"));
                assert_eq!(top_k, Some(5));
                assert!(enforce_gates);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "meeple-rag",
            "health",
            "--config",
            "custom.toml",
            "--no-color",
        ])
        .unwrap();
        assert!(cli.no_color);
        assert!(!cli.uses_default_config());
    }

    #[test]
    fn test_index_requires_category() {
        assert!(Cli::try_parse_from(["meeple-rag", "index", "--input", "x.json"]).is_err());
    }
}
