//! Command-line and environment configuration.
//!
//! Every option can also come from the environment; a `.env` file in the
//! working directory is loaded before parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free";

/// Claimwise: document-grounded auto insurance claim adjudication
#[derive(Parser, Debug)]
#[command(name = "claimwise", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding policy documents, declarations pages and claim files
    #[arg(long, env = "DATA_DIR", default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// Base directory for persisted indexes
    #[arg(long, env = "INDEX_PATH", default_value = "data_out", global = true)]
    pub index_path: PathBuf,

    /// Retrieval index backend
    #[arg(long, value_enum, default_value_t = Backend::Flat, global = true)]
    pub backend: Backend,

    /// Sentence-transformers model directory (model.onnx + tokenizer.json);
    /// the built-in hashing embedder is used when unset
    #[arg(long, env = "EMBED_MODEL_DIR", global = true)]
    pub embed_model_dir: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Plain-text log file, written in addition to stderr
    #[arg(long, env = "LOG_FILE", default_value = "app.log", global = true)]
    pub log_file: PathBuf,

    /// Disable the log file
    #[arg(long, global = true)]
    pub no_log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build (or load) the policy and declarations indexes
    Index {
        /// Discard persisted indexes and rebuild from the documents
        #[arg(long)]
        rebuild: bool,

        #[command(flatten)]
        corpus: CorpusArgs,
    },
    /// Adjudicate one or more claim files
    Adjudicate {
        /// Claim JSON files
        #[arg(required = true)]
        claims: Vec<PathBuf>,

        /// Write `<claim_number>.decision.json` files here
        #[arg(long, env = "OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Claims adjudicated at once
        #[arg(long, default_value_t = 2)]
        concurrency: usize,

        /// Hide per-stage progress lines
        #[arg(short, long)]
        quiet: bool,

        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        corpus: CorpusArgs,
    },
    /// Query the indexes directly
    Retrieve {
        /// Free-text query
        query: String,

        /// Search the declarations index restricted to this policy number
        #[arg(long)]
        policy_number: Option<String>,

        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// Restrict the policy corpus to these file names (repeatable)
    #[arg(long = "policy-file")]
    pub policy_files: Vec<String>,

    /// Accepted document extensions
    #[arg(long = "ext", default_values_t = [String::from("md"), String::from("txt")])]
    pub extensions: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LlmArgs {
    /// API key for the chat completions endpoint
    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model identifier
    #[arg(long, env = "LLM_MODEL_NAME", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// OpenAI-compatible API base URL
    #[arg(
        long,
        env = "LLM_BASE_URL",
        default_value = claimwise_ai::ChatCompletionsClient::TOGETHER_BASE_URL
    )]
    pub base_url: String,

    /// Sampling temperature
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.0)]
    pub temperature: f32,

    /// Completion token limit per request
    #[arg(long, env = "LLM_MAX_TOKENS", default_value_t = 1024)]
    pub max_tokens: u32,

    /// Re-prompts allowed after a response fails schema validation
    #[arg(long, default_value_t = 1)]
    pub schema_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process index persisted as Arrow IPC
    Flat,
    /// LanceDB tables (requires the `lancedb` feature)
    Lance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn adjudicate_parses_claims_and_defaults() {
        let cli = Cli::try_parse_from([
            "claimwise",
            "adjudicate",
            "data/john.json",
            "data/alice.json",
            "--api-key",
            "k",
        ])
        .unwrap();
        match cli.command {
            Command::Adjudicate {
                claims,
                concurrency,
                llm,
                corpus,
                ..
            } => {
                assert_eq!(claims.len(), 2);
                assert_eq!(concurrency, 2);
                assert_eq!(llm.schema_retries, 1);
                assert_eq!(llm.temperature, 0.0);
                assert_eq!(llm.max_tokens, 1024);
                assert_eq!(corpus.extensions, vec!["md", "txt"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.backend, Backend::Flat);
    }

    #[test]
    fn sampling_options_override_defaults() {
        let cli = Cli::try_parse_from([
            "claimwise",
            "adjudicate",
            "data/john.json",
            "--temperature",
            "0.3",
            "--max-tokens",
            "512",
        ])
        .unwrap();
        let Command::Adjudicate { llm, .. } = cli.command else {
            panic!("expected adjudicate");
        };
        assert_eq!(llm.temperature, 0.3);
        assert_eq!(llm.max_tokens, 512);
    }

    #[test]
    fn adjudicate_requires_a_claim() {
        assert!(Cli::try_parse_from(["claimwise", "adjudicate"]).is_err());
    }

    #[test]
    fn retrieve_with_policy_filter() {
        let cli = Cli::try_parse_from([
            "claimwise",
            "--backend",
            "lance",
            "retrieve",
            "collision deductible",
            "--policy-number",
            "CAIP400",
        ])
        .unwrap();
        assert_eq!(cli.backend, Backend::Lance);
        match cli.command {
            Command::Retrieve {
                query,
                policy_number,
                top_k,
            } => {
                assert_eq!(query, "collision deductible");
                assert_eq!(policy_number.as_deref(), Some("CAIP400"));
                assert_eq!(top_k, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
