use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Missing input table '{table}' at {path}; run the {producer} stage first")]
    MissingInput {
        table: &'static str,
        path: PathBuf,
        producer: &'static str,
    },

    #[error("Malformed table '{table}' at {path} (produced by the {producer} stage): {source}")]
    MalformedTable {
        table: &'static str,
        path: PathBuf,
        producer: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("Transaction {tx_id} references missing {label} node '{key}'")]
    MissingReference {
        tx_id: String,
        label: &'static str,
        key: String,
    },

    #[error("Transaction {tx_id} (row {row}) has dangling {column} '{key}'")]
    DanglingReference {
        row: usize,
        tx_id: String,
        column: &'static str,
        key: String,
    },

    #[error("Transaction {tx_id} (row {row}) has is_fraud = {value}, expected 0 or 1")]
    InvalidLabel { row: usize, tx_id: String, value: u8 },

    #[error("Graph store unreachable: {0}")]
    Connectivity(String),

    #[error("Load stage '{stage}' failed at batch {batch} (first key {first_key}): {source}")]
    BatchFailed {
        stage: &'static str,
        batch: usize,
        first_key: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
