use std::io;

use thiserror::Error;

use crate::state::ScannerState;

#[derive(Debug, Error)]
pub enum ZapError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("download failed: {url} ({reason})")]
    Download { url: String, reason: String },
    #[error("process error: {0}")]
    Process(String),
    #[error("{phase} called out of sequence: scanner is {state}")]
    OutOfSequence {
        phase: &'static str,
        state: ScannerState,
    },
    #[error("no cleaning up as ZAP did not process results (scanner is {state})")]
    NotReady { state: ScannerState },
    #[error("no path mapping named '{name}' for scanner {scanner}")]
    UnknownMapping { scanner: String, name: String },
}
