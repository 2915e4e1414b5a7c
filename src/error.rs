use std::path::PathBuf;

use thiserror::Error;

/// Failure to read one source. Never fatal: the loader turns it into an empty
/// table plus a load event.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("sheet not found: {0}")]
    SheetNotFound(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no data could be loaded from any source in {0}")]
    NoData(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("export failed: {0}")]
    Export(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
