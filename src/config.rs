use std::{collections::BTreeMap, fs, path::{Path, PathBuf}};

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Parameter file read when none is given on the command line
pub const DEFAULT_PARAMETER_FILE: &str = "kopare_parameters.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parameter file not found: {0}")]
    ParameterFileNotFound(PathBuf),

    #[error("Parameter path is not a file: {0}")]
    ParameterFileNotAFile(PathBuf),

    #[error("Invalid parameter file {path}: {source}")]
    ParameterFileInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Processing parameters
///
/// ```json
/// { "Median_filter_size": 3 }
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Parameters {
    #[serde(rename = "Median_filter_size")]
    pub median_filter_size: usize,

    /// Entries not used by the pipeline, kept for reporting
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Parameters {
    pub fn new(median_filter_size: usize) -> Self {
        Self {
            median_filter_size,
            extra: BTreeMap::new(),
        }
    }

    /// Number of entries in the parameter file
    pub fn entry_count(&self) -> usize {
        1 + self.extra.len()
    }
}

/// Load and validate JSON parameters
pub fn load_parameters(path: impl AsRef<Path>) -> Result<Parameters, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::ParameterFileNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(ConfigError::ParameterFileNotAFile(path.to_path_buf()));
    }

    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| ConfigError::ParameterFileInvalid {
        path: path.to_path_buf(),
        source,
    })
}
