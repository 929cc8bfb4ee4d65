use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub const DEFAULT_CACHE_NAME: &str = "todo";

/// Tunables for the replay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TodoConfig {
    /// Lowest transaction id the ledger will ever serve for a list.
    pub first_valid_transaction_id: i64,
    /// Key the collection blob is stored under.
    pub cache_name: String,
    /// When false every sync re-decrypts its batch.
    pub use_record_cache: bool,
}

impl Default for TodoConfig {
    fn default() -> Self {
        Self {
            first_valid_transaction_id: 0,
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            use_record_cache: true,
        }
    }
}

impl TodoConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Cursor value of a list that has never been synced.
    pub fn never_synced_cursor(&self) -> i64 {
        self.first_valid_transaction_id.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_yields_defaults() {
        let config = TodoConfig::from_json_str("{}").unwrap();
        assert_eq!(config, TodoConfig::default());
        assert_eq!(config.never_synced_cursor(), -1);
    }

    #[test]
    fn camel_case_fields_override_defaults() {
        let config = TodoConfig::from_json_str(
            r#"{"firstValidTransactionId": 100, "cacheName": "todo-7", "useRecordCache": false}"#,
        )
        .unwrap();
        assert_eq!(config.first_valid_transaction_id, 100);
        assert_eq!(config.cache_name, "todo-7");
        assert!(!config.use_record_cache);
        assert_eq!(config.never_synced_cursor(), 99);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = TodoConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cacheName": "from-file"}}"#).unwrap();
        let config = TodoConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_name, "from-file");

        let missing = file.path().with_extension("missing");
        assert!(matches!(TodoConfig::load(missing), Err(Error::Config(_))));
    }
}
