//! Configuration of a correlation table run.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json;

use crate::error::IntrError;
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_LAYERS};

/// The layers to inspect and how to correlate their units with the recorded cells.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// The model layers to inspect.
    pub layers: Vec<String>,
    /// The number of stimulus windows fed to the model at once.
    pub batch_size: usize,
    /// Rank units by the absolute value of their correlation. Not meant for publishable analysis.
    pub abs_val: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            layers: DEFAULT_LAYERS.iter().map(|layer| layer.to_string()).collect(),
            batch_size: DEFAULT_BATCH_SIZE,
            abs_val: false,
        }
    }
}

impl TableConfig {
    pub fn new<S: AsRef<str>>(layers: &[S]) -> Self {
        TableConfig {
            layers: layers.iter().map(|layer| layer.as_ref().to_string()).collect(),
            ..TableConfig::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_abs_val(mut self, abs_val: bool) -> Self {
        self.abs_val = abs_val;
        self
    }

    /// Returns an error if there is no layer to inspect or if the batch size is zero.
    pub fn validate(&self) -> Result<(), IntrError> {
        if self.layers.is_empty() {
            return Err(IntrError::InvalidParameter(
                "At least one layer must be inspected.".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IntrError::InvalidParameter(
                "The batch size must be positive.".to_string(),
            ));
        }
        Ok(())
    }

    /// The layers in the order they are evaluated: sorted, without duplicates.
    pub fn sorted_layers(&self) -> Vec<String> {
        let mut layers = self.layers.clone();
        layers.sort();
        layers.dedup();
        layers
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), IntrError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<TableConfig, IntrError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: TableConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default() {
        let config = TableConfig::default();
        assert_eq!(config.layers, vec!["sequential.2", "sequential.8"]);
        assert_eq!(config.batch_size, 500);
        assert!(!config.abs_val);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let empty: [&str; 0] = [];
        assert!(TableConfig::new(&empty).validate().is_err());
        assert!(TableConfig::new(&["conv1"]).with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_sorted_layers() {
        let config = TableConfig::new(&["sequential.8", "sequential.2", "sequential.8"]);
        assert_eq!(config.sorted_layers(), vec!["sequential.2", "sequential.8"]);
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = TableConfig::new(&["conv1", "conv2"])
            .with_batch_size(64)
            .with_abs_val(true);
        config.save_to(&path).unwrap();
        assert_eq!(TableConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "batch_size": 32 }"#).unwrap();

        let config = TableConfig::load_from(&path).unwrap();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.layers, TableConfig::default().layers);

        std::fs::write(&path, r#"{ "batch_size": 0 }"#).unwrap();
        assert!(TableConfig::load_from(&path).is_err());
    }
}
