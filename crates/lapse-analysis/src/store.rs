//! Result persistence: a tabular data file plus a metadata file.
//!
//! A store persists as two side-by-side files sharing a logical
//! basename: `<name>.tsv` (the row-indexed table) and `<name>.json`
//! (the metadata record embedding the transform configuration, the
//! analysis parameters, and a provenance tag). The pair is the unit of
//! round-tripping: `save` then `load` into a fresh store reproduces
//! index, columns, values, and metadata exactly.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::AnalysisError;
use crate::table::DataTable;

/// Metadata record type: a JSON object preserving insertion order.
pub type Metadata = Map<String, Value>;

/// Metadata key under which the transform configuration is embedded.
pub const TRANSFORMS_KEY: &str = "transforms";

/// Metadata key under which provenance is recorded.
pub const PROVENANCE_KEY: &str = "provenance";

/// A result table with the metadata that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    /// Rows indexed by frame number, columns in declared order.
    pub data: DataTable,
    /// Transform configuration, analysis parameters, provenance.
    pub metadata: Metadata,
}

impl ResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the tabular data file for `name` under `folder`.
    #[must_use]
    pub fn data_path(folder: &Path, name: &str) -> PathBuf {
        folder.join(format!("{name}.tsv"))
    }

    /// Path of the metadata file for `name` under `folder`.
    #[must_use]
    pub fn metadata_path(folder: &Path, name: &str) -> PathBuf {
        folder.join(format!("{name}.json"))
    }

    /// Persist the store as `<name>.tsv` + `<name>.json` under
    /// `folder`.
    ///
    /// Re-saving over files of the same logical shape is allowed; an
    /// existing data file with a different column set is refused.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::ShapeMismatch`] when the existing data
    /// file has different columns, and I/O or encoding errors
    /// otherwise.
    pub fn save(&self, folder: &Path, name: &str) -> Result<(), AnalysisError> {
        let data_path = Self::data_path(folder, name);
        if data_path.exists() {
            let existing = std::fs::read_to_string(&data_path)?;
            let existing_columns = header_columns(&existing);
            if existing_columns != self.data.columns() {
                return Err(AnalysisError::ShapeMismatch {
                    path: data_path,
                    existing: existing_columns,
                    new: self.data.columns().to_vec(),
                });
            }
        }

        std::fs::write(&data_path, self.data.to_tsv())?;
        let metadata_path = Self::metadata_path(folder, name);
        let json = serde_json::to_string_pretty(&Value::Object(self.metadata.clone()))?;
        std::fs::write(&metadata_path, json)?;
        tracing::info!(
            data = %data_path.display(),
            rows = self.data.len(),
            "saved analysis results"
        );
        Ok(())
    }

    /// Restore a store saved by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::MissingResults`] when the data file is
    /// absent, [`AnalysisError::CorruptResults`] when it cannot be
    /// parsed, and [`AnalysisError::MissingMetadata`] /
    /// [`AnalysisError::CorruptMetadata`] for the metadata file.
    pub fn load(&mut self, folder: &Path, name: &str) -> Result<(), AnalysisError> {
        let data_path = Self::data_path(folder, name);
        if !data_path.exists() {
            return Err(AnalysisError::MissingResults { path: data_path });
        }
        let text = std::fs::read_to_string(&data_path)?;
        let data = DataTable::from_tsv(&text).map_err(|e| AnalysisError::CorruptResults {
            path: data_path,
            reason: e.to_string(),
        })?;

        let metadata = Self::load_metadata(folder, name)?;
        self.data = data;
        self.metadata = metadata;
        Ok(())
    }

    /// Read only the metadata file of a saved store.
    ///
    /// This is the regeneration entry point: it does not touch the
    /// tabular data.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::MissingMetadata`] when the file is
    /// absent and [`AnalysisError::CorruptMetadata`] when it does not
    /// parse into a JSON object.
    pub fn load_metadata(folder: &Path, name: &str) -> Result<Metadata, AnalysisError> {
        let path = Self::metadata_path(folder, name);
        if !path.exists() {
            return Err(AnalysisError::MissingMetadata {
                what: format!("metadata file {}", path.display()),
            });
        }
        let text = std::fs::read_to_string(&path)?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| AnalysisError::CorruptMetadata {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(AnalysisError::CorruptMetadata {
                path,
                reason: format!("expected a JSON object, found {other}"),
            }),
        }
    }
}

fn header_columns(text: &str) -> Vec<String> {
    text.lines()
        .next()
        .map(|header| header.split('\t').skip(1).map(str::to_owned).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn sample_store() -> ResultStore {
        let mut data = DataTable::new(vec!["time (unix)".to_owned(), "zone 1".to_owned()]);
        data.insert_row(0, vec![Cell::Null, Cell::Float(10.0)])
            .unwrap();
        data.insert_row(1, vec![Cell::Float(0.5), Cell::Float(20.0)])
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("zones".to_owned(), serde_json::json!({"zone 1": [0, 0, 4, 4]}));
        metadata.insert(
            PROVENANCE_KEY.to_owned(),
            serde_json::json!({"tool": "lapse", "version": "0.1.0"}),
        );
        ResultStore { data, metadata }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();
        store.save(dir.path(), "Img_GreyLevel").unwrap();

        let mut restored = ResultStore::new();
        restored.load(dir.path(), "Img_GreyLevel").unwrap();
        assert_eq!(restored, store);
    }

    #[test]
    fn resave_same_shape_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();
        store.save(dir.path(), "Results").unwrap();
        store.save(dir.path(), "Results").unwrap();
    }

    #[test]
    fn save_refuses_shape_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();
        store.save(dir.path(), "Results").unwrap();

        let mut other = ResultStore::new();
        other.data = DataTable::new(vec!["something else".to_owned()]);
        assert!(matches!(
            other.save(dir.path(), "Results"),
            Err(AnalysisError::ShapeMismatch { .. }),
        ));
    }

    #[test]
    fn load_missing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultStore::new();
        assert!(matches!(
            store.load(dir.path(), "Nothing"),
            Err(AnalysisError::MissingResults { .. }),
        ));
    }

    #[test]
    fn load_corrupt_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();
        store.save(dir.path(), "Results").unwrap();
        std::fs::write(dir.path().join("Results.json"), "not json").unwrap();

        let mut restored = ResultStore::new();
        assert!(matches!(
            restored.load(dir.path(), "Results"),
            Err(AnalysisError::CorruptMetadata { .. }),
        ));
    }

    #[test]
    fn load_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();
        store.save(dir.path(), "Results").unwrap();

        let metadata = ResultStore::load_metadata(dir.path(), "Results").unwrap();
        assert_eq!(metadata, store.metadata);
        assert!(matches!(
            ResultStore::load_metadata(dir.path(), "Absent"),
            Err(AnalysisError::MissingMetadata { .. }),
        ));
    }

    #[test]
    fn metadata_preserves_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("zone 2".to_owned(), serde_json::json!(2));
        metadata.insert("zone 10".to_owned(), serde_json::json!(10));
        metadata.insert("zone 1".to_owned(), serde_json::json!(1));
        let store = ResultStore {
            data: DataTable::default(),
            metadata,
        };
        store.save(dir.path(), "Order").unwrap();

        let loaded = ResultStore::load_metadata(dir.path(), "Order").unwrap();
        let keys: Vec<&String> = loaded.keys().collect();
        assert_eq!(keys, vec!["zone 2", "zone 10", "zone 1"]);
    }
}
