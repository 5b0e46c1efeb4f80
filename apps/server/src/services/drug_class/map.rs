//! Static drug-class identifier to display label table.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::{Error, Result};

const BUNDLED_MAP: &str = include_str!("../../../data/drug_classes.json");

/// Read-only after construction; safe to share behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct DrugClassMap {
    labels: HashMap<String, String>,
}

impl DrugClassMap {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }

    /// The table shipped with the gateway.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_MAP)
            .map_err(|e| Error::Config(format!("bundled drug class map is invalid: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read drug class map {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw).map_err(|e| {
            Error::Config(format!("invalid drug class map {}: {e}", path.display()))
        })
    }

    /// Configured file when given, bundled table otherwise.
    pub fn from_config(path: Option<&Path>) -> Result<Self> {
        let map = match path {
            Some(path) => Self::load(path)?,
            None => Self::bundled()?,
        };
        tracing::info!(entries = map.len(), "Drug class map loaded");
        Ok(map)
    }

    fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        let labels: HashMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self::new(labels))
    }

    pub fn label(&self, class_id: &str) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    /// Distinct labels for `class_ids`; unmapped ids are dropped.
    pub fn labels_for<'a, I>(&self, class_ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        class_ids
            .into_iter()
            .filter_map(|id| self.label(id))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bundled_map_resolves_known_classes() {
        let map = DrugClassMap::bundled().unwrap();
        assert_eq!(map.label("N0000175694"), Some("Benzodiazepines"));
        assert_eq!(map.label("N02A"), Some("Opioids"));
        assert!(map.label("unknown").is_none());
    }

    #[test]
    fn labels_are_deduplicated_and_unknown_dropped() {
        let map = DrugClassMap::bundled().unwrap();
        let ids = vec![
            "N0000175694".to_string(),
            "N05BA".to_string(),
            "N0000175694".to_string(),
            "nope".to_string(),
        ];
        let labels = map.labels_for(&ids);
        assert_eq!(labels.len(), 1);
        assert!(labels.contains("Benzodiazepines"));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("drug-classes-{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"X1": "Test class"}}"#).unwrap();

        let map = DrugClassMap::from_config(Some(&path)).unwrap();
        assert_eq!(map.label("X1"), Some("Test class"));
        assert_eq!(map.len(), 1);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn invalid_file_is_config_error() {
        let err = DrugClassMap::load(Path::new("/nonexistent/drug_classes.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
