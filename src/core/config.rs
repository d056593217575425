//! Aggregate engine settings.
//!
//! Each component keeps its own config struct next to its implementation
//! (`VectorStoreConfig`, `ContextConfig`, `PipelineConfig`, `ProviderConfig`);
//! `Settings` bundles them for loading from a single TOML or JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, Result};
use crate::llm::http::ProviderConfig;
use crate::rag::context_builder::ContextConfig;
use crate::rag::pipeline::PipelineConfig;
use crate::vector::VectorStoreConfig;

/// Full engine configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub vector: VectorStoreConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

impl Settings {
    /// Load settings from a `.toml` or `.json` file, chosen by extension.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(EngineError::internal)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(EngineError::validation),
            Some("json") => serde_json::from_str(&raw).map_err(EngineError::validation),
            other => Err(EngineError::Validation(format!(
                "unsupported settings format: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip() {
        let settings = Settings::default();
        let raw = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.vector.dimension, settings.vector.dimension);
    }

    #[test]
    fn load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "vector: {}").unwrap();

        let err = Settings::load_from_path(&path).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn load_json_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"vector": {"dimension": 8}}"#).unwrap();

        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.vector.dimension, 8);
    }
}
