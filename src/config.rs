use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

use crate::{
    error::CurationError,
    schema::{Layer, LayerRegistry},
};

/// Source of layer definitions. The schema is owned elsewhere; this crate only reads it.
pub trait SchemaProvider: Send + Sync {
    fn get_layers(&self) -> Result<Vec<Layer>, CurationError>;
    fn set_layers(&self, layers: Vec<Layer>) -> Result<(), CurationError>;

    /// Load every layer into a fresh registry.
    fn registry(&self) -> Result<LayerRegistry, CurationError> {
        Ok(LayerRegistry::from_layers(self.get_layers()?))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    layers: Vec<Layer>,
}

/// Reads `[[layers]]` tables from a TOML file.
#[derive(Debug, Serialize, Deserialize)]
pub struct TomlSchemaProvider {
    path: PathBuf,
}

impl TomlSchemaProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlSchemaProvider { path }
    }
}

impl SchemaProvider for TomlSchemaProvider {
    fn get_layers(&self) -> Result<Vec<Layer>, CurationError> {
        tracing::debug!(
            "[TomlSchemaProvider::get_layers] Reading layers from: {:?}",
            &self.path
        );
        if !self.path.exists() {
            tracing::debug!("[TomlSchemaProvider::get_layers] Schema file not found, no layers.");
            return Ok(Vec::new());
        }
        let content = read_to_string(&self.path)?;
        let schema: SchemaFile = toml::from_str(&content)?;
        Ok(schema.layers)
    }

    fn set_layers(&self, layers: Vec<Layer>) -> Result<(), CurationError> {
        tracing::debug!(
            "[TomlSchemaProvider::set_layers] Writing {} layers to: {:?}",
            layers.len(),
            &self.path
        );
        let toml_string = toml::to_string(&SchemaFile { layers })?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::LayerId,
        schema::{AnchoringMode, Feature, LayerKind},
    };
    use tempfile::tempdir;
    use test_log::test;

    #[test]
    fn test_reads_layer_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.toml");
        write(
            &path,
            r#"
            [[layers]]
            id = 0
            name = "Token"
            kind = "Span"
            segmentation = "token"
            overlap_mode = "no_overlap"

            [[layers]]
            id = 2
            name = "NamedEntity"
            kind = "Span"
            anchoring_mode = "tokens"

            [[layers.features]]
            name = "value"
            shape = { primitive = "string" }

            [[layers]]
            id = 3
            name = "Dependency"
            kind = "Relation"
            endpoint_layer = 0
            cross_sentence = false
            "#,
        )
        .unwrap();

        let registry = TomlSchemaProvider::new(path).registry().unwrap();
        assert_eq!(registry.list().len(), 3);
        let ne = registry.by_name("NamedEntity").unwrap();
        assert_eq!(ne.anchoring_mode, AnchoringMode::Tokens);
        assert!(ne.feature("value").is_some());
        let dep = registry.get(LayerId(3)).unwrap();
        assert_eq!(dep.kind, LayerKind::Relation);
        assert_eq!(dep.endpoint_layer, Some(LayerId(0)));
        assert!(!dep.cross_sentence);
    }

    #[test]
    fn test_missing_file_is_empty_schema() {
        let dir = tempdir().unwrap();
        let provider = TomlSchemaProvider::new(dir.path().join("absent.toml"));
        assert!(provider.get_layers().unwrap().is_empty());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let provider = TomlSchemaProvider::new(dir.path().join("schema.toml"));
        let layers = vec![
            Layer::token(LayerId(0)),
            Layer::span(LayerId(4), "Event")
                .with_anchoring(AnchoringMode::SingleToken)
                .with_feature(Feature::link("participants", Some(LayerId(2)))),
        ];
        provider.set_layers(layers.clone()).unwrap();
        assert_eq!(provider.get_layers().unwrap(), layers);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.toml");
        write(&path, "[[layers]]\nid = \"x\"\n").unwrap();
        assert!(matches!(
            TomlSchemaProvider::new(path).get_layers(),
            Err(CurationError::Serialization(_))
        ));
    }
}
