//! Template sources.
//!
//! A [`ConfigSource`] supplies the ordered list of templates a resolution
//! starts from. Schema validation is not done here: the engine receives parsed
//! JSON and skips what it cannot use with a diagnostic.

use crate::error::SourceError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load every template, in order.
    async fn load(&self) -> Result<Vec<Value>, SourceError>;
}

/// Templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    templates: Vec<Value>,
}

impl StaticSource {
    pub fn new(templates: Vec<Value>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn load(&self) -> Result<Vec<Value>, SourceError> {
        Ok(self.templates.clone())
    }
}

/// Templates read from a `.json` file, or from every `.json` file in a
/// directory in file-name order.
///
/// Each file holds either one template object or an array of them.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let io = |source| SourceError::Io { path: self.path.clone(), source };
        let metadata = tokio::fs::metadata(&self.path).await.map_err(io)?;
        if !metadata.is_dir() {
            return Ok(vec![self.path.clone()]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(io)?;
        while let Some(entry) = entries.next_entry().await.map_err(io)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn read_templates(path: &Path) -> Result<Vec<Value>, SourceError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io { path: path.to_path_buf(), source })?;
    let value: Value =
        serde_json::from_str(&text).map_err(|source| SourceError::Parse { path: path.to_path_buf(), source })?;

    match value {
        Value::Array(templates) => Ok(templates),
        template @ Value::Object(_) => Ok(vec![template]),
        _ => Err(SourceError::NotATemplate { path: path.to_path_buf() }),
    }
}

#[async_trait]
impl ConfigSource for JsonFileSource {
    #[tracing::instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<Value>, SourceError> {
        let mut templates = Vec::new();
        for file in self.files().await? {
            let loaded = read_templates(&file).await?;
            tracing::debug!(file = %file.display(), templates = loaded.len(), "loaded templates");
            templates.extend(loaded);
        }
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("entity-resolver-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn static_source_returns_its_templates() {
        let source = StaticSource::new(vec![json!({"Name": "a", "Probe": "TRUE"})]);
        assert_eq!(source.load().await.unwrap(), vec![json!({"Name": "a", "Probe": "TRUE"})]);
    }

    #[tokio::test]
    async fn directory_files_load_in_name_order() {
        let dir = scratch_dir("dir");
        std::fs::write(dir.join("b.json"), r#"{"Name": "b", "Probe": "TRUE"}"#).unwrap();
        std::fs::write(dir.join("a.json"), r#"[{"Name": "a1", "Probe": "TRUE"}, {"Name": "a2", "Probe": "TRUE"}]"#)
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "not a template").unwrap();

        let templates = JsonFileSource::new(&dir).load().await.unwrap();
        let names: Vec<&str> = templates.iter().filter_map(|t| t["Name"].as_str()).collect();
        assert_eq!(names, vec!["a1", "a2", "b"]);

        let single = JsonFileSource::new(dir.join("b.json")).load().await.unwrap();
        assert_eq!(single.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn bad_files_are_errors() {
        let dir = scratch_dir("bad");
        std::fs::write(dir.join("broken.json"), "{").unwrap();
        std::fs::write(dir.join("scalar.json"), "3").unwrap();

        let err = JsonFileSource::new(dir.join("broken.json")).load().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
        let err = JsonFileSource::new(dir.join("scalar.json")).load().await.unwrap_err();
        assert!(matches!(err, SourceError::NotATemplate { .. }));
        let err = JsonFileSource::new(dir.join("missing.json")).load().await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
