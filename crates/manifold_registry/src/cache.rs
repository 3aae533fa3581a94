//! On-disk snapshot of tool catalogs for peers whose `dynamic` flag is
//! off, so a restart can expose their tools before any connection is live.

use crate::session::DiscoveredTool;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const CATALOG_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub version: u32,
    #[serde(default)]
    pub peers: HashMap<String, Vec<DiscoveredTool>>,
}

impl Default for CatalogFile {
    fn default() -> Self {
        Self {
            version: CATALOG_FILE_VERSION,
            peers: HashMap::new(),
        }
    }
}

/// Read the catalog file. Missing or empty file yields an empty catalog;
/// invalid JSON is an error.
pub fn load(path: &Path) -> Result<CatalogFile> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CatalogFile::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read tool cache: {}", path.display()))
        }
    };
    if content.trim().is_empty() {
        return Ok(CatalogFile::default());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid tool cache file: {}", path.display()))
}

pub fn save(path: &Path, file: &CatalogFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write tool cache: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("manifold-cache-{}-{}.json", tag, std::process::id()))
    }

    #[test]
    fn missing_file_is_empty_catalog() {
        let file = load(Path::new("/nonexistent/manifold/cache.json")).unwrap();
        assert_eq!(file.version, CATALOG_FILE_VERSION);
        assert!(file.peers.is_empty());
    }

    #[test]
    fn roundtrip() {
        let path = temp_path("roundtrip");
        let mut file = CatalogFile::default();
        file.peers.insert(
            "demo".into(),
            vec![DiscoveredTool {
                name: "echo".into(),
                description: "repeat input".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        );
        save(&path, &file).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.peers["demo"].len(), 1);
        assert_eq!(loaded.peers["demo"][0].name, "echo");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let path = temp_path("invalid");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
