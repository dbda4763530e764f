//! Fingerprinted static assets.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Maps fingerprinted public names (`app-3f2a1c.css`) to the files under
/// the static root they stand for (`app.css`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Assets {
    files: HashMap<String, String>,
}

impl Assets {
    pub fn new(files: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }

    /// Read a JSON manifest. A missing or unreadable manifest yields an empty
    /// map, so every file is served uncached.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no asset manifest");
                return Self::default();
            }
        };
        serde_json::from_slice(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid asset manifest");
            Self::default()
        })
    }

    /// The file behind a fingerprinted name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// The fingerprinted name to link to for `file`, or `file` itself.
    pub fn public_name<'a>(&'a self, file: &'a str) -> &'a str {
        self.files
            .iter()
            .find(|(_, target)| target.as_str() == file)
            .map_or(file, |(hashed, _)| hashed.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests_map_hashed_names_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.json");
        std::fs::write(&path, r#"{"app-3f2a1c.css": "app.css"}"#).unwrap();
        let assets = Assets::load(&path);
        assert_eq!(assets.resolve("app-3f2a1c.css"), Some("app.css"));
        assert_eq!(assets.public_name("app.css"), "app-3f2a1c.css");
        assert_eq!(assets.public_name("logo.svg"), "logo.svg");
        assert_eq!(assets.resolve("app.css"), None);
    }

    #[test]
    fn missing_manifests_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Assets::load(&dir.path().join("absent.json")), Assets::default());
    }
}
