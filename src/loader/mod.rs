//! Script fetching for worker bootstraps and `importScripts`

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::transpiler::{TranspileError, Transpiler};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no script at {0}")]
    NotFound(String),

    #[error("unsupported URL scheme '{scheme}' for {url}")]
    UnsupportedScheme { scheme: String, url: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transpile(#[from] TranspileError),
}

/// Source of script text for resolved URLs
pub trait ScriptLoader {
    fn load(&self, url: &Url) -> Result<String, LoadError>;
}

/// Loads `file:` URLs from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FsScriptLoader;

impl FsScriptLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptLoader for FsScriptLoader {
    fn load(&self, url: &Url) -> Result<String, LoadError> {
        if url.scheme() != "file" {
            return Err(LoadError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                url: url.to_string(),
            });
        }
        let path = url
            .to_file_path()
            .map_err(|_| LoadError::NotFound(url.to_string()))?;

        std::fs::read_to_string(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(url.to_string()),
            _ => LoadError::Io { path, source },
        })
    }
}

/// Scripts held in memory, keyed by absolute URL
#[derive(Debug, Default)]
pub struct MemoryScriptLoader {
    scripts: RefCell<HashMap<String, String>>,
}

impl MemoryScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, url: &str, source: &str) -> Self {
        self.insert(url, source);
        self
    }

    pub fn insert(&self, url: &str, source: &str) {
        self.scripts
            .borrow_mut()
            .insert(url.to_string(), source.to_string());
    }
}

impl ScriptLoader for MemoryScriptLoader {
    fn load(&self, url: &Url) -> Result<String, LoadError> {
        self.scripts
            .borrow()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| LoadError::NotFound(url.to_string()))
    }
}

/// Load a script and transpile it if its path is TypeScript
pub fn fetch_script(
    loader: &dyn ScriptLoader,
    transpiler: &Transpiler,
    url: &Url,
) -> Result<String, LoadError> {
    let source = loader.load(url)?;
    Ok(transpiler.prepare(source, url.path())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fs_loader_reads_file_urls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo.js");
        fs::write(&path, "onmessage = (e) => postMessage(e.data);").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let source = FsScriptLoader::new().load(&url).unwrap();
        assert!(source.contains("postMessage"));
    }

    #[test]
    fn test_fs_loader_missing_file() {
        let dir = TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.js")).unwrap();
        assert!(matches!(
            FsScriptLoader::new().load(&url),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn test_fs_loader_rejects_remote_urls() {
        let url = Url::parse("https://example.com/w.js").unwrap();
        assert!(matches!(
            FsScriptLoader::new().load(&url),
            Err(LoadError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryScriptLoader::new().with_script("http://example.com/w.js", "1 + 1");
        let url = Url::parse("http://example.com/w.js").unwrap();
        assert_eq!(loader.load(&url).unwrap(), "1 + 1");

        let other = Url::parse("http://example.com/other.js").unwrap();
        assert!(matches!(loader.load(&other), Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_fetch_transpiles_typescript() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.ts");
        fs::write(&path, "const n: number = 41; postMessage(n + 1);").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let source = fetch_script(&FsScriptLoader::new(), &Transpiler::new(), &url).unwrap();
        assert!(!source.contains(": number"));
    }
}
