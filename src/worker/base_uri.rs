//! Base URI resolution for worker scripts
//!
//! A worker script reference is resolved the way a host-native script load
//! would resolve it: absolute URLs are kept, origin-relative paths (`/x.js`)
//! hang off the base origin, and everything else is relative to the base
//! directory.

use std::path::Path;
use url::Url;

use super::error::{WorkerError, WorkerResult};

/// Where the host "page" lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLocation {
    /// URL of the host document (for a CLI run, the working directory)
    pub document: Url,
    /// Explicit `<base href>` equivalent
    pub base_href: Option<Url>,
    /// The host script currently executing, if any
    pub current_script: Option<Url>,
}

impl HostLocation {
    pub fn new(document: Url) -> Self {
        Self {
            document,
            base_href: None,
            current_script: None,
        }
    }

    /// Location for a host rooted at a filesystem directory
    pub fn from_directory(dir: &Path) -> WorkerResult<Self> {
        let document = Url::from_directory_path(dir).map_err(|_| {
            WorkerError::invalid(format!(
                "host directory '{}' is not an absolute path",
                dir.display()
            ))
        })?;
        Ok(Self::new(document))
    }
}

/// Resolves the base URI that relative worker script references are joined to
#[derive(Debug, Clone, Default)]
pub struct BaseUriResolver;

impl BaseUriResolver {
    pub fn new() -> Self {
        Self
    }

    /// Pick the base URI for a new worker.
    ///
    /// Precedence: the directory of the running host script, an explicit
    /// override (`Worker.baseURI`, taken verbatim), the document's base href,
    /// the document's own directory.
    pub fn resolve_script_base(
        &self,
        location: &HostLocation,
        override_base: Option<&Url>,
    ) -> WorkerResult<Url> {
        location
            .current_script
            .as_ref()
            .and_then(uri_dir)
            .or_else(|| override_base.filter(|base| !base.cannot_be_a_base()).cloned())
            .or_else(|| location.base_href.as_ref().and_then(uri_dir))
            .or_else(|| uri_dir(&location.document))
            .ok_or_else(|| WorkerError::invalid("could not determine the script base URI"))
    }

    /// Resolve a script reference against a base URI
    pub fn resolve_script(&self, base: &Url, script_ref: &str) -> WorkerResult<Url> {
        let trimmed = script_ref.trim();
        if trimmed.is_empty() {
            return Err(WorkerError::invalid(
                "worker script reference must be a non-empty string",
            ));
        }
        base.join(trimmed).map_err(|e| {
            WorkerError::invalid(format!("cannot resolve worker script '{}': {}", trimmed, e))
        })
    }
}

/// Directory part of a URI: query and fragment stripped, path cut after the last `/`
fn uri_dir(uri: &Url) -> Option<Url> {
    if uri.cannot_be_a_base() {
        return None;
    }
    let mut stripped = uri.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    stripped.join(".").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_document_directory_is_default_base() {
        let location = HostLocation::new(url("http://example.com/app/index.html?x=1#top"));
        let base = BaseUriResolver::new()
            .resolve_script_base(&location, None)
            .unwrap();
        assert_eq!(base.as_str(), "http://example.com/app/");
    }

    #[test]
    fn test_precedence() {
        let mut location = HostLocation::new(url("http://example.com/app/index.html"));
        location.base_href = Some(url("http://cdn.example.com/static/"));
        location.current_script = Some(url("http://example.com/js/main.js"));
        let resolver = BaseUriResolver::new();
        let override_base = url("http://other.example.com/workers/");

        let base = resolver.resolve_script_base(&location, None).unwrap();
        assert_eq!(base.as_str(), "http://example.com/js/");

        // the running script wins over the override
        let base = resolver
            .resolve_script_base(&location, Some(&override_base))
            .unwrap();
        assert_eq!(base.as_str(), "http://example.com/js/");

        location.current_script = None;
        let base = resolver
            .resolve_script_base(&location, Some(&override_base))
            .unwrap();
        assert_eq!(base.as_str(), "http://other.example.com/workers/");

        let base = resolver.resolve_script_base(&location, None).unwrap();
        assert_eq!(base.as_str(), "http://cdn.example.com/static/");
    }

    #[test]
    fn test_override_is_used_verbatim() {
        let location = HostLocation::new(url("http://example.com/app/index.html"));
        let override_base = url("http://x/workers");
        let base = BaseUriResolver::new()
            .resolve_script_base(&location, Some(&override_base))
            .unwrap();
        assert_eq!(base.as_str(), "http://x/workers");

        let unusable = url("data:text/plain,hi");
        let base = BaseUriResolver::new()
            .resolve_script_base(&location, Some(&unusable))
            .unwrap();
        assert_eq!(base.as_str(), "http://example.com/app/");
    }

    #[test]
    fn test_unusable_candidates_are_skipped() {
        let mut location = HostLocation::new(url("http://example.com/a/b.html"));
        location.base_href = Some(url("data:text/plain,hello"));
        let base = BaseUriResolver::new()
            .resolve_script_base(&location, None)
            .unwrap();
        assert_eq!(base.as_str(), "http://example.com/a/");
    }

    #[test]
    fn test_no_usable_base() {
        let location = HostLocation::new(url("data:text/html,<p>hi</p>"));
        let err = BaseUriResolver::new()
            .resolve_script_base(&location, None)
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidArgument(_)));
    }

    #[test]
    fn test_resolve_script_forms() {
        let resolver = BaseUriResolver::new();
        let base = url("http://example.com/app/js/");

        let cases = [
            ("echo.js", "http://example.com/app/js/echo.js"),
            ("./echo.js", "http://example.com/app/js/echo.js"),
            ("../lib/echo.js", "http://example.com/app/lib/echo.js"),
            ("/echo.js", "http://example.com/echo.js"),
            ("https://cdn.example.com/w.js", "https://cdn.example.com/w.js"),
            ("echo.js?v=2", "http://example.com/app/js/echo.js?v=2"),
        ];
        for (input, expected) in cases {
            assert_eq!(resolver.resolve_script(&base, input).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_empty_script_reference_rejected() {
        let resolver = BaseUriResolver::new();
        let base = url("http://example.com/");
        assert!(matches!(
            resolver.resolve_script(&base, "   "),
            Err(WorkerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_directory() {
        let dir = std::env::temp_dir();
        let location = HostLocation::from_directory(&dir).unwrap();
        assert_eq!(location.document.scheme(), "file");
        assert!(location.document.path().ends_with('/'));
    }
}
