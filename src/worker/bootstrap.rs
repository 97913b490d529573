//! Typed bootstrap descriptor for a new isolated context

use serde::Serialize;
use url::{Origin, Url};

use super::id::ContextId;

/// A global the worker scope exposes, installed in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimGlobal {
    /// `self`, aliasing the global object
    SelfReference,
    Location,
    PostMessage,
    ImportScripts,
    Close,
    /// `addEventListener`, `removeEventListener`, `dispatchEvent` plus the
    /// `onmessage` / `onerror` slots
    EventTarget,
    /// `setTimeout` and friends, driven by the host loop
    Timers,
    /// `atob` / `btoa`
    Base64,
    Navigator,
    Console,
}

/// Read-only view of the worker script's URL, exposed as `self.location`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationSnapshot {
    pub href: String,
    pub origin: String,
    pub protocol: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl LocationSnapshot {
    pub fn from_url(url: &Url) -> Self {
        let protocol = format!("{}:", url.scheme());
        let hostname = url.host_str().unwrap_or_default().to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() {
            hostname.clone()
        } else {
            format!("{}:{}", hostname, port)
        };

        let origin = match url.origin() {
            origin @ Origin::Tuple(..) => origin.ascii_serialization(),
            Origin::Opaque(_) if url.scheme() == "file" => "file://localhost".to_string(),
            Origin::Opaque(_) => format!("{}//{}", protocol, host),
        };

        Self {
            href: url.as_str().to_string(),
            origin,
            protocol,
            host,
            hostname,
            port,
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{}", q)).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{}", f)).unwrap_or_default(),
        }
    }
}

/// Message the context sends back once its scripts have run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySignal {
    pub context: ContextId,
}

/// Everything an isolated context needs to boot itself
#[derive(Debug, Clone)]
pub struct BootstrapSpec {
    pub globals: Vec<ShimGlobal>,
    pub location: LocationSnapshot,
    pub scripts: Vec<Url>,
    pub ready: ReadySignal,
}

impl BootstrapSpec {
    /// Descriptor for a dedicated worker running `script`
    pub fn dedicated(id: &ContextId, script: &Url) -> Self {
        Self {
            globals: vec![
                ShimGlobal::SelfReference,
                ShimGlobal::Location,
                ShimGlobal::PostMessage,
                ShimGlobal::ImportScripts,
                ShimGlobal::Close,
                ShimGlobal::EventTarget,
                ShimGlobal::Timers,
                ShimGlobal::Base64,
                ShimGlobal::Navigator,
                ShimGlobal::Console,
            ],
            location: LocationSnapshot::from_url(script),
            scripts: vec![script.clone()],
            ready: ReadySignal {
                context: id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_location() {
        let url = Url::parse("https://example.com:8443/app/worker.js?v=2#frag").unwrap();
        let location = LocationSnapshot::from_url(&url);

        assert_eq!(location.href, "https://example.com:8443/app/worker.js?v=2#frag");
        assert_eq!(location.origin, "https://example.com:8443");
        assert_eq!(location.protocol, "https:");
        assert_eq!(location.host, "example.com:8443");
        assert_eq!(location.hostname, "example.com");
        assert_eq!(location.port, "8443");
        assert_eq!(location.pathname, "/app/worker.js");
        assert_eq!(location.search, "?v=2");
        assert_eq!(location.hash, "#frag");
    }

    #[test]
    fn test_default_port_is_empty() {
        let url = Url::parse("http://example.com/w.js").unwrap();
        let location = LocationSnapshot::from_url(&url);
        assert_eq!(location.port, "");
        assert_eq!(location.host, "example.com");
        assert_eq!(location.origin, "http://example.com");
        assert_eq!(location.search, "");
    }

    #[test]
    fn test_file_origin_is_synthesized() {
        let url = Url::parse("file:///srv/app/worker.js").unwrap();
        let location = LocationSnapshot::from_url(&url);
        assert_eq!(location.origin, "file://localhost");
        assert_eq!(location.protocol, "file:");
        assert_eq!(location.host, "");
    }

    #[test]
    fn test_dedicated_descriptor() {
        let id = ContextId::from("worker-0-0");
        let url = Url::parse("http://example.com/w.js").unwrap();
        let spec = BootstrapSpec::dedicated(&id, &url);

        assert_eq!(spec.globals.first(), Some(&ShimGlobal::SelfReference));
        assert_eq!(spec.globals.len(), 10);
        assert_eq!(spec.globals.last(), Some(&ShimGlobal::Console));
        assert_eq!(spec.scripts, vec![url]);
        assert_eq!(spec.ready.context, id);
    }
}
