//! Request Classification
//!
//! Decides which caching strategy applies to an intercepted request. Rules
//! are evaluated in order and the first match wins.

use axum::http::Method;

use crate::fetch::Request;

/// Schemes owned by the browser or its extensions.
const BYPASS_SCHEMES: [&str; 8] = [
    "chrome-extension",
    "moz-extension",
    "safari-web-extension",
    "chrome",
    "about",
    "devtools",
    "data",
    "blob",
];

const IMAGE_EXTENSIONS: [&str; 9] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp"];

const STATIC_EXTENSIONS: [&str; 8] = ["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot"];

const STATIC_DIRECTORIES: [&str; 2] = ["/assets/", "/static/"];

// == Request Class ==
/// Strategy selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Passed straight to the network, never cached
    Bypass,
    /// Network-first into the api partition, JSON 503 when offline
    Api,
    /// Cache-first into the images partition
    Image,
    /// Cache-first into the static partition
    Static,
    /// Network-first into the dynamic partition with SPA shell fallback
    Document,
}

// == Rules ==
/// Tunable parts of the classification.
#[derive(Debug, Clone)]
pub struct ClassifyRules {
    /// Path prefix of API requests
    pub api_prefix: String,
    /// Hosts serving only images
    pub image_hosts: Vec<String>,
}

impl Default for ClassifyRules {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            image_hosts: vec![
                "res.cloudinary.com".to_string(),
                "images.unsplash.com".to_string(),
            ],
        }
    }
}

// == Classify ==
/// Classifies a request.
pub fn classify(request: &Request, rules: &ClassifyRules) -> RequestClass {
    if request.method != Method::GET {
        return RequestClass::Bypass;
    }

    let scheme = request.url.scheme();
    if BYPASS_SCHEMES.contains(&scheme) || !matches!(scheme, "http" | "https") {
        return RequestClass::Bypass;
    }

    let path = request.url.path();
    if path.starts_with(&rules.api_prefix) {
        return RequestClass::Api;
    }

    let extension = extension_of(path);
    let host = request.url.host_str().unwrap_or_default();

    if extension.as_deref().is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
        || rules.image_hosts.iter().any(|h| h == host)
    {
        return RequestClass::Image;
    }

    if extension.as_deref().is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext))
        || STATIC_DIRECTORIES.iter().any(|dir| path.contains(dir))
    {
        return RequestClass::Static;
    }

    RequestClass::Document
}

/// Lower-cased extension of the last path segment.
fn extension_of(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
