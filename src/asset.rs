//! Injected asset-fetch collaborator

use crate::runtime::{AsyncSystem, Future};

/// A completed fetch: status, response headers, body, and the final URL
/// after redirects.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub url: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues URL fetches on behalf of the runtime.
///
/// Implementations own the transport entirely; the runtime only ever sees
/// the resolved [`Response`]. The returned future may resolve on any lane.
pub trait AssetAccessor: Send + Sync {
    fn get(
        &self,
        system: &AsyncSystem,
        url: &str,
        headers: &[(String, String)],
    ) -> Future<Response>;
}

/// Resolve `relative` against `base`, keeping absolute URLs untouched.
pub fn resolve_url(base: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") || base.is_empty() {
        return relative.to_string();
    }

    // Strip the query from the base before joining path segments.
    let base_path = base.split('?').next().unwrap_or(base);
    if relative.starts_with('/') {
        // Scheme + authority only.
        if let Some(scheme_end) = base_path.find("://") {
            let authority_end = base_path[scheme_end + 3..]
                .find('/')
                .map(|i| scheme_end + 3 + i)
                .unwrap_or(base_path.len());
            return format!("{}{}", &base_path[..authority_end], relative);
        }
        return relative.to_string();
    }

    let dir = match base_path.rfind('/') {
        Some(i) if i > base_path.find("://").map(|s| s + 2).unwrap_or(0) => &base_path[..=i],
        _ => {
            // Base has no path component; treat it as a directory.
            return format!("{}/{}", base_path.trim_end_matches('/'), relative);
        }
    };
    format!("{}{}", dir, relative)
}
