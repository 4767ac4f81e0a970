//! The rewrite query convention.
//!
//! A destination `u` is addressed through the relay as `/?url=<percent-encoded u>`.
//! This module turns references found in documents into that form, and turns
//! inbound requests back into destinations.

use url::Url;

use crate::error::{ProxyError, Result};

/// Schemes that never leave the page and are left untouched.
const INERT_SCHEMES: &[&str] = &["data:", "javascript:", "mailto:", "tel:", "blob:", "about:"];

/// Where an inbound rewrite request points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Fetch this destination.
    Fetch(Url),
    /// The address was a search phrase; send the client to this destination.
    Search(Url),
}

/// Encodes and decodes the relay's addressing scheme.
#[derive(Debug, Clone)]
pub struct RewriteConvention {
    param: String,
    tunnel_prefix: String,
    /// `/?{param}=`
    marker: String,
}

impl RewriteConvention {
    pub fn new(param: impl Into<String>, tunnel_prefix: impl Into<String>) -> Self {
        let param = param.into();
        let marker = format!("/?{}=", param);
        Self {
            param,
            tunnel_prefix: tunnel_prefix.into(),
            marker,
        }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn tunnel_prefix(&self) -> &str {
        &self.tunnel_prefix
    }

    /// Relay address of `target`. A fragment stays outside the encoded value so
    /// in-page anchors keep working.
    pub fn proxied(&self, target: &Url) -> String {
        let mut target = target.clone();
        let fragment = target.fragment().map(str::to_owned);
        target.set_fragment(None);

        let mut out = format!("{}{}", self.marker, urlencoding::encode(target.as_str()));
        if let Some(fragment) = fragment {
            out.push('#');
            out.push_str(&fragment);
        }
        out
    }

    /// Tunnel address of `target`, used for websocket endpoints.
    pub fn tunneled(&self, target: &Url) -> String {
        format!("{}{}", self.tunnel_prefix, urlencoding::encode(target.as_str()))
    }

    /// Rewrite a reference found in a document whose URL is `base`.
    ///
    /// Returns `None` when the reference must be left alone: empty, fragment-only,
    /// inert schemes, or unresolvable. References come from the destination's own
    /// documents, so a path that merely resembles a relay address is still the
    /// destination's path and is rewritten like any other.
    pub fn rewrite_reference(&self, reference: &str, base: &Url) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() || reference.starts_with('#') {
            return None;
        }
        let lower = reference.to_ascii_lowercase();
        if INERT_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            return None;
        }

        let resolved = base.join(reference).ok()?;
        match resolved.scheme() {
            "http" | "https" => Some(self.proxied(&resolved)),
            "ws" | "wss" => Some(self.tunneled(&resolved)),
            _ => None,
        }
    }

    /// Destination addressed by an inbound `/?...` query.
    ///
    /// `Ok(None)` when the query does not carry the parameter at all. Extra pairs
    /// (GET form fields submitted alongside the hidden target) are appended to the
    /// destination's query.
    pub fn target_from_query(&self, query: Option<&str>, search_template: &str) -> Result<Option<Target>> {
        let Some(query) = query else {
            return Ok(None);
        };

        let mut value = None;
        let mut extra = Vec::new();
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            if k == self.param && value.is_none() {
                value = Some(v.into_owned());
            } else {
                extra.push((k.into_owned(), v.into_owned()));
            }
        }
        let Some(value) = value else {
            return Ok(None);
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(ProxyError::client(format!("empty '{}' parameter", self.param)));
        }

        let lower = value.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            let search = search_template.replace("%s", &urlencoding::encode(value));
            let url = Url::parse(&search)
                .map_err(|e| ProxyError::internal(format!("search template: {}", e)))?;
            return Ok(Some(Target::Search(url)));
        }

        let mut url = Url::parse(value)
            .map_err(|e| ProxyError::client(format!("invalid destination '{}': {}", value, e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProxyError::client("destination has no host"));
        }
        if !extra.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &extra {
                pairs.append_pair(k, v);
            }
        }
        Ok(Some(Target::Fetch(url)))
    }

    /// Destination of a relay address such as a `Referer` value, if it is one.
    pub fn target_of_address(&self, address: &str) -> Option<Url> {
        let parsed = Url::parse(address).ok()?;
        if parsed.path() != "/" {
            return None;
        }
        let value = parsed
            .query_pairs()
            .find(|(k, _)| k == self.param.as_str())
            .map(|(_, v)| v.into_owned())?;
        let target = Url::parse(&value).ok()?;
        matches!(target.scheme(), "http" | "https").then_some(target)
    }

    /// Resolve a stray relative request (`/path?query` on the relay) against the
    /// page that issued it, identified by its `Referer`.
    pub fn resolve_stray(&self, referer: &str, path_and_query: &str) -> Option<Url> {
        let page = self.target_of_address(referer)?;
        page.join(path_and_query).ok()
    }
}
