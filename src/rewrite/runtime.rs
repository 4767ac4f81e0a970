//! Client-side runtime injected into rewritten documents.
//!
//! The script hooks the browser APIs a page uses to issue requests at runtime
//! (fetch, XHR, WebSocket, sendBeacon, window.open, history) so that requests
//! computed by scripts also go through the relay.

use serde::Serialize;
use url::Url;

use super::target::RewriteConvention;

const RUNTIME_SOURCE: &str = include_str!("runtime.js");
const CONFIG_SLOT: &str = "__RELAY_CONFIG__";

#[derive(Serialize)]
struct RuntimeConfig<'a> {
    param: &'a str,
    tunnel: &'a str,
    base: &'a str,
}

/// `<script>` element carrying the runtime, configured for a document at `base`.
pub fn bootstrap(convention: &RewriteConvention, base: &Url) -> String {
    let config = RuntimeConfig {
        param: convention.param(),
        tunnel: convention.tunnel_prefix(),
        base: base.as_str(),
    };
    // Serializing three strings cannot fail.
    let json = serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());
    // Keep the payload from closing the script element early.
    let json = json.replace("</", "<\\/");
    format!(
        "<script data-relay-runtime>{}</script>",
        RUNTIME_SOURCE.replace(CONFIG_SLOT, &json)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_embeds_configuration() {
        let base = Url::parse("https://example.com/a/b.html").unwrap();
        let script = bootstrap(&RewriteConvention::new("url", "/bare/"), &base);
        assert!(script.starts_with("<script data-relay-runtime>"));
        assert!(script.ends_with("</script>"));
        assert!(script.contains(r#""param":"url""#));
        assert!(script.contains(r#""tunnel":"/bare/""#));
        assert!(script.contains(r#""base":"https://example.com/a/b.html""#));
        assert!(!script.contains(CONFIG_SLOT));
    }

    #[test]
    fn payload_cannot_close_the_element() {
        let convention = RewriteConvention::new("u</script>", "/bare/");
        let base = Url::parse("https://example.com/").unwrap();
        let script = bootstrap(&convention, &base);
        assert_eq!(script.matches("</script>").count(), 1);
    }
}
