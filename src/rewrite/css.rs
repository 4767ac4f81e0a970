//! Stylesheet rewriting: `url(...)` references and `@import` strings.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use super::target::RewriteConvention;

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#)
        .expect("css url pattern is valid")
});

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("css import pattern is valid")
});

fn first_group<'a>(caps: &'a Captures<'_>) -> &'a str {
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// Rewrite every URL reference in `css`, resolved against `base`.
pub fn rewrite_css(css: &str, base: &Url, convention: &RewriteConvention) -> String {
    let with_urls = CSS_URL.replace_all(css, |caps: &Captures| {
        match convention.rewrite_reference(first_group(caps), base) {
            Some(rewritten) => format!("url(\"{}\")", rewritten),
            None => caps[0].to_string(),
        }
    });

    CSS_IMPORT
        .replace_all(&with_urls, |caps: &Captures| {
            match convention.rewrite_reference(first_group(caps), base) {
                Some(rewritten) => format!("@import \"{}\"", rewritten),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(css: &str) -> String {
        let base = Url::parse("https://example.com/css/site.css").unwrap();
        rewrite_css(css, &base, &RewriteConvention::new("url", "/bare/"))
    }

    #[test]
    fn url_functions_in_every_quoting_style() {
        let out = rewrite(
            r#"a { background: url(bg.png) } b { background: url('/img/b.png') } c { background: URL( "https://cdn.example.net/c.png" ) }"#,
        );
        assert!(out.contains(r#"url("/?url=https%3A%2F%2Fexample.com%2Fcss%2Fbg.png")"#), "{}", out);
        assert!(out.contains(r#"url("/?url=https%3A%2F%2Fexample.com%2Fimg%2Fb.png")"#), "{}", out);
        assert!(out.contains(r#"url("/?url=https%3A%2F%2Fcdn.example.net%2Fc.png")"#), "{}", out);
    }

    #[test]
    fn imports_are_rewritten() {
        let out = rewrite(r#"@import "theme.css"; @import url(print.css) print;"#);
        assert!(out.contains(r#"@import "/?url=https%3A%2F%2Fexample.com%2Fcss%2Ftheme.css""#), "{}", out);
        assert!(out.contains(r#"@import url("/?url=https%3A%2F%2Fexample.com%2Fcss%2Fprint.css") print"#), "{}", out);
    }

    #[test]
    fn data_uris_and_plain_rules_survive() {
        let css = r#"i { background: url(data:image/png;base64,AAAA) } p { color: red }"#;
        assert_eq!(rewrite(css), css);
    }
}
