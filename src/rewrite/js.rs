//! Script rewriting.
//!
//! Only string literals handed to navigation and module-loading sinks are
//! rewritten. Everything a script computes at runtime is left to the injected
//! runtime hooks.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use super::target::RewriteConvention;

// Static `import`/`export ... from` forms only count at the start of a
// statement, so prose inside string literals ("greetings from 'home'") is left alone.
static JS_SINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?m)(?P<sink>"#,
        r#"\blocation(?:\.href)?\s*=\s*"#,
        r#"|\blocation\.(?:assign|replace)\(\s*"#,
        r#"|\bwindow\.open\(\s*"#,
        r#"|\bimport\(\s*"#,
        r#"|\bimportScripts\(\s*"#,
        r#"|(?:^|[;{}])[ \t]*import\s*"#,
        r#"|(?:^|[;{}])[ \t]*(?:import|export)\b[^;"'`]*?\bfrom\s*"#,
        r#")"#,
        r#"(?:"(?P<dq>[^"\\\n]*)"|'(?P<sq>[^'\\\n]*)')"#,
    ))
    .expect("script sink pattern is valid")
});

/// Rewrite URL literals passed to navigation or import sinks in `script`.
pub fn rewrite_js(script: &str, base: &Url, convention: &RewriteConvention) -> String {
    JS_SINK
        .replace_all(script, |caps: &Captures| {
            let sink = &caps["sink"];
            let (literal, quote) = match (caps.name("dq"), caps.name("sq")) {
                (Some(m), _) => (m.as_str(), '"'),
                (_, Some(m)) => (m.as_str(), '\''),
                _ => return caps[0].to_string(),
            };
            match convention.rewrite_reference(literal, base) {
                Some(rewritten) => format!("{sink}{quote}{rewritten}{quote}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
