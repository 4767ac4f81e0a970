//! Streaming HTML rewriting on top of `lol_html`.
//!
//! # Responsibilities
//! - Resource-bearing attributes (`href`, `src`, `action`, `srcset`, ...)
//! - Inline `style` attributes and `<style>` bodies through the CSS rewriter
//! - Inline event handlers and classic `<script>` bodies through the script rewriter
//! - `<meta http-equiv=refresh>` targets; CSP meta tags are removed
//! - `integrity`/`nonce` attributes are dropped (rewritten bodies no longer match)
//! - GET forms submit to the relay with the target carried in a hidden field
//! - `<base href>` updates the resolution base and is then removed
//! - The runtime script is injected at the start of `<head>` (or `<body>`)

use std::cell::{Cell, RefCell};
use std::error::Error;

use lol_html::html_content::{ContentType, Element, TextChunk};
use lol_html::{element, rewrite_str, text, RewriteStrSettings};
use url::Url;

use super::css::rewrite_css;
use super::js::rewrite_js;
use super::target::RewriteConvention;
use crate::error::{ProxyError, Result};
use crate::http::response::escape_html;

type HandlerResult<T = ()> = std::result::Result<T, Box<dyn Error + Send + Sync>>;

const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "action",
    "formaction",
    "poster",
    "data",
    "background",
    "cite",
    "longdesc",
];

const STRIPPED_ATTRIBUTES: &[&str] = &["integrity", "nonce"];

struct Context<'a> {
    base: RefCell<Url>,
    convention: &'a RewriteConvention,
    runtime: Option<&'a str>,
    injected: Cell<bool>,
    executable_script: Cell<bool>,
}

/// Rewrite a complete HTML document fetched from `base`.
///
/// `runtime` is the markup to inject once at the top of the document, if any.
pub fn rewrite_html(
    html: &str,
    base: &Url,
    convention: &RewriteConvention,
    runtime: Option<&str>,
) -> Result<String> {
    let ctx = Context {
        base: RefCell::new(base.clone()),
        convention,
        runtime,
        injected: Cell::new(runtime.is_none()),
        executable_script: Cell::new(true),
    };
    let mut style_text = String::new();
    let mut script_text = String::new();

    let settings = RewriteStrSettings {
        element_content_handlers: vec![
            element!("*", |el| rewrite_element(el, &ctx)),
            text!("style", |chunk| {
                buffered(chunk, &mut style_text, |css| {
                    rewrite_css(css, &ctx.base.borrow(), ctx.convention)
                })
            }),
            text!("script", |chunk| {
                if !ctx.executable_script.get() {
                    return Ok(());
                }
                buffered(chunk, &mut script_text, |js| {
                    rewrite_js(js, &ctx.base.borrow(), ctx.convention)
                })
            }),
        ],
        ..RewriteStrSettings::new()
    };

    let mut out = rewrite_str(html, settings)
        .map_err(|e| ProxyError::internal(format!("html rewrite: {}", e)))?;

    // Fragments without head or body still get the runtime.
    if !ctx.injected.get() {
        if let Some(runtime) = runtime {
            out.insert_str(0, runtime);
        }
    }
    Ok(out)
}

/// Collect a text node across chunks and emit its rewritten form at the end.
fn buffered(
    chunk: &mut TextChunk<'_>,
    buffer: &mut String,
    rewrite: impl FnOnce(&str) -> String,
) -> HandlerResult {
    buffer.push_str(chunk.as_str());
    if chunk.last_in_text_node() {
        let rewritten = rewrite(buffer);
        chunk.replace(&rewritten, ContentType::Html);
        buffer.clear();
    } else {
        chunk.remove();
    }
    Ok(())
}

fn rewrite_element(el: &mut Element<'_, '_>, ctx: &Context<'_>) -> HandlerResult {
    let tag = el.tag_name();

    match tag.as_str() {
        "base" => {
            if let Some(href) = el.get_attribute("href") {
                let joined = ctx.base.borrow().join(&decode_entities(&href));
                if let Ok(next) = joined {
                    *ctx.base.borrow_mut() = next;
                }
            }
            el.remove();
            return Ok(());
        }
        "meta" => {
            let equiv = el
                .get_attribute("http-equiv")
                .unwrap_or_default()
                .to_ascii_lowercase();
            if equiv == "content-security-policy" || equiv == "content-security-policy-report-only" {
                el.remove();
                return Ok(());
            }
            if equiv == "refresh" {
                if let Some(content) = el.get_attribute("content") {
                    if let Some(rewritten) = rewrite_refresh(&content, ctx) {
                        el.set_attribute("content", &encode_attribute(&rewritten))?;
                    }
                }
            }
        }
        "script" => {
            let kind = el.get_attribute("type").unwrap_or_default();
            ctx.executable_script.set(is_executable_script(&kind));
        }
        "head" | "body" => {
            if !ctx.injected.get() {
                if let Some(runtime) = ctx.runtime {
                    el.prepend(runtime, ContentType::Html);
                }
                ctx.injected.set(true);
            }
        }
        _ => {}
    }

    let get_form = tag == "form" && rewrite_get_form(el, ctx)?;

    for attr in URL_ATTRIBUTES {
        if get_form && *attr == "action" {
            continue;
        }
        if let Some(value) = el.get_attribute(attr) {
            let resolved = ctx
                .convention
                .rewrite_reference(&decode_entities(&value), &ctx.base.borrow());
            if let Some(rewritten) = resolved {
                el.set_attribute(attr, &encode_attribute(&rewritten))?;
            }
        }
    }

    for attr in ["srcset", "imagesrcset"] {
        if let Some(value) = el.get_attribute(attr) {
            let value = decode_entities(&value);
            let rewritten = rewrite_srcset(&value, ctx);
            if rewritten != value {
                el.set_attribute(attr, &encode_attribute(&rewritten))?;
            }
        }
    }

    if let Some(style) = el.get_attribute("style") {
        let style = decode_entities(&style);
        let rewritten = rewrite_css(&style, &ctx.base.borrow(), ctx.convention);
        if rewritten != style {
            el.set_attribute("style", &encode_attribute(&rewritten))?;
        }
    }

    let handlers: Vec<String> = el
        .attributes()
        .iter()
        .map(|a| a.name())
        .filter(|name| name.starts_with("on"))
        .collect();
    for name in handlers {
        if let Some(code) = el.get_attribute(&name) {
            let code = decode_entities(&code);
            let rewritten = rewrite_js(&code, &ctx.base.borrow(), ctx.convention);
            if rewritten != code {
                el.set_attribute(&name, &encode_attribute(&rewritten))?;
            }
        }
    }

    for attr in STRIPPED_ATTRIBUTES {
        el.remove_attribute(attr);
    }
    Ok(())
}

/// Point a GET form at the relay root and carry its target in a hidden field.
///
/// Returns `true` when the form was handled here.
fn rewrite_get_form(el: &mut Element<'_, '_>, ctx: &Context<'_>) -> HandlerResult<bool> {
    let method = el.get_attribute("method").unwrap_or_default().to_ascii_lowercase();
    if !(method.is_empty() || method == "get") {
        return Ok(false);
    }

    let action = decode_entities(&el.get_attribute("action").unwrap_or_default());
    let action = action.trim();
    let lower = action.to_ascii_lowercase();
    if lower.starts_with("javascript:") {
        return Ok(false);
    }
    let target = if action.is_empty() {
        ctx.base.borrow().clone()
    } else {
        match ctx.base.borrow().join(action) {
            Ok(url) => url,
            Err(_) => return Ok(false),
        }
    };
    if !matches!(target.scheme(), "http" | "https") {
        return Ok(false);
    }

    el.set_attribute("action", "/")?;
    el.prepend(
        &format!(
            r#"<input type="hidden" name="{}" value="{}">"#,
            escape_html(ctx.convention.param()),
            escape_html(target.as_str())
        ),
        ContentType::Html,
    );
    Ok(true)
}

fn rewrite_srcset(value: &str, ctx: &Context<'_>) -> String {
    value
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            let (url, descriptor) = match candidate.split_once(char::is_whitespace) {
                Some((url, descriptor)) => (url, Some(descriptor.trim())),
                None => (candidate, None),
            };
            let url = ctx
                .convention
                .rewrite_reference(url, &ctx.base.borrow())
                .unwrap_or_else(|| url.to_string());
            match descriptor {
                Some(d) if !d.is_empty() => format!("{} {}", url, d),
                _ => url,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `5; url=/next` → `5; url=/?url=...`
fn rewrite_refresh(content: &str, ctx: &Context<'_>) -> Option<String> {
    let content = decode_entities(content);
    let lower = content.to_ascii_lowercase();
    let at = lower.find("url")?;
    let rest = content[at + 3..].trim_start();
    let rest = rest.strip_prefix('=')?.trim();
    let target = rest.trim_matches(|c| c == '\'' || c == '"');
    let rewritten = ctx.convention.rewrite_reference(target, &ctx.base.borrow())?;
    Some(format!("{}url={}", &content[..at], rewritten))
}

fn is_executable_script(kind: &str) -> bool {
    let kind = kind.trim().to_ascii_lowercase();
    kind.is_empty()
        || kind == "module"
        || kind.contains("javascript")
        || kind.contains("ecmascript")
}

/// Named references worth decoding in attribute values. Anything else is
/// kept verbatim.
const NAMED_REFERENCES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
    ("sol", '/'),
    ("colon", ':'),
    ("quest", '?'),
    ("equals", '='),
    ("num", '#'),
    ("percnt", '%'),
    ("period", '.'),
    ("comma", ','),
    ("lpar", '('),
    ("rpar", ')'),
    ("Tab", '\t'),
    ("NewLine", '\n'),
];

/// Decode character references in a raw attribute value, in a single pass.
///
/// Numeric references (`&#38;`, `&#x3D;`) are decoded whether or not they carry
/// the closing `;`; invalid code points become U+FFFD.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match decode_reference(&rest[1..]) {
            Some((c, used)) => {
                out.push(c);
                rest = &rest[1 + used..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode the reference at the start of `text` (just after the `&`).
/// Returns the character and the number of bytes consumed.
fn decode_reference(text: &str) -> Option<(char, usize)> {
    if let Some(numeric) = text.strip_prefix('#') {
        let (digits, radix, skip) = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => (hex, 16, 2),
            None => (numeric, 10, 1),
        };
        let len = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        if len == 0 {
            return None;
        }
        let code = u32::from_str_radix(&digits[..len], radix).unwrap_or(u32::MAX);
        let c = match code {
            0 => '\u{fffd}',
            code => char::from_u32(code).unwrap_or('\u{fffd}'),
        };
        let terminated = digits[len..].starts_with(';');
        return Some((c, skip + len + usize::from(terminated)));
    }

    let (name, _) = text.split_once(';')?;
    NAMED_REFERENCES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, c)| (*c, name.len() + 1))
}

/// Escape a value for `set_attribute`, which only escapes `"` itself.
fn encode_attribute(value: &str) -> String {
    value.replace('&', "&amp;")
}
