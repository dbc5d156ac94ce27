//! Html post-processing applied to rendered drip bodies.
//!
//! `CssInliner` moves rules from `<style>` blocks onto the `style` attribute
//! of matching elements, which most mail clients require. Simple selectors
//! (`p`, `.note`, `#footer`, `td.cell`, comma groups) are inlined; anything
//! else, including at-rules, stays behind in a single `<style>` block.

use std::sync::OnceLock;

use drip_core::DripResult;
use regex::{Captures, Regex};

pub trait HtmlTransform: Send + Sync {
    fn transform(&self, html: &str) -> DripResult<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl SimpleSelector {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty()
            || raw
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '#')))
        {
            return None;
        }
        let mut selector = SimpleSelector {
            tag: None,
            id: None,
            classes: Vec::new(),
        };
        let mut rest = raw;
        let tag_len = rest.find(['.', '#']).unwrap_or(rest.len());
        if tag_len > 0 {
            selector.tag = Some(rest[..tag_len].to_ascii_lowercase());
        }
        rest = &rest[tag_len..];
        while !rest.is_empty() {
            let marker = rest.chars().next()?;
            let body = &rest[1..];
            let len = body.find(['.', '#']).unwrap_or(body.len());
            if len == 0 {
                return None;
            }
            let name = body[..len].to_string();
            match marker {
                '.' => selector.classes.push(name),
                _ if selector.id.is_none() => selector.id = Some(name),
                _ => return None,
            }
            rest = &body[len..];
        }
        Some(selector)
    }

    fn specificity(&self) -> (usize, usize, usize) {
        (
            usize::from(self.id.is_some()),
            self.classes.len(),
            usize::from(self.tag.is_some()),
        )
    }

    fn matches(&self, tag: &str, id: Option<&str>, classes: &[&str]) -> bool {
        self.tag.as_deref().map_or(true, |t| t == tag)
            && self.id.as_deref().map_or(true, |i| Some(i) == id)
            && self.classes.iter().all(|c| classes.contains(&c.as_str()))
    }
}

#[derive(Debug, Clone)]
struct InlineRule {
    selector: SimpleSelector,
    declarations: String,
    order: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CssInliner;

impl CssInliner {
    pub fn new() -> Self {
        Self
    }
}

fn style_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style[^>]*>(.*?)</style>").expect("static regex"))
}

fn comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("static regex"))
}

fn open_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9]*)((?:\s[^<>]*?)?)(/?)>").expect("static regex"))
}

fn attribute(name: &str) -> Regex {
    Regex::new(&format!(r#"(?i)\s{}\s*=\s*"([^"]*)""#, regex::escape(name))).expect("attribute regex")
}

/// Split a stylesheet into inlineable rules and leftover css.
fn parse_stylesheet(css: &str) -> (Vec<InlineRule>, String) {
    let css = comment().replace_all(css, "");
    let mut rules = Vec::new();
    let mut leftover = String::new();
    let mut rest: &str = &css;

    while let Some(open) = rest.find('{') {
        let selector_text = rest[..open].trim();
        let body_start = open + 1;
        let mut depth = 1;
        let mut close = None;
        for (i, c) in rest[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            leftover.push_str(rest);
            rest = "";
            break;
        };
        let body = rest[body_start..close].trim();
        let selectors: Option<Vec<SimpleSelector>> = if selector_text.starts_with('@') {
            None
        } else {
            selector_text.split(',').map(SimpleSelector::parse).collect()
        };
        match selectors {
            Some(selectors) => {
                for selector in selectors {
                    rules.push(InlineRule {
                        selector,
                        declarations: body.trim_end_matches(';').trim().to_string(),
                        order: rules.len(),
                    });
                }
            }
            None => {
                leftover.push_str(&rest[..=close]);
                leftover.push('\n');
            }
        }
        rest = &rest[close + 1..];
    }
    if !rest.trim().is_empty() {
        leftover.push_str(rest);
    }
    (rules, leftover.trim().to_string())
}

impl HtmlTransform for CssInliner {
    fn transform(&self, html: &str) -> DripResult<String> {
        let mut css = String::new();
        for caps in style_block().captures_iter(html) {
            css.push_str(&caps[1]);
            css.push('\n');
        }
        if css.trim().is_empty() {
            return Ok(html.to_string());
        }

        let (mut rules, leftover) = parse_stylesheet(&css);
        rules.sort_by_key(|r| (r.selector.specificity(), r.order));

        let mut first_block = true;
        let without_styles = style_block().replace_all(html, |_: &Captures| {
            if first_block && !leftover.is_empty() {
                first_block = false;
                format!("<style type=\"text/css\">\n{leftover}\n</style>")
            } else {
                String::new()
            }
        });

        let class_attr = attribute("class");
        let id_attr = attribute("id");
        let style_attr = attribute("style");

        let inlined = open_tag().replace_all(&without_styles, |caps: &Captures| {
            let tag = caps[1].to_ascii_lowercase();
            let attrs = &caps[2];
            if tag == "style" {
                return caps[0].to_string();
            }
            let classes_raw = class_attr
                .captures(attrs)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            let classes: Vec<&str> = classes_raw.split_whitespace().collect();
            let id = id_attr.captures(attrs).map(|c| c[1].to_string());

            let mut declarations: Vec<&str> = rules
                .iter()
                .filter(|r| r.selector.matches(&tag, id.as_deref(), &classes))
                .map(|r| r.declarations.as_str())
                .filter(|d| !d.is_empty())
                .collect();
            if declarations.is_empty() {
                return caps[0].to_string();
            }

            let existing = style_attr.captures(attrs).map(|c| c[1].to_string());
            if let Some(existing) = existing.as_deref() {
                declarations.push(existing.trim().trim_end_matches(';'));
            }
            let style = declarations.join("; ");
            let attrs = style_attr.replace(attrs, "");
            format!("<{}{} style=\"{}\"{}>", &caps[1], attrs, style, &caps[3])
        });

        Ok(inlined.into_owned())
    }
}
