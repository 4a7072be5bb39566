//! RFC 6570 URI template expansion (levels 1 to 3).
//!
//! Registry entries and link relations are frequently templates such as
//! `https://p/apis/svc;version=0/searches/simple?search={search}{&offset,limit}`.
//! Undefined variables expand to nothing, matching the RFC.

use std::collections::BTreeMap;

use crate::error::ApiError;

/// A URI template with bound variables.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    vars: BTreeMap<String, String>,
}

impl UriTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Names of every variable referenced by the template, in order.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else { break };
            let expr = &rest[start + 1..start + len];
            let (_, list) = split_operator(expr);
            names.extend(list.split(',').filter(|n| !n.is_empty()).map(str::to_string));
            rest = &rest[start + len + 1..];
        }
        names
    }

    pub fn expand(&self) -> Result<String, ApiError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let len = rest[start..].find('}').ok_or_else(|| {
                ApiError::Protocol(format!("unterminated expression in URI template `{}`", self.template))
            })?;
            self.expand_expression(&rest[start + 1..start + len], &mut out);
            rest = &rest[start + len + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn expand_expression(&self, expr: &str, out: &mut String) {
        let (op, list) = split_operator(expr);
        let style = Style::for_operator(op);
        let mut first = true;
        for name in list.split(',').filter(|n| !n.is_empty()) {
            let Some(value) = self.vars.get(name) else { continue };
            out.push_str(if first { style.first } else { style.separator });
            first = false;
            let encoded = encode(value, style.allow_reserved);
            if style.named {
                out.push_str(name);
                if value.is_empty() {
                    out.push_str(style.if_empty);
                } else {
                    out.push('=');
                    out.push_str(&encoded);
                }
            } else {
                out.push_str(&encoded);
            }
        }
    }
}

/// Append `name=value` to a URL, picking `?` or `&` as needed.
pub fn with_query_param(url: &str, name: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{url}{separator}{}={}",
        urlencoding::encode(name),
        urlencoding::encode(value)
    )
}

struct Style {
    first: &'static str,
    separator: &'static str,
    named: bool,
    if_empty: &'static str,
    allow_reserved: bool,
}

impl Style {
    fn for_operator(op: Option<char>) -> Self {
        let (first, separator, named, if_empty, allow_reserved) = match op {
            Some('+') => ("", ",", false, "", true),
            Some('#') => ("#", ",", false, "", true),
            Some('.') => (".", ".", false, "", false),
            Some('/') => ("/", "/", false, "", false),
            Some(';') => (";", ";", true, "", false),
            Some('?') => ("?", "&", true, "=", false),
            Some('&') => ("&", "&", true, "=", false),
            _ => ("", ",", false, "", false),
        };
        Self {
            first,
            separator,
            named,
            if_empty,
            allow_reserved,
        }
    }
}

fn split_operator(expr: &str) -> (Option<char>, &str) {
    match expr.chars().next() {
        Some(c @ ('+' | '#' | '.' | '/' | ';' | '?' | '&')) => (Some(c), &expr[1..]),
        _ => (None, expr),
    }
}

fn encode(value: &str, allow_reserved: bool) -> String {
    if !allow_reserved {
        return urlencoding::encode(value).into_owned();
    }
    // Reserved characters pass through; everything else is encoded per char.
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || "-._~:/?#[]@!$&'()*+,;=%".contains(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}
