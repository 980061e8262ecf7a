//! Config Rendering
//!
//! Renders the user-data and docker-compose templates with mustache
//! semantics over a single `env` object:
//!
//! - `{{env.KEY}}`, `{{ env.KEY }}`, `{{{env.KEY}}}` and `{{& env.KEY}}` insert
//!   the raw value. Nothing is escaped, since the output is YAML consumed by
//!   cloud-init and docker-compose.
//! - `{{#env.KEY}}…{{/env.KEY}}` keeps its body when the value is non-empty
//!   (`{{.}}` inside is the value); `{{^env.KEY}}…{{/env.KEY}}` is the inverse.
//! - Unknown names, including anything outside `env`, render empty. Comments
//!   (`{{! … }}`) and partials (`{{> … }}`) render nothing.
//!
//! Block tags alone on their line remove the whole line.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"\{\{\{\s*([^{}]*?)\s*\}\}\}|\{\{\s*([#^/!&>]?)\s*([^{}]*?)\s*\}\}")
            .expect("tag pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Value(&'a str),
    Section { name: &'a str, inverted: bool },
    Close(&'a str),
}

fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    for caps in tag_pattern().captures_iter(template) {
        let Some(tag) = caps.get(0) else { continue };
        let (sigil, name) = match caps.get(1) {
            Some(name) => ("&", name.as_str()),
            None => (
                caps.get(2).map_or("", |m| m.as_str()),
                caps.get(3).map_or("", |m| m.as_str()),
            ),
        };

        let token = match sigil {
            "#" => Some(Token::Section { name, inverted: false }),
            "^" => Some(Token::Section { name, inverted: true }),
            "/" => Some(Token::Close(name)),
            "!" | ">" => None,
            _ => Some(Token::Value(name)),
        };
        let (start, end) = match token {
            Some(Token::Value(_)) => (tag.start(), tag.end()),
            _ => standalone_span(template, cursor, tag.start(), tag.end()),
        };

        if start > cursor {
            tokens.push(Token::Text(&template[cursor..start]));
        }
        tokens.extend(token);
        cursor = end;
    }

    if cursor < template.len() {
        tokens.push(Token::Text(&template[cursor..]));
    }
    tokens
}

/// Span of a block tag, widened to its whole line when nothing else is on it
fn standalone_span(template: &str, cursor: usize, start: usize, end: usize) -> (usize, usize) {
    let line_start = template[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = template[end..].find('\n').map_or(template.len(), |i| end + i + 1);
    let blank = |s: &str| s.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));

    if line_start >= cursor && blank(&template[line_start..start]) && blank(&template[end..line_end]) {
        (line_start, line_end)
    } else {
        (start, end)
    }
}

fn lookup<'a>(name: &str, env: &'a BTreeMap<String, String>, current: Option<&'a str>) -> Option<&'a str> {
    match name {
        "." => current,
        _ => name
            .strip_prefix("env.")
            .and_then(|key| env.get(key))
            .map(String::as_str),
    }
}

fn matching_close(tokens: &[Token<'_>], open: usize, name: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open + 1) {
        match *token {
            Token::Section { name: inner, .. } if inner == name => depth += 1,
            Token::Close(inner) if inner == name => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn render_tokens<'a>(
    tokens: &[Token<'_>],
    env: &'a BTreeMap<String, String>,
    current: Option<&'a str>,
    out: &mut String,
) -> std::result::Result<(), String> {
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            Token::Text(text) => out.push_str(text),
            Token::Value(name) => out.push_str(lookup(name, env, current).unwrap_or_default()),
            Token::Section { name, inverted } => {
                let close =
                    matching_close(tokens, i, name).ok_or_else(|| format!("unclosed section '{name}'"))?;
                let body = &tokens[i + 1..close];
                match (lookup(name, env, current).filter(|v| !v.is_empty()), inverted) {
                    (Some(value), false) => render_tokens(body, env, Some(value), out)?,
                    (None, true) => render_tokens(body, env, current, out)?,
                    _ => {}
                }
                i = close;
            }
            Token::Close(name) => return Err(format!("unopened section '{name}'")),
        }
        i += 1;
    }
    Ok(())
}

fn render_template(template: &str, env: &BTreeMap<String, String>) -> std::result::Result<String, String> {
    let tokens = tokenize(template);
    let mut out = String::with_capacity(template.len());
    render_tokens(&tokens, env, None, &mut out)?;
    Ok(out)
}

/// Render `template` against `env`. Fails only on unbalanced sections.
pub fn render_str(template: &str, env: &BTreeMap<String, String>) -> Result<String> {
    render_template(template, env).map_err(Error::Template)
}

/// Template renderer bound to a workspace directory and an environment snapshot
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    workspace: PathBuf,
    env: BTreeMap<String, String>,
}

impl Renderer {
    pub fn new(workspace: impl Into<PathBuf>, env: BTreeMap<String, String>) -> Self {
        Self {
            workspace: workspace.into(),
            env,
        }
    }

    /// Resolve a template path inside the workspace. Absolute paths are
    /// re-rooted there; with no workspace the path is used as given.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if self.workspace.as_os_str().is_empty() {
            return path.to_path_buf();
        }
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.workspace.join(relative)
    }

    /// Read and render a template file. The file is read on every call.
    pub fn render_file(&self, path: &Path) -> Result<String> {
        let full = self.resolve(path);
        let content = std::fs::read_to_string(&full).map_err(|source| Error::Io {
            path: full.clone(),
            source,
        })?;
        tracing::debug!("Rendering template {}", full.display());
        render_template(&content, &self.env)
            .map_err(|reason| Error::Template(format!("{reason} in {}", full.display())))
    }
}
