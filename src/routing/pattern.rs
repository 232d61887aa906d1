//! Path pattern compilation, single-pattern matching and path generation.
//!
//! # Responsibilities
//! - Compile a pattern (`/users/:id`, `:lang?/about`, `files/*`) into a regex
//!   plus ordered parameter names
//! - Match one pathname against one pattern (`match_path`)
//! - Generate a pathname from a pattern and params (`generate_path`)
//! - Percent-decode pathnames segment by segment
//!
//! # Design Decisions
//! - Matching is case-insensitive unless the pattern opts in
//! - Matching runs on a canonical form where every segment is decoded except
//!   `%` and `/`, which stay escaped; param values are decoded after capture
//! - An undecodable segment keeps its raw text and logs a warning
//! - Non-terminal patterns capture the `/` or end-of-input that follows the
//!   match in its own group, since the regex engine has no lookahead

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Regex, RegexBuilder};

use crate::error::{RouterError, RouterResult};
use crate::routing::params::Params;

/// A pattern plus its matching options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pub path: String,
    pub case_sensitive: bool,
    /// Require the pattern to consume the whole pathname.
    pub end: bool,
}

impl PathPattern {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            case_sensitive: false,
            end: true,
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn end(mut self, yes: bool) -> Self {
        self.end = yes;
        self
    }
}

impl From<&str> for PathPattern {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for PathPattern {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

/// Result of matching a single pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub params: Params,
    /// The portion of the pathname the pattern matched.
    pub pathname: String,
    /// The matched portion before any splat tail, without trailing slashes.
    pub pathname_base: String,
    pub pattern: PathPattern,
}

#[derive(Debug, Clone)]
struct CompiledParam {
    name: String,
    optional: bool,
}

/// A compiled pattern, reusable across pathnames.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: PathPattern,
    regex: Regex,
    params: Vec<CompiledParam>,
    /// Capture group holding the separator that follows a non-terminal match.
    boundary_group: Option<usize>,
}

impl CompiledPattern {
    /// Compile `pattern` into a matcher.
    pub fn compile(pattern: &PathPattern) -> RouterResult<Self> {
        let path = normalize_splat(&pattern.path);
        let mut params = Vec::new();

        let mut body = path.as_str();
        if let Some(stripped) = body.strip_suffix('*') {
            body = stripped;
        }
        let body = body.trim_end_matches('/').trim_start_matches('/');

        let mut source = String::from("^");
        if body.is_empty() {
            source.push('/');
        } else {
            for segment in body.split('/') {
                push_segment(&mut source, segment, &mut params);
            }
        }

        let mut boundary_group = None;
        if path.ends_with('*') {
            params.push(CompiledParam {
                name: "*".to_string(),
                optional: false,
            });
            if path == "*" || path == "/*" {
                source.push_str("(.*)$");
            } else {
                source.push_str("(?:/(.+)|/*)$");
            }
        } else if pattern.end {
            source.push_str("/*$");
        } else if !path.is_empty() && path != "/" {
            source.push_str("(/|$)");
            boundary_group = Some(params.len() + 1);
        }

        let regex = RegexBuilder::new(&source)
            .case_insensitive(!pattern.case_sensitive)
            .build()
            .map_err(|e| RouterError::InvalidPattern {
                pattern: pattern.path.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            pattern: pattern.clone(),
            regex,
            params,
            boundary_group,
        })
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Names of the parameters this pattern extracts, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    /// Match an already-decoded pathname.
    pub fn match_decoded(&self, pathname: &str) -> Option<PathMatch> {
        let caps = self.regex.captures(pathname)?;
        let whole = caps.get(0)?;
        let matched = match self.boundary_group.and_then(|i| caps.get(i)) {
            Some(boundary) => &pathname[whole.start()..boundary.start()],
            None => whole.as_str(),
        };

        let mut pathname_base = trim_trailing_slashes(matched).to_string();
        let mut params = Params::new();
        for (index, param) in self.params.iter().enumerate() {
            let value = caps.get(index + 1).map(|m| m.as_str());
            if param.name == "*" {
                let splat = value.unwrap_or("");
                let base = &matched[..matched.len() - splat.len()];
                pathname_base = trim_trailing_slashes(base).to_string();
            }
            match value {
                Some(v) if !v.is_empty() || !param.optional => {
                    params.insert(param.name.clone(), decode_canonical(v));
                }
                None if !param.optional => params.insert(param.name.clone(), ""),
                _ => {}
            }
        }

        Some(PathMatch {
            params,
            pathname: matched.to_string(),
            pathname_base,
            pattern: self.pattern.clone(),
        })
    }
}

/// Turn `users*` into `users/*`, warning about the rewrite.
fn normalize_splat(path: &str) -> String {
    if path.ends_with('*') && path != "*" && !path.ends_with("/*") {
        let fixed = format!("{}/*", &path[..path.len() - 1]);
        tracing::warn!(
            pattern = %path,
            treated_as = %fixed,
            "Route path ends in a bare \"*\"; treating it as a trailing splat"
        );
        return fixed;
    }
    path.to_string()
}

fn push_segment(source: &mut String, segment: &str, params: &mut Vec<CompiledParam>) {
    if let Some(rest) = segment.strip_prefix(':') {
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if name_len > 0 {
            let (name, mut suffix) = rest.split_at(name_len);
            let optional = suffix.starts_with('?');
            if optional {
                suffix = &suffix[1..];
            }
            params.push(CompiledParam {
                name: name.to_string(),
                optional,
            });
            if optional {
                source.push_str("(?:/([^/]+)");
                source.push_str(&escape_static(suffix));
                source.push_str(")?");
            } else {
                source.push_str("/([^/]+)");
                source.push_str(&escape_static(suffix));
            }
            return;
        }
    }
    if segment.len() > 1 && segment.ends_with('?') {
        source.push_str("(?:/");
        source.push_str(&escape_static(&segment[..segment.len() - 1]));
        source.push_str(")?");
        return;
    }
    source.push('/');
    source.push_str(&escape_static(segment));
}

/// Static pattern text in canonical form, regex-escaped.
fn escape_static(text: &str) -> String {
    regex::escape(&escape_canonical(text))
}

/// Strip trailing slashes but never reduce a non-empty path to nothing.
pub(crate) fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        &path[..path.len().min(1)]
    } else {
        trimmed
    }
}

/// Match `pathname` against a single pattern.
///
/// The pathname is percent-decoded segment by segment first; a leading `/`
/// is added when missing.
pub fn match_path(pattern: impl Into<PathPattern>, pathname: &str) -> RouterResult<Option<PathMatch>> {
    let compiled = CompiledPattern::compile(&pattern.into())?;
    let pathname = if pathname.starts_with('/') {
        pathname.to_string()
    } else {
        format!("/{pathname}")
    };
    Ok(compiled.match_decoded(&decode_path(&pathname)))
}

/// Build a pathname from a pattern and params.
///
/// Values are percent-encoded; existing `%XX` escapes are kept as they are.
/// A missing splat drops the trailing segment, a missing optional param drops
/// its segment, and a missing required param is an error.
pub fn generate_path(pattern: &str, params: &Params) -> RouterResult<String> {
    let path = normalize_splat(pattern);
    let prefix = if path.starts_with('/') { "/" } else { "" };
    let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut segments = Vec::with_capacity(raw.len());
    for (index, segment) in raw.iter().enumerate() {
        let is_last = index == raw.len() - 1;
        if is_last && *segment == "*" {
            segments.push(params.splat().map(|v| encode_value(v, true)).unwrap_or_default());
            continue;
        }
        if let Some(key) = segment.strip_prefix(':') {
            let (name, optional) = match key.strip_suffix('?') {
                Some(name) => (name, true),
                None => (key, false),
            };
            let is_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if is_name {
                match params.get(name) {
                    Some(value) => segments.push(encode_value(value, false)),
                    None if optional => segments.push(String::new()),
                    None => return Err(RouterError::MissingParam(name.to_string())),
                }
                continue;
            }
        }
        segments.push(segment.trim_end_matches('?').to_string());
    }

    segments.retain(|s| !s.is_empty());
    Ok(format!("{prefix}{}", segments.join("/")))
}

/// Characters a param value keeps as-is when generating a path.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A splat value keeps its separators.
const SPLAT: &AsciiSet = &SEGMENT.remove(b'/');

/// Escapes that survive decoding so separators and literal `%` stay distinct.
const CANONICAL: &AsciiSet = &percent_encoding::CONTROLS.add(b'%').add(b'/');

/// Percent-decode each `/`-separated segment into canonical form.
///
/// A decoded `/` stays `%2F` and a decoded `%` stays `%25` (control
/// characters stay escaped too), so the result can be split on `/` safely and
/// decoded once more without loss.
pub fn decode_path(pathname: &str) -> String {
    pathname
        .split('/')
        .map(|segment| match percent_decode_str(segment).decode_utf8() {
            Ok(decoded) => escape_canonical(&decoded),
            Err(err) => {
                tracing::warn!(
                    segment = %segment,
                    error = %err,
                    "Could not decode path segment; using the raw value"
                );
                escape_canonical(segment)
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn escape_canonical(decoded: &str) -> String {
    utf8_percent_encode(decoded, CANONICAL).to_string()
}

/// Decode a value captured from a canonical pathname.
fn decode_canonical(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Percent-encode a param value, keeping existing `%XX` escapes intact.
fn encode_value(value: &str, keep_slash: bool) -> String {
    let set = if keep_slash { SPLAT } else { SEGMENT };
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(at) = rest.find('%') {
        out.extend(utf8_percent_encode(&rest[..at], set));
        let tail = &rest[at..];
        let bytes = tail.as_bytes();
        let escaped = bytes.len() >= 3 && bytes[1].is_ascii_hexdigit() && bytes[2].is_ascii_hexdigit();
        if escaped {
            out.push_str(&tail[..3]);
            rest = &tail[3..];
        } else {
            out.push_str("%25");
            rest = &tail[1..];
        }
    }
    out.extend(utf8_percent_encode(rest, set));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(m: &PathMatch) -> Vec<(&str, &str)> {
        m.params.iter().collect()
    }

    #[test]
    fn test_static_and_dynamic() {
        let m = match_path("/users/:id", "/users/42").unwrap().unwrap();
        assert_eq!(params(&m), vec![("id", "42")]);
        assert_eq!(m.pathname, "/users/42");
        assert_eq!(m.pathname_base, "/users/42");

        assert!(match_path("/users/:id", "/users").unwrap().is_none());
        assert!(match_path("/users/:id", "/users/42/edit").unwrap().is_none());
    }

    #[test]
    fn test_trailing_slash_and_case() {
        assert!(match_path("/users", "/users/").unwrap().is_some());
        assert!(match_path("/users", "/USERS").unwrap().is_some());
        let sensitive = PathPattern::new("/users").case_sensitive(true);
        assert!(match_path(sensitive, "/USERS").unwrap().is_none());
    }

    #[test]
    fn test_splat_boundary() {
        assert!(match_path("/files/*", "/filestypo").unwrap().is_none());

        let m = match_path("/files/*", "/files/mj.jpg").unwrap().unwrap();
        assert_eq!(m.params.splat(), Some("mj.jpg"));
        assert_eq!(m.pathname_base, "/files");

        let m = match_path("/files/*", "/files").unwrap().unwrap();
        assert_eq!(m.params.splat(), Some(""));

        let m = match_path("*", "/a/b/c").unwrap().unwrap();
        assert_eq!(m.params.splat(), Some("a/b/c"));
        assert_eq!(m.pathname_base, "/");
    }

    #[test]
    fn test_bare_star_suffix_is_a_splat() {
        let m = match_path("/files*", "/files/a/b").unwrap().unwrap();
        assert_eq!(m.params.splat(), Some("a/b"));
    }

    #[test]
    fn test_optional_segments() {
        let m = match_path("/:lang?/about", "/about").unwrap().unwrap();
        assert!(m.params.get("lang").is_none());

        let m = match_path("/:lang?/about", "/en/about").unwrap().unwrap();
        assert_eq!(m.params.get("lang"), Some("en"));

        assert!(match_path("/docs?/intro", "/intro").unwrap().is_some());
        assert!(match_path("/docs?/intro", "/docs/intro").unwrap().is_some());
    }

    #[test]
    fn test_optional_segments_keep_separator() {
        assert!(match_path("/users/:id?", "/usersfoo").unwrap().is_none());
        assert!(match_path("/users/docs?", "/usersdocs").unwrap().is_none());

        let m = match_path("/users/:id?", "/users").unwrap().unwrap();
        assert!(m.params.get("id").is_none());
        let m = match_path("/users/:id?", "/users/foo").unwrap().unwrap();
        assert_eq!(m.params.get("id"), Some("foo"));

        let m = match_path("/files/:name?.txt", "/files/a.txt").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("a"));
        assert!(match_path("/files/:name?.txt", "/files.txt").unwrap().is_none());
    }

    #[test]
    fn test_dot_is_literal_suffix() {
        let m = match_path("/download/:id.zip", "/download/report.zip").unwrap().unwrap();
        assert_eq!(m.params.get("id"), Some("report"));
        assert!(match_path("/download/:id.zip", "/download/reportxzip").unwrap().is_none());
    }

    #[test]
    fn test_partial_match() {
        let pattern = PathPattern::new("/users").end(false);
        let m = match_path(pattern.clone(), "/users/42").unwrap().unwrap();
        assert_eq!(m.pathname, "/users");
        assert!(match_path(pattern, "/usersx").unwrap().is_none());
    }

    #[test]
    fn test_decoding() {
        let m = match_path("/users/:name", "/users/J%C3%BCrgen%20K").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("Jürgen K"));

        let m = match_path("/users/:name", "/users/a%2Fb").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("a/b"));

        // Malformed segment degrades to the raw text.
        let m = match_path("/users/:name", "/users/100%").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("100%"));
        let m = match_path("/users/:name", "/users/%FF").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("%FF"));
    }

    #[test]
    fn test_escaped_percent_is_not_a_separator() {
        let m = match_path("/users/:name", "/users/a%252Fb").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("a%2Fb"));

        let m = match_path("/users/:name", "/users/50%25").unwrap().unwrap();
        assert_eq!(m.params.get("name"), Some("50%"));

        let m = match_path("/files/*", "/files/a%2Fb/c").unwrap().unwrap();
        assert_eq!(m.params.splat(), Some("a/b/c"));

        assert!(match_path("/100%", "/100%25").unwrap().is_some());
    }

    #[test]
    fn test_generate_path() {
        let p = Params::from([("id", "42")]);
        assert_eq!(generate_path("/users/:id", &p).unwrap(), "/users/42");

        let err = generate_path("/users/:id", &Params::new()).unwrap_err();
        assert_eq!(err, RouterError::MissingParam("id".to_string()));

        assert_eq!(generate_path("/files/*", &Params::new()).unwrap(), "/files");
        let p = Params::from([("*", "a b/c.txt")]);
        assert_eq!(generate_path("/files/*", &p).unwrap(), "/files/a%20b/c.txt");

        assert_eq!(generate_path("/:lang?/about", &Params::new()).unwrap(), "/about");
    }

    #[test]
    fn test_generate_path_does_not_double_encode() {
        let p = Params::from([("q", "a b%20c%zz")]);
        assert_eq!(generate_path("/search/:q", &p).unwrap(), "/search/a%20b%20c%25zz");
    }

    #[test]
    fn test_generate_then_match() {
        let pattern = "/groups/:g/users/:u/*";
        let p = Params::from([("g", "main"), ("u", "me"), ("*", "settings/profile")]);
        let path = generate_path(pattern, &p).unwrap();
        let m = match_path(pattern, &path).unwrap().unwrap();
        assert_eq!(m.params, p);
    }
}
