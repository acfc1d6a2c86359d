//! Endpoint templates
//!
//! An [`EndpointTemplate`] is a URL pattern made of literal and named
//! segments, e.g. `/subscriptions/{subscriptionId}/resourceGroups/{name}`.
//! Templates can match concrete URLs (capturing the named values) and build
//! concrete URLs back from a value map.
//!
//! Matching is strict about depth: a template with N path segments only ever
//! matches URLs with exactly N path segments. Backends that need variable
//! depth (blob listings and the like) parse their responses directly instead.

use std::collections::HashMap;
use std::fmt;

/// Errors raised while parsing or building templates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("segment index {index} is a named segment but is missing the name")]
    MalformedTemplate { index: usize },

    #[error("found parameterised segment '{segment}' without the expected `}}')` suffix")]
    UnterminatedParameter { segment: String },

    #[error("no value was found with name '{name}'")]
    MissingValue { name: String },

    #[error("too few values: template needs {expected}, got {got}")]
    TooFewValues { expected: usize, got: usize },
}

/// One path segment of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Fixed text, matched case-insensitively
    Literal(String),
    /// `{name}` placeholder
    Named(String),
    /// OData style `docs('{key}')`: literal prefix plus a quoted placeholder
    Parameterised { literal: String, name: String },
}

impl Segment {
    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Named(name) | Segment::Parameterised { name, .. } => Some(name),
        }
    }

    fn parse(index: usize, raw: &str) -> Result<Self, TemplateError> {
        if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if inner.is_empty() {
                return Err(TemplateError::MalformedTemplate { index });
            }
            return Ok(Segment::Named(inner.to_string()));
        }

        let Some(param_index) = raw.find("('{") else {
            return Ok(Segment::Literal(raw.to_string()));
        };
        let Some(without_suffix) = raw.strip_suffix("}')") else {
            return Err(TemplateError::UnterminatedParameter {
                segment: raw.to_string(),
            });
        };
        let name = &without_suffix[param_index + 3..];
        if name.is_empty() {
            return Err(TemplateError::MalformedTemplate { index });
        }
        Ok(Segment::Parameterised {
            literal: raw[..param_index].to_string(),
            name: name.to_string(),
        })
    }

    fn render(&self, value: Option<&str>) -> String {
        match (self, value) {
            (Segment::Literal(text), _) => text.clone(),
            (Segment::Named(_), Some(v)) => v.to_string(),
            (Segment::Parameterised { literal, .. }, Some(v)) => format!("{}('{}')", literal, v),
            _ => String::new(),
        }
    }
}

/// Result of matching a URL against a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub is_match: bool,
    /// Values captured from named segments
    pub values: HashMap<String, String>,
}

impl MatchResult {
    fn no_match() -> Self {
        Self::default()
    }
}

/// A parsed URL template with an optional api-version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplate {
    /// The template exactly as supplied
    pub template_url: String,
    pub api_version: Option<String>,
    pub segments: Vec<Segment>,
}

impl EndpointTemplate {
    /// Parse a template such as `/test/{name}/child`
    pub fn parse(template_url: &str, api_version: Option<&str>) -> Result<Self, TemplateError> {
        let trimmed = template_url.trim_start_matches('/').trim_end_matches('/');

        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed
                .split('/')
                .enumerate()
                .map(|(i, s)| Segment::parse(i, s))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            template_url: template_url.to_string(),
            api_version: api_version.filter(|v| !v.is_empty()).map(str::to_string),
            segments,
        })
    }

    /// Normalised template path (single leading slash, no trailing slash).
    /// Used as the logical key of a Path.
    pub fn path(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Named(name) => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                Segment::Parameterised { literal, name } => {
                    out.push_str(&format!("{}('{{{}}}')", literal, name));
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Number of named segments (plain and parameterised)
    pub fn named_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.name().is_some()).count()
    }

    /// Display name of the last segment: the literal, or `{name}` for a placeholder
    pub fn last_segment_name(&self) -> String {
        match self.segments.last() {
            Some(Segment::Literal(text)) => text.clone(),
            Some(Segment::Named(name)) => format!("{{{}}}", name),
            Some(Segment::Parameterised { literal, name }) => format!("{}('{{{}}}')", literal, name),
            None => "/".to_string(),
        }
    }

    /// Test whether `url` matches this template, ignoring any query string
    pub fn matches(&self, url: &str) -> MatchResult {
        let path = url.split('?').next().unwrap_or_default();
        let path = path.strip_prefix('/').unwrap_or(path);

        let parts: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };
        if parts.len() != self.segments.len() {
            return MatchResult::no_match();
        }

        let mut values = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(text) => {
                    if !text.eq_ignore_ascii_case(part) {
                        return MatchResult::no_match();
                    }
                }
                Segment::Named(name) => {
                    if part.is_empty() {
                        return MatchResult::no_match();
                    }
                    values.insert(name.clone(), part.to_string());
                }
                Segment::Parameterised { literal, name } => {
                    let Some(value) = strip_prefix_ignore_case(part, literal)
                        .and_then(|rest| rest.strip_prefix("('"))
                        .and_then(|rest| rest.strip_suffix("')"))
                    else {
                        return MatchResult::no_match();
                    };
                    values.insert(name.clone(), value.to_string());
                }
            }
        }

        MatchResult {
            is_match: true,
            values,
        }
    }

    /// Build a concrete URL, substituting named segments from `values`
    pub fn build(&self, values: &HashMap<String, String>) -> Result<String, TemplateError> {
        let mut url = String::new();
        for segment in &self.segments {
            let value = match segment.name() {
                Some(name) => match values.get(name).filter(|v| !v.is_empty()) {
                    Some(v) => Some(v.as_str()),
                    None => {
                        return Err(TemplateError::MissingValue {
                            name: name.to_string(),
                        })
                    }
                },
                None => None,
            };
            url.push('/');
            url.push_str(&segment.render(value));
        }
        Ok(self.with_api_version(url))
    }

    /// Build a concrete URL, substituting named segments by position
    pub fn build_from_values(&self, values: &[String]) -> Result<String, TemplateError> {
        let expected = self.named_segment_count();
        if values.len() < expected {
            return Err(TemplateError::TooFewValues {
                expected,
                got: values.len(),
            });
        }

        let mut remaining = values.iter();
        let mut url = String::new();
        for segment in &self.segments {
            let value = match segment.name() {
                Some(_) => remaining.next().map(String::as_str),
                None => None,
            };
            url.push('/');
            url.push_str(&segment.render(value));
        }
        Ok(self.with_api_version(url))
    }

    /// Named values from `values` in template order (missing names become empty)
    pub fn ordered_values(&self, values: &HashMap<String, String>) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(Segment::name)
            .map(|name| values.get(name).cloned().unwrap_or_default())
            .collect()
    }

    fn with_api_version(&self, mut url: String) -> String {
        if url.is_empty() {
            url.push('/');
        }
        if let Some(version) = &self.api_version {
            url.push_str("?api-version=");
            url.push_str(version);
        }
        url
    }
}

impl fmt::Display for EndpointTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template_url)
    }
}

/// Replace every `{placeholder}` in a path with `{}`
pub fn condense_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut in_placeholder = false;
    for c in path.chars() {
        match c {
            '{' if !in_placeholder => {
                in_placeholder = true;
                out.push_str("{}");
            }
            '}' if in_placeholder => in_placeholder = false,
            _ if in_placeholder => {}
            _ => out.push(c),
        }
    }
    out
}

/// Replace `{name}` occurrences in a display string such as `Name: {name}`
pub fn substitute_values(format: &str, values: &HashMap<String, String>) -> String {
    let mut out = format.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}
