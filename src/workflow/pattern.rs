//! Wildcard Patterns
//!
//! Output patterns and input templates use named placeholders:
//! - `{sample}` matches any non-empty substring
//! - `{sample,[a-z]+}` restricts the values the wildcard may take
//!
//! Matching is greedy from the left: the first wildcard tries the longest
//! value first and gives back characters until the rest of the pattern fits.
//! A name used twice must bind the same value both times.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BuildError, Result};

static WILDCARD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Wildcard bindings produced by matching a target against a pattern.
///
/// Ordered by name so that job identities and log output are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Wildcards(BTreeMap<String, String>);

impl Wildcards {
    /// Creates an empty binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Wildcards {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Wildcards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Wildcard {
        name: String,
        constraint: Option<Constraint>,
    },
}

#[derive(Debug, Clone)]
struct Constraint {
    source: String,
    regex: Regex,
}

/// A parsed pattern such as `results/{sample}/{chrom,chr[0-9]+}.vcf`.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses a pattern string.
    ///
    /// # Example
    /// ```
    /// use rulerunner::workflow::Pattern;
    ///
    /// let pattern = Pattern::parse("reads/{sample}.fastq").unwrap();
    /// let wildcards = pattern.matches("reads/s1.fastq").unwrap();
    /// assert_eq!(wildcards.get("sample"), Some("s1"));
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |message: String| BuildError::InvalidPattern {
            pattern: raw.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.char_indices().peekable();

        while let Some((start, ch)) = chars.next() {
            match ch {
                '{' => {
                    // Scan to the matching brace; constraint regexes may nest braces.
                    let mut depth = 1;
                    let mut body = String::new();
                    for (_, inner) in chars.by_ref() {
                        match inner {
                            '{' => depth += 1,
                            '}' => depth -= 1,
                            _ => {}
                        }
                        if depth == 0 {
                            break;
                        }
                        body.push(inner);
                    }
                    if depth != 0 {
                        return Err(invalid(format!("unclosed '{{' at byte {}", start)));
                    }

                    let (name, constraint) = match body.split_once(',') {
                        Some((name, re)) => (name.trim(), Some(re.trim())),
                        None => (body.trim(), None),
                    };
                    if !WILDCARD_NAME.is_match(name) {
                        return Err(invalid(format!("invalid wildcard name '{}'", name)));
                    }

                    let constraint = match constraint {
                        Some("") => {
                            return Err(invalid(format!("empty constraint for '{}'", name)));
                        }
                        Some(source) => {
                            let regex = Regex::new(&format!("^(?:{})$", source))
                                .map_err(|e| invalid(format!("bad constraint for '{}': {}", name, e)))?;
                            Some(Constraint {
                                source: source.to_string(),
                                regex,
                            })
                        }
                        None => None,
                    };

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Wildcard {
                        name: name.to_string(),
                        constraint,
                    });
                }
                '}' => return Err(invalid(format!("unmatched '}}' at byte {}", start))),
                _ => literal.push(ch),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the distinct wildcard names in order of first appearance.
    pub fn wildcard_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Wildcard { name, .. } = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// True if the pattern has no placeholders.
    pub fn is_concrete(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// The pattern with wildcard names erased, e.g. `{}.txt`.
    ///
    /// Two patterns with the same structure match exactly the same targets.
    pub fn structure(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Wildcard {
                    constraint: Some(c),
                    ..
                } => format!("{{,{}}}", c.source),
                Segment::Wildcard { .. } => "{}".to_string(),
            })
            .collect()
    }

    /// Matches a concrete target, returning the wildcard bindings.
    pub fn matches(&self, target: &str) -> Option<Wildcards> {
        let mut bound = Wildcards::new();
        if self.match_from(0, target, &mut bound) {
            debug!("'{}' matched '{}' with [{}]", target, self.raw, bound);
            Some(bound)
        } else {
            None
        }
    }

    fn match_from(&self, index: usize, rest: &str, bound: &mut Wildcards) -> bool {
        let Some(segment) = self.segments.get(index) else {
            return rest.is_empty();
        };

        match segment {
            Segment::Literal(text) => match rest.strip_prefix(text.as_str()) {
                Some(remaining) => self.match_from(index + 1, remaining, bound),
                None => false,
            },
            Segment::Wildcard { name, constraint } => {
                if let Some(existing) = bound.get(name) {
                    let existing = existing.to_string();
                    return match rest.strip_prefix(existing.as_str()) {
                        Some(remaining) => self.match_from(index + 1, remaining, bound),
                        None => false,
                    };
                }

                let next_literal = match self.segments.get(index + 1) {
                    Some(Segment::Literal(text)) => Some(text.as_str()),
                    _ => None,
                };

                let ends: Vec<usize> = rest.char_indices().map(|(i, c)| i + c.len_utf8()).collect();
                for &end in ends.iter().rev() {
                    let (value, remaining) = rest.split_at(end);
                    if let Some(lit) = next_literal {
                        if !remaining.starts_with(lit) {
                            continue;
                        }
                    }
                    if let Some(c) = constraint {
                        if !c.regex.is_match(value) {
                            continue;
                        }
                    }
                    bound.insert(name, value);
                    if self.match_from(index + 1, remaining, bound) {
                        return true;
                    }
                    bound.remove(name);
                }
                false
            }
        }
    }

    /// Substitutes every placeholder from `wildcards`.
    ///
    /// Returns the name of the first wildcard that is not bound as the error.
    pub fn render(&self, wildcards: &Wildcards) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Wildcard { name, .. } => match wildcards.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Checks if a string contains wildcard syntax, a `{` followed later by a `}`.
pub fn has_wildcards(text: &str) -> bool {
    text.find('{')
        .map_or(false, |open| text[open + 1..].contains('}'))
}

/// Renders `template` once per combination of wildcard values.
///
/// Combinations are produced row-major: the last wildcard varies fastest.
///
/// # Example
/// ```
/// use rulerunner::workflow::expand;
///
/// let targets = expand("plots/{sample}_{rep}.png", &[
///     ("sample", &["a", "b"]),
///     ("rep", &["1", "2"]),
/// ]).unwrap();
/// assert_eq!(targets, vec![
///     "plots/a_1.png", "plots/a_2.png", "plots/b_1.png", "plots/b_2.png",
/// ]);
/// ```
pub fn expand(template: &str, values: &[(&str, &[&str])]) -> Result<Vec<String>> {
    let pattern = Pattern::parse(template)?;

    let mut combinations = vec![Wildcards::new()];
    for (name, options) in values {
        combinations = combinations
            .into_iter()
            .flat_map(|base| {
                options.iter().map(move |value| {
                    let mut next = base.clone();
                    next.insert(name, value);
                    next
                })
            })
            .collect();
    }

    combinations
        .iter()
        .map(|wildcards| {
            pattern.render(wildcards).map_err(|name| BuildError::InvalidPattern {
                pattern: template.to_string(),
                message: format!("no values given for wildcard '{}'", name),
            })
        })
        .collect()
}
