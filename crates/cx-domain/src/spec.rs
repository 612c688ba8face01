use std::{fmt, str::FromStr};

use regex::Regex;

use crate::{index::IndexEntry, version::VersionOrder};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("empty package spec")]
    Empty,
    #[error("package spec `{spec}` has more than three fields")]
    TooManyFields { spec: String },
    #[error("invalid version pattern `{pattern}` in spec `{spec}`")]
    InvalidPattern { spec: String, pattern: String },
}

/// How specific a spec is: name only, name and version, or fully explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strictness {
    Name = 1,
    Version = 2,
    Exact = 3,
}

impl Strictness {
    #[must_use]
    pub fn level(self) -> u8 {
        self as u8
    }
}

/// A parsed `name [version [build]]` package spec.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    raw: String,
    name: String,
    constraint: Constraint,
}

#[derive(Debug, Clone)]
enum Constraint {
    Any,
    Version(VersionSpec),
    Exact { version: String, build: String },
}

impl MatchSpec {
    pub fn parse(spec: &str) -> Result<Self, SpecError> {
        let parts: Vec<&str> = spec.split_whitespace().collect();
        let constraint = match parts.as_slice() {
            [] => return Err(SpecError::Empty),
            [_] => Constraint::Any,
            [_, version] => Constraint::Version(VersionSpec::parse(version).map_err(|pattern| {
                SpecError::InvalidPattern {
                    spec: spec.to_string(),
                    pattern,
                }
            })?),
            [_, version, build] => Constraint::Exact {
                version: (*version).to_string(),
                build: (*build).to_string(),
            },
            _ => {
                return Err(SpecError::TooManyFields {
                    spec: spec.to_string(),
                })
            }
        };
        Ok(Self {
            raw: parts.join(" "),
            name: parts[0].to_string(),
            constraint,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn strictness(&self) -> Strictness {
        match self.constraint {
            Constraint::Any => Strictness::Name,
            Constraint::Version(_) => Strictness::Version,
            Constraint::Exact { .. } => Strictness::Exact,
        }
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.strictness() == Strictness::Exact
    }

    /// Match against a version/build pair, ignoring the name.
    #[must_use]
    pub fn matches_version(&self, version: &str, build: &str) -> bool {
        match &self.constraint {
            Constraint::Any => true,
            Constraint::Version(spec) => spec.matches(version),
            Constraint::Exact {
                version: want_version,
                build: want_build,
            } => want_version == version && want_build == build,
        }
    }

    #[must_use]
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        entry.name == self.name && self.matches_version(&entry.version, &entry.build)
    }
}

impl FromStr for MatchSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for MatchSpec {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for MatchSpec {}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Version pattern: `|` separates alternatives, `,` joins requirements.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    alternatives: Vec<Vec<VersionAtom>>,
}

#[derive(Debug, Clone)]
enum VersionAtom {
    Exact(String),
    Glob(Regex),
    Prefix(VersionOrder),
    Compare(Operator, VersionOrder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl VersionSpec {
    /// Parse a version pattern. On failure the offending atom is returned.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let alternatives = pattern
            .split('|')
            .map(|alternative| {
                alternative
                    .split(',')
                    .map(str::trim)
                    .filter(|atom| !atom.is_empty())
                    .map(parse_atom)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        if alternatives.iter().all(Vec::is_empty) {
            return Err(pattern.to_string());
        }
        Ok(Self { alternatives })
    }

    #[must_use]
    pub fn matches(&self, version: &str) -> bool {
        let parsed = VersionOrder::parse(version);
        self.alternatives.iter().any(|all| {
            !all.is_empty() && all.iter().all(|atom| atom.matches(version, &parsed))
        })
    }
}

fn parse_atom(atom: &str) -> Result<VersionAtom, String> {
    const OPERATORS: [(&str, Operator); 6] = [
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];
    for (symbol, op) in OPERATORS {
        if let Some(rest) = atom.strip_prefix(symbol) {
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(atom.to_string());
            }
            return Ok(VersionAtom::Compare(op, VersionOrder::parse(rest)));
        }
    }
    if let Some(rest) = atom.strip_prefix('=') {
        let rest = rest.trim().trim_end_matches('*').trim_end_matches('.');
        if rest.is_empty() {
            return Err(atom.to_string());
        }
        return Ok(VersionAtom::Prefix(VersionOrder::parse(rest)));
    }
    if atom.contains('*') {
        let escaped = atom
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        return Regex::new(&format!("^{escaped}$"))
            .map(VersionAtom::Glob)
            .map_err(|_| atom.to_string());
    }
    Ok(VersionAtom::Exact(atom.to_string()))
}

impl VersionAtom {
    fn matches(&self, raw: &str, parsed: &VersionOrder) -> bool {
        match self {
            VersionAtom::Exact(want) => want == raw || VersionOrder::parse(want) == *parsed,
            VersionAtom::Glob(re) => re.is_match(raw),
            VersionAtom::Prefix(prefix) => parsed.starts_with(prefix),
            VersionAtom::Compare(op, want) => match op {
                Operator::Eq => parsed == want,
                Operator::Ne => parsed != want,
                Operator::Lt => parsed < want,
                Operator::Le => parsed <= want,
                Operator::Gt => parsed > want,
                Operator::Ge => parsed >= want,
            },
        }
    }
}
