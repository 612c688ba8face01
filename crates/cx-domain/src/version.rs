//! Conda-style version ordering.
//!
//! A version is split into an optional `N!` epoch, the main version and an
//! optional `+local` suffix. Each of those is split on `.` and `_` into
//! components, and every component into alternating runs of digits and
//! letters. Numbers compare numerically and rank above strings; `dev` ranks
//! below every other string and `post` above everything.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Dev,
    Text(String),
    Number(u64),
    Post,
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Segment::Dev => 0,
            Segment::Text(_) => 1,
            Segment::Number(_) => 2,
            Segment::Post => 3,
        }
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parsed, comparable version.
#[derive(Debug, Clone)]
pub struct VersionOrder {
    raw: String,
    epoch: u64,
    version: Vec<Vec<Segment>>,
    local: Vec<Vec<Segment>>,
}

impl VersionOrder {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        let (epoch, rest) = match normalized.split_once('!') {
            Some((epoch, rest)) => (epoch.parse().unwrap_or(0), rest),
            None => (0, normalized.as_str()),
        };
        let (main, local) = match rest.split_once('+') {
            Some((main, local)) => (main, local),
            None => (rest, ""),
        };
        Self {
            raw: raw.trim().to_string(),
            epoch,
            version: split_components(main),
            local: split_components(local),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when `self` starts with every component of `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &VersionOrder) -> bool {
        if self.epoch != prefix.epoch || prefix.version.len() > self.version.len() {
            return false;
        }
        let last = prefix.version.len().saturating_sub(1);
        prefix
            .version
            .iter()
            .zip(&self.version)
            .enumerate()
            .all(|(idx, (want, have))| {
                if idx == last {
                    have.starts_with(want)
                } else {
                    have == want
                }
            })
    }
}

fn split_components(raw: &str) -> Vec<Vec<Segment>> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(['.', '_', '-'])
        .map(|component| {
            let mut segments = Vec::new();
            let mut chars = component.chars().peekable();
            while let Some(&first) = chars.peek() {
                let digit = first.is_ascii_digit();
                let mut run = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() != digit {
                        break;
                    }
                    run.push(ch);
                    chars.next();
                }
                segments.push(classify(&run, digit));
            }
            if !matches!(segments.first(), Some(Segment::Number(_))) {
                segments.insert(0, Segment::Number(0));
            }
            segments
        })
        .collect()
}

fn classify(run: &str, digit: bool) -> Segment {
    if digit {
        return run.parse().map_or_else(|_| Segment::Text(run.to_string()), Segment::Number);
    }
    match run {
        "dev" => Segment::Dev,
        "post" => Segment::Post,
        other => Segment::Text(other.to_string()),
    }
}

fn cmp_components(left: &[Vec<Segment>], right: &[Vec<Segment>]) -> Ordering {
    let zero = Segment::Number(0);
    let len = left.len().max(right.len());
    for idx in 0..len {
        let a = left.get(idx).map_or(&[][..], Vec::as_slice);
        let b = right.get(idx).map_or(&[][..], Vec::as_slice);
        let inner = a.len().max(b.len());
        for pos in 0..inner {
            let sa = a.get(pos).unwrap_or(&zero);
            let sb = b.get(pos).unwrap_or(&zero);
            match sa.cmp(sb) {
                Ordering::Equal => {}
                other => return other,
            }
        }
    }
    Ordering::Equal
}

impl Ord for VersionOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_components(&self.version, &other.version))
            .then_with(|| cmp_components(&self.local, &other.local))
    }
}

impl PartialOrd for VersionOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionOrder {}

impl fmt::Display for VersionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
