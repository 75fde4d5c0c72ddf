//! Semantic versions and the constraint grammar
//!
//! Supports:
//! - Caret: `^1.2.3` (also the meaning of a bare `1.2.3`)
//! - Tilde: `~1.2.3`
//! - Wildcard: `*`, `1.*`, `1.2.*`
//! - Comparison: `<`, `<=`, `>`, `>=`, `==` followed by a version
//!
//! A constraint parses into a [`Range`]: a low bound (`>=`/`>`) and a high
//! bound (`<`/`<=`). Undeclared trailing components default to 0 on the
//! floor and to `u32::MAX` on an open ceiling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// A constraint string that does not match the grammar. This is a
    /// configuration defect; callers propagate it and abort the run.
    #[error("malformed version constraint: '{input}'")]
    Malformed { input: String },
}

/// A `(major, minor, patch)` version triple, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const ZERO: Version = Version::new(0, 0, 0);

    /// The ceiling used for open upper bounds (`>=x`, `*`).
    pub const MAX: Version = Version::new(u32::MAX, u32::MAX, u32::MAX);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string like `1.2.3`. Missing components default to 0.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let mut parser = Parser::new(input);
        parser.eat_whitespace();
        let parsed = parser.parse_version()?;
        Ok(parsed.version)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl std::str::FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Comparison operator attached to a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Op {
    /// Whether `version` satisfies `version <op> bound`.
    pub fn admits(self, version: Version, bound: Version) -> bool {
        match self {
            Op::Lt => version < bound,
            Op::Le => version <= bound,
            Op::Gt => version > bound,
            Op::Ge => version >= bound,
            Op::Eq => version == bound,
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Eq => "==",
        };
        write!(f, "{s}")
    }
}

/// How the range was written. Retained for display only; the bounds carry
/// the semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    None,
    Caret,
    Tilde,
    Wildcard,
    Comparison,
}

/// One end of a range: an operator and a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub op: Op,
    pub version: Version,
}

impl Bound {
    pub fn admits(&self, version: Version) -> bool {
        self.op.admits(version, self.version)
    }
}

/// A version constraint: a low bound (`>=`/`>`) and a high bound (`<`/`<=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub low: Bound,
    pub high: Bound,
    pub modifier: Modifier,
}

/// Which components of a version were actually written (`1` vs `1.2` vs
/// `1.2.3`). Caret, tilde, and wildcard widen differently depending on this.
#[derive(Debug, Clone, Copy)]
struct ParsedVersion {
    version: Version,
    has_major: bool,
    has_minor: bool,
    has_patch: bool,
}

impl Range {
    /// Parse a constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Malformed`] for anything outside the grammar.
    /// There is no recovery path; a bad constraint aborts resolution.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let mut parser = Parser::new(input);
        parser.eat_whitespace();

        let range = match parser.peek() {
            Some('^') => {
                parser.eat();
                Self::caret(parser.parse_version()?)
            }
            Some('~') => {
                parser.eat();
                Self::tilde(parser.parse_version()?)
            }
            Some('*') => {
                parser.eat();
                Self::wildcard(ParsedVersion {
                    version: Version::ZERO,
                    has_major: false,
                    has_minor: false,
                    has_patch: false,
                })
            }
            Some(c) if c.is_ascii_digit() => {
                let parsed = parser.parse_version()?;
                if parser.wildcard_tail() {
                    Self::wildcard(parsed)
                } else {
                    Self::caret(parsed)
                }
            }
            Some('>' | '<' | '=') => {
                let op = parser.parse_op()?;
                parser.eat_whitespace();
                let parsed = parser.parse_version()?;
                Self::comparison(op, parsed.version)
            }
            _ => return Err(parser.malformed()),
        };

        parser.eat_whitespace();
        if !parser.is_done() {
            return Err(parser.malformed());
        }

        Ok(range)
    }

    /// `^X.Y.Z`: allow changes that don't alter the most-significant
    /// non-zero component.
    fn caret(parsed: ParsedVersion) -> Self {
        let v = parsed.version;
        let high = if v.major > 0 {
            Version::new(v.major + 1, 0, 0)
        } else if v.minor > 0 {
            Version::new(v.major, v.minor + 1, 0)
        } else {
            Version::new(v.major, v.minor, v.patch + 1)
        };

        Self {
            low: Bound {
                op: Op::Ge,
                version: v,
            },
            high: Bound {
                op: Op::Lt,
                version: high,
            },
            modifier: Modifier::Caret,
        }
    }

    /// `~X.Y.Z`: allow patch changes; `~X` alone allows minor and patch.
    fn tilde(parsed: ParsedVersion) -> Self {
        let v = parsed.version;
        let high = if parsed.has_minor || parsed.has_patch {
            Version::new(v.major, v.minor + 1, 0)
        } else {
            Version::new(v.major + 1, 0, 0)
        };

        Self {
            low: Bound {
                op: Op::Ge,
                version: v,
            },
            high: Bound {
                op: Op::Lt,
                version: high,
            },
            modifier: Modifier::Tilde,
        }
    }

    /// `*`, `X.*`, `X.Y.*`: fix the written prefix, float the rest.
    fn wildcard(parsed: ParsedVersion) -> Self {
        let v = parsed.version;
        let (low, high) = if !parsed.has_major {
            (Version::ZERO, Version::MAX)
        } else if !parsed.has_minor {
            (
                Version::new(v.major, 0, 0),
                Version::new(v.major + 1, 0, 0),
            )
        } else {
            (
                Version::new(v.major, v.minor, 0),
                Version::new(v.major, v.minor + 1, 0),
            )
        };

        Self {
            low: Bound {
                op: Op::Ge,
                version: low,
            },
            high: Bound {
                op: Op::Lt,
                version: high,
            },
            modifier: Modifier::Wildcard,
        }
    }

    /// An explicit comparison, e.g. `>=1.2.0`. Open ends run to
    /// [`Version::ZERO`] / [`Version::MAX`].
    fn comparison(op: Op, version: Version) -> Self {
        let (low, high) = match op {
            Op::Eq => (
                Bound {
                    op: Op::Ge,
                    version,
                },
                Bound {
                    op: Op::Le,
                    version,
                },
            ),
            Op::Ge => (
                Bound {
                    op: Op::Ge,
                    version,
                },
                Bound {
                    op: Op::Le,
                    version: Version::MAX,
                },
            ),
            Op::Gt => (
                Bound {
                    op: Op::Gt,
                    version,
                },
                Bound {
                    op: Op::Le,
                    version: Version::MAX,
                },
            ),
            Op::Le => (
                Bound {
                    op: Op::Ge,
                    version: Version::ZERO,
                },
                Bound {
                    op: Op::Le,
                    version,
                },
            ),
            Op::Lt => (
                Bound {
                    op: Op::Ge,
                    version: Version::ZERO,
                },
                Bound {
                    op: Op::Lt,
                    version,
                },
            ),
        };

        Self {
            low,
            high,
            modifier: Modifier::Comparison,
        }
    }

    /// A closed range pinning exactly one version. Used when trusting a lock
    /// file entry.
    pub fn exact(version: Version) -> Self {
        Self::comparison(Op::Eq, version)
    }

    /// The range a bare dependency (no constraint) gets: caret around the
    /// given version.
    pub fn caret_around(version: Version) -> Self {
        Self::caret(ParsedVersion {
            version,
            has_major: true,
            has_minor: true,
            has_patch: true,
        })
    }

    pub fn contains(&self, version: Version) -> bool {
        self.low.admits(version) && self.high.admits(version)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.modifier {
            Modifier::Caret => write!(f, "^{}", self.low.version),
            Modifier::Tilde => write!(f, "~{}", self.low.version),
            Modifier::Wildcard => write!(f, "*{}", self.low.version),
            Modifier::Comparison => write!(f, "{}{}", self.low.op, self.low.version),
            Modifier::None => write!(f, "{}", self.low.version),
        }
    }
}

/// Cursor over a constraint string.
struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    it: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            it: 0,
        }
    }

    fn malformed(&self) -> VersionError {
        VersionError::Malformed {
            input: self.input.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.bytes.get(self.it).map(|&b| b as char)
    }

    fn eat(&mut self) {
        self.it += 1;
    }

    fn is_done(&self) -> bool {
        self.it >= self.bytes.len()
    }

    fn eat_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.eat();
        }
    }

    fn parse_number(&mut self) -> Result<u32, VersionError> {
        let start = self.it;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.eat();
        }
        if self.it == start {
            return Err(self.malformed());
        }
        self.input[start..self.it]
            .parse::<u32>()
            .map_err(|_| self.malformed())
    }

    /// Parse up to three dot-separated numbers, recording which were
    /// written. Stops before a trailing `.*`.
    fn parse_version(&mut self) -> Result<ParsedVersion, VersionError> {
        let major = self.parse_number()?;
        let mut parsed = ParsedVersion {
            version: Version::new(major, 0, 0),
            has_major: true,
            has_minor: false,
            has_patch: false,
        };

        if self.peek() == Some('.') && self.digit_follows_dot() {
            self.eat();
            parsed.version.minor = self.parse_number()?;
            parsed.has_minor = true;
        } else {
            return Ok(parsed);
        }

        if self.peek() == Some('.') && self.digit_follows_dot() {
            self.eat();
            parsed.version.patch = self.parse_number()?;
            parsed.has_patch = true;
        }

        Ok(parsed)
    }

    fn digit_follows_dot(&self) -> bool {
        matches!(self.bytes.get(self.it + 1), Some(b) if b.is_ascii_digit())
    }

    /// Consume a trailing `.*` if present, returning whether it was there.
    fn wildcard_tail(&mut self) -> bool {
        if self.peek() == Some('.') && self.bytes.get(self.it + 1) == Some(&b'*') {
            self.eat();
            self.eat();
            return true;
        }
        false
    }

    fn parse_op(&mut self) -> Result<Op, VersionError> {
        match self.peek() {
            Some('>') => {
                self.eat();
                if self.peek() == Some('=') {
                    self.eat();
                    Ok(Op::Ge)
                } else {
                    Ok(Op::Gt)
                }
            }
            Some('<') => {
                self.eat();
                if self.peek() == Some('=') {
                    self.eat();
                    Ok(Op::Le)
                } else {
                    Ok(Op::Lt)
                }
            }
            Some('=') => {
                self.eat();
                if self.peek() == Some('=') {
                    self.eat();
                }
                Ok(Op::Eq)
            }
            _ => Err(self.malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u32, minor: u32, patch: u32) -> Version {
        Version::new(major, minor, patch)
    }

    #[test]
    fn test_version_ordering_is_total() {
        let versions = [
            v(0, 0, 0),
            v(0, 0, 9),
            v(0, 1, 0),
            v(1, 0, 0),
            v(1, 2, 3),
            v(1, 2, 4),
            v(1, 3, 0),
            v(2, 0, 0),
        ];
        for window in versions.windows(2) {
            assert!(window[0] < window[1]);
        }
        // transitivity across the whole chain
        assert!(versions[0] < versions[versions.len() - 1]);
        // major dominates minor dominates patch
        assert!(v(1, 11, 5) > v(1, 10, 99));
        assert!(v(2, 0, 0) > v(1, 99, 99));
    }

    #[test]
    fn test_caret_major() {
        let range = Range::parse("^1.2.3").unwrap();
        assert_eq!(range.low, Bound { op: Op::Ge, version: v(1, 2, 3) });
        assert_eq!(range.high, Bound { op: Op::Lt, version: v(2, 0, 0) });
    }

    #[test]
    fn test_caret_zero_major() {
        let range = Range::parse("^0.2.3").unwrap();
        assert_eq!(range.low.version, v(0, 2, 3));
        assert_eq!(range.high.version, v(0, 3, 0));
    }

    #[test]
    fn test_caret_zero_minor() {
        let range = Range::parse("^0.0.3").unwrap();
        assert_eq!(range.low.version, v(0, 0, 3));
        assert_eq!(range.high.version, v(0, 0, 4));
    }

    #[test]
    fn test_bare_version_is_caret() {
        assert_eq!(Range::parse("1.2.3").unwrap(), Range::parse("^1.2.3").unwrap());
        let range = Range::parse("2").unwrap();
        assert_eq!(range.low.version, v(2, 0, 0));
        assert_eq!(range.high.version, v(3, 0, 0));
        assert_eq!(range.modifier, Modifier::Caret);
    }

    #[test]
    fn test_tilde() {
        let range = Range::parse("~1.2.3").unwrap();
        assert_eq!(range.low.version, v(1, 2, 3));
        assert_eq!(range.high.version, v(1, 3, 0));

        let range = Range::parse("~1.2").unwrap();
        assert_eq!(range.low.version, v(1, 2, 0));
        assert_eq!(range.high.version, v(1, 3, 0));

        let range = Range::parse("~1").unwrap();
        assert_eq!(range.low.version, v(1, 0, 0));
        assert_eq!(range.high.version, v(2, 0, 0));
    }

    #[test]
    fn test_wildcard() {
        let range = Range::parse("*").unwrap();
        assert_eq!(range.low.version, Version::ZERO);
        assert_eq!(range.high.version, Version::MAX);

        let range = Range::parse("1.*").unwrap();
        assert_eq!(range.low.version, v(1, 0, 0));
        assert_eq!(range.high.version, v(2, 0, 0));

        let range = Range::parse("1.2.*").unwrap();
        assert_eq!(range.low.version, v(1, 2, 0));
        assert_eq!(range.high.version, v(1, 3, 0));
    }

    #[test]
    fn test_comparisons() {
        let range = Range::parse(">=1.5.0").unwrap();
        assert_eq!(range.low, Bound { op: Op::Ge, version: v(1, 5, 0) });
        assert_eq!(range.high, Bound { op: Op::Le, version: Version::MAX });

        let range = Range::parse(">1.5.0").unwrap();
        assert_eq!(range.low.op, Op::Gt);
        assert!(!range.contains(v(1, 5, 0)));
        assert!(range.contains(v(1, 5, 1)));

        let range = Range::parse("<2.0.0").unwrap();
        assert_eq!(range.low.version, Version::ZERO);
        assert!(range.contains(v(1, 99, 99)));
        assert!(!range.contains(v(2, 0, 0)));

        let range = Range::parse("<=2.0.0").unwrap();
        assert!(range.contains(v(2, 0, 0)));

        let range = Range::parse("==1.2.3").unwrap();
        assert!(range.contains(v(1, 2, 3)));
        assert!(!range.contains(v(1, 2, 4)));
    }

    #[test]
    fn test_malformed_is_an_error() {
        for bad in ["", "abc", "^", "~x", ">=", "1.2.3.4junk", "^1.2oops"] {
            assert!(Range::parse(bad).is_err(), "expected parse failure: {bad}");
        }
    }

    #[test]
    fn test_display_round_trip_glyphs() {
        assert_eq!(Range::parse("^1.2.0").unwrap().to_string(), "^1.2.0");
        assert_eq!(Range::parse("~0.3.1").unwrap().to_string(), "~0.3.1");
        assert_eq!(Range::parse(">=2.0.0").unwrap().to_string(), ">=2.0.0");
    }

    #[test]
    fn test_partial_versions_default_to_zero() {
        assert_eq!(Version::parse("1.2").unwrap(), v(1, 2, 0));
        assert_eq!(Version::parse("3").unwrap(), v(3, 0, 0));
    }
}
