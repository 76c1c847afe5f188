//! LDAP-style filter expressions over typed attributes.
//!
//! Supports `&`, `|`, `!`, `=`, `>=`, `<=`, `~=`, presence (`(a=*)`) and
//! substring (`(a=pre*mid*suf)`) items with backslash escaping. Comparison
//! follows the attribute's type: versions compare as versions, longs as
//! integers, lists match when any element matches.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use p2index_shared::{P2IndexError, Result, Version};

use crate::model::Attr;

/// Comparison operator of a simple filter item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Approx,
    Ge,
    Le,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Approx => "~=",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq | Self::Approx => ordering == Ordering::Equal,
            Self::Ge => ordering != Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare { attr: String, op: Op, value: String },
    Present(String),
    /// `parts[0]` is the prefix, the last part the suffix, anything between
    /// must appear in order.
    Substring { attr: String, parts: Vec<String> },
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input,
            chars: input.chars().collect(),
            pos: 0,
            depth: 0,
        };
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    /// Evaluate against an attribute map.
    pub fn matches(&self, attrs: &BTreeMap<String, Attr>) -> bool {
        match self {
            Self::And(items) => items.iter().all(|f| f.matches(attrs)),
            Self::Or(items) => items.iter().any(|f| f.matches(attrs)),
            Self::Not(inner) => !inner.matches(attrs),
            Self::Present(attr) => lookup(attrs, attr).is_some(),
            Self::Compare { attr, op, value } => {
                lookup(attrs, attr).is_some_and(|a| compare(a, *op, value))
            }
            Self::Substring { attr, parts } => match lookup(attrs, attr) {
                Some(Attr::List(items)) => items.iter().any(|s| substring_match(s, parts)),
                Some(other) => substring_match(&other.to_string(), parts),
                None => false,
            },
        }
    }
}

impl FromStr for Filter {
    type Err = P2IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(items) => {
                f.write_str("(&")?;
                items.iter().try_for_each(|i| write!(f, "{i}"))?;
                f.write_str(")")
            }
            Self::Or(items) => {
                f.write_str("(|")?;
                items.iter().try_for_each(|i| write!(f, "{i}"))?;
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "(!{inner})"),
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::Compare { attr, op, value } => {
                write!(f, "({attr}{}{})", op.symbol(), escape(value))
            }
            Self::Substring { attr, parts } => {
                let joined: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({attr}={})", joined.join("*"))
            }
        }
    }
}

/// Escape the characters that are special inside a filter value.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '(' | ')' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Exact key first, then case-insensitive.
fn lookup<'a>(attrs: &'a BTreeMap<String, Attr>, key: &str) -> Option<&'a Attr> {
    attrs.get(key).or_else(|| {
        attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn compare(attr: &Attr, op: Op, value: &str) -> bool {
    match attr {
        Attr::String(s) => compare_str(s, op, value),
        Attr::Version(v) => Version::parse(value).is_ok_and(|other| op.accepts(v.cmp(&other))),
        Attr::Long(n) => value
            .trim()
            .parse::<i64>()
            .is_ok_and(|other| op.accepts(n.cmp(&other))),
        Attr::List(items) => items.iter().any(|s| compare_str(s, op, value)),
    }
}

fn compare_str(s: &str, op: Op, value: &str) -> bool {
    match op {
        Op::Approx => approx(s) == approx(value),
        _ => op.accepts(s.cmp(value)),
    }
}

fn approx(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_match(s: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return s == first;
    };
    if !s.starts_with(first.as_str()) {
        return false;
    }
    let mut pos = first.len();
    for part in middle {
        match s[pos..].find(part.as_str()) {
            Some(i) => pos += i + part.len(),
            None => return false,
        }
    }
    s.len() - pos >= last.len() && s[pos..].ends_with(last.as_str())
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

/// Deepest `(...)` nesting accepted; filters come from remote metadata.
const MAX_DEPTH: usize = 128;

/// Longest input echoed back in a parse error.
const ERROR_ECHO: usize = 120;

impl Parser<'_> {
    fn error(&self, what: &str) -> P2IndexError {
        let echo: String = self.input.chars().take(ERROR_ECHO).collect();
        let ellipsis = if self.chars.len() > ERROR_ECHO { "..." } else { "" };
        P2IndexError::parse(format!(
            "invalid filter '{echo}{ellipsis}' at offset {}: {what}",
            self.pos
        ))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let filter = self.nested();
        self.depth -= 1;
        filter
    }

    fn nested(&mut self) -> Result<Filter> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            _ => self.item()?,
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            items.push(self.filter()?);
        }
        if items.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, '=' | '<' | '>' | '~' | '(' | ')'))
        {
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.peek() {
            Some('=') => Op::Eq,
            Some('~') => Op::Approx,
            Some('>') => Op::Ge,
            Some('<') => Op::Le,
            _ => return Err(self.error("expected operator")),
        };
        self.pos += 1;
        if op != Op::Eq {
            self.expect('=')?;
        }

        // Split on unescaped '*' while collecting the literal value.
        let mut literal = String::new();
        let mut parts = vec![String::new()];
        let mut stars = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ')' => break,
                '\\' => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    literal.push(escaped);
                    if let Some(last) = parts.last_mut() {
                        last.push(escaped);
                    }
                }
                '*' => {
                    literal.push('*');
                    parts.push(String::new());
                    stars += 1;
                }
                _ => {
                    literal.push(c);
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                }
            }
            self.pos += 1;
        }

        if op == Op::Eq && stars > 0 {
            if stars == 1 && parts.iter().all(String::is_empty) {
                return Ok(Filter::Present(attr));
            }
            return Ok(Filter::Substring { attr, parts });
        }
        Ok(Filter::Compare {
            attr,
            op,
            value: literal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Attr)]) -> BTreeMap<String, Attr> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn identity(id: &str, version: &str) -> BTreeMap<String, Attr> {
        attrs(&[
            ("osgi.identity", Attr::from(id)),
            ("version", Attr::Version(Version::parse(version).unwrap())),
            ("type", Attr::from("osgi.bundle")),
        ])
    }

    #[test]
    fn version_range_filter() {
        let f = Filter::parse("(&(osgi.identity=org.example.a)(version>=1.2.0)(!(version>=1.3.0)))")
            .unwrap();
        assert!(f.matches(&identity("org.example.a", "1.2.0")));
        assert!(f.matches(&identity("org.example.a", "1.2.7.v2025")));
        assert!(!f.matches(&identity("org.example.a", "1.3.0")));
        assert!(!f.matches(&identity("org.example.b", "1.2.0")));
    }

    #[test]
    fn versions_compare_numerically() {
        let f = Filter::parse("(version>=1.10)").unwrap();
        assert!(f.matches(&identity("x", "1.10.0")));
        assert!(!f.matches(&identity("x", "1.9.0")));
    }

    #[test]
    fn exact_version_keeps_qualifier() {
        let f = Filter::parse("(version=1.2.3.qualifier)").unwrap();
        assert!(f.matches(&identity("x", "1.2.3.qualifier")));
        assert!(!f.matches(&identity("x", "1.2.3")));
    }

    #[test]
    fn presence_and_substring() {
        let a = identity("org.eclipse.core.runtime", "3.0.0");
        assert!(Filter::parse("(type=*)").unwrap().matches(&a));
        assert!(!Filter::parse("(label=*)").unwrap().matches(&a));
        assert!(Filter::parse("(osgi.identity=org.eclipse.*)").unwrap().matches(&a));
        assert!(Filter::parse("(osgi.identity=*core*)").unwrap().matches(&a));
        assert!(Filter::parse("(osgi.identity=org*core*runtime)").unwrap().matches(&a));
        assert!(!Filter::parse("(osgi.identity=*ui*)").unwrap().matches(&a));
    }

    #[test]
    fn or_and_not() {
        let a = identity("a", "1.0.0");
        assert!(Filter::parse("(|(osgi.identity=b)(osgi.identity=a))").unwrap().matches(&a));
        assert!(Filter::parse("(!(osgi.identity=b))").unwrap().matches(&a));
    }

    #[test]
    fn escaped_values_roundtrip_through_display() {
        let f = Filter::parse(r"(name=a\(b\)\*c)").unwrap();
        assert_eq!(
            f,
            Filter::Compare {
                attr: "name".into(),
                op: Op::Eq,
                value: "a(b)*c".into()
            }
        );
        assert_eq!(f.to_string(), r"(name=a\(b\)\*c)");
        assert!(f.matches(&attrs(&[("name", Attr::from("a(b)*c"))])));
    }

    #[test]
    fn lists_longs_and_approx() {
        let a = attrs(&[
            ("osgi.ee", Attr::List(vec!["JavaSE".into(), "OSGi/Minimum".into()])),
            ("size", Attr::Long(2048)),
            ("label", Attr::from("Core Runtime")),
        ]);
        assert!(Filter::parse("(osgi.ee=JavaSE)").unwrap().matches(&a));
        assert!(Filter::parse("(size>=1024)").unwrap().matches(&a));
        assert!(!Filter::parse("(size<=1024)").unwrap().matches(&a));
        assert!(Filter::parse("(label~=coreruntime)").unwrap().matches(&a));
        assert!(Filter::parse("(LABEL=Core Runtime)").unwrap().matches(&a));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "osgi.identity=a", "(a=b", "(&)", "(=b)", "(a!b)", "(a=b))", r"(a=b\"] {
            assert!(Filter::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |n: usize| format!("{}(a=b){}", "(!".repeat(n), ")".repeat(n));
        assert!(Filter::parse(&nested(MAX_DEPTH - 1)).is_ok());

        let err = Filter::parse(&nested(200_000)).unwrap_err();
        assert!(matches!(err, P2IndexError::Parse { .. }));
        assert!(err.to_string().contains("nested too deeply"));
        assert!(err.to_string().len() < 400);
    }
}
