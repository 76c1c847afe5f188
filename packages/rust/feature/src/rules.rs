//! Match rules and the identity filters built from them.

use p2index_resource::{TYPE_ATTRIBUTE, VERSION_ATTRIBUTE, filter, namespace};
use p2index_shared::{ArtifactKind, Version, VersionRange};

/// How an `<import>` constrains the version it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchRule {
    /// The literal version, qualifier included.
    Perfect,
    /// `[major.minor.micro, major.minor.(micro+1))`.
    Equivalent,
    /// `[major.minor.micro, major.(minor+1).0)`.
    Compatible,
    /// `>= version`, no upper bound.
    #[default]
    GreaterOrEqual,
}

impl MatchRule {
    /// Unknown or empty rules fall back to [`MatchRule::GreaterOrEqual`].
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "perfect" => Self::Perfect,
            "equivalent" => Self::Equivalent,
            "compatible" => Self::Compatible,
            _ => Self::GreaterOrEqual,
        }
    }

    /// Filter clauses over `version`. A zero version yields none.
    pub fn version_clauses(self, version: &Version) -> Vec<String> {
        if version.is_zero() {
            return Vec::new();
        }
        let base = version.without_qualifier();
        // A component at its maximum has no next value; the range stays open.
        let ceiling = match self {
            Self::Perfect => return vec![format!("({VERSION_ATTRIBUTE}={version})")],
            Self::GreaterOrEqual => return vec![format!("({VERSION_ATTRIBUTE}>={version})")],
            Self::Equivalent => base
                .micro
                .checked_add(1)
                .map(|micro| Version::new(base.major, base.minor, micro)),
            Self::Compatible => base
                .minor
                .checked_add(1)
                .map(|minor| Version::new(base.major, minor, 0)),
        };
        match ceiling {
            Some(high) => range_clauses(VersionRange::half_open(base, high)),
            None => vec![format!("({VERSION_ATTRIBUTE}>={base})")],
        }
    }
}

fn range_clauses(range: VersionRange) -> Vec<String> {
    let mut clauses = vec![format!("({VERSION_ATTRIBUTE}>={})", range.low)];
    if let Some(high) = &range.high {
        clauses.push(format!("(!({VERSION_ATTRIBUTE}>={high}))"));
    }
    clauses
}

/// Identity clause for `id`, plus a type clause when `kind` is given.
pub fn identity_clauses(id: &str, kind: Option<ArtifactKind>) -> Vec<String> {
    let mut clauses = vec![format!("({}={})", namespace::IDENTITY, filter::escape(id))];
    if let Some(kind) = kind {
        clauses.push(format!("({TYPE_ATTRIBUTE}={})", kind.type_name()));
    }
    clauses
}

/// AND the clauses together; a single clause stands alone.
pub fn conjunction(clauses: Vec<String>) -> String {
    match clauses.len() {
        1 => clauses.into_iter().collect(),
        _ => format!("(&{})", clauses.concat()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parse_defaults_to_greater_or_equal() {
        assert_eq!(MatchRule::parse(""), MatchRule::GreaterOrEqual);
        assert_eq!(MatchRule::parse("bogus"), MatchRule::GreaterOrEqual);
        assert_eq!(MatchRule::parse("compatible"), MatchRule::Compatible);
    }

    #[test]
    fn clauses_per_rule() {
        assert_eq!(
            MatchRule::Perfect.version_clauses(&v("1.2.3.qualifier")),
            vec!["(version=1.2.3.qualifier)"]
        );
        assert_eq!(
            MatchRule::Equivalent.version_clauses(&v("1.2.3.v1")),
            vec!["(version>=1.2.3)", "(!(version>=1.2.4))"]
        );
        assert_eq!(
            MatchRule::Compatible.version_clauses(&v("99.99.99")),
            vec!["(version>=99.99.99)", "(!(version>=99.100.0))"]
        );
        assert_eq!(
            MatchRule::GreaterOrEqual.version_clauses(&v("2.0.0")),
            vec!["(version>=2.0.0)"]
        );
        assert!(MatchRule::Compatible.version_clauses(&Version::zero()).is_empty());
    }

    #[test]
    fn maximal_components_leave_the_range_open() {
        let max = v("1.18446744073709551615.18446744073709551615.q");
        assert_eq!(
            MatchRule::Compatible.version_clauses(&max),
            vec!["(version>=1.18446744073709551615.18446744073709551615)"]
        );
        assert_eq!(
            MatchRule::Equivalent.version_clauses(&max),
            vec!["(version>=1.18446744073709551615.18446744073709551615)"]
        );
        assert_eq!(
            MatchRule::Equivalent.version_clauses(&v("1.18446744073709551615.0")),
            vec!["(version>=1.18446744073709551615.0)", "(!(version>=1.18446744073709551615.1))"]
        );
    }

    #[test]
    fn conjunction_of_one_is_bare() {
        assert_eq!(conjunction(identity_clauses("a", None)), "(osgi.identity=a)");
        assert_eq!(
            conjunction(identity_clauses("f", Some(ArtifactKind::Feature))),
            "(&(osgi.identity=f)(type=org.eclipse.update.feature))"
        );
    }
}
