//! Label sets identifying log streams and sample series.

use std::fmt::{Display, Formatter};

use regex::Regex;

/// Reserved label carrying the zero-based position of a variant in a
/// `variants(...) of (...)` query.
pub const VARIANT_LABEL: &str = "__variant__";

/// A name/value pair attached to a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An immutable, name-sorted set of labels.
///
/// Equality, hashing and ordering are defined over the full sorted set, and
/// the ordering agrees with the canonical string form produced by `Display`
/// for the purposes of result ordering. Labels with an empty value are never
/// stored, matching how an empty value is treated as an absent label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Builds a label set from name/value pairs. Later duplicates win.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut builder = LabelsBuilder::default();
        for (name, value) in pairs {
            builder.set(name, value);
        }
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Keeps only the listed names.
    pub fn keep(&self, names: &[String]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|l| names.contains(&l.name))
                .cloned()
                .collect(),
        )
    }

    /// Drops the listed names.
    pub fn drop_names(&self, names: &[String]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|l| !names.contains(&l.name))
                .cloned()
                .collect(),
        )
    }

    pub fn builder(&self) -> LabelsBuilder {
        LabelsBuilder {
            labels: self.0.clone(),
        }
    }

    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Labels {
        let mut builder = self.builder();
        builder.set(name, value);
        builder.build()
    }

    pub fn without(&self, name: &str) -> Labels {
        let mut builder = self.builder();
        builder.remove(name);
        builder.build()
    }
}

impl Ord for Labels {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value));
            if ord.is_ne() {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for Labels {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// Mutable staging area for deriving a new label set.
#[derive(Debug, Clone, Default)]
pub struct LabelsBuilder {
    labels: Vec<Label>,
}

impl LabelsBuilder {
    /// Sets a label. An empty value removes it.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.labels.binary_search_by(|l| l.name.cmp(&name)) {
            Ok(i) if value.is_empty() => {
                self.labels.remove(i);
            }
            Ok(i) => self.labels[i].value = value,
            Err(_) if value.is_empty() => {}
            Err(i) => self.labels.insert(i, Label { name, value }),
        }
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        if let Ok(i) = self.labels.binary_search_by(|l| l.name.as_str().cmp(name)) {
            self.labels.remove(i);
        }
        self
    }

    pub fn build(&self) -> Labels {
        Labels(self.labels.clone())
    }
}

/// How a stream selector matcher compares a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regexp,
    NotRegexp,
}

/// A single `name op "value"` term of a stream selector.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub value: String,
    pub match_type: MatchType,
    regex: Option<Regex>,
}

impl LabelMatcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_type: MatchType::Equal,
            regex: None,
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_type: MatchType::NotEqual,
            regex: None,
        }
    }

    /// Builds a regex matcher. The pattern is anchored at both ends.
    pub fn regex(
        name: impl Into<String>,
        pattern: impl Into<String>,
        negate: bool,
    ) -> Result<Self, regex::Error> {
        let value = pattern.into();
        let regex = Regex::new(&format!("^(?:{value})$"))?;
        Ok(Self {
            name: name.into(),
            value,
            match_type: if negate {
                MatchType::NotRegexp
            } else {
                MatchType::Regexp
            },
            regex: Some(regex),
        })
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        let actual = labels.get(&self.name).unwrap_or("");
        match (self.match_type, &self.regex) {
            (MatchType::Equal, _) => actual == self.value,
            (MatchType::NotEqual, _) => actual != self.value,
            (MatchType::Regexp, Some(re)) => re.is_match(actual),
            (MatchType::NotRegexp, Some(re)) => !re.is_match(actual),
            (MatchType::Regexp | MatchType::NotRegexp, None) => false,
        }
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.match_type == other.match_type
    }
}

impl Display for LabelMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = match self.match_type {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regexp => "=~",
            MatchType::NotRegexp => "!~",
        };
        write!(f, "{}{}{:?}", self.name, op, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn should_sort_labels_by_name() {
        let labels = Labels::from_pairs([("pool", "a"), ("app", "foo")]);

        let names: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["app", "pool"]);
        assert_eq!(labels.to_string(), r#"{app="foo", pool="a"}"#);
    }

    #[test]
    fn should_order_variant_label_first() {
        let labels = Labels::from_pairs([("app", "foo"), (VARIANT_LABEL, "0")]);
        assert_eq!(labels.to_string(), r#"{__variant__="0", app="foo"}"#);
    }

    #[test]
    fn should_drop_empty_values() {
        let labels = Labels::from_pairs([("app", "foo"), ("bar", "")]);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.with("app", "").len(), 0);
    }

    #[rstest]
    #[case(vec![("app", "bar")], vec![("app", "foo")], std::cmp::Ordering::Less)]
    #[case(vec![("app", "foo")], vec![("app", "foo"), ("bar", "x")], std::cmp::Ordering::Less)]
    #[case(vec![("app", "foo"), ("bar", "b")], vec![("app", "foo"), ("bar", "a")], std::cmp::Ordering::Greater)]
    #[case(vec![], vec![("a", "b")], std::cmp::Ordering::Less)]
    fn should_order_label_sets(
        #[case] left: Vec<(&str, &str)>,
        #[case] right: Vec<(&str, &str)>,
        #[case] expected: std::cmp::Ordering,
    ) {
        assert_eq!(Labels::from_pairs(left).cmp(&Labels::from_pairs(right)), expected);
    }

    #[test]
    fn should_keep_and_drop_names() {
        let labels = Labels::from_pairs([("app", "foo"), ("machine", "fuzz"), ("pool", "p")]);

        assert_eq!(
            labels.keep(&["app".to_string()]),
            Labels::from_pairs([("app", "foo")])
        );
        assert_eq!(
            labels.drop_names(&["app".to_string()]),
            Labels::from_pairs([("machine", "fuzz"), ("pool", "p")])
        );
    }

    #[rstest]
    #[case(LabelMatcher::equal("app", "foo"), true)]
    #[case(LabelMatcher::not_equal("app", "foo"), false)]
    #[case(LabelMatcher::regex("app", "foo|bar", false).unwrap(), true)]
    #[case(LabelMatcher::regex("app", "fo", false).unwrap(), false)]
    #[case(LabelMatcher::regex("app", "b.*", true).unwrap(), true)]
    #[case(LabelMatcher::equal("missing", ""), true)]
    fn should_match_labels(#[case] matcher: LabelMatcher, #[case] expected: bool) {
        let labels = Labels::from_pairs([("app", "foo")]);
        assert_eq!(matcher.matches(&labels), expected);
    }
}
