/*!
Prefix filtering for route ingress and egress.

A rule list is evaluated in reverse insertion order: the most recently
appended rule is consulted first, and the first rule that yields a non-NOP
result wins. When nothing matches, the list's default operation applies.
*/
use crate::models::network::RoutedPrefix;
use ipnet::{Ipv4Net, Ipv6Net};

/// What a rule (or rule list) decides for a prefix.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterOp {
    /// No opinion, keep evaluating.
    Nop,
    Accept,
    Reject,
}

/// How a rule's prefix is matched against a candidate.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    /// Exact prefix and length equality.
    Strict,
    /// The rule prefix includes the candidate.
    Loose,
}

/// A single filter rule.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterRule<P> {
    pub mode: FilterMode,
    pub op: FilterOp,
    pub prefix: P,
}

impl<P: RoutedPrefix> FilterRule<P> {
    pub fn new(mode: FilterMode, op: FilterOp, prefix: P) -> Self {
        FilterRule { mode, op, prefix }
    }

    /// Applies the rule to one prefix.
    pub fn apply(&self, prefix: &P) -> FilterOp {
        let matched = match self.mode {
            FilterMode::Strict => self.prefix == *prefix,
            FilterMode::Loose => self.prefix.includes(prefix),
        };
        if matched {
            self.op
        } else {
            FilterOp::Nop
        }
    }
}

/// An ordered rule list with a default operation.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterRules<P> {
    pub default_op: FilterOp,
    rules: Vec<FilterRule<P>>,
}

pub type FilterRules4 = FilterRules<Ipv4Net>;
pub type FilterRules6 = FilterRules<Ipv6Net>;

impl<P: RoutedPrefix> FilterRules<P> {
    pub fn new(default_op: FilterOp) -> Self {
        FilterRules {
            default_op,
            rules: Vec::new(),
        }
    }

    pub fn append(&mut self, rule: FilterRule<P>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Applies the rule list; later rules shadow earlier ones.
    pub fn apply(&self, prefix: &P) -> FilterOp {
        for rule in self.rules.iter().rev() {
            match rule.apply(prefix) {
                FilterOp::Nop => continue,
                op => return op,
            }
        }
        self.default_op
    }
}

/// Accept anything by default.
impl<P: RoutedPrefix> Default for FilterRules<P> {
    fn default() -> Self {
        FilterRules::new(FilterOp::Accept)
    }
}
