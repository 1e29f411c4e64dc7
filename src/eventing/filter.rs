//! Wildcard Filter Compiler
//!
//! Event names are dot-separated (`as.up.data.forward`). Filters use `.` as a
//! literal separator and `*` for "zero or more of any character", anchored at
//! both ends. The same rule set is serialized for the stream subscription and
//! evaluated locally, so server-side filtering and client-side classification
//! cannot drift apart.

use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use snafu::ResultExt;

use crate::constants::PATTERN_CACHE_CAPACITY;
use crate::error::{PatternSnafu, Result};

/// Process-wide cache of compiled patterns
fn pattern_cache() -> &'static Mutex<LruCache<String, Arc<Regex>>> {
    static CACHE: OnceLock<Mutex<LruCache<String, Arc<Regex>>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        let cap = NonZeroUsize::new(PATTERN_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Mutex::new(LruCache::new(cap))
    })
}

/// Translate a wildcard pattern to an anchored regular expression
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for (i, literal) in pattern.split('*').enumerate() {
        if i > 0 {
            regex.push_str(".*");
        }
        // escape() turns `.` into `\.` along with every other metacharacter
        regex.push_str(&regex::escape(literal));
    }
    regex.push('$');
    regex
}

fn compile(pattern: &str) -> Result<Arc<Regex>> {
    let mut cache = pattern_cache().lock();
    if let Some(hit) = cache.get(pattern) {
        return Ok(hit.clone());
    }

    let source = wildcard_to_regex(pattern);
    let regex = Arc::new(Regex::new(&source).context(PatternSnafu { pattern })?);
    cache.put(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// A single compiled filter pattern
#[derive(Clone, Debug)]
pub struct FilterRule {
    pattern: Arc<str>,
    compiled: Arc<Regex>,
}

impl FilterRule {
    /// Compile one wildcard pattern
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: pattern.into(),
            compiled: compile(pattern)?,
        })
    }

    /// The original wildcard pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The anchored expression
    pub fn regex(&self) -> &Regex {
        &self.compiled
    }

    /// Whether `name` matches this rule
    pub fn matches(&self, name: &str) -> bool {
        self.compiled.is_match(name)
    }

    /// Wire representation, e.g. `/^as\.up\..*\.forward$/`
    pub fn to_wire(&self) -> String {
        format!("/{}/", self.compiled.as_str())
    }
}

/// Ordered set of compiled filter rules
#[derive(Clone, Debug, Default)]
pub struct FilterRuleSet {
    rules: Vec<FilterRule>,
}

impl FilterRuleSet {
    /// Compile an ordered list of wildcard patterns
    pub fn compile<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| FilterRule::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Rules in declaration order
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether any rule matches `name`
    pub fn matches(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.matches(name))
    }

    /// First rule matching `name`
    pub fn first_match(&self, name: &str) -> Option<&FilterRule> {
        self.rules.iter().find(|r| r.matches(name))
    }

    /// Sub-set of rules whose pattern is one of `patterns`
    ///
    /// Used to carve domain classifiers (e.g. heartbeats) out of the
    /// subscription list without compiling anything twice.
    pub fn subset(&self, patterns: &[&str]) -> Self {
        Self {
            rules: self
                .rules
                .iter()
                .filter(|r| patterns.contains(&r.pattern()))
                .cloned()
                .collect(),
        }
    }

    /// Wire representation sent to the event-subscription endpoint
    pub fn to_wire(&self) -> Vec<String> {
        self.rules.iter().map(FilterRule::to_wire).collect()
    }
}
