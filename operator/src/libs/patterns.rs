//! Matches workload names against scaling name patterns
//!
//! Patterns are a literal name, a prefix glob like `db-*`, or the catch
//! all `*`. Sequence elements additionally match literals by containment
//! so a short element covers every workload whose name carries it.

/// The priority workloads take when no sequence element matches them
///
/// Unmatched workloads scale last on the way down and first on the way up.
pub const UNMATCHED_PRIORITY: usize = 999;

/// A single compiled name pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches every name
    Any,
    /// Matches names starting with a prefix
    Prefix(String),
    /// Matches a literal name
    Literal(String),
}

impl Pattern {
    /// Compile a raw pattern string
    ///
    /// Empty patterns compile to None and are ignored by the matchers.
    ///
    /// # Arguments
    ///
    /// * `raw` - The raw pattern to compile
    pub fn parse(raw: &str) -> Option<Self> {
        // patterns are always matched with whitespace trimmed
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "*" {
            return Some(Pattern::Any);
        }
        // a trailing star makes this a prefix glob
        if let Some(prefix) = trimmed.strip_suffix('*') {
            return Some(Pattern::Prefix(prefix.to_owned()));
        }
        Some(Pattern::Literal(trimmed.to_owned()))
    }

    /// Check whether a workload name falls under this exclusion pattern
    ///
    /// # Arguments
    ///
    /// * `name` - The workload name to check
    pub fn excludes(&self, name: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Pattern::Literal(literal) => name == literal,
        }
    }

    /// Check whether a workload name takes this sequence elements priority
    ///
    /// Literal elements match by containment so `db` also covers
    /// `redis-db-proxy`.
    ///
    /// # Arguments
    ///
    /// * `name` - The workload name to check
    pub fn indexes(&self, name: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Pattern::Literal(literal) => name.contains(literal.as_str()),
        }
    }
}

/// Check whether a workload may never be scaled
///
/// # Arguments
///
/// * `name` - The workload name to check
/// * `exclusions` - The raw exclusion patterns
pub fn is_excluded(name: &str, exclusions: &[String]) -> bool {
    let name = name.trim();
    exclusions
        .iter()
        .filter_map(|raw| Pattern::parse(raw))
        .any(|pattern| pattern.excludes(name))
}

/// Get the priority a workload takes in a scaling sequence
///
/// The first matching element wins and its index is the priority.
///
/// # Arguments
///
/// * `name` - The workload name to index
/// * `sequence` - The raw sequence elements
pub fn sequence_index(name: &str, sequence: &[String]) -> usize {
    let name = name.trim();
    for (index, raw) in sequence.iter().enumerate() {
        if let Some(pattern) = Pattern::parse(raw) {
            if pattern.indexes(name) {
                return index;
            }
        }
    }
    UNMATCHED_PRIORITY
}
