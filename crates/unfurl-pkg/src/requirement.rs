//! Requirement sets accumulated from a source package's declared dependencies.

/// A single dependency requirement pulled from a source package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Dependency name.
    pub name: String,

    /// Human-authored version constraint, kept opaque except for merging.
    pub constraint: String,

    /// Whether the source package declared this as a dev-only dependency.
    pub dev: bool,
}

/// An ordered collection of requirements to unpack, plus the flags fixed at
/// construction time.
///
/// The set performs no uniqueness enforcement: callers are expected not to
/// add the same name twice, and a duplicate that slips through is resolved
/// first-write-wins downstream (the second occurrence finds the name already
/// present in the runtime section and becomes a no-op).
#[derive(Debug, Default)]
pub struct RequirementSet {
    requirements: Vec<Requirement>,
    unpack: bool,
    sort: bool,
}

impl RequirementSet {
    /// Create a new set.
    ///
    /// `unpack` records whether unpacking is active (reserved for future
    /// dry-run support; every current caller passes `true`). `sort` controls
    /// whether the destination section's keys are kept alphabetically sorted
    /// after insertion.
    #[must_use]
    pub fn new(unpack: bool, sort: bool) -> Self {
        Self {
            requirements: Vec::new(),
            unpack,
            sort,
        }
    }

    /// Append a requirement.
    pub fn add(&mut self, name: impl Into<String>, constraint: impl Into<String>, dev: bool) {
        self.requirements.push(Requirement {
            name: name.into(),
            constraint: constraint.into(),
            dev,
        });
    }

    /// Requirements in insertion order.
    ///
    /// Order matters: when sorting is disabled, downstream merging appends
    /// new keys in exactly this order.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether unpacking is active.
    #[must_use]
    pub fn should_unpack(&self) -> bool {
        self.unpack
    }

    /// Whether destination sections are kept alphabetically sorted.
    #[must_use]
    pub fn should_sort(&self) -> bool {
        self.sort
    }

    /// True when the set holds no requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}
