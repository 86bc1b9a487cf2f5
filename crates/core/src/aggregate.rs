//! Event-sourced aggregate contract.

/// Identity and stream position of an aggregate.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far; equals the sequence number of the
    /// last event in the stream.
    fn version(&self) -> u64;
}

/// Version a writer expects the stream to be at when appending.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check; for imports and replays.
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Decide/evolve split for a deterministic aggregate.
///
/// `handle` inspects state and returns the events a command produces;
/// `apply` folds one event into state and is the only mutation path.
/// Neither does IO or reads a clock: commands carry their own `occurred_at`.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Must bump `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    /// An empty vec means the command is a no-op for the current state.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_version() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn exact_requires_the_same_version() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
    }
}
