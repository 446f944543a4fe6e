//! IMAP command tag generator.
//!
//! Tags are used to match commands with their responses.

use crate::parser::MAX_EXACT_NUMBER;

/// Tag generator for IMAP commands.
///
/// Generates sequential tags `A0`, `A1`, ... and wraps back to `A0` before
/// the counter leaves the range a double can represent exactly.
#[derive(Debug, Clone, Default)]
pub struct TagGenerator {
    counter: u64,
}

impl TagGenerator {
    /// Creates a generator starting at `A0`.
    #[must_use]
    pub const fn new() -> Self {
        Self { counter: 0 }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> String {
        if self.counter >= MAX_EXACT_NUMBER {
            self.counter = 0;
        }
        let n = self.counter;
        self.counter += 1;
        format!("A{n}")
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_generation() {
        let mut generator = TagGenerator::new();
        assert_eq!(generator.next_tag(), "A0");
        assert_eq!(generator.next_tag(), "A1");
        assert_eq!(generator.next_tag(), "A2");
    }

    #[test]
    fn test_uniqueness() {
        let mut generator = TagGenerator::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10000 {
            assert!(seen.insert(generator.next_tag()), "duplicate tag generated");
        }
    }

    #[test]
    fn test_wraps_at_exact_number_ceiling() {
        let mut generator = TagGenerator { counter: MAX_EXACT_NUMBER - 1 };
        assert_eq!(generator.next_tag(), format!("A{}", MAX_EXACT_NUMBER - 1));
        assert_eq!(generator.next_tag(), "A0");
        assert_eq!(generator.next_tag(), "A1");
    }
}
