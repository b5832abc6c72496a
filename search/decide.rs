//! Chooses how the candidates of an iteration are produced.
//!
//! Small subsets are cheap to enumerate, and so are subsets that leave out at
//! most one feature of the universe. Everything in between is combinatorially
//! explosive and goes through the heuristic expansion instead.

use std::fmt;

/// Iterations up to this subset size are always enumerated exhaustively.
pub const EXHAUSTIVE_MAX_SIZE: usize = 3;

/// Iterations leaving at most this many features out are enumerated exhaustively.
pub const EXHAUSTIVE_TAIL: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenerationMode {
    /// Every combination of size k.
    Exhaustive,
    /// Elites and an exploration sample of iteration k-1, each grown by one feature.
    Heuristic,
}

impl GenerationMode {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Exhaustive => "exhaustive",
            Self::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Pure function of the iteration index `k` and the universe size `n`.
#[inline]
pub fn choose_mode(k: usize, n: usize) -> GenerationMode {
    if k <= EXHAUSTIVE_MAX_SIZE || n.saturating_sub(k) <= EXHAUSTIVE_TAIL {
        GenerationMode::Exhaustive
    } else {
        GenerationMode::Heuristic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristic_iterations(n: usize) -> Vec<usize> {
        (1..=n)
            .filter(|&k| choose_mode(k, n) == GenerationMode::Heuristic)
            .collect()
    }

    #[test]
    fn small_universes_are_always_exhaustive() {
        for n in 1..=5 {
            assert!(heuristic_iterations(n).is_empty(), "n = {n}");
        }
    }

    #[test]
    fn both_edges_of_the_boundary() {
        // n = 6: only k = 4 has k > 3 and n - k > 1.
        assert_eq!(heuristic_iterations(6), vec![4]);

        // n = 10: k in 4..=8 is heuristic, 9 and 10 fall in the exhaustive tail.
        assert_eq!(heuristic_iterations(10), vec![4, 5, 6, 7, 8]);
        assert_eq!(choose_mode(3, 10), GenerationMode::Exhaustive);
        assert_eq!(choose_mode(9, 10), GenerationMode::Exhaustive);
        assert_eq!(choose_mode(10, 10), GenerationMode::Exhaustive);
    }

    #[test]
    fn exhaustive_exactly_on_small_or_near_full_sizes() {
        for n in 1..=25 {
            for k in 1..=n {
                let expected = k <= 3 || k + 1 >= n;
                assert_eq!(
                    choose_mode(k, n) == GenerationMode::Exhaustive,
                    expected,
                    "k = {k}, n = {n}"
                );
            }
        }
    }
}
