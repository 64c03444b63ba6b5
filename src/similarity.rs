// 📏 String Similarity - closest-match search with cutoffs
// Normalized Damerau-Levenshtein: one transposed letter costs a single edit

use strsim::normalized_damerau_levenshtein;

/// Similarity in [0, 1]; 1.0 means identical (two empty strings are identical)
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_damerau_levenshtein(a, b)
}

/// Best candidate scoring at or above `cutoff`
///
/// Ties keep the first candidate seen, so callers control the tie-break
/// through iteration order.
pub fn closest_match<'a, I>(query: &str, candidates: I, cutoff: f64) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, f64)> = None;

    for candidate in candidates {
        let score = similarity(query, candidate);
        if score < cutoff {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((candidate, score)),
        }
    }

    best
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_one() {
        assert_eq!(similarity("cartagena", "cartagena"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_transposition_counts_once() {
        // 1 edit over 8 chars
        let s = similarity("envigdao", "envigado");
        assert!((s - 0.875).abs() < 1e-9, "got {}", s);
    }

    #[test]
    fn test_unrelated_is_low() {
        assert!(similarity("tierra lejana", "cali") < 0.3);
    }

    #[test]
    fn test_closest_match_respects_cutoff() {
        let pool = ["Medellín", "Envigado", "Itagüí"];
        assert_eq!(
            closest_match("Envigdao", pool.iter().copied(), 0.8).map(|(m, _)| m),
            Some("Envigado")
        );
        assert!(closest_match("Rionegro", pool.iter().copied(), 0.8).is_none());
    }

    #[test]
    fn test_closest_match_first_found_wins_ties() {
        // Both candidates are one substitution away
        let pool = ["cala", "calo"];
        let (best, _) = closest_match("cali", pool.iter().copied(), 0.5).unwrap();
        assert_eq!(best, "cala");
    }

    #[test]
    fn test_closest_match_empty_pool() {
        let pool: Vec<&str> = Vec::new();
        assert!(closest_match("cali", pool, 0.0).is_none());
    }
}
