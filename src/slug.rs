// 🔤 Slugifier - The key space for every lookup
// "Bogotá D.C." → "bogota d c", "BOGOTA" → "bogota"

use unicode_normalization::UnicodeNormalization;

/// Normalize a place name into its slug
///
/// 1. NFKD-decompose (accents become base letter + combining mark)
/// 2. Drop every non-ASCII code point (this removes the combining marks)
/// 3. Lowercase
/// 4. Anything outside `[a-z0-9 ]` becomes a space
/// 5. Collapse whitespace, trim
///
/// Total and idempotent: `slug(slug(x)) == slug(x)`.
pub fn slug(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| c.is_ascii())
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Slug with the spaces removed
///
/// Lets "Bogotá D.C." and "Bogota DC" compare equal ("bogotadc").
pub fn compact(text: &str) -> String {
    slug(text).chars().filter(|c| *c != ' ').collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_accent_insensitive() {
        assert_eq!(slug("Bogotá"), "bogota");
        assert_eq!(slug("BOGOTA"), "bogota");
        assert_eq!(slug("bogota "), "bogota");
        assert_eq!(slug("Bogotá"), slug("BOGOTA"));
    }

    #[test]
    fn test_punctuation_collapses() {
        assert_eq!(slug("Bogotá  D.C."), "bogota d c");
        assert_eq!(slug("San José del Guaviare"), "san jose del guaviare");
        assert_eq!(slug("  Valle-del_Cauca!! "), "valle del cauca");
    }

    #[test]
    fn test_diaeresis_and_tilde() {
        assert_eq!(slug("Togüí"), "togui");
        assert_eq!(slug("Nariño"), "narino");
        assert_eq!(slug("Togüí"), slug("Toguí"));
    }

    #[test]
    fn test_digits_kept() {
        assert_eq!(slug("Comuna 13"), "comuna 13");
    }

    #[test]
    fn test_empty_and_symbols_only() {
        assert_eq!(slug(""), "");
        assert_eq!(slug("   "), "");
        assert_eq!(slug("--..--"), "");
    }

    #[test]
    fn test_idempotent() {
        for raw in ["Bogotá D.C.", "Cartagena de Indias", "ÑUÑOA", "", "São Paulo", "Ærø"] {
            let once = slug(raw);
            assert_eq!(slug(&once), once, "slug not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_compact() {
        assert_eq!(compact("Bogotá D.C."), "bogotadc");
        assert_eq!(compact("Bogota DC"), "bogotadc");
        assert_eq!(compact("Santiago de Cali"), "santiagodecali");
    }
}
