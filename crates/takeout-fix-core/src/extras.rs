use unicode_normalization::UnicodeNormalization;

/// Localized "edited" suffixes Google appends to derivative images (lowercase)
const EDITED_SUFFIXES: &[&str] = &[
    "-edited",      // EN
    "-effects",     // EN
    "-smile",       // EN
    "-mix",         // EN
    "-edytowane",   // PL
    "-bearbeitet",  // DE
    "-bewerkt",     // NL
    "-編集済み",     // JA
    "-modificato",  // IT
    "-modifié",     // FR
    "-ha editado",  // ES
    "-editat",      // CA
    "-editada",     // PT
    "-redaguota",   // LT
];

/// Strip an "edited" suffix from a stem, returning the original's stem.
/// Edited derivatives have no sidecar of their own.
pub fn strip_edited_suffix(stem: &str) -> Option<String> {
    let normalized: String = stem.nfc().collect();
    let lower = normalized.to_lowercase();
    for suffix in EDITED_SUFFIXES {
        // Byte offsets only line up when lowercasing kept the length
        if lower.len() == normalized.len() && lower.ends_with(suffix) {
            let cut = normalized.len() - suffix.len();
            if cut > 0 && normalized.is_char_boundary(cut) {
                return Some(normalized[..cut].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_edited_suffix() {
        assert_eq!(strip_edited_suffix("IMG_1234-edited").as_deref(), Some("IMG_1234"));
        assert_eq!(strip_edited_suffix("IMG_1234-EDITED").as_deref(), Some("IMG_1234"));
        assert_eq!(strip_edited_suffix("Urlaub-bearbeitet").as_deref(), Some("Urlaub"));
        assert_eq!(strip_edited_suffix("写真-編集済み").as_deref(), Some("写真"));
        assert_eq!(strip_edited_suffix("IMG_1234"), None);
        assert_eq!(strip_edited_suffix("-edited"), None);
    }
}
