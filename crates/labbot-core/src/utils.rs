/// Truncate to `max_len` characters, appending `...` when something was cut.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Fold the Portuguese diacritics users actually type (`mês`, `últimos`, `ação`).
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(510);
        let t = truncate_text(&s, 500);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), 503);
        assert_eq!(truncate_text("curto", 500), "curto");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_text("ação", 4), "ação");
        assert_eq!(truncate_text("ação!", 4), "ação...");
    }

    #[test]
    fn folds_accents() {
        assert_eq!(fold_accents("mês_passado"), "mes_passado");
        assert_eq!(fold_accents("últimas_24_horas"), "ultimas_24_horas");
    }
}
