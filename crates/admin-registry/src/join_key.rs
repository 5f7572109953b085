//! Canonical region keys for joining the boundary source with the forecast feed.

use std::collections::BTreeMap;

/// State-name variants seen between INEGI boundaries and the forecast feed.
const MEXICO_REGION_ALIASES: &[(&str, &str)] = &[
    ("Distrito Federal", "Ciudad De Mexico"),
    ("Estado De Mexico", "Mexico"),
    ("Queretaro De Arteaga", "Queretaro"),
    ("Veracruz", "Veracruz De Ignacio De La Llave"),
];

/// Normalizes parent-region names into join keys.
#[derive(Debug, Clone)]
pub struct JoinKeyNormalizer {
    aliases: BTreeMap<String, String>,
}

impl Default for JoinKeyNormalizer {
    fn default() -> Self {
        Self::with_aliases(
            MEXICO_REGION_ALIASES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string())),
        )
    }
}

impl JoinKeyNormalizer {
    /// Aliases are matched against the canonical (folded, title-cased) form.
    pub fn with_aliases(aliases: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            aliases: aliases
                .into_iter()
                .map(|(from, to)| (canonical_form(&from), canonical_form(&to)))
                .collect(),
        }
    }

    pub fn without_aliases() -> Self {
        Self {
            aliases: BTreeMap::new(),
        }
    }

    pub fn normalize(&self, raw: &str) -> String {
        let canon = canonical_form(raw);
        match self.aliases.get(&canon) {
            Some(target) => target.clone(),
            None => canon,
        }
    }
}

/// ASCII-fold, collapse whitespace, capitalize each word.
pub fn canonical_form(raw: &str) -> String {
    let folded = fold_to_ascii(raw);
    folded
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Combining diacritical marks (decomposed accents)
fn is_combining_mark(ch: char) -> bool {
    matches!(ch, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{20D0}'..='\u{20FF}')
}

/// Strip Latin diacritics, precomposed or decomposed.
///
/// Characters with no ASCII form are kept unchanged, so distinct names
/// never collapse into the same key.
pub fn fold_to_ascii(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        if is_combining_mark(ch) {
            continue;
        }
        let replacement = match ch {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => "a",
            'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' | 'Ā' => "A",
            'é' | 'è' | 'ê' | 'ë' | 'ē' => "e",
            'É' | 'È' | 'Ê' | 'Ë' | 'Ē' => "E",
            'í' | 'ì' | 'î' | 'ï' | 'ī' => "i",
            'Í' | 'Ì' | 'Î' | 'Ï' | 'Ī' => "I",
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ō' | 'ø' => "o",
            'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' | 'Ō' | 'Ø' => "O",
            'ú' | 'ù' | 'û' | 'ü' | 'ū' => "u",
            'Ú' | 'Ù' | 'Û' | 'Ü' | 'Ū' => "U",
            'ñ' | 'ń' | 'ň' => "n",
            'Ñ' | 'Ń' | 'Ň' => "N",
            'ç' | 'ć' | 'č' => "c",
            'Ç' | 'Ć' | 'Č' => "C",
            'š' | 'ś' => "s",
            'Š' | 'Ś' => "S",
            'ž' | 'ź' | 'ż' => "z",
            'Ž' | 'Ź' | 'Ż' => "Z",
            'ł' => "l",
            'Ł' => "L",
            'ý' | 'ÿ' => "y",
            'Ý' | 'Ÿ' => "Y",
            'ß' => "ss",
            'æ' => "ae",
            'Æ' => "AE",
            '\u{00A0}' => " ",
            '\u{2018}' | '\u{2019}' => "'",
            '\u{2013}' | '\u{2014}' => "-",
            other => {
                out.push(other);
                continue;
            }
        };
        out.push_str(replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_and_title_case() {
        assert_eq!(canonical_form("  michoacán   de ocampo "), "Michoacan De Ocampo");
        assert_eq!(canonical_form("NUEVO LEÓN"), "Nuevo Leon");
        assert_eq!(canonical_form("Yucatán"), "Yucatan");
    }

    #[test]
    fn test_aliases_apply_after_folding() {
        let n = JoinKeyNormalizer::default();
        assert_eq!(n.normalize("Distrito Federal"), "Ciudad De Mexico");
        assert_eq!(n.normalize("Querétaro de Arteaga"), "Queretaro");
        assert_eq!(n.normalize("Veracruz"), "Veracruz De Ignacio De La Llave");
        assert_eq!(
            n.normalize("Veracruz de Ignacio de la Llave"),
            "Veracruz De Ignacio De La Llave"
        );
        assert_eq!(n.normalize("Estado de México"), "Mexico");
        assert_eq!(n.normalize("México"), "Mexico");
    }

    #[test]
    fn test_no_aliases() {
        let n = JoinKeyNormalizer::without_aliases();
        assert_eq!(n.normalize("Distrito Federal"), "Distrito Federal");
    }

    #[test]
    fn test_decomposed_accents_fold_like_precomposed() {
        assert_eq!(fold_to_ascii("Me\u{0301}xico"), "Mexico");
        assert_eq!(
            canonical_form("Michoaca\u{0301}n"),
            canonical_form("Michoacán")
        );
    }

    #[test]
    fn test_unmapped_characters_are_kept() {
        assert_eq!(fold_to_ascii("Ŧest"), "Ŧest");
        assert_ne!(canonical_form("Ŧlaxcala"), canonical_form("laxcala"));
        assert_eq!(fold_to_ascii("Łódź"), "Lodz");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(JoinKeyNormalizer::default().normalize(""), "");
    }
}
