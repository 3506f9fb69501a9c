//! Title normalization for catalog and ranking-database names
//!
//! Library catalog titles carry cataloguing noise the ranking database does
//! not: statements of responsibility ("Catan / Klaus Teuber"), parallel titles
//! in other languages ("Alias = Alias"), generic descriptors as subtitles
//! ("Catan : lautapeli"), and edition or language remarks ("suomenkielinen
//! painos"). Both sides of a comparison go through [`normalize_title`], so the
//! rules must stay symmetric and conservative: a descriptor that names a
//! distinct product (card game, dice game) is kept.

/// Subtitles dropped when they are the whole subtitle
const SUBTITLE_DESCRIPTORS: &[&str] = &[
    "lautapeli",
    "seurapeli",
    "perhepeli",
    "strategiapeli",
    "peli",
    "brädspel",
    "sällskapsspel",
    "spel",
    "board game",
    "the board game",
    "a board game",
    "boardgame",
];

/// Descriptors dropped from the end of the title
const TRAILING_DESCRIPTORS: &[&str] = &["lautapeli", "seurapeli", "brädspel", "sällskapsspel"];

/// Edition and language remarks dropped from the end of a segment
const EDITION_PHRASES: &[&str] = &[
    "suomenkielinen painos",
    "suomenkielinen versio",
    "suomenkielinen",
    "suomalainen versio",
    "suomi versio",
    "suomi",
    "uusi painos",
    "uudistettu painos",
    "nordic edition",
    "nordic version",
    "nordic",
    "finnish edition",
    "finnish version",
    "scandinavian edition",
    "svensk utgåva",
    "revised edition",
    "new edition",
];

/// Normalize a title into a comparison key
///
/// Lowercases, cuts responsibility and parallel-title statements, removes
/// bracketed remarks, drops generic subtitles and edition suffixes, turns
/// punctuation into spaces and collapses whitespace. Returns an empty string
/// only when the title has no alphanumeric content at all.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();

    let mut main = lowered.as_str();
    for separator in [" / ", " = "] {
        if let Some(pos) = main.find(separator) {
            main = &main[..pos];
        }
    }

    let without_brackets = strip_bracketed(main);

    let kept: Vec<String> = without_brackets
        .split(':')
        .enumerate()
        .filter_map(|(i, segment)| {
            let words = strip_edition(&collapse(segment));
            if words.is_empty() {
                return None;
            }
            if i > 0 && SUBTITLE_DESCRIPTORS.contains(&words.as_str()) {
                return None;
            }
            Some(words)
        })
        .collect();

    let mut normalized = strip_trailing(&kept.join(" "), TRAILING_DESCRIPTORS);
    normalized = strip_edition(&normalized);

    if normalized.is_empty() {
        // Everything looked like noise; fall back to the plain key
        collapse(&lowered)
    } else {
        normalized
    }
}

/// Number of words in a normalized title
pub fn word_count(normalized: &str) -> usize {
    normalized.split_whitespace().count()
}

/// Whether `needle` occurs in `haystack` as a contiguous run of whole words
pub fn contains_word_run(haystack: &str, needle: &str) -> bool {
    let hay: Vec<&str> = haystack.split_whitespace().collect();
    let pin: Vec<&str> = needle.split_whitespace().collect();
    if pin.is_empty() || pin.len() > hay.len() {
        return false;
    }
    hay.windows(pin.len()).any(|w| w == pin.as_slice())
}

/// Punctuation to spaces, whitespace collapsed
fn collapse(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_bracketed(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                out.push(' ');
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn strip_trailing(words: &str, phrases: &[&str]) -> String {
    let mut current = words.to_string();
    loop {
        let before = current.len();
        for phrase in phrases {
            if current == *phrase {
                current.clear();
            } else if let Some(rest) = current.strip_suffix(phrase) {
                if rest.ends_with(' ') {
                    current = rest.trim_end().to_string();
                }
            }
        }
        if current.len() == before {
            return current;
        }
    }
}

/// Drop edition remarks, including ordinal editions ("2nd edition", "3 painos")
fn strip_edition(words: &str) -> String {
    let mut current = strip_trailing(words, EDITION_PHRASES);
    loop {
        let tokens: Vec<&str> = current.split_whitespace().collect();
        let n = tokens.len();
        if n >= 2
            && matches!(tokens[n - 1], "edition" | "painos" | "versio" | "utgåva")
            && is_ordinal(tokens[n - 2])
        {
            current = tokens[..n - 2].join(" ");
            current = strip_trailing(&current, EDITION_PHRASES);
        } else {
            return current;
        }
    }
}

fn is_ordinal(token: &str) -> bool {
    let digits = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let suffix = &token[digits.len()..];
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && matches!(suffix, "" | "st" | "nd" | "rd" | "th")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_punctuation() {
        assert_eq!(normalize_title("CATAN"), "catan");
        assert_eq!(normalize_title("Ticket to Ride: Europe"), "ticket to ride europe");
        assert_eq!(normalize_title("  Cities & Knights!  "), "cities knights");
    }

    #[test]
    fn test_responsibility_and_parallel_titles() {
        assert_eq!(normalize_title("Carcassonne / Klaus-Jürgen Wrede"), "carcassonne");
        assert_eq!(normalize_title("Alias : seurapeli = sällskapsspel"), "alias");
    }

    #[test]
    fn test_generic_subtitles_dropped() {
        assert_eq!(normalize_title("Catan : lautapeli"), "catan");
        assert_eq!(normalize_title("Azul : the board game"), "azul");
        assert_eq!(normalize_title("Catan lautapeli"), "catan");
    }

    #[test]
    fn test_product_descriptors_kept() {
        assert_eq!(normalize_title("Catan : korttipeli"), "catan korttipeli");
        assert_eq!(normalize_title("Catan Dice Game"), "catan dice game");
    }

    #[test]
    fn test_edition_remarks_dropped() {
        assert_eq!(normalize_title("Kimble : suomenkielinen painos"), "kimble");
        assert_eq!(normalize_title("Dixit (Nordic edition)"), "dixit");
        assert_eq!(normalize_title("Pandemic 2nd edition"), "pandemic");
        assert_eq!(normalize_title("Afrikan tähti : 3. painos"), "afrikan tähti");
        assert_eq!(normalize_title("Codenames Nordic"), "codenames");
    }

    #[test]
    fn test_finnish_letters_kept() {
        assert_eq!(normalize_title("Hölmölän Häät"), "hölmölän häät");
    }

    #[test]
    fn test_all_noise_falls_back() {
        assert_eq!(normalize_title("Lautapeli"), "lautapeli");
        assert_eq!(normalize_title("?!"), "");
    }

    #[test]
    fn test_word_runs() {
        assert!(contains_word_run("ticket to ride europe", "ticket to ride"));
        assert!(!contains_word_run("ticket to rider", "ticket to ride"));
        assert!(!contains_word_run("catan", "catan cities"));
        assert_eq!(word_count("ticket to ride"), 3);
    }
}
