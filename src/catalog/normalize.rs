use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_]+").unwrap());

// "SINGSTAR", "Singstar", "Sing Star" ... → "SingStar"
static SINGSTAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^sing\s*star\b").unwrap());

// Characters that are unsafe in file names on at least one common filesystem
static UNSAFE_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).unwrap());

/// Normalize a catalog tag value such as a genre or year.
///
/// Underscores become spaces, runs of whitespace collapse, and SHOUTED
/// words are title-cased: `"POP_ROCK"` → `"Pop Rock"`, `"1985"` stays.
pub fn normalize(value: &str) -> String {
    WHITESPACE_RE
        .replace_all(value.trim(), " ")
        .trim()
        .split(' ')
        .map(title_case_shouted)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display name for a disc edition, e.g. `"SINGSTAR_ROCKS"` → `"SingStar Rocks"`.
pub fn pretty_edition(edition: &str) -> String {
    let normalized = normalize(edition);
    SINGSTAR_RE.replace(&normalized, "SingStar").into_owned()
}

/// File-system-safe directory name for a song.
pub fn safe_name(name: &str) -> String {
    let replaced = UNSAFE_FILENAME_RE.replace_all(name, "_");
    let trimmed = replaced.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

fn title_case_shouted(word: &str) -> String {
    let has_lower = word.chars().any(char::is_lowercase);
    let has_upper = word.chars().any(char::is_uppercase);
    if has_lower || !has_upper {
        return word.to_string();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("POP_ROCK"), "Pop Rock");
        assert_eq!(normalize("  Hip   Hop "), "Hip Hop");
        assert_eq!(normalize("1985"), "1985");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_pretty_edition() {
        assert_eq!(pretty_edition("SINGSTAR_ROCKS"), "SingStar Rocks");
        assert_eq!(pretty_edition("Singstar '80s"), "SingStar '80s");
        assert_eq!(pretty_edition("SingStar Pop Hits"), "SingStar Pop Hits");
        assert_eq!(pretty_edition("Karaoke Party"), "Karaoke Party");
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("AC/DC - Thunderstruck"), "AC_DC - Thunderstruck");
        assert_eq!(safe_name("What? - Why: Not*"), "What_ - Why_ Not_");
        assert_eq!(safe_name("Trailing dots..."), "Trailing dots");
        assert_eq!(safe_name("..."), "_");
    }
}
