//! Curated vocabularies used by the title parser and normalizer
//!
//! Keep entries lowercase.

/// Electronic music labels commonly appended to titles as `[Label]`
pub const KNOWN_LABELS: &[&str] = &[
    "anjunabeats",
    "anjunadeep",
    "armada",
    "astralwerks",
    "black butter",
    "blackout",
    "critical",
    "defected",
    "dim mak",
    "dirtybird",
    "drumcode",
    "eatbrain",
    "exit",
    "fabric",
    "hospital",
    "innerground",
    "kompakt",
    "liquicity",
    "mau5trap",
    "medschool",
    "metalheadz",
    "ministry of sound",
    "monstercat",
    "mad decent",
    "never say die",
    "owsla",
    "ram",
    "renegade hardware",
    "shogun audio",
    "spinnin",
    "subtitles",
    "technique",
    "toolroom",
    "ukf",
    "v recordings",
    "viper",
    "warp",
    "xl",
];

/// Words labels carry that do not distinguish them ("Viper Recordings" is "Viper")
pub const LABEL_SUFFIXES: &[&str] = &[
    "recordings",
    "records",
    "recs",
    "music",
    "audio",
    "digital",
    "label",
    "ltd",
];

/// Words that mark bracketed or trailing text as remix/version information
pub const REMIX_KEYWORDS: &[&str] = &[
    "remix",
    "rmx",
    "mix",
    "edit",
    "re-edit",
    "reedit",
    "rework",
    "bootleg",
    "dub",
    "vip",
    "refix",
    "flip",
    "version",
    "extended",
    "instrumental",
    "acappella",
    "acapella",
    "remake",
];

/// Parenthesized prefixes that are never remix information
pub const NON_REMIX_MARKERS: &[&str] = &[
    "feat",
    "ft",
    "featuring",
    "with",
    "live",
    "prod",
    "produced",
];

/// Token expansions applied during normalization
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("pt", "part"),
    ("rmx", "remix"),
    ("ft", "featuring"),
    ("feat", "featuring"),
    ("vs", "versus"),
    ("vol", "volume"),
    ("orig", "original"),
    ("ext", "extended"),
    ("instr", "instrumental"),
];

/// Trailing qualifiers removed during normalization, longest first
pub const QUALIFIERS: &[&[&str]] = &[
    &["original", "mix"],
    &["extended", "mix"],
    &["extended", "version"],
    &["club", "mix"],
    &["radio", "edit"],
    &["radio", "mix"],
    &["album", "version"],
    &["free", "download"],
    &["remastered"],
    &["remaster"],
    &["explicit"],
    &["clean"],
    &["clip"],
];

/// True when `word` (any case) is a remix keyword
pub fn is_remix_keyword(word: &str) -> bool {
    let w = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-').to_lowercase();
    REMIX_KEYWORDS.contains(&w.as_str()) || w == "a cappella"
}

/// Lowercase a label name and drop generic suffix words
pub fn canonical_label(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    while words.len() > 1 && words.last().is_some_and(|w| LABEL_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

/// True when bracketed text names a label from the curated vocabulary
pub fn is_known_label(name: &str) -> bool {
    let lowered = name.to_lowercase();
    let full = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let canonical = canonical_label(name);
    !canonical.is_empty()
        && (KNOWN_LABELS.contains(&canonical.as_str()) || KNOWN_LABELS.contains(&full.as_str()))
}

/// True when two label spellings refer to the same label
pub fn labels_match(a: &str, b: &str) -> bool {
    let a = canonical_label(a);
    let b = canonical_label(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.starts_with(&format!("{} ", b)) || b.starts_with(&format!("{} ", a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_canonicalization() {
        assert_eq!(canonical_label("Viper Recordings"), "viper");
        assert_eq!(canonical_label("Shogun Audio"), "shogun");
        assert_eq!(canonical_label("Music"), "music");
        assert!(is_known_label("VIPER"));
        assert!(is_known_label("Hospital Records"));
        assert!(is_known_label("Shogun Audio"));
        assert!(is_known_label("V Recordings"));
        assert!(!is_known_label("Free Download"));
    }

    #[test]
    fn test_labels_match() {
        assert!(labels_match("Viper", "Viper Recordings"));
        assert!(labels_match("RAM", "Ram Records"));
        assert!(!labels_match("Viper", "Hospital Records"));
        assert!(!labels_match("", "Hospital"));
    }

    #[test]
    fn test_remix_keywords() {
        assert!(is_remix_keyword("Remix"));
        assert!(is_remix_keyword("VIP"));
        assert!(is_remix_keyword("re-edit"));
        assert!(!is_remix_keyword("Levels"));
    }
}
