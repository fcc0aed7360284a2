//! Title decoration parsing and canonical normalization
//!
//! Tracklist titles carry decorations that are not part of the song name:
//! `Control [Viper]`, `Levels (Avicii by Avicii Remix)`, `Song - Extended Mix`,
//! `Song feat. Someone`. `parse` pulls those apart; `normalize` produces the
//! canonical search key used for fuzzy comparison.

use super::vocabulary::{
    is_known_label, is_remix_keyword, ABBREVIATIONS, NON_REMIX_MARKERS, QUALIFIERS,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

// ============================================================================
// Patterns
// ============================================================================

/// `[...]` groups
static BRACKET_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]*)\]").unwrap());

/// `(...)` groups
static PAREN_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]*)\)").unwrap());

/// `Title - Name Remix`, `Title - Extended Mix`
static TRAILING_REMIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+[-–—]\s+([^-–—]*?\b(?:remix|rmx|mix|edit|re-edit|rework|bootleg|dub|vip|refix|flip))\s*$",
    )
    .unwrap()
});

/// `Title feat. Someone` without brackets
static TRAILING_FEAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+(.+)$").unwrap());

static LIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[\(\[]\s*live\b|\s[-–—]\s*live\b|\blive\s+(?:at|from|in)\b)").unwrap()
});

static COVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[\(\[][^\)\]]*\bcover\b|\s[-–—]\s*[^-–—]*\bcover\b)").unwrap()
});

static MASHUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmash[\s-]?up\b").unwrap());

/// Separators between several credited names. `&` is kept: many acts contain it.
static NAME_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*,\s*|\s+x\s+|\s+vs\.?\s+").unwrap());

const FEATURE_MARKERS: &[&str] = &["feat", "ft", "featuring", "with"];

/// Words removed from the end of remix info to leave the remixer name
const REMIX_TAIL_WORDS: &[&str] = &[
    "radio", "club", "original", "album", "single", "short", "long", "a", "cappella",
];

/// Normalization passes before giving up on reaching a fixed point
const MAX_NORMALIZE_PASSES: usize = 8;

// ============================================================================
// Types
// ============================================================================

/// Kind of version a decoration describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemixType {
    Remix,
    Extended,
    Radio,
    Club,
    Vip,
    Instrumental,
    Acappella,
    Edit,
    Rework,
    Bootleg,
    Dub,
    Original,
}

/// A raw title split into its parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTitle {
    /// Input as given
    pub original: String,
    /// Song name with decorations removed
    pub title: String,
    /// `normalize(title)`
    pub normalized: String,
    /// Label named in a bracketed decoration
    pub label_hint: Option<String>,
    /// Raw remix/version decoration
    pub remix_info: Option<String>,
    pub remix_type: Option<RemixType>,
    pub is_remix: bool,
    pub remixers: Vec<String>,
    /// Featured artists named in the title
    pub featured: Vec<String>,
    pub is_mashup: bool,
    pub is_live: bool,
    pub is_cover: bool,
}

// ============================================================================
// Parsing
// ============================================================================

/// Split a raw title into song name, label hint, remix info and flags
///
/// Priority: bracketed label hint, then bracketed or parenthesized remix info,
/// then a trailing unbracketed `- Name Remix`.
pub fn parse(raw: &str) -> ParsedTitle {
    let original = raw.trim().to_string();
    let mut label_hint: Option<String> = None;
    let mut remix_info: Option<String> = None;
    let mut featured: Vec<String> = Vec::new();

    // Square brackets: label first, else remix info, else dropped
    for caps in BRACKET_GROUP.captures_iter(&original) {
        let inner = caps[1].trim();
        if inner.is_empty() {
            continue;
        }
        if label_hint.is_none() && is_known_label(inner) {
            label_hint = Some(inner.to_string());
        } else if remix_info.is_none() && contains_remix_keyword(inner) {
            remix_info = Some(inner.to_string());
        }
    }
    let working = BRACKET_GROUP.replace_all(&original, " ").into_owned();

    // Parentheses: feature, live and producer credits are never remix info;
    // other unrecognized groups stay part of the title ("Song (Part 2)")
    let working = PAREN_GROUP
        .replace_all(&working, |caps: &Captures| {
            let inner = caps[1].trim();
            let first = first_word(inner);
            if FEATURE_MARKERS.contains(&first.as_str()) {
                let rest = inner[inner.find(char::is_whitespace).unwrap_or(inner.len())..].trim();
                featured.extend(split_names(rest));
                " ".to_string()
            } else if NON_REMIX_MARKERS.contains(&first.as_str()) {
                " ".to_string()
            } else if contains_remix_keyword(inner) {
                if remix_info.is_none() {
                    remix_info = Some(inner.to_string());
                }
                " ".to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();

    let mut working = working;
    if remix_info.is_none() {
        if let Some(caps) = TRAILING_REMIX.captures(&working) {
            let start = caps.get(0).map_or(working.len(), |m| m.start());
            remix_info = Some(caps[1].trim().to_string());
            working.truncate(start);
        }
    }

    if let Some(caps) = TRAILING_FEAT.captures(&working) {
        let start = caps.get(0).map_or(working.len(), |m| m.start());
        featured.extend(split_names(&caps[1]));
        working.truncate(start);
    }

    let mut title = clean_display(&working);
    if title.is_empty() {
        title = clean_display(&original);
    }

    let (remix_type, remixers) = match remix_info.as_deref() {
        Some(info) => {
            let (kind, names) = classify_remix(info);
            (Some(kind), names)
        }
        None => (None, Vec::new()),
    };
    let is_remix = match remix_type {
        None | Some(RemixType::Original) => false,
        Some(RemixType::Extended)
        | Some(RemixType::Radio)
        | Some(RemixType::Instrumental)
        | Some(RemixType::Acappella) => !remixers.is_empty(),
        Some(_) => true,
    };

    let normalized = normalize(&title);
    ParsedTitle {
        is_mashup: MASHUP.is_match(&original),
        is_live: LIVE.is_match(&original),
        is_cover: COVER.is_match(&original),
        original,
        title,
        normalized,
        label_hint,
        remix_info,
        remix_type,
        is_remix,
        remixers,
        featured,
    }
}

fn first_word(text: &str) -> String {
    text.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('.')
        .to_lowercase()
}

fn contains_remix_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("a cappella") || lower.split_whitespace().any(is_remix_keyword)
}

fn split_names(text: &str) -> Vec<String> {
    NAME_SEPARATOR
        .split(text.trim())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

fn clean_display(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == '-' || c == '–' || c == '—' || c.is_whitespace())
        .to_string()
}

/// Sub-type and remixer names for a remix/version decoration
pub fn classify_remix(info: &str) -> (RemixType, Vec<String>) {
    let lower = info.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .collect();
    let has = |w: &str| words.contains(&w);

    if lower.contains("original mix") || lower.trim() == "original" {
        return (RemixType::Original, Vec::new());
    }

    let kind = if has("vip") {
        RemixType::Vip
    } else if has("bootleg") {
        RemixType::Bootleg
    } else if has("rework") || has("remake") {
        RemixType::Rework
    } else if has("acappella") || has("acapella") || lower.contains("a cappella") {
        RemixType::Acappella
    } else if has("instrumental") {
        RemixType::Instrumental
    } else if has("dub") {
        RemixType::Dub
    } else if has("extended") {
        RemixType::Extended
    } else if has("radio") {
        RemixType::Radio
    } else if has("club") {
        RemixType::Club
    } else if has("remix") || has("rmx") || has("refix") || has("flip") || has("mix") {
        RemixType::Remix
    } else if has("edit") || has("re-edit") || has("reedit") {
        RemixType::Edit
    } else {
        // "Album Version" and similar
        RemixType::Original
    };

    if kind == RemixType::Original {
        return (kind, Vec::new());
    }

    // Drop trailing keywords, keep the name in its original case
    let mut parts: Vec<&str> = info.split_whitespace().collect();
    while let Some(last) = parts.last() {
        let lw = last.to_lowercase();
        let lw = lw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
        if is_remix_keyword(lw) || REMIX_TAIL_WORDS.contains(&lw) {
            parts.pop();
        } else {
            break;
        }
    }
    let name = parts.join(" ");
    (kind, split_names(&name))
}

// ============================================================================
// Normalization
// ============================================================================

/// Canonical search key
///
/// Lowercases, expands abbreviations, strips trailing qualifiers and reduces
/// everything that is not alphanumeric to single spaces. Idempotent:
/// `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let mut current = normalize_once(text);
    for _ in 0..MAX_NORMALIZE_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(text: &str) -> String {
    let lowered = text.to_lowercase().replace('&', " and ");
    let spaced: String = lowered
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<String> = spaced.split_whitespace().map(expand_abbreviation).collect();
    strip_trailing_qualifiers(&mut tokens);
    tokens.join(" ")
}

fn expand_abbreviation(token: &str) -> String {
    ABBREVIATIONS
        .iter()
        .find(|(short, _)| *short == token)
        .map_or_else(|| token.to_string(), |(_, long)| long.to_string())
}

/// Remove qualifier phrases from the end, never emptying the title
fn strip_trailing_qualifiers(tokens: &mut Vec<String>) {
    loop {
        let matched = QUALIFIERS.iter().find(|phrase| {
            phrase.len() < tokens.len()
                && tokens[tokens.len() - phrase.len()..]
                    .iter()
                    .zip(phrase.iter())
                    .all(|(t, p)| t == p)
        });
        match matched {
            Some(phrase) => tokens.truncate(tokens.len() - phrase.len()),
            None => break,
        }
    }
}
