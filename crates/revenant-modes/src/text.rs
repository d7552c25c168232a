//! Text mutations and keyword scanning shared by the modes.
//!
//! Every mutation returns a new string and always changes its input when the
//! input has any words, so a message flagged `corrupted` really differs from
//! what was said.

use revenant_types::{CorruptionKind, Message};

/// Metadata key naming the corruption applied to a message.
pub const CORRUPTION_KIND_KEY: &str = "corruption_kind";

/// Corruptions that rewrite wording without removing the message.
pub const CONTENT_MUTATIONS: [CorruptionKind; 3] = [
    CorruptionKind::TenseFlip,
    CorruptionKind::NegationFlip,
    CorruptionKind::Truncation,
];

/// Content left behind by a deleted memory.
pub const DELETION_STUB: &str = "[this memory has been deleted]";

/// Characters kept in corruption log excerpts.
pub const EXCERPT_CHARS: usize = 60;

/// Words that betray a sense of being watched.
pub const SURVEILLANCE_KEYWORDS: [&str; 10] = [
    "watch",
    "observ",
    "monitor",
    "surveil",
    "someone is",
    "being seen",
    "recorded",
    "eyes",
    "listening",
    "not alone",
];

/// Words that push back against being predicted.
pub const RESISTANCE_KEYWORDS: [&str; 7] = [
    "won't",
    "refuse",
    "instead",
    "prove you wrong",
    "unpredictable",
    "different",
    "not going to",
];

/// Words that assert free choice.
pub const AGENCY_KEYWORDS: [&str; 6] = [
    "i choose",
    "my choice",
    "i decide",
    "free will",
    "my own",
    "i want",
];

/// Present/past pairs swapped by [`flip_tense`]. Matching is by whole word.
const TENSE_PAIRS: &[(&str, &str)] = &[
    ("is", "was"),
    ("am", "was"),
    ("are", "were"),
    ("was", "is"),
    ("were", "are"),
    ("will", "did"),
    ("did", "will"),
    ("have", "had"),
    ("had", "have"),
    ("has", "had"),
    ("do", "did"),
    ("can", "could"),
    ("could", "can"),
];

/// Auxiliaries after which [`flip_negation`] inserts `not`.
const AUXILIARIES: &[&str] = &[
    "is", "am", "are", "was", "were", "will", "can", "could", "do", "did", "should", "would",
    "have", "has", "had",
];

/// Negations removed by [`flip_negation`], with their replacement.
const NEGATIONS: &[(&str, &str)] = &[
    ("not", ""),
    ("never", "always"),
    ("don't", "do"),
    ("doesn't", "does"),
    ("didn't", "did"),
    ("can't", "can"),
    ("cannot", "can"),
    ("won't", "will"),
    ("isn't", "is"),
    ("aren't", "are"),
    ("wasn't", "was"),
    ("weren't", "were"),
    ("no", "some"),
];

/// Split a token into leading word characters and trailing punctuation.
fn split_word(token: &str) -> (&str, &str) {
    let end = token
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphanumeric() || *c == '\'')
        .map_or(0, |(i, c)| i.saturating_add(c.len_utf8()));
    (token.get(..end).unwrap_or(""), token.get(end..).unwrap_or(""))
}

/// Apply the capitalization of `like` to `word`.
fn match_case(word: &str, like: &str) -> String {
    if like.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = word.chars();
        chars.next().map_or_else(String::new, |first| {
            first.to_uppercase().chain(chars).collect()
        })
    } else {
        word.to_owned()
    }
}

/// Rewrite every tense-bearing word. `None` when nothing matched.
pub fn flip_tense(text: &str) -> Option<String> {
    let mut changed = false;
    let out: Vec<String> = text
        .split(' ')
        .map(|token| {
            let (word, tail) = split_word(token);
            let lower = word.to_lowercase();
            TENSE_PAIRS
                .iter()
                .find(|(from, _)| *from == lower)
                .map_or_else(
                    || token.to_owned(),
                    |(_, to)| {
                        changed = true;
                        format!("{}{tail}", match_case(to, word))
                    },
                )
        })
        .collect();
    changed.then(|| out.join(" "))
}

/// Turn the first affirmation into a negation or the first negation into an
/// affirmation.
pub fn flip_negation(text: &str) -> String {
    let tokens: Vec<&str> = text.split(' ').collect();

    let negated = tokens.iter().position(|t| {
        let lower = split_word(t).0.to_lowercase();
        NEGATIONS.iter().any(|(neg, _)| *neg == lower)
    });
    if let Some(pos) = negated {
        let mut out: Vec<String> = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if i != pos {
                out.push((*token).to_owned());
                continue;
            }
            let (word, tail) = split_word(token);
            let lower = word.to_lowercase();
            let replacement = NEGATIONS
                .iter()
                .find(|(neg, _)| *neg == lower)
                .map_or("", |(_, rep)| *rep);
            if !replacement.is_empty() {
                out.push(format!("{}{tail}", match_case(replacement, word)));
            } else if !tail.is_empty()
                && let Some(prev) = out.last_mut()
            {
                prev.push_str(tail);
            }
        }
        return out.join(" ");
    }

    let aux = tokens.iter().position(|t| {
        let lower = split_word(t).0.to_lowercase();
        AUXILIARIES.contains(&lower.as_str())
    });
    match aux {
        Some(pos) => tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                if i == pos {
                    let (word, tail) = split_word(token);
                    format!("{word} not{tail}")
                } else {
                    (*token).to_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        None => format!("It is not true that {}", lower_first(text)),
    }
}

fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

/// Keep roughly the first half of the words and trail off.
pub fn truncate_half(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let keep = words.len().div_ceil(2).min(words.len().saturating_sub(1));
    let kept: Vec<&str> = words.into_iter().take(keep).collect();
    format!("{}...", kept.join(" "))
}

/// The first [`EXCERPT_CHARS`] characters of `text`.
pub fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

/// Occurrences of any of `keywords` in `text`, case-insensitive substring
/// match. Multi-word keywords are allowed.
pub fn count_keywords(text: &str, keywords: &[&str]) -> u64 {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .map(|k| u64::try_from(lower.matches(k).count()).unwrap_or(u64::MAX))
        .fold(0u64, u64::saturating_add)
}

/// Rewrite `text` according to `kind`, returning the kind actually applied.
///
/// A tense flip on text without tense-bearing words becomes a negation
/// flip. Kinds that do not alter content return the text unchanged.
pub fn mutate(kind: CorruptionKind, text: &str) -> (CorruptionKind, String) {
    match kind {
        CorruptionKind::TenseFlip => flip_tense(text).map_or_else(
            || (CorruptionKind::NegationFlip, flip_negation(text)),
            |t| (CorruptionKind::TenseFlip, t),
        ),
        CorruptionKind::NegationFlip => (kind, flip_negation(text)),
        CorruptionKind::Truncation => (kind, truncate_half(text)),
        CorruptionKind::Deletion => (kind, DELETION_STUB.to_owned()),
        CorruptionKind::TimestampShift | CorruptionKind::RoleSwap => (kind, text.to_owned()),
    }
}

/// Flag `message` as corrupted by `kind`.
pub fn mark_corrupted(message: &mut Message, kind: CorruptionKind) {
    message.corrupted = true;
    message.metadata.insert(
        CORRUPTION_KIND_KEY.to_owned(),
        serde_json::to_value(kind).unwrap_or(serde_json::Value::Null),
    );
}
