//! Stop-word language guesser for en, es, pt, fr, de, it.
//!
//! Only answers when one language clearly dominates; short or mixed text is
//! undetermined and never fails validation.

const MIN_TOKENS: usize = 3;
const MIN_HITS: usize = 2;

const STOP_WORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "of", "to", "in", "it", "you", "that", "with", "for",
            "this", "was", "what", "have", "be", "on", "at", "your", "my", "i", "do", "does",
            "not", "an", "would", "like", "please", "can", "where", "how", "we", "they", "she",
            "he",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "de", "que", "y", "en", "un", "una", "es", "por", "con",
            "para", "no", "se", "su", "al", "lo", "como", "más", "pero", "muy", "yo", "tú",
            "está", "estoy", "qué", "del", "me", "mi", "hay", "son", "usted",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "as", "de", "que", "e", "em", "um", "uma", "é", "por", "com", "para",
            "não", "se", "do", "da", "dos", "das", "no", "na", "você", "eu", "muito", "está",
            "estou", "são", "mas", "isso", "meu", "minha",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "de", "des", "et", "est", "un", "une", "en", "que", "qui", "pour",
            "pas", "je", "vous", "il", "elle", "nous", "ce", "dans", "sur", "au", "du", "avec",
            "mais", "très", "suis",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "ein", "eine", "nicht", "ich", "du", "sie", "es",
            "mit", "für", "auf", "zu", "den", "dem", "von", "sind", "wir", "bitte", "sehr",
            "auch",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "la", "gli", "le", "di", "che", "e", "è", "un", "una", "per", "non",
            "sono", "con", "del", "della", "mi", "ti", "io", "tu", "molto", "ma", "questo",
            "come",
        ],
    ),
];

/// Best-guess ISO 639-1 code, or `None` when the text is too short or ambiguous.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < MIN_TOKENS {
        return None;
    }

    let mut scores: Vec<(&'static str, usize)> = STOP_WORDS
        .iter()
        .map(|(code, words)| {
            let hits = tokens.iter().filter(|t| words.contains(t)).count();
            (*code, hits)
        })
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (best, best_hits) = scores[0];
    let runner_up = scores.get(1).map_or(0, |s| s.1);
    if best_hits < MIN_HITS || best_hits == runner_up || best_hits * 5 < tokens.len() {
        return None;
    }
    Some(best)
}
