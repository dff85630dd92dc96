//! Lexicon sentiment over sampled comments

const POSITIVE: &[&str] = &[
    "love", "loved", "amazing", "awesome", "best", "great", "beautiful", "perfect", "funny",
    "cute", "wow", "incredible", "fire", "goat", "iconic", "obsessed", "good", "nice", "lol",
    "helpful", "talented", "queen", "king", "legend",
];

const NEGATIVE: &[&str] = &[
    "hate", "worst", "bad", "boring", "cringe", "fake", "ugly", "terrible", "awful", "stupid",
    "trash", "scam", "annoying", "gross", "disappointed", "flop", "mid", "unfollow", "dislike",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't"];

/// `(positive - negative) / (positive + negative)` over every token, in `[-1, 1]`
///
/// A hit directly after a negation counts for the opposite side. No hits
/// (or no comments) is neutral `0`.
#[must_use]
pub fn sentiment_score(comments: &[String]) -> f64 {
    let mut positive = 0u32;
    let mut negative = 0u32;

    for comment in comments {
        let lowered = comment.to_lowercase();
        let mut negated = false;
        for token in lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|t| !t.is_empty())
        {
            let polarity = if POSITIVE.contains(&token) {
                1
            } else if NEGATIVE.contains(&token) {
                -1
            } else {
                0
            };
            match (polarity, negated) {
                (1, false) | (-1, true) => positive += 1,
                (-1, false) | (1, true) => negative += 1,
                _ => {}
            }
            negated = NEGATIONS.contains(&token);
        }
    }

    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    (f64::from(positive) - f64::from(negative)) / f64::from(total)
}
