// src/extractor/stopwords.rs
// Fixed stop-word set used by token extraction. Pure data, not logic.

pub const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now",
    "old", "see", "two", "way", "who", "boy", "did", "its", "let", "put", "say", "she",
    "too", "use", "that", "with", "this", "have", "from", "they", "will", "would", "there",
    "their", "what", "about", "which", "when", "make", "like", "time", "just", "know",
    "take", "into", "year", "your", "good", "some", "could", "them", "other", "than",
    "then", "look", "only", "come", "over", "think", "also", "back", "after",
    "work", "first", "well", "even", "want", "because", "these", "give", "most", "such",
    "where", "much", "both", "those", "being", "while", "should", "does", "here", "very",
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.iter().any(|s| *s == token)
}
