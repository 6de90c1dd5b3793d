// src/utils/text.rs

//! Post length accounting.
//!
//! Mirrors the platform's weighting: Latin and general punctuation count 1,
//! everything else (CJK, emoji) counts 2, and any URL counts as a fixed 23.

use unicode_segmentation::UnicodeSegmentation;

/// Weight of a URL regardless of its length.
pub const URL_WEIGHT: usize = 23;

fn char_weight(c: char) -> usize {
    match c as u32 {
        0x0000..=0x10FF | 0x2000..=0x200D | 0x2010..=0x201F | 0x2032..=0x2037 => 1,
        _ => 2,
    }
}

fn grapheme_weight(g: &str) -> usize {
    // A multi-codepoint grapheme (emoji sequence) counts like its first char.
    g.chars().next().map(char_weight).unwrap_or(0)
}

fn is_url(word: &str) -> bool {
    word.starts_with("https://") || word.starts_with("http://")
}

/// Weighted length of `text`.
pub fn weighted_len(text: &str) -> usize {
    text.split_inclusive(char::is_whitespace)
        .map(|word| {
            let trimmed = word.trim_end();
            if is_url(trimmed) {
                URL_WEIGHT + (word.len() - trimmed.len())
            } else {
                word.graphemes(true).map(grapheme_weight).sum()
            }
        })
        .sum()
}
