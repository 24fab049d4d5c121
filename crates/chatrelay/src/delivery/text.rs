//! Text shaping for line-oriented chat transports.

const SENTENCE_TERMINATORS: [char; 3] = ['.', '?', '!'];

/// Keep text up to and including the last `.`, `?` or `!`.
///
/// Without any terminator the whole text is one unfinished run and is kept
/// as is.
pub fn strip_unfinished_sentence(text: &str) -> &str {
    match text.rfind(SENTENCE_TERMINATORS) {
        // Terminators are ASCII, so `pos + 1` is a char boundary.
        Some(pos) => text.get(..pos + 1).unwrap_or(text),
        None => text,
    }
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Newlines always start a new chunk. Within a line, words are packed
/// greedily and joined by single spaces; a word longer than `max_chars` is
/// cut into `max_chars`-sized pieces. Blank lines produce no chunk.
pub fn split_for_transport(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();

    for line in text.lines() {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in line.split_whitespace() {
            let word_len = word.chars().count();

            if word_len > max_chars {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                let pieces = hard_split(word, max_chars);
                let count = pieces.len();
                for (i, piece) in pieces.into_iter().enumerate() {
                    if i + 1 == count {
                        current_len = piece.chars().count();
                        current = piece;
                    } else {
                        chunks.push(piece);
                    }
                }
                continue;
            }

            if current.is_empty() {
                current.push_str(word);
                current_len = word_len;
            } else if current_len + 1 + word_len <= max_chars {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + word_len;
            } else {
                chunks.push(std::mem::replace(&mut current, word.to_string()));
                current_len = word_len;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }
    }
    chunks
}

fn hard_split(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_fragment() {
        assert_eq!(strip_unfinished_sentence("Hi there. How are"), "Hi there.");
        assert_eq!(strip_unfinished_sentence("Really? Yes! And th"), "Really? Yes!");
        assert_eq!(strip_unfinished_sentence("Complete."), "Complete.");
    }

    #[test]
    fn no_terminator_keeps_everything() {
        assert_eq!(strip_unfinished_sentence("just a fragment"), "just a fragment");
        assert_eq!(strip_unfinished_sentence(""), "");
    }

    #[test]
    fn nine_hundred_chars_split_into_three_lines() {
        // 90 nine-letter words: 899 chars with spaces.
        let text = vec!["abcdefghi"; 90].join(" ");
        let chunks = split_for_transport(&text, 350);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.chars().count() <= 350);
            assert!(c.split(' ').all(|w| w == "abcdefghi"));
        }
    }

    #[test]
    fn unbroken_text_is_hard_split() {
        let text = "x".repeat(900);
        let chunks = split_for_transport(&text, 350);
        let lens: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lens, vec![350, 350, 200]);
    }

    #[test]
    fn long_word_remainder_packs_with_following_words() {
        let chunks = split_for_transport("aaaaaaa bb", 5);
        assert_eq!(chunks, vec!["aaaaa", "aa bb"]);
    }

    #[test]
    fn newlines_start_new_chunks() {
        let chunks = split_for_transport("one two\n\nthree", 350);
        assert_eq!(chunks, vec!["one two", "three"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunks = split_for_transport("ñññ ñññ", 7);
        assert_eq!(chunks, vec!["ñññ ñññ"]);
    }
}
