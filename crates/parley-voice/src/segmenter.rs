//! Phrase segmentation of the agent's reply stream.
//!
//! Synthesis has a fixed per-call overhead, so tokens are buffered into
//! phrases: a sentence when the reply provides one, otherwise a run of whole
//! words once the buffer is long enough. Nothing is ever dropped or
//! rewritten; joining every emitted phrase gives back the reply text.

use crate::config::SegmenterConfig;
use parley_types::Phrase;

/// Characters that end a sentence.
const TERMINATORS: &[char] = &['.', '!', '?', ';', ':', '…', '。', '！', '？', '；', '：'];

/// Closing characters allowed after a terminator (`"Done."` or `(yes!)`).
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '”', '’', '」', '』', '）'];

/// Multiple of the minimum length at which a buffer with no word boundary
/// is emitted whole.
const HARD_CAP_FACTOR: usize = 4;

#[derive(Debug)]
pub struct PhraseSegmenter {
    min_chars: usize,
    buffer: String,
    next_index: usize,
}

impl PhraseSegmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            min_chars: config.min_phrase_chars.max(1),
            buffer: String::new(),
            next_index: 0,
        }
    }

    /// Appends a reply fragment, returning a phrase if one is complete.
    pub fn add(&mut self, token: &str) -> Option<Phrase> {
        self.buffer.push_str(token);
        if self.buffer.trim().is_empty() {
            return None;
        }

        if ends_sentence(&self.buffer) {
            let text = std::mem::take(&mut self.buffer);
            return self.emit(text);
        }

        let chars = self.buffer.chars().count();
        if chars < self.min_chars {
            return None;
        }

        match last_boundary(&self.buffer) {
            Some(cut) if !self.buffer[..cut].trim().is_empty() => {
                let rest = self.buffer.split_off(cut);
                let text = std::mem::replace(&mut self.buffer, rest);
                self.emit(text)
            }
            _ if chars >= self.min_chars * HARD_CAP_FACTOR => {
                let text = std::mem::take(&mut self.buffer);
                self.emit(text)
            }
            _ => None,
        }
    }

    /// Emits whatever remains at the end of the reply.
    ///
    /// A remainder of only whitespace is discarded.
    pub fn flush(&mut self) -> Option<Phrase> {
        let text = std::mem::take(&mut self.buffer);
        self.emit(text)
    }

    /// Text buffered but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn emit(&mut self, text: String) -> Option<Phrase> {
        let phrase = Phrase::new(self.next_index, text)?;
        self.next_index += 1;
        Some(phrase)
    }
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(CLOSERS)
        .ends_with(TERMINATORS)
}

/// Byte offset just past the last whitespace character.
fn last_boundary(text: &str) -> Option<usize> {
    text.char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(min: usize) -> PhraseSegmenter {
        PhraseSegmenter::new(&SegmenterConfig {
            min_phrase_chars: min,
        })
    }

    fn feed(seg: &mut PhraseSegmenter, tokens: &[&str]) -> Vec<Phrase> {
        let mut out: Vec<Phrase> = tokens.iter().filter_map(|t| seg.add(t)).collect();
        out.extend(seg.flush());
        out
    }

    #[test]
    fn emits_on_sentence_end() {
        let mut seg = segmenter(40);
        assert!(seg.add("Hello").is_none());
        assert!(seg.add(" there").is_none());
        let phrase = seg.add(".").unwrap();
        assert_eq!(phrase.text(), "Hello there.");
        assert_eq!(phrase.index(), 0);
        assert_eq!(seg.pending(), "");
    }

    #[test]
    fn recognises_cjk_and_quoted_terminators() {
        let mut seg = segmenter(40);
        assert_eq!(seg.add("你好。").unwrap().text(), "你好。");
        assert_eq!(seg.add("He said \"stop!\"").unwrap().text(), "He said \"stop!\"");
        assert_eq!(seg.add("好吗？ ").unwrap().index(), 2);
    }

    #[test]
    fn cuts_long_runs_at_word_boundary() {
        let mut seg = segmenter(10);
        assert!(seg.add("one two ").is_none());
        let phrase = seg.add("three fo").unwrap();
        assert_eq!(phrase.text(), "one two three ");
        assert_eq!(seg.pending(), "fo");
    }

    #[test]
    fn never_emits_blank_phrases() {
        let mut seg = segmenter(2);
        assert!(seg.add("   ").is_none());
        assert!(seg.add("\n").is_none());
        assert!(seg.flush().is_none());
    }

    #[test]
    fn unbroken_text_is_emitted_at_hard_cap() {
        let mut seg = segmenter(5);
        assert!(seg.add("abcdefghij").is_none());
        assert_eq!(seg.add("klmnopqrst").unwrap().text(), "abcdefghijklmnopqrst");
    }

    #[test]
    fn concatenation_reconstructs_input() {
        let text = "Sure. The quick brown fox jumps over the lazy dog while the \
                    cat watches; nobody knows why! Numbers like 3.14 appear too, \
                    and 日本語のテキストも。 Finally a closing remark";
        for min in [1, 7, 20, 40, 200] {
            let mut seg = segmenter(min);
            // Tokenise unevenly, including splits inside words.
            let chars: Vec<char> = text.chars().collect();
            let tokens: Vec<String> = chars
                .chunks(3)
                .map(|c| c.iter().collect::<String>())
                .collect();
            let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
            let phrases = feed(&mut seg, &refs);

            let joined: String = phrases.iter().map(Phrase::text).collect();
            assert_eq!(joined, text, "min_phrase_chars = {}", min);
            for (i, p) in phrases.iter().enumerate() {
                assert_eq!(p.index(), i);
                assert!(!p.text().trim().is_empty());
            }
        }
    }
}
