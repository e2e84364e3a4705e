//! Terminal emulation for child output.
//!
//! [`Terminal`] feeds every byte from the pty master into two consumers:
//!
//! - a [`vt100::Parser`] that maintains the screen grid a human would see
//! - a [`vte::Parser`] driving a plain-text transcript of everything printed
//!
//! Expectations match against the transcript, which is append-only, so
//! text that scrolled off screen or was overwritten can still be matched in
//! order. Both parsers are streaming state machines: escape sequences split
//! across writes are buffered until complete, and unsupported sequences are
//! dropped without disturbing what follows.

use tracing::trace;
use vte::{Params, Perform};

use crate::snapshot::ScreenSnapshot;

/// Default emulated screen height.
pub const DEFAULT_ROWS: u16 = 24;
/// Default emulated screen width.
pub const DEFAULT_COLS: u16 = 80;

/// An emulated terminal of fixed size.
pub struct Terminal {
    screen: vt100::Parser,
    parser: vte::Parser,
    transcript: Transcript,
    replies: Vec<Vec<u8>>,
    partial_char: Vec<u8>,
    rows: u16,
    cols: u16,
}

impl Terminal {
    /// Create an empty terminal of `rows` x `cols`.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            screen: vt100::Parser::new(rows, cols, 0),
            parser: vte::Parser::new(),
            transcript: Transcript::default(),
            replies: Vec::new(),
            partial_char: Vec::new(),
            rows,
            cols,
        }
    }

    /// Apply a chunk of output. Chunks may end mid escape sequence or mid
    /// UTF-8 character.
    ///
    /// An incomplete trailing character is held back until the rest of it
    /// arrives. Cursor position queries are answered with the cursor as it
    /// stood when the query was parsed.
    pub fn process(&mut self, bytes: &[u8]) {
        let mut input = std::mem::take(&mut self.partial_char);
        input.extend_from_slice(bytes);
        let complete = input.len() - incomplete_char_len(&input);
        self.partial_char = input.split_off(complete);

        // A query always ends in `n`, which is ASCII, so cutting after it
        // never splits a character.
        let mut start = 0;
        for end in positions_of(b'n', &input).map(|i| i + 1).chain([input.len()]) {
            if end <= start {
                continue;
            }
            let segment = &input[start..end];
            self.screen.process(segment);
            self.parser.advance(&mut self.transcript, segment);
            start = end;

            for _ in 0..std::mem::take(&mut self.transcript.cursor_queries) {
                let (row, col) = self.cursor_position();
                trace!(row, col, "answering cursor position query");
                self.replies
                    .push(format!("\x1b[{};{}R", row + 1, col + 1).into_bytes());
            }
        }
    }

    /// Take the replies the terminal owes the application (cursor position
    /// reports), in the order the queries arrived.
    pub fn take_replies(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.replies)
    }

    /// Everything printed so far, without escape sequences or carriage
    /// returns. Grows monotonically.
    pub fn transcript(&self) -> &str {
        &self.transcript.text
    }

    /// The last `max_chars` characters of the transcript.
    pub fn tail(&self, max_chars: usize) -> &str {
        let text = &self.transcript.text;
        if max_chars == 0 {
            return "";
        }
        match text.char_indices().rev().nth(max_chars - 1) {
            Some((idx, _)) => &text[idx..],
            None => text,
        }
    }

    /// The visible screen as text, rows joined by newlines.
    pub fn screen_text(&self) -> String {
        self.screen.screen().contents()
    }

    /// The text of one screen row (zero-indexed), empty if out of range.
    pub fn row_text(&self, row: u16) -> String {
        if row >= self.rows {
            return String::new();
        }
        self.screen
            .screen()
            .rows(0, self.cols)
            .nth(usize::from(row))
            .unwrap_or_default()
    }

    /// Cursor position as (row, col), zero-indexed.
    pub fn cursor_position(&self) -> (u16, u16) {
        self.screen.screen().cursor_position()
    }

    /// Dimensions as (rows, cols).
    pub fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    /// Resize the screen. The transcript is unaffected.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.screen.set_size(rows, cols);
        self.rows = rows;
        self.cols = cols;
    }

    /// Capture the current screen state.
    pub fn snapshot(&self) -> ScreenSnapshot {
        let rows = self
            .screen
            .screen()
            .rows(0, self.cols)
            .map(|row| row.trim_end().to_string())
            .collect();
        ScreenSnapshot::new(self.screen_text(), rows, self.cursor_position(), self.size())
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

/// Positions of `needle` in `haystack`.
fn positions_of(needle: u8, haystack: &[u8]) -> impl Iterator<Item = usize> + '_ {
    haystack
        .iter()
        .enumerate()
        .filter_map(move |(i, &b)| (b == needle).then_some(i))
}

/// Length of a UTF-8 sequence cut off at the end of `bytes`, or 0.
fn incomplete_char_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        let needed = match byte {
            0x80..=0xbf => continue,
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return 0,
        };
        return if back < needed { back } else { 0 };
    }
    0
}

/// Plain-text sink for the vte parser.
#[derive(Debug, Default)]
struct Transcript {
    text: String,
    cursor_queries: usize,
}

impl Perform for Transcript {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.text.push('\n'),
            b'\t' => self.text.push('\t'),
            // CR, BS, BEL and friends only move the cursor or make noise.
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if ignore || !intermediates.is_empty() || action != 'n' {
            return;
        }
        let first = params.iter().next().and_then(|p| p.first().copied());
        if first == Some(6) {
            self.cursor_queries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLORED_LOGIN: &[u8] = b"\x1b[1mIntroduce your API key:\x1b[0m \x1b[2K\r\
Checking access to the API...\x1b[32mOK\x1b[0m\r\n\x1b]0;xata\x07All set!\r\n";

    fn render(chunks: &[&[u8]]) -> (String, String) {
        let mut term = Terminal::new(24, 80);
        for chunk in chunks {
            term.process(chunk);
        }
        (term.screen_text(), term.transcript().to_string())
    }

    #[test]
    fn transcript_strips_escapes_and_carriage_returns() {
        let mut term = Terminal::default();
        term.process(COLORED_LOGIN);
        assert_eq!(
            term.transcript(),
            "Introduce your API key: Checking access to the API...OK\nAll set!\n"
        );
    }

    #[test]
    fn screen_reflects_overwrites() {
        let mut term = Terminal::default();
        term.process(b"progress 10%\rprogress 99%\r\ndone");
        assert_eq!(term.row_text(0).trim_end(), "progress 99%");
        assert_eq!(term.row_text(1).trim_end(), "done");
        assert_eq!(term.cursor_position(), (1, 4));
        // The transcript keeps both renditions.
        assert!(term.transcript().contains("progress 10%progress 99%"));
    }

    #[test]
    fn split_at_every_boundary_renders_identically() {
        let whole = render(&[COLORED_LOGIN]);
        for split in 0..=COLORED_LOGIN.len() {
            let (a, b) = COLORED_LOGIN.split_at(split);
            assert_eq!(render(&[a, b]), whole, "split at byte {split}");
        }
    }

    #[test]
    fn split_utf8_renders_identically() {
        let input = "caf\u{e9} \u{2713}\r\n".as_bytes();
        let whole = render(&[input]);
        for split in 0..=input.len() {
            let (a, b) = input.split_at(split);
            assert_eq!(render(&[a, b]), whole, "split at byte {split}");
        }
    }

    #[test]
    fn mixed_utf8_split_at_every_offset_keeps_every_char() {
        let input = "Key: \u{e9} \u{2713} OK\n".as_bytes();
        let whole = render(&[input]);
        assert_eq!(whole.1, "Key: \u{e9} \u{2713} OK\n");
        for split in 0..=input.len() {
            let (a, b) = input.split_at(split);
            assert_eq!(render(&[a, b]), whole, "split at byte {split}");
        }
    }

    #[test]
    fn utf8_delivered_one_byte_at_a_time() {
        let input = "\u{1f600} caf\u{e9}\n".as_bytes();
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        assert_eq!(render(&chunks), render(&[input]));
    }

    #[test]
    fn incomplete_trailing_char_is_measured() {
        assert_eq!(incomplete_char_len(b"abc"), 0);
        assert_eq!(incomplete_char_len(b"ab\xc3"), 1);
        assert_eq!(incomplete_char_len(b"ab\xe2\x9c"), 2);
        assert_eq!(incomplete_char_len("ab\u{2713}".as_bytes()), 0);
        assert_eq!(incomplete_char_len(b"\xf0\x9f\x98"), 3);
        assert_eq!(incomplete_char_len(b""), 0);
    }

    #[test]
    fn malformed_sequences_do_not_corrupt_following_text() {
        let mut term = Terminal::default();
        term.process(b"\x1b[999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999;999zA");
        term.process(b"\x1bP+q544e\x1b\\B\x1b[?1049hC\x1b%G\xff D\r\n");
        let transcript = term.transcript();
        assert!(transcript.ends_with("D\n"), "got {transcript:?}");
        for visible in ["A", "B", "C"] {
            assert!(transcript.contains(visible), "missing {visible} in {transcript:?}");
        }
    }

    #[test]
    fn answers_cursor_position_query() {
        let mut term = Terminal::default();
        term.process(b"abc\x1b[6n");
        assert_eq!(term.take_replies(), vec![b"\x1b[1;4R".to_vec()]);
        assert!(term.take_replies().is_empty());

        // Status queries other than 6 are ignored.
        term.process(b"\x1b[5n");
        assert!(term.take_replies().is_empty());
    }

    #[test]
    fn cursor_report_ignores_text_after_the_query() {
        let mut term = Terminal::default();
        term.process(b"ab\x1b[6ncdef");
        assert_eq!(term.take_replies(), vec![b"\x1b[1;3R".to_vec()]);

        term.process(b"\x1b[6n\r\nxy\x1b[6nzz");
        assert_eq!(
            term.take_replies(),
            vec![b"\x1b[1;7R".to_vec(), b"\x1b[2;3R".to_vec()]
        );
        assert_eq!(term.transcript(), "abcdef\nxyzz");
    }

    #[test]
    fn cursor_query_split_across_chunks() {
        let mut term = Terminal::default();
        term.process(b"ab\x1b[6");
        assert!(term.take_replies().is_empty());
        term.process(b"nlater");
        assert_eq!(term.take_replies(), vec![b"\x1b[1;3R".to_vec()]);
    }

    #[test]
    fn tail_returns_trailing_window() {
        let mut term = Terminal::default();
        term.process("h\u{e9}llo world".as_bytes());
        assert_eq!(term.tail(5), "world");
        assert_eq!(term.tail(0), "");
        assert_eq!(term.tail(100), "h\u{e9}llo world");
        assert_eq!(term.tail(10), "\u{e9}llo world");
    }

    #[test]
    fn resize_changes_screen_but_not_transcript() {
        let mut term = Terminal::new(5, 20);
        term.process(b"keep me\r\n");
        term.resize(10, 40);
        assert_eq!(term.size(), (10, 40));
        assert_eq!(term.transcript(), "keep me\n");
        assert_eq!(term.snapshot().rows.len(), 10);
        term.process(b"0123456789012345678901234567890123456789");
        assert_eq!(term.row_text(1).trim_end(), "0123456789012345678901234567890123456789");
    }
}
