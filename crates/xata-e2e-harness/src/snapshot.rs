//! Frozen captures of the emulated screen.
//!
//! A [`ScreenSnapshot`] is what gets attached to expectation failures: the
//! visible rows, cursor and size, rendered inside a border so trailing
//! whitespace and the screen edge are obvious in test output.

use std::fmt;

/// The terminal screen at one point in time.
#[derive(Debug, Clone)]
pub struct ScreenSnapshot {
    /// Full screen text, rows joined by newlines.
    pub text: String,
    /// Each row, trailing whitespace trimmed.
    pub rows: Vec<String>,
    /// Cursor as (row, col), zero-indexed.
    pub cursor: (u16, u16),
    /// Dimensions as (rows, cols).
    pub size: (u16, u16),
}

impl ScreenSnapshot {
    pub(crate) fn new(text: String, rows: Vec<String>, cursor: (u16, u16), size: (u16, u16)) -> Self {
        Self {
            text,
            rows,
            cursor,
            size,
        }
    }

    /// Bordered rendering, trailing blank rows omitted.
    pub fn render(&self) -> String {
        let cols = usize::from(self.size.1);
        let border = format!("+{}+", "-".repeat(cols));
        let used = self
            .rows
            .iter()
            .rposition(|row| !row.is_empty())
            .map_or(0, |last| last + 1);

        let mut lines = Vec::with_capacity(used + 3);
        lines.push(border.clone());
        for row in &self.rows[..used] {
            let display: String = row.chars().take(cols).collect();
            let pad = cols.saturating_sub(display.chars().count());
            lines.push(format!("|{display}{}|", " ".repeat(pad)));
        }
        lines.push(border);
        lines.push(format!(
            "cursor=({},{}) size={}x{}",
            self.cursor.0, self.cursor.1, self.size.1, self.size.0
        ));
        lines.join("\n")
    }
}

impl fmt::Display for ScreenSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
