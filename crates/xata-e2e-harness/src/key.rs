//! Named keys and their terminal byte encodings.
//!
//! Keys can be built directly or parsed from names such as `enter`,
//! `ctrl-d`, `alt-x`, `f5` or a single character, which is how suite
//! files refer to them.

use std::fmt;
use std::str::FromStr;

/// A key that can be sent to a console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable character.
    Char(char),
    /// Carriage return, as sent by the Enter key.
    Enter,
    Escape,
    Tab,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Delete,
    /// Function key F1 through F12.
    F(u8),
    /// Ctrl plus a letter, e.g. `Ctrl('d')` for end-of-file.
    Ctrl(char),
    /// Alt (meta) plus a character, sent as an ESC prefix.
    Alt(char),
}

impl Key {
    /// The byte sequence a terminal sends for this key.
    ///
    /// Fails for keys no terminal can send, such as `F(13)`.
    pub fn to_bytes(self) -> Result<Vec<u8>, UnencodableKey> {
        Ok(match self {
            Key::Char(c) => c.to_string().into_bytes(),
            Key::Enter => b"\r".to_vec(),
            Key::Escape => b"\x1b".to_vec(),
            Key::Tab => b"\t".to_vec(),
            Key::Backspace => b"\x7f".to_vec(),
            Key::Up => b"\x1b[A".to_vec(),
            Key::Down => b"\x1b[B".to_vec(),
            Key::Right => b"\x1b[C".to_vec(),
            Key::Left => b"\x1b[D".to_vec(),
            Key::Home => b"\x1b[H".to_vec(),
            Key::End => b"\x1b[F".to_vec(),
            Key::PageUp => b"\x1b[5~".to_vec(),
            Key::PageDown => b"\x1b[6~".to_vec(),
            Key::Delete => b"\x1b[3~".to_vec(),
            Key::F(n) => function_key(n).ok_or(UnencodableKey(self))?.to_vec(),
            Key::Ctrl(c) => {
                // Ctrl+A = 0x01 ... Ctrl+Z = 0x1A
                let lower = c.to_ascii_lowercase();
                if lower.is_ascii_lowercase() {
                    vec![lower as u8 - b'a' + 1]
                } else {
                    c.to_string().into_bytes()
                }
            }
            Key::Alt(c) => {
                let mut bytes = vec![0x1b];
                bytes.extend_from_slice(c.to_string().as_bytes());
                bytes
            }
        })
    }
}

fn function_key(n: u8) -> Option<&'static [u8]> {
    Some(match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => return None,
    })
}

/// Error returned when a key has no terminal byte encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("key {0} has no terminal encoding")]
pub struct UnencodableKey(pub Key);

/// Error returned when a key name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key name: {0:?}")]
pub struct ParseKeyError(String);

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(Key::Char(c));
        }

        let lower = s.to_ascii_lowercase();
        let single = |rest: &str| {
            let mut it = rest.chars();
            match (it.next(), it.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        };
        if let Some(c) = lower.strip_prefix("ctrl-").and_then(single) {
            if c.is_ascii_lowercase() {
                return Ok(Key::Ctrl(c));
            }
        }
        if let Some(c) = s.get(4..).filter(|_| lower.starts_with("alt-")).and_then(single) {
            return Ok(Key::Alt(c));
        }
        if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
            if (1..=12).contains(&n) {
                return Ok(Key::F(n));
            }
        }

        Ok(match lower.as_str() {
            "enter" | "return" => Key::Enter,
            "esc" | "escape" => Key::Escape,
            "tab" => Key::Tab,
            "backspace" => Key::Backspace,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            "delete" | "del" => Key::Delete,
            "space" => Key::Char(' '),
            _ => return Err(ParseKeyError(s.to_string())),
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(' ') => write!(f, "space"),
            Key::Char(c) => write!(f, "{c}"),
            Key::F(n) => write!(f, "f{n}"),
            Key::Ctrl(c) => write!(f, "ctrl-{c}"),
            Key::Alt(c) => write!(f, "alt-{c}"),
            other => write!(f, "{}", format!("{other:?}").to_ascii_lowercase()),
        }
    }
}
