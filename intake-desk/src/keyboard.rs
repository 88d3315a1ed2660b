//! Keyboard command decoder
//!
//! Input events are decoded into [`Command`]s without touching any state;
//! the desk controller decides what a command does to the current view.

use intake_common::model::SubmissionStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Up,
    Down,
    Enter,
    Escape,
    Delete,
}

/// One key press with its modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    pub key: Key,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
}

impl KeyInput {
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            shift: false,
        }
    }

    pub fn ctrl(c: char) -> Self {
        Self {
            key: Key::Char(c),
            ctrl: true,
            shift: false,
        }
    }

    pub fn shift(c: char) -> Self {
        Self {
            key: Key::Char(c),
            ctrl: false,
            shift: true,
        }
    }
}

impl From<char> for KeyInput {
    fn from(c: char) -> Self {
        Self::plain(Key::Char(c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command", content = "status")]
pub enum Command {
    NavigateDown,
    NavigateUp,
    Open,
    Close,
    ToggleSelection,
    SelectAll,
    MarkStatus(SubmissionStatus),
    Delete,
}

/// Map a key press to a command; unbound keys yield `None`
pub fn decode(input: KeyInput) -> Option<Command> {
    let KeyInput { key, ctrl, shift } = input;
    if ctrl {
        return match key {
            Key::Char(c) if c.eq_ignore_ascii_case(&'a') => Some(Command::SelectAll),
            _ => None,
        };
    }

    let command = match key {
        Key::Down => Command::NavigateDown,
        Key::Up => Command::NavigateUp,
        Key::Enter => Command::Open,
        Key::Escape => Command::Close,
        Key::Delete => Command::Delete,
        Key::Char(c) => {
            // Shift+D is delete; other letters ignore shift and case
            if shift || c.is_ascii_uppercase() {
                return c.eq_ignore_ascii_case(&'d').then_some(Command::Delete);
            }
            match c {
                'j' => Command::NavigateDown,
                'k' => Command::NavigateUp,
                'o' => Command::Open,
                'x' | ' ' => Command::ToggleSelection,
                'n' => Command::MarkStatus(SubmissionStatus::New),
                'i' => Command::MarkStatus(SubmissionStatus::InProgress),
                'r' => Command::MarkStatus(SubmissionStatus::Resolved),
                'a' => Command::MarkStatus(SubmissionStatus::Archived),
                _ => return None,
            }
        }
    };
    Some(command)
}
