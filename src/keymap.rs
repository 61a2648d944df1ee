//! Translation from raw hardware key codes to the symbolic names used in
//! device configurations.
//!
//! The table is an immutable value injected into each session rather than a
//! process-wide static, so tests can run against a restricted table.

use std::collections::HashMap;

use evdev::Key;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeymapError {
    /// The hardware reported a code the table does not know. Usually a
    /// configuration/hardware mismatch; the session decides whether this is
    /// fatal (see [`crate::config::UnknownKeyPolicy`]).
    #[error("unknown key code {0}")]
    UnknownKeyCode(u16),
}

/// A key transition as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Down,
    Up,
    Hold,
}

impl KeyState {
    /// Raw evdev key event values: 0 release, 1 press, 2 autorepeat.
    /// Anything else is not a key transition.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Up),
            1 => Some(Self::Down),
            2 => Some(Self::Hold),
            _ => None,
        }
    }
}

/// Immutable lookup table from hardware key codes to symbolic key names.
#[derive(Debug, Clone)]
pub struct KeyMap {
    table: HashMap<u16, &'static str>,
}

impl KeyMap {
    /// Build a table from explicit entries. Later duplicates win.
    pub fn from_entries(entries: impl IntoIterator<Item = (u16, &'static str)>) -> Self {
        Self {
            table: entries.into_iter().collect(),
        }
    }

    /// Translate a raw key code to its symbolic name.
    pub fn translate(&self, code: u16) -> Result<&'static str, KeymapError> {
        self.table
            .get(&code)
            .copied()
            .ok_or(KeymapError::UnknownKeyCode(code))
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::from_entries([
            (Key::KEY_A.code(), "a"),
            (Key::KEY_B.code(), "b"),
            (Key::KEY_C.code(), "c"),
            (Key::KEY_D.code(), "d"),
            (Key::KEY_E.code(), "e"),
            (Key::KEY_F.code(), "f"),
            (Key::KEY_G.code(), "g"),
            (Key::KEY_H.code(), "h"),
            (Key::KEY_I.code(), "i"),
            (Key::KEY_J.code(), "j"),
            (Key::KEY_K.code(), "k"),
            (Key::KEY_L.code(), "l"),
            (Key::KEY_M.code(), "m"),
            (Key::KEY_N.code(), "n"),
            (Key::KEY_O.code(), "o"),
            (Key::KEY_P.code(), "p"),
            (Key::KEY_Q.code(), "q"),
            (Key::KEY_R.code(), "r"),
            (Key::KEY_S.code(), "s"),
            (Key::KEY_T.code(), "t"),
            (Key::KEY_U.code(), "u"),
            (Key::KEY_V.code(), "v"),
            (Key::KEY_W.code(), "w"),
            (Key::KEY_X.code(), "x"),
            (Key::KEY_Y.code(), "y"),
            (Key::KEY_Z.code(), "z"),
            (Key::KEY_0.code(), "0"),
            (Key::KEY_1.code(), "1"),
            (Key::KEY_2.code(), "2"),
            (Key::KEY_3.code(), "3"),
            (Key::KEY_4.code(), "4"),
            (Key::KEY_5.code(), "5"),
            (Key::KEY_6.code(), "6"),
            (Key::KEY_7.code(), "7"),
            (Key::KEY_8.code(), "8"),
            (Key::KEY_9.code(), "9"),
            // Keypad digits share names with the top row so a binding works
            // regardless of which block the hardware reports.
            (Key::KEY_KP0.code(), "0"),
            (Key::KEY_KP1.code(), "1"),
            (Key::KEY_KP2.code(), "2"),
            (Key::KEY_KP3.code(), "3"),
            (Key::KEY_KP4.code(), "4"),
            (Key::KEY_KP5.code(), "5"),
            (Key::KEY_KP6.code(), "6"),
            (Key::KEY_KP7.code(), "7"),
            (Key::KEY_KP8.code(), "8"),
            (Key::KEY_KP9.code(), "9"),
            (Key::KEY_KPENTER.code(), "enter"),
            (Key::KEY_KPPLUS.code(), "plus"),
            (Key::KEY_KPMINUS.code(), "minus"),
            (Key::KEY_KPSLASH.code(), "slash"),
            (Key::KEY_KPASTERISK.code(), "asterisk"),
            (Key::KEY_KPDOT.code(), "dot"),
            (Key::KEY_BACKSPACE.code(), "backspace"),
            (Key::KEY_HOMEPAGE.code(), "homepage"),
            (Key::KEY_MAIL.code(), "mail"),
            (Key::KEY_EMAIL.code(), "mail"),
            (Key::KEY_TAB.code(), "tab"),
            (Key::KEY_CALC.code(), "calc"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translates_known_codes() {
        let keymap = KeyMap::default();
        assert_eq!(keymap.translate(Key::KEY_A.code()), Ok("a"));
        assert_eq!(keymap.translate(Key::KEY_KPENTER.code()), Ok("enter"));
    }

    #[test]
    fn test_keypad_digits_share_names_with_top_row() {
        let keymap = KeyMap::default();
        assert_eq!(keymap.translate(Key::KEY_5.code()), Ok("5"));
        assert_eq!(keymap.translate(Key::KEY_KP5.code()), Ok("5"));
    }

    #[test]
    fn test_unknown_code_is_an_error() {
        let keymap = KeyMap::default();
        assert_eq!(
            keymap.translate(Key::KEY_RESERVED.code()),
            Err(KeymapError::UnknownKeyCode(Key::KEY_RESERVED.code()))
        );
    }

    #[test]
    fn test_restricted_table_only_knows_its_entries() {
        let keymap = KeyMap::from_entries([(Key::KEY_A.code(), "a")]);
        assert_eq!(keymap.translate(Key::KEY_A.code()), Ok("a"));
        assert!(keymap.translate(Key::KEY_B.code()).is_err());
    }

    #[test]
    fn test_key_state_from_raw_value() {
        assert_eq!(KeyState::from_value(0), Some(KeyState::Up));
        assert_eq!(KeyState::from_value(1), Some(KeyState::Down));
        assert_eq!(KeyState::from_value(2), Some(KeyState::Hold));
        assert_eq!(KeyState::from_value(3), None);
        assert_eq!(KeyState::from_value(-1), None);
    }
}
