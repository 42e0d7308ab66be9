//! PS/2 scan codes for the WebMKS key-event channel.
//!
//! These are the legacy PC keyboard set-1 codes, not USB HID usages. Codes
//! above 0xFF are extended keys (0xE0-prefixed on a real keyboard bus),
//! carried here as 16-bit values.

pub const ESCAPE: u16 = 1;
pub const BACKSPACE: u16 = 14;
pub const TAB: u16 = 15;
pub const ENTER: u16 = 28;
pub const LCTRL: u16 = 29;
pub const LSHIFT: u16 = 42;
pub const RSHIFT: u16 = 54;
pub const LALT: u16 = 56;
pub const SPACE: u16 = 57;

pub const KPENTER: u16 = 0x11C;
pub const RCTRL: u16 = 0x11D;
pub const KPSLASH: u16 = 0x135;
pub const RALT: u16 = 0x138;
pub const HOME: u16 = 0x147;
pub const UP: u16 = 0x148;
pub const PAGEUP: u16 = 0x149;
pub const LEFT: u16 = 0x14B;
pub const RIGHT: u16 = 0x14D;
pub const END: u16 = 0x14F;
pub const DOWN: u16 = 0x150;
pub const PAGEDOWN: u16 = 0x151;
pub const INSERT: u16 = 0x152;
pub const DELETE: u16 = 0x153;

/// Scan code of a function key, `F1` through `F12`.
pub fn function_key(n: u8) -> Option<u16> {
    match n {
        1..=10 => Some(58 + u16::from(n)),
        11 => Some(87),
        12 => Some(88),
        _ => None,
    }
}

/// Scan code for a character together with whether it needs shift held.
///
/// Covers the printable US-ASCII range plus the control characters that map
/// to keys (`\n`, `\r`, `\t`).
pub fn char_code(c: char) -> Option<(u16, bool)> {
    let unshifted = |code| Some((code, false));
    let shifted = |code| Some((code, true));

    match c {
        'a'..='z' => unshifted(letter_code(c)),
        'A'..='Z' => shifted(letter_code(c.to_ascii_lowercase())),
        '1'..='9' => unshifted(1 + c as u16 - '0' as u16),
        '0' => unshifted(11),
        '!' => shifted(2),
        '@' => shifted(3),
        '#' => shifted(4),
        '$' => shifted(5),
        '%' => shifted(6),
        '^' => shifted(7),
        '&' => shifted(8),
        '*' => shifted(9),
        '(' => shifted(10),
        ')' => shifted(11),
        '-' => unshifted(12),
        '_' => shifted(12),
        '=' => unshifted(13),
        '+' => shifted(13),
        '[' => unshifted(26),
        '{' => shifted(26),
        ']' => unshifted(27),
        '}' => shifted(27),
        ';' => unshifted(39),
        ':' => shifted(39),
        '\'' => unshifted(40),
        '"' => shifted(40),
        '`' => unshifted(41),
        '~' => shifted(41),
        '\\' => unshifted(43),
        '|' => shifted(43),
        ',' => unshifted(51),
        '<' => shifted(51),
        '.' => unshifted(52),
        '>' => shifted(52),
        '/' => unshifted(53),
        '?' => shifted(53),
        ' ' => unshifted(SPACE),
        '\n' | '\r' => unshifted(ENTER),
        '\t' => unshifted(TAB),
        _ => None,
    }
}

/// Letter rows of the set-1 layout do not follow alphabetical order.
fn letter_code(c: char) -> u16 {
    match c {
        'q' => 16,
        'w' => 17,
        'e' => 18,
        'r' => 19,
        't' => 20,
        'y' => 21,
        'u' => 22,
        'i' => 23,
        'o' => 24,
        'p' => 25,
        'a' => 30,
        's' => 31,
        'd' => 32,
        'f' => 33,
        'g' => 34,
        'h' => 35,
        'j' => 36,
        'k' => 37,
        'l' => 38,
        'z' => 44,
        'x' => 45,
        'c' => 46,
        'v' => 47,
        'b' => 48,
        'n' => 49,
        'm' => 50,
        _ => 0,
    }
}

/// Scan code for a special-key name as used in boot commands (lower case,
/// e.g. `enter`, `esc`, `f1`, `leftshift`).
pub fn special(name: &str) -> Option<u16> {
    if let Some(rest) = name.strip_prefix('f') {
        if let Ok(n) = rest.parse::<u8>() {
            return function_key(n);
        }
    }
    match name {
        "bs" => Some(BACKSPACE),
        "del" => Some(DELETE),
        "down" => Some(DOWN),
        "end" => Some(END),
        "enter" | "return" => Some(ENTER),
        "esc" => Some(ESCAPE),
        "home" => Some(HOME),
        "insert" => Some(INSERT),
        "left" => Some(LEFT),
        "leftalt" => Some(LALT),
        "leftctrl" => Some(LCTRL),
        "leftshift" => Some(LSHIFT),
        "pagedown" => Some(PAGEDOWN),
        "pageup" => Some(PAGEUP),
        "right" => Some(RIGHT),
        "rightalt" => Some(RALT),
        "rightctrl" => Some(RCTRL),
        "rightshift" => Some(RSHIFT),
        "spacebar" => Some(SPACE),
        "tab" => Some(TAB),
        "up" => Some(UP),
        "kpenter" => Some(KPENTER),
        "kpslash" => Some(KPSLASH),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_match_the_set1_table() {
        assert_eq!(special("enter"), Some(28));
        assert_eq!(special("esc"), Some(1));
        assert_eq!(special("f1"), Some(59));
        assert_eq!(special("f10"), Some(68));
        assert_eq!(special("f11"), Some(87));
        assert_eq!(special("f12"), Some(88));
        assert_eq!(special("up"), Some(0x148));
        assert_eq!(special("kpenter"), Some(0x11C));
        assert_eq!(special("bogus"), None);
        assert_eq!(special("f13"), None);
    }

    #[test]
    fn characters_map_with_shift_state() {
        assert_eq!(char_code('a'), Some((30, false)));
        assert_eq!(char_code('A'), Some((30, true)));
        assert_eq!(char_code('1'), Some((2, false)));
        assert_eq!(char_code('!'), Some((2, true)));
        assert_eq!(char_code('0'), Some((11, false)));
        assert_eq!(char_code(')'), Some((11, true)));
        assert_eq!(char_code('/'), Some((53, false)));
        assert_eq!(char_code('?'), Some((53, true)));
        assert_eq!(char_code(' '), Some((57, false)));
        assert_eq!(char_code('\n'), Some((ENTER, false)));
        assert_eq!(char_code('€'), None);
    }

    #[test]
    fn digit_row_is_contiguous() {
        for (i, c) in ('1'..='9').enumerate() {
            assert_eq!(char_code(c), Some((2 + i as u16, false)));
        }
    }
}
