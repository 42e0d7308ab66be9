//! Boot-command tokenizer.

use std::time::Duration;

use crate::console::scancodes;

/// How a key token drives the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Press and release.
    Press,
    /// Press only; the key stays held.
    On,
    /// Release only.
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootToken {
    /// A literal character typed on the keyboard.
    Char(char),
    /// A named special key.
    Special {
        name: String,
        code: u16,
        action: KeyAction,
    },
    /// A pause between keystrokes.
    Wait(Duration),
}

/// Tokenize a rendered boot command.
pub fn parse(input: &str) -> Vec<BootToken> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('<') {
            if let Some(end) = stripped.find('>') {
                let inner = &stripped[..end];
                if let Some(token) = bracketed(inner) {
                    tokens.push(token);
                    rest = &stripped[end + 1..];
                    continue;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            tokens.push(BootToken::Char(c));
        }
        rest = chars.as_str();
    }

    tokens
}

fn bracketed(inner: &str) -> Option<BootToken> {
    if let Some(duration) = wait_duration(inner) {
        return Some(BootToken::Wait(duration));
    }

    let (name, action) = match inner.split_once(' ') {
        Some((name, "on")) => (name, KeyAction::On),
        Some((name, "off")) => (name, KeyAction::Off),
        Some(_) => return None,
        None => (inner, KeyAction::Press),
    };

    let code = scancodes::special(name)?;
    Some(BootToken::Special {
        name: name.to_string(),
        code,
        action,
    })
}

/// `wait` is one second; `waitN`, `waitNs`, `waitNms`, and `waitNm` carry an
/// explicit duration.
fn wait_duration(inner: &str) -> Option<Duration> {
    let spec = inner.strip_prefix("wait")?;
    if spec.is_empty() {
        return Some(Duration::from_secs(1));
    }
    if let Some(n) = spec.strip_suffix("ms") {
        return n.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(n) = spec.strip_suffix('s') {
        return n.parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(n) = spec.strip_suffix('m') {
        return n.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    spec.parse::<u64>().ok().map(Duration::from_secs)
}
