//! Boot-command execution against a key-event sink.

use std::time::Duration;

use async_trait::async_trait;

use crate::bootcmd::parser::{BootToken, KeyAction};
use crate::console::scancodes;
use crate::console::wmks::{ConsoleSocket, WmksClient};
use crate::errors::ForgeResult;
use crate::pipeline::cancel::CancelToken;

/// Receives raw key events. Implemented by the WMKS client and by recording
/// fakes in tests.
#[async_trait]
pub trait KeySink: Send {
    async fn key_event(&mut self, scan_code: u16, down: bool) -> ForgeResult<()>;
}

#[async_trait]
impl<S: ConsoleSocket> KeySink for WmksClient<S> {
    async fn key_event(&mut self, scan_code: u16, down: bool) -> ForgeResult<()> {
        self.send_key_event(scan_code, down).await
    }
}

/// Drives a parsed boot command into a `KeySink` with the configured pacing.
pub struct BootCmdExecutor<'a, S: KeySink> {
    sink: &'a mut S,
    key_interval: Duration,
    group_interval: Duration,
    cancel: CancelToken,
}

impl<'a, S: KeySink> BootCmdExecutor<'a, S> {
    pub fn new(
        sink: &'a mut S,
        key_interval: Duration,
        group_interval: Duration,
        cancel: CancelToken,
    ) -> BootCmdExecutor<'a, S> {
        BootCmdExecutor {
            sink,
            key_interval,
            group_interval,
            cancel,
        }
    }

    pub async fn run(&mut self, tokens: &[BootToken]) -> ForgeResult<()> {
        for token in tokens {
            self.cancel.check()?;
            match token {
                BootToken::Char(c) => self.send_char(*c).await?,
                BootToken::Special { name, code, action } => {
                    tracing::trace!(key = %name, code, ?action, "special key");
                    match action {
                        KeyAction::Press => {
                            self.sink.key_event(*code, true).await?;
                            self.cancel.sleep(self.key_interval).await?;
                            self.sink.key_event(*code, false).await?;
                        }
                        KeyAction::On => self.sink.key_event(*code, true).await?,
                        KeyAction::Off => self.sink.key_event(*code, false).await?,
                    }
                    self.pause_between_groups().await?;
                }
                BootToken::Wait(duration) => {
                    tracing::trace!(?duration, "boot-command wait");
                    self.cancel.sleep(*duration).await?;
                    self.pause_between_groups().await?;
                }
            }
        }
        Ok(())
    }

    async fn send_char(&mut self, c: char) -> ForgeResult<()> {
        let Some((code, shift)) = scancodes::char_code(c) else {
            tracing::warn!(character = %c.escape_default(), "no scan code; skipping");
            return Ok(());
        };
        if shift {
            self.sink.key_event(scancodes::LSHIFT, true).await?;
        }
        self.sink.key_event(code, true).await?;
        self.cancel.sleep(self.key_interval).await?;
        self.sink.key_event(code, false).await?;
        if shift {
            self.sink.key_event(scancodes::LSHIFT, false).await?;
        }
        self.cancel.sleep(self.key_interval).await?;
        Ok(())
    }

    async fn pause_between_groups(&mut self) -> ForgeResult<()> {
        if !self.group_interval.is_zero() {
            self.cancel.sleep(self.group_interval).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootcmd::parser::parse;

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<(u16, bool)>,
    }

    #[async_trait]
    impl KeySink for RecordingSink {
        async fn key_event(&mut self, scan_code: u16, down: bool) -> ForgeResult<()> {
            self.events.push((scan_code, down));
            Ok(())
        }
    }

    async fn run(command: &str) -> Vec<(u16, bool)> {
        let mut sink = RecordingSink::default();
        let mut exec = BootCmdExecutor::new(
            &mut sink,
            Duration::ZERO,
            Duration::ZERO,
            CancelToken::never(),
        );
        exec.run(&parse(command)).await.unwrap();
        sink.events
    }

    #[tokio::test]
    async fn esc_wait_text_enter() {
        let events = run("<esc>auto<enter>").await;
        let a = scancodes::char_code('a').unwrap().0;
        let u = scancodes::char_code('u').unwrap().0;
        let t = scancodes::char_code('t').unwrap().0;
        let o = scancodes::char_code('o').unwrap().0;
        assert_eq!(
            events,
            vec![
                (scancodes::ESCAPE, true),
                (scancodes::ESCAPE, false),
                (a, true),
                (a, false),
                (u, true),
                (u, false),
                (t, true),
                (t, false),
                (o, true),
                (o, false),
                (scancodes::ENTER, true),
                (scancodes::ENTER, false),
            ]
        );
    }

    #[tokio::test]
    async fn sticky_shift_emits_only_edges() {
        let events = run("<leftshift on>a<leftshift off>").await;
        let a = scancodes::char_code('a').unwrap().0;
        assert_eq!(
            events,
            vec![
                (scancodes::LSHIFT, true),
                (a, true),
                (a, false),
                (scancodes::LSHIFT, false),
            ]
        );
    }

    #[tokio::test]
    async fn shifted_character_wraps_in_shift() {
        let events = run("A").await;
        let a = scancodes::char_code('a').unwrap().0;
        assert_eq!(
            events,
            vec![
                (scancodes::LSHIFT, true),
                (a, true),
                (a, false),
                (scancodes::LSHIFT, false),
            ]
        );
    }

    #[tokio::test]
    async fn wait_token_sleeps_and_emits_nothing() {
        let events = run("<wait1ms>").await;
        assert!(events.is_empty());
    }
}
