//! Boot-command grammar and execution.
//!
//! A boot command is a flat string of literal characters and bracketed
//! tokens: named special keys (`<enter>`, `<esc>`, `<f1>`..`<f12>`, arrows),
//! sticky modifier variants (`<leftshift on>` / `<leftshift off>`), and wait
//! directives (`<wait>`, `<wait5>`, `<wait10s>`, `<wait1m>`). Bracketed text
//! that does not match the grammar is typed out literally.

mod exec;
mod parser;

pub use exec::{BootCmdExecutor, KeySink};
pub use parser::{parse, BootToken, KeyAction};
