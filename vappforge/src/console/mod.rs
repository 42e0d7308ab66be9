//! Remote-console keystroke transport: ticket acquisition, the RFB/WebMKS
//! handshake, and scan-code key events.

pub mod scancodes;
pub mod ticket;
pub mod wmks;

pub use wmks::{key_event_frame, ConsoleSocket, WebSocketConsole, WmksClient};
