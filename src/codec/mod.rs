//! Bit-exact construction and parsing of Universal MIDI-CI SysEx messages.

pub mod builder;
pub mod header;
pub mod mcoded7;
pub mod message;
pub mod parser;

pub use builder::*;
pub use header::{build_get_header, build_notify_header, build_reply_header, build_subscribe_header, parse_header_fields, PeHeaderFields, SubscribeCommand};
pub use message::*;
pub use parser::parse;
