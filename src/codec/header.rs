//! JSON header construction/parsing helpers for Property Exchange.
//!
//! PE headers are JSON in a 7-bit-safe subset: every builder here escapes
//! embedded `"` inside string fields, and every byte produced has its MSB
//! clear (JSON's printable-ASCII subset already guarantees this).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `{"resource":"..."}`, optionally with `resId`, `offset`/`limit`.
pub fn build_get_header(resource: &str, res_id: Option<&str>, offset: Option<u32>, limit: Option<u32>) -> Vec<u8> {
    let mut s = format!(r#"{{"resource":"{}""#, escape(resource));
    if let Some(id) = res_id {
        s.push_str(&format!(r#","resId":"{}""#, escape(id)));
    }
    if let Some(o) = offset {
        s.push_str(&format!(r#","offset":{o}"#));
    }
    if let Some(l) = limit {
        s.push_str(&format!(r#","limit":{l}"#));
    }
    s.push('}');
    s.into_bytes()
}

/// `{"status":n,"message":"..."}`.
pub fn build_reply_header(status: u16, message: Option<&str>) -> Vec<u8> {
    let mut s = format!(r#"{{"status":{status}"#);
    if let Some(m) = message {
        s.push_str(&format!(r#","message":"{}""#, escape(m)));
    }
    s.push('}');
    s.into_bytes()
}

/// `{"resource":"...","command":"start"|"end","subscribeId":"..."}`.
pub fn build_subscribe_header(resource: &str, command: SubscribeCommand, subscribe_id: Option<&str>) -> Vec<u8> {
    let mut s = format!(
        r#"{{"resource":"{}","command":"{}""#,
        escape(resource),
        command.as_str()
    );
    if let Some(id) = subscribe_id {
        s.push_str(&format!(r#","subscribeId":"{}""#, escape(id)));
    }
    s.push('}');
    s.into_bytes()
}

/// `{"subscribeId":"...","resource":"..."}` — carried on Notify.
pub fn build_notify_header(subscribe_id: &str, resource: &str) -> Vec<u8> {
    format!(
        r#"{{"subscribeId":"{}","resource":"{}"}}"#,
        escape(subscribe_id),
        escape(resource)
    )
    .into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeCommand {
    Start,
    End,
}

impl SubscribeCommand {
    fn as_str(self) -> &'static str {
        match self {
            SubscribeCommand::Start => "start",
            SubscribeCommand::End => "end",
        }
    }
}

/// Parsed, typed view over a reply/request header's well-known fields.
/// Unknown fields are preserved in `raw` for callers that need them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeHeaderFields {
    pub resource: Option<String>,
    #[serde(rename = "resId")]
    pub res_id: Option<String>,
    pub status: Option<u16>,
    pub message: Option<String>,
    #[serde(rename = "subscribeId")]
    pub subscribe_id: Option<String>,
    pub command: Option<String>,
    #[serde(rename = "mutualEncoding")]
    pub mutual_encoding: Option<String>,
    #[serde(rename = "mediaType")]
    pub media_type: Option<String>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

impl PeHeaderFields {
    pub fn is_mcoded7(&self) -> bool {
        self.mutual_encoding.as_deref() == Some("Mcoded7") || self.media_type.as_deref() == Some("Mcoded7")
    }
}

/// Parse a header byte span as JSON into the well-known fields view.
pub fn parse_header_fields(bytes: &[u8]) -> Result<PeHeaderFields> {
    if bytes.is_empty() {
        return Ok(PeHeaderFields::default());
    }
    let text = std::str::from_utf8(bytes).map_err(|e| Error::InvalidHeader(e.to_string()))?;
    let value: Value = serde_json::from_str(text).map_err(|e| Error::InvalidHeader(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::InvalidHeader(e.to_string()))
}
