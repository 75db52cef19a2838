//! Inbound reply frames.
//!
//! Replies are `&`-delimited `key=value` pairs. Command replies carry an `op`
//! pair holding a JSON object that echoes the command code in `cmd`; ping
//! replies carry a `device_name` pair.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::command::{Command, validate_identifier};
use crate::errors::Error;
use crate::types::NativeChannels;

type Result<T> = std::result::Result<T, Error>;

/// Number of trailing `device_name` characters that form the identifier.
const SID_LEN: usize = 4;

/// A decoded command reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    code: u16,
    payload: Map<String, Value>,
}

impl Response {
    /// The command code echoed by the device.
    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Whether this reply answers `command`; anything else is cross-talk.
    pub fn answers(&self, command: &Command) -> bool {
        self.code == command.code()
    }

    /// Like [`Response::answers`] but as a `Result` for `?` chains.
    pub fn ensure_answers(self, command: &Command) -> Result<Self> {
        if self.answers(command) {
            Ok(self)
        } else {
            Err(Error::CodeMismatch {
                expected: command.code(),
                received: self.code,
            })
        }
    }

    /// The `r,g,b,w,m` channels of a state reply. Absent channels read as zero.
    pub fn channels(&self) -> Result<NativeChannels> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| Error::malformed(format!("bad channel values: {e}")))
    }
}

/// Identity reported by a device in reply to a ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// The full `device_name`, e.g. `DoHome_RGB_1a2b`.
    pub name: String,
    /// The last four characters of `name`.
    pub sid: String,
    /// Every other `key=value` pair of the reply.
    pub attributes: BTreeMap<String, String>,
}

/// Decode a command reply.
///
/// Fails with [`Error::MalformedReply`] if the datagram is not UTF-8, has no
/// `op` pair, or `op` is not a JSON object with an integer `cmd`.
///
/// ```
/// let response = dohome_rs::decode(br#"cmd=ctrl&op={"cmd":25,"r":5000}"#).unwrap();
/// assert_eq!(response.code(), 25);
/// ```
pub fn decode(bytes: &[u8]) -> Result<Response> {
    let text = reply_text(bytes)?;
    let op = op_object(text)?.ok_or_else(|| Error::malformed("missing op"))?;
    let code = op
        .get("cmd")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .ok_or_else(|| Error::malformed("op has no integer cmd"))?;
    Ok(Response { code, payload: op })
}

/// Decode a ping reply into the device's identity.
///
/// ```
/// let device = dohome_rs::decode_ping(b"cmd=pong&device_name=DOHOME_1234").unwrap();
/// assert_eq!(device.sid, "1234");
/// ```
pub fn decode_ping(bytes: &[u8]) -> Result<DeviceDescriptor> {
    let text = reply_text(bytes)?;
    let mut attributes: BTreeMap<String, String> = pairs(text)
        .filter(|(key, _)| *key != "op")
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    let name = match attributes.remove("device_name") {
        Some(name) => name,
        None => op_object(text)?
            .as_ref()
            .and_then(|op| op.get("device_name"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| Error::malformed("missing device_name"))?,
    };

    let chars: Vec<char> = name.chars().collect();
    if chars.len() < SID_LEN {
        return Err(Error::malformed(format!("device_name {name:?} too short")));
    }
    let sid: String = chars[chars.len() - SID_LEN..].iter().collect();
    validate_identifier(&sid).map_err(|_| Error::malformed(format!("bad identifier {sid:?}")))?;

    Ok(DeviceDescriptor {
        name,
        sid,
        attributes,
    })
}

fn reply_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map(|text| text.trim_end_matches(['\0', '\r', '\n']))
        .map_err(|e| Error::malformed(format!("utf8 decoding error: {e}")))
}

fn pairs(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.split('&').filter_map(|pair| pair.split_once('='))
}

/// Parse the `op` object, reading one JSON value from where `op=` starts so
/// that an `&` inside the JSON does not split it.
fn op_object(text: &str) -> Result<Option<Map<String, Value>>> {
    let start = if text.starts_with("op=") {
        Some(3)
    } else {
        text.find("&op=").map(|at| at + 4)
    };
    let Some(start) = start else {
        return Ok(None);
    };

    let value = serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| Error::malformed("empty op"))?
        .map_err(|e| Error::malformed(format!("invalid op json: {e}")))?;

    match value {
        Value::Object(map) => Ok(Some(map)),
        other => Err(Error::malformed(format!("op is not an object: {other}"))),
    }
}
