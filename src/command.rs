//! Outbound command frames.

use serde_json::{Map, Value};

use crate::errors::Error;
use crate::types::NativeChannels;

type Result<T> = std::result::Result<T, Error>;

/// Literal frame that asks a device to identify itself.
pub const PING_FRAME: &str = "cmd=ping";

/// Characters the frame grammar uses as delimiters.
const RESERVED: &[char] = &['&', '=', ',', '[', ']', '{', '}'];

/// A command addressed to one or more devices.
///
/// Commands are immutable once built; the payload is a JSON object whose
/// fields are command specific. The `cmd` field is added on encoding.
///
/// # Examples
///
/// ```
/// use dohome_rs::{Command, NativeChannels, Target};
///
/// let command = Command::set_state(NativeChannels::OFF).unwrap();
/// let frame = command.encode(&Target::device("1a2b").unwrap()).unwrap();
/// assert_eq!(
///     frame,
///     r#"cmd=ctrl&devices={[1a2b]}&op={"b":0,"cmd":6,"g":0,"m":0,"r":0,"w":0}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    code: u16,
    payload: Map<String, Value>,
}

impl Command {
    /// Set the output channels (color, white or off).
    pub const SET_STATE: u16 = 6;
    /// Read the current output channels.
    pub const GET_STATE: u16 = 25;

    pub fn new(code: u16, payload: Map<String, Value>) -> Self {
        Command { code, payload }
    }

    pub fn get_state() -> Self {
        Command::new(Self::GET_STATE, Map::new())
    }

    pub fn set_state(channels: NativeChannels) -> Result<Self> {
        let payload = serde_json::to_value(channels)
            .and_then(serde_json::from_value)
            .map_err(Error::JsonDump)?;
        Ok(Command::new(Self::SET_STATE, payload))
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Build the wire frame `cmd=ctrl&devices={[<sid>,...]}&op=<json>`.
    pub fn encode(&self, target: &Target) -> Result<String> {
        let mut op = self.payload.clone();
        op.insert("cmd".to_string(), Value::from(self.code));
        let op = serde_json::to_string(&op).map_err(Error::JsonDump)?;
        Ok(format!(
            "cmd=ctrl&devices={{[{}]}}&op={}",
            target.identifiers.join(","),
            op
        ))
    }
}

/// The device identifiers a frame is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    identifiers: Vec<String>,
}

impl Target {
    /// Address a single device.
    pub fn device(sid: &str) -> Result<Self> {
        validate_identifier(sid)?;
        Ok(Target {
            identifiers: vec![sid.to_string()],
        })
    }

    /// Address several devices with one frame.
    pub fn devices<I, S>(sids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers = sids
            .into_iter()
            .map(|sid| {
                validate_identifier(sid.as_ref())?;
                Ok(sid.as_ref().to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        if identifiers.is_empty() {
            return Err(Error::EmptyGroup);
        }
        Ok(Target { identifiers })
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }
}

/// Reject identifiers that would break the frame grammar.
pub(crate) fn validate_identifier(sid: &str) -> Result<()> {
    if sid.is_empty() || sid.contains(RESERVED) || sid.chars().any(char::is_whitespace) {
        return Err(Error::InvalidIdentifier(sid.to_string()));
    }
    Ok(())
}
