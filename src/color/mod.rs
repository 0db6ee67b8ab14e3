//! # Color Command Normalization
//!
//! Turns the loosely shaped input that clients send into a canonical
//! [`ColorCommand`]. Four input shapes are accepted, tried in order:
//!
//! 1. a mapping with full channel names: `{"red": 255, "green": 128, "blue": 64}`
//! 2. a mapping with single letters: `{"r": 255, "g": 128, "b": 64}`
//! 3. a mapping with one delimited field: `{"color": "255,128,64"}`
//! 4. raw delimited text: `255,128,64`
//!
//! The first shape whose keys are present claims the input. Parsed integers
//! are clamped into `0..=255` under the default [`RangePolicy::Clamp`];
//! [`RangePolicy::Reject`] reports them as [`ParseError::OutOfRange`] instead.
//!
//! ```rust
//! use colorlink::color::{normalize, RawInput};
//!
//! let input = RawInput::from_body(br#"{"r": 999, "g": -5, "b": 64}"#);
//! let cmd = normalize(&input).expect("recognised shape");
//! assert_eq!(cmd.frame(), "255,0,64\n");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// One RGB command bound for the device. Channels are always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorCommand {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorCommand {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Wire form: decimal channels, comma separated, newline terminated.
    /// The firmware reads line by line, so the trailing `\n` is mandatory.
    pub fn frame(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for ColorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.red, self.green, self.blue)
    }
}

/// What to do with integers outside `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    #[default]
    Clamp,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no recognised color fields")]
    NoShape,

    #[error("expected 3 comma separated values, got {0}")]
    PartCount(usize),

    #[error("{channel} value {value:?} is not a base-10 integer")]
    InvalidComponent { channel: Channel, value: String },

    #[error("{channel} value {value} is outside 0..=255")]
    OutOfRange { channel: Channel, value: i64 },

    #[error("color field must be an \"r,g,b\" string, got {0}")]
    ColorFieldNotText(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        })
    }
}

/// Client input before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Fields(Map<String, Value>),
    Text(String),
}

impl RawInput {
    /// Objects become [`RawInput::Fields`], string literals become
    /// [`RawInput::Text`]. Any other JSON value carries no usable shape and
    /// is kept as its textual form, which will not match.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => RawInput::Fields(map),
            Value::String(s) => RawInput::Text(s),
            other => RawInput::Text(other.to_string()),
        }
    }

    /// Query parameters arrive as strings; component parsing handles them.
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        RawInput::Fields(
            params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// A request body or console line: JSON when it parses, raw text otherwise.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::from_json(value),
            Err(_) => RawInput::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }
}

/// A shape matcher returns `None` when the input is not in its shape.
type ShapeMatcher = fn(&RawInput) -> Option<Result<[i64; 3], ParseError>>;

const SHAPES: [ShapeMatcher; 4] = [full_names, single_letters, color_field, delimited_text];

/// Parse `input` into a command, reporting why it was not recognised.
pub fn parse(input: &RawInput, policy: RangePolicy) -> Result<ColorCommand, ParseError> {
    let values = SHAPES
        .iter()
        .find_map(|shape| shape(input))
        .unwrap_or(Err(ParseError::NoShape))?;

    let mut channels = [0u8; 3];
    for ((slot, value), channel) in channels.iter_mut().zip(values).zip(Channel::ALL) {
        *slot = match policy {
            RangePolicy::Clamp => value.clamp(0, 255) as u8,
            RangePolicy::Reject => {
                u8::try_from(value).map_err(|_| ParseError::OutOfRange { channel, value })?
            }
        };
    }
    Ok(ColorCommand::new(channels[0], channels[1], channels[2]))
}

/// Permissive entry point: `None` means "nothing to send", never an error.
pub fn normalize(input: &RawInput) -> Option<ColorCommand> {
    parse(input, RangePolicy::Clamp).ok()
}

fn full_names(input: &RawInput) -> Option<Result<[i64; 3], ParseError>> {
    keyed(input, ["red", "green", "blue"])
}

fn single_letters(input: &RawInput) -> Option<Result<[i64; 3], ParseError>> {
    keyed(input, ["r", "g", "b"])
}

fn color_field(input: &RawInput) -> Option<Result<[i64; 3], ParseError>> {
    let RawInput::Fields(map) = input else {
        return None;
    };
    let value = map.get("color")?;
    Some(match value {
        Value::String(s) => split_delimited(s),
        other => Err(ParseError::ColorFieldNotText(other.to_string())),
    })
}

fn delimited_text(input: &RawInput) -> Option<Result<[i64; 3], ParseError>> {
    match input {
        RawInput::Text(s) => Some(split_delimited(s)),
        RawInput::Fields(_) => None,
    }
}

fn keyed(input: &RawInput, keys: [&str; 3]) -> Option<Result<[i64; 3], ParseError>> {
    let RawInput::Fields(map) = input else {
        return None;
    };
    if !keys.iter().all(|k| map.contains_key(*k)) {
        return None;
    }
    let mut out = [0i64; 3];
    for ((slot, key), channel) in out.iter_mut().zip(keys).zip(Channel::ALL) {
        *slot = match component(&map[key], channel) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
    }
    Some(Ok(out))
}

fn split_delimited(s: &str) -> Result<[i64; 3], ParseError> {
    let parts: Vec<&str> = s.trim().split(',').collect();
    if parts.len() != 3 {
        return Err(ParseError::PartCount(parts.len()));
    }
    let mut out = [0i64; 3];
    for ((slot, part), channel) in out.iter_mut().zip(parts).zip(Channel::ALL) {
        *slot = parse_integer(part, channel)?;
    }
    Ok(out)
}

fn component(value: &Value, channel: Channel) -> Result<i64, ParseError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| ParseError::InvalidComponent {
                channel,
                value: n.to_string(),
            }),
        Value::String(s) => parse_integer(s, channel),
        other => Err(ParseError::InvalidComponent {
            channel,
            value: other.to_string(),
        }),
    }
}

fn parse_integer(s: &str, channel: Channel) -> Result<i64, ParseError> {
    s.trim()
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidComponent {
            channel,
            value: s.to_string(),
        })
}
