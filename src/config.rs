//! Simulation scenarios: the inputs of a run, read from JSON.
//!
//! ```json
//! {
//!   "variant": "dpaa2",
//!   "start_pc": "0x20",
//!   "header_base": 14,
//!   "cycle_limit": 100,
//!   "frame": "45 00 00 54 ...",
//!   "parameters": { "offset": 0, "bytes": "0a0b" },
//!   "parse_array": { "next_header": "0x0800", "faf": [3, 17] }
//! }
//! ```
//!
//! Byte fields are hex strings; numbers are JSON integers or `0x` strings.

use std::num::ParseIntError;

use serde::{Deserialize, Deserializer};

use crate::cpu::Simulator;
use crate::error::{HexError, SimError};
use crate::memory::FAF_FLAGS;
use crate::variant::Variant;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub variant: Option<Variant>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub start_pc: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub header_base: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub cycle_limit: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_hex")]
    pub frame: Option<Vec<u8>>,
    #[serde(default)]
    pub parameters: Option<ParameterBlock>,
    #[serde(default)]
    pub parse_array: Option<ParseArrayBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterBlock {
    #[serde(default)]
    pub offset: usize,
    #[serde(deserialize_with = "deserialize_hex_required")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParseArrayBlock {
    /// Raw bytes copied over the start of the template.
    #[serde(default, deserialize_with = "deserialize_hex")]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub next_header: Option<u16>,
    /// Frame attribute flags to set.
    #[serde(default)]
    pub faf: Vec<u8>,
}

impl Scenario {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Pushes every input the scenario names into `sim`, stopping at the
    /// first rejected value. The parse array is checked before anything is set.
    pub fn apply(&self, sim: &mut Simulator) -> Result<(), SimError> {
        let parse_array = match &self.parse_array {
            Some(block) => Some(block.build(sim)?),
            None => None,
        };
        if let Some(frame) = &self.frame {
            sim.set_frame(frame)?;
        }
        if let Some(limit) = self.cycle_limit {
            sim.set_cycle_limit(limit)?;
        }
        if let Some(block) = &self.parameters {
            sim.set_parameters(&block.bytes, block.offset, block.bytes.len())?;
        }
        if let Some(hb) = self.header_base {
            sim.set_header_base(hb)?;
        }
        if let Some(bytes) = parse_array {
            sim.set_parse_array(&bytes)?;
        }
        Ok(())
    }
}

impl ParseArrayBlock {
    fn build(&self, sim: &Simulator) -> Result<Vec<u8>, SimError> {
        let mut array = sim.parse_array().clone();
        if let Some(bytes) = &self.bytes {
            if bytes.len() > array.as_bytes().len() {
                return Err(SimError::ParseArrayLength {
                    len: bytes.len(),
                    max: array.as_bytes().len(),
                });
            }
            array.load(bytes);
        }
        if let Some(next_header) = self.next_header {
            array.set_next_header(next_header);
        }
        for &index in &self.faf {
            if index >= FAF_FLAGS {
                return Err(SimError::FafFlag {
                    index,
                    limit: FAF_FLAGS,
                });
            }
            array.set_faf(index, true);
        }
        Ok(array.as_bytes().to_vec())
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_u16(text: &str) -> Result<u16, ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

/// Parses hex bytes, ignoring whitespace and `:`, `,`, `-` separators and an
/// optional leading `0x`.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, HexError> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let digits = text
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ':' | ',' | '-'))
        .map(|c| c.to_digit(16).map(|d| d as u8).ok_or(HexError::Digit(c)))
        .collect::<Result<Vec<u8>, HexError>>()?;
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    Ok(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberSerde {
    Int(u16),
    Text(String),
}

fn deserialize_number<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberSerde>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberSerde::Int(value)) => Ok(Some(value)),
        Some(NumberSerde::Text(text)) => parse_u16(&text)
            .map(Some)
            .map_err(|err| serde::de::Error::custom(format!("{text:?}: {err}"))),
    }
}

fn deserialize_hex<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) => parse_hex_bytes(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_hex_required<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_hex_bytes(&text).map_err(serde::de::Error::custom)
}
