use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderNumberError {
    #[error("order number is malformed: {0:?}")]
    Malformed(String),
    #[error("order number {0} fails the checksum")]
    Checksum(String),
}

/// Purchase or withdrawal order identifier.
///
/// Only numbers that pass the mod-10 checksum can be constructed, so anything holding
/// an `OrderNumber` never needs to re-validate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderNumber(i64);

impl OrderNumber {
    pub fn parse(input: &str) -> Result<Self, OrderNumberError> {
        let digits = input.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderNumberError::Malformed(input.to_string()));
        }
        let value = match digits.parse::<i64>() {
            Ok(value) if value > 0 => value,
            _ => return Err(OrderNumberError::Malformed(input.to_string())),
        };
        if !luhn(digits) {
            return Err(OrderNumberError::Checksum(digits.to_string()));
        }
        Ok(Self(value))
    }

    /// Rebuilds a number read back from the ledger, where it was validated on the way in.
    pub(crate) fn from_stored(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

pub fn is_valid(input: &str) -> bool {
    OrderNumber::parse(input).is_ok()
}

// caller guarantees ascii digits only
fn luhn(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(idx, b)| {
            let d = u32::from(b - b'0');
            if idx % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

impl FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// order numbers travel as strings on the wire
impl Serialize for OrderNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        let raw = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Number(number) => number.to_string(),
        };
        OrderNumber::parse(&raw).map_err(serde::de::Error::custom)
    }
}
