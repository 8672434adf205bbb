use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive, Signed, ToPrimitive};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Minor units per point.
pub const SCALE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointsError {
    #[error("amount is not a number: {0:?}")]
    NotANumber(String),
    #[error("amount must not be negative: {0}")]
    Negative(BigDecimal),
    #[error("amount is too large: {0}")]
    Overflow(BigDecimal),
}

/// Loyalty point amount held as integer hundredths; the ledger never sees floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);

    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn whole(points: i64) -> Self {
        Self(points * SCALE)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Points) -> Option<Points> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Rounds half-up to the nearest minor unit.
    pub fn from_decimal(value: &BigDecimal) -> Result<Self, PointsError> {
        if value.is_negative() {
            return Err(PointsError::Negative(value.clone()));
        }
        Self::round_minor(&(value * BigDecimal::from(SCALE)))
            .ok_or_else(|| PointsError::Overflow(value.clone()))
    }

    /// Rounds a non-negative amount already expressed in minor units.
    pub(crate) fn round_minor(minor: &BigDecimal) -> Option<Self> {
        let half = BigDecimal::from_f32(0.5)?;
        (minor + half).with_scale(0).to_i64().map(Self)
    }

    pub fn to_decimal(self) -> BigDecimal {
        BigDecimal::from(self.0) / BigDecimal::from(SCALE)
    }

    fn as_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, rhs: Points) -> Points {
        Points(self.0 + rhs.0)
    }
}

impl Sub for Points {
    type Output = Points;

    fn sub(self, rhs: Points) -> Points {
        Points(self.0 - rhs.0)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE as u64;
        write!(f, "{sign}{}.{:02}", abs / scale, abs % scale)
    }
}

impl FromStr for Points {
    type Err = PointsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = BigDecimal::from_str(s.trim()).map_err(|_| PointsError::NotANumber(s.to_string()))?;
        Self::from_decimal(&value)
    }
}

impl Serialize for Points {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % SCALE == 0 {
            serializer.serialize_i64(self.0 / SCALE)
        } else {
            serializer.serialize_f64(self.as_f64())
        }
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PointsVisitor)
    }
}

struct PointsVisitor;

impl<'de> de::Visitor<'de> for PointsVisitor {
    type Value = Points;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative amount of points")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Points, E> {
        Points::from_decimal(&BigDecimal::from(v)).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Points, E> {
        Points::from_decimal(&BigDecimal::from(v)).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Points, E> {
        let value = BigDecimal::from_f64(v).ok_or_else(|| E::custom(PointsError::NotANumber(v.to_string())))?;
        Points::from_decimal(&value).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Points, E> {
        v.parse().map_err(E::custom)
    }
}
