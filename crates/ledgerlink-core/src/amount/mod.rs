//! Decimal amount codec
//!
//! Converts user-facing decimal strings to and from the ledger's base units
//! (fixed-point integers with exponent 8). All arithmetic is done on
//! arbitrary-precision integers; floating point never appears in this path.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Number of fractional digits in one whole token
pub const DECIMALS: usize = 8;

/// Base units per whole token (10^8)
pub const UNITS_PER_TOKEN: u64 = 100_000_000;

static AMOUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").expect("amount pattern is valid"));

/// A quantity in the ledger's smallest denomination
///
/// Serialized as a JSON integer while it fits in a `u64`, and as a string of
/// digits beyond that, so no intermediate ever passes through `f64`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AmountUnits(BigUint);

impl AmountUnits {
    /// Wrap a raw base-unit integer
    pub fn new(units: BigUint) -> Self {
        Self(units)
    }

    /// Zero units
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// Build from the ICP ledger's `e8s` representation
    pub fn from_e8s(e8s: u64) -> Self {
        Self(BigUint::from(e8s))
    }

    /// Narrow to the ICP ledger's `u64` wire width
    pub fn to_e8s(&self) -> Result<u64> {
        self.0.to_u64().ok_or_else(|| {
            Error::InvalidAmount(format!("{} exceeds the ledger's 64-bit range", decode(self)))
        })
    }

    /// Borrow the underlying integer
    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for AmountUnits {
    fn from(units: u64) -> Self {
        Self(BigUint::from(units))
    }
}

impl From<BigUint> for AmountUnits {
    fn from(units: BigUint) -> Self {
        Self(units)
    }
}

impl FromStr for AmountUnits {
    type Err = Error;

    /// Parse a raw base-unit integer such as `"150000000"`
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAmount(format!(
                "'{}' is not a base-unit integer",
                s
            )));
        }
        s.parse::<BigUint>()
            .map(Self)
            .map_err(|e| Error::InvalidAmount(format!("'{}': {}", s, e)))
    }
}

impl fmt::Display for AmountUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for AmountUnits {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0.to_u64() {
            Some(units) => serializer.serialize_u64(units),
            None => serializer.serialize_str(&self.0.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for AmountUnits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct UnitsVisitor;

        impl Visitor<'_> for UnitsVisitor {
            type Value = AmountUnits;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a string of digits")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<AmountUnits, E> {
                Ok(AmountUnits::from(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> std::result::Result<AmountUnits, E> {
                Ok(AmountUnits(BigUint::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<AmountUnits, E> {
                u64::try_from(v)
                    .map(AmountUnits::from)
                    .map_err(|_| E::custom(format!("negative amount: {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<AmountUnits, E> {
                v.parse::<AmountUnits>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(UnitsVisitor)
    }
}

/// Convert a decimal string to base units
///
/// The input must match `^[0-9]+(\.[0-9]+)?$`. Fractional digits beyond the
/// eighth are truncated.
pub fn encode(decimal: &str) -> Result<AmountUnits> {
    if !AMOUNT_PATTERN.is_match(decimal) {
        return Err(Error::InvalidAmount(format!(
            "'{}' is not a non-negative decimal number",
            decimal
        )));
    }

    let (whole, fraction) = decimal.split_once('.').unwrap_or((decimal, ""));

    let mut fraction: String = fraction.chars().take(DECIMALS).collect();
    while fraction.len() < DECIMALS {
        fraction.push('0');
    }

    let whole: BigUint = whole
        .parse()
        .map_err(|e| Error::InvalidAmount(format!("'{}': {}", decimal, e)))?;
    let fraction: BigUint = fraction
        .parse()
        .map_err(|e| Error::InvalidAmount(format!("'{}': {}", decimal, e)))?;

    Ok(AmountUnits(whole * BigUint::from(UNITS_PER_TOKEN) + fraction))
}

/// Convert base units to a decimal string with exactly eight fractional digits
pub fn decode(units: &AmountUnits) -> String {
    let scale = BigUint::from(UNITS_PER_TOKEN);
    let quotient = &units.0 / &scale;
    let remainder = &units.0 % &scale;
    format!("{}.{:0>width$}", quotient, remainder.to_string(), width = DECIMALS)
}
