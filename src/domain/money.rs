use crate::error::EngineError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of minor units (paisa) in one major unit.
const MINOR_PER_MAJOR: i64 = 100;

/// A signed monetary value in minor units.
///
/// Wallet balances and ledger movements are both expressed as `Balance`, so a
/// debit is simply a negative value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Balance(i64);

/// A strictly positive monetary amount in minor units.
///
/// Prices, deposits, withdrawals and hourly rates are all `Amount`s; the sign of
/// a movement is decided when it becomes a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(minor: i64) -> Result<Self, EngineError> {
        if minor > 0 {
            Ok(Self(minor))
        } else {
            Err(EngineError::validation("Amount must be positive"))
        }
    }

    /// Converts a major-unit value (e.g. `750.50` PKR) into minor units.
    ///
    /// Values with more precision than one minor unit are rejected rather than
    /// rounded.
    pub fn from_major(value: Decimal) -> Result<Self, EngineError> {
        let minor = value * Decimal::from(MINOR_PER_MAJOR);
        if minor.fract() != Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "Amount {value} has more than two decimal places"
            )));
        }
        let minor = minor
            .to_i64()
            .ok_or_else(|| EngineError::validation(format!("Amount {value} is out of range")))?;
        Self::new(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn to_major(&self) -> Decimal {
        Balance::from(*self).to_major()
    }

    /// Multiplies by a non-negative factor and rounds half away from zero to
    /// the nearest minor unit.
    pub fn scale(&self, factor: Decimal) -> Result<Self, EngineError> {
        let scaled = (Decimal::from(self.0) * factor)
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
        let minor = scaled
            .to_i64()
            .ok_or_else(|| EngineError::validation("Scaled amount is out of range"))?;
        Self::new(minor)
    }
}

impl TryFrom<i64> for Amount {
    type Error = EngineError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(minor: i64) -> Self {
        Self(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.0, 2).normalize()
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Balance {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Balance {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Balance::ZERO, |acc, b| acc + b)
    }
}

/// ISO-4217 style currency code. A wallet holds exactly one currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, EngineError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(EngineError::validation(format!(
                "Invalid currency code '{code}'"
            )))
        }
    }

    pub fn pkr() -> Self {
        Self("PKR".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
