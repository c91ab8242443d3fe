//! Fixed-point decimal arithmetic.
//!
//! All money, prices, and rates in the core are `Decimal`: a non-negative
//! rational with 18 fractional digits, backed by a 192-bit unsigned integer
//! so that WAD-scaled products have headroom. There is no floating point
//! anywhere in this crate.
//!
//! Every conversion to an integer token amount names its rounding direction.
//! Amounts owed by a user round up, amounts paid out to a user round down.

use core::fmt;
use core::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LendingError, Result};

mod u192 {
    use uint::construct_uint;
    construct_uint! {
        pub struct U192(3);
    }
}
use u192::U192;

/// Scale factor: 10^18 fractional precision.
pub const WAD: u128 = 1_000_000_000_000_000_000;

const HALF_WAD: u128 = WAD / 2;

/// Basis points in one (10_000 bps = 100%).
pub const BPS_PER_ONE: u64 = 10_000;

/// Non-negative fixed-point value with 18 fractional digits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Decimal(U192);

impl Decimal {
    pub fn zero() -> Self {
        Self(U192::zero())
    }

    pub fn one() -> Self {
        Self(U192::from(WAD))
    }

    /// Construct from a percentage in [0, 255].
    pub fn from_percent(percent: u8) -> Self {
        Self(U192::from(percent as u128 * WAD / 100))
    }

    /// Construct from basis points (1 bps = 0.01%).
    pub fn from_bps(bps: u64) -> Self {
        Self(U192::from(bps as u128 * WAD / BPS_PER_ONE as u128))
    }

    /// Reconstruct from a raw WAD-scaled value.
    pub fn from_scaled_val(scaled_val: u128) -> Self {
        Self(U192::from(scaled_val))
    }

    /// Raw WAD-scaled value, if it fits in a u128.
    pub fn to_scaled_val(self) -> Result<u128> {
        u128::try_from(self.0).map_err(|_| LendingError::MathOverflow)
    }

    pub fn try_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(LendingError::MathOverflow)
    }

    pub fn try_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(LendingError::MathOverflow)
    }

    /// Subtraction clamped at zero. Aggregate-subtraction paths use this so
    /// that a unit of rounding slop cannot fail an otherwise-sound
    /// operation.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::zero()
        } else {
            Self(self.0 - rhs.0)
        }
    }

    pub fn try_mul(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_mul(rhs.0)
            .map(|product| Self(product / U192::from(WAD)))
            .ok_or(LendingError::MathOverflow)
    }

    pub fn try_div(self, rhs: Self) -> Result<Self> {
        if rhs.0.is_zero() {
            return Err(LendingError::MathOverflow);
        }
        self.0
            .checked_mul(U192::from(WAD))
            .map(|scaled| Self(scaled / rhs.0))
            .ok_or(LendingError::MathOverflow)
    }

    /// Exponentiation by squaring. Used for per-second interest compounding.
    pub fn try_pow(self, mut exp: u64) -> Result<Self> {
        let mut base = self;
        let mut acc = Self::one();
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.try_mul(base)?;
            }
            exp >>= 1;
            if exp > 0 {
                base = base.try_mul(base)?;
            }
        }
        Ok(acc)
    }

    /// Round down to an integer token amount (amounts paid out to a user).
    pub fn try_floor_u64(self) -> Result<u64> {
        u64::try_from(self.0 / U192::from(WAD)).map_err(|_| LendingError::MathOverflow)
    }

    /// Round up to an integer token amount (amounts owed by a user).
    pub fn try_ceil_u64(self) -> Result<u64> {
        let ceiled = self
            .0
            .checked_add(U192::from(WAD - 1))
            .ok_or(LendingError::MathOverflow)?
            / U192::from(WAD);
        u64::try_from(ceiled).map_err(|_| LendingError::MathOverflow)
    }

    /// Round half-up. Only for display and diagnostics, never settlement.
    pub fn try_round_u64(self) -> Result<u64> {
        let rounded = self
            .0
            .checked_add(U192::from(HALF_WAD))
            .ok_or(LendingError::MathOverflow)?
            / U192::from(WAD);
        u64::try_from(rounded).map_err(|_| LendingError::MathOverflow)
    }

    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }
}

impl From<u64> for Decimal {
    fn from(val: u64) -> Self {
        Self(U192::from(val as u128 * WAD))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / U192::from(WAD);
        let frac = (self.0 % U192::from(WAD)).as_u128();
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:018}", frac);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

impl FromStr for Decimal {
    type Err = LendingError;

    /// Parse a plain decimal string like `"1.05"` or `"42"`. At most 18
    /// fractional digits; no sign, no exponent.
    fn from_str(s: &str) -> Result<Self> {
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(LendingError::MathOverflow);
        }
        if frac.len() > 18 {
            return Err(LendingError::MathOverflow);
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| LendingError::MathOverflow)?
        };
        let frac: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<18}", frac);
            padded.parse().map_err(|_| LendingError::MathOverflow)?
        };
        let scaled = whole
            .checked_mul(WAD)
            .and_then(|w| w.checked_add(frac))
            .ok_or(LendingError::MathOverflow)?;
        Ok(Self::from_scaled_val(scaled))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| de::Error::custom("malformed decimal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_arithmetic() {
        let a = Decimal::from(10);
        let b = Decimal::from(4);
        assert_eq!(a.try_add(b).unwrap(), Decimal::from(14));
        assert_eq!(a.try_sub(b).unwrap(), Decimal::from(6));
        assert_eq!(a.try_mul(b).unwrap(), Decimal::from(40));
        assert_eq!(a.try_div(b).unwrap(), Decimal::from_scaled_val(25 * WAD / 10));
    }

    #[test]
    fn rounding_directions() {
        let d = Decimal::from(10).try_div(Decimal::from(3)).unwrap();
        assert_eq!(d.try_floor_u64().unwrap(), 3);
        assert_eq!(d.try_ceil_u64().unwrap(), 4);
        assert_eq!(d.try_round_u64().unwrap(), 3);

        // Exact values floor and ceil identically.
        let exact = Decimal::from(7);
        assert_eq!(exact.try_floor_u64().unwrap(), 7);
        assert_eq!(exact.try_ceil_u64().unwrap(), 7);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let small = Decimal::from_bps(1);
        let big = Decimal::one();
        assert_eq!(small.saturating_sub(big), Decimal::zero());
        assert_eq!(big.saturating_sub(small), big.try_sub(small).unwrap());
    }

    #[test]
    fn percent_and_bps_constructors() {
        assert_eq!(Decimal::from_percent(50), Decimal::from_bps(5_000));
        assert_eq!(Decimal::from_percent(100), Decimal::one());
        assert_eq!(
            Decimal::from_bps(1),
            Decimal::from_scaled_val(WAD / 10_000)
        );
    }

    #[test]
    fn pow_compounds() {
        // (1.01)^2 = 1.0201
        let r = Decimal::one().try_add(Decimal::from_bps(100)).unwrap();
        let squared = r.try_pow(2).unwrap();
        assert_eq!(squared, "1.0201".parse().unwrap());
        assert_eq!(r.try_pow(0).unwrap(), Decimal::one());
        assert_eq!(r.try_pow(1).unwrap(), r);
    }

    #[test]
    fn div_by_zero_errors() {
        assert_eq!(
            Decimal::one().try_div(Decimal::zero()),
            Err(LendingError::MathOverflow)
        );
    }

    #[test]
    fn display_and_parse_roundtrip() {
        for s in ["0", "1", "1.5", "0.000000000000000001", "123456.789"] {
            let d: Decimal = s.parse().unwrap();
            assert_eq!(d.to_string(), s);
        }
        assert!("1.0000000000000000001".parse::<Decimal>().is_err());
        assert!("".parse::<Decimal>().is_err());
        assert!("-1".parse::<Decimal>().is_err());
    }

    #[test]
    fn large_values_survive_mul() {
        // A u64-max token amount times a modest price must not overflow.
        let amount = Decimal::from(u64::MAX);
        let price = Decimal::from(100);
        let value = amount.try_mul(price).unwrap();
        assert_eq!(
            value.try_div(price).unwrap().try_floor_u64().unwrap(),
            u64::MAX
        );
    }
}

#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Floor and ceil differ by at most one unit and agree on exact values.
    #[kani::proof]
    fn rounding_modes_bracket() {
        let scaled: u128 = kani::any();
        kani::assume(scaled < u128::MAX / 2);

        let d = Decimal::from_scaled_val(scaled);
        let floor = d.try_floor_u64();
        let ceil = d.try_ceil_u64();

        if let (Ok(floor), Ok(ceil)) = (floor, ceil) {
            assert!(ceil >= floor);
            assert!(ceil - floor <= 1);
            if scaled % WAD == 0 {
                assert!(ceil == floor);
            }
        }
    }

    /// Saturating subtraction never underflows.
    #[kani::proof]
    fn saturating_sub_total() {
        let a: u128 = kani::any();
        let b: u128 = kani::any();
        let diff = Decimal::from_scaled_val(a).saturating_sub(Decimal::from_scaled_val(b));
        if b >= a {
            assert!(diff == Decimal::zero());
        }
    }
}
