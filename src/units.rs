use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole reward points. Additions go through [`Points::checked_add`] so a
/// balance can never wrap; balances are kept non-negative by the ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);

    pub const fn new(value: i64) -> Self {
        Points(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `None` when the sum does not fit; balances never wrap or saturate.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Points)
    }

    /// Sum of `points`, or `None` on overflow.
    pub fn checked_sum(points: impl IntoIterator<Item = Self>) -> Option<Self> {
        points
            .into_iter()
            .try_fold(Points::ZERO, |acc, p| acc.checked_add(p))
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::SubAssign for Points {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Weight in grams.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Grams(u64);

impl Grams {
    pub const ZERO: Grams = Grams(0);

    pub const fn new(value: u64) -> Self {
        Grams(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Grams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}g", self.0)
    }
}

impl std::ops::Add for Grams {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Grams(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for Grams {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Grams {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Grams::ZERO, |acc, g| acc + g)
    }
}

/// Points earned per unit of a waste type, fixed-point with 4 decimal places
/// stored as a scaled integer. Fractional rates are common for weight-native
/// types (e.g. 0.05 points per gram of paper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Rate(i64);

impl Rate {
    const SCALE: i64 = 10_000;

    pub fn from_float(value: f64) -> Self {
        Rate((value * Self::SCALE as f64).round() as i64)
    }

    /// Like [`Rate::from_float`], but `None` for NaN, infinities and values
    /// whose scaled form does not fit in an `i64`.
    pub fn try_from_float(value: f64) -> Option<Self> {
        let scaled = (value * Self::SCALE as f64).round();
        // i64::MAX as f64 rounds up to 2^63, which is already out of range
        (scaled.is_finite() && scaled >= i64::MIN as f64 && scaled < i64::MAX as f64)
            .then(|| Rate(scaled as i64))
    }

    pub fn from_scaled(value: i64) -> Self {
        Rate(value)
    }

    pub fn whole(points: i64) -> Self {
        Rate(points * Self::SCALE)
    }

    pub fn to_float(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Points awarded for `count` units, rounded half away from zero.
    /// `None` when the product does not fit in [`Points`].
    pub fn checked_times(self, count: u64) -> Option<Points> {
        let scaled = i128::from(self.0) * i128::from(count);
        let half = i128::from(Self::SCALE / 2);
        let rounded = if scaled >= 0 {
            (scaled + half) / i128::from(Self::SCALE)
        } else {
            (scaled - half) / i128::from(Self::SCALE)
        };
        i64::try_from(rounded).ok().map(Points)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl Serialize for Rate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_float())
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Rate::try_from_float(value).ok_or_else(|| {
            serde::de::Error::custom(format!("rate {value} is not a finite number in range"))
        })
    }
}
