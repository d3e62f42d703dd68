//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In JavaScript/floating point:                                          │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  In a ledger, a one-cent drift is an unbalanced journal entry.          │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    1000 cents / 3 = 333 cents (×3 = 999 cents)                         │
//! │    The missing cent is distributed explicitly (largest remainder)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Encoding
//! Ledger, cashier and allocation amounts serialize as **string-encoded
//! integer cents** (`"1099"`), because JSON numbers lose precision at i64
//! scale. Use `#[serde(with = "money::cents_string")]` on raw `i64` cent
//! fields that cross the wire.
//!
//! ## Usage
//! ```rust
//! use meridian_core::money::Money;
//!
//! // Create from cents (preferred)
//! let price = Money::from_cents(1099);
//!
//! // Arithmetic operations
//! let doubled = price * 2;
//! let total = price + Money::from_cents(500);
//!
//! // NEVER do this:
//! // let bad = Money::from_float(10.99); // NO SUCH METHOD EXISTS!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents for USD).
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for refunds, price decreases
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **String serde**: serializes as `"1099"` to survive JSON round-trips
///
/// ## Where Money Flows
/// ```text
/// OrderLine.unit_price ──► line_price ──► Order.sub_total ──► Payment.amount
///                                                │
///                                                ▼
///                               JournalLine.debit / JournalLine.credit
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use meridian_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns the smaller of two Money values.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use meridian_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// let line_price = unit_price.multiply_quantity(3);
    /// assert_eq!(line_price.cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Calculates tax at a rate given in basis points (825 = 8.25%),
    /// rounding half away from zero.
    ///
    /// ## Implementation
    /// Integer math only: `(amount * bps + 5000) / 10000`.
    /// i128 intermediate prevents overflow on large amounts.
    pub fn tax_at_bps(&self, bps: u32) -> Money {
        let tax_cents = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(tax_cents as i64)
    }
}

/// Distributes `amount` across `weights` proportionally, in integer cents,
/// using the largest-remainder method so that the shares always sum back to
/// exactly `amount`.
///
/// This is how an order-level discount is prorated onto lines: the prorated
/// line price is the authoritative value for tax and refund math, so the
/// distribution must be lossless.
///
/// ## Example
/// ```rust
/// use meridian_core::money::distribute;
///
/// // $1.00 across three equal lines: 34 + 33 + 33
/// assert_eq!(distribute(100, &[1, 1, 1]), vec![34, 33, 33]);
/// ```
///
/// ## Edge Cases
/// - Empty weights, or all-zero weights: returns an all-zero vector of the
///   same length (nothing to distribute against).
/// - Negative `amount` (a discount) distributes symmetrically.
pub fn distribute(amount: i64, weights: &[i64]) -> Vec<i64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total_weight: i64 = weights.iter().sum();
    if total_weight == 0 {
        return vec![0; weights.len()];
    }

    // Negative amounts: distribute the absolute value, then flip signs.
    if amount < 0 {
        return distribute(-amount, weights).into_iter().map(|c| -c).collect();
    }

    // First pass: floor division per weight, remember remainders.
    let mut shares: Vec<i64> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, i64)> = Vec::with_capacity(weights.len());
    let mut allocated: i64 = 0;

    for (idx, &w) in weights.iter().enumerate() {
        let exact = amount as i128 * w as i128;
        let share = (exact / total_weight as i128) as i64;
        let remainder = (exact % total_weight as i128) as i64;
        shares.push(share);
        remainders.push((idx, remainder));
        allocated += share;
    }

    // Second pass: hand the leftover cents to the largest remainders.
    // Stable tie-break on index keeps the result deterministic.
    let mut leftover = amount - allocated;
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut cursor = 0;
    while leftover > 0 {
        let (idx, _) = remainders[cursor % remainders.len()];
        shares[idx] += 1;
        leftover -= 1;
        cursor += 1;
    }

    shares
}

// =============================================================================
// Serde: string-encoded cents
// =============================================================================

/// Money serializes as a string of integer cents: `Money::from_cents(1099)`
/// becomes `"1099"`. Deserialization accepts both `"1099"` and `1099` for
/// tolerance with older clients.
impl Serialize for Money {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cents = cents_string::deserialize(deserializer)?;
        Ok(Money(cents))
    }
}

/// Serde adapter for raw `i64` cent fields that must cross the wire as
/// strings.
///
/// ## Usage
/// ```rust,ignore
/// #[serde(with = "meridian_core::money::cents_string")]
/// pub amount_cents: i64,
/// ```
pub mod cents_string {
    use serde::de::{self, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cents: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&cents.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrInt {
            Str(String),
            Int(i64),
        }

        match StringOrInt::deserialize(deserializer)? {
            StringOrInt::Int(cents) => Ok(cents),
            StringOrInt::Str(s) => s.parse::<i64>().map_err(|_| {
                de::Error::invalid_value(Unexpected::Str(&s), &"an integer cent string")
            }),
        }
    }
}

/// [`cents_string`] for optional fields. `None` serializes as `null`.
pub mod cents_string_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cents: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match cents {
            Some(cents) => serializer.serialize_str(&cents.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::cents_string")] i64);

        Option::<Wrapper>::deserialize(deserializer).map(|opt| opt.map(|w| w.0))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows money in a human-readable format.
///
/// ## Note
/// This is for debugging and log output. Currency formatting for display
/// belongs to the consumer, which knows the order's currency code.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

/// Addition of two Money values.
impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

/// Addition assignment (+=).
impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// Subtraction of two Money values.
impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

/// Subtraction assignment (-=).
impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Negation (for reversing ledger postings).
impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

/// Multiplication by integer (for quantity calculations).
impl Mul<i32> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i32) -> Self {
        Money(self.0 * qty as i64)
    }
}

/// Multiplication by i64.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

/// Sum of Money values.
impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
