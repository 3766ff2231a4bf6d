//! Domain-specific newtypes for type safety.
//!
//! Ratings and play counts travel through every provider and get converted
//! between several native scales on the way. Wrapping them keeps the
//! canonical 0-10 rating scale and the non-negative play count invariant in
//! one place. Uses `derive_more` for the conversion boilerplate; arithmetic
//! on play counts saturates.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use chrono::{DateTime, Utc};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};

// ============================================================================
// Macros for reducing boilerplate
// ============================================================================

/// Generates common accessors for numeric newtypes.
macro_rules! impl_newtype_common {
    ($type:ty, $inner:ty) => {
        impl $type {
            /// Get the inner value.
            #[must_use]
            pub const fn get(self) -> $inner {
                self.0
            }

            /// Check if the value is zero.
            #[must_use]
            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ============================================================================
// PlayCount
// ============================================================================

/// A play count value, never negative.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Into,
    Serialize,
    Deserialize,
)]
pub struct PlayCount(i64);

impl_newtype_common!(PlayCount, i64);

impl PlayCount {
    /// Create a new play count; negative values (unset sentinels in some
    /// databases) become zero.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        if value < 0 {
            Self(0)
        } else {
            Self(value)
        }
    }

    /// Subtract, stopping at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self::new(self.0.saturating_sub(rhs.0))
    }

    /// Add, stopping at `i64::MAX`.
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Add for PlayCount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub for PlayCount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for PlayCount {
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl AddAssign for PlayCount {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl From<i32> for PlayCount {
    fn from(value: i32) -> Self {
        Self::new(i64::from(value))
    }
}

// ============================================================================
// Rating
// ============================================================================

/// A rating on the canonical 0-10 scale (half stars), 0 meaning unrated.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Into, Serialize, Deserialize,
)]
pub struct Rating(u8);

impl_newtype_common!(Rating, u8);

impl Rating {
    pub const UNRATED: Self = Self(0);
    pub const MAX: Self = Self(10);

    /// Create a rating, clamping into 0..=10.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        if value <= 0 {
            Self(0)
        } else if value >= 10 {
            Self(10)
        } else {
            Self(value as u8)
        }
    }

    #[must_use]
    pub const fn is_rated(self) -> bool {
        self.0 > 0
    }

    /// From a whole-star scale (0-5).
    #[must_use]
    pub const fn from_stars(stars: i64) -> Self {
        Self::new(stars.saturating_mul(2))
    }

    /// To a whole-star scale (0-5). Half stars round up, so canonical 7
    /// becomes 4 stars and reads back as 8.
    #[must_use]
    pub const fn to_stars(self) -> i64 {
        (self.0 as i64 + 1) / 2
    }

    /// From a 0-100 percentage scale.
    #[must_use]
    pub const fn from_percent(percent: i64) -> Self {
        if percent <= 0 {
            Self(0)
        } else {
            Self::new(percent.saturating_add(5) / 10)
        }
    }

    /// To a 0-100 percentage scale in whole-star steps.
    #[must_use]
    pub const fn to_percent(self) -> i64 {
        self.to_stars() * 20
    }

    /// From a 0.0-1.0 fraction; negative means unrated.
    #[must_use]
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction.is_nan() || fraction <= 0.0 {
            return Self(0);
        }
        #[allow(clippy::cast_possible_truncation)]
        Self::new((fraction * 10.0).round() as i64)
    }

    /// To a 0.0-1.0 fraction, `None` when unrated.
    #[must_use]
    pub fn to_fraction(self) -> Option<f64> {
        self.is_rated().then(|| f64::from(self.0) / 10.0)
    }

    /// The value a whole-star provider stores for this rating.
    #[must_use]
    pub const fn quantized_to_stars(self) -> Self {
        Self::from_stars(self.to_stars())
    }
}

/// Granularity a provider stores ratings with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RatingScale {
    /// Every value of the 0-10 scale survives a round trip.
    #[default]
    HalfStars,
    /// Whole stars only; odd ratings round up.
    Stars,
}

impl RatingScale {
    /// The rating as it reads back after being stored on this scale.
    #[must_use]
    pub const fn quantize(self, rating: Rating) -> Rating {
        match self {
            Self::HalfStars => rating,
            Self::Stars => rating.quantized_to_stars(),
        }
    }
}

impl From<i64> for Rating {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Convert a unix timestamp to a date, treating zero and negative values as unset.
#[must_use]
pub fn timestamp_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        None
    } else {
        DateTime::from_timestamp(secs, 0)
    }
}

/// Convert an optional date to a unix timestamp, 0 when unset.
#[must_use]
pub fn timestamp_to_unix(time: Option<DateTime<Utc>>) -> i64 {
    time.map_or(0, |t| t.timestamp())
}

// ============================================================================
// Tests
// ============================================================================
