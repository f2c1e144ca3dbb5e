//! Signed 17.14 fixed-point arithmetic.
//!
//! The feedback-queue scheduler keeps `load_avg` and per-thread `recent_cpu`
//! as fractional quantities, and no floating point is allowed in kernel
//! context. One sign bit, 17 integer bits, 14 fraction bits. Products and
//! quotients of two fixed-point values go through a widened 64-bit
//! intermediate so the fraction bits are not lost.

use core::fmt;
use core::ops::{Add, Sub};

/// Number of fraction bits.
const SHIFT: u32 = 14;
/// 1.0 in fixed-point representation.
const F: i32 = 1 << SHIFT;

/// A signed 17.14 fixed-point number.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    /// Converts an integer to fixed point.
    pub const fn from_int(n: i32) -> Fixed {
        Fixed(n * F)
    }

    /// The raw 17.14 representation.
    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn add_int(self, n: i32) -> Fixed {
        Fixed(self.0 + n * F)
    }

    pub const fn sub_int(self, n: i32) -> Fixed {
        Fixed(self.0 - n * F)
    }

    pub const fn mul_int(self, n: i32) -> Fixed {
        Fixed(self.0 * n)
    }

    pub const fn div_int(self, n: i32) -> Fixed {
        Fixed(self.0 / n)
    }

    /// Fixed × fixed through a 64-bit intermediate.
    pub fn mul(self, other: Fixed) -> Fixed {
        let wide = self.0 as i64 * other.0 as i64;
        debug_assert!(wide >> SHIFT <= i32::MAX as i64 && wide >> SHIFT >= i32::MIN as i64);
        Fixed((wide >> SHIFT) as i32)
    }

    /// Fixed ÷ fixed through a 64-bit intermediate.
    pub fn div(self, other: Fixed) -> Fixed {
        debug_assert!(other.0 != 0);
        Fixed(((self.0 as i64 * F as i64) / other.0 as i64) as i32)
    }

    /// Integer part, rounded toward zero.
    pub const fn trunc(self) -> i32 {
        self.0 / F
    }

    /// Integer part, rounded to the nearest integer.
    pub const fn round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, other: Fixed) -> Fixed {
        Fixed(self.0 + other.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, other: Fixed) -> Fixed {
        Fixed(self.0 - other.0)
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Printed as hundredths, which is how the monitoring getters scale.
        write!(f, "Fixed({}.{:02})", self.trunc(), (self.mul_int(100).round() - self.trunc() * 100).abs())
    }
}
