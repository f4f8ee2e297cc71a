macro_rules! impl_from_into_u64 {
    ($main: ident) => {
        impl From<u64> for $main {
            fn from(n: u64) -> $main {
                $main(n)
            }
        }

        impl From<$main> for u64 {
            fn from(from: $main) -> u64 {
                from.0
            }
        }

        impl $main {
            pub fn as_u64(&self) -> u64 {
                self.0
            }

            pub fn as_usize(&self) -> usize {
                self.0 as usize
            }
        }
    };
}

/// Comparisons and saturating math between `$main` and a plain `u64`.
macro_rules! impl_math_between {
    ($main: ident, $other: ident) => {
        impl PartialOrd<$other> for $main {
            /// Utilizes `partial_cmp` on the underlying `u64`.
            fn partial_cmp(&self, other: &$other) -> Option<core::cmp::Ordering> {
                let other: u64 = (*other).into();
                self.0.partial_cmp(&other)
            }
        }

        impl PartialEq<$other> for $main {
            fn eq(&self, other: &$other) -> bool {
                let other: u64 = (*other).into();
                self.0 == other
            }
        }

        impl core::ops::Add<$other> for $main {
            type Output = $main;

            fn add(self, other: $other) -> $main {
                let other: u64 = other.into();
                $main::from(self.0.saturating_add(other))
            }
        }

        impl core::ops::AddAssign<$other> for $main {
            fn add_assign(&mut self, other: $other) {
                *self = *self + other;
            }
        }

        impl core::ops::Sub<$other> for $main {
            type Output = $main;

            fn sub(self, other: $other) -> $main {
                let other: u64 = other.into();
                $main::from(self.0.saturating_sub(other))
            }
        }

        impl core::ops::SubAssign<$other> for $main {
            fn sub_assign(&mut self, other: $other) {
                *self = *self - other;
            }
        }

        impl core::ops::Mul<$other> for $main {
            type Output = $main;

            fn mul(self, rhs: $other) -> $main {
                let rhs: u64 = rhs.into();
                $main::from(self.0.saturating_mul(rhs))
            }
        }

        impl core::ops::Div<$other> for $main {
            type Output = $main;

            fn div(self, rhs: $other) -> $main {
                let rhs: u64 = rhs.into();
                $main::from(self.0.checked_div(rhs).expect("cannot divide by zero"))
            }
        }

        impl core::ops::Rem<$other> for $main {
            type Output = $main;

            fn rem(self, modulus: $other) -> $main {
                let modulus: u64 = modulus.into();
                $main::from(self.0.checked_rem(modulus).expect("cannot modulo by zero"))
            }
        }
    };
}

/// Saturating math between two values of the same newtype. Comparison comes
/// from the derived `PartialOrd`/`Ord`.
macro_rules! impl_math {
    ($main: ident) => {
        impl core::ops::Add<$main> for $main {
            type Output = $main;

            fn add(self, other: $main) -> $main {
                $main::from(self.0.saturating_add(other.0))
            }
        }

        impl core::ops::AddAssign<$main> for $main {
            fn add_assign(&mut self, other: $main) {
                *self = *self + other;
            }
        }

        impl core::ops::Sub<$main> for $main {
            type Output = $main;

            fn sub(self, other: $main) -> $main {
                $main::from(self.0.saturating_sub(other.0))
            }
        }

        impl core::ops::SubAssign<$main> for $main {
            fn sub_assign(&mut self, other: $main) {
                *self = *self - other;
            }
        }
    };
}

macro_rules! impl_display {
    ($main: ident) => {
        impl core::fmt::Display for $main {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl core::str::FromStr for $main {
            type Err = core::num::ParseIntError;

            fn from_str(s: &str) -> Result<$main, Self::Err> {
                u64::from_str(s).map($main)
            }
        }
    };
}

macro_rules! impl_debug {
    ($main: ident) => {
        impl core::fmt::Debug for $main {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "{}({:?})", stringify!($main), self.0)
            }
        }
    };
}

macro_rules! impl_common {
    ($main: ident) => {
        impl_from_into_u64!($main);
        impl_math_between!($main, u64);
        impl_math!($main);
        impl_display!($main);
        impl_debug!($main);
    };
}
