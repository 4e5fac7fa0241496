use crate::error::{MeshError, Result};

use super::AtValue;

/// Unsigned integer widths the radio uses for numeric parameters.
pub trait AtInteger: Copy + Default + std::fmt::Debug {
    /// Width on the wire in bytes.
    const WIDTH: usize;

    /// Widen to `u64`.
    fn to_u64(self) -> u64;

    /// Narrow from `u64`. Only called with values that fit.
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_at_integer {
    ($($t:ty),*) => {
        $(
            impl AtInteger for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn to_u64(self) -> u64 {
                    self as u64
                }

                fn from_u64(value: u64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_at_integer!(u8, u16, u32, u64);

/// A fixed-width big-endian unsigned integer parameter.
///
/// The radio drops leading zero bytes from numeric responses, so parsing
/// accepts anything up to the full width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Integer<T: AtInteger>(pub T);

impl<T: AtInteger> Integer<T> {
    /// Get the wrapped value.
    pub fn get(&self) -> T {
        self.0
    }
}

impl<T: AtInteger> From<T> for Integer<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T: AtInteger> AtValue for Integer<T> {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let be = self.0.to_u64().to_be_bytes();
        Ok(be[8 - T::WIDTH..].to_vec())
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() > T::WIDTH {
            return Err(MeshError::malformed(format!(
                "integer: expected at most {} bytes, got {}",
                T::WIDTH,
                data.len()
            )));
        }
        let value = data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Ok(Self(T::from_u64(value)))
    }
}
