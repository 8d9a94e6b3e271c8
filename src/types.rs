//! This module defines range-checked types for WS2300 register addresses,
//! telegram lengths and write values, meant to simplify correct usage of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::{Deref, RangeInclusive};

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid register address.
    #[snafu(display("Invalid address"))]
    InvalidAddress,
    /// A telegram carries between 1 and 15 bytes.
    #[snafu(display("Invalid telegram length {length}, expected 1..=15"))]
    InvalidLength { length: usize },
    /// Write values are single nibbles.
    #[snafu(display("Invalid nibble value {value:#04x}"))]
    InvalidNibble { value: u8 },
    /// Bit operations address one of the four bits of a nibble.
    #[snafu(display("Invalid bit index {bit}, expected 0..=3"))]
    InvalidBit { bit: u8 },
}

const fn invalid_address() -> InvalidAddressSnafu {
    InvalidAddressSnafu
}

/// Address is a 16 bit position in the station's register space.
///
/// ## Example
/// ```
/// use ws2300_proto::Address;
/// use std::convert::TryInto;
/// let addr = Address::new(0x5d8).unwrap();
/// let addr: Address = 0x5d8u16.into();
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Address(u16);

/// Create a new [`Address`].
pub const fn addr(a: u16) -> Address {
    Address(a)
}

impl Address {
    /// Create a new address from anything that fits in 16 bits.
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if `address` is out of range.
    pub fn new(address: impl TryInto<u16>) -> Result<Self, Error> {
        let address = address.try_into().ok().with_context(invalid_address)?;
        Ok(Self(address))
    }

    /// The four nibbles of the address, most significant first.
    pub const fn nibbles(self) -> [u8; 4] {
        [
            (self.0 >> 12) as u8 & 0x0f,
            (self.0 >> 8) as u8 & 0x0f,
            (self.0 >> 4) as u8 & 0x0f,
            self.0 as u8 & 0x0f,
        ]
    }

    /// Returns the following address, wrapping at the end of the register space.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Deref for Address {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u16> for Address {
    fn from(a: u16) -> Self {
        Self(a)
    }
}

impl PartialEq<usize> for Address {
    fn eq(&self, other: &usize) -> bool {
        self.0 as usize == *other
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Trait to convert `T: TryInto<u16>` into an [`Address`].
pub trait IntoAddress {
    /// Convert self to an Address.
    /// # Errors
    /// Returns `Error:InvalidAddress` if self isn't a valid address.
    fn into_address(self) -> Result<Address, Error>;
}

impl IntoAddress for Address {
    fn into_address(self) -> Result<Address, Error> {
        Ok(self)
    }
}

impl<T> IntoAddress for T
where
    T: TryInto<u16>,
{
    fn into_address(self) -> Result<Address, Error> {
        Address::new(self)
    }
}

#[cfg(test)]
mod address_tests {
    use super::{addr, Address};

    #[test]
    fn test_address_nibbles() {
        assert_eq!(addr(0x5d8).nibbles(), [0x0, 0x5, 0xd, 0x8]);
        assert_eq!(addr(0xffff).nibbles(), [0xf; 4]);
        assert_eq!(addr(0).nibbles(), [0; 4]);
    }

    #[test]
    fn test_address() {
        assert_eq!(Address::new(0x16).unwrap(), addr(0x16));
        assert_eq!(addr(0x16), 0x16);
        assert!(Address::new(0x1_0000).is_err());
        assert!(Address::new(-1).is_err());
        assert_eq!(addr(0xffff).next(), addr(0));
        assert_eq!(addr(0x5d8).to_string(), "0x05d8");
    }
}

/// `Length` is a range-checked \[1, 15\] byte count, the payload size of one telegram.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Length(u8);

const LENGTH_RANGE: RangeInclusive<usize> = 1..=15;

/// Create a new [`Length`], panics if it is out of range.
pub const fn len(n: u8) -> Length {
    if n >= 1 && n <= 15 {
        Length(n)
    } else {
        panic!("Invalid telegram length.")
    }
}

impl Length {
    /// The largest number of bytes a single telegram can carry.
    pub const MAX: Self = Self(15);

    /// Create a new `Length`, checking that `length` is in the range [1, 15].
    /// # Errors
    /// Returns [`Error::InvalidLength`] if `length` is out of range.
    pub fn new(length: impl TryInto<usize>) -> Result<Self, Error> {
        let length = length
            .try_into()
            .ok()
            .context(InvalidLengthSnafu { length: usize::MAX })?;
        ensure!(LENGTH_RANGE.contains(&length), InvalidLengthSnafu { length });
        Ok(Self(length as u8))
    }

    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl Deref for Length {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<usize> for Length {
    fn eq(&self, other: &usize) -> bool {
        self.0 as usize == *other
    }
}

impl TryFrom<usize> for Length {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Trait to convert `T: TryInto<usize>` into a [`Length`].
pub trait IntoLength {
    /// Convert `self` to `Length`.
    /// # Errors
    /// Returns [`Error::InvalidLength`] if `self` can't be converted.
    fn into_length(self) -> Result<Length, Error>;
}

impl IntoLength for Length {
    fn into_length(self) -> Result<Length, Error> {
        Ok(self)
    }
}

impl<T> IntoLength for T
where
    T: TryInto<usize>,
{
    fn into_length(self) -> Result<Length, Error> {
        Length::new(self)
    }
}


/// A value written to the station, either a nibble or a bit index.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Nibble(u8);

impl Nibble {
    /// Create a new `Nibble`, checking that `value` is in \[0, 15\].
    /// # Errors
    /// Returns [`Error::InvalidNibble`] if `value` doesn't fit in four bits.
    pub fn new(value: u8) -> Result<Self, Error> {
        ensure!(value <= 0x0f, InvalidNibbleSnafu { value });
        Ok(Self(value))
    }

    /// Create the index of one bit of a nibble.
    /// # Errors
    /// Returns [`Error::InvalidBit`] if `bit` isn't in \[0, 3\].
    pub fn bit(bit: u8) -> Result<Self, Error> {
        ensure!(bit <= 3, InvalidBitSnafu { bit });
        Ok(Self(bit))
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Split a byte into its (low, high) nibbles.
    pub const fn split(byte: u8) -> (Self, Self) {
        (Self(byte & 0x0f), Self(byte >> 4))
    }
}

impl Deref for Nibble {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for Nibble {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
