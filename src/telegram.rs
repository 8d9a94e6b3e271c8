//! Byte-level encoding of WS2300 telegrams.
//!
//! Every byte the master puts on the wire is biased into a range the station
//! can't confuse with the reset command ([`RESET_COMMAND`]) or its reply
//! ([`RESET_ACK`]). The station answers each byte with an acknowledge that is
//! derived from the byte itself, which is computed by the `*_ack` functions.

use crate::types::{Address, Length, Nibble};

/// Sent by the master to resynchronize the station.
pub const RESET_COMMAND: u8 = 0x06;
/// The station's reply to [`RESET_COMMAND`].
pub const RESET_ACK: u8 = 0x02;

const ADDRESS_BASE: u8 = 0x82;
const LENGTH_BASE: u8 = 0xc2;
const LENGTH_MAX_CODE: u8 = 0xfe;
const LENGTH_ACK_BASE: u8 = 0x30;

/// The write semantics applied to a data byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EncodeMode {
    /// Store the value in the addressed nibble.
    WriteNibble,
    /// Set the given bit of the addressed nibble.
    SetBit,
    /// Clear the given bit of the addressed nibble.
    ClearBit,
}

impl EncodeMode {
    pub const fn base(self) -> u8 {
        match self {
            Self::WriteNibble => 0x42,
            Self::SetBit => 0x12,
            Self::ClearBit => 0x32,
        }
    }

    /// Offset the station adds to the value when acknowledging a data byte.
    pub const fn ack_offset(self) -> u8 {
        match self {
            Self::WriteNibble => 0x10,
            Self::SetBit => 0x04,
            Self::ClearBit => 0x0c,
        }
    }

    /// The largest value a data byte can carry, bit modes take a bit index.
    pub const fn max_value(self) -> u8 {
        match self {
            Self::WriteNibble => 0x0f,
            Self::SetBit | Self::ClearBit => 3,
        }
    }

    /// Find the mode of an encoded data byte.
    pub fn from_data_byte(byte: u8) -> Option<(Self, Nibble)> {
        [Self::WriteNibble, Self::SetBit, Self::ClearBit]
            .iter()
            .find_map(|&mode| {
                let offset = byte.checked_sub(mode.base())?;
                if offset % 4 == 0 && offset / 4 <= mode.max_value() {
                    Some((mode, Nibble::new(offset / 4).ok()?))
                } else {
                    None
                }
            })
    }
}

/// Encode a register address into the four address bytes of a telegram,
/// most significant nibble first.
pub const fn encode_address(address: Address) -> [u8; 4] {
    let nibbles = address.nibbles();
    [
        ADDRESS_BASE + nibbles[0] * 4,
        ADDRESS_BASE + nibbles[1] * 4,
        ADDRESS_BASE + nibbles[2] * 4,
        ADDRESS_BASE + nibbles[3] * 4,
    ]
}

/// Returns the nibble carried by an address byte, or `None` if `byte` isn't one.
pub const fn address_nibble(byte: u8) -> Option<u8> {
    if byte >= ADDRESS_BASE && byte <= ADDRESS_BASE + 0x0f * 4 && (byte - ADDRESS_BASE) % 4 == 0 {
        Some((byte - ADDRESS_BASE) / 4)
    } else {
        None
    }
}

/// Inverse of [`encode_address`].
pub fn decode_address(bytes: &[u8; 4]) -> Option<Address> {
    let mut address = 0u16;
    for &byte in bytes {
        address = (address << 4) | u16::from(address_nibble(byte)?);
    }
    Some(address.into())
}

/// The acknowledge for the address byte at position `index` (0..4) of a telegram.
pub const fn address_ack(index: usize, byte: u8) -> u8 {
    (index as u8).wrapping_mul(16).wrapping_add(byte.wrapping_sub(ADDRESS_BASE) / 4)
}

/// The length code asking the station for `length` bytes.
pub const fn length_code(length: Length) -> u8 {
    let code = LENGTH_BASE as u16 + length.get() as u16 * 4;
    if code > LENGTH_MAX_CODE as u16 {
        LENGTH_MAX_CODE
    } else {
        code as u8
    }
}

/// Returns the byte count carried by a length code, or `None` if `byte` isn't one.
pub fn decode_length(byte: u8) -> Option<Length> {
    let offset = byte.checked_sub(LENGTH_BASE)?;
    if offset % 4 != 0 {
        return None;
    }
    Length::new(offset / 4).ok()
}

/// The acknowledge for the length code of a read telegram.
pub const fn length_ack(length: Length) -> u8 {
    LENGTH_ACK_BASE + length.get() as u8
}

/// Checksum over the data bytes of a read reply.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Encode a nibble value or bit index for transmission.
pub const fn encode_data(mode: EncodeMode, value: Nibble) -> u8 {
    mode.base() + value.get() * 4
}

/// The acknowledge for a data byte written with `mode`.
pub const fn data_ack(mode: EncodeMode, value: Nibble) -> u8 {
    value.get() + mode.ack_offset()
}

/// The five bytes opening a read telegram, paired with the acknowledge the
/// station answers each of them with.
pub fn read_setup(address: Address, length: Length) -> [(u8, u8); 5] {
    let mut setup = [(0, 0); 5];
    for (i, &byte) in encode_address(address).iter().enumerate() {
        setup[i] = (byte, address_ack(i, byte));
    }
    setup[4] = (length_code(length), length_ack(length));
    setup
}
