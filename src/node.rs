//! Station side of the WS2300 protocol, for simulators and tests.
//! See [`NodeState`] for more details.

use arrayvec::ArrayVec;
use log::trace;

use crate::telegram::{
    address_ack, address_nibble, checksum, data_ack, decode_length, length_ack, EncodeMode,
    RESET_ACK, RESET_COMMAND,
};
use crate::types::{Address, Length, Nibble};
use crate::Data;

/// Station (listener) part of the WS2300 protocol.
///
/// This enum represents the different states of the protocol. It decodes
/// the master's bytes and produces the station's acknowledges, while the
/// application decides what the memory holds.
///
/// Bytes that don't fit the telegram in progress are dropped without a
/// reply, leaving the master to time out and reset.
///
/// # Example
///
/// ```
/// use ws2300_proto::node::{Memory, NodeState};
/// use ws2300_proto::addr;
///
/// let mut memory = Memory::new();
/// memory.write(addr(0x5d8), &[0x12, 0x34, 0x01]);
///
/// let mut node = NodeState::new();
/// let mut input = vec![0x06, 0x82, 0x96, 0xb6, 0xa2, 0xce].into_iter();
/// let mut output = Vec::new();
/// loop {
///     node = match node {
///         NodeState::ReceiveData(recv) => match input.next() {
///             Some(byte) => recv.receive_data(&[byte]),
///             None => break,
///         },
///         NodeState::SendData(send) => {
///             output.extend_from_slice(send.get_data());
///             send.data_sent()
///         }
///         NodeState::ReadMemory(read) => {
///             let data = memory.read(read.address(), read.length());
///             read.send_reply(&data)
///         }
///         NodeState::WriteMemory(write) => {
///             memory.apply(write.address(), write.mode(), write.value());
///             write.write_ok()
///         }
///     };
/// }
/// assert_eq!(output, [0x02, 0x00, 0x15, 0x2d, 0x38, 0x33, 0x12, 0x34, 0x01, 0x47]);
/// ```
#[derive(Debug)]
pub enum NodeState {
    /// Waiting for a byte from the master. Use receive_data() on the inner struct.
    ReceiveData(ReceiveData),
    /// Data is waiting to be transmitted.
    SendData(SendData),
    /// The master asked for the contents of memory.
    ReadMemory(ReadMemory),
    /// The master sent a data byte to store.
    WriteMemory(WriteMemory),
}

impl NodeState {
    /// Create a new station, waiting for a reset.
    pub fn new() -> Self {
        ReceiveData::new().into()
    }

    /// Do not send any reply to the master. Transition to the idle `ReceiveData` state instead.
    pub fn no_reply(self) -> Self {
        match self {
            Self::ReceiveData(ReceiveData { state })
            | Self::SendData(SendData { state, .. })
            | Self::ReadMemory(ReadMemory { state, .. })
            | Self::WriteMemory(WriteMemory { state, .. }) => ReceiveData::idle(state),
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ReceiveData> for NodeState {
    fn from(x: ReceiveData) -> Self {
        Self::ReceiveData(x)
    }
}

impl From<SendData> for NodeState {
    fn from(x: SendData) -> Self {
        Self::SendData(x)
    }
}

impl From<ReadMemory> for NodeState {
    fn from(x: ReadMemory) -> Self {
        Self::ReadMemory(x)
    }
}

impl From<WriteMemory> for NodeState {
    fn from(x: WriteMemory) -> Self {
        Self::WriteMemory(x)
    }
}

type CommonState = Box<CommonStateStruct>;

#[derive(Debug, Default)]
struct CommonStateStruct {
    // address nibbles received so far, most significant first
    nibbles: ArrayVec<u8, 4>,
}

impl CommonStateStruct {
    fn address(&self) -> Option<Address> {
        if self.nibbles.is_full() {
            let address = self
                .nibbles
                .iter()
                .fold(0u16, |a, &n| (a << 4) | u16::from(n));
            Some(address.into())
        } else {
            None
        }
    }

    fn set_address(&mut self, address: Address) {
        self.nibbles.clear();
        self.nibbles.extend(address.nibbles().iter().copied());
    }
}

/// Struct with methods for the "receive byte from master" state.
#[derive(Debug)]
pub struct ReceiveData {
    state: CommonState,
}

impl ReceiveData {
    /// Create a new station in the "receive" state without the `NodeState` wrapper.
    pub fn new() -> Self {
        Self {
            state: Box::new(CommonStateStruct::default()),
        }
    }

    fn idle(state: CommonState) -> NodeState {
        Self { state }.into()
    }

    /// Feed bytes from the master. Bytes are handled one at a time, any
    /// bytes left after the first transition are discarded.
    pub fn receive_data(mut self, data: &[u8]) -> NodeState {
        for &byte in data {
            match self.receive_byte(byte) {
                Ok(next) => return next,
                Err(recv) => self = recv,
            }
        }
        self.into()
    }

    fn receive_byte(mut self, byte: u8) -> Result<NodeState, Self> {
        if byte == RESET_COMMAND {
            self.state.nibbles.clear();
            return Ok(SendData::from_bytes(self.state, &[RESET_ACK]));
        }

        if let Some(address) = self.state.address() {
            if let Some(length) = decode_length(byte) {
                self.state.nibbles.clear();
                return Ok(ReadMemory::from_state(self.state, address, length));
            }
            if let Some((mode, value)) = EncodeMode::from_data_byte(byte) {
                return Ok(WriteMemory::from_state(self.state, address, mode, value));
            }
        } else if let Some(nibble) = address_nibble(byte) {
            let index = self.state.nibbles.len();
            self.state.nibbles.push(nibble);
            return Ok(SendData::from_bytes(self.state, &[address_ack(index, byte)]));
        }

        trace!("Dropped unexpected byte {:#04x}", byte);
        Err(self)
    }
}

impl Default for ReceiveData {
    fn default() -> Self {
        Self::new()
    }
}

// length acknowledge, 15 data bytes, checksum
type SendDataStore = ArrayVec<u8, 17>;

/// Struct with methods for the "transmit data to master" state.
///
/// Call [`get_data()`](Self::get_data()) to get a reference to the data to be transmitted,
/// and then call [`data_sent()`](Self::data_sent()) when the data has been successfully transmitted.
#[derive(Debug)]
pub struct SendData {
    state: CommonState,
    data: SendDataStore,
}

impl SendData {
    fn from_state(state: CommonState, data: SendDataStore) -> NodeState {
        Self { state, data }.into()
    }

    fn from_bytes(state: CommonState, bytes: &[u8]) -> NodeState {
        Self::from_state(state, bytes.iter().copied().collect())
    }

    /// Returns the data to be sent to the master.
    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    /// Signals that the data was sent, and it's time to go back to the
    /// `ReceiveData` state.
    pub fn data_sent(self) -> NodeState {
        ReceiveData::idle(self.state)
    }
}

/// Struct representing the "read request received" state.
#[derive(Debug)]
pub struct ReadMemory {
    state: CommonState,
    address: Address,
    length: Length,
}

impl ReadMemory {
    fn from_state(state: CommonState, address: Address, length: Length) -> NodeState {
        Self {
            state,
            address,
            length,
        }
        .into()
    }

    /// Answer the read with `data`. The reply is zero padded or truncated
    /// to the requested length.
    pub fn send_reply(self, data: &[u8]) -> NodeState {
        let mut reply = SendDataStore::new();
        reply.push(length_ack(self.length));
        reply.extend(
            data.iter()
                .copied()
                .chain(core::iter::repeat(0))
                .take(self.length.get()),
        );
        reply.push(checksum(&reply[1..]));
        SendData::from_state(self.state, reply)
    }

    /// Do not send any reply to the master. Transition to the idle `ReceiveData` state instead.
    pub fn no_reply(self) -> NodeState {
        ReceiveData::idle(self.state)
    }

    /// The first address to read.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The number of bytes requested.
    pub const fn length(&self) -> Length {
        self.length
    }
}

/// Struct representing the "data byte received" state.
#[derive(Debug)]
pub struct WriteMemory {
    state: CommonState,
    address: Address,
    mode: EncodeMode,
    value: Nibble,
}

impl WriteMemory {
    fn from_state(state: CommonState, address: Address, mode: EncodeMode, value: Nibble) -> NodeState {
        Self {
            state,
            address,
            mode,
            value,
        }
        .into()
    }

    /// Acknowledge the data byte. The next data byte goes to the following address.
    pub fn write_ok(mut self) -> NodeState {
        self.state.set_address(self.address.next());
        SendData::from_bytes(self.state, &[data_ack(self.mode, self.value)])
    }

    /// Do not send any reply to the master. Transition to the idle `ReceiveData` state instead.
    pub fn no_reply(self) -> NodeState {
        ReceiveData::idle(self.state)
    }

    /// The nibble to update.
    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn mode(&self) -> EncodeMode {
        self.mode
    }

    /// The nibble value, or the bit index for the bit modes.
    pub const fn value(&self) -> Nibble {
        self.value
    }
}

/// The station's memory, one nibble per address.
#[derive(Clone)]
pub struct Memory {
    nibbles: Box<[u8]>,
}

impl Memory {
    /// Create a memory with every nibble cleared.
    pub fn new() -> Self {
        Self {
            nibbles: vec![0; 0x1_0000].into_boxed_slice(),
        }
    }

    pub fn get(&self, address: Address) -> u8 {
        self.nibbles[usize::from(*address)]
    }

    /// Store the low nibble of `value`.
    pub fn set(&mut self, address: Address, value: u8) {
        self.nibbles[usize::from(*address)] = value & 0x0f;
    }

    /// Store `bytes` from `address` on, low nibble first.
    pub fn write(&mut self, address: Address, bytes: &[u8]) {
        let mut address = address;
        for &byte in bytes {
            let (low, high) = Nibble::split(byte);
            self.set(address, low.get());
            address = address.next();
            self.set(address, high.get());
            address = address.next();
        }
    }

    /// The bytes a read telegram returns. Byte `i` holds the nibble at
    /// `address + 2i` in its low half and the next nibble in its high half.
    pub fn read(&self, address: Address, length: Length) -> Data {
        let mut address = address;
        (0..length.get())
            .map(|_| {
                let low = self.get(address);
                address = address.next();
                let high = self.get(address);
                address = address.next();
                low | high << 4
            })
            .collect()
    }

    /// Apply a data byte received from the master.
    pub fn apply(&mut self, address: Address, mode: EncodeMode, value: Nibble) {
        let current = self.get(address);
        let updated = match mode {
            EncodeMode::WriteNibble => value.get(),
            EncodeMode::SetBit => current | 1 << value.get(),
            EncodeMode::ClearBit => current & !(1 << value.get()),
        };
        self.set(address, updated);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let used = self.nibbles.iter().filter(|&&n| n != 0).count();
        f.debug_struct("Memory").field("nonzero", &used).finish()
    }
}
