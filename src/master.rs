//! Master (controller) side of the WS2300 protocol.
//!
//! The protocol is driven by two state machines that perform no I/O themselves:
//! [`ResetState`] resynchronizes the station, and [`TelegramState`] runs a single
//! read or write telegram once the station is in sync. The [`io::Master`] type
//! drives both over a [`Transport`](crate::transport::Transport) and adds the
//! retry envelope.

use arrayvec::ArrayVec;
use core::fmt;
use core::time::Duration;
use snafu::{ensure, OptionExt, Snafu};

use crate::telegram::{
    address_ack, checksum, data_ack, encode_address, encode_data, read_setup, EncodeMode,
    RESET_ACK, RESET_COMMAND,
};
use crate::types::{Address, Error as TypeError, Length, Nibble};

pub mod io;

/// Data bytes returned by a read telegram.
pub type Data = ArrayVec<u8, 15>;

/// Attempt budgets and back-off for the protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    transaction_attempts: u32,
    reset_attempts: u32,
    reset_backoff: Duration,
}

impl RetryPolicy {
    pub const TRANSACTION_ATTEMPTS: u32 = 50;
    pub const RESET_ATTEMPTS: u32 = 100;
    pub const RESET_BACKOFF: Duration = Duration::from_millis(50);

    pub const fn new() -> Self {
        Self {
            transaction_attempts: Self::TRANSACTION_ATTEMPTS,
            reset_attempts: Self::RESET_ATTEMPTS,
            reset_backoff: Self::RESET_BACKOFF,
        }
    }

    /// Number of times a telegram is tried before giving up. At least one.
    pub fn with_transaction_attempts(mut self, attempts: u32) -> Self {
        self.transaction_attempts = attempts.max(1);
        self
    }

    /// Number of reset commands sent before the station is considered dead. At least one.
    pub fn with_reset_attempts(mut self, attempts: u32) -> Self {
        self.reset_attempts = attempts.max(1);
        self
    }

    /// The pause after failed reset attempt `n` is `n * backoff`.
    pub fn with_reset_backoff(mut self, backoff: Duration) -> Self {
        self.reset_backoff = backoff;
        self
    }

    pub const fn transaction_attempts(&self) -> u32 {
        self.transaction_attempts
    }

    pub const fn reset_attempts(&self) -> u32 {
        self.reset_attempts
    }

    pub const fn reset_backoff(&self) -> Duration {
        self.reset_backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Reset handshake.
///
/// Each attempt clears the input buffer and sends [`RESET_COMMAND`], then
/// receives bytes until either [`RESET_ACK`] arrives or a read times out.
/// Other bytes, including the occasional zero, are drained. A failed attempt
/// is followed by a pause that grows linearly with the attempt number.
///
/// # Example
///
/// ```
/// use ws2300_proto::master::{ResetState, RetryPolicy};
///
/// let mut reset = ResetState::new(&RetryPolicy::default());
/// let mut replies = vec![0x02, 0x00];
/// loop {
///     reset = match reset {
///         ResetState::SendCommand(send) => {
///             assert_eq!(send.get_data(), &[0x06]);
///             send.data_sent()
///         }
///         ResetState::ReceiveData(recv) => {
///             let byte = replies.pop();
///             recv.receive_data(byte.as_slice())
///         }
///         ResetState::Backoff(backoff) => backoff.elapsed(),
///         ResetState::Done => break,
///         ResetState::Failed { .. } => panic!("the station answered"),
///     }
/// }
/// ```
#[derive(Debug)]
pub enum ResetState {
    /// Clear the input buffer, then send the data from [`SendReset::get_data()`].
    SendCommand(SendReset),
    /// Receive one byte from the station. An empty slice means the read timed out.
    ReceiveData(ReceiveReset),
    /// Wait [`Backoff::delay()`] before the next attempt.
    Backoff(Backoff),
    /// The station is in sync.
    Done,
    /// The station never acknowledged the reset.
    Failed { attempts: u32 },
}

impl ResetState {
    pub fn new(policy: &RetryPolicy) -> Self {
        SendReset {
            counter: ResetCounter {
                attempt: 0,
                attempts: policy.reset_attempts,
                backoff: policy.reset_backoff,
            },
        }
        .into()
    }
}

impl From<SendReset> for ResetState {
    fn from(x: SendReset) -> Self {
        Self::SendCommand(x)
    }
}

impl From<ReceiveReset> for ResetState {
    fn from(x: ReceiveReset) -> Self {
        Self::ReceiveData(x)
    }
}

impl From<Backoff> for ResetState {
    fn from(x: Backoff) -> Self {
        Self::Backoff(x)
    }
}

#[derive(Debug, Copy, Clone)]
struct ResetCounter {
    attempt: u32,
    attempts: u32,
    backoff: Duration,
}

impl ResetCounter {
    fn attempt_failed(self) -> ResetState {
        let failed = self.attempt + 1;
        if failed >= self.attempts {
            ResetState::Failed { attempts: failed }
        } else {
            Backoff { counter: self }.into()
        }
    }
}

/// Struct with methods for the "send reset command" state.
#[derive(Debug)]
pub struct SendReset {
    counter: ResetCounter,
}

impl SendReset {
    /// Zero based number of the current attempt.
    pub const fn attempt(&self) -> u32 {
        self.counter.attempt
    }

    /// Returns the data to be sent to the station.
    pub fn get_data(&self) -> &'static [u8] {
        &[RESET_COMMAND]
    }

    /// Signals that the reset command was sent.
    pub fn data_sent(self) -> ResetState {
        ReceiveReset {
            counter: self.counter,
        }
        .into()
    }
}

/// Struct with methods for the "drain reset reply" state.
#[derive(Debug)]
pub struct ReceiveReset {
    counter: ResetCounter,
}

impl ReceiveReset {
    /// Feed the result of one read into the handshake.
    pub fn receive_data(self, data: &[u8]) -> ResetState {
        if data.contains(&RESET_ACK) {
            ResetState::Done
        } else if data.is_empty() {
            self.counter.attempt_failed()
        } else {
            self.into()
        }
    }
}

/// Struct representing the pause between two reset attempts.
#[derive(Debug)]
pub struct Backoff {
    counter: ResetCounter,
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        self.counter.backoff * self.counter.attempt
    }

    /// Signals that the delay has passed, and it's time to try again.
    pub fn elapsed(self) -> ResetState {
        let mut counter = self.counter;
        counter.attempt += 1;
        SendReset { counter }.into()
    }
}

/// The part of a telegram a byte belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Address(u8),
    Length,
    Data(u8),
    Checksum,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(i) => write!(f, "address byte {}", i),
            Self::Length => write!(f, "length byte"),
            Self::Data(i) => write!(f, "data byte {}", i),
            Self::Checksum => write!(f, "checksum"),
        }
    }
}

/// The station's reply didn't match the telegram being sent.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Desync {
    #[snafu(display("No reply for {stage}"))]
    NoReply { stage: Stage },
    #[snafu(display("Wrong acknowledge for {stage}: expected {expected:#04x}, received {received:#04x}"))]
    WrongAck {
        stage: Stage,
        expected: u8,
        received: u8,
    },
    #[snafu(display("Checksum mismatch: expected {expected:#04x}, received {received:#04x}"))]
    Checksum { expected: u8, received: u8 },
}

/// A single read or write telegram.
///
/// Feed the state machine until it reaches [`TelegramState::Complete`]. Every
/// mismatch is reported as a [`Desync`], after which the station has to be
/// reset before the next telegram.
///
/// # Example
///
/// ```
/// use ws2300_proto::master::TelegramState;
/// use ws2300_proto::{addr, len};
///
/// let mut station_replies = vec![0x00, 0x15, 0x2d, 0x38, 0x33, 0x12, 0x34, 0x01, 0x47].into_iter();
/// let mut telegram = TelegramState::read(addr(0x5d8), len(3));
/// let data = loop {
///     telegram = match telegram {
///         TelegramState::SendData(send) => send.data_sent(),
///         TelegramState::ReceiveData(recv) => {
///             let byte = station_replies.next();
///             recv.receive_data(byte.as_slice()).unwrap()
///         }
///         TelegramState::Complete(data) => break data,
///     }
/// };
/// assert_eq!(data.as_slice(), &[0x12, 0x34, 0x01]);
/// ```
#[derive(Debug, Clone)]
pub enum TelegramState {
    /// A byte is waiting to be sent to the station.
    SendData(SendData),
    /// One byte must be received from the station.
    ReceiveData(ReceiveData),
    /// The telegram is done. Holds the data of a read, and nothing for a write.
    Complete(Data),
}

impl TelegramState {
    /// Start a telegram reading `length` bytes from `address`.
    pub fn read(address: Address, length: Length) -> Self {
        let header = read_setup(address, length).iter().copied().collect();
        Frame::start(header, Body::Read(length))
    }

    /// Start a telegram writing `values` to consecutive nibbles from `address`.
    /// For the bit modes the values are bit indexes.
    /// # Errors
    /// Returns [`TypeError::InvalidLength`] unless there are 1 to 15 values, and
    /// [`TypeError::InvalidBit`] if a bit index is out of range.
    pub fn write(address: Address, mode: EncodeMode, values: &[Nibble]) -> Result<Self, TypeError> {
        Length::new(values.len())?;
        if mode != EncodeMode::WriteNibble {
            for value in values {
                Nibble::bit(value.get())?;
            }
        }

        let header = encode_address(address)
            .iter()
            .enumerate()
            .map(|(i, &byte)| (byte, address_ack(i, byte)))
            .collect();
        let values = values.iter().copied().collect();
        Ok(Frame::start(header, Body::Write(mode, values)))
    }
}

impl From<SendData> for TelegramState {
    fn from(x: SendData) -> Self {
        Self::SendData(x)
    }
}

impl From<ReceiveData> for TelegramState {
    fn from(x: ReceiveData) -> Self {
        Self::ReceiveData(x)
    }
}

type FrameState = Box<Frame>;

#[derive(Debug, Clone)]
enum Body {
    Read(Length),
    Write(EncodeMode, ArrayVec<Nibble, 15>),
}

#[derive(Debug, Clone)]
struct Frame {
    // (byte, acknowledge) pairs sent before the body
    header: ArrayVec<(u8, u8), 5>,
    body: Body,
    pos: usize,
    data: Data,
}

#[derive(Debug, Copy, Clone)]
enum Expect {
    Ack { stage: Stage, value: u8 },
    Data(u8),
    Checksum,
}

impl Frame {
    fn start(header: ArrayVec<(u8, u8), 5>, body: Body) -> TelegramState {
        Self::next(Box::new(Self {
            header,
            body,
            pos: 0,
            data: Data::new(),
        }))
    }

    fn next(frame: FrameState) -> TelegramState {
        let header_len = frame.header.len();
        if let Some((byte, ack)) = frame.header.get(frame.pos).copied() {
            let stage = if frame.pos < 4 {
                Stage::Address(frame.pos as u8)
            } else {
                Stage::Length
            };
            return SendData::from_frame(frame, byte, Expect::Ack { stage, value: ack });
        }

        let i = frame.pos - header_len;
        // (byte to send, reply to expect), None once the telegram is done
        let step = match &frame.body {
            Body::Read(length) if i < length.get() => Some((None, Expect::Data(i as u8))),
            Body::Read(_) => Some((None, Expect::Checksum)),
            Body::Write(mode, values) => values.get(i).map(|&value| {
                let expect = Expect::Ack {
                    stage: Stage::Data(i as u8),
                    value: data_ack(*mode, value),
                };
                (Some(encode_data(*mode, value)), expect)
            }),
        };

        match step {
            Some((Some(byte), expect)) => SendData::from_frame(frame, byte, expect),
            Some((None, expect)) => ReceiveData::from_frame(frame, expect),
            None => TelegramState::Complete(Data::new()),
        }
    }
}

/// Struct with methods for the "transmit byte to station" state.
///
/// Call [`get_data()`](Self::get_data()) to get the byte to be transmitted,
/// and then call [`data_sent()`](Self::data_sent()) once the line has drained.
#[derive(Debug, Clone)]
pub struct SendData {
    frame: FrameState,
    data: [u8; 1],
    expect: Expect,
}

impl SendData {
    fn from_frame(frame: FrameState, byte: u8, expect: Expect) -> TelegramState {
        Self {
            frame,
            data: [byte],
            expect,
        }
        .into()
    }

    /// Returns the data to be sent to the station.
    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    /// Signals that the data was sent, and it's time to receive the acknowledge.
    pub fn data_sent(self) -> TelegramState {
        ReceiveData::from_frame(self.frame, self.expect)
    }
}

/// Struct with methods for the "receive byte from station" state.
#[derive(Debug, Clone)]
pub struct ReceiveData {
    frame: FrameState,
    expect: Expect,
}

impl ReceiveData {
    fn from_frame(frame: FrameState, expect: Expect) -> TelegramState {
        Self { frame, expect }.into()
    }

    /// The part of the telegram the next byte belongs to.
    pub fn stage(&self) -> Stage {
        match self.expect {
            Expect::Ack { stage, .. } => stage,
            Expect::Data(i) => Stage::Data(i),
            Expect::Checksum => Stage::Checksum,
        }
    }

    /// Feed the result of one read into the telegram. Only the first byte of
    /// `data` is used, an empty slice means the read timed out.
    /// # Errors
    /// Returns a [`Desync`] if the byte is missing or doesn't match.
    pub fn receive_data(self, data: &[u8]) -> Result<TelegramState, Desync> {
        let stage = self.stage();
        let received = *data.first().context(NoReplySnafu { stage })?;
        let mut frame = self.frame;

        match self.expect {
            Expect::Ack { stage, value } => {
                ensure!(
                    received == value,
                    WrongAckSnafu {
                        stage,
                        expected: value,
                        received
                    }
                );
            }
            Expect::Data(_) => frame.data.push(received),
            Expect::Checksum => {
                let expected = checksum(&frame.data);
                ensure!(received == expected, ChecksumSnafu { expected, received });
                return Ok(TelegramState::Complete(frame.data));
            }
        }
        frame.pos += 1;
        Ok(Frame::next(frame))
    }
}
