//! Blocking driver for the master state machines.

use std::io::ErrorKind;

use log::{debug, error, trace, warn};
use snafu::{ensure, ResultExt, Snafu};

use super::{Data, Desync, ResetState, RetryPolicy, TelegramState};
use crate::telegram::EncodeMode;
use crate::transport::Transport;
use crate::types::{addr, Address, Error as TypeError, IntoAddress, IntoLength, Nibble};

/// Register holding the backlight control bit.
pub const LIGHT_ADDRESS: Address = addr(0x016);
/// Bit of [`LIGHT_ADDRESS`] that switches the backlight.
pub const LIGHT_BIT: u8 = 3;

/// Why a single telegram attempt was abandoned.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum AttemptError {
    #[snafu(display("Protocol desync: {source}"), context(false))]
    ProtocolDesync { source: Desync },
    #[snafu(display("I/O error"))]
    Io { source: std::io::Error },
    #[snafu(display("Byte not written to the line"))]
    ShortWrite,
}

/// Error type returned by [`Master`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The request was rejected before anything was sent.
    #[snafu(display("Invalid request"), context(false))]
    InvalidRequest { source: TypeError },
    /// The station never answered the reset command.
    #[snafu(display("Station did not answer {attempts} reset attempts"))]
    ResetFailed { attempts: u32 },
    /// The transport failed while resetting the station.
    #[snafu(display("I/O error during reset"))]
    ResetIo { source: std::io::Error },
    /// Every attempt at the telegram failed. `source` is the cause of the last one.
    #[snafu(display("Communication failed after {attempts} attempts"))]
    CommunicationError { attempts: u32, source: AttemptError },
}

/// Talks to a station over a [`Transport`].
///
/// Every operation resets the station, then runs its telegram. A telegram
/// that fails is retried from the reset, up to the
/// [`RetryPolicy::transaction_attempts()`] limit. A station that doesn't
/// answer the reset fails the operation at once.
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "serial")]
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # use ws2300_proto::transport::SerialTransport;
/// use ws2300_proto::Master;
///
/// let mut station = Master::new(SerialTransport::open("/dev/ttyUSB0")?);
/// let data = station.read(0x5d8, 3)?;
/// station.set_light(true)?;
/// # Ok(()) }
/// # #[cfg(not(feature = "serial"))]
/// # fn main() {}
/// ```
#[derive(Debug)]
pub struct Master<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> Master<T> {
    pub fn new(transport: T) -> Self {
        Self::with_policy(transport, RetryPolicy::default())
    }

    pub fn with_policy(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Bring the station into a known state, ready for a telegram.
    /// # Errors
    /// Returns [`Error::ResetFailed`] if no reset attempt was acknowledged, and
    /// [`Error::ResetIo`] at once if the transport fails with anything but a
    /// timeout.
    pub fn reset(&mut self) -> Result<(), Error> {
        let mut state = ResetState::new(&self.policy);
        loop {
            state = match state {
                ResetState::SendCommand(send) => {
                    trace!("Reset attempt {}", send.attempt());
                    // Stale bytes in either direction would be taken for the reply.
                    if let Err(err) = self.transport.flush_output() {
                        warn!("Discarding output before reset failed: {}", err);
                    }
                    if let Err(err) = self.transport.clear_input() {
                        warn!("Discarding input before reset failed: {}", err);
                    }
                    match self.transport.write(send.get_data()) {
                        Err(err) if !is_transient(&err) => {
                            error!("Sending reset failed: {}", err);
                            return Err(err).context(ResetIoSnafu);
                        }
                        // a lost command shows up as a missing reply
                        Err(err) => debug!("Sending reset timed out: {}", err),
                        Ok(_) => {}
                    }
                    send.data_sent()
                }
                ResetState::ReceiveData(recv) => {
                    let mut buf = [0u8; 1];
                    let len = match self.transport.read(&mut buf) {
                        Ok(len) => len,
                        Err(err) if is_transient(&err) => {
                            debug!("Reading reset reply timed out: {}", err);
                            0
                        }
                        Err(err) => {
                            error!("Reading reset reply failed: {}", err);
                            return Err(err).context(ResetIoSnafu);
                        }
                    };
                    trace!("Reset reply {:02x?}", &buf[..len]);
                    recv.receive_data(&buf[..len])
                }
                ResetState::Backoff(backoff) => {
                    self.transport.pause(backoff.delay());
                    backoff.elapsed()
                }
                ResetState::Done => return Ok(()),
                ResetState::Failed { attempts } => {
                    error!("Station did not answer {} reset attempts", attempts);
                    return ResetFailedSnafu { attempts }.fail();
                }
            }
        }
    }

    /// Read `length` bytes starting at `address`. Each byte holds two
    /// nibbles, the low nibble from `address` and the high one from the next.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `length` isn't in 1..=15, without
    /// touching the line.
    pub fn read(&mut self, address: impl IntoAddress, length: impl IntoLength) -> Result<Data, Error> {
        let address = address.into_address()?;
        let length = length.into_length()?;
        debug!("Read {} bytes from {}", *length, address);
        self.transaction(TelegramState::read(address, length))
    }

    /// Store `values` in consecutive nibbles starting at `address`.
    pub fn write_nibbles(&mut self, address: impl IntoAddress, values: &[u8]) -> Result<(), Error> {
        let address = address.into_address()?;
        let values = values
            .iter()
            .map(|&v| Nibble::new(v))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Write {:x?} to {}", values.iter().map(|v| v.get()).collect::<Vec<_>>(), address);
        self.write(address, EncodeMode::WriteNibble, &values)
    }

    /// Set bit `bit` (0..=3) of the nibble at `address`.
    pub fn set_bit(&mut self, address: impl IntoAddress, bit: u8) -> Result<(), Error> {
        let address = address.into_address()?;
        debug!("Set bit {} at {}", bit, address);
        self.write(address, EncodeMode::SetBit, &[Nibble::bit(bit)?])
    }

    /// Clear bit `bit` (0..=3) of the nibble at `address`.
    pub fn clear_bit(&mut self, address: impl IntoAddress, bit: u8) -> Result<(), Error> {
        let address = address.into_address()?;
        debug!("Clear bit {} at {}", bit, address);
        self.write(address, EncodeMode::ClearBit, &[Nibble::bit(bit)?])
    }

    /// Switch the display backlight.
    pub fn set_light(&mut self, on: bool) -> Result<(), Error> {
        if on {
            self.set_bit(LIGHT_ADDRESS, LIGHT_BIT)
        } else {
            self.clear_bit(LIGHT_ADDRESS, LIGHT_BIT)
        }
    }

    fn write(&mut self, address: Address, mode: EncodeMode, values: &[Nibble]) -> Result<(), Error> {
        let telegram = TelegramState::write(address, mode, values)?;
        self.transaction(telegram).map(|_| ())
    }

    fn transaction(&mut self, telegram: TelegramState) -> Result<Data, Error> {
        let attempts = self.policy.transaction_attempts();
        let mut attempt = 1;
        loop {
            self.reset()?;
            let err = match self.run_telegram(telegram.clone()) {
                Ok(data) => return Ok(data),
                Err(err) => err,
            };
            if attempt >= attempts {
                error!("Giving up after {} attempts: {}", attempts, err);
                return Err(err).context(CommunicationSnafu { attempts });
            }
            warn!("Attempt {} of {} failed: {}", attempt, attempts, err);
            attempt += 1;
        }
    }

    fn run_telegram(&mut self, mut telegram: TelegramState) -> Result<Data, AttemptError> {
        loop {
            telegram = match telegram {
                TelegramState::SendData(send) => {
                    let data = send.get_data();
                    trace!("Send {:02x?}", data);
                    let len = self.transport.write(data).context(IoSnafu)?;
                    ensure!(len == data.len(), ShortWriteSnafu);
                    send.data_sent()
                }
                TelegramState::ReceiveData(recv) => {
                    let mut buf = [0u8; 1];
                    let len = self.transport.read(&mut buf).context(IoSnafu)?;
                    trace!("Received {:02x?} for {}", &buf[..len], recv.stage());
                    recv.receive_data(&buf[..len])?
                }
                TelegramState::Complete(data) => return Ok(data),
            }
        }
    }
}

// Errors that mean "nothing arrived in time", as opposed to a broken line.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock
    )
}

#[cfg(feature = "serial")]
impl Master<crate::transport::SerialTransport> {
    /// Power cycle the station by reopening the serial port.
    pub fn recover(&mut self) -> Result<(), crate::transport::Error> {
        warn!("Reopening {}", self.transport.path());
        self.transport.reopen()
    }
}
