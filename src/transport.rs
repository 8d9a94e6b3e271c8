//! Byte-level access to the station's serial line.
//!
//! [`Transport`] is everything the protocol engine needs from the line. With the
//! `serial` feature enabled, [`SerialTransport`] implements it on top of a real
//! serial port.

use std::io;
use std::time::Duration;

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{
    Error, PortConfig, PowerOnTimings, SerialTransport, ShutdownTimings, BAUD_RATE, DEFAULT_PORT,
    READ_TIMEOUT,
};

/// A half-duplex, byte-oriented line to a single station.
pub trait Transport {
    /// Read up to `buf.len()` bytes, blocking until they arrive or the line's
    /// read timeout expires. A timeout is not an error, it returns the number of
    /// bytes received so far, possibly zero.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf` and wait until it has been transmitted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Discard output that hasn't been transmitted yet.
    fn flush_output(&mut self) -> io::Result<()>;

    /// Discard received data that hasn't been read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Block for `duration`. Used for the pauses between reset attempts.
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        (**self).flush_output()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration)
    }
}
