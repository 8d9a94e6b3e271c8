use std::io::{self, Read, Write};
use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, trace, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use snafu::{ensure, ResultExt, Snafu};

use super::Transport;

#[cfg(unix)]
type NativePort = serialport::TTYPort;
#[cfg(windows)]
type NativePort = serialport::COMPort;

/// The port the station is usually connected to.
pub const DEFAULT_PORT: &str = "/dev/ttyS0";
/// WS2300 stations only talk at 2400 baud.
pub const BAUD_RATE: u32 = 2400;
/// One decisecond, the longest the station takes to answer a byte.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

const MAX_PATH_LEN: usize = 255;

/// Errors opening or closing a [`SerialTransport`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Port name longer than 255 characters ({length})"))]
    NameTooLong { length: usize },
    #[snafu(display("No port name given"))]
    NoPort,
    #[snafu(display("Opening serial port {path} failed"))]
    NoHandle {
        path: String,
        source: serialport::Error,
    },
    #[snafu(display("Serial port {path} is locked"))]
    Locked { path: String, source: io::Error },
    #[snafu(display("Unable to initialize serial port {path}"))]
    InitPort { path: String, source: io::Error },
    #[snafu(display("Unable to control serial port {path}"))]
    LineControl {
        path: String,
        source: serialport::Error,
    },
}

/// Delays of the modem line sequence that power cycles the station on open.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PowerOnTimings {
    /// DTR raised and RTS dropped, before RTS is raised.
    pub dtr_settle: Duration,
    /// RTS raised, before DTR is dropped.
    pub rts_settle: Duration,
    /// DTR dropped, the station boots.
    pub startup: Duration,
}

impl Default for PowerOnTimings {
    fn default() -> Self {
        Self {
            dtr_settle: Duration::from_millis(10),
            rts_settle: Duration::from_millis(46),
            startup: Duration::from_secs(2),
        }
    }
}

/// Delays of the modem line sequence that quiesces the station on close.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShutdownTimings {
    pub drain: Duration,
    pub dtr_pulse: Duration,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        Self {
            drain: Duration::from_millis(100),
            dtr_pulse: Duration::from_millis(3),
        }
    }
}

/// Line settings for a [`SerialTransport`].
///
/// The defaults are what the station requires, the timings are only exposed
/// for adapters that need longer settle times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub baud_rate: u32,
    pub timeout: Duration,
    pub power_on: PowerOnTimings,
    pub shutdown: ShutdownTimings,
    /// Pause between closing and reopening the port in [`SerialTransport::reopen()`].
    pub reopen_delay: Duration,
}

impl PortConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_power_on(mut self, timings: PowerOnTimings) -> Self {
        self.power_on = timings;
        self
    }

    pub fn with_shutdown(mut self, timings: ShutdownTimings) -> Self {
        self.shutdown = timings;
        self
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            timeout: READ_TIMEOUT,
            power_on: PowerOnTimings::default(),
            shutdown: ShutdownTimings::default(),
            reopen_delay: Duration::from_millis(8),
        }
    }
}

/// The serial line to a station.
///
/// Opening the transport takes an exclusive lock on the device and power
/// cycles the station through the DTR and RTS lines. The port is closed, and
/// the lock released, by [`close()`](Self::close()) or when the transport is
/// dropped.
///
/// # Example
///
/// ```no_run
/// use ws2300_proto::transport::{SerialTransport, DEFAULT_PORT};
/// use ws2300_proto::Master;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut station = Master::new(SerialTransport::open(DEFAULT_PORT)?);
/// let data = station.read(0x346, 2)?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct SerialTransport {
    path: String,
    config: PortConfig,
    port: Option<NativePort>,
}

impl SerialTransport {
    /// Open the station on `path` with the default line settings.
    pub fn open(path: impl Into<String>) -> Result<Self, Error> {
        Self::open_with_config(path, PortConfig::default())
    }

    pub fn open_with_config(path: impl Into<String>, config: PortConfig) -> Result<Self, Error> {
        let path = path.into();
        let length = path.chars().count();
        ensure!(length <= MAX_PATH_LEN, NameTooLongSnafu { length });
        ensure!(length > 0, NoPortSnafu);

        let mut transport = Self {
            path,
            config,
            port: None,
        };
        transport.start()?;
        Ok(transport)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Flush the line, quiesce the station and release the port.
    /// Closing a closed transport does nothing.
    pub fn close(&mut self) -> Result<(), Error> {
        let mut port = match self.port.take() {
            Some(port) => port,
            None => return Ok(()),
        };
        let path = &self.path;
        let timings = self.config.shutdown;

        port.clear(ClearBuffer::All)
            .context(LineControlSnafu { path })?;
        sleep(timings.drain);

        port.write_data_terminal_ready(true)
            .context(LineControlSnafu { path })?;
        sleep(timings.dtr_pulse);
        port.write_data_terminal_ready(false)
            .context(LineControlSnafu { path })?;
        port.write_request_to_send(false)
            .context(LineControlSnafu { path })?;

        port.clear(ClearBuffer::All)
            .context(LineControlSnafu { path })?;
        debug!("Closed {}", path);
        Ok(())
    }

    /// Close the port, wait a moment and open it again, power cycling the station.
    /// This is the way to get a station back after it stopped answering telegrams.
    pub fn reopen(&mut self) -> Result<(), Error> {
        if let Err(err) = self.close() {
            warn!("Closing {} failed: {}", self.path, err);
        }
        sleep(self.config.reopen_delay);
        self.start()
    }

    fn start(&mut self) -> Result<(), Error> {
        self.power_cycle()?;
        self.port = Some(self.connect()?);
        info!("Opened {} at {} baud", self.path, self.config.baud_rate);
        Ok(())
    }

    fn connect(&self) -> Result<NativePort, Error> {
        let path = &self.path;
        // serialport may take the same lock inside open, and report
        // contention as a failed open.
        check_unlocked(path).context(LockedSnafu { path })?;
        let port = serialport::new(path.as_str(), self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.config.timeout)
            .open_native()
            .context(NoHandleSnafu { path })?;

        lock_exclusive(&port).context(LockedSnafu { path })?;
        set_line_discipline(&port).context(InitPortSnafu { path })?;
        port.clear(ClearBuffer::All)
            .context(LineControlSnafu { path })?;
        Ok(port)
    }

    // The station has no reset line, it is powered from DTR and RTS.
    // Dropping the port at the end closes it and releases the lock.
    fn power_cycle(&self) -> Result<(), Error> {
        let path = &self.path;
        let timings = self.config.power_on;
        let mut port = self.connect()?;
        debug!("Power cycling station on {}", path);

        port.write_data_terminal_ready(true)
            .context(LineControlSnafu { path })?;
        port.write_request_to_send(false)
            .context(LineControlSnafu { path })?;
        sleep(timings.dtr_settle);
        port.write_request_to_send(true)
            .context(LineControlSnafu { path })?;
        sleep(timings.rts_settle);
        port.write_data_terminal_ready(false)
            .context(LineControlSnafu { path })?;
        sleep(timings.startup);
        Ok(())
    }

    fn port(&mut self) -> io::Result<&mut NativePort> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = self.port()?;
        loop {
            match port.read(buf) {
                Ok(len) => return Ok(len),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    trace!("Read timed out");
                    return Ok(0);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let port = self.port()?;
        let len = port.write(buf)?;
        // waits for the output queue to drain
        port.flush()?;
        Ok(len)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(self.port()?.clear(ClearBuffer::Output)?)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.port()?.clear(ClearBuffer::Input)?)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Closing {} failed: {}", self.path, err);
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(port: &NativePort) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // Non-blocking, a second process gets an error instead of hanging.
    // SAFETY: the descriptor belongs to `port`, which outlives the call.
    if unsafe { libc::flock(port.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Fail if another handle holds the device's lock, or has opened it exclusively.
/// Other open errors are left for the real open to report.
#[cfg(unix)]
fn check_unlocked(path: &str) -> io::Result<()> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.raw_os_error() == Some(libc::EBUSY) => return Err(err),
        Err(_) => return Ok(()),
    };
    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // closing `file` drops the lock again
    Ok(())
}

#[cfg(not(unix))]
fn check_unlocked(_path: &str) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_port: &NativePort) -> io::Result<()> {
    Ok(())
}

/// Ignore break conditions and parity errors, on top of the raw 8N1 mode set
/// up by `serialport`.
#[cfg(unix)]
fn set_line_discipline(port: &NativePort) -> io::Result<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = port.as_raw_fd();
    let mut termios = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr initializes `termios` when it succeeds.
    let termios = unsafe {
        if libc::tcgetattr(fd, termios.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut termios = termios.assume_init();
        termios.c_iflag = libc::IGNBRK | libc::IGNPAR;
        termios.c_cflag |= libc::CLOCAL | libc::CREAD;
        termios.c_lflag = 0;
        termios.c_cc[libc::VMIN] = 0;
        termios
    };
    // SAFETY: `termios` is a valid, initialized struct.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_line_discipline(_port: &NativePort) -> io::Result<()> {
    Ok(())
}
