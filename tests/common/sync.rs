use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ws2300_proto::transport::Transport;

type QueueT = Mutex<VecDeque<u8>>;

/// A serial cable between two threads.
#[derive(Default)]
pub struct SerialLine {
    to_station: QueueT,
    to_master: QueueT,
    station_data_available: Condvar,
    master_data_available: Condvar,
    eof: AtomicBool,
}

impl SerialLine {
    pub fn new() -> Arc<SerialLine> {
        Default::default()
    }

    /// Wake up blocked readers, and make further reads return end of file.
    pub fn disconnect(&self) {
        self.eof.store(true, SeqCst);
        self.station_data_available.notify_all();
        self.master_data_available.notify_all();
    }

    pub fn master_end(self: &Arc<Self>) -> LineEnd {
        LineEnd::new(Arc::clone(self), true)
    }

    pub fn station_end(self: &Arc<Self>) -> LineEnd {
        LineEnd::new(Arc::clone(self), false)
    }
}

pub struct LineEnd {
    line: Arc<SerialLine>,
    is_master: bool,
    pub timeout: Duration,
    pub do_read_error: bool,
    pub do_write_error: bool,
}

impl LineEnd {
    fn new(line: Arc<SerialLine>, is_master: bool) -> LineEnd {
        LineEnd {
            line,
            is_master,
            timeout: Duration::from_millis(100),
            do_read_error: false,
            do_write_error: false,
        }
    }

    fn rx(&self) -> (&QueueT, &Condvar) {
        if self.is_master {
            (&self.line.to_master, &self.line.master_data_available)
        } else {
            (&self.line.to_station, &self.line.station_data_available)
        }
    }

    fn tx(&self) -> (&QueueT, &Condvar) {
        if self.is_master {
            (&self.line.to_station, &self.line.station_data_available)
        } else {
            (&self.line.to_master, &self.line.master_data_available)
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.line.eof.load(SeqCst)
    }
}

impl std::io::Read for LineEnd {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            panic!("Testsuite called read with zero length buffer.")
        }
        if self.do_read_error {
            self.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }

        let (queue, condvar) = self.rx();
        let mut rx = queue.lock().expect("Read mutex is poisoned");
        if let Some(byte) = rx.pop_front() {
            buf[0] = byte;
            return Ok(1);
        }

        let mut rx = condvar
            .wait_timeout(rx, self.timeout)
            .expect("Mutex lock failed")
            .0;
        if let Some(byte) = rx.pop_front() {
            buf[0] = byte;
            Ok(1)
        } else if self.is_disconnected() {
            Ok(0)
        } else {
            Err(Error::new(ErrorKind::TimedOut, "IO read timeout"))
        }
    }
}

impl std::io::Write for LineEnd {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.do_write_error {
            self.do_write_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO write error"));
        }
        let (queue, condvar) = self.tx();
        queue.lock().expect("Write mutex is poisoned").extend(buf);
        condvar.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for LineEnd {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match std::io::Read::read(self, buf) {
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(0),
            result => result,
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(self, buf)
    }

    fn flush_output(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> std::io::Result<()> {
        let (queue, _) = self.rx();
        queue.lock().expect("Read mutex is poisoned").clear();
        Ok(())
    }
}
