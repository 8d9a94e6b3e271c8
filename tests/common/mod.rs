#![allow(dead_code)]

pub mod sync;

use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::time::Duration;

use ws2300_proto::node::Memory;
use ws2300_proto::telegram::{RESET_ACK, RESET_COMMAND};
use ws2300_proto::transport::Transport;
use ws2300_proto::NodeState;

/// A station living inside the transport. Every byte the master writes is
/// fed to a [`NodeState`] right away, and its replies are queued for reading.
pub struct SimulatedStation {
    node: Option<NodeState>,
    pub memory: Memory,
    rx: VecDeque<u8>,
    /// Every byte written by the master.
    pub sent: Vec<u8>,
    /// Number of reset commands received.
    pub resets: usize,
    /// Pauses requested by the master.
    pub pauses: Vec<Duration>,
    /// Number of times pending output was discarded.
    pub flushes: usize,
    /// Never answer anything.
    pub silent: bool,
    /// Send a wrong checksum with every read reply.
    pub corrupt_checksum: bool,
    /// Precede each reset acknowledge with a zero byte.
    pub spurious_zero: bool,
    /// Number of telegrams whose first acknowledge is garbled.
    pub garble: usize,
    /// Number of telegrams where the first read after the reset fails.
    pub read_failures: usize,
    reset_acked: bool,
    first_ack: bool,
}

impl SimulatedStation {
    pub fn new() -> Self {
        Self {
            node: Some(NodeState::new()),
            memory: Memory::new(),
            rx: VecDeque::new(),
            sent: Vec::new(),
            resets: 0,
            pauses: Vec::new(),
            flushes: 0,
            silent: false,
            corrupt_checksum: false,
            spurious_zero: false,
            garble: 0,
            read_failures: 0,
            reset_acked: false,
            first_ack: false,
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new()
        }
    }

    /// Bytes sent by the master, without the reset commands.
    pub fn telegram_bytes(&self) -> Vec<u8> {
        self.sent
            .iter()
            .copied()
            .filter(|&b| b != RESET_COMMAND)
            .collect()
    }

    fn receive(&mut self, byte: u8) {
        let mut node = match self.node.take() {
            Some(NodeState::ReceiveData(recv)) => recv.receive_data(&[byte]),
            Some(other) => other,
            None => NodeState::new(),
        };
        loop {
            node = match node {
                NodeState::ReceiveData(_) => break,
                NodeState::SendData(send) => {
                    self.queue_reply(send.get_data());
                    send.data_sent()
                }
                NodeState::ReadMemory(read) => {
                    let data = self.memory.read(read.address(), read.length());
                    read.send_reply(&data)
                }
                NodeState::WriteMemory(write) => {
                    self.memory
                        .apply(write.address(), write.mode(), write.value());
                    write.write_ok()
                }
            }
        }
        self.node = Some(node);
    }

    fn queue_reply(&mut self, data: &[u8]) {
        let mut data = data.to_vec();
        if data == [RESET_ACK] {
            if self.spurious_zero {
                self.rx.push_back(0);
            }
            self.first_ack = true;
        } else if self.first_ack {
            self.first_ack = false;
            if self.garble > 0 {
                self.garble -= 1;
                data[0] ^= 0x80;
            }
        }
        if self.corrupt_checksum && data.len() > 1 {
            if let Some(last) = data.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
        self.rx.extend(data);
    }
}

impl Default for SimulatedStation {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedStation {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            panic!("Testsuite called read with zero length buffer.")
        }
        if self.reset_acked && self.read_failures > 0 {
            self.reset_acked = false;
            self.read_failures -= 1;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }
        match self.rx.pop_front() {
            Some(byte) => {
                self.reset_acked = byte == RESET_ACK;
                buf[0] = byte;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &byte in buf {
            self.sent.push(byte);
            if byte == RESET_COMMAND {
                self.resets += 1;
            }
            if !self.silent {
                self.receive(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush_output(&mut self) -> std::io::Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn clear_input(&mut self) -> std::io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.pauses.push(duration);
    }
}

/// Replays canned station replies and records what the master sends.
pub struct ScriptedTransport {
    rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub do_read_error: bool,
    /// Kind of the error returned when `do_read_error` is set.
    pub read_error_kind: ErrorKind,
    pub do_write_error: bool,
}

impl ScriptedTransport {
    pub fn new(rx: &[u8]) -> Self {
        Self {
            rx: rx.iter().copied().collect(),
            tx: Vec::new(),
            do_read_error: false,
            read_error_kind: ErrorKind::PermissionDenied,
            do_write_error: false,
        }
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.do_read_error {
            self.do_read_error = false;
            return Err(Error::new(self.read_error_kind, "IO read error"));
        }
        match self.rx.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.do_write_error {
            self.do_write_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO write error"));
        }
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush_output(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    // canned replies are not discarded
    fn clear_input(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn pause(&mut self, _duration: Duration) {}
}

/// A line whose device went away: every operation fails.
#[derive(Default)]
pub struct UnpluggedTransport {
    pub writes: usize,
    pub pauses: usize,
}

fn unplugged() -> Error {
    Error::new(ErrorKind::NotConnected, "device unplugged")
}

impl Transport for UnpluggedTransport {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(unplugged())
    }

    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        self.writes += 1;
        Err(unplugged())
    }

    fn flush_output(&mut self) -> std::io::Result<()> {
        Err(unplugged())
    }

    fn clear_input(&mut self) -> std::io::Result<()> {
        Err(unplugged())
    }

    fn pause(&mut self, _duration: Duration) {
        self.pauses += 1;
    }
}
