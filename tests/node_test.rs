use std::io::{Cursor, Read, Write};

use ws2300_proto::node::Memory;
use ws2300_proto::telegram::{encode_address, encode_data, length_code};
use ws2300_proto::{addr, len, EncodeMode, Nibble, NodeState};

fn node_main_loop(memory: &mut Memory, input: &[u8]) -> Vec<u8> {
    let mut serial = Cursor::new(input);
    let mut output = Vec::new();
    let mut node = NodeState::new();

    'main: loop {
        node = match node {
            NodeState::ReceiveData(recv) => {
                let mut buf = [0; 1];
                match serial.read(&mut buf) {
                    Ok(len) if len > 0 => recv.receive_data(&buf[..len]),
                    _ => break 'main,
                }
            }

            NodeState::SendData(send) => {
                output.write_all(send.get_data()).unwrap();
                send.data_sent()
            }

            NodeState::ReadMemory(read) => {
                // reads beyond the history area get no answer
                if *read.address() >= 0x6c6 {
                    read.no_reply()
                } else {
                    let data = memory.read(read.address(), read.length());
                    read.send_reply(&data)
                }
            }

            NodeState::WriteMemory(write) => {
                memory.apply(write.address(), write.mode(), write.value());
                write.write_ok()
            }
        };
    }
    output
}

#[test]
fn read_telegram() {
    let mut memory = Memory::new();
    memory.write(addr(0x346), &[0x45, 0x06]);

    let mut input = vec![0x06];
    input.extend_from_slice(&encode_address(addr(0x346)));
    input.push(length_code(len(2)));
    let output = node_main_loop(&mut memory, &input);
    // reset, 4 address acks, length ack, 2 data bytes, checksum
    assert_eq!(output, [0x02, 0x00, 0x13, 0x24, 0x36, 0x32, 0x45, 0x06, 0x4b]);
}

#[test]
fn unanswered_read() {
    let mut memory = Memory::new();
    let mut input = vec![0x06];
    input.extend_from_slice(&encode_address(addr(0x7000)));
    input.push(length_code(len(1)));
    let output = node_main_loop(&mut memory, &input);
    assert_eq!(output, [0x02, 0x07, 0x10, 0x20, 0x30]);
}

#[test]
fn write_telegram() {
    let mut memory = Memory::new();
    let mut input = vec![0x06];
    input.extend_from_slice(&encode_address(addr(0x200)));
    for v in [0x3, 0xc] {
        input.push(encode_data(EncodeMode::WriteNibble, Nibble::new(v).unwrap()));
    }
    input.push(encode_data(EncodeMode::SetBit, Nibble::bit(0).unwrap()));
    let output = node_main_loop(&mut memory, &input);

    assert_eq!(output, [0x02, 0x00, 0x12, 0x20, 0x30, 0x13, 0x1c, 0x04]);
    assert_eq!(memory.get(addr(0x200)), 0x3);
    assert_eq!(memory.get(addr(0x201)), 0xc);
    assert_eq!(memory.get(addr(0x202)), 0x1);
}

#[test]
fn noise_is_ignored() {
    let mut memory = Memory::new();
    // a length code before any address, then a data byte
    let output = node_main_loop(&mut memory, &[0xce, 0x46, 0x06, 0x82]);
    assert_eq!(output, [0x02, 0x00]);
    assert_eq!(memory.get(addr(0)), 0);
}
