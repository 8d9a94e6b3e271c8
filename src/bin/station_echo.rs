use std::error::Error;
use std::io::{self, Read, Write};

use ws2300_proto::node::Memory;
use ws2300_proto::{addr, NodeState};

/// A simulated station on stdin/stdout, with the current indoor temperature
/// and humidity set to plausible values.
fn station_main_loop() -> Result<(), Box<dyn Error>> {
    let mut memory = Memory::new();
    // indoor temperature 21.50 C, stored as BCD with a 30 degree offset
    memory.write(addr(0x346), &[0x50, 0x51]);
    // indoor humidity 45 %
    memory.write(addr(0x3fb), &[0x45]);

    let mut stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut node = NodeState::new();

    loop {
        node = match node {
            NodeState::ReceiveData(recv) => {
                let mut data_in = [0];
                if stdin.read(&mut data_in)? == 0 {
                    break;
                }
                recv.receive_data(&data_in)
            }

            NodeState::SendData(send) => {
                stdout.write_all(send.get_data())?;
                stdout.flush()?;
                send.data_sent()
            }

            NodeState::ReadMemory(read) => {
                eprintln!("Read {} bytes from {}", *read.length(), read.address());
                let data = memory.read(read.address(), read.length());
                read.send_reply(&data)
            }

            NodeState::WriteMemory(write) => {
                eprintln!(
                    "{:?} {} at {}",
                    write.mode(),
                    write.value().get(),
                    write.address()
                );
                memory.apply(write.address(), write.mode(), write.value());
                write.write_ok()
            }
        };
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    station_main_loop()
}
