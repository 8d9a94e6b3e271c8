mod common;

use std::io::{Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::thread;
use std::time::Duration;

use ws2300_proto::node::Memory;
use ws2300_proto::{addr, Error, Master, NodeState};

use common::sync::{LineEnd, SerialLine};

fn master_main_loop(io: LineEnd) -> Result<(), Error> {
    let mut master = Master::new(io);

    for round in 0..4u8 {
        master.write_nibbles(0x100, &[round, 0xf - round])?;
        let data = master.read(0x100, 1)?;
        assert_eq!(data.as_slice(), &[round | (0xf - round) << 4]);
    }
    master.set_light(true)?;
    let data = master.read(0x016, 1)?;
    assert_eq!(data[0] & 0x08, 0x08);
    Ok(())
}

fn station_main_loop(mut serial: LineEnd) -> Memory {
    let mut memory = Memory::new();
    memory.write(addr(0x5d8), &[0x12, 0x34, 0x01]);
    let mut node = NodeState::new();

    'main: loop {
        if SHUTDOWN.load(SeqCst) {
            break 'main;
        };

        node = match node {
            NodeState::ReceiveData(recv) => {
                let mut buf = [0; 1];
                match serial.read(&mut buf) {
                    Ok(0) => break 'main,
                    Ok(len) => recv.receive_data(&buf[..len]),
                    Err(_) => NodeState::ReceiveData(recv),
                }
            }

            NodeState::SendData(send) => {
                serial.write_all(send.get_data()).unwrap();
                send.data_sent()
            }

            NodeState::ReadMemory(read) => {
                let data = memory.read(read.address(), read.length());
                read.send_reply(&data)
            }

            NodeState::WriteMemory(write) => {
                memory.apply(write.address(), write.mode(), write.value());
                write.write_ok()
            }
        };
    }
    memory
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[test]
fn chat1() {
    let _ = env_logger::builder().is_test(true).try_init();
    SHUTDOWN.store(false, SeqCst);

    let line = SerialLine::new();
    let mut master_end = line.master_end();
    master_end.timeout = Duration::from_millis(100);

    let mut station_end = line.station_end();
    station_end.timeout = Duration::from_millis(20);
    let master = thread::spawn(move || master_main_loop(master_end));
    let station = thread::spawn(move || station_main_loop(station_end));

    master
        .join()
        .expect("Join failed")
        .expect("Master returned an error");

    SHUTDOWN.store(true, SeqCst);
    line.disconnect();

    let memory = station.join().expect("Station panicked");
    assert_eq!(memory.get(addr(0x100)), 3);
    assert_eq!(memory.get(addr(0x101)), 0xc);
}
