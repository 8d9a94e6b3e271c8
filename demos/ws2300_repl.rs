use anyhow::{bail, Context, Result};
use std::io::Write;
use std::iter::Peekable;
use std::str::SplitWhitespace;
use std::sync::mpsc;

use ws2300_proto::transport::{SerialTransport, DEFAULT_PORT};
use ws2300_proto::Master;

type Station = Master<SerialTransport>;

fn cmd_read(args: &mut CmdScanner, station: &mut Station) -> Result<()> {
    let address = args.parse_hex::<u16>()?;
    let length = args.parse_next_or::<usize>(1)?;
    println!("{:02x?}", station.read(address, length)?.as_slice());
    Ok(())
}

fn cmd_poll(args: &mut CmdScanner, station: &mut Station) -> Result<()> {
    let address = args.parse_hex::<u16>()?;
    let length = args.parse_next::<usize>()?;
    let delay = std::time::Duration::from_secs_f32(args.parse_next()?);

    println!("Press enter to stop polling.");
    // check that the first read is ok before starting the poll stop thread
    println!("{:02x?}", station.read(address, length)?.as_slice());
    let (io_tx, io_rx) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        let _ch = io_tx;
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
    });
    loop {
        if io_rx.recv_timeout(delay) == Err(mpsc::RecvTimeoutError::Disconnected) {
            break;
        }
        println!("{:02x?}", station.read(address, length)?.as_slice());
    }
    Ok(())
}

fn cmd_write(args: &mut CmdScanner, station: &mut Station) -> Result<()> {
    let address = args.parse_hex::<u16>()?;
    let mut values = Vec::new();
    while args.has_next() {
        values.push(args.parse_hex::<u8>()?);
    }
    station.write_nibbles(address, &values)?;
    Ok(())
}

fn cmd_bit(args: &mut CmdScanner, station: &mut Station, set: bool) -> Result<()> {
    let address = args.parse_hex::<u16>()?;
    let bit = args.parse_next::<u8>()?;
    if set {
        station.set_bit(address, bit)?;
    } else {
        station.clear_bit(address, bit)?;
    }
    Ok(())
}

fn cmd_light(args: &mut CmdScanner, station: &mut Station) -> Result<()> {
    let on = match args.next()? {
        "on" => true,
        "off" => false,
        other => bail!("Expected on or off, got {}", other),
    };
    station.set_light(on)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| DEFAULT_PORT.to_string());

    let transport = SerialTransport::open(port.as_str())
        .with_context(|| format!("Failed to open {}", port))?;
    let mut station = Master::new(transport);
    let mut stdout = std::io::stdout();

    loop {
        print!(">> ");
        stdout.flush()?;
        let mut cmd = String::new();
        if std::io::stdin().read_line(&mut cmd)? == 0 {
            break;
        }
        let mut scan = CmdScanner::new(&cmd);
        if let Err(err) = match scan.next() {
            Err(_) => continue,
            Ok("read") | Ok("r") => cmd_read(&mut scan, &mut station),
            Ok("poll") => cmd_poll(&mut scan, &mut station),
            Ok("write") | Ok("w") => cmd_write(&mut scan, &mut station),
            Ok("set") => cmd_bit(&mut scan, &mut station, true),
            Ok("clear") => cmd_bit(&mut scan, &mut station, false),
            Ok("light") => cmd_light(&mut scan, &mut station),
            Ok("reset") => station.reset().map_err(Into::into),
            Ok("recover") => station.recover().map_err(Into::into),
            Ok("quit") | Ok("q") => break,
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        } {
            println!("{:?}", err)
        }
    }
    Ok(())
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn new(line: &'a str) -> Self {
        let splt = line.split_whitespace().peekable();
        Self { splt }
    }

    fn has_next(&mut self) -> bool {
        self.splt.peek().is_some()
    }

    fn next(&mut self) -> Result<&'a str> {
        self.splt.next().context("End of stream")
    }

    fn parse_next<T: std::str::FromStr>(&mut self) -> Result<T> {
        self.next()?.parse::<T>().ok().context("Parse error")
    }

    fn parse_next_or<T: std::str::FromStr>(&mut self, default: T) -> Result<T> {
        if self.has_next() {
            self.parse_next()
        } else {
            Ok(default)
        }
    }

    /// Parse a hexadecimal number, with or without a 0x prefix.
    fn parse_hex<T: FromHex>(&mut self) -> Result<T> {
        let word = self.next()?;
        let digits = word.trim_start_matches("0x");
        T::from_hex(digits).with_context(|| format!("Invalid hex number {}", word))
    }
}

trait FromHex: Sized {
    fn from_hex(s: &str) -> Result<Self, std::num::ParseIntError>;
}

impl FromHex for u8 {
    fn from_hex(s: &str) -> Result<Self, std::num::ParseIntError> {
        u8::from_str_radix(s, 16)
    }
}

impl FromHex for u16 {
    fn from_hex(s: &str) -> Result<Self, std::num::ParseIntError> {
        u16::from_str_radix(s, 16)
    }
}
