#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::convert::Infallible;
use std::io::{ErrorKind as IoErrorKind, Write as _};
use std::path::PathBuf;

use anyhow::{bail, Context};
use embedded_hal::serial::Write;
use indicatif::{ProgressBar, ProgressStyle};

use ihex_eeprom_loader::eeprom::EepromConfig;
use ihex_eeprom_loader::{
    linux, DefaultTransport, EepromError, Event, Loader, Options, PageSink, ParserState,
};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to receive the image on
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "4800")]
    baud: usize,

    /// Replay an Intel HEX file instead of listening on the serial port
    #[structopt(long, parse(from_os_str))]
    file: Option<PathBuf>,

    /// I2C bus the EEPROM is attached to
    #[structopt(long, default_value = "/dev/i2c-1")]
    i2c: String,

    /// EEPROM bus address
    #[structopt(long, default_value = "0x50", parse(try_from_str = parse_hex_u8))]
    eeprom_address: u8,

    /// EEPROM write page size
    #[structopt(long, default_value = "64")]
    eeprom_page_size: usize,

    /// EEPROM size in bytes
    #[structopt(long, default_value = "32768")]
    eeprom_size: usize,

    /// EEPROM write cycle time
    #[structopt(long, default_value = "10")]
    write_cycle_ms: u32,

    /// Decode into memory and log the pages instead of programming the EEPROM
    #[structopt(long)]
    dry_run: bool,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_hex_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// In-memory EEPROM image for dry runs
struct ImageSink {
    image: Vec<u8>,
    pages: usize,
}

impl ImageSink {
    fn new(size: usize) -> Self {
        Self {
            image: vec![0xFF; size],
            pages: 0,
        }
    }
}

impl PageSink for ImageSink {
    type Error = EepromError<Infallible>;

    fn commit_page(&mut self, address: u16, data: &[u8]) -> nb::Result<(), Self::Error> {
        let start = address as usize;
        let end = start + data.len();
        if end > self.image.len() {
            return Err(nb::Error::Other(EepromError::OutOfRange {
                address,
                len: data.len(),
                size: self.image.len(),
            }));
        }

        info!("0x{:04x}: {}", address, hex::encode_upper(data));

        self.image[start..end].copy_from_slice(data);
        self.pages += 1;
        Ok(())
    }
}

/// Diagnostics output when replaying a file
struct Console;

impl Write<u8> for Console {
    type Error = IoErrorKind;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        std::io::stdout()
            .write_all(&[word])
            .map_err(|e| nb::Error::Other(e.kind()))
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        std::io::stdout()
            .flush()
            .map_err(|e| nb::Error::Other(e.kind()))
    }
}

fn finished<S: PageSink>(loader: &Loader<'_, S>, event: &Event, resync: bool) -> bool {
    match event {
        Event::EndOfFile => true,
        _ => loader.state() == ParserState::Error && !resync,
    }
}

fn load<S: PageSink>(args: &Args, sink: S) -> anyhow::Result<S> {
    let resync = args.options.resync;

    let mut transport = DefaultTransport::new();
    let (mut interrupts, link) = transport.split();
    let mut loader = Loader::new(link, sink, args.options.clone());

    match &args.file {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("reading {}", path.display()))?;

            info!("Replaying {} ({})", path.display(), bytefmt::format(data.len() as u64));

            let progress = ProgressBar::new(data.len() as u64);
            progress.set_style(
                ProgressStyle::default_bar().template("{bar:40} {bytes}/{total_bytes} {msg}"),
            );

            // One byte per tick, as if paced by the wire
            let mut input = data.iter();
            let mut console = Console;
            loop {
                if let Some(b) = input.next() {
                    interrupts.receive.on_byte(*b);
                    progress.inc(1);
                }

                let event = loader.tick();
                while interrupts
                    .transmit
                    .on_transmit_ready(&mut console)
                    .map_err(std::io::Error::from)?
                {}

                if finished(&loader, &event, resync) {
                    break;
                }
                if input.len() == 0 && loader.is_idle() {
                    warn!("Input ended without an end of file record");
                    break;
                }
            }

            progress.finish_with_message("done");
        }
        None => {
            info!("Listening on {} at {} baud", args.port, args.baud);

            let mut port = linux::open_serial(&args.port, args.baud)?;
            linux::service(&mut port, &mut interrupts, &mut loader, |l, e| {
                finished(l, e, resync)
            })?;
        }
    }

    let stats = *loader.stats();
    info!(
        "Programmed {} in {} pages ({} records)",
        bytefmt::format(stats.bytes as u64),
        stats.pages,
        stats.records
    );

    let link = loader.link();
    if link.rx_dropped() > 0 || loader.staging_dropped() > 0 {
        warn!(
            "Dropped {} bytes on receive, {} in staging",
            link.rx_dropped(),
            loader.staging_dropped()
        );
    }

    if loader.state() == ParserState::Error {
        bail!("image rejected after {} error(s)", stats.errors);
    }

    Ok(loader.into_sink())
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.dry_run {
        let image = load(&args, ImageSink::new(args.eeprom_size))?;
        info!("Dry run complete, {} pages decoded", image.pages);
        return Ok(());
    }

    let config = EepromConfig {
        address: args.eeprom_address,
        page_size: args.eeprom_page_size,
        size: args.eeprom_size,
        write_cycle_ms: args.write_cycle_ms,
    };

    info!("Opening EEPROM on {}", args.i2c);
    let eeprom = linux::open_eeprom(&args.i2c, config)?;

    load(&args, eeprom)?;

    info!("EEPROM programmed!");

    Ok(())
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
