//! Linux host support: serial port and i2c EEPROM from linux-embedded-hal,
//! with the transport handlers serviced by polling.

use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::i2cdev::linux::LinuxI2CError;
use linux_embedded_hal::{Delay, I2cdev, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::eeprom::{At24Eeprom, EepromConfig};
use crate::{Event, Interrupts, Loader, PageSink, SerialPort, TransmitEnable};
use crate::protocol::{RX_QUEUE_SIZE, TX_QUEUE_SIZE};

/// Read timeout, short so the main loop keeps ticking between bytes
const POLL_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serial port: {0}")]
    Serial(#[from] SerialError),

    #[error("i2c bus: {0}")]
    I2c(#[from] LinuxI2CError),

    #[error("serial io: {0:?}")]
    Io(IoErrorKind),
}

/// Open a serial port at `baud`, 8N1 without flow control
pub fn open_serial<P: AsRef<Path>>(port: P, baud: usize) -> Result<Serial, Error> {
    // Open port
    let mut port = Serial::open(port.as_ref())?;

    // Apply settings
    let mut settings = port.0.read_settings()?;

    settings.set_char_size(CharSize::Bits8);
    settings.set_stop_bits(StopBits::Stop1);
    settings.set_baud_rate(BaudRate::from_speed(baud))?;
    settings.set_flow_control(FlowControl::FlowNone);
    settings.set_parity(Parity::ParityNone);

    port.0.write_settings(&settings)?;
    port.0.set_timeout(POLL_TIMEOUT)?;

    Ok(port)
}

/// Open a two-wire EEPROM on a linux i2c bus (eg. `/dev/i2c-1`)
pub fn open_eeprom<P: AsRef<Path>>(
    bus: P,
    config: EepromConfig,
) -> Result<At24Eeprom<I2cdev, Delay>, Error> {
    let i2c = I2cdev::new(bus)?;

    debug!(
        "EEPROM at 0x{:02x}, {} byte pages, {} bytes",
        config.address, config.page_size, config.size
    );

    Ok(At24Eeprom::new(i2c, Delay {}, config))
}

/// Run a loader against a polled serial port until `done` returns true.
///
/// Each iteration reads only what the loader has room to stage, ticks it and
/// writes out diagnostics. Input beyond that waits in the tty buffer.
pub fn service<P, S, T, F>(
    port: &mut P,
    interrupts: &mut Interrupts<'_, RX_QUEUE_SIZE, TX_QUEUE_SIZE>,
    loader: &mut Loader<'_, S, T>,
    mut done: F,
) -> Result<(), Error>
where
    P: SerialPort<IoErrorKind>,
    S: PageSink,
    T: TransmitEnable,
    F: FnMut(&Loader<'_, S, T>, &Event) -> bool,
{
    loop {
        let event = loader.poll(interrupts, port).map_err(Error::Io)?;
        if let Event::Committed { address, len } = event {
            debug!("Page 0x{:04x} ({} bytes) programmed", address, len);
        }

        if done(loader, &event) {
            interrupts.poll_transmit(port).map_err(Error::Io)?;
            return Ok(());
        }
    }
}
