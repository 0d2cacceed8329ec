//! Two-wire serial EEPROM page sink.
//!
//! Targets AT24 / M24 style parts with 16-bit word addressing: each write is
//! the big-endian word address followed by up to one device page of data. A
//! write that would cross a device page boundary is split, as the part wraps
//! around within the page otherwise.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::Write;

use crate::error::EepromError;
use crate::page::PageSink;
use crate::protocol::PAGE_SIZE;

/// Device geometry and timing
#[derive(Clone, PartialEq, Debug)]
pub struct EepromConfig {
    /// 7-bit bus address
    pub address: u8,
    /// Device write page, clamped to [`PAGE_SIZE`]
    pub page_size: usize,
    /// Device size in bytes
    pub size: usize,
    /// Internal write cycle time
    pub write_cycle_ms: u32,
}

impl Default for EepromConfig {
    fn default() -> Self {
        Self {
            address: 0x50,
            page_size: PAGE_SIZE,
            size: 32 * 1024,
            write_cycle_ms: 10,
        }
    }
}

pub struct At24Eeprom<I2C, D> {
    i2c: I2C,
    delay: D,
    config: EepromConfig,
}

impl<I2C, D, E> At24Eeprom<I2C, D>
where
    I2C: Write<Error = E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(i2c: I2C, delay: D, mut config: EepromConfig) -> Self {
        if config.page_size == 0 || config.page_size > PAGE_SIZE {
            warn!(
                "EEPROM page size {} unsupported, using {}",
                config.page_size, PAGE_SIZE
            );
            config.page_size = PAGE_SIZE;
        }

        Self { i2c, delay, config }
    }

    pub fn config(&self) -> &EepromConfig {
        &self.config
    }

    /// Release the bus and delay
    pub fn free(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Write `data` at `address`, splitting on device page boundaries
    pub fn write(&mut self, address: u16, data: &[u8]) -> Result<(), EepromError<E>> {
        if address as usize + data.len() > self.config.size {
            return Err(EepromError::OutOfRange {
                address,
                len: data.len(),
                size: self.config.size,
            });
        }

        let page_size = self.config.page_size;
        let mut cur = address as usize;
        let mut offset = 0;

        while offset < data.len() {
            let page_rem = page_size - (cur % page_size);
            let n = (data.len() - offset).min(page_rem);

            let mut buf = [0u8; 2 + PAGE_SIZE];
            buf[..2].copy_from_slice(&(cur as u16).to_be_bytes());
            buf[2..2 + n].copy_from_slice(&data[offset..offset + n]);

            trace!("EEPROM write {} bytes at 0x{:04x}", n, cur);

            self.i2c
                .write(self.config.address, &buf[..2 + n])
                .map_err(EepromError::I2c)?;

            // Device ignores the bus until the write cycle completes
            self.delay.delay_ms(self.config.write_cycle_ms);

            cur += n;
            offset += n;
        }

        Ok(())
    }
}

impl<I2C, D, E> PageSink for At24Eeprom<I2C, D>
where
    I2C: Write<Error = E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    type Error = EepromError<E>;

    fn commit_page(&mut self, address: u16, data: &[u8]) -> nb::Result<(), Self::Error> {
        self.write(address, data).map_err(nb::Error::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockI2c {
        writes: Vec<(u8, Vec<u8>)>,
        fail: bool,
    }

    impl Write for MockI2c {
        type Error = &'static str;

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
            if self.fail {
                return Err("nack");
            }
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDelay {
        total_ms: u32,
    }

    impl DelayMs<u32> for MockDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.total_ms += ms;
        }
    }

    fn eeprom(fail: bool) -> At24Eeprom<MockI2c, MockDelay> {
        At24Eeprom::new(
            MockI2c {
                fail,
                ..Default::default()
            },
            MockDelay::default(),
            EepromConfig {
                address: 0x51,
                page_size: 16,
                size: 256,
                write_cycle_ms: 5,
            },
        )
    }

    #[test]
    fn writes_within_a_page() {
        let mut e = eeprom(false);
        e.commit_page(0x0010, &[1, 2, 3]).unwrap();

        let (i2c, delay) = e.free();
        assert_eq!(i2c.writes, vec![(0x51, vec![0x00, 0x10, 1, 2, 3])]);
        assert_eq!(delay.total_ms, 5);
    }

    #[test]
    fn splits_on_page_boundary() {
        let mut e = eeprom(false);
        let data: Vec<u8> = (0..20).collect();
        e.commit_page(0x000C, &data).unwrap();

        let (i2c, delay) = e.free();
        assert_eq!(i2c.writes.len(), 2);

        let (_, first) = &i2c.writes[0];
        assert_eq!(&first[..2], &[0x00, 0x0C]);
        assert_eq!(&first[2..], &data[..4]);

        let (_, second) = &i2c.writes[1];
        assert_eq!(&second[..2], &[0x00, 0x10]);
        assert_eq!(&second[2..], &data[4..]);

        assert_eq!(delay.total_ms, 10);
    }

    #[test]
    fn rejects_writes_past_the_end() {
        let mut e = eeprom(false);

        match e.commit_page(0x00F8, &[0u8; 16]) {
            Err(nb::Error::Other(EepromError::OutOfRange { address, len, size })) => {
                assert_eq!((address, len, size), (0x00F8, 16, 256));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn bus_errors_are_final() {
        let mut e = eeprom(true);
        assert_eq!(
            e.commit_page(0, &[1]),
            Err(nb::Error::Other(EepromError::I2c("nack")))
        );
    }

    #[test]
    fn oversized_page_is_clamped() {
        let e = At24Eeprom::new(
            MockI2c::default(),
            MockDelay::default(),
            EepromConfig {
                page_size: 4 * PAGE_SIZE,
                ..Default::default()
            },
        );
        assert_eq!(e.config().page_size, PAGE_SIZE);
    }
}
