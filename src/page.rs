//! Page assembly and record checksum verification.

use crate::error::ParseError;

/// Destination for checksummed pages, usually an external EEPROM.
///
/// `Err(nb::Error::WouldBlock)` asks the caller to retry the same page later
/// (for example while the device is still in its write cycle), any other error
/// is final for that page.
pub trait PageSink {
    type Error: core::fmt::Debug;

    /// Program `data` starting at `address`
    fn commit_page(&mut self, address: u16, data: &[u8]) -> nb::Result<(), Self::Error>;
}

impl<T: PageSink + ?Sized> PageSink for &mut T {
    type Error = T::Error;

    fn commit_page(&mut self, address: u16, data: &[u8]) -> nb::Result<(), Self::Error> {
        (**self).commit_page(address, data)
    }
}

/// Decoded record payload bound for a single memory page
#[derive(Clone, PartialEq, Debug)]
pub struct Page<const P: usize> {
    address: u16,
    data: [u8; P],
    len: usize,
}

impl<const P: usize> Default for Page<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const P: usize> Page<P> {
    pub const fn new() -> Self {
        Self {
            address: 0,
            data: [0u8; P],
            len: 0,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Bytes written so far
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn capacity(&self) -> usize {
        P
    }

    fn clear(&mut self) {
        self.address = 0;
        self.data = [0u8; P];
        self.len = 0;
    }
}

/// Builds one [`Page`] at a time and keeps the running record checksum.
///
/// Once a record verifies the page is held until the sink accepts it, and no
/// new page can be started in the meantime.
#[derive(Debug)]
pub struct PageAssembler<const P: usize> {
    page: Page<P>,
    sum: u8,
    verified: bool,
    attempts: u32,
}

impl<const P: usize> Default for PageAssembler<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const P: usize> PageAssembler<P> {
    pub const fn new() -> Self {
        Self {
            page: Page::new(),
            sum: 0,
            verified: false,
            attempts: 0,
        }
    }

    pub fn page(&self) -> &Page<P> {
        &self.page
    }

    /// Running one byte sum of every record byte seen since [`Self::begin_page`]
    pub fn checksum(&self) -> u8 {
        self.sum
    }

    /// Whether a verified page is waiting for the sink
    pub fn is_pending(&self) -> bool {
        self.verified
    }

    /// Commit attempts made for the pending page
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start a new record, clearing page data, offset and checksum
    pub fn begin_page(&mut self) {
        debug_assert!(!self.verified, "page started while a verified page is pending");

        self.page.clear();
        self.sum = 0;
        self.attempts = 0;
    }

    /// Fold a record header byte into the checksum
    pub fn accumulate(&mut self, byte: u8) {
        self.sum = self.sum.wrapping_add(byte);
    }

    pub fn set_address(&mut self, address: u16) {
        self.page.address = address;
    }

    /// Append a data byte at the next offset
    pub fn append_byte(&mut self, byte: u8) -> Result<(), ParseError> {
        // Record length is checked against the page when the byte count is
        // decoded, so running past the end here is a parser bug
        debug_assert!(self.page.len < P, "page offset overrun");
        if self.page.len >= P {
            return Err(ParseError::RecordTooLong {
                len: (self.page.len + 1).min(u8::MAX as usize) as u8,
                capacity: P,
            });
        }

        self.page.data[self.page.len] = byte;
        self.page.len += 1;
        self.accumulate(byte);

        Ok(())
    }

    /// Fold in the trailing checksum byte, the record is valid when the total is zero
    pub fn verify(&mut self, checksum: u8) -> Result<(), ParseError> {
        self.accumulate(checksum);

        match self.sum {
            0 => Ok(()),
            sum => Err(ParseError::Checksum(sum)),
        }
    }

    /// Mark the current page as verified and ready for the sink
    pub fn seal(&mut self) {
        self.verified = true;
        self.attempts = 0;
    }

    /// Hand the sealed page to the sink.
    ///
    /// The page stays pending on `WouldBlock` and is released on success or
    /// on a final error.
    pub fn commit<S: PageSink>(&mut self, sink: &mut S) -> nb::Result<(), S::Error> {
        debug_assert!(self.verified, "commit without a verified page");

        self.attempts = self.attempts.saturating_add(1);

        match sink.commit_page(self.page.address, self.page.data()) {
            Ok(()) => {
                self.verified = false;
                Ok(())
            }
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    /// Drop the current page without committing it
    pub fn discard(&mut self) {
        self.page.clear();
        self.sum = 0;
        self.verified = false;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        pages: Vec<(u16, Vec<u8>)>,
        busy: u32,
        fail: bool,
    }

    impl PageSink for Recorder {
        type Error = ();

        fn commit_page(&mut self, address: u16, data: &[u8]) -> nb::Result<(), ()> {
            if self.fail {
                return Err(nb::Error::Other(()));
            }
            if self.busy > 0 {
                self.busy -= 1;
                return Err(nb::Error::WouldBlock);
            }
            self.pages.push((address, data.to_vec()));
            Ok(())
        }
    }

    fn assemble(a: &mut PageAssembler<8>, address: u16, data: &[u8]) {
        a.begin_page();
        a.accumulate(data.len() as u8);
        a.accumulate((address >> 8) as u8);
        a.accumulate(address as u8);
        a.accumulate(0x00);
        a.set_address(address);
        for b in data {
            a.append_byte(*b).unwrap();
        }
    }

    #[test]
    fn verifies_full_field_sum() {
        let mut a = PageAssembler::<8>::new();
        assemble(&mut a, 0x0010, &[0x01, 0x02, 0x03]);

        // 03 + 00 + 10 + 00 + 01 + 02 + 03 = 0x19
        assert_eq!(a.checksum(), 0x19);
        assert_eq!(a.verify(0xE7), Ok(()));

        assert_eq!(a.page().address(), 0x0010);
        assert_eq!(a.page().data(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn data_only_sum_is_rejected() {
        let mut a = PageAssembler::<8>::new();
        assemble(&mut a, 0x0010, &[0x01, 0x02, 0x03]);

        // Two's complement of the data bytes alone
        assert_eq!(a.verify(0xFA), Err(ParseError::Checksum(0x13)));
    }

    #[test]
    fn commit_retries_until_accepted() {
        let mut a = PageAssembler::<8>::new();
        let mut sink = Recorder {
            busy: 2,
            ..Default::default()
        };

        assemble(&mut a, 0x0100, &[0xAA, 0xBB]);
        a.seal();

        assert_eq!(a.commit(&mut sink), Err(nb::Error::WouldBlock));
        assert!(a.is_pending());
        assert_eq!(a.commit(&mut sink), Err(nb::Error::WouldBlock));
        assert_eq!(a.commit(&mut sink), Ok(()));
        assert!(!a.is_pending());
        assert_eq!(a.attempts(), 3);

        assert_eq!(sink.pages, vec![(0x0100, vec![0xAA, 0xBB])]);
    }

    #[test]
    fn failed_commit_releases_page() {
        let mut a = PageAssembler::<8>::new();
        let mut sink = Recorder {
            fail: true,
            ..Default::default()
        };

        assemble(&mut a, 0x0000, &[0x11]);
        a.seal();

        assert_eq!(a.commit(&mut sink), Err(nb::Error::Other(())));
        assert!(!a.is_pending());
        assert!(a.page().is_empty());
    }

    #[test]
    fn begin_page_clears_previous_contents() {
        let mut a = PageAssembler::<8>::new();
        assemble(&mut a, 0x1234, &[1, 2, 3, 4]);

        a.begin_page();
        assert_eq!(a.page().address(), 0);
        assert!(a.page().is_empty());
        assert_eq!(a.checksum(), 0);
    }
}
