//! Intel HEX record parser.
//!
//! Consumes one ASCII byte per call and walks a record through
//! `Init -> ByteCount -> Address -> RecordType -> Data -> Checksum -> Init`.
//! Decoded bytes are handed to a [`PageAssembler`], which keeps the running
//! checksum and holds verified pages until the [`PageSink`] accepts them.

use crate::error::ParseError;
use crate::page::{Page, PageAssembler, PageSink};
use crate::protocol::*;
use crate::Options;

/// Decode one ASCII hex digit, case insensitive.
///
/// Returns [`INVALID_NIBBLE`] for any other byte.
pub fn decode_nibble(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'A'..=b'F' => byte - b'A' + 10,
        b'a'..=b'f' => byte - b'a' + 10,
        _ => INVALID_NIBBLE,
    }
}

/// Encode a byte as two uppercase ASCII hex digits
pub fn encode_hex(byte: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0F) as usize]]
}

/// Outgoing diagnostic byte stream
pub trait Diagnostics {
    /// Emit raw bytes, dropping whatever does not fit
    fn emit(&mut self, bytes: &[u8]);

    /// Emit a byte as two ASCII hex digits
    fn emit_hex(&mut self, byte: u8) {
        self.emit(&encode_hex(byte));
    }
}

/// Diagnostics disabled
impl Diagnostics for () {
    fn emit(&mut self, _bytes: &[u8]) {}
}

impl<D: Diagnostics + ?Sized> Diagnostics for &mut D {
    fn emit(&mut self, bytes: &[u8]) {
        (**self).emit(bytes)
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ParserState {
    /// Between records, waiting for ':'
    Init,
    ByteCount,
    Address,
    RecordType,
    Data,
    Checksum,
    /// Draining the end-of-file record checksum
    End,
    /// Halted after a protocol error, until reset
    Error,
}

/// Outcome of feeding the parser
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    /// Nothing to report
    None,
    /// A data record was verified and written to the sink
    Committed { address: u16, len: usize },
    /// A data record was verified, the sink asked to retry
    CommitPending { address: u16 },
    /// End-of-file record consumed
    EndOfFile,
    /// The parser entered the error state
    Failed(ParseError),
}

/// Parser counters
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Stats {
    /// Data records that passed their checksum
    pub records: usize,
    /// Pages accepted by the sink
    pub pages: usize,
    /// Data bytes accepted by the sink
    pub bytes: usize,
    /// End-of-file records seen
    pub eof: usize,
    /// Transitions into the error state
    pub errors: usize,
}

/// Per-record decode progress
#[derive(Clone, Copy, PartialEq, Debug, Default)]
struct PendingRecord {
    byte_count: u8,
    address: u16,
    /// Nibbles left in the current field
    remaining: u16,
    /// High nibble of the byte being decoded
    acc: u8,
    /// Set once the high nibble has been consumed
    low: bool,
}

impl PendingRecord {
    /// Take one nibble, returning the completed byte after every low nibble
    fn push_nibble(&mut self, nibble: u8) -> Option<u8> {
        self.remaining = self.remaining.saturating_sub(1);

        if self.low {
            self.low = false;
            Some(self.acc | nibble)
        } else {
            self.acc = nibble << 4;
            self.low = true;
            None
        }
    }

    /// Start the next field, `bytes` long
    fn expect(&mut self, bytes: u16) {
        self.remaining = bytes * 2;
        self.acc = 0;
        self.low = false;
    }

    fn field_done(&self) -> bool {
        self.remaining == 0
    }
}

pub struct HexRecordParser<const P: usize> {
    state: ParserState,
    record: PendingRecord,
    assembler: PageAssembler<P>,
    options: Options,
    stats: Stats,
}

impl<const P: usize> HexRecordParser<P> {
    pub fn new(options: Options) -> Self {
        Self {
            state: ParserState::Init,
            record: PendingRecord::default(),
            assembler: PageAssembler::new(),
            options,
            stats: Stats::default(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Page under construction, or awaiting commit
    pub fn page(&self) -> &Page<P> {
        self.assembler.page()
    }

    /// Whether a verified page is still waiting on the sink.
    ///
    /// No input may be fed while this is set, call [`Self::poll_commit`].
    pub fn is_blocked(&self) -> bool {
        self.assembler.is_pending()
    }

    /// Return to `Init`, discarding any partial record or pending page
    pub fn reset(&mut self) {
        debug!("Parser reset from {:?}", self.state);

        self.assembler.discard();
        self.record = PendingRecord::default();
        self.state = ParserState::Init;
    }

    /// Feed one received byte.
    ///
    /// While a page is pending the byte is refused and [`Event::None`]
    /// returned, the caller must [`Self::poll_commit`] first.
    pub fn feed<S, D>(&mut self, byte: u8, sink: &mut S, diag: &mut D) -> Event
    where
        S: PageSink,
        D: Diagnostics,
    {
        if self.is_blocked() {
            warn!("Byte 0x{:02x} refused, page 0x{:04x} pending", byte, self.page().address());
            return Event::None;
        }

        let prev = self.state;

        let next = match (self.state, decode_nibble(byte)) {
            (ParserState::Init, _) => self.on_init(byte),
            (ParserState::Error, _) => Ok(self.on_error(byte, diag)),
            (_, INVALID_NIBBLE) => Err(ParseError::InvalidDigit(byte)),
            (ParserState::ByteCount, nibble) => self.on_byte_count(nibble),
            (ParserState::Address, nibble) => self.on_address(nibble),
            (ParserState::RecordType, nibble) => self.on_record_type(nibble),
            (ParserState::Data, nibble) => self.on_data(nibble),
            (ParserState::Checksum, nibble) => self.on_checksum(nibble),
            (ParserState::End, nibble) => self.on_end(nibble),
        };

        let next = match next {
            Ok(next) => next,
            Err(e) => return self.fail(e, diag),
        };

        if next != prev {
            trace!("{:?} -> {:?}", prev, next);
        }
        self.state = next;

        // Record completions
        match (prev, next) {
            (ParserState::Checksum, ParserState::Init) => self.complete_record(sink, diag),
            (ParserState::End, ParserState::Init) => {
                info!("End of file");
                self.stats.eof += 1;
                diag.emit(DIAG_EOF);
                Event::EndOfFile
            }
            _ => Event::None,
        }
    }

    /// Retry committing the pending page
    pub fn poll_commit<S, D>(&mut self, sink: &mut S, diag: &mut D) -> Event
    where
        S: PageSink,
        D: Diagnostics,
    {
        if !self.is_blocked() {
            return Event::None;
        }
        self.commit(sink, diag)
    }

    fn on_init(&mut self, byte: u8) -> Result<ParserState, ParseError> {
        match byte {
            CR | LF => Ok(ParserState::Init),
            RECORD_START => Ok(self.start_record()),
            other => Err(ParseError::Framing(other)),
        }
    }

    fn on_byte_count(&mut self, nibble: u8) -> Result<ParserState, ParseError> {
        let len = match self.record.push_nibble(nibble) {
            Some(len) => len,
            None => return Ok(ParserState::ByteCount),
        };

        self.assembler.accumulate(len);
        if len as usize > P {
            return Err(ParseError::RecordTooLong { len, capacity: P });
        }
        self.record.byte_count = len;

        self.record.expect(2);
        Ok(ParserState::Address)
    }

    fn on_address(&mut self, nibble: u8) -> Result<ParserState, ParseError> {
        if let Some(b) = self.record.push_nibble(nibble) {
            self.assembler.accumulate(b);
            self.record.address = (self.record.address << 8) | b as u16;
        }

        if !self.record.field_done() {
            return Ok(ParserState::Address);
        }

        self.assembler.set_address(self.record.address);
        self.record.expect(1);
        Ok(ParserState::RecordType)
    }

    fn on_record_type(&mut self, nibble: u8) -> Result<ParserState, ParseError> {
        let t = match self.record.push_nibble(nibble) {
            Some(t) => t,
            None => return Ok(ParserState::RecordType),
        };

        self.assembler.accumulate(t);

        match RecordType::from_u8(t) {
            Some(RecordType::Data) if self.record.byte_count == 0 => {
                self.record.expect(1);
                Ok(ParserState::Checksum)
            }
            Some(RecordType::Data) => {
                self.record.expect(self.record.byte_count as u16);
                Ok(ParserState::Data)
            }
            Some(RecordType::EndOfFile) if self.record.byte_count != 0 => {
                Err(ParseError::MalformedEof(self.record.byte_count))
            }
            Some(RecordType::EndOfFile) => {
                // Only the checksum byte remains
                self.record.expect(1);
                Ok(ParserState::End)
            }
            None => Err(ParseError::UnsupportedRecordType(t)),
        }
    }

    fn on_data(&mut self, nibble: u8) -> Result<ParserState, ParseError> {
        if let Some(b) = self.record.push_nibble(nibble) {
            self.assembler.append_byte(b)?;
        }

        if !self.record.field_done() {
            return Ok(ParserState::Data);
        }

        self.record.expect(1);
        Ok(ParserState::Checksum)
    }

    fn on_checksum(&mut self, nibble: u8) -> Result<ParserState, ParseError> {
        let checksum = match self.record.push_nibble(nibble) {
            Some(c) => c,
            None => return Ok(ParserState::Checksum),
        };

        self.assembler.verify(checksum)?;
        self.assembler.seal();
        Ok(ParserState::Init)
    }

    fn on_end(&mut self, nibble: u8) -> Result<ParserState, ParseError> {
        let checksum = match self.record.push_nibble(nibble) {
            Some(c) => c,
            None => return Ok(ParserState::End),
        };

        self.assembler.verify(checksum)?;
        Ok(ParserState::Init)
    }

    fn on_error(&mut self, byte: u8, diag: &mut impl Diagnostics) -> ParserState {
        if self.options.resync && byte == RECORD_START {
            info!("Resynchronising on record start");
            return self.start_record();
        }

        if self.options.echo_errors {
            diag.emit(&[byte]);
        }

        ParserState::Error
    }

    fn start_record(&mut self) -> ParserState {
        self.record = PendingRecord::default();
        self.record.expect(1);
        self.assembler.begin_page();
        ParserState::ByteCount
    }

    fn complete_record<S, D>(&mut self, sink: &mut S, diag: &mut D) -> Event
    where
        S: PageSink,
        D: Diagnostics,
    {
        self.stats.records += 1;

        if self.assembler.page().is_empty() {
            debug!("Empty data record at 0x{:04x}", self.record.address);
            self.assembler.discard();
            if self.options.ack_records {
                diag.emit(DIAG_ACK);
            }
            return Event::None;
        }

        self.commit(sink, diag)
    }

    fn commit<S, D>(&mut self, sink: &mut S, diag: &mut D) -> Event
    where
        S: PageSink,
        D: Diagnostics,
    {
        let address = self.assembler.page().address();
        let len = self.assembler.page().len();

        match self.assembler.commit(sink) {
            Ok(()) => {
                debug!("Committed {} bytes at 0x{:04x}", len, address);
                self.stats.pages += 1;
                self.stats.bytes += len;
                if self.options.ack_records {
                    diag.emit(DIAG_ACK);
                }
                Event::Committed { address, len }
            }
            Err(nb::Error::WouldBlock) => {
                let limit = self.options.commit_retry_limit;
                if limit != 0 && self.assembler.attempts() >= limit {
                    error!("Commit at 0x{:04x} still busy after {} attempts", address, limit);
                    return self.fail(ParseError::Commit(address), diag);
                }
                Event::CommitPending { address }
            }
            Err(nb::Error::Other(e)) => {
                error!("Commit at 0x{:04x} failed: {:?}", address, e);
                self.fail(ParseError::Commit(address), diag)
            }
        }
    }

    /// Enter the error state, reporting the cause once
    fn fail<D: Diagnostics>(&mut self, err: ParseError, diag: &mut D) -> Event {
        warn!("Record error in {:?}: {}", self.state, err);

        self.state = ParserState::Error;
        self.assembler.discard();
        self.stats.errors += 1;

        match err {
            ParseError::Framing(b) => {
                diag.emit(DIAG_FRAMING);
                diag.emit_hex(b);
            }
            ParseError::InvalidDigit(b) => {
                diag.emit(DIAG_DIGIT);
                diag.emit_hex(b);
            }
            ParseError::Checksum(sum) => {
                diag.emit(DIAG_CHECKSUM);
                diag.emit_hex(sum);
            }
            ParseError::UnsupportedRecordType(t) => {
                diag.emit(DIAG_RECORD_TYPE);
                diag.emit_hex(t);
            }
            ParseError::RecordTooLong { len, .. } => {
                diag.emit(DIAG_LENGTH);
                diag.emit_hex(len);
            }
            ParseError::MalformedEof(_) => diag.emit(DIAG_EOF_LENGTH),
            ParseError::Commit(_) => diag.emit(DIAG_COMMIT),
        }
        diag.emit(DIAG_EOL);

        Event::Failed(err)
    }
}
