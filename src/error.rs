use thiserror::Error;

/// Protocol errors raised by the record parser.
///
/// Every one of these leaves the parser in [`crate::ParserState::Error`].
#[derive(Copy, Clone, PartialEq, Debug, Error)]
pub enum ParseError {
    /// Byte other than ':', CR or LF between records
    #[error("unexpected byte 0x{0:02x} outside of a record")]
    Framing(u8),

    /// Non-hex character inside a record
    #[error("invalid hex digit 0x{0:02x} in record")]
    InvalidDigit(u8),

    /// Record fields and checksum byte did not sum to zero
    #[error("checksum mismatch, record sums to 0x{0:02x}")]
    Checksum(u8),

    /// Record type other than data or end-of-file
    #[error("unsupported record type 0x{0:02x}")]
    UnsupportedRecordType(u8),

    /// Record byte count does not fit a page
    #[error("record length {len} exceeds page size {capacity}")]
    RecordTooLong { len: u8, capacity: usize },

    /// End-of-file record with a non-zero byte count
    #[error("end of file record with length {0}")]
    MalformedEof(u8),

    /// Commit sink refused the page at this address
    #[error("commit of page at 0x{0:04x} failed")]
    Commit(u16),
}

/// Errors from the two-wire EEPROM sink
#[derive(Clone, PartialEq, Debug, Error)]
pub enum EepromError<E: core::fmt::Debug> {
    #[error("i2c bus error: {0:?}")]
    I2c(E),

    #[error("write of {len} bytes at 0x{address:04x} exceeds device size {size}")]
    OutOfRange { address: u16, len: usize, size: usize },
}
