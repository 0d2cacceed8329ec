
/// Start-of-record marker
pub const RECORD_START: u8 = b':';

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';

/// EEPROM page size, matches the 64 byte pages of 28Cxx parts
pub const PAGE_SIZE: usize = 64;

/// Receive queue size (wire -> main loop), 3 pages
pub const RX_QUEUE_SIZE: usize = PAGE_SIZE * 3;

/// Staging ("hex buffer") queue size (relay -> parser), 2 pages
pub const STAGING_QUEUE_SIZE: usize = PAGE_SIZE * 2;

/// Transmit queue size (diagnostics -> wire), 1 page
pub const TX_QUEUE_SIZE: usize = PAGE_SIZE;

/// Default serial baud rate
pub const DEFAULT_BAUD: usize = 4800;

/// Value returned by [`crate::parser::decode_nibble`] for bytes that are not ASCII hex digits
pub const INVALID_NIBBLE: u8 = 0xFF;

/// Diagnostic emitted once an end-of-file record has been consumed
pub const DIAG_EOF: &[u8] = b"EOF\r\n";

/// Diagnostic emitted per committed record when acknowledgements are enabled
pub const DIAG_ACK: &[u8] = b"OK\r\n";

/// Prefix for checksum failures, followed by the computed sum as two hex digits
pub const DIAG_CHECKSUM: &[u8] = b"ERR CHECKSUM ";

/// Prefix for bytes outside a record, followed by the offending byte as two hex digits
pub const DIAG_FRAMING: &[u8] = b"ERR FRAMING ";

/// Prefix for non-hex characters inside a record
pub const DIAG_DIGIT: &[u8] = b"ERR DIGIT ";

/// Prefix for unsupported record types, followed by the type as two hex digits
pub const DIAG_RECORD_TYPE: &[u8] = b"ERR TYPE ";

/// Prefix for records that do not fit in a page, followed by the length as two hex digits
pub const DIAG_LENGTH: &[u8] = b"ERR LENGTH ";

/// Diagnostic for end-of-file records carrying data
pub const DIAG_EOF_LENGTH: &[u8] = b"ERR EOF LENGTH";

/// Diagnostic for pages the sink refused
pub const DIAG_COMMIT: &[u8] = b"ERR COMMIT";

pub const DIAG_EOL: &[u8] = b"\r\n";

/// Intel HEX record types
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RecordType {
    /// Data bytes to be written at the record address
    Data = 0x00,

    /// End of file, carries no data
    EndOfFile = 0x01,
}

impl RecordType {
    /// Map a decoded record type byte, extended types are not supported
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::EndOfFile),
            _ => None,
        }
    }
}
