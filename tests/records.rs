use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

use ihex_eeprom_loader::parser::encode_hex;
use ihex_eeprom_loader::protocol::PAGE_SIZE;
use ihex_eeprom_loader::{Event, HexRecordParser, Options, PageSink, ParseError, ParserState};

#[derive(Default)]
struct Memory {
    pages: Vec<(u16, Vec<u8>)>,
}

impl PageSink for Memory {
    type Error = ();

    fn commit_page(&mut self, address: u16, data: &[u8]) -> nb::Result<(), ()> {
        self.pages.push((address, data.to_vec()));
        Ok(())
    }
}

/// Encode a data record with a two's complement checksum over every field
fn record(address: u16, data: &[u8]) -> Vec<u8> {
    let mut fields = vec![data.len() as u8, (address >> 8) as u8, address as u8, 0x00];
    fields.extend_from_slice(data);

    let sum = fields.iter().fold(0u8, |a, b| a.wrapping_add(*b));
    fields.push(sum.wrapping_neg());

    let mut out = vec![b':'];
    for b in fields {
        out.extend_from_slice(&encode_hex(b));
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn feed_all(input: &[u8]) -> (HexRecordParser<PAGE_SIZE>, Memory, Vec<Event>) {
    let mut parser = HexRecordParser::<PAGE_SIZE>::new(Options::default());
    let mut sink = Memory::default();
    let mut events = Vec::new();

    for b in input {
        match parser.feed(*b, &mut sink, &mut ()) {
            Event::None => (),
            e => events.push(e),
        }
    }

    (parser, sink, events)
}

#[quickcheck]
fn well_formed_record_commits_once(address: u16, data: Vec<u8>) -> TestResult {
    if data.is_empty() || data.len() > PAGE_SIZE {
        return TestResult::discard();
    }

    let (parser, sink, events) = feed_all(&record(address, &data));

    TestResult::from_bool(
        parser.state() == ParserState::Init
            && events
                == vec![Event::Committed {
                    address,
                    len: data.len(),
                }]
            && sink.pages == vec![(address, data)],
    )
}

#[quickcheck]
fn corrupted_payload_is_rejected(address: u16, data: Vec<u8>, index: usize, flip: u8) -> TestResult {
    if data.is_empty() || data.len() > PAGE_SIZE || flip == 0 {
        return TestResult::discard();
    }

    let mut corrupted = data.clone();
    let i = index % corrupted.len();
    corrupted[i] = corrupted[i].wrapping_add(flip);

    // Checksum computed over the uncorrupted payload
    let mut input = record(address, &data);
    let encoded = encode_hex(corrupted[i]);
    let offset = 1 + 2 * (4 + i);
    input[offset..offset + 2].copy_from_slice(&encoded);

    let (parser, sink, events) = feed_all(&input);

    TestResult::from_bool(
        parser.state() == ParserState::Error
            && sink.pages.is_empty()
            && matches!(events.as_slice(), [Event::Failed(ParseError::Checksum(_))]),
    )
}

#[quickcheck]
fn oversized_record_is_rejected(extra: u8) -> bool {
    let len = (PAGE_SIZE + 1).saturating_add(extra as usize).min(u8::MAX as usize);
    let data = vec![0xA5; len];

    let (parser, sink, events) = feed_all(&record(0x0000, &data));

    parser.state() == ParserState::Error
        && sink.pages.is_empty()
        && matches!(
            events.first(),
            Some(Event::Failed(ParseError::RecordTooLong { .. }))
        )
}
