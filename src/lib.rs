//! Intel HEX EEPROM loader.
//!
//! Receives an Intel HEX image over an interrupt driven serial port, decodes
//! it a byte at a time, verifies each record checksum and programs the
//! decoded pages into an external EEPROM.
//!
//! wire -> receive ISR -> receive queue -> [`Relay`] -> staging queue ->
//! [`HexRecordParser`] -> [`PageSink`]
//!
//! Diagnostics flow back through the transmit queue and transmit ISR.

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod eeprom;
pub mod error;
pub mod page;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod transport;

pub use error::{EepromError, ParseError};
pub use page::{Page, PageAssembler, PageSink};
pub use parser::{Diagnostics, Event, HexRecordParser, ParserState, Stats};
pub use queue::ByteQueue;
pub use relay::Relay;
pub use transport::{DefaultTransport, Interrupts, Link, SerialPort, TransmitEnable, Transport};

use protocol::{PAGE_SIZE, RX_QUEUE_SIZE, STAGING_QUEUE_SIZE, TX_QUEUE_SIZE};

#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Restart at the next ':' after a protocol error instead of halting until reset
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub resync: bool,

    /// Echo bytes received while halted back to the sender
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub echo_errors: bool,

    /// Acknowledge each accepted record
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub ack_records: bool,

    /// Attempts to commit a busy page before giving up (0 retries forever)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0"))]
    pub commit_retry_limit: u32,
}

/// Main loop: relay, decode and keep the transmitter armed
pub struct Loader<'a, S, T = ()> {
    link: Link<'a, RX_QUEUE_SIZE, TX_QUEUE_SIZE>,
    staging: ByteQueue<STAGING_QUEUE_SIZE>,
    relay: Relay,
    parser: HexRecordParser<PAGE_SIZE>,
    sink: S,
    transmit_enable: T,
}

impl<'a, S> Loader<'a, S>
where
    S: PageSink,
{
    /// Create a new loader on the main loop half of a transport, with the
    /// transmitter serviced by polling
    pub fn new(link: Link<'a, RX_QUEUE_SIZE, TX_QUEUE_SIZE>, sink: S, options: Options) -> Self {
        Self::with_transmit_enable(link, sink, options, ())
    }
}

impl<'a, S, T> Loader<'a, S, T>
where
    S: PageSink,
    T: TransmitEnable,
{
    /// Create a new loader that sets the UART transmit interrupt enable
    /// through `transmit_enable` whenever diagnostics are queued
    pub fn with_transmit_enable(
        link: Link<'a, RX_QUEUE_SIZE, TX_QUEUE_SIZE>,
        sink: S,
        options: Options,
        transmit_enable: T,
    ) -> Self {
        Self {
            link,
            staging: ByteQueue::new(),
            relay: Relay::new(),
            parser: HexRecordParser::new(options),
            sink,
            transmit_enable,
        }
    }

    /// Fetch the parser state
    pub fn state(&self) -> ParserState {
        self.parser.state()
    }

    pub fn stats(&self) -> &Stats {
        self.parser.stats()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn transmit_enable(&self) -> &T {
        &self.transmit_enable
    }

    /// Consume the loader, returning the sink
    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn link(&self) -> &Link<'a, RX_QUEUE_SIZE, TX_QUEUE_SIZE> {
        &self.link
    }

    /// Bytes relayed but not yet decoded
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// Bytes that can be received without overflowing staging on the next tick
    pub fn headroom(&self) -> usize {
        self.staging
            .capacity()
            .saturating_sub(self.staging.len() + self.link.received())
    }

    /// Bytes dropped because the staging queue was full
    pub fn staging_dropped(&self) -> usize {
        self.relay.dropped()
    }

    /// Whether all received input has been consumed
    pub fn is_idle(&self) -> bool {
        self.link.received() == 0 && self.staging.is_empty() && !self.parser.is_blocked()
    }

    /// Re-initialise the parser, un-wedging it from the error state
    pub fn reset(&mut self) {
        self.parser.reset();
    }

    /// Run one main loop iteration.
    ///
    /// Relays received bytes, then either retries a pending commit or decodes
    /// at most one staged byte, then arms the transmitter if needed. Never
    /// blocks.
    pub fn tick(&mut self) -> Event {
        self.relay.pump(&mut self.link, &mut self.staging);

        let event = if self.parser.is_blocked() {
            self.parser.poll_commit(&mut self.sink, &mut self.link)
        } else if let Some(byte) = self.staging.try_dequeue() {
            self.parser.feed(byte, &mut self.sink, &mut self.link)
        } else {
            Event::None
        };

        self.link.arm_transmit_with(&mut self.transmit_enable);

        event
    }

    /// Run one iteration against a polled serial port.
    ///
    /// Reads no more than the loader can stage, so a backlog stays buffered
    /// in the port instead of overflowing the queues. Then ticks and writes
    /// out any diagnostics.
    pub fn poll<P, E>(
        &mut self,
        interrupts: &mut Interrupts<'_, RX_QUEUE_SIZE, TX_QUEUE_SIZE>,
        port: &mut P,
    ) -> Result<Event, E>
    where
        P: SerialPort<E>,
    {
        interrupts.poll_receive(port, self.headroom())?;

        let event = self.tick();

        interrupts.poll_transmit(port)?;

        Ok(event)
    }

    /// Execute the loader forever
    pub fn run(&mut self) -> ! {
        loop {
            self.tick();
        }
    }
}
