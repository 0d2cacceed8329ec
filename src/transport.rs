//! Interrupt driven serial transport.
//!
//! [`Transport`] owns the receive and transmit queues. It is constructed once
//! and [`Transport::split`] into the [`Interrupts`] half, whose handlers run
//! from the receive-complete and transmit-ready interrupts, and the [`Link`]
//! half used by the main loop.
//!
//! The transmit interrupt enable is tracked by an atomic flag. Board code
//! drives the UART's interrupt enable bit through a [`TransmitEnable`] hook,
//! on a host the transmit handler is simply serviced while the flag is set.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use embedded_hal::serial::{Read, Write};

use crate::parser::Diagnostics;
use crate::protocol::{RX_QUEUE_SIZE, TX_QUEUE_SIZE};
use crate::queue::{ByteQueue, Consumer, Producer};

/// Serial port able to service both interrupt handlers
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

/// Board hook for the UART transmit-ready interrupt enable
pub trait TransmitEnable {
    fn set_transmit_enable(&mut self, enabled: bool);
}

/// No interrupt enable bit, the transmitter is polled
impl TransmitEnable for () {
    fn set_transmit_enable(&mut self, _enabled: bool) {}
}

impl<T: TransmitEnable + ?Sized> TransmitEnable for &mut T {
    fn set_transmit_enable(&mut self, enabled: bool) {
        (**self).set_transmit_enable(enabled)
    }
}

/// Transport sized for the firmware's fixed buffers
pub type DefaultTransport = Transport<RX_QUEUE_SIZE, TX_QUEUE_SIZE>;

pub struct Transport<const RX: usize, const TX: usize> {
    rx: ByteQueue<RX>,
    tx: ByteQueue<TX>,
    tx_armed: AtomicBool,
    rx_dropped: AtomicUsize,
    rx_errors: AtomicUsize,
}

impl<const RX: usize, const TX: usize> Default for Transport<RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const RX: usize, const TX: usize> Transport<RX, TX> {
    pub const fn new() -> Self {
        Self {
            rx: ByteQueue::new(),
            tx: ByteQueue::new(),
            tx_armed: AtomicBool::new(false),
            rx_dropped: AtomicUsize::new(0),
            rx_errors: AtomicUsize::new(0),
        }
    }

    /// Split into interrupt and main loop halves
    pub fn split(&mut self) -> (Interrupts<'_, RX, TX>, Link<'_, RX, TX>) {
        let (rx_producer, rx_consumer) = self.rx.split();
        let (tx_producer, tx_consumer) = self.tx.split();

        let interrupts = Interrupts {
            receive: ReceiveHandler {
                queue: rx_producer,
                dropped: &self.rx_dropped,
                errors: &self.rx_errors,
            },
            transmit: TransmitHandler {
                queue: tx_consumer,
                armed: &self.tx_armed,
            },
        };

        let link = Link {
            rx: rx_consumer,
            tx: tx_producer,
            armed: &self.tx_armed,
            rx_dropped: &self.rx_dropped,
            rx_errors: &self.rx_errors,
            tx_dropped: 0,
        };

        (interrupts, link)
    }
}

/// Receive-complete interrupt handler, sole producer of the receive queue
pub struct ReceiveHandler<'a, const N: usize> {
    queue: Producer<'a, N>,
    dropped: &'a AtomicUsize,
    errors: &'a AtomicUsize,
}

impl<'a, const N: usize> ReceiveHandler<'a, N> {
    /// Service a receive-complete interrupt.
    ///
    /// The data register is always read, even when the queue is full and the
    /// byte is discarded, so the pending condition is cleared. Returns whether
    /// a byte was queued.
    pub fn on_receive<S: Read<u8>>(&mut self, serial: &mut S) -> bool {
        match serial.read() {
            Ok(byte) => self.on_byte(byte),
            Err(nb::Error::WouldBlock) => false,
            Err(nb::Error::Other(_)) => {
                let n = self.errors.load(Ordering::Relaxed);
                self.errors.store(n.wrapping_add(1), Ordering::Relaxed);
                false
            }
        }
    }

    /// Queue a byte already read from the data register
    pub fn on_byte(&mut self, byte: u8) -> bool {
        if self.queue.try_enqueue(byte) {
            return true;
        }

        let n = self.dropped.load(Ordering::Relaxed);
        self.dropped.store(n.wrapping_add(1), Ordering::Relaxed);
        false
    }

    /// Free space left in the receive queue
    pub fn room(&self) -> usize {
        N - self.queue.len()
    }
}

/// Transmit-ready interrupt handler, sole consumer of the transmit queue
pub struct TransmitHandler<'a, const N: usize> {
    queue: Consumer<'a, N>,
    armed: &'a AtomicBool,
}

impl<'a, const N: usize> TransmitHandler<'a, N> {
    /// Service a transmit-ready interrupt.
    ///
    /// Writes one pending byte, or parks the transmitter when the queue has
    /// drained. Returns whether a byte was written.
    pub fn on_transmit_ready<S: Write<u8>>(&mut self, serial: &mut S) -> Result<bool, S::Error> {
        self.on_transmit_ready_with(serial, &mut ())
    }

    /// Service a transmit-ready interrupt, updating the UART's interrupt
    /// enable bit through `enable` when the transmitter parks
    pub fn on_transmit_ready_with<S, T>(
        &mut self,
        serial: &mut S,
        enable: &mut T,
    ) -> Result<bool, S::Error>
    where
        S: Write<u8>,
        T: TransmitEnable,
    {
        let written = self.transmit_one(serial)?;
        if !written {
            enable.set_transmit_enable(self.is_armed());
        }
        Ok(written)
    }

    fn transmit_one<S: Write<u8>>(&mut self, serial: &mut S) -> Result<bool, S::Error> {
        match self.queue.try_dequeue() {
            Some(byte) => {
                // The ready interrupt guarantees the data register is free
                block!(serial.write(byte))?;
                Ok(true)
            }
            None => {
                self.armed.store(false, Ordering::Release);

                // A byte may have been queued and armed between the dequeue
                // and the store above, do not lose that arm
                if !self.queue.is_empty() {
                    self.armed.store(true, Ordering::Release);
                }

                Ok(false)
            }
        }
    }

    /// Whether the transmit interrupt is enabled
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

/// Both interrupt handlers, each half can be moved into its own ISR
pub struct Interrupts<'a, const RX: usize, const TX: usize> {
    pub receive: ReceiveHandler<'a, RX>,
    pub transmit: TransmitHandler<'a, TX>,
}

impl<'a, const RX: usize, const TX: usize> Interrupts<'a, RX, TX> {
    /// Service both handlers by polling, for ports that do not raise interrupts.
    ///
    /// Reads until the port has nothing ready or the receive queue is full,
    /// then writes queued bytes for as long as the transmitter stays armed.
    pub fn poll<P, E>(&mut self, port: &mut P) -> Result<(), E>
    where
        P: SerialPort<E>,
    {
        self.poll_receive(port, usize::MAX)?;
        self.poll_transmit(port)
    }

    /// Read at most `limit` bytes from the port into the receive queue.
    ///
    /// Stops early once the queue is full, anything further stays buffered
    /// in the port. Returns the number of bytes queued.
    pub fn poll_receive<P, E>(&mut self, port: &mut P, limit: usize) -> Result<usize, E>
    where
        P: Read<u8, Error = E>,
    {
        let limit = limit.min(self.receive.room());

        let mut queued = 0;
        for _ in 0..limit {
            match port.read() {
                Ok(byte) => {
                    self.receive.on_byte(byte);
                    queued += 1;
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }

        Ok(queued)
    }

    /// Write queued bytes until the transmitter parks
    pub fn poll_transmit<P, E>(&mut self, port: &mut P) -> Result<(), E>
    where
        P: Write<u8, Error = E>,
    {
        while self.transmit.is_armed() {
            self.transmit.on_transmit_ready(port)?;
        }
        Ok(())
    }
}

/// Main loop side of the transport: receive queue consumer, transmit queue producer
pub struct Link<'a, const RX: usize, const TX: usize> {
    rx: Consumer<'a, RX>,
    tx: Producer<'a, TX>,
    armed: &'a AtomicBool,
    rx_dropped: &'a AtomicUsize,
    rx_errors: &'a AtomicUsize,
    tx_dropped: usize,
}

impl<'a, const RX: usize, const TX: usize> Link<'a, RX, TX> {
    /// Take the oldest received byte
    pub fn try_receive(&mut self) -> Option<u8> {
        self.rx.try_dequeue()
    }

    /// Bytes waiting in the receive queue
    pub fn received(&self) -> usize {
        self.rx.len()
    }

    /// Queue a byte for transmission, false when the transmit queue is full
    pub fn send(&mut self, byte: u8) -> bool {
        if self.tx.try_enqueue(byte) {
            return true;
        }
        self.tx_dropped = self.tx_dropped.wrapping_add(1);
        false
    }

    /// Queue a message for transmission and arm the transmitter.
    ///
    /// Bytes that do not fit are dropped, returns the number queued.
    pub fn send_all(&mut self, bytes: &[u8]) -> usize {
        let mut sent = 0;
        for b in bytes {
            if self.send(*b) {
                sent += 1;
            }
            self.arm_transmit_if_pending();
        }
        sent
    }

    /// Bytes waiting in the transmit queue
    pub fn pending_transmit(&self) -> usize {
        self.tx.len()
    }

    /// Enable the transmit interrupt if there is anything to send.
    ///
    /// Safe to call repeatedly, returns whether the transmitter is armed.
    pub fn arm_transmit_if_pending(&self) -> bool {
        if !self.tx.is_empty() {
            self.armed.store(true, Ordering::Release);
        }
        self.armed.load(Ordering::Acquire)
    }

    /// Arm the transmitter if there is anything to send, setting the UART's
    /// interrupt enable bit through `enable`
    pub fn arm_transmit_with<T: TransmitEnable>(&self, enable: &mut T) -> bool {
        let armed = self.arm_transmit_if_pending();
        if armed {
            enable.set_transmit_enable(true);
        }
        armed
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Received bytes discarded because the receive queue was full
    pub fn rx_dropped(&self) -> usize {
        self.rx_dropped.load(Ordering::Relaxed)
    }

    /// Receive errors reported by the serial port
    pub fn rx_errors(&self) -> usize {
        self.rx_errors.load(Ordering::Relaxed)
    }

    /// Outgoing bytes discarded because the transmit queue was full
    pub fn tx_dropped(&self) -> usize {
        self.tx_dropped
    }
}

impl<'a, const RX: usize, const TX: usize> Diagnostics for Link<'a, RX, TX> {
    fn emit(&mut self, bytes: &[u8]) {
        self.send_all(bytes);
    }
}
