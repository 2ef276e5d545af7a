//! I2C access used by the chip probe routines.
//!
//! The transfer primitives mirror what an SMBus-capable adapter offers. A
//! timeout is reported separately from a missing acknowledge: the first
//! means the bus is wedged, the second only that nobody lives at the address.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The transfer did not complete; the bus is stuck.
    #[error("bus timeout")]
    Timeout,
    /// No acknowledge from the addressed device.
    #[error("no device at address")]
    NoDevice,
    /// Any other transfer failure.
    #[error("transfer error")]
    Io,
}

/// Handle on an I2C adapter, obtained from a
/// [ResourceProvider](crate::resource::ResourceProvider).
pub trait I2cAdapter {
    fn read_byte_data(&mut self, addr: u16, reg: u8) -> Result<u8, BusError>;
    /// SMBus word read, little endian on the wire.
    fn read_word_data(&mut self, addr: u16, reg: u8) -> Result<u16, BusError>;
    fn write_byte_data(&mut self, addr: u16, reg: u8, value: u8) -> Result<(), BusError>;
    /// Read up to `buf.len()` consecutive registers starting at `reg`.
    fn read_i2c_block_data(&mut self, addr: u16, reg: u8, buf: &mut [u8]) -> Result<usize, BusError>;
    /// Plain read transfer, returns the number of bytes received.
    fn master_recv(&mut self, addr: u16, buf: &mut [u8]) -> Result<usize, BusError>;
    /// Plain write transfer, returns the number of bytes sent.
    fn master_send(&mut self, addr: u16, buf: &[u8]) -> Result<usize, BusError>;

    /// SMBus word read for chips that send the high byte first.
    fn read_word_swapped(&mut self, addr: u16, reg: u8) -> Result<u16, BusError> {
        Ok(self.read_word_data(addr, reg)?.swap_bytes())
    }

    /// Give the adapter back.
    fn release(self: alloc::boxed::Box<Self>) {}
}

/// An adapter bound to one slave address for the duration of a probe.
pub struct I2cClient<'a> {
    bus: &'a mut dyn I2cAdapter,
    addr: u16,
}

impl<'a> I2cClient<'a> {
    pub fn new(bus: &'a mut dyn I2cAdapter, addr: u16) -> I2cClient<'a> {
        I2cClient { bus, addr }
    }
    pub fn addr(&self) -> u16 {
        self.addr
    }
    pub fn read_byte_data(&mut self, reg: u8) -> Result<u8, BusError> {
        self.bus.read_byte_data(self.addr, reg)
    }
    pub fn read_word_data(&mut self, reg: u8) -> Result<u16, BusError> {
        self.bus.read_word_data(self.addr, reg)
    }
    pub fn read_word_swapped(&mut self, reg: u8) -> Result<u16, BusError> {
        self.bus.read_word_swapped(self.addr, reg)
    }
    pub fn write_byte_data(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.bus.write_byte_data(self.addr, reg, value)
    }
    pub fn read_i2c_block_data(&mut self, reg: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        self.bus.read_i2c_block_data(self.addr, reg, buf)
    }
    pub fn master_recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        self.bus.master_recv(self.addr, buf)
    }
    pub fn master_send(&mut self, buf: &[u8]) -> Result<usize, BusError> {
        self.bus.master_send(self.addr, buf)
    }
}

/// Blocking delay provider.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}
