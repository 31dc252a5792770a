//! Access to the memory mapped registers of the chip.
//!
//! The bus glue implements [RegisterAccess] once, everything else in this crate goes through the
//! [RegisterPort] extension, so every busy wait is bounded by the same primitive.

use embassy_time::Duration;

use crate::{regs::Field, HalError, HalResult};

/// The interval at which [RegisterPort::wait_until] polls a register.
pub const POLL_INTERVAL_US: u32 = 10;

/// Raw access to the register space of the chip.
///
/// Reads take `&mut self`, since some registers (like the read-and-clear interrupt status) have
/// side effects when read.
pub trait RegisterAccess {
    /// Read a 32-bit register.
    fn read(&mut self, addr: u32) -> u32;
    /// Write a 32-bit register.
    fn write(&mut self, addr: u32, value: u32);
    /// Busy wait for the specified amount of microseconds.
    fn delay_us(&mut self, us: u32);
}

/// Convenience operations built on top of [RegisterAccess].
pub trait RegisterPort: RegisterAccess {
    /// Set the bits in `bits`, leaving all others untouched.
    fn set_bits(&mut self, addr: u32, bits: u32) {
        let value = self.read(addr);
        self.write(addr, value | bits);
    }
    /// Clear the bits in `bits`, leaving all others untouched.
    fn clear_bits(&mut self, addr: u32, bits: u32) {
        let value = self.read(addr);
        self.write(addr, value & !bits);
    }
    /// Read-modify-write a single field.
    fn modify(&mut self, addr: u32, field: Field, value: u32) {
        let reg = self.read(addr);
        self.write(addr, field.set(reg, value));
    }
    /// Read a single field.
    fn read_field(&mut self, addr: u32, field: Field) -> u32 {
        field.get(self.read(addr))
    }
    /// Poll until `read(addr) & mask == expected`.
    ///
    /// The register is checked every [POLL_INTERVAL_US] and at least once, even with a zero
    /// timeout.
    fn wait_until(
        &mut self,
        addr: u32,
        mask: u32,
        expected: u32,
        timeout: Duration,
    ) -> HalResult<()> {
        let mut remaining = timeout.as_micros();
        loop {
            if self.read(addr) & mask == expected {
                return Ok(());
            }
            if remaining == 0 {
                trace!("Timeout waiting for register {:x}.", addr);
                return Err(HalError::Timeout { addr });
            }
            let step = remaining.min(POLL_INTERVAL_US as u64);
            self.delay_us(step as u32);
            remaining -= step;
        }
    }
}
impl<T: RegisterAccess + ?Sized> RegisterPort for T {}
