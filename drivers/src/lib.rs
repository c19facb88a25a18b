#![no_std]
//! Wireless charging power-path driver library
//!
//! Register-level drivers for the ICs on the wireless charging path: the
//! P9415 receiver, the OP20A step-down charge pump (CP1) and the BQ2597x
//! switched-capacitor charge pump (CP2). All drivers sit on top of the
//! blocking `embedded-hal` I2C traits so they can share one bus through
//! `embedded-hal-bus`.

/// BQ2597x switched-capacitor charge pump driver (CP2).
pub mod bq2597x;

/// OP20A step-down charge pump driver (CP1).
pub mod op20a;

/// P9415 wireless power receiver driver.
pub mod p9415;

extern crate alloc;

use embedded_hal::i2c::I2c;

/// Thin register access wrapper shared by the 8-bit register drivers.
#[derive(Debug)]
pub(crate) struct BlockingRegisterDevice<I2C> {
    i2c: I2C,
    pub(crate) adr: u8,
}

impl<I2C> BlockingRegisterDevice<I2C>
where
    I2C: I2c,
{
    pub(crate) fn new(i2c: I2C, adr: u8) -> Self {
        Self { i2c, adr }
    }

    pub(crate) fn read_register(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut buffer = [0u8];
        self.i2c.write_read(self.adr, &[register], &mut buffer)?;
        Ok(buffer[0])
    }

    pub(crate) fn read_buf(&mut self, register: u8, buf: &mut [u8]) -> Result<(), I2C::Error> {
        self.i2c.write_read(self.adr, &[register], buf)
    }

    pub(crate) fn write_register(&mut self, register_and_data: &[u8]) -> Result<(), I2C::Error> {
        self.i2c.write(self.adr, register_and_data)
    }

    pub(crate) fn set_register_bit(&mut self, register: u8, bit: u8) -> Result<(), I2C::Error> {
        let val = self.read_register(register)?;
        self.write_register(&[register, val | (1 << bit)])
    }

    pub(crate) fn clear_register_bit(&mut self, register: u8, bit: u8) -> Result<(), I2C::Error> {
        let val = self.read_register(register)?;
        self.write_register(&[register, val & !(1 << bit)])
    }

    pub(crate) fn get_register_bit(&mut self, register: u8, bit: u8) -> Result<bool, I2C::Error> {
        let val = self.read_register(register)?;
        Ok((val & (1 << bit)) != 0)
    }

    /// Read-modify-write of the bits selected by `mask`.
    pub(crate) fn update_bits(
        &mut self,
        register: u8,
        mask: u8,
        value: u8,
    ) -> Result<(), I2C::Error> {
        let val = self.read_register(register)?;
        self.write_register(&[register, (val & !mask) | (value & mask)])
    }
}

#[cfg(test)]
pub(crate) mod fake_bus {
    //! In-memory I2C bus used by the driver tests.

    use alloc::vec::Vec;
    use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

    /// Register file of one device; 16-bit addressed so it also serves the P9415.
    #[derive(Debug)]
    pub struct FakeBus {
        pub adr: u8,
        pub wide_address: bool,
        pub regs: [u8; 0x400],
        pub present: bool,
        pub writes: Vec<(u16, u8)>,
    }

    impl FakeBus {
        pub fn new(adr: u8) -> Self {
            Self {
                adr,
                wide_address: false,
                regs: [0; 0x400],
                present: true,
                writes: Vec::new(),
            }
        }

        pub fn new_wide(adr: u8) -> Self {
            Self {
                wide_address: true,
                ..Self::new(adr)
            }
        }

        fn split_address<'b>(&self, bytes: &'b [u8]) -> (u16, &'b [u8]) {
            if self.wide_address {
                (u16::from_be_bytes([bytes[0], bytes[1]]), &bytes[2..])
            } else {
                (bytes[0] as u16, &bytes[1..])
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if !self.present || address != self.adr {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            let mut pointer = 0u16;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        let (reg, data) = self.split_address(bytes);
                        pointer = reg;
                        for (i, b) in data.iter().enumerate() {
                            let at = reg + i as u16;
                            self.regs[at as usize] = *b;
                            self.writes.push((at, *b));
                        }
                    }
                    Operation::Read(buf) => {
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = self.regs[(pointer + i as u16) as usize];
                        }
                    }
                }
            }
            Ok(())
        }
    }
}
