use core::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use embedded_hal::i2c::{Error, I2c};

use crate::BlockingRegisterDevice;

/// Default 7-bit address of the OP20A on the charger bus
pub const OP20A_ADDRESS: u8 = 0x68;

pub(crate) const REG_DEVICE_ID: u8 = 0x00;
pub(crate) const REG_CTRL: u8 = 0x01;
pub(crate) const REG_WDT_CTRL: u8 = 0x02;
pub(crate) const REG_INT_MASK: u8 = 0x03;
pub(crate) const REG_STATUS: u8 = 0x04;
pub(crate) const REG_INT_FLAG: u8 = 0x05;
pub(crate) const REG_VOUT_ADC: u8 = 0x06;
pub(crate) const REG_VBUS_ADC: u8 = 0x08;
pub(crate) const REG_VBUS_OVP: u8 = 0x0A;
pub(crate) const REG_VOUT_OVP: u8 = 0x0B;
pub(crate) const REG_ILIM: u8 = 0x0C;

pub(crate) const EN_BIT: u8 = 0;
pub(crate) const SOFT_RESET_BIT: u8 = 7;
pub(crate) const WDT_FEED_BIT: u8 = 7;
pub(crate) const WDT_TIMEOUT_MASK: u8 = 0x03;

/// Known device id of the OP20A
pub const OP20A_DEVICE_ID: u8 = 0x20;

/// Power-on configuration written by [`Op20a::hw_init`]: VBUS OVP 22 V,
/// VOUT OVP 12 V, switch current limit 4 A, watchdog 160 s.
const HW_INIT_TABLE: [(u8, u8); 4] = [
    (REG_VBUS_OVP, 0x16),
    (REG_VOUT_OVP, 0x0C),
    (REG_ILIM, 0x28),
    (REG_WDT_CTRL, 0x03),
];

/// Errors that can occur when interacting with the OP20A
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Op20aError {
    /// Device id did not match
    UnknownDevice(u8),
    /// Bus transaction failed
    I2CError,
}

impl<E> From<E> for Op20aError
where
    E: Error,
{
    fn from(_: E) -> Self {
        Op20aError::I2CError
    }
}

impl Display for Op20aError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Op20aError::UnknownDevice(id) => write!(f, "op20a unknown device id {id:#x}"),
            Op20aError::I2CError => write!(f, "op20a i2c error"),
        }
    }
}

bitflags! {
    /// Status register (0x04). `READY` set and no fault bits means healthy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Op20aStatus: u8 {
        /// Converter ready
        const READY      = 1 << 0;
        /// Discharge watchdog pending
        const DWP        = 1 << 1;
        /// Over temperature protection
        const OTP        = 1 << 2;
        /// Switch over current
        const SWITCH_OCP = 1 << 3;
        /// Charge reverse protection
        const CRP        = 1 << 4;
        /// VOUT over voltage
        const VOUT_OVP   = 1 << 5;
        /// Current limit protection
        const CLP        = 1 << 6;
        /// VBUS over voltage
        const VBUS_OVP   = 1 << 7;
    }
}

impl Op20aStatus {
    /// Bits that indicate a real fault
    pub const FAULTS: Op20aStatus = Op20aStatus::OTP
        .union(Op20aStatus::SWITCH_OCP)
        .union(Op20aStatus::CRP)
        .union(Op20aStatus::VOUT_OVP)
        .union(Op20aStatus::CLP)
        .union(Op20aStatus::VBUS_OVP);

    pub fn has_fault(&self) -> bool {
        self.intersects(Self::FAULTS)
    }

    pub fn is_healthy(&self) -> bool {
        self.contains(Op20aStatus::READY) && !self.has_fault()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Op20aStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Op20aStatus({=u8:#x})", self.bits());
    }
}

/// OP20A 4:2 step-down charge pump
#[derive(Debug)]
pub struct Op20a<I2C> {
    dev: BlockingRegisterDevice<I2C>,
}

impl<I2C> Op20a<I2C>
where
    I2C: I2c,
{
    /// Creates a new driver instance
    ///
    /// # Arguments
    /// * `i2c` - I2C bus instance
    /// * `adr` - I2C device address (typically 0x68)
    pub fn new(i2c: I2C, adr: u8) -> Self {
        Self {
            dev: BlockingRegisterDevice::new(i2c, adr),
        }
    }

    /// Gets the device id register
    pub fn get_device_id(&mut self) -> Result<u8, Op20aError> {
        Ok(self.dev.read_register(REG_DEVICE_ID)?)
    }

    /// Verifies the part and writes the protection thresholds.
    ///
    /// Must run before every enable: the part forgets its configuration
    /// whenever its input collapses.
    pub fn hw_init(&mut self) -> Result<(), Op20aError> {
        let id = self.get_device_id()?;
        if id != OP20A_DEVICE_ID {
            return Err(Op20aError::UnknownDevice(id));
        }
        for (reg, val) in HW_INIT_TABLE {
            self.dev.write_register(&[reg, val])?;
        }
        // all interrupts unmasked
        self.dev.write_register(&[REG_INT_MASK, 0x00])?;
        Ok(())
    }

    /// Starts switching
    pub fn enable(&mut self) -> Result<(), Op20aError> {
        self.dev.set_register_bit(REG_CTRL, EN_BIT)?;
        Ok(())
    }

    /// Stops switching
    pub fn disable(&mut self) -> Result<(), Op20aError> {
        self.dev.clear_register_bit(REG_CTRL, EN_BIT)?;
        Ok(())
    }

    /// Reads back the enable bit
    pub fn is_enabled(&mut self) -> Result<bool, Op20aError> {
        Ok(self.dev.get_register_bit(REG_CTRL, EN_BIT)?)
    }

    /// Soft-resets the part; configuration must be rewritten afterwards
    pub fn soft_reset(&mut self) -> Result<(), Op20aError> {
        self.dev.set_register_bit(REG_CTRL, SOFT_RESET_BIT)?;
        Ok(())
    }

    /// Gets the live status bits
    pub fn get_status(&mut self) -> Result<Op20aStatus, Op20aError> {
        let val = self.dev.read_register(REG_STATUS)?;
        Ok(Op20aStatus::from_bits_truncate(val))
    }

    /// Reads and clears the latched interrupt flags
    pub fn get_int_flags(&mut self) -> Result<Op20aStatus, Op20aError> {
        let val = self.dev.read_register(REG_INT_FLAG)?;
        Ok(Op20aStatus::from_bits_truncate(val))
    }

    /// Output voltage in mV
    pub fn get_vout_voltage(&mut self) -> Result<u16, Op20aError> {
        self.read_u16(REG_VOUT_ADC)
    }

    /// Input voltage in mV
    pub fn get_vbus_voltage(&mut self) -> Result<u16, Op20aError> {
        self.read_u16(REG_VBUS_ADC)
    }

    /// Feeds the watchdog; the part disables itself when it expires
    pub fn feed_watchdog(&mut self) -> Result<(), Op20aError> {
        let val = self.dev.read_register(REG_WDT_CTRL)?;
        let data = (val & WDT_TIMEOUT_MASK) | (1 << WDT_FEED_BIT);
        self.dev.write_register(&[REG_WDT_CTRL, data])?;
        Ok(())
    }

    fn read_u16(&mut self, reg: u8) -> Result<u16, Op20aError> {
        let mut buf = [0u8; 2];
        self.dev.read_buf(reg, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_bus::FakeBus;

    fn driver() -> Op20a<FakeBus> {
        let mut bus = FakeBus::new(OP20A_ADDRESS);
        bus.regs[REG_DEVICE_ID as usize] = OP20A_DEVICE_ID;
        Op20a::new(bus, OP20A_ADDRESS)
    }

    #[test]
    fn test_hw_init_writes_protection_table() {
        let mut cp = driver();
        cp.hw_init().unwrap();
        for (reg, val) in HW_INIT_TABLE {
            assert_eq!(cp.dev.read_register(reg).unwrap(), val);
        }
    }

    #[test]
    fn test_hw_init_rejects_unknown_part() {
        let mut cp = driver();
        cp.dev.i2c.regs[REG_DEVICE_ID as usize] = 0x42;
        assert_eq!(cp.hw_init(), Err(Op20aError::UnknownDevice(0x42)));
    }

    #[test]
    fn test_enable_disable() {
        let mut cp = driver();
        cp.enable().unwrap();
        assert!(cp.is_enabled().unwrap());
        cp.disable().unwrap();
        assert!(!cp.is_enabled().unwrap());
    }

    #[test]
    fn test_status_health() {
        let mut cp = driver();
        cp.dev.i2c.regs[REG_STATUS as usize] = 0b0000_0011;
        let status = cp.get_status().unwrap();
        assert!(status.is_healthy());
        cp.dev.i2c.regs[REG_STATUS as usize] = 0b1000_0001;
        let status = cp.get_status().unwrap();
        assert!(status.has_fault());
        assert!(!status.is_healthy());
        cp.dev.i2c.regs[REG_STATUS as usize] = 0;
        assert!(!cp.get_status().unwrap().is_healthy());
    }

    #[test]
    fn test_feed_watchdog_keeps_timeout() {
        let mut cp = driver();
        cp.dev.i2c.regs[REG_WDT_CTRL as usize] = 0x02;
        cp.feed_watchdog().unwrap();
        assert_eq!(cp.dev.i2c.regs[REG_WDT_CTRL as usize], 0x82);
    }

    #[test]
    fn test_vout_adc() {
        let mut cp = driver();
        cp.dev.i2c.regs[REG_VOUT_ADC as usize] = 0x1F;
        cp.dev.i2c.regs[REG_VOUT_ADC as usize + 1] = 0x40;
        assert_eq!(cp.get_vout_voltage().unwrap(), 8_000);
    }
}
