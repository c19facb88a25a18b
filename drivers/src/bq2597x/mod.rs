use core::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use embedded_hal::i2c::{Error, I2c};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::BlockingRegisterDevice;

/// Default 7-bit address of the BQ2597x on the charger bus
pub const BQ2597X_ADDRESS: u8 = 0x66;

pub(crate) const REG_CONTROL: u8 = 0x0B;
pub(crate) const REG_CHRG_CTRL: u8 = 0x0C;
pub(crate) const REG_INT_STAT: u8 = 0x0D;
pub(crate) const REG_FLT_STAT: u8 = 0x10;
pub(crate) const REG_PART_INFO: u8 = 0x13;
pub(crate) const REG_ADC_CTRL: u8 = 0x14;
pub(crate) const REG_ADC_BASE: u8 = 0x16;

pub(crate) const CHG_EN_BIT: u8 = 7;
pub(crate) const REG_RST_BIT: u8 = 7;
pub(crate) const ADC_EN_BIT: u8 = 7;
pub(crate) const ADC_RATE_BIT: u8 = 6;

/// Die temperature LSB is 0.5 degC, reported here in deci-degrees.
pub(crate) const TDIE_LSB_DECI_C: i32 = 5;

/// Errors that can occur when interacting with the BQ2597x
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bq2597xError {
    /// Device did not answer on the bus during init
    Init,
    /// Bus transaction failed
    I2CError,
}

impl<E> From<E> for Bq2597xError
where
    E: Error,
{
    fn from(_: E) -> Self {
        Bq2597xError::I2CError
    }
}

impl Display for Bq2597xError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Bq2597xError::Init => write!(f, "bq2597x not detected"),
            Bq2597xError::I2CError => write!(f, "bq2597x i2c error"),
        }
    }
}

/// ADC channels, in register order starting at 0x16 (two bytes each)
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcChannel {
    Ibus = 0,
    Vbus = 1,
    Vac = 2,
    Vout = 3,
    Vbat = 4,
    Ibat = 5,
    Tbus = 6,
    Tbat = 7,
    Tdie = 8,
}

impl AdcChannel {
    fn register(self) -> u8 {
        REG_ADC_BASE + (u8::from(self) << 1)
    }
}

impl Display for AdcChannel {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            AdcChannel::Ibus => write!(f, "IBUS"),
            AdcChannel::Vbus => write!(f, "VBUS"),
            AdcChannel::Vac => write!(f, "VAC"),
            AdcChannel::Vout => write!(f, "VOUT"),
            AdcChannel::Vbat => write!(f, "VBAT"),
            AdcChannel::Ibat => write!(f, "IBAT"),
            AdcChannel::Tbus => write!(f, "TBUS"),
            AdcChannel::Tbat => write!(f, "TBAT"),
            AdcChannel::Tdie => write!(f, "TDIE"),
        }
    }
}

bitflags! {
    /// Latched fault status (register 0x10)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultStatus: u8 {
        const BAT_OVP   = 1 << 7;
        const BAT_OCP   = 1 << 6;
        const BUS_OVP   = 1 << 5;
        const BUS_OCP   = 1 << 4;
        const TS_ALM    = 1 << 3;
        const TSBAT     = 1 << 2;
        const TSBUS     = 1 << 1;
        const TDIE      = 1 << 0;
    }
}

bitflags! {
    /// Converter/interrupt status (register 0x0D)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConverterStatus: u8 {
        const ADC_DONE      = 1 << 7;
        const VBUS_PRESENT  = 1 << 6;
        const VBAT_INSERT   = 1 << 5;
        const VOUT_OK       = 1 << 4;
        const SWITCHING     = 1 << 3;
        const CONV_OCP      = 1 << 2;
        const PIN_DIAG_FAIL = 1 << 1;
        const WD_TIMEOUT    = 1 << 0;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FaultStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "FaultStatus({=u8:#x})", self.bits());
    }
}

/// BQ2597x switched-capacitor 2:1 charge pump
#[derive(Debug)]
pub struct Bq2597x<I2C> {
    dev: BlockingRegisterDevice<I2C>,
}

impl<I2C> Bq2597x<I2C>
where
    I2C: I2c,
{
    /// Creates a new driver instance
    ///
    /// # Arguments
    /// * `i2c` - I2C bus instance
    /// * `adr` - I2C device address (typically 0x66)
    pub fn new(i2c: I2C, adr: u8) -> Self {
        Self {
            dev: BlockingRegisterDevice::new(i2c, adr),
        }
    }

    /// Probes the part and starts continuous ADC conversion
    pub fn init(&mut self) -> Result<(), Bq2597xError> {
        if self.dev.read_register(REG_PART_INFO).is_err() {
            return Err(Bq2597xError::Init);
        }
        self.set_adc_enabled(true)?;
        #[cfg(feature = "log-04")]
        log::info!("bq2597x at {:#x} ready", self.dev.adr);
        Ok(())
    }

    /// Gets the raw part info register
    pub fn get_part_info(&mut self) -> Result<u8, Bq2597xError> {
        Ok(self.dev.read_register(REG_PART_INFO)?)
    }

    /// Resets all registers to their power-on defaults
    pub fn reset_registers(&mut self) -> Result<(), Bq2597xError> {
        self.dev.set_register_bit(REG_CONTROL, REG_RST_BIT)?;
        Ok(())
    }

    /// Enables switching
    pub fn enable_charge(&mut self) -> Result<(), Bq2597xError> {
        self.dev.set_register_bit(REG_CHRG_CTRL, CHG_EN_BIT)?;
        Ok(())
    }

    /// Disables switching
    pub fn disable_charge(&mut self) -> Result<(), Bq2597xError> {
        self.dev.clear_register_bit(REG_CHRG_CTRL, CHG_EN_BIT)?;
        Ok(())
    }

    /// Reads back the CHG_EN bit
    pub fn is_charge_enabled(&mut self) -> Result<bool, Bq2597xError> {
        Ok(self.dev.get_register_bit(REG_CHRG_CTRL, CHG_EN_BIT)?)
    }

    /// Starts or stops continuous ADC conversion
    pub fn set_adc_enabled(&mut self, enable: bool) -> Result<(), Bq2597xError> {
        let mask = (1 << ADC_EN_BIT) | (1 << ADC_RATE_BIT);
        let value = if enable { 1 << ADC_EN_BIT } else { 0 };
        self.dev.update_bits(REG_ADC_CTRL, mask, value)?;
        Ok(())
    }

    /// Gets the latched fault flags
    pub fn get_fault_status(&mut self) -> Result<FaultStatus, Bq2597xError> {
        let val = self.dev.read_register(REG_FLT_STAT)?;
        Ok(FaultStatus::from_bits_truncate(val))
    }

    /// Gets the converter status flags
    pub fn get_converter_status(&mut self) -> Result<ConverterStatus, Bq2597xError> {
        let val = self.dev.read_register(REG_INT_STAT)?;
        Ok(ConverterStatus::from_bits_truncate(val))
    }

    /// Reads one ADC channel
    ///
    /// Currents are in mA, voltages in mV, TBUS/TBAT in raw percent codes
    /// and TDIE in deci-degrees Celsius.
    pub fn read_adc(&mut self, channel: AdcChannel) -> Result<i32, Bq2597xError> {
        let mut buf = [0u8; 2];
        self.dev.read_buf(channel.register(), &mut buf)?;
        let raw = i16::from_be_bytes(buf) as i32;
        Ok(match channel {
            AdcChannel::Tdie => raw * TDIE_LSB_DECI_C,
            _ => raw,
        })
    }
}
