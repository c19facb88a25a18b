use core::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use embedded_hal::i2c::{Error, I2c};
use num_enum::{FromPrimitive, IntoPrimitive};

/// Default 7-bit address of the P9415 receiver
pub const P9415_ADDRESS: u8 = 0x3B;

/// Chip id reported at register 0x0000
pub const P9415_CHIP_ID: u16 = 0x9415;

/// Hardware maximum of the VOUT setpoint in mV
pub const VOUT_MAX_MV: u16 = 20_000;

/// Smallest VOUT setpoint accepted by the chip in mV
pub const VOUT_MIN_MV: u16 = 3_500;

/// Longest proprietary payload the packet buffer holds
pub const PROP_PAYLOAD_MAX: usize = 4;

/// Size of the FOD coefficient block
pub const FOD_PARAM_LEN: usize = 16;

pub(crate) const REG_CHIP_ID: u16 = 0x0000;
pub(crate) const REG_CEP_COUNT: u16 = 0x0030;
pub(crate) const REG_CEP_VALUE: u16 = 0x0033;
pub(crate) const REG_STATUS: u16 = 0x0034;
pub(crate) const REG_INT: u16 = 0x0036;
pub(crate) const REG_INT_CLEAR: u16 = 0x003A;
pub(crate) const REG_VOUT_ADC: u16 = 0x003C;
pub(crate) const REG_VOUT_SET: u16 = 0x003E;
pub(crate) const REG_VRECT_ADC: u16 = 0x0040;
pub(crate) const REG_IOUT_ADC: u16 = 0x0044;
pub(crate) const REG_COMMAND: u16 = 0x004E;
pub(crate) const REG_PROP_HEADER: u16 = 0x0050;
pub(crate) const REG_PROP_DATA: u16 = 0x0051;
pub(crate) const REG_FREQ: u16 = 0x005E;
pub(crate) const REG_FOD: u16 = 0x0068;
pub(crate) const REG_TRX_CURR: u16 = 0x006E;
pub(crate) const REG_TRX_VOL: u16 = 0x0070;
pub(crate) const REG_TRX_CTRL: u16 = 0x0076;
pub(crate) const REG_TRX_STATUS: u16 = 0x0078;
pub(crate) const REG_TRX_ERR: u16 = 0x0079;
pub(crate) const REG_FW_VERSION: u16 = 0x0084;
pub(crate) const REG_RUN_MODE: u16 = 0x0088;

pub(crate) const CMD_SEND_PROP: u8 = 1 << 0;
pub(crate) const CMD_CLEAR_INT: u8 = 1 << 5;
pub(crate) const CMD_SOFT_RESET: u8 = 1 << 6;
pub(crate) const TRX_ENABLE: u8 = 1 << 0;

/// Errors that can occur when interacting with the P9415
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum P9415Error {
    /// Payload or parameter out of range
    InvalidArgument,
    /// Bus transaction failed (chip unpowered or absent)
    I2CError,
}

impl<E> From<E> for P9415Error
where
    E: Error,
{
    fn from(_: E) -> Self {
        P9415Error::I2CError
    }
}

impl Display for P9415Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            P9415Error::InvalidArgument => write!(f, "p9415 invalid argument"),
            P9415Error::I2CError => write!(f, "p9415 i2c error"),
        }
    }
}

/// Power profile negotiated with the transmitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunMode {
    Bpp = 0x01,
    Epp = 0x04,
    #[num_enum(default)]
    Other = 0xFF,
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            RunMode::Bpp => write!(f, "BPP"),
            RunMode::Epp => write!(f, "EPP"),
            RunMode::Other => write!(f, "Other"),
        }
    }
}

bitflags! {
    /// Reverse (TX) mode status (register 0x0078)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TrxStatus: u8 {
        const READY        = 1 << 0;
        const DIGITAL_PING = 1 << 1;
        const TRANSFER     = 1 << 2;
    }
}

bitflags! {
    /// Reverse (TX) mode error flags (register 0x0079)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TrxErr: u8 {
        const OCP         = 1 << 0;
        const OVP         = 1 << 1;
        const LVP         = 1 << 2;
        const FOD         = 1 << 3;
        const OTP         = 1 << 4;
        const CEP_TIMEOUT = 1 << 5;
        const RX_REMOVED  = 1 << 6;
    }
}

bitflags! {
    /// Receiver interrupt sources (register 0x0036)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RxInt: u16 {
        const OVP          = 1 << 0;
        const OCP          = 1 << 1;
        const OTP          = 1 << 2;
        const VOUT_CHANGED = 1 << 4;
        const TX_DATA      = 1 << 5;
        const MODE_CHANGED = 1 << 12;
        const TRX          = 1 << 15;
    }
}

/// P9415 Qi receiver with reverse charge (TX) support
#[derive(Debug)]
pub struct P9415<I2C> {
    i2c: I2C,
    adr: u8,
}

impl<I2C> P9415<I2C>
where
    I2C: I2c,
{
    /// Creates a new driver instance
    ///
    /// # Arguments
    /// * `i2c` - I2C bus instance
    /// * `adr` - I2C device address (typically 0x3B)
    pub fn new(i2c: I2C, adr: u8) -> Self {
        Self { i2c, adr }
    }

    /// Gets the chip id
    pub fn get_chip_id(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_CHIP_ID)
    }

    /// Gets the firmware version word
    pub fn get_fw_version(&mut self) -> Result<u32, P9415Error> {
        let mut buf = [0u8; 4];
        self.read_buf(REG_FW_VERSION, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Rectified output voltage in mV
    pub fn get_vout(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_VOUT_ADC)
    }

    /// Rectifier voltage in mV
    pub fn get_vrect(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_VRECT_ADC)
    }

    /// Output current in mA
    pub fn get_iout(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_IOUT_ADC)
    }

    /// Operating frequency in kHz
    pub fn get_freq(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_FREQ)
    }

    /// Current VOUT setpoint in mV
    pub fn get_vout_setpoint(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_VOUT_SET)
    }

    /// Sets the VOUT setpoint, clamped to the chip range
    pub fn set_vout(&mut self, millivolt: u16) -> Result<(), P9415Error> {
        let mv = millivolt.clamp(VOUT_MIN_MV, VOUT_MAX_MV);
        self.write_buf(REG_VOUT_SET, &mv.to_le_bytes())
    }

    /// Number of control error packets sent so far (wraps)
    pub fn get_cep_count(&mut self) -> Result<u8, P9415Error> {
        self.read_u8(REG_CEP_COUNT)
    }

    /// Value of the last control error packet
    pub fn get_cep_value(&mut self) -> Result<i8, P9415Error> {
        Ok(self.read_u8(REG_CEP_VALUE)? as i8)
    }

    /// Gets the negotiated power profile
    pub fn get_run_mode(&mut self) -> Result<RunMode, P9415Error> {
        let val = self.read_u8(REG_RUN_MODE)?;
        Ok(RunMode::from(val))
    }

    /// Gets the raw status word
    pub fn get_status(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_STATUS)
    }

    /// Gets the pending interrupt sources
    pub fn get_int(&mut self) -> Result<RxInt, P9415Error> {
        Ok(RxInt::from_bits_truncate(self.read_u16(REG_INT)?))
    }

    /// Clears the given interrupt sources
    pub fn clear_int(&mut self, int: RxInt) -> Result<(), P9415Error> {
        self.write_buf(REG_INT_CLEAR, &int.bits().to_le_bytes())?;
        self.write_u8(REG_COMMAND, CMD_CLEAR_INT)
    }

    /// Sends a proprietary packet to the transmitter
    ///
    /// # Arguments
    /// * `header` - Qi packet header
    /// * `payload` - up to [`PROP_PAYLOAD_MAX`] bytes
    pub fn send_prop_packet(&mut self, header: u8, payload: &[u8]) -> Result<(), P9415Error> {
        if payload.len() > PROP_PAYLOAD_MAX {
            return Err(P9415Error::InvalidArgument);
        }
        self.write_u8(REG_PROP_HEADER, header)?;
        self.write_buf(REG_PROP_DATA, payload)?;
        self.write_u8(REG_COMMAND, CMD_SEND_PROP)
    }

    /// Writes the foreign object detection coefficients
    pub fn write_fod(&mut self, params: &[u8]) -> Result<(), P9415Error> {
        if params.len() != FOD_PARAM_LEN {
            return Err(P9415Error::InvalidArgument);
        }
        self.write_buf(REG_FOD, params)
    }

    /// Soft-resets the receiver MCU
    pub fn soft_reset(&mut self) -> Result<(), P9415Error> {
        self.write_u8(REG_COMMAND, CMD_SOFT_RESET)
    }

    /// Enables or disables reverse (TX) mode
    pub fn set_trx_enabled(&mut self, enable: bool) -> Result<(), P9415Error> {
        let val = self.read_u8(REG_TRX_CTRL)?;
        let data = if enable {
            val | TRX_ENABLE
        } else {
            val & !TRX_ENABLE
        };
        self.write_u8(REG_TRX_CTRL, data)
    }

    /// Reads back the reverse mode enable bit
    pub fn is_trx_enabled(&mut self) -> Result<bool, P9415Error> {
        Ok(self.read_u8(REG_TRX_CTRL)? & TRX_ENABLE != 0)
    }

    /// Gets the reverse mode status
    pub fn get_trx_status(&mut self) -> Result<TrxStatus, P9415Error> {
        Ok(TrxStatus::from_bits_truncate(self.read_u8(REG_TRX_STATUS)?))
    }

    /// Gets the reverse mode error flags
    pub fn get_trx_err(&mut self) -> Result<TrxErr, P9415Error> {
        Ok(TrxErr::from_bits_truncate(self.read_u8(REG_TRX_ERR)?))
    }

    /// Reverse mode output voltage in mV
    pub fn get_trx_vol(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_TRX_VOL)
    }

    /// Reverse mode output current in mA
    pub fn get_trx_curr(&mut self) -> Result<u16, P9415Error> {
        self.read_u16(REG_TRX_CURR)
    }

    fn read_buf(&mut self, reg: u16, buf: &mut [u8]) -> Result<(), P9415Error> {
        self.i2c.write_read(self.adr, &reg.to_be_bytes(), buf)?;
        Ok(())
    }

    fn read_u8(&mut self, reg: u16) -> Result<u8, P9415Error> {
        let mut buf = [0u8];
        self.read_buf(reg, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self, reg: u16) -> Result<u16, P9415Error> {
        let mut buf = [0u8; 2];
        self.read_buf(reg, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_u8(&mut self, reg: u16, val: u8) -> Result<(), P9415Error> {
        self.write_buf(reg, &[val])
    }

    fn write_buf(&mut self, reg: u16, data: &[u8]) -> Result<(), P9415Error> {
        // 2 address bytes + the largest block (FOD)
        let mut frame = [0u8; 2 + FOD_PARAM_LEN];
        if data.len() > FOD_PARAM_LEN {
            return Err(P9415Error::InvalidArgument);
        }
        frame[..2].copy_from_slice(&reg.to_be_bytes());
        frame[2..2 + data.len()].copy_from_slice(data);
        self.i2c.write(self.adr, &frame[..2 + data.len()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_bus::FakeBus;
    use alloc::format;

    fn driver() -> P9415<FakeBus> {
        P9415::new(FakeBus::new_wide(P9415_ADDRESS), P9415_ADDRESS)
    }

    #[test]
    fn test_chip_id() {
        let mut rx = driver();
        rx.i2c.regs[0] = 0x15;
        rx.i2c.regs[1] = 0x94;
        assert_eq!(rx.get_chip_id().unwrap(), P9415_CHIP_ID);
    }

    #[test]
    fn test_set_vout_clamps_to_hw_max() {
        let mut rx = driver();
        rx.set_vout(25_000).unwrap();
        assert_eq!(rx.get_vout_setpoint().unwrap(), VOUT_MAX_MV);
        rx.set_vout(9_000).unwrap();
        assert_eq!(rx.get_vout_setpoint().unwrap(), 9_000);
        rx.set_vout(1_000).unwrap();
        assert_eq!(rx.get_vout_setpoint().unwrap(), VOUT_MIN_MV);
    }

    #[test]
    fn test_cep_is_signed() {
        let mut rx = driver();
        rx.i2c.regs[REG_CEP_VALUE as usize] = (-12i8) as u8;
        rx.i2c.regs[REG_CEP_COUNT as usize] = 7;
        assert_eq!(rx.get_cep_value().unwrap(), -12);
        assert_eq!(rx.get_cep_count().unwrap(), 7);
    }

    #[test]
    fn test_send_prop_packet() {
        let mut rx = driver();
        rx.send_prop_packet(0x48, &[0xA1, 0x02]).unwrap();
        assert_eq!(rx.i2c.regs[REG_PROP_HEADER as usize], 0x48);
        assert_eq!(rx.i2c.regs[REG_PROP_DATA as usize], 0xA1);
        assert_eq!(rx.i2c.regs[REG_PROP_DATA as usize + 1], 0x02);
        assert_eq!(rx.i2c.regs[REG_COMMAND as usize], CMD_SEND_PROP);
        assert_eq!(
            rx.send_prop_packet(0x48, &[0; 5]),
            Err(P9415Error::InvalidArgument)
        );
    }

    #[test]
    fn test_fod_length_checked() {
        let mut rx = driver();
        assert_eq!(rx.write_fod(&[0; 3]), Err(P9415Error::InvalidArgument));
        let params = [0x5Au8; FOD_PARAM_LEN];
        rx.write_fod(&params).unwrap();
        assert_eq!(rx.i2c.regs[REG_FOD as usize + 15], 0x5A);
    }

    #[test]
    fn test_run_mode() {
        let mut rx = driver();
        rx.i2c.regs[REG_RUN_MODE as usize] = 0x04;
        assert_eq!(rx.get_run_mode().unwrap(), RunMode::Epp);
        rx.i2c.regs[REG_RUN_MODE as usize] = 0x37;
        assert_eq!(rx.get_run_mode().unwrap(), RunMode::Other);
        assert_eq!(format!("{}", RunMode::Bpp), "BPP");
    }

    #[test]
    fn test_trx_enable_and_flags() {
        let mut rx = driver();
        rx.set_trx_enabled(true).unwrap();
        assert!(rx.is_trx_enabled().unwrap());
        rx.i2c.regs[REG_TRX_ERR as usize] = (TrxErr::FOD | TrxErr::OCP).bits();
        let err = rx.get_trx_err().unwrap();
        assert!(err.contains(TrxErr::FOD));
        assert!(!err.contains(TrxErr::OTP));
        rx.set_trx_enabled(false).unwrap();
        assert!(!rx.is_trx_enabled().unwrap());
    }

    #[test]
    fn test_absent_chip_reports_bus_error() {
        let mut bus = FakeBus::new_wide(P9415_ADDRESS);
        bus.present = false;
        let mut rx = P9415::new(bus, P9415_ADDRESS);
        assert_eq!(rx.get_vout(), Err(P9415Error::I2CError));
    }
}
