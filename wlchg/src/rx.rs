//! Receiver chip abstraction
//!
//! The policy only talks to the receiver through [`RxChip`]: integer
//! properties, raw byte properties and dock packets. [`P9415Rx`] binds the
//! trait to the P9415 driver plus the dock detect, enable and sleep lines.

use core::fmt::{self, Display, Formatter};

use drivers::p9415::{P9415, RunMode, VOUT_MAX_MV};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::I2c;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};

/// Properties exposed by a receiver chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxProp {
    /// Output voltage, mV
    Vout,
    /// Commanded output voltage, mV
    VoutSet,
    /// Rectifier voltage, mV
    Vrect,
    /// Output current, mA
    Iout,
    /// Control error packet, only when it changed since the last read
    Cep,
    /// Control error packet, last value even if unchanged
    CepLatest,
    /// Operating frequency, kHz
    WorkFreq,
    /// Negotiated profile as a [`RxRunMode`] code
    RunMode,
    TrxEnable,
    /// [`drivers::p9415::TrxStatus`] bits
    TrxStatus,
    /// [`drivers::p9415::TrxErr`] bits
    TrxErr,
    TrxVol,
    TrxCurr,
    ChipEn,
    ChipSleep,
    /// Dock presence
    ChipCon,
    FwUpdating,
    /// Foreign object detection coefficients (bytes)
    Fod,
}

/// Power profile negotiated between receiver and dock
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RxRunMode {
    Other = 0,
    Bpp = 1,
    Epp = 2,
}

impl From<RunMode> for RxRunMode {
    fn from(mode: RunMode) -> Self {
        match mode {
            RunMode::Bpp => RxRunMode::Bpp,
            RunMode::Epp => RxRunMode::Epp,
            RunMode::Other => RxRunMode::Other,
        }
    }
}

impl Display for RxRunMode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            RxRunMode::Other => write!(f, "OTHER"),
            RxRunMode::Bpp => write!(f, "BPP"),
            RxRunMode::Epp => write!(f, "EPP"),
        }
    }
}

/// Uniform access to a wireless receiver.
///
/// Every access on an absent or unpowered chip fails with
/// [`Error::NoDevice`]; callers retry on a later tick.
pub trait RxChip {
    fn get_prop(&mut self, prop: RxProp) -> Result<i32>;

    fn set_prop(&mut self, prop: RxProp, val: i32) -> Result<()>;

    /// Writes a byte-valued property
    fn set_prop_bytes(&mut self, prop: RxProp, data: &[u8]) -> Result<()>;

    /// Sends a proprietary packet to the dock
    fn send_msg(&mut self, header: u8, payload: &[u8]) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    fn run_mode(&mut self) -> Result<RxRunMode> {
        let code = self.get_prop(RxProp::RunMode)?;
        u8::try_from(code)
            .ok()
            .and_then(|c| RxRunMode::try_from(c).ok())
            .ok_or(Error::Invalid)
    }
}

/// P9415 receiver with its control lines
#[derive(Debug)]
pub struct P9415Rx<I2C, CON, EN, SLEEP> {
    chip: P9415<I2C>,
    /// High while docked
    con: CON,
    /// Active low
    en: EN,
    sleep: SLEEP,
    enabled: bool,
    asleep: bool,
    fw_updating: bool,
    trx_on: bool,
    last_cep_count: Option<u8>,
}

impl<I2C, CON, EN, SLEEP> P9415Rx<I2C, CON, EN, SLEEP>
where
    I2C: I2c,
    CON: InputPin,
    EN: OutputPin,
    SLEEP: OutputPin,
{
    pub fn new(chip: P9415<I2C>, con: CON, en: EN, sleep: SLEEP) -> Self {
        Self {
            chip,
            con,
            en,
            sleep,
            enabled: true,
            asleep: false,
            fw_updating: false,
            trx_on: false,
            last_cep_count: None,
        }
    }

    fn docked(&mut self) -> Result<bool> {
        self.con.is_high().map_err(|_| Error::Bus)
    }

    /// Chip registers are only reachable while docked or transmitting
    fn powered(&mut self) -> Result<()> {
        if self.trx_on || self.docked()? {
            Ok(())
        } else {
            Err(Error::NoDevice)
        }
    }

    fn read_cep_change(&mut self) -> Result<i32> {
        let count = self.chip.get_cep_count()?;
        if self.last_cep_count == Some(count) {
            return Err(Error::NoData);
        }
        self.last_cep_count = Some(count);
        Ok(self.chip.get_cep_value()? as i32)
    }
}

impl<I2C, CON, EN, SLEEP> RxChip for P9415Rx<I2C, CON, EN, SLEEP>
where
    I2C: I2c,
    CON: InputPin,
    EN: OutputPin,
    SLEEP: OutputPin,
{
    fn get_prop(&mut self, prop: RxProp) -> Result<i32> {
        match prop {
            RxProp::ChipCon => return Ok(self.docked()? as i32),
            RxProp::ChipEn => return Ok(self.enabled as i32),
            RxProp::ChipSleep => return Ok(self.asleep as i32),
            RxProp::FwUpdating => return Ok(self.fw_updating as i32),
            RxProp::Fod => return Err(Error::Invalid),
            _ => {}
        }

        self.powered()?;
        let val = match prop {
            RxProp::Vout => self.chip.get_vout()? as i32,
            RxProp::VoutSet => self.chip.get_vout_setpoint()? as i32,
            RxProp::Vrect => self.chip.get_vrect()? as i32,
            RxProp::Iout => self.chip.get_iout()? as i32,
            RxProp::Cep => self.read_cep_change()?,
            RxProp::CepLatest => self.chip.get_cep_value()? as i32,
            RxProp::WorkFreq => self.chip.get_freq()? as i32,
            RxProp::RunMode => u8::from(RxRunMode::from(self.chip.get_run_mode()?)) as i32,
            RxProp::TrxEnable => self.chip.is_trx_enabled()? as i32,
            RxProp::TrxStatus => self.chip.get_trx_status()?.bits() as i32,
            RxProp::TrxErr => self.chip.get_trx_err()?.bits() as i32,
            RxProp::TrxVol => self.chip.get_trx_vol()? as i32,
            RxProp::TrxCurr => self.chip.get_trx_curr()? as i32,
            _ => return Err(Error::Invalid),
        };
        Ok(val)
    }

    fn set_prop(&mut self, prop: RxProp, val: i32) -> Result<()> {
        match prop {
            RxProp::ChipEn => {
                if val != 0 {
                    self.en.set_low().map_err(|_| Error::Bus)?;
                } else {
                    self.en.set_high().map_err(|_| Error::Bus)?;
                }
                self.enabled = val != 0;
                Ok(())
            }
            RxProp::ChipSleep => {
                if val != 0 {
                    self.sleep.set_high().map_err(|_| Error::Bus)?;
                } else {
                    self.sleep.set_low().map_err(|_| Error::Bus)?;
                }
                self.asleep = val != 0;
                Ok(())
            }
            RxProp::FwUpdating => {
                self.fw_updating = val != 0;
                Ok(())
            }
            RxProp::Vout => {
                let mv = u16::try_from(val).map_err(|_| Error::Invalid)?;
                self.powered()?;
                self.chip.set_vout(mv.min(VOUT_MAX_MV))?;
                Ok(())
            }
            RxProp::TrxEnable => {
                self.chip.set_trx_enabled(val != 0)?;
                self.trx_on = val != 0;
                Ok(())
            }
            _ => Err(Error::Invalid),
        }
    }

    fn set_prop_bytes(&mut self, prop: RxProp, data: &[u8]) -> Result<()> {
        match prop {
            RxProp::Fod => {
                self.powered()?;
                self.chip.write_fod(data)?;
                Ok(())
            }
            _ => Err(Error::Invalid),
        }
    }

    fn send_msg(&mut self, header: u8, payload: &[u8]) -> Result<()> {
        self.powered()?;
        self.chip.send_prop_packet(header, payload)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.last_cep_count = None;
        self.powered()?;
        self.chip.soft_reset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeBus, MockPin};
    use drivers::p9415::P9415_ADDRESS;

    fn rx(docked: bool) -> P9415Rx<FakeBus, MockPin, MockPin, MockPin> {
        let mut bus = FakeBus::new();
        bus.add_device(P9415_ADDRESS, true);
        // vout 5000 mV, cep count 1 / value -3, run mode EPP
        bus.set(P9415_ADDRESS, 0x3C, &[0x88, 0x13]);
        bus.set(P9415_ADDRESS, 0x30, &[1]);
        bus.set(P9415_ADDRESS, 0x33, &[(-3i8) as u8]);
        bus.set(P9415_ADDRESS, 0x88, &[0x04]);
        P9415Rx::new(
            P9415::new(bus, P9415_ADDRESS),
            MockPin::new(docked),
            MockPin::new(false),
            MockPin::new(false),
        )
    }

    #[test]
    fn test_undocked_is_no_device() {
        let mut rx = rx(false);
        assert_eq!(rx.get_prop(RxProp::Vout), Err(Error::NoDevice));
        assert_eq!(rx.set_prop(RxProp::Vout, 6000), Err(Error::NoDevice));
        assert_eq!(rx.get_prop(RxProp::ChipCon), Ok(0));
    }

    #[test]
    fn test_docked_reads() {
        let mut rx = rx(true);
        assert_eq!(rx.get_prop(RxProp::Vout), Ok(5000));
        assert_eq!(rx.run_mode(), Ok(RxRunMode::Epp));
        assert_eq!(rx.get_prop(RxProp::ChipCon), Ok(1));
    }

    #[test]
    fn test_cep_change_detection() {
        let mut rx = rx(true);
        assert_eq!(rx.get_prop(RxProp::Cep), Ok(-3));
        assert_eq!(rx.get_prop(RxProp::Cep), Err(Error::NoData));
        assert_eq!(rx.get_prop(RxProp::CepLatest), Ok(-3));
    }

    #[test]
    fn test_vout_clamp_and_negative() {
        let mut rx = rx(true);
        assert!(rx.set_prop(RxProp::Vout, 25_000).is_ok());
        assert_eq!(rx.get_prop(RxProp::VoutSet), Ok(20_000));
        assert_eq!(rx.set_prop(RxProp::Vout, -1), Err(Error::Invalid));
    }

    #[test]
    fn test_control_lines() {
        let mut rx = rx(false);
        assert!(rx.set_prop(RxProp::ChipSleep, 1).is_ok());
        assert_eq!(rx.get_prop(RxProp::ChipSleep), Ok(1));
        assert!(rx.sleep.high);
        assert!(rx.set_prop(RxProp::ChipEn, 0).is_ok());
        assert!(rx.en.high);
        assert_eq!(rx.get_prop(RxProp::ChipEn), Ok(0));
    }

    #[test]
    fn test_fod_is_write_only() {
        let mut rx = rx(true);
        assert_eq!(rx.get_prop(RxProp::Fod), Err(Error::Invalid));
        assert_eq!(rx.set_prop_bytes(RxProp::Fod, &[1, 2, 3, 4]), Err(Error::Invalid));
        assert!(rx.set_prop_bytes(RxProp::Fod, &[0x96; 16]).is_ok());
    }
}
