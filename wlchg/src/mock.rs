//! Test doubles for the engine and its collaborators

use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use drivers::bq2597x::AdcChannel;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, InputPin, OutputPin};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::chargepump::{ChargePump, CpStatus};
use crate::charger::{Battery, ChargerVoter, MainCharger};
use crate::config::ChargeParam;
use crate::error::{Error, Result};
use crate::mailbox::WlchgDev;
use crate::policy::{Context, Platform, Wlchg};
use crate::rx::{RxChip, RxProp, RxRunMode};
use crate::status::SharedStatus;

struct Device {
    adr: u8,
    wide_address: bool,
    regs: Vec<u8>,
    writes: Vec<(u16, u8)>,
}

impl Device {
    fn split_address<'b>(&self, bytes: &'b [u8]) -> (u16, &'b [u8]) {
        if self.wide_address {
            (u16::from_be_bytes([bytes[0], bytes[1]]), &bytes[2..])
        } else {
            (bytes[0] as u16, &bytes[1..])
        }
    }
}

/// In-memory I2C bus holding several register files
#[derive(Default)]
pub struct FakeBus {
    devices: Vec<Device>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, adr: u8, wide_address: bool) {
        self.devices.push(Device {
            adr,
            wide_address,
            regs: vec![0; 0x400],
            writes: Vec::new(),
        });
    }

    pub fn set(&mut self, adr: u8, reg: u16, data: &[u8]) {
        if let Some(dev) = self.devices.iter_mut().find(|d| d.adr == adr) {
            let at = reg as usize;
            dev.regs[at..at + data.len()].copy_from_slice(data);
        }
    }

    /// Register writes seen by `adr`, oldest first
    pub fn writes(&self, adr: u8) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.devices
            .iter()
            .filter(move |d| d.adr == adr)
            .flat_map(|d| d.writes.iter().copied())
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
    ) -> core::result::Result<(), Self::Error> {
        let Some(dev) = self.devices.iter_mut().find(|d| d.adr == address) else {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        };
        let mut pointer = 0u16;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    let (reg, data) = dev.split_address(bytes);
                    let data = data.to_vec();
                    pointer = reg;
                    for (i, b) in data.iter().enumerate() {
                        let at = reg + i as u16;
                        dev.regs[at as usize] = *b;
                        dev.writes.push((at, *b));
                    }
                }
                Operation::Read(buf) => {
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = dev.regs[(pointer + i as u16) as usize];
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockPin {
    pub high: bool,
}

impl MockPin {
    pub fn new(high: bool) -> Self {
        Self { high }
    }
}

impl PinErrorType for MockPin {
    type Error = Infallible;
}

impl InputPin for MockPin {
    fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(self.high)
    }

    fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(!self.high)
    }
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        self.high = true;
        Ok(())
    }
}

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Receiver whose output follows the setpoint immediately
pub struct MockRx {
    pub present: bool,
    pub vout_mv: i32,
    /// `vout_mv` tracks every setpoint write
    pub follow_setpoint: bool,
    pub vout_set: i32,
    pub iout_ma: i32,
    pub vrect_mv: i32,
    pub freq_khz: i32,
    /// `None` reads as no new packet
    pub cep: Option<i32>,
    pub run_mode: RxRunMode,
    pub trx_enabled: bool,
    pub trx_status: i32,
    pub trx_err: i32,
    pub fw_updating: bool,
    pub asleep: bool,
    pub enabled: bool,
    pub sent: Vec<(u8, Vec<u8>)>,
    pub fod: Vec<u8>,
    pub vout_writes: Vec<i32>,
}

impl MockRx {
    pub fn new() -> Self {
        Self {
            present: true,
            vout_mv: 5_000,
            follow_setpoint: true,
            vout_set: 5_000,
            iout_ma: 500,
            vrect_mv: 5_200,
            freq_khz: 140,
            cep: Some(0),
            run_mode: RxRunMode::Bpp,
            trx_enabled: false,
            trx_status: 0,
            trx_err: 0,
            fw_updating: false,
            asleep: false,
            enabled: true,
            sent: Vec::new(),
            fod: Vec::new(),
            vout_writes: Vec::new(),
        }
    }

    /// Dock command bytes sent so far
    pub fn sent_cmds(&self) -> impl Iterator<Item = u8> + '_ {
        self.sent.iter().filter_map(|(_, p)| p.first().copied())
    }
}

impl RxChip for MockRx {
    fn get_prop(&mut self, prop: RxProp) -> Result<i32> {
        match prop {
            RxProp::FwUpdating => return Ok(self.fw_updating as i32),
            RxProp::ChipSleep => return Ok(self.asleep as i32),
            RxProp::ChipEn => return Ok(self.enabled as i32),
            RxProp::ChipCon => return Ok(self.present as i32),
            _ => {}
        }
        if !self.present && !self.trx_enabled {
            return Err(Error::NoDevice);
        }
        match prop {
            RxProp::Vout => Ok(self.vout_mv),
            RxProp::VoutSet => Ok(self.vout_set),
            RxProp::Vrect => Ok(self.vrect_mv),
            RxProp::Iout => Ok(self.iout_ma),
            RxProp::Cep => self.cep.ok_or(Error::NoData),
            RxProp::CepLatest => Ok(self.cep.unwrap_or(0)),
            RxProp::WorkFreq => Ok(self.freq_khz),
            RxProp::RunMode => Ok(u8::from(self.run_mode) as i32),
            RxProp::TrxEnable => Ok(self.trx_enabled as i32),
            RxProp::TrxStatus => Ok(self.trx_status),
            RxProp::TrxErr => Ok(self.trx_err),
            RxProp::TrxVol => Ok(5_000),
            RxProp::TrxCurr => Ok(300),
            _ => Err(Error::Invalid),
        }
    }

    fn set_prop(&mut self, prop: RxProp, val: i32) -> Result<()> {
        match prop {
            RxProp::ChipSleep => self.asleep = val != 0,
            RxProp::ChipEn => self.enabled = val != 0,
            RxProp::FwUpdating => self.fw_updating = val != 0,
            RxProp::TrxEnable => self.trx_enabled = val != 0,
            RxProp::Vout => {
                if !self.present {
                    return Err(Error::NoDevice);
                }
                self.vout_set = val;
                self.vout_writes.push(val);
                if self.follow_setpoint {
                    self.vout_mv = val;
                }
            }
            _ => return Err(Error::Invalid),
        }
        Ok(())
    }

    fn set_prop_bytes(&mut self, prop: RxProp, data: &[u8]) -> Result<()> {
        match prop {
            RxProp::Fod => {
                self.fod = data.to_vec();
                Ok(())
            }
            _ => Err(Error::Invalid),
        }
    }

    fn send_msg(&mut self, header: u8, payload: &[u8]) -> Result<()> {
        if !self.present {
            return Err(Error::NoDevice);
        }
        self.sent.push((header, payload.to_vec()));
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct MockCp {
    pub enabled: bool,
    pub status: CpStatus,
    pub vout_mv: i32,
    pub fed: u32,
    pub enables: u32,
    /// Enable requests are ignored
    pub stuck: bool,
}

impl MockCp {
    pub fn new() -> Self {
        Self {
            enabled: false,
            status: CpStatus::READY,
            vout_mv: 7_600,
            fed: 0,
            enables: 0,
            stuck: false,
        }
    }
}

impl ChargePump for MockCp {
    fn enable(&mut self) -> Result<()> {
        self.enables += 1;
        if !self.stuck {
            self.enabled = true;
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&mut self) -> Result<bool> {
        Ok(self.enabled)
    }

    fn status(&mut self) -> Result<CpStatus> {
        Ok(self.status)
    }

    fn read_adc(&mut self, channel: AdcChannel) -> Result<i32> {
        match channel {
            AdcChannel::Vout => Ok(self.vout_mv),
            AdcChannel::Vbus => Ok(self.vout_mv * 2),
            _ => Err(Error::Invalid),
        }
    }

    fn feed_watchdog(&mut self) -> Result<()> {
        self.fed += 1;
        Ok(())
    }
}

/// Records the votes per voter
pub struct MockCharger {
    pub fcc: [Option<u32>; 6],
    pub fv: [Option<u32>; 6],
    pub icl: [Option<u32>; 6],
    pub suspend: [bool; 6],
    pub input_mv: u32,
    pub otg: bool,
}

impl MockCharger {
    pub fn new() -> Self {
        Self {
            fcc: [None; 6],
            fv: [None; 6],
            icl: [None; 6],
            suspend: [false; 6],
            input_mv: 7_600,
            otg: false,
        }
    }

    pub fn fcc(&self, voter: ChargerVoter) -> Option<u32> {
        self.fcc[voter as usize]
    }

    pub fn fv(&self, voter: ChargerVoter) -> Option<u32> {
        self.fv[voter as usize]
    }

    pub fn icl(&self, voter: ChargerVoter) -> Option<u32> {
        self.icl[voter as usize]
    }

    pub fn suspended(&self) -> bool {
        self.suspend.iter().any(|s| *s)
    }
}

impl MainCharger for MockCharger {
    fn vote_fcc(&mut self, voter: ChargerVoter, ua: Option<u32>) {
        self.fcc[voter as usize] = ua;
    }

    fn vote_fv(&mut self, voter: ChargerVoter, mv: Option<u32>) {
        self.fv[voter as usize] = mv;
    }

    fn vote_icl(&mut self, voter: ChargerVoter, ua: Option<u32>) {
        self.icl[voter as usize] = ua;
    }

    fn vote_suspend(&mut self, voter: ChargerVoter, suspend: bool) {
        self.suspend[voter as usize] = suspend;
    }

    fn input_voltage_mv(&mut self) -> Result<u32> {
        Ok(self.input_mv)
    }

    fn input_current_ua(&mut self) -> Result<u32> {
        Ok(500_000)
    }

    fn set_otg(&mut self, enable: bool) -> Result<()> {
        self.otg = enable;
        Ok(())
    }
}

pub struct MockBattery {
    pub temp: i32,
    pub vbat_mv: u32,
    pub ibat_ua: i32,
    pub soc: u32,
    pub skin: i32,
    pub present: bool,
    pub full: bool,
}

impl MockBattery {
    pub fn new() -> Self {
        Self {
            temp: 250,
            vbat_mv: 3_800,
            ibat_ua: 1_000_000,
            soc: 50,
            skin: 300,
            present: true,
            full: false,
        }
    }
}

impl Battery for MockBattery {
    fn temperature(&mut self) -> Result<i32> {
        Ok(self.temp)
    }

    fn voltage_mv(&mut self) -> Result<u32> {
        Ok(self.vbat_mv)
    }

    fn current_ua(&mut self) -> Result<i32> {
        Ok(self.ibat_ua)
    }

    fn soc(&mut self) -> Result<u32> {
        Ok(self.soc)
    }

    fn skin_temperature(&mut self) -> Result<i32> {
        Ok(self.skin)
    }

    fn is_present(&mut self) -> bool {
        self.present
    }

    fn is_full(&mut self) -> bool {
        self.full
    }
}

pub struct MockPlatform;

impl Platform for MockPlatform {
    type Rx = MockRx;
    type Cp1 = MockCp;
    type Cp2 = MockCp;
    type Charger = MockCharger;
    type Battery = MockBattery;
    type Delay = NoDelay;
}

pub fn context() -> Context<MockPlatform> {
    Context {
        rx: MockRx::new(),
        cp1: MockCp::new(),
        cp2: MockCp::new(),
        charger: MockCharger::new(),
        battery: MockBattery::new(),
        delay: NoDelay,
    }
}

pub fn engine<'a>(dev: &'a WlchgDev, status: &'a SharedStatus) -> Wlchg<'a, MockPlatform> {
    Wlchg::new(context(), ChargeParam::default(), dev, status)
}
