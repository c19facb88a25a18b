//! Charge pumps
//!
//! CP1 (OP20A) steps the receiver output down to twice the battery voltage,
//! CP2 (BQ2597x) halves it again into the battery. Both are driven through
//! [`ChargePump`] so the startup sequencer does not care which part sits
//! where.

use drivers::bq2597x::{AdcChannel, Bq2597x, ConverterStatus, FaultStatus};
use drivers::op20a::Op20a;
use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{info, warn};

use crate::error::{Error, Result};
use crate::rx::{RxChip, RxProp};

/// Status bits common to both pumps
pub use drivers::op20a::Op20aStatus as CpStatus;

/// Enable attempts before CP1 bring-up gives up
pub const CP1_STARTUP_RETRIES: u32 = 40;

/// Receiver output required before CP1 may switch
pub const CP1_VOUT_FLOOR_MV: i32 = 1_000;

/// Fault checks after enabling CP1, each after the given settle time
const CP1_CHECK_DELAYS_MS: [u32; 3] = [10, 20, 50];

const CP1_VOUT_POLL_MS: u32 = 10;

/// CP1 disables itself unless fed within this interval
pub const CP1_WDT_FEED_INTERVAL: Duration = Duration::from_secs(100);

pub trait ChargePump {
    /// Writes the part configuration; runs before every enable
    fn hw_init(&mut self) -> Result<()> {
        Ok(())
    }

    fn enable(&mut self) -> Result<()>;

    fn disable(&mut self) -> Result<()>;

    fn is_enabled(&mut self) -> Result<bool>;

    fn status(&mut self) -> Result<CpStatus>;

    fn read_adc(&mut self, channel: AdcChannel) -> Result<i32>;

    fn feed_watchdog(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<I2C> ChargePump for Op20a<I2C>
where
    I2C: I2c,
{
    fn hw_init(&mut self) -> Result<()> {
        Ok(Op20a::hw_init(self)?)
    }

    fn enable(&mut self) -> Result<()> {
        Ok(Op20a::enable(self)?)
    }

    fn disable(&mut self) -> Result<()> {
        Ok(Op20a::disable(self)?)
    }

    fn is_enabled(&mut self) -> Result<bool> {
        Ok(Op20a::is_enabled(self)?)
    }

    fn status(&mut self) -> Result<CpStatus> {
        Ok(self.get_status()?)
    }

    fn read_adc(&mut self, channel: AdcChannel) -> Result<i32> {
        match channel {
            AdcChannel::Vout => Ok(self.get_vout_voltage()? as i32),
            AdcChannel::Vbus => Ok(self.get_vbus_voltage()? as i32),
            _ => Err(Error::Invalid),
        }
    }

    fn feed_watchdog(&mut self) -> Result<()> {
        Ok(Op20a::feed_watchdog(self)?)
    }
}

/// Folds the BQ2597x fault and converter flags into the common layout
fn bq2597x_status(fault: FaultStatus, conv: ConverterStatus) -> CpStatus {
    let mut st = CpStatus::empty();
    st.set(CpStatus::READY, conv.contains(ConverterStatus::VOUT_OK));
    st.set(CpStatus::DWP, conv.contains(ConverterStatus::WD_TIMEOUT));
    st.set(
        CpStatus::OTP,
        fault.intersects(FaultStatus::TDIE | FaultStatus::TSBUS | FaultStatus::TSBAT),
    );
    st.set(
        CpStatus::SWITCH_OCP,
        fault.intersects(FaultStatus::BUS_OCP | FaultStatus::BAT_OCP)
            || conv.contains(ConverterStatus::CONV_OCP),
    );
    st.set(CpStatus::VOUT_OVP, fault.contains(FaultStatus::BAT_OVP));
    st.set(CpStatus::VBUS_OVP, fault.contains(FaultStatus::BUS_OVP));
    st
}

impl<I2C> ChargePump for Bq2597x<I2C>
where
    I2C: I2c,
{
    fn hw_init(&mut self) -> Result<()> {
        Ok(self.init()?)
    }

    fn enable(&mut self) -> Result<()> {
        Ok(self.enable_charge()?)
    }

    fn disable(&mut self) -> Result<()> {
        Ok(self.disable_charge()?)
    }

    fn is_enabled(&mut self) -> Result<bool> {
        Ok(self.is_charge_enabled()?)
    }

    fn status(&mut self) -> Result<CpStatus> {
        let fault = self.get_fault_status()?;
        let conv = self.get_converter_status()?;
        Ok(bq2597x_status(fault, conv))
    }

    fn read_adc(&mut self, channel: AdcChannel) -> Result<i32> {
        Ok(Bq2597x::read_adc(self, channel)?)
    }
}

/// Brings CP1 up.
///
/// Waits for the receiver output to pass [`CP1_VOUT_FLOOR_MV`], enables the
/// pump and checks its status after each settle window. Any fault disables
/// the pump and starts over. Returns `Ok(false)` once
/// [`CP1_STARTUP_RETRIES`] attempts are used up.
pub fn cp1_startup<C, R, D>(cp: &mut C, rx: &mut R, delay: &mut D) -> Result<bool>
where
    C: ChargePump,
    R: RxChip,
    D: DelayNs,
{
    for attempt in 1..=CP1_STARTUP_RETRIES {
        let vout = rx.get_prop(RxProp::Vout)?;
        if vout <= CP1_VOUT_FLOOR_MV {
            delay.delay_ms(CP1_VOUT_POLL_MS);
            continue;
        }

        cp.hw_init()?;
        cp.enable()?;

        let mut status = CpStatus::empty();
        for ms in CP1_CHECK_DELAYS_MS {
            delay.delay_ms(ms);
            status = cp.status()?;
            if status.has_fault() {
                break;
            }
        }
        if status.is_healthy() {
            info!("cp1 up after {attempt} attempt(s)");
            return Ok(true);
        }

        warn!("cp1 start attempt {attempt} failed, status {:#04x}", status.bits());
        cp.disable()?;
    }

    warn!("cp1 did not start after {CP1_STARTUP_RETRIES} attempts");
    Ok(false)
}

/// Feed schedule of the CP1 watchdog, armed while CP1 is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpWatchdog {
    next_feed: Option<Instant>,
}

impl CpWatchdog {
    pub const fn new() -> Self {
        Self { next_feed: None }
    }

    pub fn arm(&mut self, now: Instant) {
        self.next_feed = Some(now + CP1_WDT_FEED_INTERVAL);
    }

    pub fn disarm(&mut self) {
        self.next_feed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_feed.is_some()
    }

    /// Feeds the pump when due. Returns the time until the next feed, or
    /// `None` while disarmed.
    pub fn poll<C: ChargePump>(&mut self, cp: &mut C, now: Instant) -> Result<Option<Duration>> {
        let Some(due) = self.next_feed else {
            return Ok(None);
        };
        if now >= due {
            cp.feed_watchdog()?;
            let next = now + CP1_WDT_FEED_INTERVAL;
            self.next_feed = Some(next);
            return Ok(Some(next - now));
        }
        Ok(Some(due - now))
    }
}
