//! Reverse charging: the phone powers another device through the receiver
//! coil. Runs only while no dock session is online.

use drivers::p9415::{TrxErr, TrxStatus};
use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

use crate::charger::MainCharger;
use crate::error::{Error, Result};
use crate::policy::{Platform, Wlchg};
use crate::rx::{RxChip, RxProp};

/// Longest wait for a device to answer the ping
pub const TX_PING_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll period while power is transferred
pub const TX_TRANSFER_POLL: Duration = Duration::from_secs(5);

pub const TX_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Off,
    Ready,
    PingDevice,
    Transfer,
}

/// Reverse charging progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSession {
    pub state: TxState,
    /// Entry time of the current state
    since: Option<Instant>,
}

impl Default for TxSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TxSession {
    pub const fn new() -> Self {
        Self {
            state: TxState::Off,
            since: None,
        }
    }

    fn enter(&mut self, state: TxState, now: Instant) {
        self.state = state;
        self.since = Some(now);
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.since.map_or(Duration::from_ticks(0), |at| now - at)
    }
}

/// Errors that stop reverse charging; over current and CEP timeouts are
/// only logged
fn is_fatal(err: TrxErr) -> bool {
    !err.difference(TrxErr::OCP | TrxErr::CEP_TIMEOUT).is_empty()
}

impl<P: Platform> Wlchg<'_, P> {
    pub fn tx_state(&self) -> TxState {
        self.tx.state
    }

    /// Starts or stops reverse charging
    pub fn enable_tx(&mut self, enable: bool) -> Result<()> {
        if !enable {
            self.disable_tx();
            return Ok(());
        }
        if self.session.charge_online {
            warn!("reverse charge refused, dock session online");
            return Err(Error::Busy);
        }
        if self.session.tx_online {
            return Ok(());
        }

        self.ctx.charger.set_otg(true)?;
        if let Err(e) = self.ctx.rx.set_prop(RxProp::TrxEnable, 1) {
            warn!("reverse charge enable failed: {e}");
            if let Err(e) = self.ctx.charger.set_otg(false) {
                warn!("otg disable failed: {e}");
            }
            return Err(e);
        }
        info!("reverse charge on");
        self.session.tx_online = true;
        self.tx = TxSession::new();
        self.tx.state = TxState::Ready;
        self.publish();
        Ok(())
    }

    pub fn disable_tx(&mut self) {
        if !self.session.tx_online && self.tx.state == TxState::Off {
            return;
        }
        if let Err(e) = self.ctx.rx.set_prop(RxProp::TrxEnable, 0) {
            warn!("reverse charge disable failed: {e}");
        }
        if let Err(e) = self.ctx.charger.set_otg(false) {
            warn!("otg disable failed: {e}");
        }
        info!("reverse charge off");
        self.tx = TxSession::new();
        self.session.tx_online = false;
        self.session.tx_present = false;
        self.publish();
    }

    /// Reverse charging monitor. Returns the delay until the next call.
    pub fn tx_tick(&mut self, now: Instant) -> Duration {
        if !self.session.tx_online {
            return TX_POLL;
        }

        let err = match self.ctx.rx.get_prop(RxProp::TrxErr) {
            Ok(v) => TrxErr::from_bits_truncate(v as u8),
            Err(e) => {
                warn!("trx error read failed: {e}");
                return TX_POLL;
            }
        };
        if is_fatal(err) {
            warn!("reverse charge fault {err:?}");
            self.disable_tx();
            return TX_POLL;
        }
        if !err.is_empty() {
            warn!("reverse charge {err:?}, continuing");
        }

        let status = match self.ctx.rx.get_prop(RxProp::TrxStatus) {
            Ok(v) => TrxStatus::from_bits_truncate(v as u8),
            Err(e) => {
                warn!("trx status read failed: {e}");
                return TX_POLL;
            }
        };

        match self.tx.state {
            TxState::Off => TX_POLL,
            TxState::Ready => {
                if status.intersects(TrxStatus::READY | TrxStatus::DIGITAL_PING) {
                    debug!("reverse charge pinging");
                    self.tx.enter(TxState::PingDevice, now);
                }
                TX_POLL
            }
            TxState::PingDevice => {
                if status.contains(TrxStatus::TRANSFER) {
                    info!("reverse charge device found");
                    self.tx.enter(TxState::Transfer, now);
                    self.session.tx_present = true;
                    self.publish();
                    TX_TRANSFER_POLL
                } else if self.tx.elapsed(now) >= TX_PING_TIMEOUT {
                    warn!("no device on the coil");
                    self.disable_tx();
                    TX_POLL
                } else {
                    TX_POLL
                }
            }
            TxState::Transfer => {
                if !status.contains(TrxStatus::TRANSFER) {
                    info!("reverse charge device removed");
                    self.tx.enter(TxState::PingDevice, now);
                    self.session.tx_present = false;
                    self.publish();
                    return TX_POLL;
                }
                let vol = self.ctx.rx.get_prop(RxProp::TrxVol).unwrap_or(0);
                let curr = self.ctx.rx.get_prop(RxProp::TrxCurr).unwrap_or(0);
                debug!("reverse charge {vol} mV {curr} mA");
                TX_TRANSFER_POLL
            }
        }
    }
}
