//! Charge pump fast charge bring-up and fault handling

use drivers::bq2597x::AdcChannel;
use embassy_time::{Duration, Instant};
use log::{error, info, warn};

use crate::chargepump::{ChargePump, cp1_startup};
use crate::charger::{ChargerVoter, MainCharger};
use crate::policy::{Platform, Wlchg};
use crate::session::{ChargeStatus, FastchgStartupStep};
use crate::votable::{CurrVoter, FastchgVoter};

/// CP1 faults before fast charge is given up for the session
pub const CP1_ERR_LIMIT: u32 = 10;

/// CP2 enable attempts before fast charge is given up for the session
pub const CP2_RETRY_LIMIT: u32 = 10;

/// Regulation ticks to wait for the charger input to reach the CP2 window
pub const PMIC_WAIT_TICKS: u32 = 50;

/// Cooldown before a startup CEP timeout is retried
pub const STARTUP_CEP_COOLDOWN: Duration = Duration::from_secs(5 * 60);

pub const STARTUP_CEP_RETRY_MAX: u32 = 10;

/// CP2 input window: twice the battery voltage, +-10%
pub fn cp2_window(vbat_mv: u32) -> (u32, u32) {
    let mid = vbat_mv * 2;
    (mid - mid / 10, mid + mid / 10)
}

/// Receiver voltage to start fast charge from: both pumps halve it
pub fn cp_entry_voltage(vbat_mv: u32, offset_mv: u32, min_mv: u32, max_mv: u32) -> u32 {
    (vbat_mv * 4 + offset_mv).clamp(min_mv, max_mv)
}

impl<P: Platform> Wlchg<'_, P> {
    /// Dock agreed to fast charge; raise the receiver voltage and start the
    /// pump sequence
    pub(crate) fn start_fastchg(&mut self, _now: Instant) {
        let vol = cp_entry_voltage(
            self.session.telemetry.batt_vol_mv,
            self.param.cp_vol_offset_mv,
            self.param.vout_min_fastchg_mv,
            self.param.vout_max_mv,
        );
        info!("dock in fast charge, rx target {vol} mV");
        let s = &mut self.session;
        s.fastchg_startup_step = FastchgStartupStep::EnChgpump1;
        s.cp2_retry_count = 0;
        s.pmic_wait_ticks = 0;
        s.vol_not_settled_ticks = 0;
        self.set_rx_target_voltage(vol);
        self.set_status(ChargeStatus::IncreaseVoltage);
    }

    fn set_step(&mut self, step: FastchgStartupStep) {
        info!("fast charge startup {} -> {step}", self.session.fastchg_startup_step);
        self.session.fastchg_startup_step = step;
    }

    /// Advances the bring-up by at most one step; runs once the receiver
    /// voltage settled
    pub(crate) fn fastchg_startup_process(&mut self, now: Instant) {
        match self.session.fastchg_startup_step {
            FastchgStartupStep::EnChgpump1 => {
                let ctx = &mut self.ctx;
                match cp1_startup(&mut ctx.cp1, &mut ctx.rx, &mut ctx.delay) {
                    Ok(true) => {
                        self.cp1_wdt.arm(now);
                        self.set_step(FastchgStartupStep::WaitCp1Stable);
                    }
                    Ok(false) => self.cp1_fault(),
                    Err(e) => warn!("cp1 startup: {e}"),
                }
            }
            FastchgStartupStep::WaitCp1Stable => match self.ctx.cp1.status() {
                Ok(st) if st.is_healthy() => self.set_step(FastchgStartupStep::SetChgpump2Vol),
                Ok(_) => {}
                Err(e) => warn!("cp1 status read failed: {e}"),
            },
            FastchgStartupStep::SetChgpump2Vol => {
                self.ctx.charger.vote_suspend(ChargerVoter::Fastchg, true);
                self.adjust_cp2_voltage();
                self.session.pmic_wait_ticks = 0;
                self.set_step(FastchgStartupStep::WaitPmicStable);
            }
            FastchgStartupStep::WaitPmicStable => {
                let (lo, hi) = cp2_window(self.session.telemetry.batt_vol_mv);
                match self.ctx.charger.input_voltage_mv() {
                    Ok(mv) if (lo..=hi).contains(&mv) => {
                        self.set_step(FastchgStartupStep::SetChgpump2VolAgain)
                    }
                    Ok(mv) => {
                        self.session.pmic_wait_ticks += 1;
                        if self.session.pmic_wait_ticks >= PMIC_WAIT_TICKS {
                            self.cp2_retry("charger input out of window");
                        } else {
                            info!("charger input {mv} mV outside {lo}..{hi}");
                            self.adjust_cp2_voltage();
                        }
                    }
                    Err(e) => warn!("charger input read failed: {e}"),
                }
            }
            FastchgStartupStep::SetChgpump2VolAgain => {
                self.adjust_cp2_voltage();
                self.set_step(FastchgStartupStep::EnChgpump2);
            }
            FastchgStartupStep::EnChgpump2 => {
                let cp2 = &mut self.ctx.cp2;
                match cp2.hw_init().and_then(|_| cp2.enable()) {
                    Ok(()) => self.set_step(FastchgStartupStep::CheckChgpump2),
                    Err(e) => {
                        warn!("cp2 enable failed: {e}");
                        self.cp2_retry("cp2 enable failed");
                    }
                }
            }
            FastchgStartupStep::CheckChgpump2 => match self.ctx.cp2.is_enabled() {
                Ok(true) => self.set_step(FastchgStartupStep::CheckChgpump2Again),
                Ok(false) => self.cp2_retry("cp2 not enabled"),
                Err(e) => {
                    warn!("cp2 readback failed: {e}");
                    self.cp2_retry("cp2 readback failed");
                }
            },
            FastchgStartupStep::CheckChgpump2Again => {
                let enabled = matches!(self.ctx.cp2.is_enabled(), Ok(true));
                let healthy = matches!(self.ctx.cp2.status(), Ok(st) if !st.has_fault());
                if enabled && healthy {
                    self.set_step(FastchgStartupStep::EnPmicChg);
                } else {
                    self.cp2_retry("cp2 dropped out");
                }
            }
            FastchgStartupStep::EnPmicChg => self.enable_pmic_charge(),
        }
    }

    fn enable_pmic_charge(&mut self) {
        self.ctx.charger.vote_suspend(ChargerVoter::Fastchg, false);
        let cap = self.param.limit(self.session.temp_region).fastchg_curr_max_ua;
        let level = self.param.ffc_step[self.session.fastchg_level].curr_ua;
        self.wlcs_fcc.vote(CurrVoter::BattTemp, Some(cap));
        self.wlcs_fcc.vote(CurrVoter::FfcLevel, Some(level));

        let s = &mut self.session;
        s.fastchg_started = true;
        s.curr_limit_mode = true;
        s.cp1_err_count = 0;
        s.cp2_retry_count = 0;
        s.curr_err_count = 0;
        s.target_curr = self.wlcs_fcc.effective().unwrap_or(cap);
        info!("charge pumps up, target current {} uA", s.target_curr);
        self.set_status(ChargeStatus::FastChargingFromChgpump);
    }

    /// Moves the receiver target so the CP1 output lands at twice the
    /// battery voltage
    fn adjust_cp2_voltage(&mut self) {
        let vbat = self.session.telemetry.batt_vol_mv;
        let (lo, hi) = cp2_window(vbat);
        let cp1_vout = match self.ctx.cp1.read_adc(AdcChannel::Vout) {
            Ok(mv) => mv,
            Err(e) => {
                warn!("cp1 vout read failed: {e}");
                return;
            }
        };
        if cp1_vout >= lo as i32 && cp1_vout <= hi as i32 {
            return;
        }
        let delta = (vbat as i32 * 2 - cp1_vout) * 2;
        let target = (self.session.target_vol as i32 + delta)
            .clamp(self.param.vout_min_fastchg_mv as i32, self.param.vout_max_mv as i32)
            as u32;
        info!("cp1 vout {cp1_vout} mV outside {lo}..{hi}, rx target {target} mV");
        self.set_rx_target_voltage(target);
    }

    fn cp2_retry(&mut self, reason: &str) {
        if let Err(e) = self.ctx.cp2.disable() {
            warn!("cp2 disable failed: {e}");
        }
        self.session.cp2_retry_count += 1;
        warn!("{reason} ({}/{CP2_RETRY_LIMIT})", self.session.cp2_retry_count);
        if self.session.cp2_retry_count >= CP2_RETRY_LIMIT {
            self.fastchg_hw_err();
        } else {
            self.session.pmic_wait_ticks = 0;
            self.set_step(FastchgStartupStep::SetChgpump2Vol);
        }
    }

    /// Checks CP1 once it is up. Returns false after a fault was handled.
    pub(crate) fn fastchg_err_check(&mut self) -> bool {
        let running = self.session.fastchg_startup_step > FastchgStartupStep::EnChgpump1
            || self.session.charge_status == ChargeStatus::FastChargingFromChgpump;
        if !running {
            return true;
        }
        match self.ctx.cp1.status() {
            Ok(st) if st.has_fault() => {
                warn!("cp1 fault, status {:#04x}", st.bits());
                self.cp1_fault();
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!("cp1 status read failed: {e}");
                true
            }
        }
    }

    /// Back to the first startup step with no current
    fn cp1_fault(&mut self) {
        self.session.cp1_err_count += 1;
        self.stop_chgpumps();
        let s = &mut self.session;
        s.fastchg_startup_step = FastchgStartupStep::EnChgpump1;
        s.charge_current = 0;
        s.target_curr = 0;
        s.curr_limit_mode = false;
        s.fastchg_started = false;
        warn!("cp1 error count {}/{CP1_ERR_LIMIT}", s.cp1_err_count);

        if self.session.cp1_err_count >= CP1_ERR_LIMIT {
            self.fastchg_hw_err();
        } else if self.session.charge_status == ChargeStatus::FastChargingFromChgpump {
            let vol = cp_entry_voltage(
                self.session.telemetry.batt_vol_mv,
                self.param.cp_vol_offset_mv,
                self.param.vout_min_fastchg_mv,
                self.param.vout_max_mv,
            );
            self.set_rx_target_voltage(vol);
            self.set_status(ChargeStatus::IncreaseVoltage);
        }
    }

    fn fastchg_hw_err(&mut self) {
        if !self.fastchg_disable.is_voted(FastchgVoter::HwErr) {
            error!("charge pump hardware error, fast charge disabled");
            self.fastchg_disable.set(FastchgVoter::HwErr, true);
        }
        self.set_status(ChargeStatus::FastChargingExit);
    }

    /// Voltage never settled during startup; retried after a cooldown
    pub(crate) fn startup_cep_timeout(&mut self, now: Instant) {
        let s = &mut self.session;
        s.vol_not_settled_ticks = 0;
        s.startup_cep_retries += 1;
        warn!(
            "rx voltage not settled during startup ({}/{STARTUP_CEP_RETRY_MAX})",
            s.startup_cep_retries
        );
        s.startup_cep_retry_at =
            (s.startup_cep_retries < STARTUP_CEP_RETRY_MAX).then(|| now + STARTUP_CEP_COOLDOWN);
        self.fastchg_disable.set(FastchgVoter::StartupCep, true);
        self.set_status(ChargeStatus::FastChargingExit);
    }

    fn stop_chgpumps(&mut self) {
        if let Err(e) = self.ctx.cp2.disable() {
            warn!("cp2 disable failed: {e}");
        }
        if let Err(e) = self.ctx.cp1.disable() {
            warn!("cp1 disable failed: {e}");
        }
        self.cp1_wdt.disarm();
    }

    /// Stops the pumps and forgets the fast charge progress
    pub(crate) fn fastchg_teardown(&mut self) {
        if self.cp_active() {
            info!("charge pumps off");
        }
        self.stop_chgpumps();
        self.ctx.charger.vote_suspend(ChargerVoter::Fastchg, false);
        self.wlcs_fcc.vote(CurrVoter::Skin, None);
        self.wlcs_fcc.vote(CurrVoter::Cep, None);
        let s = &mut self.session;
        s.fastchg_startup_step = FastchgStartupStep::EnChgpump1;
        s.fastchg_started = false;
        s.curr_limit_mode = false;
        s.curr_need_dec = false;
        s.cep_err_flag = false;
        s.cep_bad_count = 0;
        s.curr_err_count = 0;
        s.target_curr = 0;
        s.charge_current = 0;
        s.fastchg_curr_step = 0;
        s.fastchg_skin_changed_at = None;
    }
}
