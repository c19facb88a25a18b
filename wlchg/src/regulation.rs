//! Receiver output voltage and current regulation
//!
//! Two modes drive the commanded receiver voltage and never both in one
//! tick: the voltage ramp walks `vol_set` towards `target_vol` and waits for
//! the dock to settle, the current loop nudges the voltage so the output
//! current tracks `target_curr` during charge pump fast charge.

use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

use crate::error::Error;
use crate::policy::{Platform, Wlchg};
use crate::rx::{RxChip, RxProp};
use crate::session::ChargeStatus;
use crate::votable::CurrVoter;

/// Period while ramping or bringing the pumps up
pub const RAMP_PERIOD: Duration = Duration::from_millis(100);

/// Period once settled or current limiting
pub const STEADY_PERIOD: Duration = Duration::from_millis(500);

/// Largest CEP magnitude that counts as stable
pub const CEP_STABLE_MAX: i32 = 2;

/// Consecutive stable CEP reads before the voltage counts as settled
const CEP_SETTLE_COUNT: u32 = 2;

/// Ramp ticks during pump startup without a settled voltage
pub const VOL_SETTLE_TIMEOUT_TICKS: u32 = 300;

const CEP_BAD_LIMIT: u32 = 3;
const CURR_ERR_LIMIT: u32 = 5;

/// Fixed allowance kept below the battery current limit
const IBAT_MARGIN_UA: i64 = 50_000;

/// Next commanded voltage when ramping from `vol_set` to `target`
pub fn ramp_step(vol_set: u32, target: u32, inc_max: u32, dec_max: u32) -> u32 {
    if target > vol_set {
        vol_set + (target - vol_set).min(inc_max)
    } else {
        vol_set - (vol_set - target).min(dec_max)
    }
}

/// Voltage correction for a current error of `err_ua`
pub fn curr_adjust_step(err_ua: u32) -> u32 {
    match err_ua {
        e if e > 500_000 => 200,
        e if e > 200_000 => 100,
        e if e > 50_000 => 20,
        _ => 0,
    }
}

impl<P: Platform> Wlchg<'_, P> {
    /// Regulation entry point. Returns the delay until the next call.
    pub fn regulation_tick(&mut self, now: Instant) -> Duration {
        if !self.session.charge_online {
            return STEADY_PERIOD;
        }

        match self.session.charge_status {
            ChargeStatus::IncreaseVoltage => {
                if !self.fastchg_err_check() {
                    return RAMP_PERIOD;
                }
                self.voltage_ramp();
                if self.session.vol_set_ok {
                    self.session.vol_not_settled_ticks = 0;
                    self.fastchg_startup_process(now);
                } else {
                    self.session.vol_not_settled_ticks += 1;
                    if self.session.vol_not_settled_ticks >= VOL_SETTLE_TIMEOUT_TICKS {
                        self.startup_cep_timeout(now);
                    }
                }
                RAMP_PERIOD
            }
            ChargeStatus::FastChargingFromChgpump if self.session.curr_limit_mode => {
                if self.fastchg_err_check() {
                    self.current_limit_process();
                }
                STEADY_PERIOD
            }
            _ => {
                self.voltage_ramp();
                if self.session.vol_set_ok {
                    STEADY_PERIOD
                } else {
                    RAMP_PERIOD
                }
            }
        }
    }

    /// Sets a new ramp target, limited to the window of the current mode
    pub(crate) fn set_rx_target_voltage(&mut self, mv: u32) {
        let mv = mv.clamp(self.vol_floor(), self.param.vout_max_mv);
        let s = &mut self.session;
        debug!("rx target voltage {} -> {mv}", s.target_vol);
        s.target_vol = mv;
        s.vol_set_fast = false;
        if s.vol_set != mv {
            s.vol_set_ok = false;
        }
    }

    /// Sets a new target that is applied without stepping
    pub(crate) fn set_rx_target_voltage_fast(&mut self, mv: u32) {
        self.set_rx_target_voltage(mv);
        self.session.vol_set_fast = true;
    }

    fn vol_floor(&self) -> u32 {
        if self.session.is_fastchg_mode() {
            self.param.vout_min_fastchg_mv
        } else {
            self.param.vout_min_default_mv
        }
    }

    /// One step of the voltage ramp
    pub(crate) fn voltage_ramp(&mut self) {
        if self.session.curr_limit_mode {
            return;
        }
        let target = self
            .session
            .target_vol
            .clamp(self.vol_floor(), self.param.vout_max_mv);
        // the floor may have moved with the mode since the target was set
        self.session.target_vol = target;

        if self.session.vol_set == target {
            if !self.session.vol_set_ok {
                self.check_vol_settled();
            }
            return;
        }

        let next = if self.session.vol_set_fast {
            target
        } else {
            ramp_step(
                self.session.vol_set,
                target,
                self.param.vol_inc_step_max_mv,
                self.param.vol_dec_step_max_mv,
            )
        };
        match self.ctx.rx.set_prop(RxProp::Vout, next as i32) {
            Ok(()) => {
                let s = &mut self.session;
                debug!("rx vout {} -> {next} (target {target})", s.vol_set);
                s.vol_set = next;
                s.vol_set_ok = false;
                s.cep_ok_count = 0;
                if next == target {
                    s.vol_set_fast = false;
                }
            }
            Err(e) => warn!("rx vout write failed: {e}"),
        }
    }

    fn check_vol_settled(&mut self) {
        match self.ctx.rx.get_prop(RxProp::Cep) {
            Ok(cep) if cep.abs() <= CEP_STABLE_MAX => {
                self.session.cep_ok_count += 1;
                if self.session.cep_ok_count >= CEP_SETTLE_COUNT {
                    debug!("rx vout settled at {} mV", self.session.vol_set);
                    self.session.vol_set_ok = true;
                }
            }
            Ok(cep) => {
                debug!("cep {cep}, waiting");
                self.session.cep_ok_count = 0;
            }
            Err(Error::NoData) => {}
            Err(e) => warn!("cep read failed: {e}"),
        }
    }

    /// One step of the current loop
    pub(crate) fn current_limit_process(&mut self) {
        let fresh_bad = match self.ctx.rx.get_prop(RxProp::Cep) {
            Ok(cep) if cep.abs() > CEP_STABLE_MAX => {
                self.session.cep_err_flag = true;
                true
            }
            Ok(_) => {
                self.session.cep_err_flag = false;
                self.session.cep_bad_count = 0;
                false
            }
            Err(Error::NoData) => false,
            Err(e) => {
                warn!("cep read failed: {e}");
                false
            }
        };

        let t = &self.session.telemetry;
        let iout_ua = t.iout_ma as i64 * 1000;
        let ibat_err =
            (self.param.ibat_max_ua as i64 - t.batt_curr_ua.unsigned_abs() as i64) / 4 - IBAT_MARGIN_UA;
        let err = (self.session.target_curr as i64 - iout_ua).min(ibat_err);
        self.session.charge_current = iout_ua as u32;

        if self.session.curr_need_dec {
            self.session.curr_need_dec = false;
            self.reduce_cep_curr();
        }

        // no adjustment while a bad CEP is pending
        if self.session.cep_err_flag {
            if fresh_bad && err > 0 {
                self.session.cep_bad_count += 1;
                if self.session.cep_bad_count >= CEP_BAD_LIMIT {
                    warn!("cep unstable, lowering current");
                    self.session.cep_bad_count = 0;
                    self.session.curr_need_dec = true;
                }
            }
            return;
        }

        if err > 0 {
            let step = curr_adjust_step(err as u32);
            if step == 0 {
                return;
            }
            let next = self.session.vol_set + step;
            if next > self.param.vout_max_mv {
                self.session.curr_err_count += 1;
                warn!("rx vout at ceiling ({})", self.session.curr_err_count);
                if self.session.curr_err_count >= CURR_ERR_LIMIT {
                    self.fastchg_restart();
                }
                return;
            }
            self.session.curr_err_count = 0;
            self.write_vol_set(next);
        } else if err < 0 {
            let step = curr_adjust_step(err.unsigned_abs() as u32);
            if step == 0 {
                return;
            }
            let next = self
                .session
                .vol_set
                .saturating_sub(step)
                .max(self.param.vout_min_fastchg_mv);
            if next != self.session.vol_set {
                self.write_vol_set(next);
            }
        }
    }

    fn write_vol_set(&mut self, mv: u32) {
        match self.ctx.rx.set_prop(RxProp::Vout, mv as i32) {
            Ok(()) => {
                debug!(
                    "current loop: vout {} -> {mv}, iout {} target {}",
                    self.session.vol_set, self.session.charge_current, self.session.target_curr
                );
                self.session.vol_set = mv;
                self.session.target_vol = mv;
            }
            Err(e) => warn!("rx vout write failed: {e}"),
        }
    }

    /// Lowers the CEP current ceiling by one step
    fn reduce_cep_curr(&mut self) {
        let current = self
            .wlcs_fcc
            .effective()
            .unwrap_or(self.session.target_curr);
        let next = current
            .saturating_sub(self.param.fastchg_curr_step_ua)
            .max(self.param.fastchg_curr_min_ua);
        info!("cep current ceiling {current} -> {next} uA");
        self.wlcs_fcc.vote(CurrVoter::Cep, Some(next));
        self.refresh_target_curr();
    }

    /// Drops the pumps and the receiver back to defaults; the status
    /// machine starts over from `Default`
    pub(crate) fn fastchg_restart(&mut self) {
        warn!("fast charge stuck, restarting");
        self.fastchg_teardown();
        if let Err(e) = self.ctx.rx.reset() {
            warn!("rx reset failed: {e}");
        }
        self.session.vol_set = self.param.vout_min_default_mv;
        self.set_status(ChargeStatus::Default);
        self.set_rx_target_voltage(self.param.vout_min_default_mv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::WlchgDev;
    use crate::mock::{MockPlatform, engine};
    use crate::status::SharedStatus;

    #[test]
    fn test_ramp_step_bounds() {
        assert_eq!(ramp_step(5_000, 12_000, 1_000, 1_000), 6_000);
        assert_eq!(ramp_step(5_000, 5_400, 1_000, 1_000), 5_400);
        assert_eq!(ramp_step(12_000, 5_000, 1_000, 500), 11_500);
        assert_eq!(ramp_step(5_300, 5_000, 1_000, 1_000), 5_000);
        assert_eq!(ramp_step(7_000, 7_000, 1_000, 1_000), 7_000);
    }

    #[test]
    fn test_curr_adjust_tiers() {
        assert_eq!(curr_adjust_step(600_000), 200);
        assert_eq!(curr_adjust_step(300_000), 100);
        assert_eq!(curr_adjust_step(60_000), 20);
        assert_eq!(curr_adjust_step(10_000), 0);
    }

    #[test]
    fn test_ramp_steps_are_bounded() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;
        let t = Instant::from_secs(1);

        for target in [12_000, 5_500, 20_000, 5_000] {
            wl.set_rx_target_voltage(target);
            for _ in 0..20 {
                let before = wl.session.vol_set;
                wl.regulation_tick(t);
                assert!(before.abs_diff(wl.session.vol_set) <= 1_000);
            }
            assert_eq!(wl.session.vol_set, target);
            assert!(wl.session.vol_set_ok);
        }
    }

    #[test]
    fn test_fast_target_jumps() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;

        wl.set_rx_target_voltage_fast(12_000);
        wl.regulation_tick(Instant::from_secs(1));
        assert_eq!(wl.session.vol_set, 12_000);
        assert!(!wl.session.vol_set_fast);
        assert_eq!(wl.ctx.rx.vout_writes, [12_000]);
    }

    #[test]
    fn test_unstable_cep_never_settles() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;
        wl.ctx.rx.cep = Some(-5);

        wl.set_rx_target_voltage(9_000);
        for _ in 0..100 {
            wl.regulation_tick(Instant::from_secs(1));
            assert!(!wl.session.vol_set_ok);
        }
        assert_eq!(wl.session.vol_set, 9_000);

        // no new packet is not a stable one either
        wl.ctx.rx.cep = None;
        wl.regulation_tick(Instant::from_secs(1));
        assert!(!wl.session.vol_set_ok);
    }

    #[test]
    fn test_modes_are_exclusive() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;
        wl.session.charge_status = ChargeStatus::FastChargingFromChgpump;
        wl.session.curr_limit_mode = true;
        wl.session.vol_set = 15_000;
        wl.session.target_vol = 20_000;
        wl.session.target_curr = 1_500_000;
        wl.ctx.rx.iout_ma = 500;
        wl.ctx.battery.ibat_ua = 1_000_000;
        wl.session.telemetry.iout_ma = 500;
        wl.session.telemetry.batt_curr_ua = 1_000_000;

        wl.voltage_ramp();
        assert_eq!(wl.session.vol_set, 15_000);

        assert_eq!(wl.regulation_tick(Instant::from_secs(1)), STEADY_PERIOD);
        assert_eq!(wl.session.vol_set, 15_200);
        assert_eq!(wl.session.charge_current, 500_000);
    }

    #[test]
    fn test_bad_cep_blocks_increase_then_lowers_ceiling() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;
        wl.session.charge_status = ChargeStatus::FastChargingFromChgpump;
        wl.session.curr_limit_mode = true;
        wl.session.vol_set = 15_000;
        wl.session.target_curr = 1_500_000;
        wl.wlcs_fcc.vote(CurrVoter::FfcLevel, Some(1_500_000));
        wl.session.telemetry.iout_ma = 500;
        wl.ctx.rx.cep = Some(10);

        for _ in 0..CEP_BAD_LIMIT {
            wl.regulation_tick(Instant::from_secs(1));
            assert_eq!(wl.session.vol_set, 15_000);
        }
        assert!(wl.session.curr_need_dec);

        wl.regulation_tick(Instant::from_secs(1));
        assert_eq!(wl.wlcs_fcc.get(CurrVoter::Cep), Some(1_400_000));
        assert_eq!(wl.session.target_curr, 1_400_000);
        assert!(!wl.session.curr_need_dec);
    }

    fn current_limiting<'a>(dev: &'a WlchgDev, status: &'a SharedStatus) -> Wlchg<'a, MockPlatform> {
        let mut wl = engine(dev, status);
        wl.session.charge_online = true;
        wl.session.charge_status = ChargeStatus::FastChargingFromChgpump;
        wl.session.curr_limit_mode = true;
        wl.session.vol_set = 15_000;
        wl.session.target_vol = 15_000;
        wl.session.target_curr = 1_500_000;
        wl.wlcs_fcc.vote(CurrVoter::FfcLevel, Some(1_500_000));
        wl
    }

    #[test]
    fn test_stale_cep_is_not_a_bad_reading() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = current_limiting(&dev, &status);
        wl.session.telemetry.iout_ma = 500;
        let t = Instant::from_secs(1);

        wl.ctx.rx.cep = Some(10);
        wl.regulation_tick(t);
        wl.ctx.rx.cep = None;
        wl.regulation_tick(t);
        wl.regulation_tick(t);
        assert!(!wl.session.curr_need_dec);
        assert_eq!(wl.session.cep_bad_count, 1);
        // still pending, so the voltage holds
        assert!(wl.session.cep_err_flag);
        assert_eq!(wl.session.vol_set, 15_000);

        wl.ctx.rx.cep = Some(10);
        wl.regulation_tick(t);
        assert!(!wl.session.curr_need_dec);
        wl.regulation_tick(t);
        assert!(wl.session.curr_need_dec);
    }

    #[test]
    fn test_good_cep_restarts_the_count() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = current_limiting(&dev, &status);
        wl.session.telemetry.iout_ma = 500;
        let t = Instant::from_secs(1);

        for cep in [10, 10, 0, 10, 10] {
            wl.ctx.rx.cep = Some(cep);
            wl.regulation_tick(t);
        }
        assert!(!wl.session.curr_need_dec);
        assert_eq!(wl.session.cep_bad_count, 2);
    }

    #[test]
    fn test_bad_cep_holds_decrease() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = current_limiting(&dev, &status);
        wl.session.telemetry.iout_ma = 2_500;
        let t = Instant::from_secs(1);

        wl.ctx.rx.cep = Some(-20);
        wl.regulation_tick(t);
        assert!(wl.session.cep_err_flag);
        assert_eq!(wl.session.vol_set, 15_000);
        assert!(wl.ctx.rx.vout_writes.is_empty());

        wl.ctx.rx.cep = Some(0);
        wl.regulation_tick(t);
        assert!(!wl.session.cep_err_flag);
        assert_eq!(wl.session.vol_set, 14_800);
    }

    #[test]
    fn test_settled_voltage_matches_target() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;

        // below the fast charge floor
        wl.session.charge_status = ChargeStatus::IncreaseVoltage;
        wl.set_rx_target_voltage(6_000);
        assert_eq!(wl.session.target_vol, wl.param.vout_min_fastchg_mv);

        // floor raised after the target was set
        wl.session.charge_status = ChargeStatus::Default;
        wl.set_rx_target_voltage(7_000);
        wl.session.charge_status = ChargeStatus::IncreaseVoltage;
        for _ in 0..20 {
            wl.voltage_ramp();
            if wl.session.vol_set_ok {
                break;
            }
        }
        assert!(wl.session.vol_set_ok);
        assert_eq!(wl.session.vol_set, wl.param.vout_min_fastchg_mv);
        assert_eq!(wl.session.target_vol, wl.session.vol_set);
    }

    #[test]
    fn test_ceiling_errors_restart_fastchg() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        wl.session.charge_online = true;
        wl.session.charge_status = ChargeStatus::FastChargingFromChgpump;
        wl.session.curr_limit_mode = true;
        wl.session.vol_set = 20_000;
        wl.session.target_curr = 1_500_000;
        wl.session.telemetry.iout_ma = 100;

        for _ in 0..CURR_ERR_LIMIT - 1 {
            wl.regulation_tick(Instant::from_secs(1));
        }
        assert_eq!(wl.session.curr_err_count, CURR_ERR_LIMIT - 1);
        wl.regulation_tick(Instant::from_secs(1));
        assert_eq!(wl.session.charge_status, ChargeStatus::Default);
        assert!(!wl.session.curr_limit_mode);
        assert_eq!(wl.session.target_vol, wl.param.vout_min_default_mv);
    }
}
