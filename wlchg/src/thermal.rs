//! Battery temperature regions and skin temperature limits

use embassy_time::{Duration, Instant};
use log::{info, warn};

use crate::charger::{ChargerVoter, MainCharger};
use crate::config::TEMP_BOUND_COUNT;
use crate::policy::{Platform, Wlchg};
use crate::rx::RxRunMode;
use crate::session::{ChargeStatus, TempRegion};
use crate::votable::{CurrVoter, FastchgVoter};

/// Minimum time between two skin controller steps
pub const SKIN_STEP_INTERVAL: Duration = Duration::from_secs(30);

/// Hold time after entering an FFC level flagged `need_wait`
pub const FFC_LEVEL_HOLD: Duration = Duration::from_secs(10);

const REGIONS: [TempRegion; TempRegion::COUNT] = [
    TempRegion::Cold,
    TempRegion::LittleCold,
    TempRegion::Cool,
    TempRegion::LittleCool,
    TempRegion::PreNormal,
    TempRegion::Normal,
    TempRegion::Warm,
    TempRegion::Hot,
];

/// Region of `temp` against ascending boundaries. A temperature equal to a
/// boundary belongs to the warmer region.
pub fn detect_region(bounds: &[i32; TEMP_BOUND_COUNT], temp: i32) -> TempRegion {
    let idx = bounds.iter().take_while(|b| temp >= **b).count();
    REGIONS[idx]
}

/// Boundaries to use while in `region`: the two boundaries around it move
/// outwards by `hyst`, the others keep their defaults.
pub fn hysteresis_bounds(
    defaults: &[i32; TEMP_BOUND_COUNT],
    hyst: i32,
    region: TempRegion,
) -> [i32; TEMP_BOUND_COUNT] {
    let mut bounds = *defaults;
    let idx = region.index();
    if idx > 0 {
        bounds[idx - 1] -= hyst;
    }
    if idx < TEMP_BOUND_COUNT {
        bounds[idx] += hyst;
    }
    bounds
}

impl<P: Platform> Wlchg<'_, P> {
    /// Runs the region handler when the battery moved to another region
    pub(crate) fn check_battery_temp(&mut self) {
        let temp = self.session.telemetry.batt_temp;
        let region = detect_region(&self.session.temp_bound, temp);
        if region != self.session.temp_region || !self.session.temp_region_init {
            info!(
                "battery temp {temp}: region {} -> {region}",
                self.session.temp_region
            );
            self.handle_temp_region(region);
        }
    }

    pub(crate) fn handle_temp_region(&mut self, region: TempRegion) {
        match region {
            TempRegion::Cold => self.handle_batt_temp_cold(),
            TempRegion::LittleCold => self.handle_batt_temp_little_cold(),
            TempRegion::Cool => self.handle_batt_temp_cool(),
            TempRegion::LittleCool => self.handle_batt_temp_little_cool(),
            TempRegion::PreNormal => self.handle_batt_temp_pre_normal(),
            TempRegion::Normal => self.handle_batt_temp_normal(),
            TempRegion::Warm => self.handle_batt_temp_warm(),
            TempRegion::Hot => self.handle_batt_temp_hot(),
        }
    }

    fn enter_region(&mut self, region: TempRegion) {
        self.session.temp_region = region;
        self.session.temp_bound =
            hysteresis_bounds(&self.param.temp_bound, self.param.temp_hyst, region);
        self.session.temp_region_init = true;
        self.apply_region_limits(region);
    }

    /// Charging stops; the pumps are left to the status machine
    pub(crate) fn handle_batt_temp_cold(&mut self) {
        self.enter_region(TempRegion::Cold);
        self.stop_for_temperature();
    }

    pub(crate) fn handle_batt_temp_little_cold(&mut self) {
        self.enter_region(TempRegion::LittleCold);
    }

    pub(crate) fn handle_batt_temp_cool(&mut self) {
        self.enter_region(TempRegion::Cool);
    }

    pub(crate) fn handle_batt_temp_little_cool(&mut self) {
        self.enter_region(TempRegion::LittleCool);
    }

    pub(crate) fn handle_batt_temp_pre_normal(&mut self) {
        self.enter_region(TempRegion::PreNormal);
    }

    pub(crate) fn handle_batt_temp_normal(&mut self) {
        self.enter_region(TempRegion::Normal);
    }

    pub(crate) fn handle_batt_temp_warm(&mut self) {
        self.enter_region(TempRegion::Warm);
    }

    pub(crate) fn handle_batt_temp_hot(&mut self) {
        self.enter_region(TempRegion::Hot);
        self.stop_for_temperature();
    }

    fn stop_for_temperature(&mut self) {
        warn!("battery temperature abnormal, charging stopped");
        self.session.target_curr = 0;
        self.session.charge_current = 0;
        self.session.curr_limit_mode = false;
        self.set_status(ChargeStatus::Default);
    }

    /// Votes the ceilings of `region` on the main charger and the fast
    /// charge current limit
    pub(crate) fn apply_region_limits(&mut self, region: TempRegion) {
        let limit = *self.param.limit(region);
        let epp = self.session.run_mode == RxRunMode::Epp || self.session.adapter_type.is_fast();
        let icl = if epp { limit.epp_icl_ua } else { limit.bpp_icl_ua };

        let charger = &mut self.ctx.charger;
        charger.vote_fcc(ChargerVoter::Wlch, Some(limit.fcc_ua));
        if self.session.charge_status != ChargeStatus::FastChargingFfc {
            charger.vote_fv(ChargerVoter::Wlch, Some(limit.fv_mv));
        }
        charger.vote_icl(ChargerVoter::Wlch, Some(icl));

        if region.allows_fastchg() {
            self.fastchg_disable.set(FastchgVoter::BattTemp, false);
            let cap = self
                .session
                .charge_status
                .is_chgpump()
                .then_some(limit.fastchg_curr_max_ua);
            self.wlcs_fcc.vote(CurrVoter::BattTemp, cap);
        } else {
            self.fastchg_disable.set(FastchgVoter::BattTemp, true);
            let cap = matches!(region, TempRegion::Cold | TempRegion::Hot).then_some(0);
            self.wlcs_fcc.vote(CurrVoter::BattTemp, cap);
        }
        self.refresh_target_curr();
    }

    /// Follows the fast charge current ceiling while current limiting
    pub(crate) fn refresh_target_curr(&mut self) {
        if !self.session.curr_limit_mode {
            return;
        }
        if let Some(ceiling) = self.wlcs_fcc.effective() {
            self.session.target_curr = ceiling;
        }
    }

    /// Two-stage input current reduction on hot skin
    pub(crate) fn check_epp_skin_temp(&mut self, now: Instant) {
        if let Some(at) = self.session.epp_skin_changed_at {
            if now - at < SKIN_STEP_INTERVAL {
                return;
            }
        }

        let skin = self.session.telemetry.skin_temp;
        let stages = &self.param.epp_skin_curr_ua;
        let step = self.session.epp_skin_step;
        let next = if skin > self.param.epp_skin_temp_max && step < stages.len() {
            step + 1
        } else if skin < self.param.epp_skin_temp_min && step > 0 {
            step - 1
        } else {
            return;
        };

        let icl = next.checked_sub(1).map(|i| stages[i]);
        info!("skin {skin}: epp skin step {step} -> {next}, icl {icl:?}");
        self.ctx.charger.vote_icl(ChargerVoter::Skin, icl);
        self.session.epp_skin_step = next;
        self.session.epp_skin_changed_at = Some(now);
    }

    /// Moves the fast charge current down the FFC table on hot skin; past
    /// the last step fast charge exits
    pub(crate) fn check_fastchg_skin_temp(&mut self, now: Instant) {
        if let Some(at) = self.session.fastchg_skin_changed_at {
            if now - at < SKIN_STEP_INTERVAL {
                return;
            }
        }

        let skin = self.session.telemetry.skin_temp;
        let count = self.param.ffc_step_count;
        let level = self.session.fastchg_level;

        if skin > self.param.fastchg_skin_temp_max {
            let cur = self.session.fastchg_curr_step.max(level);
            if cur + 1 >= count {
                warn!("skin {skin} too hot for fast charge");
                self.fastchg_disable.set(FastchgVoter::Skin, true);
                self.set_status(ChargeStatus::FastChargingExit);
                return;
            }
            let step = cur + 1;
            let curr = self.param.ffc_step[step].curr_ua;
            info!("skin {skin}: fast charge step {step}, {curr} uA");
            self.session.fastchg_curr_step = step;
            self.wlcs_fcc.vote(CurrVoter::Skin, Some(curr));
            self.session.fastchg_skin_changed_at = Some(now);
            self.refresh_target_curr();
        } else if skin < self.param.fastchg_skin_temp_min && self.session.fastchg_curr_step > 0 {
            let step = self.session.fastchg_curr_step - 1;
            if step <= level {
                self.session.fastchg_curr_step = 0;
                self.wlcs_fcc.vote(CurrVoter::Skin, None);
            } else {
                self.session.fastchg_curr_step = step;
                self.wlcs_fcc
                    .vote(CurrVoter::Skin, Some(self.param.ffc_step[step].curr_ua));
            }
            info!("skin {skin}: fast charge step back to {}", self.session.fastchg_curr_step);
            self.session.fastchg_skin_changed_at = Some(now);
            self.refresh_target_curr();
        }
    }

    /// Lifts the skin reason once the skin cooled down
    pub(crate) fn clear_fastchg_skin_vote(&mut self) {
        if self.fastchg_disable.is_voted(FastchgVoter::Skin)
            && self.session.telemetry.skin_temp < self.param.fastchg_skin_temp_min
        {
            info!("skin cooled down, fast charge allowed again");
            self.fastchg_disable.set(FastchgVoter::Skin, false);
        }
    }

    /// Walks the FFC level table while charging through the pumps
    pub(crate) fn fastchg_temp_check(&mut self, now: Instant) {
        if let Some(until) = self.session.ffc_wait_until {
            if now < until {
                return;
            }
            self.session.ffc_wait_until = None;
        }

        let count = self.param.ffc_step_count;
        let level = self.session.fastchg_level;
        let temp = self.session.telemetry.batt_temp;
        let vbat = self.session.telemetry.batt_vol_mv;
        let step = self.param.ffc_step[level];

        if temp >= step.high_temp || vbat >= step.vol_max_mv {
            if level + 1 >= count {
                if !self.fastchg_disable.is_voted(FastchgVoter::Ffc) {
                    info!("last ffc level done (temp {temp}, vbat {vbat})");
                    self.fastchg_disable.set(FastchgVoter::Ffc, true);
                }
                return;
            }
            self.set_ffc_level(level + 1, now);
        } else if level > 0
            && step.allow_fallback
            && temp < step.low_temp
            && vbat < self.param.ffc_step[level - 1].vol_max_mv
        {
            self.set_ffc_level(level - 1, now);
        }
    }

    fn set_ffc_level(&mut self, level: usize, now: Instant) {
        let step = self.param.ffc_step[level];
        info!(
            "ffc level {} -> {level}, {} uA",
            self.session.fastchg_level, step.curr_ua
        );
        self.session.fastchg_level = level;
        self.wlcs_fcc.vote(CurrVoter::FfcLevel, Some(step.curr_ua));
        if step.need_wait {
            self.session.ffc_wait_until = Some(now + FFC_LEVEL_HOLD);
        }
        self.refresh_target_curr();
    }
}
