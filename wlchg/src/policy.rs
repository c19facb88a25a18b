//! Top-level charging state machine
//!
//! [`Wlchg`] owns the hardware [`Context`], the configuration and the
//! session. The state machine lives here; the thermal policy, regulation
//! loop, charge pump startup and reverse charging add their parts in their
//! own modules.

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::chargepump::{CP1_WDT_FEED_INTERVAL, ChargePump, CpWatchdog};
use crate::charger::{Battery, ChargerVoter, MainCharger};
use crate::config::ChargeParam;
use crate::error::Error;
use crate::mailbox::{CmdInfo, DOCK_CMD_HEADER, DockCmd, MsgInfo, MsgType, NotifyCode, WlchgDev};
use crate::reverse::TxSession;
use crate::rx::{RxChip, RxProp, RxRunMode};
use crate::session::{AdapterType, ChargeSession, ChargeStatus, ChargeType, TempRegion};
use crate::status::{SharedStatus, StatusSnapshot};
use crate::votable::{CurrVoter, FastchgVoter, VoteKind, Votable};

/// Period of [`Wlchg::charge_tick`]
pub const CHARGE_PERIOD: Duration = Duration::from_millis(500);

/// Transmissions of an engine-issued dock command
pub const CMD_RETRIES: u8 = 3;

/// Consecutive `NoDevice` receiver reads that end the session
pub const RX_NODEV_LIMIT: u32 = 10;

const FASTCHG_ENTER_WAIT_TICKS: u32 = 20;
pub const FASTCHG_ENTER_RETRIES: u32 = 3;
const FASTCHG_EXIT_WAIT_TICKS: u32 = 20;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const HEARTBEAT_ERR_LIMIT: u32 = 3;

/// Dock-reported CEP timeouts that end the session
pub const CEP_TIMEOUT_LIMIT: u32 = 3;

/// Quiet time after the last CEP timeout before fast charge is allowed again
pub const CEP_TIMEOUT_COOLDOWN: Duration = Duration::from_secs(60);

/// Output current under which a low operating frequency means misalignment
const DEVIATION_IOUT_MA: u32 = 300;

/// Hardware the engine drives
pub trait Platform {
    type Rx: RxChip;
    type Cp1: ChargePump;
    type Cp2: ChargePump;
    type Charger: MainCharger;
    type Battery: Battery;
    type Delay: DelayNs;
}

/// Collaborators handed to the engine at assembly time
pub struct Context<P: Platform> {
    pub rx: P::Rx,
    pub cp1: P::Cp1,
    pub cp2: P::Cp2,
    pub charger: P::Charger,
    pub battery: P::Battery,
    pub delay: P::Delay,
}

/// Wireless charging policy engine
pub struct Wlchg<'a, P: Platform> {
    pub(crate) ctx: Context<P>,
    pub(crate) param: ChargeParam,
    pub(crate) session: ChargeSession,
    pub(crate) fastchg_disable: Votable<FastchgVoter>,
    pub(crate) wlcs_fcc: Votable<CurrVoter>,
    pub(crate) tx: TxSession,
    pub(crate) cp1_wdt: CpWatchdog,
    pub(crate) charge_enabled: bool,
    pub(crate) ftm_requested: bool,
    pub(crate) dev: &'a WlchgDev,
    status: &'a SharedStatus,
}

impl<'a, P: Platform> Wlchg<'a, P> {
    pub fn new(
        ctx: Context<P>,
        param: ChargeParam,
        dev: &'a WlchgDev,
        status: &'a SharedStatus,
    ) -> Self {
        let session = ChargeSession::new(&param);
        Self {
            ctx,
            param,
            session,
            fastchg_disable: Votable::new("FASTCHG_DISABLE", VoteKind::SetAny),
            wlcs_fcc: Votable::new("WLCS_FCC", VoteKind::Min),
            tx: TxSession::new(),
            cp1_wdt: CpWatchdog::new(),
            charge_enabled: true,
            ftm_requested: false,
            dev,
            status,
        }
    }

    pub fn session(&self) -> &ChargeSession {
        &self.session
    }

    pub fn param(&self) -> &ChargeParam {
        &self.param
    }

    pub fn context(&mut self) -> &mut Context<P> {
        &mut self.ctx
    }

    pub fn fastchg_disable(&self) -> &Votable<FastchgVoter> {
        &self.fastchg_disable
    }

    pub fn wlcs_fcc(&self) -> &Votable<CurrVoter> {
        &self.wlcs_fcc
    }

    /// Dock detected
    pub fn on_connect(&mut self, _now: Instant) {
        if self.session.tx_online {
            warn!("dock detected while in reverse mode");
            self.disable_tx();
        }
        self.reset_session();
        self.session.charge_online = true;
        self.session.dock_on = true;
        if let Err(e) = self.ctx.rx.set_prop(RxProp::ChipSleep, 0) {
            warn!("rx wake failed: {e}");
        }
        info!("wireless dock connected");
        self.publish();
    }

    /// Dock removed; every periodic task must be stopped before this runs
    pub fn on_disconnect(&mut self) {
        if !self.session.charge_online {
            return;
        }
        self.fastchg_teardown();
        self.ctx.charger.unvote_all();
        self.reset_session();
        info!("wireless dock disconnected");
        self.publish();
    }

    /// Clears the session, the votes it cast and the adapter channel
    pub(crate) fn reset_session(&mut self) {
        self.session.reset(&self.param);
        self.fastchg_disable.clear();
        self.wlcs_fcc.clear();
        self.cp1_wdt.disarm();
        self.dev.clear();
    }

    /// Ends the session and puts the receiver to sleep
    pub(crate) fn session_fatal(&mut self, reason: &str) {
        error!("{reason}, session stopped");
        self.fastchg_teardown();
        self.ctx.charger.unvote_all();
        if let Err(e) = self.ctx.rx.set_prop(RxProp::ChipSleep, 1) {
            warn!("rx sleep failed: {e}");
        }
        self.reset_session();
        self.publish();
    }

    /// Main periodic entry point, every [`CHARGE_PERIOD`]
    pub fn charge_tick(&mut self, now: Instant) {
        if !self.session.charge_online {
            return;
        }
        if self.fw_updating() {
            debug!("rx firmware update in progress");
            return;
        }
        if !self.update_telemetry() {
            self.publish();
            return;
        }
        if !self.process_notify(now) {
            return;
        }
        self.update_fastchg_votes(now);
        self.check_battery_temp();
        self.charge_status_process(now);
        self.cmd_process();
        self.publish();
    }

    /// Feeds the CP1 watchdog when due; returns the time until the next call
    pub fn cp1_watchdog_tick(&mut self, now: Instant) -> Duration {
        match self.cp1_wdt.poll(&mut self.ctx.cp1, now) {
            Ok(Some(next)) => next,
            Ok(None) => CP1_WDT_FEED_INTERVAL,
            Err(e) => {
                warn!("cp1 watchdog feed failed: {e}");
                Duration::from_secs(1)
            }
        }
    }

    /// User charge enable
    pub fn set_charge_enabled(&mut self, enable: bool) {
        self.charge_enabled = enable;
        if !enable && self.session.charge_online {
            self.set_status(ChargeStatus::WaitDisableBattCharge);
        }
    }

    /// Factory test mode request
    pub fn request_ftm(&mut self, enable: bool) {
        self.ftm_requested = enable;
    }

    pub(crate) fn fw_updating(&mut self) -> bool {
        matches!(self.ctx.rx.get_prop(RxProp::FwUpdating), Ok(v) if v != 0)
    }

    pub(crate) fn publish(&self) {
        self.status.publish(StatusSnapshot::from(&self.session));
    }

    pub(crate) fn set_status(&mut self, status: ChargeStatus) {
        let old = self.session.charge_status;
        if old == status {
            return;
        }
        info!("charge status {old} -> {status}");
        self.session.charge_status = status;
        self.session.wait_ticks = 0;
        let msg = MsgInfo::new(MsgType::ChgInfo, status.into(), 0);
        if self.dev.send_msg(msg).is_err() {
            debug!("status message dropped, adapter busy");
        }
    }

    /// Refreshes the measurements. Returns false when this tick must be
    /// skipped.
    fn update_telemetry(&mut self) -> bool {
        if !self.ctx.battery.is_present() {
            self.session_fatal("battery missing");
            return false;
        }

        let t = &mut self.session.telemetry;
        let bat = &mut self.ctx.battery;
        match bat.temperature() {
            Ok(v) => t.batt_temp = v,
            Err(e) => warn!("battery temperature read failed: {e}"),
        }
        match bat.voltage_mv() {
            Ok(v) => t.batt_vol_mv = v,
            Err(e) => warn!("battery voltage read failed: {e}"),
        }
        match bat.current_ua() {
            Ok(v) => t.batt_curr_ua = v,
            Err(e) => warn!("battery current read failed: {e}"),
        }
        match bat.soc() {
            Ok(v) => t.soc = v,
            Err(e) => warn!("soc read failed: {e}"),
        }
        match bat.skin_temperature() {
            Ok(v) => t.skin_temp = v,
            Err(e) => warn!("skin temperature read failed: {e}"),
        }

        match self.ctx.rx.get_prop(RxProp::Vout) {
            Ok(v) => {
                self.session.rx_nodev_count = 0;
                self.session.telemetry.vout_mv = v.max(0) as u32;
            }
            Err(Error::NoDevice) => {
                self.session.rx_nodev_count += 1;
                warn!("rx not responding ({})", self.session.rx_nodev_count);
                if self.session.rx_nodev_count >= RX_NODEV_LIMIT {
                    self.session_fatal("rx communication lost");
                }
                return false;
            }
            Err(e) => {
                warn!("rx vout read failed: {e}");
                return false;
            }
        }

        let rx = &mut self.ctx.rx;
        let t = &mut self.session.telemetry;
        if let Ok(v) = rx.get_prop(RxProp::Iout) {
            t.iout_ma = v.max(0) as u32;
        }
        if let Ok(v) = rx.get_prop(RxProp::Vrect) {
            t.vrect_mv = v.max(0) as u32;
        }
        if let Ok(v) = rx.get_prop(RxProp::WorkFreq) {
            t.freq_khz = v.max(0) as u32;
        }
        debug!(
            "vout {} iout {} vbat {} ibat {} temp {} skin {} soc {}",
            t.vout_mv, t.iout_ma, t.batt_vol_mv, t.batt_curr_ua, t.batt_temp, t.skin_temp, t.soc
        );
        true
    }

    /// Applies pending adapter notifications. Returns false when the
    /// session ended.
    fn process_notify(&mut self, now: Instant) -> bool {
        while let Some(n) = self.dev.take_notify() {
            if let Some(cmd) = n.code.answers() {
                if self.dev.pending_cmd().map(|c| c.cmd) == Some(cmd) {
                    self.dev.replace_cmd(None);
                }
                if self
                    .dev
                    .send_msg(MsgInfo::new(MsgType::CmdResult, cmd.into(), n.arg))
                    .is_err()
                {
                    debug!("{cmd} result message dropped, adapter busy");
                }
            }

            match n.code {
                NotifyCode::AdapterType => match AdapterType::try_from(n.arg) {
                    Ok(t) => {
                        info!("adapter type {t}");
                        self.session.adapter_type = t;
                    }
                    Err(_) => warn!("unknown adapter type {}", n.arg),
                },
                NotifyCode::AdapterTypeErr => {
                    warn!("adapter type query failed");
                    if self.session.adapter_type == AdapterType::Unknown {
                        self.session.heartbeat_count = 0;
                    }
                }
                NotifyCode::ChargeType => {
                    let t = ChargeType::try_from(n.arg).unwrap_or(ChargeType::Unknown);
                    self.session.charge_type = t;
                    if self.session.charge_status == ChargeStatus::WaitingForTxIntoFastchg {
                        if t == ChargeType::Fast {
                            self.start_fastchg(now);
                        } else {
                            self.fastchg_enter_failed();
                        }
                    }
                }
                NotifyCode::ChargeTypeErr => {
                    if self.session.charge_status == ChargeStatus::WaitingForTxIntoFastchg {
                        self.fastchg_enter_failed();
                    }
                }
                NotifyCode::TxId => self.session.tx_id = n.arg,
                NotifyCode::TxIdErr => warn!("dock id query failed"),
                NotifyCode::QuietMode => {
                    info!("dock in quiet mode");
                    self.session.quiet_mode = true;
                    if self.session.charge_status == ChargeStatus::ReadyForQuiet {
                        self.set_status(self.session.quiet_return);
                    }
                }
                NotifyCode::QuietModeErr => self.quiet_failed(),
                NotifyCode::NormalMode => {
                    self.session.quiet_mode = false;
                    self.fastchg_disable.set(FastchgVoter::Quiet, false);
                }
                NotifyCode::NormalModeErr => warn!("dock normal mode request failed"),
                NotifyCode::ReadyForEpp => {
                    if self.session.adapter_type == AdapterType::Unknown {
                        self.session.adapter_type = AdapterType::Epp;
                    }
                }
                NotifyCode::WorkingInEpp => self.session.run_mode = RxRunMode::Epp,
                NotifyCode::Heartbeat => {
                    self.session.heartbeat_err_count = 0;
                    if self.fastchg_disable.is_voted(FastchgVoter::Heartbeat) {
                        info!("dock heartbeat back");
                        self.fastchg_disable.set(FastchgVoter::Heartbeat, false);
                    }
                }
                NotifyCode::HeartbeatErr => self.heartbeat_error(),
                NotifyCode::CepTimeout => {
                    self.session.cep_timeout_count += 1;
                    warn!("dock cep timeout ({})", self.session.cep_timeout_count);
                    self.fastchg_disable.set(FastchgVoter::Cep, true);
                    self.session.cep_timeout_at = Some(now);
                    if self.session.cep_timeout_count >= CEP_TIMEOUT_LIMIT {
                        self.session_fatal("persistent cep failure");
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Battery window, SoC and the CEP cooldowns
    fn update_fastchg_votes(&mut self, now: Instant) {
        let t = self.session.telemetry;
        let vol_ok = (self.param.fastchg_batt_vol_min_mv..=self.param.fastchg_batt_vol_max_mv)
            .contains(&t.batt_vol_mv);
        self.fastchg_disable.set(FastchgVoter::BattVol, !vol_ok);
        self.fastchg_disable
            .set(FastchgVoter::Soc, t.soc > self.param.fastchg_soc_max);

        if let Some(at) = self.session.startup_cep_retry_at {
            if now >= at {
                info!("startup cep cooldown over");
                self.session.startup_cep_retry_at = None;
                self.fastchg_disable.set(FastchgVoter::StartupCep, false);
            }
        }

        if let Some(at) = self.session.cep_timeout_at {
            if now - at >= CEP_TIMEOUT_COOLDOWN {
                info!("cep timeout cooldown over");
                self.session.cep_timeout_at = None;
                self.fastchg_disable.set(FastchgVoter::Cep, false);
            }
        }
    }

    /// Transmits the pending dock command, one attempt per tick
    pub(crate) fn cmd_process(&mut self) {
        let Some(mut cmd) = self.dev.pending_cmd() else {
            return;
        };
        if cmd.retry_count == 0 {
            warn!("dock command {} unanswered", cmd.cmd);
            self.dev.replace_cmd(None);
            if self
                .dev
                .send_msg(MsgInfo::new(MsgType::CmdErr, cmd.cmd.into(), cmd.cmd_type))
                .is_err()
            {
                debug!("{} error message dropped, adapter busy", cmd.cmd);
            }
            self.cmd_failed(cmd.cmd);
            return;
        }

        let payload = [cmd.cmd.into(), cmd.cmd_type];
        match self.ctx.rx.send_msg(DOCK_CMD_HEADER, &payload) {
            Ok(()) => {
                let msg = MsgInfo::new(MsgType::CmdRequest, cmd.cmd.into(), cmd.cmd_type);
                if self.dev.send_msg(msg).is_err() {
                    debug!("{} request message dropped, adapter busy", cmd.cmd);
                }
            }
            Err(e) => warn!("dock command {} send failed: {e}", cmd.cmd),
        }
        cmd.retry_count -= 1;
        if cmd.cmd.expects_reply() {
            self.dev.replace_cmd(Some(cmd));
        } else {
            self.dev.replace_cmd(None);
        }
    }

    fn cmd_failed(&mut self, cmd: DockCmd) {
        match cmd {
            DockCmd::Heartbeat => self.heartbeat_error(),
            DockCmd::SetQuietMode => self.quiet_failed(),
            DockCmd::EnterFastchg => {
                if self.session.charge_status == ChargeStatus::WaitingForTxIntoFastchg {
                    self.fastchg_enter_failed();
                }
            }
            _ => {}
        }
    }

    /// Queues an engine command; false while the slot is taken
    pub(crate) fn queue_cmd(&mut self, cmd: DockCmd, arg: u8) -> bool {
        self.dev
            .queue_cmd(CmdInfo::new(cmd, arg, CMD_RETRIES))
            .is_ok()
    }

    fn heartbeat_error(&mut self) {
        self.session.heartbeat_err_count += 1;
        warn!("dock heartbeat error ({})", self.session.heartbeat_err_count);
        if self.session.heartbeat_err_count >= HEARTBEAT_ERR_LIMIT {
            self.fastchg_disable.set(FastchgVoter::Heartbeat, true);
        }
    }

    fn quiet_failed(&mut self) {
        warn!("dock quiet mode request failed");
        self.fastchg_disable.set(FastchgVoter::Quiet, false);
        if self.session.charge_status == ChargeStatus::ReadyForQuiet {
            self.set_status(self.session.quiet_return);
        }
    }

    fn fastchg_enter_failed(&mut self) {
        self.session.fastchg_retry_count += 1;
        warn!("dock refused fast charge ({})", self.session.fastchg_retry_count);
        if self.session.fastchg_retry_count < FASTCHG_ENTER_RETRIES {
            self.set_status(ChargeStatus::ReadyForFastchg);
        } else {
            self.select_normal_path();
        }
    }

    /// Fast charge through the charge pumps may start
    pub(crate) fn can_fastchg(&self) -> bool {
        self.session.adapter_type.is_fast()
            && self.charge_enabled
            && !self.fastchg_disable.is_set()
            && self.session.fastchg_retry_count < FASTCHG_ENTER_RETRIES
            && self.session.ffc_start.is_none()
    }

    fn select_normal_path(&mut self) {
        if self.session.run_mode == RxRunMode::Epp || self.session.adapter_type == AdapterType::Epp
        {
            self.set_status(ChargeStatus::ReadyForEpp);
        } else {
            self.set_status(ChargeStatus::ReadyForBpp);
        }
    }

    fn send_fod_and_match_q(&mut self) {
        if let Err(e) = self.ctx.rx.set_prop_bytes(RxProp::Fod, &self.param.fod_param) {
            warn!("fod write failed: {e}");
        }
        let payload = [DockCmd::MatchQ.into(), self.param.match_q];
        if let Err(e) = self.ctx.rx.send_msg(DOCK_CMD_HEADER, &payload) {
            warn!("match-q send failed: {e}");
        }
    }

    fn charge_status_process(&mut self, now: Instant) {
        match self.session.charge_status {
            ChargeStatus::Default => self.handle_default(),
            ChargeStatus::ReadyForBpp => {
                self.set_rx_target_voltage(self.param.bpp_vol_mv);
                self.handle_temp_region(self.session.temp_region);
                self.set_status(ChargeStatus::Bpp);
            }
            ChargeStatus::Bpp => {
                if self.session.vol_set_ok {
                    self.set_status(ChargeStatus::BppWorking);
                }
            }
            ChargeStatus::BppWorking => self.working_check(now),
            ChargeStatus::ReadyForEpp => {
                self.send_fod_and_match_q();
                self.set_rx_target_voltage(self.param.epp_vol_mv);
                self.handle_temp_region(self.session.temp_region);
                self.set_status(ChargeStatus::Epp);
            }
            ChargeStatus::Epp => {
                if self.session.vol_set_ok {
                    self.set_status(ChargeStatus::EppWorking);
                }
            }
            ChargeStatus::EppWorking => {
                self.check_epp_skin_temp(now);
                self.working_check(now);
                if self.session.charge_status == ChargeStatus::EppWorking && self.can_fastchg() {
                    self.set_status(ChargeStatus::ReadyForFastchg);
                }
            }
            ChargeStatus::ReadyForFastchg => {
                self.send_fod_and_match_q();
                if self.queue_cmd(DockCmd::EnterFastchg, 0) {
                    self.set_status(ChargeStatus::WaitingForTxIntoFastchg);
                }
            }
            ChargeStatus::WaitingForTxIntoFastchg => {
                self.session.wait_ticks += 1;
                if self.session.wait_ticks >= FASTCHG_ENTER_WAIT_TICKS {
                    self.fastchg_enter_failed();
                }
            }
            ChargeStatus::IncreaseVoltage => {
                self.heartbeat(now);
                if self.fastchg_disable.is_set() {
                    self.set_status(ChargeStatus::FastChargingExit);
                }
            }
            ChargeStatus::FastChargingFromChgpump => {
                self.fastchg_temp_check(now);
                self.check_fastchg_skin_temp(now);
                self.heartbeat(now);
                if self.fastchg_disable.is_set()
                    && self.session.charge_status == ChargeStatus::FastChargingFromChgpump
                {
                    self.set_status(ChargeStatus::FastChargingExit);
                }
            }
            ChargeStatus::FastChargingExit => {
                self.fastchg_teardown();
                if !self.queue_cmd(DockCmd::ExitFastchg, 0) {
                    if let Some(cmd) = self.dev.pending_cmd() {
                        debug!("dock command {} replaced by exit", cmd.cmd);
                    }
                    self.dev
                        .replace_cmd(Some(CmdInfo::new(DockCmd::ExitFastchg, 0, CMD_RETRIES)));
                }
                self.set_rx_target_voltage_fast(self.param.fastchg_exit_vol_mv);
                self.set_status(ChargeStatus::FastChargingWaitExit);
            }
            ChargeStatus::FastChargingWaitExit => {
                self.session.wait_ticks += 1;
                if self.session.vol_set_ok || self.session.wait_ticks >= FASTCHG_EXIT_WAIT_TICKS {
                    if self.fastchg_disable.is_voted(FastchgVoter::Ffc)
                        && self.session.ffc_start.is_none()
                    {
                        self.start_ffc(now);
                    } else {
                        self.handle_temp_region(self.session.temp_region);
                        self.set_status(ChargeStatus::FastChargingFromPmic);
                    }
                }
            }
            ChargeStatus::FastChargingFfc => self.ffc_check(now),
            ChargeStatus::FastChargingFromPmic => {
                self.check_epp_skin_temp(now);
                self.clear_fastchg_skin_vote();
                self.working_check(now);
                if self.session.charge_status == ChargeStatus::FastChargingFromPmic
                    && self.can_fastchg()
                {
                    self.set_status(ChargeStatus::ReadyForFastchg);
                }
            }
            ChargeStatus::ReadyForQuiet => {}
            ChargeStatus::WaitDisableBattCharge => {
                self.fastchg_teardown();
                self.ctx.charger.vote_fcc(ChargerVoter::User, Some(0));
                self.ctx.charger.vote_suspend(ChargerVoter::User, true);
                self.set_rx_target_voltage(self.param.vout_min_default_mv);
                self.set_status(ChargeStatus::DisableBattCharge);
            }
            ChargeStatus::DisableBattCharge => {
                if self.charge_enabled {
                    self.ctx.charger.vote_fcc(ChargerVoter::User, None);
                    self.ctx.charger.vote_suspend(ChargerVoter::User, false);
                    self.set_status(ChargeStatus::Default);
                }
            }
            ChargeStatus::ReadyForFtm => {
                self.set_rx_target_voltage_fast(self.param.ftm_vol_mv);
                self.set_status(ChargeStatus::FtmWorking);
            }
            ChargeStatus::FtmWorking => {
                self.check_deviation();
                if !self.ftm_requested {
                    self.set_status(ChargeStatus::Default);
                }
            }
        }
    }

    fn handle_default(&mut self) {
        if self.cp_active() {
            self.fastchg_teardown();
        }
        if !self.charge_enabled {
            self.set_status(ChargeStatus::WaitDisableBattCharge);
            return;
        }
        if matches!(self.session.temp_region, TempRegion::Cold | TempRegion::Hot) {
            return;
        }
        if self.ftm_requested {
            self.set_status(ChargeStatus::ReadyForFtm);
            return;
        }

        match self.ctx.rx.run_mode() {
            Ok(mode) => self.session.run_mode = mode,
            Err(e) => warn!("rx run mode read failed: {e}"),
        }

        if self.session.adapter_type == AdapterType::Unknown {
            if !self.session.adapter_requested && self.queue_cmd(DockCmd::GetAdapterType, 0) {
                self.session.adapter_requested = true;
            }
            self.session.heartbeat_count = self.session.heartbeat_count.saturating_sub(1);
            if self.session.heartbeat_count == 0 {
                warn!("no adapter type from dock, run mode {}", self.session.run_mode);
                self.select_normal_path();
            }
            return;
        }

        if self.can_fastchg() {
            self.set_status(ChargeStatus::ReadyForFastchg);
        } else {
            self.select_normal_path();
        }
    }

    /// Monitoring shared by the steady states
    fn working_check(&mut self, now: Instant) {
        self.check_deviation();
        self.check_batt_full(now);
    }

    fn check_deviation(&mut self) {
        let t = &self.session.telemetry;
        if !self.session.is_deviation
            && t.freq_khz < self.param.freq_threshold_khz
            && t.iout_ma < DEVIATION_IOUT_MA
        {
            warn!("phone off center, freq {} kHz iout {} mA", t.freq_khz, t.iout_ma);
            self.session.is_deviation = true;
        }
    }

    fn check_batt_full(&mut self, _now: Instant) {
        let full = self.ctx.battery.is_full();
        if full && !self.session.batt_full {
            info!("battery full");
            self.session.batt_full = true;
            self.ctx.charger.vote_fcc(ChargerVoter::BattFull, Some(0));
        } else if !full && self.session.batt_full {
            info!("battery recharging");
            self.session.batt_full = false;
            self.ctx.charger.vote_fcc(ChargerVoter::BattFull, None);
        }

        if self.session.batt_full
            && !self.session.quiet_mode
            && !self.session.quiet_requested
            && self.session.adapter_type.is_fast()
            && self.session.telemetry.skin_temp <= self.param.quiet_skin_temp_max
        {
            self.request_quiet();
        }
    }

    /// Votes fast charge off for quiet mode, then asks the dock
    fn request_quiet(&mut self) {
        self.fastchg_disable.set(FastchgVoter::Quiet, true);
        if self.queue_cmd(DockCmd::SetQuietMode, 1) {
            self.session.quiet_requested = true;
            self.session.quiet_return = self.session.charge_status;
            self.set_status(ChargeStatus::ReadyForQuiet);
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        let due = self
            .session
            .last_heartbeat
            .map_or(true, |last| now - last >= HEARTBEAT_INTERVAL);
        if due && self.queue_cmd(DockCmd::Heartbeat, 0) {
            self.session.last_heartbeat = Some(now);
        }
    }

    fn start_ffc(&mut self, now: Instant) {
        info!("fast charge finished, ffc phase");
        self.session.ffc_start = Some(now);
        let charger = &mut self.ctx.charger;
        charger.vote_fv(ChargerVoter::Wlch, None);
        charger.vote_fv(ChargerVoter::Ffc, Some(self.param.ffc_fv_mv));
        charger.vote_fcc(ChargerVoter::Ffc, Some(self.param.ffc_curr_ua));
        self.set_status(ChargeStatus::FastChargingFfc);
    }

    fn ffc_check(&mut self, now: Instant) {
        let elapsed = self
            .session
            .ffc_start
            .map_or(Duration::from_ticks(0), |start| now - start);
        let timeout = Duration::from_secs(self.param.ffc_max_secs as u64);
        let done = self.ctx.battery.is_full();
        if done || elapsed >= timeout {
            info!("ffc phase over (full: {done})");
            self.ctx.charger.vote_fv(ChargerVoter::Ffc, None);
            self.ctx.charger.vote_fcc(ChargerVoter::Ffc, None);
            self.set_status(ChargeStatus::FastChargingFromPmic);
            self.handle_temp_region(self.session.temp_region);
        }
    }

    /// Charge pumps may be running
    pub(crate) fn cp_active(&self) -> bool {
        self.cp1_wdt.is_armed()
            || self.session.fastchg_started
            || self.session.fastchg_startup_step != crate::session::FastchgStartupStep::EnChgpump1
    }

    /// Receiver on or off from the diagnostic surface
    pub fn set_rx_enabled(&mut self, enable: bool) -> crate::error::Result<()> {
        self.ctx.rx.set_prop(RxProp::ChipEn, enable as i32)
    }
}
