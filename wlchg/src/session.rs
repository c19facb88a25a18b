//! Per-dock session state

use core::fmt::{self, Display, Formatter};

use embassy_time::Instant;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::{ChargeParam, TEMP_BOUND_COUNT};
use crate::rx::RxRunMode;

/// Top-level charging state
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ChargeStatus {
    Default = 0,
    ReadyForBpp = 1,
    Bpp = 2,
    BppWorking = 3,
    ReadyForEpp = 4,
    Epp = 5,
    EppWorking = 6,
    ReadyForFastchg = 7,
    WaitingForTxIntoFastchg = 8,
    IncreaseVoltage = 9,
    FastChargingFromChgpump = 10,
    FastChargingExit = 11,
    FastChargingWaitExit = 12,
    FastChargingFfc = 13,
    FastChargingFromPmic = 14,
    ReadyForQuiet = 15,
    WaitDisableBattCharge = 16,
    DisableBattCharge = 17,
    ReadyForFtm = 18,
    FtmWorking = 19,
}

impl ChargeStatus {
    /// Steady states where only monitoring happens
    pub fn is_working(self) -> bool {
        matches!(
            self,
            ChargeStatus::BppWorking
                | ChargeStatus::EppWorking
                | ChargeStatus::FtmWorking
                | ChargeStatus::FastChargingFromPmic
        )
    }

    /// States in which the charge pumps are running or being brought up
    pub fn is_chgpump(self) -> bool {
        matches!(
            self,
            ChargeStatus::IncreaseVoltage | ChargeStatus::FastChargingFromChgpump
        )
    }
}

impl Display for ChargeStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            ChargeStatus::Default => "DEFAULT",
            ChargeStatus::ReadyForBpp => "READY_FOR_BPP",
            ChargeStatus::Bpp => "BPP",
            ChargeStatus::BppWorking => "BPP_WORKING",
            ChargeStatus::ReadyForEpp => "READY_FOR_EPP",
            ChargeStatus::Epp => "EPP",
            ChargeStatus::EppWorking => "EPP_WORKING",
            ChargeStatus::ReadyForFastchg => "READY_FOR_FASTCHG",
            ChargeStatus::WaitingForTxIntoFastchg => "WAITING_FOR_TX_INTO_FASTCHG",
            ChargeStatus::IncreaseVoltage => "INCREASE_VOLTAGE",
            ChargeStatus::FastChargingFromChgpump => "FAST_CHARGING_FROM_CHGPUMP",
            ChargeStatus::FastChargingExit => "FAST_CHARGING_EXIT",
            ChargeStatus::FastChargingWaitExit => "FAST_CHARGING_WAIT_EXIT",
            ChargeStatus::FastChargingFfc => "FAST_CHARGING_FFC",
            ChargeStatus::FastChargingFromPmic => "FAST_CHARGING_FROM_PMIC",
            ChargeStatus::ReadyForQuiet => "READY_FOR_QUIET",
            ChargeStatus::WaitDisableBattCharge => "WAIT_DISABLE_BATT_CHARGE",
            ChargeStatus::DisableBattCharge => "DISABLE_BATT_CHARGE",
            ChargeStatus::ReadyForFtm => "READY_FOR_FTM",
            ChargeStatus::FtmWorking => "FTM_WORKING",
        };
        write!(f, "{name}")
    }
}

/// Transmitter class reported by the dock
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AdapterType {
    Unknown = 0,
    Usb = 1,
    Normal = 2,
    FastchargeDash = 3,
    FastchargeWarp = 4,
    Epp = 5,
}

impl AdapterType {
    pub fn is_fast(self) -> bool {
        matches!(self, AdapterType::FastchargeDash | AdapterType::FastchargeWarp)
    }
}

impl Display for AdapterType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            AdapterType::Unknown => write!(f, "unknown"),
            AdapterType::Usb => write!(f, "usb"),
            AdapterType::Normal => write!(f, "normal"),
            AdapterType::FastchargeDash => write!(f, "dash"),
            AdapterType::FastchargeWarp => write!(f, "warp"),
            AdapterType::Epp => write!(f, "epp"),
        }
    }
}

/// Power class the dock agreed to after the fast charge request
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ChargeType {
    Unknown = 0,
    Bpp = 1,
    Epp = 2,
    Fast = 3,
}

/// Battery temperature band, coldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TempRegion {
    Cold = 0,
    LittleCold = 1,
    Cool = 2,
    LittleCool = 3,
    PreNormal = 4,
    Normal = 5,
    Warm = 6,
    Hot = 7,
}

impl TempRegion {
    pub const COUNT: usize = 8;

    pub fn index(self) -> usize {
        u8::from(self) as usize
    }

    /// Regions where charge pump fast charge may run
    pub fn allows_fastchg(self) -> bool {
        matches!(self, TempRegion::PreNormal | TempRegion::Normal)
    }
}

impl Display for TempRegion {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TempRegion::Cold => write!(f, "COLD"),
            TempRegion::LittleCold => write!(f, "LITTLE_COLD"),
            TempRegion::Cool => write!(f, "COOL"),
            TempRegion::LittleCool => write!(f, "LITTLE_COOL"),
            TempRegion::PreNormal => write!(f, "PRE_NORMAL"),
            TempRegion::Normal => write!(f, "NORMAL"),
            TempRegion::Warm => write!(f, "WARM"),
            TempRegion::Hot => write!(f, "HOT"),
        }
    }
}

/// Charge pump bring-up sequence, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FastchgStartupStep {
    EnChgpump1 = 0,
    WaitCp1Stable = 1,
    SetChgpump2Vol = 2,
    WaitPmicStable = 3,
    SetChgpump2VolAgain = 4,
    EnChgpump2 = 5,
    CheckChgpump2 = 6,
    CheckChgpump2Again = 7,
    EnPmicChg = 8,
}

impl Display for FastchgStartupStep {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FastchgStartupStep::EnChgpump1 => write!(f, "EN_CHGPUMP1"),
            FastchgStartupStep::WaitCp1Stable => write!(f, "WAIT_CP1_STABLE"),
            FastchgStartupStep::SetChgpump2Vol => write!(f, "SET_CHGPUMP2_VOL"),
            FastchgStartupStep::WaitPmicStable => write!(f, "WAIT_PMIC_STABLE"),
            FastchgStartupStep::SetChgpump2VolAgain => write!(f, "SET_CHGPUMP2_VOL_AGAIN"),
            FastchgStartupStep::EnChgpump2 => write!(f, "EN_CHGPUMP2"),
            FastchgStartupStep::CheckChgpump2 => write!(f, "CHECK_CHGPUMP2"),
            FastchgStartupStep::CheckChgpump2Again => write!(f, "CHECK_CHGPUMP2_AGAIN"),
            FastchgStartupStep::EnPmicChg => write!(f, "EN_PMIC_CHG"),
        }
    }
}

/// Latest measurements, refreshed every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Telemetry {
    /// deci-degrees Celsius
    pub batt_temp: i32,
    pub batt_vol_mv: u32,
    /// Positive while charging
    pub batt_curr_ua: i32,
    pub soc: u32,
    pub skin_temp: i32,
    pub vout_mv: u32,
    pub vrect_mv: u32,
    pub iout_ma: u32,
    pub freq_khz: u32,
}

/// All mutable state of one docked session.
///
/// Created when a dock is detected and reset as a whole on every connect
/// and disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeSession {
    pub charge_online: bool,
    pub dock_on: bool,
    pub tx_present: bool,
    pub tx_online: bool,

    pub charge_status: ChargeStatus,
    pub adapter_type: AdapterType,
    pub charge_type: ChargeType,
    pub run_mode: RxRunMode,
    pub telemetry: Telemetry,

    pub temp_region: TempRegion,
    /// Region boundaries with the hysteresis of the current region applied
    pub temp_bound: [i32; TEMP_BOUND_COUNT],
    /// Region handler has run at least once
    pub temp_region_init: bool,

    pub target_vol: u32,
    pub vol_set: u32,
    pub vol_set_ok: bool,
    pub vol_set_fast: bool,
    pub cep_ok_count: u32,
    pub vol_not_settled_ticks: u32,

    pub target_curr: u32,
    pub charge_current: u32,
    pub curr_limit_mode: bool,
    pub curr_need_dec: bool,
    pub curr_err_count: u32,
    pub cep_err_flag: bool,
    pub cep_bad_count: u32,

    pub fastchg_startup_step: FastchgStartupStep,
    pub fastchg_started: bool,
    pub cp1_err_count: u32,
    pub cp2_retry_count: u32,
    pub pmic_wait_ticks: u32,
    pub startup_cep_retries: u32,
    pub startup_cep_retry_at: Option<Instant>,
    pub fastchg_retry_count: u32,

    pub fastchg_level: usize,
    pub ffc_wait_until: Option<Instant>,
    pub fastchg_curr_step: usize,
    pub fastchg_skin_changed_at: Option<Instant>,
    pub ffc_start: Option<Instant>,

    pub epp_skin_step: usize,
    pub epp_skin_changed_at: Option<Instant>,

    /// Remaining ticks to wait for the adapter type reply
    pub heartbeat_count: u32,
    pub heartbeat_err_count: u32,
    pub last_heartbeat: Option<Instant>,
    pub adapter_requested: bool,

    /// Generic timeout counter of the current state
    pub wait_ticks: u32,

    pub quiet_mode: bool,
    pub quiet_requested: bool,
    pub quiet_return: ChargeStatus,
    pub batt_full: bool,
    pub is_deviation: bool,
    pub cep_timeout_count: u32,
    /// Last dock-reported CEP timeout
    pub cep_timeout_at: Option<Instant>,
    pub rx_nodev_count: u32,
    pub tx_id: u8,
}

/// Ticks the adapter type exchange may take before degrading
pub const ADAPTER_WAIT_TICKS: u32 = 20;

impl ChargeSession {
    pub fn new(param: &ChargeParam) -> Self {
        Self {
            charge_online: false,
            dock_on: false,
            tx_present: false,
            tx_online: false,
            charge_status: ChargeStatus::Default,
            adapter_type: AdapterType::Unknown,
            charge_type: ChargeType::Unknown,
            run_mode: RxRunMode::Other,
            telemetry: Telemetry::default(),
            temp_region: TempRegion::Normal,
            temp_bound: param.temp_bound,
            temp_region_init: false,
            target_vol: param.vout_min_default_mv,
            vol_set: param.vout_min_default_mv,
            vol_set_ok: false,
            vol_set_fast: false,
            cep_ok_count: 0,
            vol_not_settled_ticks: 0,
            target_curr: 0,
            charge_current: 0,
            curr_limit_mode: false,
            curr_need_dec: false,
            curr_err_count: 0,
            cep_err_flag: false,
            cep_bad_count: 0,
            fastchg_startup_step: FastchgStartupStep::EnChgpump1,
            fastchg_started: false,
            cp1_err_count: 0,
            cp2_retry_count: 0,
            pmic_wait_ticks: 0,
            startup_cep_retries: 0,
            startup_cep_retry_at: None,
            fastchg_retry_count: 0,
            fastchg_level: 0,
            ffc_wait_until: None,
            fastchg_curr_step: 0,
            fastchg_skin_changed_at: None,
            ffc_start: None,
            epp_skin_step: 0,
            epp_skin_changed_at: None,
            heartbeat_count: ADAPTER_WAIT_TICKS,
            heartbeat_err_count: 0,
            last_heartbeat: None,
            adapter_requested: false,
            wait_ticks: 0,
            quiet_mode: false,
            quiet_requested: false,
            quiet_return: ChargeStatus::Default,
            batt_full: false,
            is_deviation: false,
            cep_timeout_count: 0,
            cep_timeout_at: None,
            rx_nodev_count: 0,
            tx_id: 0,
        }
    }

    /// Restores every field to its default in one step
    pub fn reset(&mut self, param: &ChargeParam) {
        *self = Self::new(param);
    }

    /// Fast charge voltage floor applies
    pub fn is_fastchg_mode(&self) -> bool {
        self.charge_status.is_chgpump()
    }
}
