//! Charging parameters
//!
//! Every tunable of the policy lives in [`ChargeParam`]. The `Default`
//! implementation carries the fallback values; [`ChargeParam::load`]
//! overlays whatever a [`ConfigSource`] provides. Temperatures are in
//! deci-degrees Celsius, voltages in mV and currents in uA.

use log::warn;

use crate::session::TempRegion;

/// Number of temperature region boundaries (8 regions)
pub const TEMP_BOUND_COUNT: usize = 7;

/// Upper bound of the fast charge current step table
pub const FFC_STEP_MAX: usize = 6;

/// Length of the FOD coefficient block sent to the receiver
pub const FOD_PARAM_LEN: usize = drivers::p9415::FOD_PARAM_LEN;

/// Integers per FFC step entry in the configuration source
const FFC_STEP_FIELDS: usize = 6;

/// Current and voltage ceilings applied while in one temperature region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempRegionLimit {
    /// Main charger fast charge current
    pub fcc_ua: u32,
    /// Main charger float voltage
    pub fv_mv: u32,
    /// Input current limit in EPP mode
    pub epp_icl_ua: u32,
    /// Input current limit in BPP mode
    pub bpp_icl_ua: u32,
    /// Receiver output current ceiling while charging through the charge pumps,
    /// zero where fast charge is not allowed
    pub fastchg_curr_max_ua: u32,
}

impl TempRegionLimit {
    const fn new(fcc_ua: u32, fv_mv: u32, epp_icl_ua: u32, bpp_icl_ua: u32, fast: u32) -> Self {
        Self {
            fcc_ua,
            fv_mv,
            epp_icl_ua,
            bpp_icl_ua,
            fastchg_curr_max_ua: fast,
        }
    }
}

/// One level of the fast charge current step table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FfcStep {
    /// Fall back to the previous level below this battery temperature
    pub low_temp: i32,
    /// Advance to the next level above this battery temperature
    pub high_temp: i32,
    /// Receiver output current target at this level
    pub curr_ua: u32,
    /// Advance to the next level above this battery voltage
    pub vol_max_mv: u32,
    /// Hold the level for a while before evaluating it again
    pub need_wait: bool,
    /// Level may be left towards the previous (higher current) level
    pub allow_fallback: bool,
}

impl FfcStep {
    const fn new(
        low_temp: i32,
        high_temp: i32,
        curr_ua: u32,
        vol_max_mv: u32,
        need_wait: bool,
        allow_fallback: bool,
    ) -> Self {
        Self {
            low_temp,
            high_temp,
            curr_ua,
            vol_max_mv,
            need_wait,
            allow_fallback,
        }
    }
}

/// Static configuration, loaded once at initialization
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeParam {
    /// Region boundaries T0..T6 between COLD..HOT
    pub temp_bound: [i32; TEMP_BOUND_COUNT],
    pub temp_hyst: i32,
    /// Ceilings per [`TempRegion`], indexed by region
    pub region_limit: [TempRegionLimit; TempRegion::COUNT],

    pub vout_max_mv: u32,
    pub vout_min_default_mv: u32,
    pub vout_min_fastchg_mv: u32,
    pub vol_inc_step_max_mv: u32,
    pub vol_dec_step_max_mv: u32,
    pub bpp_vol_mv: u32,
    pub epp_vol_mv: u32,
    pub ftm_vol_mv: u32,
    /// Dock output voltage while charging through the main charger
    pub fastchg_exit_vol_mv: u32,
    /// Headroom above four times the battery voltage when starting the pumps
    pub cp_vol_offset_mv: u32,

    pub fastchg_soc_max: u32,
    pub fastchg_batt_vol_min_mv: u32,
    pub fastchg_batt_vol_max_mv: u32,
    pub fastchg_curr_min_ua: u32,
    pub fastchg_curr_step_ua: u32,
    /// Battery current ceiling while the charge pumps are running
    pub ibat_max_ua: u32,

    pub epp_skin_temp_max: i32,
    pub epp_skin_temp_min: i32,
    /// EPP input current for skin stages 1 and 2
    pub epp_skin_curr_ua: [u32; 2],
    pub fastchg_skin_temp_max: i32,
    pub fastchg_skin_temp_min: i32,
    pub quiet_skin_temp_max: i32,

    pub ffc_step: [FfcStep; FFC_STEP_MAX],
    pub ffc_step_count: usize,
    pub ffc_fv_mv: u32,
    pub ffc_curr_ua: u32,
    pub ffc_max_secs: u32,

    /// Operating frequency below which the phone counts as misaligned
    pub freq_threshold_khz: u32,
    pub match_q: u8,
    pub fod_param: [u8; FOD_PARAM_LEN],
}

impl Default for ChargeParam {
    fn default() -> Self {
        Self {
            temp_bound: [50, 80, 120, 160, 220, 420, 530],
            temp_hyst: 20,
            region_limit: [
                // COLD
                TempRegionLimit::new(0, 4_350, 0, 0, 0),
                // LITTLE_COLD
                TempRegionLimit::new(350_000, 4_350, 300_000, 300_000, 0),
                // COOL
                TempRegionLimit::new(1_000_000, 4_400, 600_000, 700_000, 0),
                // LITTLE_COOL
                TempRegionLimit::new(1_500_000, 4_400, 800_000, 1_000_000, 0),
                // PRE_NORMAL
                TempRegionLimit::new(2_000_000, 4_400, 1_100_000, 1_000_000, 1_000_000),
                // NORMAL
                TempRegionLimit::new(3_000_000, 4_400, 1_100_000, 1_000_000, 1_500_000),
                // WARM
                TempRegionLimit::new(1_000_000, 4_130, 600_000, 600_000, 0),
                // HOT
                TempRegionLimit::new(0, 4_130, 0, 0, 0),
            ],
            vout_max_mv: 20_000,
            vout_min_default_mv: 5_000,
            vout_min_fastchg_mv: 10_000,
            vol_inc_step_max_mv: 1_000,
            vol_dec_step_max_mv: 1_000,
            bpp_vol_mv: 5_000,
            epp_vol_mv: 10_000,
            ftm_vol_mv: 12_000,
            fastchg_exit_vol_mv: 10_000,
            cp_vol_offset_mv: 300,
            fastchg_soc_max: 90,
            fastchg_batt_vol_min_mv: 3_400,
            fastchg_batt_vol_max_mv: 4_420,
            fastchg_curr_min_ua: 300_000,
            fastchg_curr_step_ua: 100_000,
            ibat_max_ua: 6_000_000,
            epp_skin_temp_max: 400,
            epp_skin_temp_min: 370,
            epp_skin_curr_ua: [800_000, 600_000],
            fastchg_skin_temp_max: 420,
            fastchg_skin_temp_min: 380,
            quiet_skin_temp_max: 350,
            ffc_step: [
                FfcStep::new(0, 390, 1_500_000, 4_150, false, false),
                FfcStep::new(360, 410, 1_200_000, 4_250, true, true),
                FfcStep::new(390, 430, 900_000, 4_380, true, true),
                FfcStep::new(410, 450, 600_000, 4_420, true, false),
                FfcStep::default(),
                FfcStep::default(),
            ],
            ffc_step_count: 4,
            ffc_fv_mv: 4_450,
            ffc_curr_ua: 800_000,
            ffc_max_secs: 30 * 60,
            freq_threshold_khz: 130,
            match_q: 0x44,
            fod_param: [
                0xA0, 0x3C, 0xA0, 0x3C, 0xA0, 0x3C, 0x96, 0x1E, 0x96, 0x1E, 0x96, 0x1E, 0x96,
                0x1E, 0x96, 0x1E,
            ],
        }
    }
}

/// Read-only key/value store the parameters are loaded from
pub trait ConfigSource {
    /// Scalar lookup
    fn read_i32(&self, key: &str) -> Option<i32>;

    /// Array lookup; copies up to `out.len()` values and returns how many
    /// the key holds
    fn read_array(&self, key: &str, out: &mut [i32]) -> Option<usize>;
}

/// Slice-backed configuration, one entry per key
#[derive(Debug, Clone, Copy)]
pub struct StaticConfig<'a> {
    entries: &'a [(&'a str, &'a [i32])],
}

impl<'a> StaticConfig<'a> {
    pub const fn new(entries: &'a [(&'a str, &'a [i32])]) -> Self {
        Self { entries }
    }

    fn find(&self, key: &str) -> Option<&'a [i32]> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }
}

impl ConfigSource for StaticConfig<'_> {
    fn read_i32(&self, key: &str) -> Option<i32> {
        self.find(key).and_then(|v| v.first().copied())
    }

    fn read_array(&self, key: &str, out: &mut [i32]) -> Option<usize> {
        let values = self.find(key)?;
        let n = values.len().min(out.len());
        out[..n].copy_from_slice(&values[..n]);
        Some(values.len())
    }
}

fn load_i32(src: &impl ConfigSource, key: &str, field: &mut i32) {
    if let Some(v) = src.read_i32(key) {
        *field = v;
    }
}

fn load_u32(src: &impl ConfigSource, key: &str, field: &mut u32) {
    match src.read_i32(key).map(u32::try_from) {
        Some(Ok(v)) => *field = v,
        Some(Err(_)) => warn!("config {key}: negative value ignored"),
        None => {}
    }
}

/// Reads exactly `N` values or nothing
fn load_exact<const N: usize>(src: &impl ConfigSource, key: &str) -> Option<[i32; N]> {
    let mut buf = [0i32; N];
    match src.read_array(key, &mut buf) {
        Some(n) if n == N => Some(buf),
        Some(n) => {
            warn!("config {key}: expected {N} values, got {n}");
            None
        }
        None => None,
    }
}

fn load_region_u32(
    src: &impl ConfigSource,
    key: &str,
    limits: &mut [TempRegionLimit; TempRegion::COUNT],
    set: fn(&mut TempRegionLimit, u32),
) {
    if let Some(values) = load_exact::<{ TempRegion::COUNT }>(src, key) {
        if values.iter().any(|v| *v < 0) {
            warn!("config {key}: negative value, table ignored");
            return;
        }
        for (limit, v) in limits.iter_mut().zip(values) {
            set(limit, v as u32);
        }
    }
}

impl ChargeParam {
    /// Builds the parameters from `src`, falling back to the defaults for
    /// every absent or malformed entry
    pub fn load(src: &impl ConfigSource) -> Self {
        let mut p = Self::default();

        if let Some(bound) = load_exact::<TEMP_BOUND_COUNT>(src, "batt-temp-bound") {
            if bound.windows(2).all(|w| w[0] < w[1]) {
                p.temp_bound = bound;
            } else {
                warn!("config batt-temp-bound: not increasing, ignored");
            }
        }
        load_i32(src, "batt-temp-hyst", &mut p.temp_hyst);

        load_region_u32(src, "region-fcc-ua", &mut p.region_limit, |l, v| l.fcc_ua = v);
        load_region_u32(src, "region-fv-mv", &mut p.region_limit, |l, v| l.fv_mv = v);
        load_region_u32(src, "region-epp-icl-ua", &mut p.region_limit, |l, v| {
            l.epp_icl_ua = v
        });
        load_region_u32(src, "region-bpp-icl-ua", &mut p.region_limit, |l, v| {
            l.bpp_icl_ua = v
        });
        load_region_u32(src, "region-fastchg-curr-max-ua", &mut p.region_limit, |l, v| {
            l.fastchg_curr_max_ua = v
        });

        load_u32(src, "vout-max-mv", &mut p.vout_max_mv);
        load_u32(src, "vout-min-default-mv", &mut p.vout_min_default_mv);
        load_u32(src, "vout-min-fastchg-mv", &mut p.vout_min_fastchg_mv);
        load_u32(src, "vol-inc-step-max-mv", &mut p.vol_inc_step_max_mv);
        load_u32(src, "vol-dec-step-max-mv", &mut p.vol_dec_step_max_mv);
        load_u32(src, "bpp-vol-mv", &mut p.bpp_vol_mv);
        load_u32(src, "epp-vol-mv", &mut p.epp_vol_mv);
        load_u32(src, "ftm-vol-mv", &mut p.ftm_vol_mv);
        load_u32(src, "fastchg-exit-vol-mv", &mut p.fastchg_exit_vol_mv);
        load_u32(src, "cp-vol-offset-mv", &mut p.cp_vol_offset_mv);

        load_u32(src, "fastchg-soc-max", &mut p.fastchg_soc_max);
        load_u32(src, "fastchg-batt-vol-min-mv", &mut p.fastchg_batt_vol_min_mv);
        load_u32(src, "fastchg-batt-vol-max-mv", &mut p.fastchg_batt_vol_max_mv);
        load_u32(src, "fastchg-curr-min-ua", &mut p.fastchg_curr_min_ua);
        load_u32(src, "fastchg-curr-step-ua", &mut p.fastchg_curr_step_ua);
        load_u32(src, "ibat-max-ua", &mut p.ibat_max_ua);

        load_i32(src, "epp-skin-temp-max", &mut p.epp_skin_temp_max);
        load_i32(src, "epp-skin-temp-min", &mut p.epp_skin_temp_min);
        if let Some([a, b]) = load_exact::<2>(src, "epp-skin-curr-ua") {
            if a >= 0 && b >= 0 {
                p.epp_skin_curr_ua = [a as u32, b as u32];
            }
        }
        load_i32(src, "fastchg-skin-temp-max", &mut p.fastchg_skin_temp_max);
        load_i32(src, "fastchg-skin-temp-min", &mut p.fastchg_skin_temp_min);
        load_i32(src, "quiet-skin-temp-max", &mut p.quiet_skin_temp_max);

        p.load_ffc_steps(src);
        load_u32(src, "ffc-fv-mv", &mut p.ffc_fv_mv);
        load_u32(src, "ffc-curr-ua", &mut p.ffc_curr_ua);
        load_u32(src, "ffc-max-secs", &mut p.ffc_max_secs);

        load_u32(src, "freq-threshold-khz", &mut p.freq_threshold_khz);
        if let Some(q) = src.read_i32("match-q").and_then(|v| u8::try_from(v).ok()) {
            p.match_q = q;
        }
        if let Some(fod) = load_exact::<FOD_PARAM_LEN>(src, "fod-param") {
            let mut bytes = [0u8; FOD_PARAM_LEN];
            let valid = bytes
                .iter_mut()
                .zip(fod)
                .all(|(b, v)| u8::try_from(v).map(|v| *b = v).is_ok());
            if valid {
                p.fod_param = bytes;
            } else {
                warn!("config fod-param: value out of range, ignored");
            }
        }

        p
    }

    fn load_ffc_steps(&mut self, src: &impl ConfigSource) {
        let mut raw = [0i32; FFC_STEP_MAX * FFC_STEP_FIELDS];
        let Some(n) = src.read_array("ffc-step", &mut raw) else {
            return;
        };
        if n == 0 || n % FFC_STEP_FIELDS != 0 || n / FFC_STEP_FIELDS > FFC_STEP_MAX {
            warn!("config ffc-step: bad length {n}, ignored");
            return;
        }
        let count = n / FFC_STEP_FIELDS;
        let mut steps = [FfcStep::default(); FFC_STEP_MAX];
        for (step, e) in steps.iter_mut().zip(raw.chunks_exact(FFC_STEP_FIELDS)).take(count) {
            if e[2] < 0 || e[3] < 0 {
                warn!("config ffc-step: negative current or voltage, ignored");
                return;
            }
            *step = FfcStep::new(e[0], e[1], e[2] as u32, e[3] as u32, e[4] != 0, e[5] != 0);
        }
        self.ffc_step = steps;
        self.ffc_step_count = count;
    }

    /// Ceilings for `region`
    pub fn limit(&self, region: TempRegion) -> &TempRegionLimit {
        &self.region_limit[region.index()]
    }

    /// Active part of the fast charge step table
    pub fn ffc_steps(&self) -> &[FfcStep] {
        &self.ffc_step[..self.ffc_step_count]
    }
}
