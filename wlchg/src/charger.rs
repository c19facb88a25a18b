//! System charger and battery collaborators
//!
//! The main charger is shared with the wired charging path. The policy only
//! casts and retracts its own named votes; resolving them is the charger
//! stack's business.

use core::fmt::{self, Display, Formatter};

use crate::error::Result;

/// Vote owners this policy uses on the main charger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerVoter {
    /// Temperature region ceilings
    Wlch,
    /// EPP skin temperature stages
    Skin,
    BattFull,
    /// Charging paused while the charge pumps start
    Fastchg,
    Ffc,
    /// User requested pause
    User,
}

impl ChargerVoter {
    pub const ALL: [ChargerVoter; 6] = [
        ChargerVoter::Wlch,
        ChargerVoter::Skin,
        ChargerVoter::BattFull,
        ChargerVoter::Fastchg,
        ChargerVoter::Ffc,
        ChargerVoter::User,
    ];
}

impl Display for ChargerVoter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ChargerVoter::Wlch => write!(f, "WLCH_VOTER"),
            ChargerVoter::Skin => write!(f, "SKIN_VOTER"),
            ChargerVoter::BattFull => write!(f, "BATT_FULL_VOTER"),
            ChargerVoter::Fastchg => write!(f, "FASTCHG_VOTER"),
            ChargerVoter::Ffc => write!(f, "FFC_VOTER"),
            ChargerVoter::User => write!(f, "USER_VOTER"),
        }
    }
}

/// Main (PMIC) charger. `None` retracts a vote.
pub trait MainCharger {
    /// Battery charge current, uA
    fn vote_fcc(&mut self, voter: ChargerVoter, ua: Option<u32>);

    /// Float voltage, mV
    fn vote_fv(&mut self, voter: ChargerVoter, mv: Option<u32>);

    /// Input current limit on the wireless input, uA
    fn vote_icl(&mut self, voter: ChargerVoter, ua: Option<u32>);

    /// Stops battery charging while any voter asks for it
    fn vote_suspend(&mut self, voter: ChargerVoter, suspend: bool);

    fn input_voltage_mv(&mut self) -> Result<u32>;

    fn input_current_ua(&mut self) -> Result<u32>;

    /// Boost output feeding the receiver in reverse mode
    fn set_otg(&mut self, enable: bool) -> Result<()>;

    /// Retracts every vote this policy may hold
    fn unvote_all(&mut self) {
        for voter in ChargerVoter::ALL {
            self.vote_fcc(voter, None);
            self.vote_fv(voter, None);
            self.vote_icl(voter, None);
            self.vote_suspend(voter, false);
        }
    }
}

/// Battery and skin sensors
pub trait Battery {
    /// deci-degrees Celsius
    fn temperature(&mut self) -> Result<i32>;

    fn voltage_mv(&mut self) -> Result<u32>;

    /// Positive while charging
    fn current_ua(&mut self) -> Result<i32>;

    /// Percent
    fn soc(&mut self) -> Result<u32>;

    /// deci-degrees Celsius
    fn skin_temperature(&mut self) -> Result<i32>;

    fn is_present(&mut self) -> bool;

    /// Charger reports charge termination
    fn is_full(&mut self) -> bool;
}
