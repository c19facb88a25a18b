//! Named-vote arbitration
//!
//! Each policy source owns one voter slot. A [`Votable`] resolves the slots
//! either to the smallest value cast (current ceilings) or to "any voter
//! set" (disable reasons).

use core::fmt::{self, Display, Formatter};
use core::marker::PhantomData;

use log::debug;
use num_enum::IntoPrimitive;

const MAX_VOTERS: usize = 12;

/// How the votes of a [`Votable`] combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    /// Effective value is the minimum of all cast votes
    Min,
    /// Effective value is set while any voter is set
    SetAny,
}

/// Reasons that keep charge pump fast charge disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum FastchgVoter {
    HwErr,
    BattTemp,
    BattVol,
    Soc,
    Cep,
    StartupCep,
    Skin,
    Ffc,
    Quiet,
    Heartbeat,
}

impl Display for FastchgVoter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FastchgVoter::HwErr => write!(f, "HW_ERR"),
            FastchgVoter::BattTemp => write!(f, "BATT_TEMP"),
            FastchgVoter::BattVol => write!(f, "BATT_VOL"),
            FastchgVoter::Soc => write!(f, "SOC"),
            FastchgVoter::Cep => write!(f, "CEP"),
            FastchgVoter::StartupCep => write!(f, "STARTUP_CEP"),
            FastchgVoter::Skin => write!(f, "SKIN"),
            FastchgVoter::Ffc => write!(f, "FFC"),
            FastchgVoter::Quiet => write!(f, "QUIET"),
            FastchgVoter::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}

/// Contributors to the receiver output current ceiling during fast charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum CurrVoter {
    BattTemp,
    Skin,
    FfcLevel,
    Cep,
}

impl Display for CurrVoter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            CurrVoter::BattTemp => write!(f, "BATT_TEMP"),
            CurrVoter::Skin => write!(f, "SKIN"),
            CurrVoter::FfcLevel => write!(f, "FFC_LEVEL"),
            CurrVoter::Cep => write!(f, "CEP"),
        }
    }
}

/// Vote table over the voter enum `K`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Votable<K> {
    name: &'static str,
    kind: VoteKind,
    votes: [Option<u32>; MAX_VOTERS],
    _voter: PhantomData<K>,
}

impl<K> Votable<K>
where
    K: Copy + Into<u8> + Display,
{
    pub const fn new(name: &'static str, kind: VoteKind) -> Self {
        Self {
            name,
            kind,
            votes: [None; MAX_VOTERS],
            _voter: PhantomData,
        }
    }

    /// Casts (`Some`) or retracts (`None`) the vote of `voter`.
    /// Returns whether the effective value changed.
    pub fn vote(&mut self, voter: K, value: Option<u32>) -> bool {
        let before = self.effective();
        self.votes[voter.into() as usize] = value;
        let after = self.effective();
        if before != after {
            debug!("{}: {} -> {:?}, effective {:?}", self.name, voter, value, after);
        }
        before != after
    }

    /// Sets or clears a disable reason
    pub fn set(&mut self, voter: K, active: bool) -> bool {
        self.vote(voter, active.then_some(1))
    }

    pub fn get(&self, voter: K) -> Option<u32> {
        self.votes[voter.into() as usize]
    }

    pub fn is_voted(&self, voter: K) -> bool {
        self.get(voter).is_some()
    }

    pub fn effective(&self) -> Option<u32> {
        let mut cast = self.votes.iter().flatten().copied();
        match self.kind {
            VoteKind::Min => cast.min(),
            VoteKind::SetAny => cast.next().map(|_| 1),
        }
    }

    /// True while any vote is cast
    pub fn is_set(&self) -> bool {
        self.votes.iter().any(Option::is_some)
    }

    pub fn clear(&mut self) {
        self.votes = [None; MAX_VOTERS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_votable() {
        let mut v: Votable<CurrVoter> = Votable::new("WLCS_FCC", VoteKind::Min);
        assert_eq!(v.effective(), None);
        assert!(v.vote(CurrVoter::BattTemp, Some(1_500_000)));
        assert!(v.vote(CurrVoter::Skin, Some(900_000)));
        assert!(!v.vote(CurrVoter::FfcLevel, Some(1_200_000)));
        assert_eq!(v.effective(), Some(900_000));
        assert!(v.vote(CurrVoter::Skin, None));
        assert_eq!(v.effective(), Some(1_200_000));
    }

    #[test]
    fn test_set_any_votable() {
        let mut v: Votable<FastchgVoter> = Votable::new("FASTCHG_DISABLE", VoteKind::SetAny);
        assert!(!v.is_set());
        assert!(v.set(FastchgVoter::HwErr, true));
        assert!(!v.set(FastchgVoter::Skin, true));
        assert!(!v.set(FastchgVoter::HwErr, false));
        assert!(v.is_set());
        assert!(v.set(FastchgVoter::Skin, false));
        assert!(!v.is_set());
    }

    #[test]
    fn test_clear() {
        let mut v: Votable<FastchgVoter> = Votable::new("FASTCHG_DISABLE", VoteKind::SetAny);
        v.set(FastchgVoter::Quiet, true);
        v.set(FastchgVoter::Heartbeat, true);
        v.clear();
        assert!(!v.is_set());
        assert!(!v.is_voted(FastchgVoter::Quiet));
    }
}
