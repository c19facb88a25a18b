//! Status snapshot shared with readers outside the charge tick

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::session::{AdapterType, ChargeSession, ChargeStatus, TempRegion, Telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub charge_online: bool,
    pub tx_online: bool,
    pub tx_present: bool,
    pub charge_status: ChargeStatus,
    pub adapter_type: AdapterType,
    pub temp_region: TempRegion,
    pub is_deviation: bool,
    pub telemetry: Telemetry,
}

impl StatusSnapshot {
    pub const OFFLINE: StatusSnapshot = StatusSnapshot {
        charge_online: false,
        tx_online: false,
        tx_present: false,
        charge_status: ChargeStatus::Default,
        adapter_type: AdapterType::Unknown,
        temp_region: TempRegion::Normal,
        is_deviation: false,
        telemetry: Telemetry {
            batt_temp: 0,
            batt_vol_mv: 0,
            batt_curr_ua: 0,
            soc: 0,
            skin_temp: 0,
            vout_mv: 0,
            vrect_mv: 0,
            iout_ma: 0,
            freq_khz: 0,
        },
    };
}

impl From<&ChargeSession> for StatusSnapshot {
    fn from(s: &ChargeSession) -> Self {
        Self {
            charge_online: s.charge_online,
            tx_online: s.tx_online,
            tx_present: s.tx_present,
            charge_status: s.charge_status,
            adapter_type: s.adapter_type,
            temp_region: s.temp_region,
            is_deviation: s.is_deviation,
            telemetry: s.telemetry,
        }
    }
}

/// Last published session state
pub struct SharedStatus {
    inner: Mutex<CriticalSectionRawMutex, Cell<StatusSnapshot>>,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStatus {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(StatusSnapshot::OFFLINE)),
        }
    }

    pub fn get(&self) -> StatusSnapshot {
        self.inner.lock(Cell::get)
    }

    pub(crate) fn publish(&self, snapshot: StatusSnapshot) {
        self.inner.lock(|cell| cell.set(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChargeParam;

    #[test]
    fn test_publish() {
        let status = SharedStatus::new();
        assert_eq!(status.get(), StatusSnapshot::OFFLINE);

        let mut session = ChargeSession::new(&ChargeParam::default());
        session.charge_online = true;
        session.charge_status = ChargeStatus::EppWorking;
        session.telemetry.vout_mv = 10_000;
        status.publish(StatusSnapshot::from(&session));

        let snap = status.get();
        assert!(snap.charge_online);
        assert_eq!(snap.charge_status, ChargeStatus::EppWorking);
        assert_eq!(snap.telemetry.vout_mv, 10_000);
    }
}
