//! Text diagnostic endpoints
//!
//! Every endpoint reads and writes short ASCII integers, separated by
//! spaces where an endpoint carries several values.

use alloc::format;
use alloc::string::String;

use log::info;

use crate::error::{Error, Result};
use crate::policy::{Platform, Wlchg};
use crate::rx::{RxChip, RxProp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAttr {
    TxEnable,
    Ftm,
    /// Read only
    Deviation,
    /// `epp_max epp_min fast_max fast_min`
    SkinThresholds,
    RxEnable,
    FreqThreshold,
    MatchQ,
    /// Read only
    ChargeStatus,
    /// Read only
    AdapterType,
}

impl DebugAttr {
    pub fn from_name(name: &str) -> Option<Self> {
        let attr = match name {
            "tx_enable" => DebugAttr::TxEnable,
            "ftm" => DebugAttr::Ftm,
            "deviation" => DebugAttr::Deviation,
            "skin_thresholds" => DebugAttr::SkinThresholds,
            "rx_enable" => DebugAttr::RxEnable,
            "freq_threshold" => DebugAttr::FreqThreshold,
            "match_q" => DebugAttr::MatchQ,
            "charge_status" => DebugAttr::ChargeStatus,
            "adapter_type" => DebugAttr::AdapterType,
            _ => return None,
        };
        Some(attr)
    }
}

fn parse_int<T: core::str::FromStr>(s: &str) -> Result<T> {
    s.trim().parse().map_err(|_| Error::Invalid)
}

fn parse_bool(s: &str) -> Result<bool> {
    Ok(parse_int::<i32>(s)? != 0)
}

impl<P: Platform> Wlchg<'_, P> {
    pub fn debug_show(&mut self, attr: DebugAttr) -> String {
        match attr {
            DebugAttr::TxEnable => format!("{}", self.session.tx_online as u8),
            DebugAttr::Ftm => format!("{}", self.ftm_requested as u8),
            DebugAttr::Deviation => format!("{}", self.session.is_deviation as u8),
            DebugAttr::SkinThresholds => format!(
                "{} {} {} {}",
                self.param.epp_skin_temp_max,
                self.param.epp_skin_temp_min,
                self.param.fastchg_skin_temp_max,
                self.param.fastchg_skin_temp_min
            ),
            DebugAttr::RxEnable => {
                let on = self.ctx.rx.get_prop(RxProp::ChipEn).unwrap_or(0);
                format!("{}", (on != 0) as u8)
            }
            DebugAttr::FreqThreshold => format!("{}", self.param.freq_threshold_khz),
            DebugAttr::MatchQ => format!("{}", self.param.match_q),
            DebugAttr::ChargeStatus => format!("{}", u8::from(self.session.charge_status)),
            DebugAttr::AdapterType => format!("{}", u8::from(self.session.adapter_type)),
        }
    }

    pub fn debug_store(&mut self, attr: DebugAttr, buf: &str) -> Result<()> {
        info!("debug store {attr:?}: {}", buf.trim());
        match attr {
            DebugAttr::TxEnable => self.enable_tx(parse_bool(buf)?),
            DebugAttr::Ftm => {
                self.request_ftm(parse_bool(buf)?);
                Ok(())
            }
            DebugAttr::SkinThresholds => {
                let mut vals = [0i32; 4];
                let mut fields = buf.split_whitespace();
                for v in vals.iter_mut() {
                    *v = parse_int(fields.next().ok_or(Error::Invalid)?)?;
                }
                let [epp_max, epp_min, fast_max, fast_min] = vals;
                if fields.next().is_some() || epp_min >= epp_max || fast_min >= fast_max {
                    return Err(Error::Invalid);
                }
                self.param.epp_skin_temp_max = epp_max;
                self.param.epp_skin_temp_min = epp_min;
                self.param.fastchg_skin_temp_max = fast_max;
                self.param.fastchg_skin_temp_min = fast_min;
                Ok(())
            }
            DebugAttr::RxEnable => self.set_rx_enabled(parse_bool(buf)?),
            DebugAttr::FreqThreshold => {
                self.param.freq_threshold_khz = parse_int(buf)?;
                Ok(())
            }
            DebugAttr::MatchQ => {
                self.param.match_q = parse_int(buf)?;
                Ok(())
            }
            DebugAttr::Deviation | DebugAttr::ChargeStatus | DebugAttr::AdapterType => {
                Err(Error::Invalid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::WlchgDev;
    use crate::mock::engine;
    use crate::session::ChargeStatus;
    use crate::status::SharedStatus;

    #[test]
    fn test_names() {
        assert_eq!(DebugAttr::from_name("match_q"), Some(DebugAttr::MatchQ));
        assert_eq!(DebugAttr::from_name("nope"), None);
    }

    #[test]
    fn test_show_and_store() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);

        assert_eq!(wl.debug_show(DebugAttr::SkinThresholds), "400 370 420 380");
        assert!(wl.debug_store(DebugAttr::SkinThresholds, "410 360 430 390\n").is_ok());
        assert_eq!(wl.param.fastchg_skin_temp_min, 390);
        assert_eq!(
            wl.debug_store(DebugAttr::SkinThresholds, "360 410 430 390"),
            Err(Error::Invalid)
        );
        assert_eq!(wl.debug_store(DebugAttr::SkinThresholds, "1 2"), Err(Error::Invalid));

        assert!(wl.debug_store(DebugAttr::MatchQ, "0x44").is_err());
        assert!(wl.debug_store(DebugAttr::MatchQ, "80").is_ok());
        assert_eq!(wl.debug_show(DebugAttr::MatchQ), "80");
        assert!(wl.debug_store(DebugAttr::MatchQ, "300").is_err());

        assert!(wl.debug_store(DebugAttr::FreqThreshold, "125").is_ok());
        assert_eq!(wl.param.freq_threshold_khz, 125);

        assert!(wl.debug_store(DebugAttr::RxEnable, "0").is_ok());
        assert_eq!(wl.debug_show(DebugAttr::RxEnable), "0");

        assert!(wl.debug_store(DebugAttr::Ftm, "1").is_ok());
        assert_eq!(wl.debug_show(DebugAttr::Ftm), "1");

        wl.session.charge_status = ChargeStatus::EppWorking;
        assert_eq!(wl.debug_show(DebugAttr::ChargeStatus), "6");
        assert_eq!(wl.debug_store(DebugAttr::Deviation, "1"), Err(Error::Invalid));
    }

    #[test]
    fn test_tx_enable_endpoint() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let mut wl = engine(&dev, &status);
        assert!(wl.debug_store(DebugAttr::TxEnable, "1").is_ok());
        assert_eq!(wl.debug_show(DebugAttr::TxEnable), "1");
        assert!(wl.debug_store(DebugAttr::TxEnable, "0").is_ok());
        assert_eq!(wl.debug_show(DebugAttr::TxEnable), "0");
    }
}
