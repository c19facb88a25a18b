//! Message channel to the dock adapter process
//!
//! Three slots connect the engine to the cooperating adapter:
//! - a single message slot the adapter reads (`read`), rejected with
//!   [`Error::Busy`] while the previous message is unread,
//! - a single command slot shared by the adapter (`write`) and the engine,
//! - a short notification queue filled by `ioctl` and drained on the next
//!   charge tick.

use core::cell::Cell;
use core::fmt::{self, Display, Formatter};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};

pub const MSG_LEN: usize = 3;
pub const CMD_LEN: usize = 3;
pub const NOTIFY_QUEUE_LEN: usize = 4;

/// Proprietary packet header carrying dock commands
pub const DOCK_CMD_HEADER: u8 = 0x48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MsgType {
    /// `data` is the charge status code
    ChgInfo = 0,
    /// A dock command went out; `data` is the command, `remark` its argument
    CmdRequest = 1,
    /// The dock answered `data`
    CmdResult = 2,
    /// `data` ran out of retries
    CmdErr = 3,
}

/// Engine to adapter message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInfo {
    pub msg_type: MsgType,
    pub data: u8,
    pub remark: u8,
}

impl MsgInfo {
    pub fn new(msg_type: MsgType, data: u8, remark: u8) -> Self {
        Self {
            msg_type,
            data,
            remark,
        }
    }

    pub fn to_bytes(&self) -> [u8; MSG_LEN] {
        [self.msg_type.into(), self.data, self.remark]
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let [t, data, remark] = *buf else {
            return Err(Error::Invalid);
        };
        let msg_type = MsgType::try_from(t).map_err(|_| Error::Invalid)?;
        Ok(Self::new(msg_type, data, remark))
    }
}

/// Commands understood by the dock
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DockCmd {
    GetAdapterType = 0xA1,
    EnterFastchg = 0xA2,
    ExitFastchg = 0xA3,
    SetQuietMode = 0xA4,
    SetNormalMode = 0xA5,
    Heartbeat = 0xA6,
    MatchQ = 0xA7,
}

impl DockCmd {
    /// Commands that stay pending until the adapter reports the answer
    pub fn expects_reply(self) -> bool {
        !matches!(self, DockCmd::ExitFastchg | DockCmd::MatchQ)
    }
}

impl Display for DockCmd {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DockCmd::GetAdapterType => write!(f, "GET_ADAPTER_TYPE"),
            DockCmd::EnterFastchg => write!(f, "ENTER_FASTCHG"),
            DockCmd::ExitFastchg => write!(f, "EXIT_FASTCHG"),
            DockCmd::SetQuietMode => write!(f, "SET_QUIET_MODE"),
            DockCmd::SetNormalMode => write!(f, "SET_NORMAL_MODE"),
            DockCmd::Heartbeat => write!(f, "HEARTBEAT"),
            DockCmd::MatchQ => write!(f, "MATCH_Q"),
        }
    }
}

/// Pending dock command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdInfo {
    pub cmd: DockCmd,
    /// Command argument
    pub cmd_type: u8,
    /// Transmissions left
    pub retry_count: u8,
}

impl CmdInfo {
    pub fn new(cmd: DockCmd, cmd_type: u8, retry_count: u8) -> Self {
        Self {
            cmd,
            cmd_type,
            retry_count,
        }
    }

    pub fn to_bytes(&self) -> [u8; CMD_LEN] {
        [self.cmd.into(), self.cmd_type, self.retry_count]
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let [cmd, cmd_type, retry_count] = *buf else {
            return Err(Error::Invalid);
        };
        let cmd = DockCmd::try_from(cmd).map_err(|_| Error::Invalid)?;
        if retry_count == 0 {
            return Err(Error::Invalid);
        }
        Ok(Self::new(cmd, cmd_type, retry_count))
    }
}

/// Adapter notification codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NotifyCode {
    AdapterType = 1,
    AdapterTypeErr = 2,
    ChargeType = 3,
    ChargeTypeErr = 4,
    TxId = 5,
    TxIdErr = 6,
    QuietMode = 7,
    QuietModeErr = 8,
    NormalMode = 9,
    NormalModeErr = 10,
    ReadyForEpp = 11,
    WorkingInEpp = 12,
    Heartbeat = 13,
    HeartbeatErr = 14,
    CepTimeout = 15,
}

impl NotifyCode {
    /// Dock command this notification answers
    pub fn answers(self) -> Option<DockCmd> {
        match self {
            NotifyCode::AdapterType | NotifyCode::AdapterTypeErr => Some(DockCmd::GetAdapterType),
            NotifyCode::ChargeType | NotifyCode::ChargeTypeErr => Some(DockCmd::EnterFastchg),
            NotifyCode::QuietMode | NotifyCode::QuietModeErr => Some(DockCmd::SetQuietMode),
            NotifyCode::NormalMode | NotifyCode::NormalModeErr => Some(DockCmd::SetNormalMode),
            NotifyCode::Heartbeat | NotifyCode::HeartbeatErr => Some(DockCmd::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notify {
    pub code: NotifyCode,
    pub arg: u8,
}

/// Device end of the adapter channel
pub struct WlchgDev {
    msg: Channel<CriticalSectionRawMutex, MsgInfo, 1>,
    cmd: Mutex<CriticalSectionRawMutex, Cell<Option<CmdInfo>>>,
    notify: Channel<CriticalSectionRawMutex, Notify, NOTIFY_QUEUE_LEN>,
}

impl Default for WlchgDev {
    fn default() -> Self {
        Self::new()
    }
}

impl WlchgDev {
    pub const fn new() -> Self {
        Self {
            msg: Channel::new(),
            cmd: Mutex::new(Cell::new(None)),
            notify: Channel::new(),
        }
    }

    /// Posts a message for the adapter
    pub fn send_msg(&self, msg: MsgInfo) -> Result<()> {
        self.msg.try_send(msg).map_err(|_| Error::Busy)
    }

    /// Waits for the next message
    pub async fn read(&self) -> [u8; MSG_LEN] {
        self.msg.receive().await.to_bytes()
    }

    pub fn try_read(&self) -> Option<MsgInfo> {
        self.msg.try_receive().ok()
    }

    /// Adapter command submission
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        let cmd = CmdInfo::from_bytes(buf)?;
        self.queue_cmd(cmd)
    }

    /// Adapter notification
    pub fn ioctl(&self, code: u8, arg: u8) -> Result<()> {
        let code = NotifyCode::try_from(code).map_err(|_| Error::Invalid)?;
        self.notify
            .try_send(Notify { code, arg })
            .map_err(|_| Error::Busy)
    }

    pub fn queue_cmd(&self, cmd: CmdInfo) -> Result<()> {
        self.cmd.lock(|slot| {
            if slot.get().is_some() {
                Err(Error::Busy)
            } else {
                slot.set(Some(cmd));
                Ok(())
            }
        })
    }

    pub fn pending_cmd(&self) -> Option<CmdInfo> {
        self.cmd.lock(Cell::get)
    }

    pub(crate) fn replace_cmd(&self, cmd: Option<CmdInfo>) {
        self.cmd.lock(|slot| slot.set(cmd));
    }

    pub(crate) fn take_notify(&self) -> Option<Notify> {
        self.notify.try_receive().ok()
    }

    /// Drops everything pending
    pub fn clear(&self) {
        self.msg.clear();
        self.notify.clear();
        self.replace_cmd(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_msg_slot_rejects_when_full() {
        let dev = WlchgDev::new();
        let first = MsgInfo::new(MsgType::ChgInfo, 6, 0);
        assert!(dev.send_msg(first).is_ok());
        assert_eq!(dev.send_msg(MsgInfo::new(MsgType::ChgInfo, 7, 0)), Err(Error::Busy));
        assert_eq!(block_on(dev.read()), [0, 6, 0]);
        assert!(dev.send_msg(MsgInfo::new(MsgType::ChgInfo, 7, 0)).is_ok());
        assert_eq!(dev.try_read(), Some(MsgInfo::new(MsgType::ChgInfo, 7, 0)));
    }

    #[test]
    fn test_write_parses_and_rejects() {
        let dev = WlchgDev::new();
        assert_eq!(dev.write(&[0xA1, 0]), Err(Error::Invalid));
        assert_eq!(dev.write(&[0x11, 0, 3]), Err(Error::Invalid));
        assert_eq!(dev.write(&[0xA1, 0, 0]), Err(Error::Invalid));
        assert!(dev.write(&[0xA6, 0, 3]).is_ok());
        assert_eq!(dev.pending_cmd(), Some(CmdInfo::new(DockCmd::Heartbeat, 0, 3)));
        assert_eq!(dev.write(&[0xA1, 0, 3]), Err(Error::Busy));
    }

    #[test]
    fn test_notify_queue_bounded() {
        let dev = WlchgDev::new();
        assert_eq!(dev.ioctl(0, 0), Err(Error::Invalid));
        assert_eq!(dev.ioctl(16, 0), Err(Error::Invalid));
        for _ in 0..NOTIFY_QUEUE_LEN {
            assert!(dev.ioctl(13, 0).is_ok());
        }
        assert_eq!(dev.ioctl(13, 0), Err(Error::Busy));
        assert_eq!(
            dev.take_notify(),
            Some(Notify {
                code: NotifyCode::Heartbeat,
                arg: 0
            })
        );
    }

    #[test]
    fn test_clear() {
        let dev = WlchgDev::new();
        dev.send_msg(MsgInfo::new(MsgType::CmdErr, 0xA1, 0)).unwrap();
        dev.ioctl(1, 4).unwrap();
        dev.queue_cmd(CmdInfo::new(DockCmd::MatchQ, 0x44, 1)).unwrap();
        dev.clear();
        assert_eq!(dev.try_read(), None);
        assert_eq!(dev.take_notify(), None);
        assert_eq!(dev.pending_cmd(), None);
    }

    #[test]
    fn test_answers() {
        assert_eq!(NotifyCode::HeartbeatErr.answers(), Some(DockCmd::Heartbeat));
        assert_eq!(NotifyCode::CepTimeout.answers(), None);
        assert!(!DockCmd::MatchQ.expects_reply());
    }

    #[test]
    fn test_msg_bytes() {
        let msg = MsgInfo::new(MsgType::CmdResult, 0xA2, 3);
        assert_eq!(MsgInfo::from_bytes(&msg.to_bytes()), Ok(msg));
        assert_eq!(MsgInfo::from_bytes(&[9, 0, 0]), Err(Error::Invalid));
    }
}
