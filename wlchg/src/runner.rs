//! Async drivers for the engine's periodic work
//!
//! Each loop owns a [`TaskGate`]. Disconnect cancels every loop of the
//! session and waits until all of them stopped before the session is reset,
//! so no late tick can run against the fresh state.

use embassy_futures::join::join3;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use log::debug;

use crate::policy::{CHARGE_PERIOD, Platform, Wlchg};

/// Engine shared between the loops and the event handlers
pub type SharedWlchg<'a, P> = Mutex<CriticalSectionRawMutex, Wlchg<'a, P>>;

/// Cancellation handle of one loop
pub struct TaskGate {
    cancel: Signal<CriticalSectionRawMutex, ()>,
    stopped: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for TaskGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGate {
    pub const fn new() -> Self {
        Self {
            cancel: Signal::new(),
            stopped: Signal::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.signal(());
    }

    pub async fn wait_stopped(&self) {
        self.stopped.wait().await;
    }

    fn rearm(&self) {
        self.cancel.reset();
        self.stopped.reset();
    }

    /// Sleeps for `period`; false when cancelled first
    async fn sleep(&self, period: Duration) -> bool {
        match select(Timer::after(period), self.cancel.wait()).await {
            Either::First(_) => true,
            Either::Second(_) => false,
        }
    }
}

pub async fn charge_loop<P: Platform>(wl: &SharedWlchg<'_, P>, gate: &TaskGate) {
    loop {
        wl.lock().await.charge_tick(Instant::now());
        if !gate.sleep(CHARGE_PERIOD).await {
            break;
        }
    }
    debug!("charge loop stopped");
    gate.stopped.signal(());
}

pub async fn regulation_loop<P: Platform>(wl: &SharedWlchg<'_, P>, gate: &TaskGate) {
    loop {
        let next = wl.lock().await.regulation_tick(Instant::now());
        if !gate.sleep(next).await {
            break;
        }
    }
    debug!("regulation loop stopped");
    gate.stopped.signal(());
}

pub async fn watchdog_loop<P: Platform>(wl: &SharedWlchg<'_, P>, gate: &TaskGate) {
    loop {
        let next = wl.lock().await.cp1_watchdog_tick(Instant::now());
        if !gate.sleep(next).await {
            break;
        }
    }
    debug!("cp1 watchdog loop stopped");
    gate.stopped.signal(());
}

/// Reverse charging monitor; runs for as long as reverse charging is on
pub async fn tx_loop<P: Platform>(wl: &SharedWlchg<'_, P>, gate: &TaskGate) {
    gate.rearm();
    loop {
        let next = {
            let mut wl = wl.lock().await;
            if !wl.session().tx_online {
                break;
            }
            wl.tx_tick(Instant::now())
        };
        if !gate.sleep(next).await {
            break;
        }
    }
    debug!("tx loop stopped");
    gate.stopped.signal(());
}

/// Loops of one docked session
pub struct SessionTasks {
    charge: TaskGate,
    regulation: TaskGate,
    watchdog: TaskGate,
}

impl Default for SessionTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTasks {
    pub const fn new() -> Self {
        Self {
            charge: TaskGate::new(),
            regulation: TaskGate::new(),
            watchdog: TaskGate::new(),
        }
    }

    /// Starts the session and runs its loops until [`Self::disconnect`]
    pub async fn run<P: Platform>(&self, wl: &SharedWlchg<'_, P>) {
        for gate in [&self.charge, &self.regulation, &self.watchdog] {
            gate.rearm();
        }
        wl.lock().await.on_connect(Instant::now());
        join3(
            charge_loop(wl, &self.charge),
            regulation_loop(wl, &self.regulation),
            watchdog_loop(wl, &self.watchdog),
        )
        .await;
    }

    /// Stops every loop, then ends the session
    pub async fn disconnect<P: Platform>(&self, wl: &SharedWlchg<'_, P>) {
        let gates = [&self.charge, &self.regulation, &self.watchdog];
        for gate in gates {
            gate.cancel();
        }
        for gate in gates {
            gate.wait_stopped().await;
        }
        wl.lock().await.on_disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChargeParam;
    use crate::mailbox::{DockCmd, WlchgDev};
    use crate::mock::context;
    use crate::session::ChargeStatus;
    use crate::status::SharedStatus;
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    #[test]
    fn test_disconnect_stops_loops_before_reset() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let wl = Mutex::new(Wlchg::new(context(), ChargeParam::default(), &dev, &status));
        let tasks = SessionTasks::new();

        block_on(join(tasks.run(&wl), async {
            Timer::after_millis(1_200).await;
            {
                let mut guard = wl.lock().await;
                assert!(guard.session().charge_online);
                let sent = &guard.context().rx.sent;
                assert!(sent.iter().any(|(_, p)| p[0] == u8::from(DockCmd::GetAdapterType)));
            }
            tasks.disconnect(&wl).await;
        }));

        let mut guard = block_on(wl.lock());
        assert!(!guard.session().charge_online);
        assert_eq!(guard.session().charge_status, ChargeStatus::Default);
        assert!(guard.context().rx.vout_writes.is_empty());
        assert!(!status.get().charge_online);
    }

    #[test]
    fn test_tx_loop_ends_with_reverse_charge() {
        let dev = WlchgDev::new();
        let status = SharedStatus::new();
        let wl = Mutex::new(Wlchg::new(context(), ChargeParam::default(), &dev, &status));
        let gate = TaskGate::new();

        block_on(async {
            wl.lock().await.enable_tx(true).unwrap();
            join(tx_loop(&wl, &gate), async {
                Timer::after_millis(600).await;
                wl.lock().await.disable_tx();
                gate.wait_stopped().await;
            })
            .await;
        });
        assert!(!status.get().tx_online);
    }
}
