/// PHY link monitor.
///
/// Polls the PHY status flags and turns reported changes into interface
/// commands. Only `CHANGED` reports are acted on; the monitor keeps the last
/// state it applied so a repeated report touches neither the LED nor the MAC.
use super::netif::{LinkState, NetifCommand, NetifSender};
use crate::board::{Duplex, PhyDriver, PhyStatus, Speed, StatusLed};
use crate::config::{LINK_DEBOUNCE_MS, LINK_LED};
use crate::debug_println;
use crate::sched::{yield_now, SysTick};

/// Outcome of one PHY poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPoll {
    /// PHY reported nothing new.
    NoChange,
    /// PHY flagged a change that matches what is already applied.
    Unchanged,
    /// New link state; LED and MAC have been updated.
    Changed(LinkState),
}

pub struct LinkMonitor<P, L> {
    phy: P,
    led: L,
    applied: LinkState,
}

impl<P: PhyDriver, L: StatusLed> LinkMonitor<P, L> {
    pub fn new(phy: P, led: L) -> Self {
        Self {
            phy,
            led,
            applied: LinkState::Down,
        }
    }

    /// State most recently applied to LED and MAC.
    pub fn applied(&self) -> LinkState {
        self.applied
    }

    /// Read the PHY once and apply a reported change to the LED and MAC.
    pub fn poll_once(&mut self) -> LinkPoll {
        let status = self.phy.poll_link_status();
        if !status.contains(PhyStatus::CHANGED) {
            return LinkPoll::NoChange;
        }

        let state = decode(status);
        if state == self.applied {
            return LinkPoll::Unchanged;
        }

        match state {
            LinkState::Up { speed, duplex } => {
                self.led.set_led(LINK_LED, true);
                self.phy.set_speed(speed);
                self.phy.set_duplex(duplex);
            }
            LinkState::Down => self.led.set_led(LINK_LED, false),
        }
        self.applied = state;
        LinkPoll::Changed(state)
    }

    /// Monitor forever, posting every change to the interface.
    pub async fn run(mut self, sender: NetifSender, tick: SysTick) {
        loop {
            self.step(&sender, &tick).await;
        }
    }

    /// One monitor iteration: poll, post, settle.
    pub async fn step(&mut self, sender: &NetifSender, tick: &SysTick) -> LinkPoll {
        let poll = self.poll_once();
        match poll {
            LinkPoll::Changed(state) => {
                debug_println!("[link] {:?}", state);
                sender.send(NetifCommand::from(state)).await;
                tick.delay_ms(LINK_DEBOUNCE_MS).await;
            }
            LinkPoll::Unchanged => tick.delay_ms(LINK_DEBOUNCE_MS).await,
            LinkPoll::NoChange => yield_now().await,
        }
        poll
    }
}

fn decode(status: PhyStatus) -> LinkState {
    if !status.contains(PhyStatus::CONNECTED) {
        return LinkState::Down;
    }
    let speed = if status.contains(PhyStatus::SPEED_100) {
        Speed::Mbps100
    } else {
        Speed::Mbps10
    };
    let duplex = if status.contains(PhyStatus::FULL_DUPLEX) {
        Duplex::Full
    } else {
        Duplex::Half
    };
    LinkState::Up { speed, duplex }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::mock::{MacSetting, RecordingLed, ScriptedPhy};
    use crate::net::netif::mailbox;
    use alloc::vec::Vec;

    const UP100: LinkState = LinkState::Up {
        speed: Speed::Mbps100,
        duplex: Duplex::Full,
    };

    #[test]
    fn connect_then_disconnect() {
        let phy = ScriptedPhy::new(&[
            PhyStatus::empty(),
            ScriptedPhy::connected(Speed::Mbps100, Duplex::Full),
            PhyStatus::empty(),
            ScriptedPhy::disconnected(),
        ]);
        let settings = phy.settings();
        let led = RecordingLed::new();
        let writes = led.writes();
        let mut monitor = LinkMonitor::new(phy, led);

        let polls: Vec<LinkPoll> = (0..4).map(|_| monitor.poll_once()).collect();
        assert_eq!(
            polls,
            [
                LinkPoll::NoChange,
                LinkPoll::Changed(UP100),
                LinkPoll::NoChange,
                LinkPoll::Changed(LinkState::Down),
            ]
        );
        assert_eq!(*writes.lock(), [(LINK_LED, true), (LINK_LED, false)]);
        assert_eq!(
            *settings.lock(),
            [MacSetting::Speed(Speed::Mbps100), MacSetting::Duplex(Duplex::Full)]
        );
    }

    #[test]
    fn duplicate_connect_is_ignored() {
        let up = ScriptedPhy::connected(Speed::Mbps100, Duplex::Full);
        let phy = ScriptedPhy::new(&[up, up]);
        let settings = phy.settings();
        let led = RecordingLed::new();
        let writes = led.writes();
        let mut monitor = LinkMonitor::new(phy, led);

        assert_eq!(monitor.poll_once(), LinkPoll::Changed(UP100));
        assert_eq!(monitor.poll_once(), LinkPoll::Unchanged);
        assert_eq!(writes.lock().len(), 1);
        assert_eq!(settings.lock().len(), 2);
        assert_eq!(monitor.applied(), UP100);
    }

    #[test]
    fn disconnect_while_down_is_ignored() {
        let phy = ScriptedPhy::new(&[ScriptedPhy::disconnected()]);
        let led = RecordingLed::new();
        let writes = led.writes();
        let mut monitor = LinkMonitor::new(phy, led);
        assert_eq!(monitor.poll_once(), LinkPoll::Unchanged);
        assert!(writes.lock().is_empty());
    }

    #[test]
    fn ten_half_decodes() {
        let phy = ScriptedPhy::new(&[ScriptedPhy::connected(Speed::Mbps10, Duplex::Half)]);
        let mut monitor = LinkMonitor::new(phy, RecordingLed::new());
        assert_eq!(
            monitor.poll_once(),
            LinkPoll::Changed(LinkState::Up { speed: Speed::Mbps10, duplex: Duplex::Half })
        );
    }

    #[test]
    fn changes_are_posted_to_mailbox() {
        use crate::sched::{Priority, Scheduler, TaskDescriptor};

        let phy = ScriptedPhy::new(&[ScriptedPhy::connected(Speed::Mbps100, Duplex::Full)]);
        let monitor = LinkMonitor::new(phy, RecordingLed::new());
        let (tx, mut rx) = mailbox();
        let tick = SysTick::new();
        let mut sched = Scheduler::new(tick.clone());
        sched
            .spawner()
            .spawn(
                TaskDescriptor::new("link", 4096, Priority::IDLE),
                monitor.run(tx, tick.clone()),
            )
            .unwrap();

        sched.run_once();
        let mut seen = Vec::new();
        rx.drain(|c| seen.push(c));
        assert_eq!(seen, [NetifCommand::from(UP100)]);
        // Settling: the monitor sleeps until the debounce interval passes.
        assert_eq!(tick.pending_timers(), 1);
    }
}
