/// Scripted board parts for host tests.
///
/// Every mock keeps its observable state behind an `Arc<Mutex<..>>` so a
/// test can hold a handle while the firmware owns the part itself.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::{Duplex, MacDriver, MacError, PhyDriver, PhyStatus, Speed, StatusLed};
use crate::config::ETHERNET_MTU;

/// PHY that replays a fixed sequence of status words, then reports
/// "no change" forever.
pub struct ScriptedPhy {
    script: Arc<Mutex<VecDeque<PhyStatus>>>,
    applied: Arc<Mutex<Vec<MacSetting>>>,
}

/// A speed/duplex write the link monitor made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacSetting {
    Speed(Speed),
    Duplex(Duplex),
}

impl ScriptedPhy {
    pub fn new(script: &[PhyStatus]) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            applied: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle for appending more status words after the PHY is handed out.
    pub fn script(&self) -> Arc<Mutex<VecDeque<PhyStatus>>> {
        self.script.clone()
    }

    /// Handle for the speed/duplex writes seen so far.
    pub fn settings(&self) -> Arc<Mutex<Vec<MacSetting>>> {
        self.applied.clone()
    }

    /// Status word for a freshly negotiated link.
    pub fn connected(speed: Speed, duplex: Duplex) -> PhyStatus {
        let mut status = PhyStatus::CHANGED | PhyStatus::CONNECTED;
        if speed == Speed::Mbps100 {
            status |= PhyStatus::SPEED_100;
        }
        if duplex == Duplex::Full {
            status |= PhyStatus::FULL_DUPLEX;
        }
        status
    }

    /// Status word for a pulled cable.
    pub fn disconnected() -> PhyStatus {
        PhyStatus::CHANGED
    }
}

impl PhyDriver for ScriptedPhy {
    fn poll_link_status(&mut self) -> PhyStatus {
        self.script.lock().pop_front().unwrap_or(PhyStatus::empty())
    }

    fn set_speed(&mut self, speed: Speed) {
        self.applied.lock().push(MacSetting::Speed(speed));
    }

    fn set_duplex(&mut self, duplex: Duplex) {
        self.applied.lock().push(MacSetting::Duplex(duplex));
    }
}

/// LED bank that remembers every write.
pub struct RecordingLed {
    writes: Arc<Mutex<Vec<(u8, bool)>>>,
}

impl RecordingLed {
    pub fn new() -> Self {
        Self {
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn writes(&self) -> Arc<Mutex<Vec<(u8, bool)>>> {
        self.writes.clone()
    }

    /// Last value written to `index`, if any.
    pub fn state(writes: &Mutex<Vec<(u8, bool)>>, index: u8) -> Option<bool> {
        writes
            .lock()
            .iter()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|(_, on)| *on)
    }
}

impl Default for RecordingLed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLed for RecordingLed {
    fn set_led(&mut self, index: u8, on: bool) {
        self.writes.lock().push((index, on));
    }
}

/// MAC whose transmitted frames land in a shared queue: the far end of an
/// in-memory Ethernet wire.
pub struct CaptureMac {
    mac: [u8; 6],
    sent: Arc<Mutex<VecDeque<Vec<u8>>>>,
    rx_irq_enabled: Arc<Mutex<bool>>,
}

impl CaptureMac {
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            sent: Arc::new(Mutex::new(VecDeque::new())),
            rx_irq_enabled: Arc::new(Mutex::new(false)),
        }
    }

    pub fn sent(&self) -> Arc<Mutex<VecDeque<Vec<u8>>>> {
        self.sent.clone()
    }

    pub fn rx_irq_flag(&self) -> Arc<Mutex<bool>> {
        self.rx_irq_enabled.clone()
    }
}

impl MacDriver for CaptureMac {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), MacError> {
        if frame.len() > ETHERNET_MTU {
            return Err(MacError::FrameTooLarge);
        }
        self.sent.lock().push_back(frame.to_vec());
        Ok(())
    }

    fn enable_rx_interrupt(&mut self) {
        *self.rx_irq_enabled.lock() = true;
    }
}

/// Deterministic entropy source.
pub struct FixedRng(pub u64);

impl rand_core::RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64
        let mut x = self.0.max(1);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
