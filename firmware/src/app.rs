/// Application sequencing: hardware setup, interface bring-up, the stack and
/// echo tasks, and the link monitor loop.
///
/// ```text
/// run ─ setup_hardware ─ scheduler ─ "SetupIFx" ─ start (never returns)
///                                        │
///                                        ├─ NetStack::new (halt on failure)
///                                        ├─ spawn "tcpip"
///                                        ├─ enable MAC rx interrupts
///                                        ├─ spawn "server_netconn"
///                                        └─ link monitor loop + address report
/// ```
use alloc::boxed::Box;
use core::convert::Infallible;

use rand_core::RngCore;

use crate::board::{Board, MacDriver, Peripherals, PhyDriver, StatusLed};
use crate::config::{
    AddrMode, ADDR_MODE, LINK_LED, SERVER_PRIORITY, SERVER_STACK, SETUP_IF_PRIORITY,
    SETUP_IF_STACK, TCPIP_PRIORITY, TCPIP_STACK,
};
use crate::console;
use crate::debug_println;
use crate::echo::{echo_task, EchoConfig};
use crate::net::device::{EmacDevice, RxConsumer};
use crate::net::{mailbox, LinkMonitor, LinkPoll, LinkState, NetStack, StackHandle};
use crate::sched::{yield_now, SchedError, Scheduler, Spawner, SysTick, TaskDescriptor};

pub const SETUP_IF_TASK: TaskDescriptor =
    TaskDescriptor::new("SetupIFx", SETUP_IF_STACK, SETUP_IF_PRIORITY);
pub const TCPIP_TASK: TaskDescriptor = TaskDescriptor::new("tcpip", TCPIP_STACK, TCPIP_PRIORITY);
pub const SERVER_TASK: TaskDescriptor =
    TaskDescriptor::new("server_netconn", SERVER_STACK, SERVER_PRIORITY);

/// Board parts handed to the bring-up task.
pub struct BringUp<P, M, L> {
    pub phy: P,
    pub mac: M,
    pub led: L,
    pub tick: SysTick,
    pub rx: RxConsumer,
    /// Seed for smoltcp's ISN and port randomization.
    pub seed: u64,
}

/// Firmware entry point, called by the board's reset handler.
pub fn run<B: Board>(board: B) -> ! {
    let Peripherals {
        phy,
        mac,
        mut led,
        mut rng,
        tick,
        rx,
        console,
        idle,
    } = board.setup_hardware();

    // Unplugged until the PHY says otherwise.
    led.set_led(LINK_LED, false);
    if let Some(sink) = console {
        console::install(sink);
    }

    let parts = BringUp {
        phy,
        mac,
        led,
        tick,
        rx,
        seed: rng.next_u64(),
    };
    match build(parts, ADDR_MODE, EchoConfig::default()) {
        Ok(sched) => sched.start(idle),
        Err(e) => {
            debug_println!("[boot] {}", e);
            loop {
                idle();
            }
        }
    }
}

/// Create the scheduler with the bring-up task queued, ready to `start`.
pub fn build<P, M, L>(
    parts: BringUp<P, M, L>,
    mode: AddrMode,
    echo: EchoConfig,
) -> Result<Scheduler, SchedError>
where
    P: PhyDriver + 'static,
    M: MacDriver + Send + 'static,
    L: StatusLed + 'static,
{
    let sched = Scheduler::new(parts.tick.clone());
    let spawner = sched.spawner();
    sched
        .spawner()
        .spawn(SETUP_IF_TASK, setup_if(spawner, parts, mode, echo))?;
    Ok(sched)
}

/// Suspend the calling task forever.
pub async fn halt() -> Infallible {
    core::future::pending().await
}

async fn setup_if<P, M, L>(spawner: Spawner, parts: BringUp<P, M, L>, mode: AddrMode, echo: EchoConfig)
where
    P: PhyDriver + 'static,
    M: MacDriver + Send + 'static,
    L: StatusLed + 'static,
{
    debug_println!("[boot] ********************************");
    debug_println!("[boot] *     TCP echo server core     *");
    debug_println!("[boot] ********************************");

    let BringUp {
        phy,
        mac,
        led,
        tick,
        rx,
        seed,
    } = parts;

    let (sender, receiver) = mailbox();
    let device = EmacDevice::new(Box::new(mac), rx);
    let stack = match NetStack::new(&mode, device, seed, receiver, tick.clone()) {
        Ok(stack) => StackHandle::new(stack),
        Err(e) => {
            debug_println!("[boot] Net interface failed to initialize: {}", e);
            match halt().await {}
        }
    };

    if let Err(e) = spawner.spawn(TCPIP_TASK, stack_task(stack.clone())) {
        debug_println!("[boot] {}", e);
        match halt().await {}
    }

    stack.lock().enable_rx_interrupts();
    debug_println!("[boot] checkpoint before server session");

    if let Err(e) = spawner.spawn(SERVER_TASK, echo_task(stack.clone(), echo)) {
        debug_println!("[boot] {}", e);
        match halt().await {}
    }

    let mut monitor = LinkMonitor::new(phy, led);
    let mut reported = false;
    loop {
        // Report the address again after every re-plug; with DHCP that
        // is how a fresh lease shows up.
        if let LinkPoll::Changed(LinkState::Up { .. }) = monitor.step(&sender, &tick).await {
            reported = false;
        }
        if !reported {
            let status = stack.status();
            if status.is_addressed() {
                debug_println!("[net] IP_ADDR    : {}", status.address);
                debug_println!("[net] NET_MASK   : {}", status.netmask);
                debug_println!("[net] GATEWAY_IP : {}", status.gateway);
                reported = true;
            }
        }
    }
}

/// Body of the "tcpip" task.
async fn stack_task(stack: StackHandle) {
    loop {
        stack.poll();
        yield_now().await;
    }
}
