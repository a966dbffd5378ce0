/// Cooperative task scheduler.
///
/// Tasks are futures. Each round the scheduler fires expired timers, then
/// polls every woken task in descending priority order. A task runs until
/// it suspends (`yield_now`, a `Delay`, or a stack call that has nothing to
/// report yet); there is no preemption between tasks, only interrupts.
///
/// A task's "stack" is its future: the descriptor's stack budget bounds
/// the size of the state machine that gets boxed at spawn time.
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::task::Wake;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll, Waker};

use crate::config::MAX_TASKS;
use crate::debug_println;

mod time;

pub use time::{Deadline, Delay, SysTick, Uptime};

/// Task priority. Higher runs first within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    pub const IDLE: Priority = Priority(0);

    pub const fn raised(self, by: u8) -> Priority {
        Priority(self.0 + by)
    }
}

/// Static description of a task.
#[derive(Debug, Clone, Copy)]
pub struct TaskDescriptor {
    pub name: &'static str,
    /// Bytes available for the task's future.
    pub stack_size: usize,
    pub priority: Priority,
}

impl TaskDescriptor {
    pub const fn new(name: &'static str, stack_size: usize, priority: Priority) -> Self {
        Self {
            name,
            stack_size,
            priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// The task's future does not fit its stack budget.
    StackTooSmall {
        name: &'static str,
        needed: usize,
        available: usize,
    },
    /// `MAX_TASKS` tasks are already live.
    TooManyTasks,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::StackTooSmall { name, needed, available } => write!(
                f,
                "task {} needs {} bytes of stack, {} available",
                name, needed, available
            ),
            SchedError::TooManyTasks => write!(f, "task table full"),
        }
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

struct Task {
    id: TaskId,
    desc: TaskDescriptor,
    future: TaskFuture,
    flag: Arc<WakeFlag>,
}

struct WakeFlag {
    woken: AtomicBool,
}

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.woken.store(true, Ordering::Release);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
    }
}

struct SpawnQueue {
    pending: Vec<Task>,
    next_id: u32,
    live: usize,
}

/// Handle for creating tasks, usable from inside running tasks.
#[derive(Clone)]
pub struct Spawner {
    queue: Rc<RefCell<SpawnQueue>>,
}

impl Spawner {
    /// Create a task. It starts running on the next scheduler round.
    pub fn spawn<F>(&self, desc: TaskDescriptor, future: F) -> Result<TaskId, SchedError>
    where
        F: Future<Output = ()> + 'static,
    {
        let needed = core::mem::size_of::<F>();
        if needed > desc.stack_size {
            return Err(SchedError::StackTooSmall {
                name: desc.name,
                needed,
                available: desc.stack_size,
            });
        }

        let mut queue = self.queue.borrow_mut();
        if queue.live >= MAX_TASKS {
            return Err(SchedError::TooManyTasks);
        }
        let id = TaskId(queue.next_id);
        queue.next_id += 1;
        queue.live += 1;
        queue.pending.push(Task {
            id,
            desc,
            future: Box::pin(future),
            flag: Arc::new(WakeFlag {
                woken: AtomicBool::new(true),
            }),
        });
        Ok(id)
    }
}

pub struct Scheduler {
    tasks: Vec<Task>,
    spawner: Spawner,
    tick: SysTick,
}

impl Scheduler {
    pub fn new(tick: SysTick) -> Self {
        Self {
            tasks: Vec::new(),
            spawner: Spawner {
                queue: Rc::new(RefCell::new(SpawnQueue {
                    pending: Vec::new(),
                    next_id: 0,
                    live: 0,
                })),
            },
            tick,
        }
    }

    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    pub fn tick(&self) -> &SysTick {
        &self.tick
    }

    /// One scheduling round. Returns how many tasks were polled.
    pub fn run_once(&mut self) -> usize {
        self.admit_pending();
        self.tick.fire_expired();

        let mut polled = 0;
        let mut i = 0;
        while i < self.tasks.len() {
            let task = &mut self.tasks[i];
            if !task.flag.woken.swap(false, Ordering::AcqRel) {
                i += 1;
                continue;
            }

            let waker = Waker::from(task.flag.clone());
            let mut cx = Context::from_waker(&waker);
            polled += 1;
            let poll = task.future.as_mut().poll(&mut cx);
            match poll {
                Poll::Ready(()) => {
                    let done = self.tasks.remove(i);
                    self.spawner.queue.borrow_mut().live -= 1;
                    debug_println!("[sched] task {} finished", done.desc.name);
                }
                Poll::Pending => i += 1,
            }
        }
        polled
    }

    /// Hand the CPU to the tasks for good. `idle` runs whenever a round
    /// finds nothing to do.
    pub fn start(mut self, idle: fn()) -> ! {
        debug_println!("[sched] starting with {} task(s)", self.live_tasks());
        loop {
            if self.run_once() == 0 {
                idle();
            }
        }
    }

    /// Tasks created and not yet finished.
    pub fn live_tasks(&self) -> usize {
        self.spawner.queue.borrow().live
    }

    /// Whether a task with this name is still live.
    pub fn is_live(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.desc.name == name)
            || self.spawner.queue.borrow().pending.iter().any(|t| t.desc.name == name)
    }

    pub fn descriptor(&self, id: TaskId) -> Option<TaskDescriptor> {
        self.tasks.iter().find(|t| t.id == id).map(|t| t.desc)
    }

    /// Move freshly spawned tasks into the run list, keeping it sorted by
    /// priority (stable, so equal priorities run in creation order).
    fn admit_pending(&mut self) {
        let mut queue = self.spawner.queue.borrow_mut();
        if queue.pending.is_empty() {
            return;
        }
        self.tasks.append(&mut queue.pending);
        drop(queue);
        self.tasks.sort_by(|a, b| b.desc.priority.cmp(&a.desc.priority));
    }
}

/// Yield execution once.
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}
