//! Run-loop timers for the static bun-webkit build.
//!
//! WTF schedules deferred work (incremental sweeping, GC activity callbacks)
//! through `WTFTimer__*` symbols that the embedder must export. Every timer is
//! serviced by one dispatcher thread that sleeps until the earliest deadline.

#![allow(unsafe_op_in_unsafe_fn)]

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ffi::c_void;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

type TimerCallback = unsafe extern "C" fn(*mut c_void);

struct Schedule {
    deadline: Option<Instant>,
    interval: Option<Duration>,
    // Bumped on every update/cancel so queued entries from earlier schedules are skipped
    generation: u64,
}

struct TimerState {
    callback: TimerCallback,
    user_data: *mut c_void,
    schedule: Mutex<Schedule>,
}

// SAFETY: user_data belongs to WTF, which expects the callback on a foreign thread
unsafe impl Send for TimerState {}
unsafe impl Sync for TimerState {}

/// Opaque handle returned to WTF.
pub struct WTFTimer {
    state: Arc<TimerState>,
}

struct Entry {
    deadline: Instant,
    generation: u64,
    state: Arc<TimerState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on deadline
        other.deadline.cmp(&self.deadline)
    }
}

struct Dispatcher {
    queue: Mutex<BinaryHeap<Entry>>,
    wake: Condvar,
}

static DISPATCHER: OnceLock<Option<Dispatcher>> = OnceLock::new();

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatcher() -> Option<&'static Dispatcher> {
    DISPATCHER
        .get_or_init(|| {
            thread::Builder::new()
                .name("wtf-timer".into())
                .spawn(run_dispatcher)
                .ok()
                .map(|_| Dispatcher {
                    queue: Mutex::new(BinaryHeap::new()),
                    wake: Condvar::new(),
                })
        })
        .as_ref()
}

fn run_dispatcher() {
    // The spawning call is still inside get_or_init; wait for it to publish
    let dispatcher = loop {
        match DISPATCHER.get() {
            Some(Some(dispatcher)) => break dispatcher,
            Some(None) => return,
            None => thread::yield_now(),
        }
    };

    let mut queue = lock(&dispatcher.queue);
    loop {
        let now = Instant::now();
        match queue.peek().map(|entry| entry.deadline) {
            None => {
                queue = dispatcher
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) if deadline > now => {
                queue = dispatcher
                    .wake
                    .wait_timeout(queue, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            Some(_) => {
                let Some(entry) = queue.pop() else { continue };
                drop(queue);
                fire(entry);
                queue = lock(&dispatcher.queue);
            }
        }
    }
}

fn enqueue(state: Arc<TimerState>, deadline: Instant, generation: u64) {
    if let Some(dispatcher) = dispatcher() {
        lock(&dispatcher.queue).push(Entry {
            deadline,
            generation,
            state,
        });
        dispatcher.wake.notify_one();
    }
}

fn fire(entry: Entry) {
    {
        let mut schedule = lock(&entry.state.schedule);
        if schedule.generation != entry.generation || schedule.deadline.is_none() {
            return;
        }
        schedule.deadline = None;
    }

    // SAFETY: WTF handed us this callback/user_data pair in WTFTimer__create
    unsafe { (entry.state.callback)(entry.state.user_data) };

    let mut schedule = lock(&entry.state.schedule);
    if schedule.generation != entry.generation {
        return;
    }
    if let Some(interval) = schedule.interval {
        let deadline = Instant::now() + interval;
        schedule.deadline = Some(deadline);
        let generation = schedule.generation;
        drop(schedule);
        enqueue(entry.state.clone(), deadline, generation);
    }
}

impl WTFTimer {
    fn update(&self, delay_seconds: f64, repeat: bool) {
        let delay = Duration::try_from_secs_f64(delay_seconds.max(0.0)).unwrap_or(Duration::MAX);
        let Some(deadline) = Instant::now().checked_add(delay) else {
            self.cancel();
            return;
        };

        let generation = {
            let mut schedule = lock(&self.state.schedule);
            schedule.generation += 1;
            schedule.deadline = Some(deadline);
            schedule.interval = repeat.then_some(delay);
            schedule.generation
        };
        enqueue(self.state.clone(), deadline, generation);
    }

    fn cancel(&self) {
        let mut schedule = lock(&self.state.schedule);
        schedule.generation += 1;
        schedule.deadline = None;
        schedule.interval = None;
    }

    fn deadline(&self) -> Option<Instant> {
        lock(&self.state.schedule).deadline
    }
}

/// # Safety
/// `user_data` must stay valid until `WTFTimer__deinit`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__create(
    callback: TimerCallback,
    user_data: *mut c_void,
) -> *mut WTFTimer {
    Box::into_raw(Box::new(WTFTimer {
        state: Arc::new(TimerState {
            callback,
            user_data,
            schedule: Mutex::new(Schedule {
                deadline: None,
                interval: None,
                generation: 0,
            }),
        }),
    }))
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__update(timer: *mut WTFTimer, delay_seconds: f64, repeat: bool) {
    if let Some(timer) = timer.as_ref() {
        timer.update(delay_seconds, repeat);
    }
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__cancel(timer: *mut WTFTimer) {
    if let Some(timer) = timer.as_ref() {
        timer.cancel();
    }
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__isActive(timer: *mut WTFTimer) -> bool {
    timer
        .as_ref()
        .is_some_and(|timer| timer.deadline().is_some())
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__secondsUntilTimer(timer: *mut WTFTimer) -> f64 {
    match timer.as_ref().and_then(WTFTimer::deadline) {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .as_secs_f64(),
        None => f64::INFINITY,
    }
}

/// # Safety
/// `timer` must come from `WTFTimer__create` and is invalid afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__deinit(timer: *mut WTFTimer) {
    if timer.is_null() {
        return;
    }
    let timer = Box::from_raw(timer);
    timer.cancel();
}

/// Imminent timers are already serviced by the dispatcher thread.
#[unsafe(no_mangle)]
pub extern "C" fn WTFTimer__runIfImminent() {}
