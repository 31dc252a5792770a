use core::{future::poll_fn, task::Poll};

use atomic_waker::AtomicWaker;
use embassy_sync::channel::Channel;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::DefaultRawMutex;

/// Number of timer expirations, that can be queued.
pub const TIMER_QUEUE_DEPTH: usize = 4;

/// The periodic timers of the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioTimer {
    Calibration,
    Ani,
}

/// Something the [Radio](crate::Radio) has to react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// The interrupt line fired at least once.
    Interrupt,
    Timer(RadioTimer),
}

/// Serializes interrupts and timer expirations into one stream of events.
///
/// Interrupts coalesce: the status registers are read, when the event is handled, so any number
/// of interrupts before that turn into a single [RadioEvent::Interrupt]. A pending interrupt is
/// always returned before queued timers.
pub struct RadioEvents {
    interrupt_pending: AtomicBool,
    interrupts: AtomicUsize,
    waker: AtomicWaker,
    timers: Channel<DefaultRawMutex, RadioTimer, TIMER_QUEUE_DEPTH>,
}
impl RadioEvents {
    pub const fn new() -> Self {
        Self {
            interrupt_pending: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
            waker: AtomicWaker::new(),
            timers: Channel::new(),
        }
    }
    /// Called from the interrupt handler.
    ///
    /// Returns `false`, if an interrupt was already pending.
    pub fn signal_interrupt(&self) -> bool {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
        let newly_pending = !self.interrupt_pending.swap(true, Ordering::Release);
        self.waker.wake();
        newly_pending
    }
    /// Called, when a timer armed through the [TimerScheduler](crate::TimerScheduler) expires.
    ///
    /// Returns `false`, if the event couldn't be queued.
    pub fn timer_expired(&self, timer: RadioTimer) -> bool {
        if self.timers.try_send(timer).is_err() {
            warn!("Timer queue full, dropping {:?}.", timer);
            return false;
        }
        true
    }
    /// The number of interrupts signaled so far.
    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::Relaxed)
    }
    /// Take the next event without waiting.
    pub fn try_next(&self) -> Option<RadioEvent> {
        if self.interrupt_pending.swap(false, Ordering::Acquire) {
            return Some(RadioEvent::Interrupt);
        }
        self.timers.try_receive().ok().map(RadioEvent::Timer)
    }
    /// Asynchronously wait for the next event.
    pub async fn next(&self) -> RadioEvent {
        poll_fn(|cx| {
            if let Some(event) = self.try_next() {
                return Poll::Ready(event);
            }
            self.waker.register(cx.waker());
            // An interrupt may have arrived before the waker was registered.
            if self.interrupt_pending.swap(false, Ordering::Acquire) {
                return Poll::Ready(RadioEvent::Interrupt);
            }
            self.timers.poll_receive(cx).map(RadioEvent::Timer)
        })
        .await
    }
    /// Drop all pending events.
    pub fn clear(&self) {
        self.interrupt_pending.store(false, Ordering::Relaxed);
        while self.timers.try_receive().is_ok() {}
    }
}
impl Default for RadioEvents {
    fn default() -> Self {
        Self::new()
    }
}
