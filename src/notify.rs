//! SIGTRAP-based notification channel between the debug-API callback thread
//! and the main debugger thread.
//!
//! The producer (callback thread) calls [`NotificationChannel::notify`]; the
//! consumer (main thread) observes the stop, calls `analyze`, and finally
//! `mark_consumed`. The record is edge-triggered: while a notification is in
//! flight, further events only set the aliased flag and no second signal is
//! raised. Every public operation holds the mutex for its full body.
//!
//! Legal states, producer view: ready (`!sent && !pending_send`), pending
//! (`!sent && pending_send`), sent (`sent && !pending_send`). Consumer view:
//! none (`!sent && !received`), consumer-pending (`sent && !received`),
//! received (`sent && received`). `sent && pending_send` and
//! `!sent && received` are forbidden.

use std::fmt;
use std::sync::Mutex;

// ===============================================================================================
// Trap Delivery
// ===============================================================================================

/// Raises the attention signal in the inferior-side debugger process.
///
/// Injected so the channel is testable without raising real signals.
pub trait TrapSender: Send + Sync {
    /// Deliver SIGTRAP to one thread; true on success.
    fn send_trap(&self, tid: u32) -> bool;

    /// Threads to fall back over when direct delivery fails.
    fn host_threads(&self) -> Vec<u32>;

    /// Whether the platform can target a single thread at all.
    fn per_thread_signalling(&self) -> bool {
        true
    }
}

/// Production sender: `tgkill(2)` to the target thread, with the fallback
/// list enumerated from `/proc/self/task`.
#[derive(Debug, Default)]
pub struct PosixTrapSender;

impl TrapSender for PosixTrapSender {
    fn send_trap(&self, tid: u32) -> bool {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                libc::getpid(),
                tid as libc::pid_t,
                libc::SIGTRAP,
            )
        };
        ret == 0
    }

    fn host_threads(&self) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir("/proc/self/task") else {
            return Vec::new();
        };
        let mut tids: Vec<u32> = entries
            .filter_map(|e| e.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();
        tids
    }
}

// ===============================================================================================
// Record
// ===============================================================================================

/// What the producer wants delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Preferred target thread; 0 means "any host thread".
    pub tid: u32,
    /// A timeout re-delivery rather than a fresh event.
    pub timeout: bool,
}

/// Stop reason handed to `analyze` by the platform wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Stopped with the given signal number.
    Stopped(i32),
    Other,
}

#[derive(Debug, Default)]
struct NotificationState {
    initialized: bool,
    blocked: bool,
    pending_send: bool,
    aliased_event: bool,
    sent: bool,
    received: bool,
    /// Thread actually signalled.
    tid: u32,
    pending_payload: Option<NotificationPayload>,
}

impl NotificationState {
    fn assert_legal(&self) {
        debug_assert!(!(self.sent && self.pending_send));
        debug_assert!(self.sent || !self.received);
    }
}

pub struct NotificationChannel {
    sender: Box<dyn TrapSender>,
    /// Verbose tracing, from the `debug_notifications` option.
    trace: bool,
    state: Mutex<NotificationState>,
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl NotificationChannel {
    pub fn new(sender: Box<dyn TrapSender>, trace: bool) -> Self {
        Self {
            sender,
            trace,
            state: Mutex::new(NotificationState {
                initialized: true,
                ..NotificationState::default()
            }),
        }
    }

    /// Producer entry point, called from the debug-API callback thread.
    pub fn notify(&self, payload: NotificationPayload) {
        let mut st = self.state.lock().unwrap();
        debug_assert!(st.initialized);

        if payload.timeout {
            // Idempotent re-delivery of an unconsumed signal.
            if st.sent && !st.received {
                if self.trace {
                    tracing::debug!(target: "cudbg::notify", tid = st.tid, "timeout resend");
                }
                self.sender.send_trap(st.tid);
            }
            return;
        }

        if st.sent {
            st.aliased_event = true;
            if self.trace {
                tracing::debug!(target: "cudbg::notify", "notification in flight, aliasing event");
            }
        } else if st.pending_send {
            // Already buffered; nothing to add.
        } else if st.blocked {
            st.pending_payload = Some(payload);
            st.pending_send = true;
            if self.trace {
                tracing::debug!(target: "cudbg::notify", tid = payload.tid, "channel blocked, buffering");
            }
        } else {
            self.send_locked(&mut st, payload);
        }
        st.assert_legal();
    }

    fn send_locked(&self, st: &mut NotificationState, payload: NotificationPayload) {
        let mut signalled = None;
        if self.sender.per_thread_signalling() && payload.tid != 0 && self.sender.send_trap(payload.tid)
        {
            signalled = Some(payload.tid);
        }
        if signalled.is_none() {
            for tid in self.sender.host_threads() {
                if self.sender.send_trap(tid) {
                    signalled = Some(tid);
                    break;
                }
            }
        }
        match signalled {
            Some(tid) => {
                st.tid = tid;
                st.sent = true;
                if self.trace {
                    tracing::debug!(target: "cudbg::notify", tid, "trap signal sent");
                }
            }
            None => {
                tracing::warn!(target: "cudbg::notify", "trap delivery failed on every host thread");
            }
        }
    }

    /// Holds back sends until `accept`.
    pub fn block(&self) {
        self.state.lock().unwrap().blocked = true;
    }

    /// Lifts `block`; a buffered payload is delivered now.
    pub fn accept(&self) {
        let mut st = self.state.lock().unwrap();
        st.blocked = false;
        if st.pending_send {
            let payload = st.pending_payload.take().unwrap_or_default();
            st.pending_send = false;
            self.send_locked(&mut st, payload);
        }
        st.assert_legal();
    }

    /// Consumer-side classification of an observed stop.
    pub fn analyze(&self, stopped_tid: u32, status: WaitStatus, trap_expected: bool) {
        let mut st = self.state.lock().unwrap();
        if st.sent
            && st.tid == stopped_tid
            && status == WaitStatus::Stopped(libc::SIGTRAP)
            && !trap_expected
        {
            st.received = true;
            if self.trace {
                tracing::debug!(target: "cudbg::notify", tid = stopped_tid, "notification received");
            }
        }
        st.assert_legal();
    }

    /// Consumer is done with the in-flight notification.
    pub fn mark_consumed(&self) {
        let mut st = self.state.lock().unwrap();
        st.sent = false;
        st.received = false;
        st.tid = 0;
        st.assert_legal();
    }

    /// A signal was sent and not yet seen by the consumer.
    pub fn pending(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.sent && !st.received
    }

    pub fn received(&self) -> bool {
        self.state.lock().unwrap().received
    }

    pub fn aliased_event(&self) -> bool {
        self.state.lock().unwrap().aliased_event
    }

    pub fn reset_aliased_event(&self) {
        self.state.lock().unwrap().aliased_event = false;
    }

    /// Discards a buffered (blocked-time) payload without delivering it.
    pub fn consume_pending(&self) {
        let mut st = self.state.lock().unwrap();
        st.pending_send = false;
        st.pending_payload = None;
        st.assert_legal();
    }
}
