//! The owning aggregate for one debug session.
//!
//! Everything the original design kept as process-wide singletons (focus,
//! kernel registry, notification record, attach state, clock) is a field
//! here, injected or owned, so a test can stand up as many independent
//! sessions as it likes.

use crate::api::{AttachState, DebugApi};
use crate::error::Result;
use crate::focus::FocusState;
use crate::host::{HostDebugger, UiSink};
use crate::kernels::KernelRegistry;
use crate::notify::{NotificationChannel, PosixTrapSender, TrapSender};
use crate::options::Options;
use crate::state::{CudaSystem, DeviceState};
use std::sync::Arc;

pub struct Session {
    pub(crate) api: Box<dyn DebugApi>,
    pub(crate) host: Box<dyn HostDebugger>,
    pub(crate) ui: Box<dyn UiSink>,
    pub(crate) options: Options,
    pub(crate) system: CudaSystem,
    pub(crate) kernels: KernelRegistry,
    pub(crate) focus: FocusState,
    pub(crate) notify: Arc<NotificationChannel>,
    /// The UI's notion of the current GPU context: (device, context id).
    pub(crate) current_context: Option<(u32, u64)>,
    /// Monotonic stop counter; ticks once per event-drain cycle.
    pub(crate) clock: u64,
}

impl Session {
    /// Builds a session with the platform SIGTRAP sender.
    pub fn new(
        api: Box<dyn DebugApi>,
        host: Box<dyn HostDebugger>,
        ui: Box<dyn UiSink>,
        options: Options,
    ) -> Self {
        let sender: Box<dyn TrapSender> = Box::new(PosixTrapSender);
        Self::with_trap_sender(api, host, ui, options, sender)
    }

    pub fn with_trap_sender(
        api: Box<dyn DebugApi>,
        host: Box<dyn HostDebugger>,
        ui: Box<dyn UiSink>,
        options: Options,
        sender: Box<dyn TrapSender>,
    ) -> Self {
        let trace = options.debug_notifications;
        Self {
            api,
            host,
            ui,
            options,
            system: CudaSystem::default(),
            kernels: KernelRegistry::new(),
            focus: FocusState::default(),
            notify: Arc::new(NotificationChannel::new(sender, trace)),
            current_context: None,
            clock: 0,
        }
    }

    /// Allocates the device array from the port's device count.
    pub fn initialize(&mut self) -> Result<()> {
        let n = {
            let Self { api, system, .. } = self;
            system.num_devices.get_or_fetch(|| api.get_num_devices())?
        };
        if self.system.devices.len() != n as usize {
            self.system.devices = (0..n).map(DeviceState::new).collect();
        }
        Ok(())
    }

    /// Tears the mirror down. The session may be re-initialized afterwards.
    pub fn finalize(&mut self) {
        self.system = CudaSystem::default();
        self.kernels = KernelRegistry::new();
        self.focus = FocusState::default();
        self.current_context = None;
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub(crate) fn tick_clock(&mut self) {
        self.clock += 1;
    }

    /// Shared handle for the debug-API callback thread.
    pub fn notification(&self) -> Arc<NotificationChannel> {
        Arc::clone(&self.notify)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn current_context(&self) -> Option<(u32, u64)> {
        self.current_context
    }

    pub(crate) fn attach_in_progress(&mut self) -> bool {
        self.api.get_attach_state() == AttachState::InProgress
    }
}
