//! Drains the debug-API event queues and applies each event to the
//! registries.
//!
//! Events are applied strictly in queue order; the per-kind semantics depend
//! on it (a push must see its earlier create). After a drain the host
//! breakpoints are removed and re-inserted exactly once, since kernel
//! launches in the drain may have changed their resolution, and the session
//! clock ticks, so all timestamps taken before the next drain compare equal.

use crate::api::{AttachState, CudaEvent, EventQueueKind, KernelType};
use crate::contexts::{Context, Module};
use crate::error::{Error, Result};
use crate::kernels::KernelLaunch;
use crate::session::Session;

/// The wire encoding of "no thread": fatal in every event that carries one.
const INVALID_TID: u32 = !0;

impl Session {
    // ===========================================================================================
    // Drain
    // ===========================================================================================

    pub fn process_events(&mut self, queue: EventQueueKind) -> Result<()> {
        loop {
            let event = match queue {
                EventQueueKind::Sync => self.api.get_next_sync_event()?,
                EventQueueKind::Async => self.api.get_next_async_event()?,
            };
            if event == CudaEvent::Invalid {
                break;
            }
            tracing::trace!(target: "cudbg::events", ?event, "processing");
            self.process_event(event)?;
        }
        self.post_process_events();
        self.tick_clock();
        Ok(())
    }

    /// Applies a single event. Exposed for replaying recorded traces.
    pub fn process_event(&mut self, event: CudaEvent) -> Result<()> {
        match event {
            CudaEvent::CtxCreate { dev, context_id, tid } => self.ctx_create(dev, context_id, tid),
            CudaEvent::CtxDestroy { dev, context_id, tid } => self.ctx_destroy(dev, context_id, tid),
            CudaEvent::CtxPush { dev, context_id, tid } => self.ctx_push(dev, context_id, tid),
            CudaEvent::CtxPop { dev, context_id, tid } => self.ctx_pop(dev, context_id, tid),
            CudaEvent::ElfImageLoaded {
                dev,
                context_id,
                module_id,
                handle,
                size,
            } => self.elf_image_loaded(dev, context_id, module_id, handle, size),
            CudaEvent::KernelReady {
                dev,
                context_id,
                module_id,
                grid_id,
                tid,
                entry_pc,
                grid_dim,
                block_dim,
                kind,
                parent_grid_id,
                origin,
            } => {
                check_tid(tid)?;
                self.kernel_ready(KernelLaunch {
                    dev_id: dev,
                    grid_id,
                    context_id,
                    module_id,
                    grid_dim,
                    block_dim,
                    kind,
                    parent_grid_id,
                    origin,
                    entry_pc,
                    launch_tid: tid,
                })
            }
            CudaEvent::KernelFinished { dev, grid_id } => self.kernel_finished(dev, grid_id),
            CudaEvent::InternalError { code } => Err(Error::CoreFatal(code)),
            CudaEvent::Timeout => {
                tracing::trace!(target: "cudbg::events", "timeout event");
                Ok(())
            }
            CudaEvent::AttachComplete => {
                self.api.set_attach_state(AttachState::AppReady);
                Ok(())
            }
            CudaEvent::DetachComplete => {
                self.api.set_attach_state(AttachState::DetachComplete);
                Ok(())
            }
            CudaEvent::Invalid => Ok(()),
        }
    }

    /// Runs exactly once per drain, after every event: launches in the drain
    /// may have changed how host breakpoints resolve.
    fn post_process_events(&mut self) {
        self.host.remove_all_breakpoints();
        self.host.insert_all_breakpoints();
    }

    // ===========================================================================================
    // Context Events
    // ===========================================================================================

    fn ctx_create(&mut self, dev: u32, context_id: u64, tid: u32) -> Result<()> {
        check_tid(tid)?;
        if self.options.gpu_busy_check && self.api.device_is_driving_display(dev)? {
            return Err(Error::GpuBusy(dev));
        }
        let registry = &mut self.system.device_mut(dev).contexts;
        registry.add_context(Context::new(context_id, dev));
        registry.stack_context(context_id, tid);
        self.context_banner("Context Create", dev, context_id);
        Ok(())
    }

    fn ctx_destroy(&mut self, dev: u32, context_id: u64, tid: u32) -> Result<()> {
        check_tid(tid)?;
        let registry = &mut self.system.device_mut(dev).contexts;
        if registry.active_context(tid) == Some(context_id) {
            registry.unstack_context(tid);
        }
        if self.current_context == Some((dev, context_id)) {
            self.current_context = None;
        }
        self.host.remove_auto_breakpoints(context_id);
        self.host.unresolve_breakpoints(context_id);
        let removed = self.system.device_mut(dev).contexts.remove_context(context_id);
        debug_assert!(removed.is_some(), "destroy of unknown context {context_id:#x}");
        if let Some(ctx) = removed {
            for module in &ctx.modules {
                self.host.unload_elf_image(module.module_id);
            }
        }
        self.context_banner("Context Destroy", dev, context_id);
        Ok(())
    }

    fn ctx_push(&mut self, dev: u32, context_id: u64, tid: u32) -> Result<()> {
        check_tid(tid)?;
        if self.attach_in_progress() {
            return Ok(());
        }
        self.system
            .device_mut(dev)
            .contexts
            .stack_context(context_id, tid);
        self.context_banner("Context Push", dev, context_id);
        Ok(())
    }

    fn ctx_pop(&mut self, dev: u32, context_id: u64, tid: u32) -> Result<()> {
        check_tid(tid)?;
        if self.attach_in_progress() {
            return Ok(());
        }
        let popped = self.system.device_mut(dev).contexts.unstack_context(tid);
        debug_assert_eq!(
            popped,
            Some(context_id),
            "pop of context {context_id:#x} does not match stack top"
        );
        self.context_banner("Context Pop", dev, context_id);
        Ok(())
    }

    fn context_banner(&mut self, what: &str, dev: u32, context_id: u64) {
        if self.options.show_context_events {
            self.ui
                .message(&format!("[{what} of context {context_id:#x} on Device {dev}]"));
        }
    }

    // ===========================================================================================
    // Module / Kernel Events
    // ===========================================================================================

    fn elf_image_loaded(
        &mut self,
        dev: u32,
        context_id: u64,
        module_id: u64,
        handle: u64,
        size: u64,
    ) -> Result<()> {
        let registry = &mut self.system.device_mut(dev).contexts;
        let Some(ctx) = registry.find_by_id_mut(context_id) else {
            debug_assert!(false, "ELF image for unknown context {context_id:#x}");
            return Ok(());
        };
        ctx.modules.push(Module {
            module_id,
            context_id,
            elf_image: handle,
            elf_size: size,
        });
        self.current_context = Some((dev, context_id));
        self.host.update_runtime_symbols();
        self.host
            .resolve_breakpoints(context_id, module_id, handle, size);
        Ok(())
    }

    fn kernel_ready(&mut self, launch: KernelLaunch) -> Result<()> {
        let break_on_launch = match launch.kind {
            KernelType::Application => self.options.break_on_launch_application,
            KernelType::System => self.options.break_on_launch_system,
        };
        let context_id = launch.context_id;
        let entry_pc = launch.entry_pc;
        self.kernels.start_kernel(launch);
        if break_on_launch {
            self.host.insert_auto_breakpoint(context_id, entry_pc);
        }
        Ok(())
    }

    fn kernel_finished(&mut self, dev: u32, grid_id: u64) -> Result<()> {
        let finished = self.kernels.terminate_kernel(dev, grid_id);
        debug_assert!(finished.is_some(), "finish of unknown kernel ({dev},{grid_id})");
        if finished.is_some() {
            self.host.clear_current_source();
        }
        Ok(())
    }
}

fn check_tid(tid: u32) -> Result<()> {
    if tid == INVALID_TID {
        return Err(Error::InvalidThreadId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CuDim3, KernelOrigin};
    use crate::testing::SessionBuilder;

    fn ctx_event(kind: fn(u32, u64, u32) -> CudaEvent, ctx: u64, tid: u32) -> CudaEvent {
        kind(0, ctx, tid)
    }

    fn create(dev: u32, ctx: u64, tid: u32) -> CudaEvent {
        CudaEvent::CtxCreate { dev, context_id: ctx, tid }
    }
    fn push(dev: u32, ctx: u64, tid: u32) -> CudaEvent {
        CudaEvent::CtxPush { dev, context_id: ctx, tid }
    }
    fn pop(dev: u32, ctx: u64, tid: u32) -> CudaEvent {
        CudaEvent::CtxPop { dev, context_id: ctx, tid }
    }
    fn destroy(dev: u32, ctx: u64, tid: u32) -> CudaEvent {
        CudaEvent::CtxDestroy { dev, context_id: ctx, tid }
    }

    fn kernel_ready(ctx: u64, grid: u64, tid: u32) -> CudaEvent {
        CudaEvent::KernelReady {
            dev: 0,
            context_id: ctx,
            module_id: 0x1,
            grid_id: grid,
            tid,
            entry_pc: 0x1000,
            grid_dim: CuDim3::new(2, 1, 1),
            block_dim: CuDim3::new(32, 1, 1),
            kind: KernelType::Application,
            parent_grid_id: 0,
            origin: KernelOrigin::Cpu,
        }
    }

    #[test]
    fn context_lifecycle_round_trip() {
        let mut s = SessionBuilder::new().devices(1).build();
        for ev in [
            ctx_event(create, 0xa, 100),
            ctx_event(push, 0xa, 100),
            ctx_event(pop, 0xa, 100),
            ctx_event(destroy, 0xa, 100),
        ] {
            s.push_sync_event(ev);
        }
        s.process_events(EventQueueKind::Sync).unwrap();

        let registry = &s.system.device(0).contexts;
        assert!(registry.is_empty());
        assert_eq!(registry.active_context(100), None);
        assert_eq!(s.current_context(), None);
    }

    #[test]
    fn elf_load_then_auto_breakpoint() {
        let mut s = SessionBuilder::new().devices(1).build();
        s.options_mut().break_on_launch_application = true;

        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(CudaEvent::ElfImageLoaded {
            dev: 0,
            context_id: 0xa,
            module_id: 0x5,
            handle: 0x4000,
            size: 0x800,
        });
        s.push_sync_event(kernel_ready(0xa, 7, 100));
        s.process_events(EventQueueKind::Sync).unwrap();

        let registry = &s.system.device(0).contexts;
        let ctx = registry.find_by_id(0xa).unwrap();
        assert_eq!(ctx.find_module(0x5).unwrap().elf_image, 0x4000);
        assert_eq!(s.current_context(), Some((0, 0xa)));
        assert_eq!(s.host_mock().auto_breakpoints(), vec![(0xa, 0x1000)]);
        assert!(s.kernels().find_by_grid_id(0, 7).is_some());
        assert_eq!(s.host_mock().resolved(), vec![(0xa, 0x5)]);
        assert_eq!(s.host_mock().runtime_symbol_updates(), 1);
    }

    #[test]
    fn destroy_clears_current_context_and_auto_breakpoints() {
        let mut s = SessionBuilder::new().devices(1).build();
        s.options_mut().break_on_launch_application = true;

        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(CudaEvent::ElfImageLoaded {
            dev: 0,
            context_id: 0xa,
            module_id: 0x5,
            handle: 0x4000,
            size: 0x800,
        });
        s.push_sync_event(kernel_ready(0xa, 7, 100));
        s.process_events(EventQueueKind::Sync).unwrap();
        assert_eq!(s.current_context(), Some((0, 0xa)));

        s.push_sync_event(destroy(0, 0xa, 100));
        s.process_events(EventQueueKind::Sync).unwrap();

        assert_eq!(s.current_context(), None);
        assert!(s.host_mock().auto_breakpoints().is_empty());
        assert_eq!(s.host_mock().unresolved(), vec![0xa]);
        assert_eq!(s.host_mock().unloaded_elf(), vec![0x5]);
    }

    #[test]
    fn push_and_pop_ignored_while_attaching() {
        let mut s = SessionBuilder::new().devices(1).attaching().build();
        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(push(0, 0xa, 100));
        s.process_events(EventQueueKind::Sync).unwrap();

        // only the create-time stacking is visible
        let registry = &s.system.device(0).contexts;
        assert_eq!(registry.active_context(100), Some(0xa));
        s.push_sync_event(pop(0, 0xa, 100));
        s.process_events(EventQueueKind::Sync).unwrap();
        assert_eq!(s.system.device(0).contexts.active_context(100), Some(0xa));
    }

    #[test]
    fn invalid_tid_is_fatal() {
        let mut s = SessionBuilder::new().devices(1).build();
        let err = s.process_event(create(0, 0xa, !0)).unwrap_err();
        assert!(matches!(err, Error::InvalidThreadId));
        assert!(matches!(
            s.process_event(kernel_ready(0xa, 7, !0)).unwrap_err(),
            Error::InvalidThreadId
        ));
    }

    #[test]
    fn internal_error_is_core_fatal() {
        let mut s = SessionBuilder::new().devices(1).build();
        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(CudaEvent::InternalError { code: 42 });
        let err = s.process_events(EventQueueKind::Sync).unwrap_err();
        assert!(matches!(err, Error::CoreFatal(42)));
    }

    #[test]
    fn kernel_finished_clears_host_source() {
        let mut s = SessionBuilder::new().devices(1).build();
        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(kernel_ready(0xa, 7, 100));
        s.process_events(EventQueueKind::Sync).unwrap();

        s.push_sync_event(CudaEvent::KernelFinished { dev: 0, grid_id: 7 });
        s.process_events(EventQueueKind::Sync).unwrap();
        assert!(s.kernels().find_by_grid_id(0, 7).is_none());
        assert_eq!(s.host_mock().cleared_source(), 1);
    }

    #[test]
    fn breakpoints_reinserted_once_per_drain_and_clock_ticks() {
        let mut s = SessionBuilder::new().devices(1).build();
        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(kernel_ready(0xa, 7, 100));
        s.process_events(EventQueueKind::Sync).unwrap();
        assert_eq!(s.host_mock().reinsert_cycles(), 1);
        assert_eq!(s.clock(), 1);

        s.process_events(EventQueueKind::Sync).unwrap();
        assert_eq!(s.host_mock().reinsert_cycles(), 2);
        assert_eq!(s.clock(), 2);
    }

    #[test]
    fn batching_into_drains_preserves_final_state() {
        let trace = [
            create(0, 0xa, 100),
            push(0, 0xa, 100),
            kernel_ready(0xa, 7, 100),
            pop(0, 0xa, 100),
            CudaEvent::KernelFinished { dev: 0, grid_id: 7 },
            destroy(0, 0xa, 100),
        ];

        // one big drain
        let mut one = SessionBuilder::new().devices(1).build();
        for ev in trace {
            one.push_sync_event(ev);
        }
        one.process_events(EventQueueKind::Sync).unwrap();

        // one drain per event
        let mut many = SessionBuilder::new().devices(1).build();
        for ev in trace {
            many.push_sync_event(ev);
            many.process_events(EventQueueKind::Sync).unwrap();
        }

        assert!(one.system.device(0).contexts.is_empty());
        assert!(many.system.device(0).contexts.is_empty());
        assert!(one.kernels().is_empty());
        assert!(many.kernels().is_empty());
        assert_eq!(one.current_context(), many.current_context());
    }

    #[test]
    fn context_banners_follow_the_option() {
        let mut s = SessionBuilder::new().devices(1).build();
        s.options_mut().show_context_events = true;
        s.push_sync_event(create(0, 0xa, 100));
        s.push_sync_event(destroy(0, 0xa, 100));
        s.process_events(EventQueueKind::Sync).unwrap();
        assert_eq!(
            s.ui_mock().messages(),
            vec![
                "[Context Create of context 0xa on Device 0]".to_string(),
                "[Context Destroy of context 0xa on Device 0]".to_string(),
            ]
        );
    }
}
