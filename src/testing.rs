//! Shared test fixtures: a scriptable mock debug-API port, a recording host,
//! a recording table sink, and a builder that wires them into a session.

use crate::api::{
    AttachState, CuDim3, CudaEvent, CudaException, DebugApi, GridInfo, KernelOrigin, KernelType,
    MemorySegment,
};
use crate::contexts::{Context, Module};
use crate::coords::Coords;
use crate::error::{Error, Result};
use crate::host::{HostDebugger, SourceLine, UiSink};
use crate::kernels::KernelLaunch;
use crate::notify::TrapSender;
use crate::options::Options;
use crate::session::Session;
use crate::state::{SmState, WarpState};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

// ===============================================================================================
// Mock Debug API
// ===============================================================================================

#[derive(Debug, Default)]
pub(crate) struct MockData {
    calls: HashMap<&'static str, usize>,
    num_devices: u32,
    num_sms: u32,
    num_warps: u32,
    num_lanes: u32,
    num_registers: u32,
    device_type: String,
    sm_type: String,
    valid_warps: HashMap<(u32, u32), u64>,
    broken_warps: HashMap<(u32, u32), u64>,
    valid_lanes: HashMap<(u32, u32, u32), u32>,
    active_lanes: HashMap<(u32, u32, u32), u32>,
    grid_ids: HashMap<(u32, u32, u32), u64>,
    block_idxs: HashMap<(u32, u32, u32), CuDim3>,
    thread_idxs: HashMap<(u32, u32, u32, u32), CuDim3>,
    pcs: HashMap<(u32, u32, u32, u32), u64>,
    virtual_pcs: HashMap<(u32, u32, u32, u32), u64>,
    exceptions: HashMap<(u32, u32, u32, u32), CudaException>,
    exception_sms: HashMap<u32, u64>,
    single_step_masks: HashMap<(u32, u32, u32), u64>,
    grid_infos: HashMap<(u32, u64), GridInfo>,
    sync_events: VecDeque<CudaEvent>,
    async_events: VecDeque<CudaEvent>,
    attach_state: AttachState,
    remote: bool,
    display_devices: u64,
}

impl MockData {
    fn count(&mut self, name: &'static str) {
        *self.calls.entry(name).or_insert(0) += 1;
    }
}

pub(crate) struct MockApi {
    data: Arc<Mutex<MockData>>,
}

impl DebugApi for MockApi {
    fn get_num_devices(&mut self) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("get_num_devices");
        Ok(d.num_devices)
    }

    fn get_num_sms(&mut self, _dev: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("get_num_sms");
        Ok(d.num_sms)
    }

    fn get_num_warps(&mut self, _dev: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("get_num_warps");
        Ok(d.num_warps)
    }

    fn get_num_lanes(&mut self, _dev: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("get_num_lanes");
        Ok(d.num_lanes)
    }

    fn get_num_registers(&mut self, _dev: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("get_num_registers");
        Ok(d.num_registers)
    }

    fn get_device_type(&mut self, _dev: u32) -> Result<String> {
        let mut d = self.data.lock().unwrap();
        d.count("get_device_type");
        Ok(d.device_type.clone())
    }

    fn get_sm_type(&mut self, _dev: u32) -> Result<String> {
        let mut d = self.data.lock().unwrap();
        d.count("get_sm_type");
        Ok(d.sm_type.clone())
    }

    fn read_valid_warps(&mut self, dev: u32, sm: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_valid_warps");
        Ok(d.valid_warps.get(&(dev, sm)).copied().unwrap_or(0))
    }

    fn read_broken_warps(&mut self, dev: u32, sm: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_broken_warps");
        Ok(d.broken_warps.get(&(dev, sm)).copied().unwrap_or(0))
    }

    fn read_valid_lanes(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("read_valid_lanes");
        Ok(d.valid_lanes.get(&(dev, sm, wp)).copied().unwrap_or(0))
    }

    fn read_active_lanes(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("read_active_lanes");
        Ok(d.active_lanes.get(&(dev, sm, wp)).copied().unwrap_or(0))
    }

    fn read_grid_id(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_grid_id");
        Ok(d.grid_ids.get(&(dev, sm, wp)).copied().unwrap_or(0))
    }

    fn read_block_idx(&mut self, dev: u32, sm: u32, wp: u32) -> Result<CuDim3> {
        let mut d = self.data.lock().unwrap();
        d.count("read_block_idx");
        Ok(d.block_idxs.get(&(dev, sm, wp)).copied().unwrap_or_default())
    }

    fn read_thread_idx(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<CuDim3> {
        let mut d = self.data.lock().unwrap();
        d.count("read_thread_idx");
        Ok(d.thread_idxs
            .get(&(dev, sm, wp, ln))
            .copied()
            .unwrap_or(CuDim3::new(ln, 0, 0)))
    }

    fn read_pc(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_pc");
        Ok(d.pcs.get(&(dev, sm, wp, ln)).copied().unwrap_or(0x1000))
    }

    fn read_virtual_pc(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_virtual_pc");
        Ok(d.virtual_pcs
            .get(&(dev, sm, wp, ln))
            .copied()
            .unwrap_or(0x7000_1000))
    }

    fn read_lane_exception(&mut self, dev: u32, sm: u32, wp: u32, ln: u32) -> Result<CudaException> {
        let mut d = self.data.lock().unwrap();
        d.count("read_lane_exception");
        Ok(d.exceptions
            .get(&(dev, sm, wp, ln))
            .copied()
            .unwrap_or_default())
    }

    fn read_register(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32, regno: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("read_register");
        Ok(regno)
    }

    fn read_call_depth(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("read_call_depth");
        Ok(0)
    }

    fn read_syscall_call_depth(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u32> {
        let mut d = self.data.lock().unwrap();
        d.count("read_syscall_call_depth");
        Ok(0)
    }

    fn read_virtual_return_address(
        &mut self,
        _dev: u32,
        _sm: u32,
        _wp: u32,
        _ln: u32,
    ) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_virtual_return_address");
        Ok(0)
    }

    fn read_device_exception_state(&mut self, dev: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("read_device_exception_state");
        Ok(d.exception_sms.get(&dev).copied().unwrap_or(0))
    }

    fn memcheck_read_error_address(
        &mut self,
        _dev: u32,
        _sm: u32,
        _wp: u32,
        _ln: u32,
    ) -> Result<(u64, MemorySegment)> {
        let mut d = self.data.lock().unwrap();
        d.count("memcheck_read_error_address");
        Ok((0xdead_beef, MemorySegment::Global))
    }

    fn single_step_warp(&mut self, dev: u32, sm: u32, wp: u32) -> Result<u64> {
        let mut d = self.data.lock().unwrap();
        d.count("single_step_warp");
        Ok(d.single_step_masks
            .get(&(dev, sm, wp))
            .copied()
            .unwrap_or(1u64 << wp))
    }

    fn suspend_device(&mut self, _dev: u32) -> Result<()> {
        self.data.lock().unwrap().count("suspend_device");
        Ok(())
    }

    fn resume_device(&mut self, _dev: u32) -> Result<()> {
        self.data.lock().unwrap().count("resume_device");
        Ok(())
    }

    fn get_grid_info(&mut self, dev: u32, grid_id: u64) -> Result<GridInfo> {
        let mut d = self.data.lock().unwrap();
        d.count("get_grid_info");
        d.grid_infos
            .get(&(dev, grid_id))
            .copied()
            .ok_or_else(|| Error::Api(format!("no grid info for ({dev},{grid_id})")))
    }

    fn get_next_sync_event(&mut self) -> Result<CudaEvent> {
        let mut d = self.data.lock().unwrap();
        d.count("get_next_sync_event");
        Ok(d.sync_events.pop_front().unwrap_or(CudaEvent::Invalid))
    }

    fn get_next_async_event(&mut self) -> Result<CudaEvent> {
        let mut d = self.data.lock().unwrap();
        d.count("get_next_async_event");
        Ok(d.async_events.pop_front().unwrap_or(CudaEvent::Invalid))
    }

    fn get_attach_state(&mut self) -> AttachState {
        self.data.lock().unwrap().attach_state
    }

    fn set_attach_state(&mut self, state: AttachState) {
        self.data.lock().unwrap().attach_state = state;
    }

    fn device_is_driving_display(&mut self, dev: u32) -> Result<bool> {
        let mut d = self.data.lock().unwrap();
        d.count("device_is_driving_display");
        Ok(d.display_devices & (1 << dev) != 0)
    }

    fn is_remote(&self) -> bool {
        self.data.lock().unwrap().remote
    }

    fn update_grid_ids_in_sm(&mut self, _dev: u32, _sm: u32) -> Result<()> {
        self.data.lock().unwrap().count("update_grid_ids_in_sm");
        Ok(())
    }

    fn update_block_idxs_in_sm(&mut self, _dev: u32, _sm: u32) -> Result<()> {
        self.data.lock().unwrap().count("update_block_idxs_in_sm");
        Ok(())
    }

    fn update_thread_idxs_in_warp(&mut self, _dev: u32, _sm: u32, _wp: u32) -> Result<()> {
        self.data.lock().unwrap().count("update_thread_idxs_in_warp");
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct ApiHandle(Arc<Mutex<MockData>>);

impl ApiHandle {
    pub(crate) fn calls(&self, name: &str) -> usize {
        self.0.lock().unwrap().calls.get(name).copied().unwrap_or(0)
    }
}

// ===============================================================================================
// Recording Host
// ===============================================================================================

#[derive(Debug, Default)]
pub(crate) struct HostData {
    resolved: Vec<(u64, u64)>,
    unresolved: Vec<u64>,
    auto_breakpoints: Vec<(u64, u64)>,
    remove_all_calls: usize,
    insert_all_calls: usize,
    loaded_elf: Vec<u64>,
    unloaded_elf: Vec<u64>,
    switched_threads: Vec<u32>,
    convenience_updates: usize,
    runtime_symbol_updates: usize,
    frames_printed: usize,
    cleared_source: usize,
    source_lines: HashMap<u64, SourceLine>,
}

pub(crate) struct MockHost {
    data: Arc<Mutex<HostData>>,
}

impl HostDebugger for MockHost {
    fn resolve_breakpoints(&mut self, context_id: u64, module_id: u64, _elf_image: u64, _elf_size: u64) {
        self.data.lock().unwrap().resolved.push((context_id, module_id));
    }

    fn unresolve_breakpoints(&mut self, context_id: u64) {
        self.data.lock().unwrap().unresolved.push(context_id);
    }

    fn insert_auto_breakpoint(&mut self, context_id: u64, pc: u64) {
        self.data.lock().unwrap().auto_breakpoints.push((context_id, pc));
    }

    fn remove_auto_breakpoints(&mut self, context_id: u64) {
        self.data
            .lock()
            .unwrap()
            .auto_breakpoints
            .retain(|(ctx, _)| *ctx != context_id);
    }

    fn remove_all_breakpoints(&mut self) {
        self.data.lock().unwrap().remove_all_calls += 1;
    }

    fn insert_all_breakpoints(&mut self) {
        self.data.lock().unwrap().insert_all_calls += 1;
    }

    fn find_source_line(&self, virtual_pc: u64) -> Option<SourceLine> {
        self.data.lock().unwrap().source_lines.get(&virtual_pc).cloned()
    }

    fn update_runtime_symbols(&mut self) {
        self.data.lock().unwrap().runtime_symbol_updates += 1;
    }

    fn current_thread(&self) -> u32 {
        100
    }

    fn switch_to_thread(&mut self, tid: u32) {
        self.data.lock().unwrap().switched_threads.push(tid);
    }

    fn load_elf_image(&mut self, module_id: u64, _elf_image: u64, _elf_size: u64) {
        self.data.lock().unwrap().loaded_elf.push(module_id);
    }

    fn unload_elf_image(&mut self, module_id: u64) {
        self.data.lock().unwrap().unloaded_elf.push(module_id);
    }

    fn update_convenience_variables(&mut self, _coords: &Coords) {
        self.data.lock().unwrap().convenience_updates += 1;
    }

    fn print_frame(&mut self) {
        self.data.lock().unwrap().frames_printed += 1;
    }

    fn clear_current_source(&mut self) {
        self.data.lock().unwrap().cleared_source += 1;
    }
}

#[derive(Clone)]
pub(crate) struct HostHandle(Arc<Mutex<HostData>>);

impl HostHandle {
    pub(crate) fn auto_breakpoints(&self) -> Vec<(u64, u64)> {
        self.0.lock().unwrap().auto_breakpoints.clone()
    }

    pub(crate) fn resolved(&self) -> Vec<(u64, u64)> {
        self.0.lock().unwrap().resolved.clone()
    }

    pub(crate) fn unresolved(&self) -> Vec<u64> {
        self.0.lock().unwrap().unresolved.clone()
    }

    pub(crate) fn loaded_elf(&self) -> Vec<u64> {
        self.0.lock().unwrap().loaded_elf.clone()
    }

    pub(crate) fn unloaded_elf(&self) -> Vec<u64> {
        self.0.lock().unwrap().unloaded_elf.clone()
    }

    pub(crate) fn switched_threads(&self) -> Vec<u32> {
        self.0.lock().unwrap().switched_threads.clone()
    }

    pub(crate) fn cleared_source(&self) -> usize {
        self.0.lock().unwrap().cleared_source
    }

    /// Completed remove-then-insert breakpoint refresh cycles.
    pub(crate) fn reinsert_cycles(&self) -> usize {
        let d = self.0.lock().unwrap();
        d.remove_all_calls.min(d.insert_all_calls)
    }

    pub(crate) fn frames_printed(&self) -> usize {
        self.0.lock().unwrap().frames_printed
    }

    pub(crate) fn convenience_updates(&self) -> usize {
        self.0.lock().unwrap().convenience_updates
    }

    pub(crate) fn runtime_symbol_updates(&self) -> usize {
        self.0.lock().unwrap().runtime_symbol_updates
    }
}

// ===============================================================================================
// Recording UI Sink
// ===============================================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordedTable {
    pub(crate) title: String,
    pub(crate) headers: Vec<(usize, String)>,
    pub(crate) rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
pub(crate) struct UiData {
    tables: Vec<RecordedTable>,
    current_row: Vec<String>,
    messages: Vec<String>,
    texts: Vec<String>,
}

pub(crate) struct RecordingUi {
    data: Arc<Mutex<UiData>>,
}

impl UiSink for RecordingUi {
    fn table_begin(&mut self, title: &str, _num_columns: usize, _num_rows: usize) {
        self.data.lock().unwrap().tables.push(RecordedTable {
            title: title.to_string(),
            ..RecordedTable::default()
        });
    }

    fn table_header(&mut self, width: usize, label: &str) {
        let mut d = self.data.lock().unwrap();
        if let Some(t) = d.tables.last_mut() {
            t.headers.push((width, label.to_string()));
        }
    }

    fn table_body(&mut self) {}

    fn row_begin(&mut self) {
        self.data.lock().unwrap().current_row.clear();
    }

    fn field_string(&mut self, _name: &str, value: &str) {
        self.data.lock().unwrap().current_row.push(value.to_string());
    }

    fn field_int(&mut self, _name: &str, value: u64) {
        self.data.lock().unwrap().current_row.push(value.to_string());
    }

    fn row_end(&mut self) {
        let mut d = self.data.lock().unwrap();
        let row = std::mem::take(&mut d.current_row);
        if let Some(t) = d.tables.last_mut() {
            t.rows.push(row);
        }
    }

    fn table_end(&mut self) {}

    fn text(&mut self, msg: &str) {
        self.data.lock().unwrap().texts.push(msg.to_string());
    }

    fn message(&mut self, msg: &str) {
        self.data.lock().unwrap().messages.push(msg.to_string());
    }
}

#[derive(Clone)]
pub(crate) struct UiHandle(Arc<Mutex<UiData>>);

impl UiHandle {
    pub(crate) fn tables(&self) -> Vec<RecordedTable> {
        self.0.lock().unwrap().tables.clone()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().messages.clone()
    }

    #[allow(dead_code)]
    pub(crate) fn texts(&self) -> Vec<String> {
        self.0.lock().unwrap().texts.clone()
    }
}

// ===============================================================================================
// Trap Sender
// ===============================================================================================

struct NullTrapSender;

impl TrapSender for NullTrapSender {
    fn send_trap(&self, _tid: u32) -> bool {
        true
    }

    fn host_threads(&self) -> Vec<u32> {
        vec![100]
    }
}

// ===============================================================================================
// Builder
// ===============================================================================================

/// Declares one valid warp in the mock hardware state.
#[derive(Debug, Clone)]
pub(crate) struct WarpSpec {
    dev: u32,
    sm: u32,
    wp: u32,
    grid_id: u64,
    block_idx: CuDim3,
    valid_lanes: u32,
    active_lanes: u32,
    broken: bool,
    pc: u64,
    virtual_pc: u64,
    lane_pcs: Vec<(u32, u64)>,
    lane_virtual_pcs: Vec<(u32, u64)>,
    exception_sm: bool,
}

impl WarpSpec {
    pub(crate) fn new(dev: u32, sm: u32, wp: u32) -> Self {
        Self {
            dev,
            sm,
            wp,
            grid_id: 1,
            block_idx: CuDim3::default(),
            valid_lanes: 0xffff_ffff,
            active_lanes: 0xffff_ffff,
            broken: false,
            pc: 0x1000,
            virtual_pc: 0x7000_1000,
            lane_pcs: Vec::new(),
            lane_virtual_pcs: Vec::new(),
            exception_sm: false,
        }
    }

    pub(crate) fn grid(mut self, grid_id: u64) -> Self {
        self.grid_id = grid_id;
        self
    }

    pub(crate) fn block(mut self, block_idx: CuDim3) -> Self {
        self.block_idx = block_idx;
        self
    }

    pub(crate) fn lanes(mut self, valid: u32, active: u32) -> Self {
        self.valid_lanes = valid;
        self.active_lanes = active;
        self
    }

    pub(crate) fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub(crate) fn pc(mut self, pc: u64) -> Self {
        self.pc = pc;
        self
    }

    pub(crate) fn virtual_pc(mut self, vpc: u64) -> Self {
        self.virtual_pc = vpc;
        self
    }

    pub(crate) fn lane_pc(mut self, ln: u32, pc: u64) -> Self {
        self.lane_pcs.push((ln, pc));
        self
    }

    pub(crate) fn lane_virtual_pc(mut self, ln: u32, vpc: u64) -> Self {
        self.lane_virtual_pcs.push((ln, vpc));
        self
    }

    /// Marks this warp's SM in the device exception bitmap.
    pub(crate) fn exception_sm(mut self) -> Self {
        self.exception_sm = true;
        self
    }
}

pub(crate) struct SessionBuilder {
    data: MockData,
    contexts: Vec<(u32, u64)>,
    kernels: Vec<KernelLaunch>,
    modules: Vec<Module>,
}

impl SessionBuilder {
    pub(crate) fn new() -> Self {
        Self {
            data: MockData {
                num_devices: 1,
                num_sms: 2,
                num_warps: 8,
                num_lanes: 32,
                num_registers: 64,
                device_type: "GV100".to_string(),
                sm_type: "sm_70".to_string(),
                ..MockData::default()
            },
            contexts: Vec::new(),
            kernels: Vec::new(),
            modules: Vec::new(),
        }
    }

    pub(crate) fn devices(mut self, n: u32) -> Self {
        self.data.num_devices = n;
        self
    }

    pub(crate) fn remote(mut self) -> Self {
        self.data.remote = true;
        self
    }

    pub(crate) fn attaching(mut self) -> Self {
        self.data.attach_state = AttachState::InProgress;
        self
    }

    pub(crate) fn context(mut self, dev: u32, context_id: u64) -> Self {
        self.contexts.push((dev, context_id));
        self
    }

    pub(crate) fn warp(mut self, spec: WarpSpec) -> Self {
        let key = (spec.dev, spec.sm);
        *self.data.valid_warps.entry(key).or_insert(0) |= 1u64 << spec.wp;
        if spec.broken {
            *self.data.broken_warps.entry(key).or_insert(0) |= 1u64 << spec.wp;
        }
        let wkey = (spec.dev, spec.sm, spec.wp);
        self.data.valid_lanes.insert(wkey, spec.valid_lanes);
        self.data.active_lanes.insert(wkey, spec.active_lanes);
        self.data.grid_ids.insert(wkey, spec.grid_id);
        self.data.block_idxs.insert(wkey, spec.block_idx);
        for ln in 0..32 {
            if spec.valid_lanes & (1 << ln) != 0 {
                self.data.pcs.insert((spec.dev, spec.sm, spec.wp, ln), spec.pc);
                self.data
                    .virtual_pcs
                    .insert((spec.dev, spec.sm, spec.wp, ln), spec.virtual_pc);
            }
        }
        for &(ln, pc) in &spec.lane_pcs {
            self.data.pcs.insert((spec.dev, spec.sm, spec.wp, ln), pc);
        }
        for &(ln, vpc) in &spec.lane_virtual_pcs {
            self.data
                .virtual_pcs
                .insert((spec.dev, spec.sm, spec.wp, ln), vpc);
        }
        if spec.exception_sm {
            *self.data.exception_sms.entry(spec.dev).or_insert(0) |= 1u64 << spec.sm;
        }
        self
    }

    pub(crate) fn single_step_mask(mut self, dev: u32, sm: u32, wp: u32, mask: u64) -> Self {
        self.data.single_step_masks.insert((dev, sm, wp), mask);
        self
    }

    pub(crate) fn grid_info(mut self, dev: u32, grid_id: u64) -> Self {
        self.data.grid_infos.insert(
            (dev, grid_id),
            GridInfo {
                context_id: 0xa,
                module_id: 0x5,
                grid_dim: CuDim3::new(2, 1, 1),
                block_dim: CuDim3::new(32, 1, 1),
                kind: KernelType::Application,
                parent_grid_id: 0,
                origin: KernelOrigin::Cpu,
                entry_pc: 0x1000,
                tid: 100,
            },
        );
        self
    }

    pub(crate) fn registered_kernel(self, dev: u32, grid_id: u64) -> Self {
        self.registered_kernel_dims(dev, grid_id, CuDim3::new(2, 1, 1), CuDim3::new(32, 1, 1))
    }

    pub(crate) fn registered_kernel_dims(
        mut self,
        dev: u32,
        grid_id: u64,
        grid_dim: CuDim3,
        block_dim: CuDim3,
    ) -> Self {
        self.kernels.push(KernelLaunch {
            dev_id: dev,
            grid_id,
            context_id: 0xa,
            module_id: 0x5,
            grid_dim,
            block_dim,
            kind: KernelType::Application,
            parent_grid_id: 0,
            origin: KernelOrigin::Cpu,
            entry_pc: 0x1000,
            launch_tid: 100,
        });
        self
    }

    pub(crate) fn registered_kernel_with_module(
        mut self,
        dev: u32,
        grid_id: u64,
        context_id: u64,
        module_id: u64,
    ) -> Self {
        self.kernels.push(KernelLaunch {
            dev_id: dev,
            grid_id,
            context_id,
            module_id,
            grid_dim: CuDim3::new(2, 1, 1),
            block_dim: CuDim3::new(32, 1, 1),
            kind: KernelType::Application,
            parent_grid_id: 0,
            origin: KernelOrigin::Cpu,
            entry_pc: 0x1000,
            launch_tid: 100,
        });
        self.modules.push(Module {
            module_id,
            context_id,
            elf_image: 0x4000,
            elf_size: 0x800,
        });
        self
    }

    pub(crate) fn build(self) -> TestSession {
        let api_data = Arc::new(Mutex::new(self.data));
        let host_data = Arc::new(Mutex::new(HostData::default()));
        let ui_data = Arc::new(Mutex::new(UiData::default()));

        let mut session = Session::with_trap_sender(
            Box::new(MockApi {
                data: Arc::clone(&api_data),
            }),
            Box::new(MockHost {
                data: Arc::clone(&host_data),
            }),
            Box::new(RecordingUi {
                data: Arc::clone(&ui_data),
            }),
            Options::default(),
            Box::new(NullTrapSender),
        );
        session.initialize().expect("mock initialize");

        for (dev, context_id) in self.contexts {
            session
                .system
                .device_mut(dev)
                .contexts
                .add_context(Context::new(context_id, dev));
        }
        for module in self.modules {
            let dev = self
                .kernels
                .iter()
                .find(|k| k.context_id == module.context_id)
                .map_or(0, |k| k.dev_id);
            if let Some(ctx) = session
                .system
                .device_mut(dev)
                .contexts
                .find_by_id_mut(module.context_id)
            {
                ctx.modules.push(module);
            }
        }
        for launch in self.kernels {
            session.kernels.start_kernel(launch);
        }

        TestSession {
            session,
            api: api_data,
            host: host_data,
            ui: ui_data,
        }
    }
}

// ===============================================================================================
// Test Session
// ===============================================================================================

pub(crate) struct TestSession {
    pub(crate) session: Session,
    api: Arc<Mutex<MockData>>,
    host: Arc<Mutex<HostData>>,
    ui: Arc<Mutex<UiData>>,
}

impl Deref for TestSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for TestSession {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl TestSession {
    pub(crate) fn mock(&self) -> ApiHandle {
        ApiHandle(Arc::clone(&self.api))
    }

    pub(crate) fn host_mock(&self) -> HostHandle {
        HostHandle(Arc::clone(&self.host))
    }

    pub(crate) fn ui_mock(&self) -> UiHandle {
        UiHandle(Arc::clone(&self.ui))
    }

    pub(crate) fn push_sync_event(&mut self, event: CudaEvent) {
        self.api.lock().unwrap().sync_events.push_back(event);
    }

    #[allow(dead_code)]
    pub(crate) fn push_async_event(&mut self, event: CudaEvent) {
        self.api.lock().unwrap().async_events.push_back(event);
    }

    pub(crate) fn tick_for_test(&mut self) {
        self.session.tick_clock();
    }

    pub(crate) fn sm(&self, dev: u32, sm: u32) -> &SmState {
        &self.session.system.device(dev).sms[sm as usize]
    }

    pub(crate) fn warp(&self, dev: u32, sm: u32, wp: u32) -> &WarpState {
        &self.session.system.device(dev).sms[sm as usize].warps[wp as usize]
    }
}
