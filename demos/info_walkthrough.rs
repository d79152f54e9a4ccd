//! Stands up a session against an in-process stub of the debug API, replays
//! a context/module/kernel event sequence, and prints the info views.
//!
//! Run with: cargo run --example info_walkthrough

use cudbg_rs::api::{
    AttachState, CuDim3, CudaEvent, CudaException, DebugApi, GridInfo, KernelOrigin, KernelType,
    MemorySegment,
};
use cudbg_rs::coords::Coords;
use cudbg_rs::host::{HostDebugger, SourceLine, UiSink};
use cudbg_rs::options::Options;
use cudbg_rs::{Result, Session};
use std::collections::VecDeque;

/// One fake device: 2 SMs, 4 warps/SM, 8 lanes/warp. SM 0 runs warps 0-1,
/// SM 1 runs warp 0, all on grid 3.
struct StubApi {
    events: VecDeque<CudaEvent>,
    attach: AttachState,
}

impl StubApi {
    fn new() -> Self {
        let grid_dim = CuDim3::new(3, 1, 1);
        let block_dim = CuDim3::new(8, 1, 1);
        let events = VecDeque::from([
            CudaEvent::CtxCreate { dev: 0, context_id: 0xa, tid: 1000 },
            CudaEvent::ElfImageLoaded {
                dev: 0,
                context_id: 0xa,
                module_id: 0x5,
                handle: 0x0010_0000,
                size: 0x4000,
            },
            CudaEvent::KernelReady {
                dev: 0,
                context_id: 0xa,
                module_id: 0x5,
                grid_id: 3,
                tid: 1000,
                entry_pc: 0x1000,
                grid_dim,
                block_dim,
                kind: KernelType::Application,
                parent_grid_id: 0,
                origin: KernelOrigin::Cpu,
            },
        ]);
        Self {
            events,
            attach: AttachState::AppReady,
        }
    }
}

impl DebugApi for StubApi {
    fn get_num_devices(&mut self) -> Result<u32> {
        Ok(1)
    }
    fn get_num_sms(&mut self, _dev: u32) -> Result<u32> {
        Ok(2)
    }
    fn get_num_warps(&mut self, _dev: u32) -> Result<u32> {
        Ok(4)
    }
    fn get_num_lanes(&mut self, _dev: u32) -> Result<u32> {
        Ok(8)
    }
    fn get_num_registers(&mut self, _dev: u32) -> Result<u32> {
        Ok(16)
    }
    fn get_device_type(&mut self, _dev: u32) -> Result<String> {
        Ok("Stub GPU".to_string())
    }
    fn get_sm_type(&mut self, _dev: u32) -> Result<String> {
        Ok("sm_00".to_string())
    }

    fn read_valid_warps(&mut self, _dev: u32, sm: u32) -> Result<u64> {
        Ok(match sm {
            0 => 0b0011,
            _ => 0b0001,
        })
    }
    fn read_broken_warps(&mut self, _dev: u32, _sm: u32) -> Result<u64> {
        Ok(0b0001)
    }
    fn read_valid_lanes(&mut self, _dev: u32, _sm: u32, _wp: u32) -> Result<u32> {
        Ok(0xff)
    }
    fn read_active_lanes(&mut self, _dev: u32, _sm: u32, _wp: u32) -> Result<u32> {
        Ok(0xff)
    }
    fn read_grid_id(&mut self, _dev: u32, _sm: u32, _wp: u32) -> Result<u64> {
        Ok(3)
    }
    fn read_block_idx(&mut self, _dev: u32, sm: u32, wp: u32) -> Result<CuDim3> {
        Ok(CuDim3::new(sm * 2 + wp, 0, 0))
    }
    fn read_thread_idx(&mut self, _dev: u32, _sm: u32, _wp: u32, ln: u32) -> Result<CuDim3> {
        Ok(CuDim3::new(ln, 0, 0))
    }
    fn read_pc(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u64> {
        Ok(0x1080)
    }
    fn read_virtual_pc(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u64> {
        Ok(0x0010_1080)
    }
    fn read_lane_exception(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<CudaException> {
        Ok(CudaException::None)
    }
    fn read_register(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32, regno: u32) -> Result<u32> {
        Ok(regno)
    }
    fn read_call_depth(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u32> {
        Ok(0)
    }
    fn read_syscall_call_depth(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u32> {
        Ok(0)
    }
    fn read_virtual_return_address(&mut self, _dev: u32, _sm: u32, _wp: u32, _ln: u32) -> Result<u64> {
        Ok(0)
    }
    fn read_device_exception_state(&mut self, _dev: u32) -> Result<u64> {
        Ok(0)
    }
    fn memcheck_read_error_address(
        &mut self,
        _dev: u32,
        _sm: u32,
        _wp: u32,
        _ln: u32,
    ) -> Result<(u64, MemorySegment)> {
        Ok((0, MemorySegment::Unknown))
    }

    fn single_step_warp(&mut self, _dev: u32, _sm: u32, wp: u32) -> Result<u64> {
        Ok(1 << wp)
    }
    fn suspend_device(&mut self, _dev: u32) -> Result<()> {
        Ok(())
    }
    fn resume_device(&mut self, _dev: u32) -> Result<()> {
        Ok(())
    }

    fn get_grid_info(&mut self, _dev: u32, grid_id: u64) -> Result<GridInfo> {
        Ok(GridInfo {
            context_id: 0xa,
            module_id: 0x5,
            grid_dim: CuDim3::new(3, 1, 1),
            block_dim: CuDim3::new(8, 1, 1),
            kind: KernelType::Application,
            parent_grid_id: if grid_id > 3 { 3 } else { 0 },
            origin: KernelOrigin::Cpu,
            entry_pc: 0x1000,
            tid: 1000,
        })
    }
    fn get_next_sync_event(&mut self) -> Result<CudaEvent> {
        Ok(self.events.pop_front().unwrap_or(CudaEvent::Invalid))
    }
    fn get_next_async_event(&mut self) -> Result<CudaEvent> {
        Ok(CudaEvent::Invalid)
    }
    fn get_attach_state(&mut self) -> AttachState {
        self.attach
    }
    fn set_attach_state(&mut self, state: AttachState) {
        self.attach = state;
    }
}

struct StubHost;

impl HostDebugger for StubHost {
    fn resolve_breakpoints(&mut self, context_id: u64, module_id: u64, _elf_image: u64, _elf_size: u64) {
        println!("[host] resolve breakpoints: context {context_id:#x}, module {module_id:#x}");
    }
    fn unresolve_breakpoints(&mut self, context_id: u64) {
        println!("[host] unresolve breakpoints: context {context_id:#x}");
    }
    fn insert_auto_breakpoint(&mut self, context_id: u64, pc: u64) {
        println!("[host] auto breakpoint at {pc:#x} (context {context_id:#x})");
    }
    fn remove_auto_breakpoints(&mut self, _context_id: u64) {}
    fn remove_all_breakpoints(&mut self) {}
    fn insert_all_breakpoints(&mut self) {}
    fn find_source_line(&self, _virtual_pc: u64) -> Option<SourceLine> {
        Some(SourceLine {
            filename: "vecadd.cu".to_string(),
            line: 42,
        })
    }
    fn update_runtime_symbols(&mut self) {}
    fn current_thread(&self) -> u32 {
        1000
    }
    fn switch_to_thread(&mut self, tid: u32) {
        println!("[host] switching to thread {tid}");
    }
    fn load_elf_image(&mut self, module_id: u64, _elf_image: u64, _elf_size: u64) {
        println!("[host] loading ELF image of module {module_id:#x}");
    }
    fn unload_elf_image(&mut self, _module_id: u64) {}
    fn update_convenience_variables(&mut self, _coords: &Coords) {}
    fn print_frame(&mut self) {}
    fn clear_current_source(&mut self) {}
}

/// Renders tables with the widths the presenter computed.
#[derive(Default)]
struct ConsoleUi {
    widths: Vec<usize>,
    labels: Vec<String>,
    row: Vec<String>,
}

impl UiSink for ConsoleUi {
    fn table_begin(&mut self, title: &str, _num_columns: usize, _num_rows: usize) {
        println!("\n== info cuda {title} ==");
        self.widths.clear();
        self.labels.clear();
    }
    fn table_header(&mut self, width: usize, label: &str) {
        self.widths.push(width);
        self.labels.push(label.to_string());
    }
    fn table_body(&mut self) {
        let header: Vec<String> = self
            .labels
            .iter()
            .zip(&self.widths)
            .map(|(l, &w)| format!("{l:>w$}"))
            .collect();
        println!("{}", header.join("  "));
    }
    fn row_begin(&mut self) {
        self.row.clear();
    }
    fn field_string(&mut self, _name: &str, value: &str) {
        self.row.push(value.to_string());
    }
    fn field_int(&mut self, _name: &str, value: u64) {
        self.row.push(value.to_string());
    }
    fn row_end(&mut self) {
        let cells: Vec<String> = self
            .row
            .iter()
            .zip(&self.widths)
            .map(|(c, &w)| format!("{c:>w$}"))
            .collect();
        println!("{}", cells.join("  "));
    }
    fn table_end(&mut self) {}
    fn text(&mut self, msg: &str) {
        print!("{msg}");
    }
    fn message(&mut self, msg: &str) {
        println!("{msg}");
    }
}

fn main() -> Result<()> {
    let options = Options {
        show_context_events: true,
        break_on_launch_application: true,
        coalescing: true,
        ..Options::default()
    };
    let mut session = Session::new(
        Box::new(StubApi::new()),
        Box::new(StubHost),
        Box::new(ConsoleUi::default()),
        options,
    );
    session.initialize()?;

    println!("=== draining the launch event sequence ===");
    session.process_events(cudbg_rs::api::EventQueueKind::Sync)?;

    println!("\n=== suspending device 0 and inspecting ===");
    session.device_suspend(0)?;

    session.info_cuda("devices")?;
    session.info_cuda("kernels")?;
    session.info_cuda("contexts")?;
    session.info_cuda("warps")?;
    session.info_cuda("blocks")?;
    session.info_cuda("threads")?;

    println!("\n=== switching focus ===");
    session.command_switch("device 0 sm 0 warp 0 lane 0")?;
    session.info_cuda("lanes sm 0 warp 0")?;

    println!("\n=== resuming ===");
    session.device_resume(0)?;
    Ok(())
}
