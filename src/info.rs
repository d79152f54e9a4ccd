//! The `info cuda ...` tabular views.
//!
//! Each view parses its filter, iterates the mirror, builds the full row set
//! first, computes column widths from the content, and only then emits
//! through the host table sink. Blocks and threads views optionally coalesce
//! runs of logically-contiguous points with identical display attributes.

use crate::coords::parser::{self, AcceptedKinds, UnspecifiedDefault};
use crate::coords::Coords;
use crate::error::{Error, Result};
use crate::host::SourceLine;
use crate::iter::{IteratorKind, Select};
use crate::session::Session;

// ===============================================================================================
// Cells & Emission
// ===============================================================================================

#[derive(Debug, Clone)]
enum Cell {
    Str(String),
    Int(u64),
}

impl Cell {
    fn text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(n) => n.to_string(),
        }
    }
}

fn emit_table(
    ui: &mut dyn crate::host::UiSink,
    title: &str,
    headers: &[&str],
    rows: &[Vec<Cell>],
) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.text().len());
        }
    }

    ui.table_begin(title, headers.len(), rows.len());
    for (width, label) in widths.iter().zip(headers) {
        ui.table_header(*width, label);
    }
    ui.table_body();
    for row in rows {
        ui.row_begin();
        for (cell, label) in row.iter().zip(headers) {
            match cell {
                Cell::Str(s) => ui.field_string(label, s),
                Cell::Int(n) => ui.field_int(label, *n),
            }
        }
        ui.row_end();
    }
    ui.table_end();
}

fn marker(focus: Option<&Coords>, point: &Coords) -> Cell {
    let hit = focus.is_some_and(|f| point.matches_point(f));
    Cell::Str(if hit { "*".to_string() } else { String::new() })
}

fn hex(v: u64) -> Cell {
    Cell::Str(format!("{v:#x}"))
}

fn mask64(v: u64) -> Cell {
    Cell::Str(format!("{v:#018x}"))
}

fn mask32(v: u32) -> Cell {
    Cell::Str(format!("{v:#010x}"))
}

// ===============================================================================================
// Dispatcher
// ===============================================================================================

impl Session {
    /// Entry point for `info cuda <view> [filter]`.
    pub fn info_cuda(&mut self, args: &str) -> Result<()> {
        let trimmed = args.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingArgument(
                "info cuda needs a view: devices, sms, warps, lanes, kernels, blocks, threads, contexts".into(),
            ));
        }
        let (what, filter) = match trimmed.split_once(char::is_whitespace) {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        match what {
            "devices" => self.info_devices(filter),
            "sms" => self.info_sms(filter),
            "warps" => self.info_warps(filter),
            "lanes" => self.info_lanes(filter),
            "kernels" => self.info_kernels(filter),
            "blocks" => self.info_blocks(filter),
            "threads" => self.info_threads(filter),
            "contexts" => self.info_contexts(filter),
            other => Err(Error::UnrecognizedOption(other.to_string())),
        }
    }

    fn parse_filter(&mut self, filter: &str) -> Result<Coords> {
        let req = parser::parse(filter, AcceptedKinds::FILTER, UnspecifiedDefault::Wildcard)?;
        Ok(req
            .coords
            .evaluate_current(self.focus.get_current(), req.physical_selector))
    }

    // ===========================================================================================
    // Physical Views
    // ===========================================================================================

    pub fn info_devices(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Devices, &filter, Select::All)?;
        let focus = self.focus.get_current().copied();

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            let Some(dev) = point.dev.val() else {
                continue;
            };
            let description = self.device_get_device_type(dev)?;
            let sm_type = self.device_get_sm_type(dev)?;
            let num_sms = self.device_get_num_sms(dev)?;
            let num_warps = self.device_get_num_warps(dev)?;
            let num_lanes = self.device_get_num_lanes(dev)?;
            let num_regs = self.device_get_num_registers(dev)?;
            let active = if self.device_is_valid(dev)? {
                self.device_get_active_sms_mask(dev)?
            } else {
                0
            };
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(u64::from(dev)),
                Cell::Str(description),
                Cell::Str(sm_type),
                Cell::Int(u64::from(num_sms)),
                Cell::Int(u64::from(num_warps)),
                Cell::Int(u64::from(num_lanes)),
                Cell::Int(u64::from(num_regs)),
                mask64(active),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "devices",
            &[
                " ", "Dev", "Description", "SM Type", "SMs", "Warps/SM", "Lanes/Warp",
                "Max Regs/Lane", "Active SMs Mask",
            ],
            &rows,
        );
        Ok(())
    }

    pub fn info_sms(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Sms, &filter, Select::Valid)?;
        let focus = self.focus.get_current().copied();

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            let (dev, sm) = (point.dev.val().unwrap_or_default(), point.sm.val().unwrap_or_default());
            let valid = self.sm_get_valid_warps_mask(dev, sm)?;
            let broken = self.sm_get_broken_warps_mask(dev, sm)?;
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(u64::from(dev)),
                Cell::Int(u64::from(sm)),
                mask64(valid),
                mask64(broken),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "sms",
            &[" ", "Dev", "SM", "Active Warps Mask", "Broken Warps Mask"],
            &rows,
        );
        Ok(())
    }

    pub fn info_warps(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Warps, &filter, Select::Valid)?;
        let focus = self.focus.get_current().copied();

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            let dev = point.dev.val().unwrap_or_default();
            let sm = point.sm.val().unwrap_or_default();
            let wp = point.wp.val().unwrap_or_default();
            let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
            let divergent = self.warp_get_divergent_lanes_mask(dev, sm, wp)?;
            let pc = self.warp_get_active_pc(dev, sm, wp)?;
            let kernel = self.warp_get_kernel(dev, sm, wp)?;
            let block = self.warp_get_block_idx(dev, sm, wp)?;
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(u64::from(dev)),
                Cell::Int(u64::from(sm)),
                Cell::Int(u64::from(wp)),
                mask32(active),
                mask32(divergent),
                hex(pc),
                Cell::Int(kernel),
                Cell::Str(block.to_string()),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "warps",
            &[
                " ", "Dev", "SM", "Wp", "Active Lanes Mask", "Divergent Lanes Mask",
                "Active PC", "Kernel", "BlockIdx",
            ],
            &rows,
        );
        Ok(())
    }

    pub fn info_lanes(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Lanes, &filter, Select::Valid)?;
        let focus = self.focus.get_current().copied();

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            let dev = point.dev.val().unwrap_or_default();
            let sm = point.sm.val().unwrap_or_default();
            let wp = point.wp.val().unwrap_or_default();
            let ln = point.ln.val().unwrap_or_default();
            let state = if self.lane_is_active(dev, sm, wp, ln)? {
                "active"
            } else {
                "divergent"
            };
            let pc = self.lane_get_pc(dev, sm, wp, ln)?;
            let thread_idx = self.lane_get_thread_idx(dev, sm, wp, ln)?;
            let exception = self.lane_get_exception(dev, sm, wp, ln)?;
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(u64::from(dev)),
                Cell::Int(u64::from(sm)),
                Cell::Int(u64::from(wp)),
                Cell::Int(u64::from(ln)),
                Cell::Str(state.to_string()),
                hex(pc),
                Cell::Str(thread_idx.to_string()),
                Cell::Str(exception.to_string()),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "lanes",
            &[" ", "Dev", "SM", "Wp", "Ln", "State", "Physical PC", "ThreadIdx", "Exception"],
            &rows,
        );
        Ok(())
    }

    // ===========================================================================================
    // Logical Views
    // ===========================================================================================

    pub fn info_kernels(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Kernels, &filter, Select::Valid)?;
        let focus = self.focus.get_current().copied();

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            let Some(kernel_id) = point.kernel_id.val() else {
                continue;
            };
            let sms_mask = self.kernel_compute_sms_mask(kernel_id)?;
            let Some(k) = self.kernels.find_by_kernel_id(kernel_id) else {
                continue;
            };
            let parent = if k.parent_grid_id == 0 {
                Cell::Str("-".to_string())
            } else {
                Cell::Int(k.parent_grid_id)
            };
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(kernel_id),
                parent,
                Cell::Int(u64::from(k.dev_id)),
                Cell::Int(k.grid_id),
                mask64(sms_mask),
                Cell::Str(k.grid_dim.to_string()),
                Cell::Str(k.block_dim.to_string()),
                Cell::Str(k.origin.to_string()),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "kernels",
            &[
                " ", "Kernel", "Parent", "Dev", "Grid", "SMs Mask", "GridDim", "BlockDim",
                "Origin",
            ],
            &rows,
        );
        Ok(())
    }

    pub fn info_blocks(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Blocks, &filter, Select::Valid)?;
        let focus = self.focus.get_current().copied();

        if self.options.coalescing {
            let runs = self.coalesce_block_runs(iter.points())?;
            let rows: Vec<Vec<Cell>> = runs
                .iter()
                .map(|r| {
                    vec![
                        Cell::Int(r.from.kernel_id.val().unwrap_or_default()),
                        Cell::Str(r.from.block_idx.val().unwrap_or_default().to_string()),
                        Cell::Str(r.to.block_idx.val().unwrap_or_default().to_string()),
                        Cell::Int(r.count),
                    ]
                })
                .collect();
            emit_table(
                self.ui.as_mut(),
                "blocks",
                &["Kernel", "From BlockIdx", "To BlockIdx", "Count"],
                &rows,
            );
            return Ok(());
        }

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(point.kernel_id.val().unwrap_or_default()),
                Cell::Str(point.block_idx.val().unwrap_or_default().to_string()),
                Cell::Int(u64::from(point.dev.val().unwrap_or_default())),
                Cell::Int(u64::from(point.sm.val().unwrap_or_default())),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "blocks",
            &[" ", "Kernel", "BlockIdx", "Dev", "SM"],
            &rows,
        );
        Ok(())
    }

    pub fn info_threads(&mut self, filter: &str) -> Result<()> {
        let filter = self.parse_filter(filter)?;
        let iter = self.iterate(IteratorKind::Threads, &filter, Select::Valid)?;
        let focus = self.focus.get_current().copied();

        if self.options.coalescing {
            let runs = self.coalesce_thread_runs(iter.points())?;
            let rows: Vec<Vec<Cell>> = runs
                .iter()
                .map(|r| {
                    vec![
                        Cell::Int(r.from.kernel_id.val().unwrap_or_default()),
                        Cell::Str(r.from.block_idx.val().unwrap_or_default().to_string()),
                        Cell::Str(r.from.thread_idx.val().unwrap_or_default().to_string()),
                        Cell::Str(r.to.block_idx.val().unwrap_or_default().to_string()),
                        Cell::Str(r.to.thread_idx.val().unwrap_or_default().to_string()),
                        Cell::Int(r.count),
                        hex(r.virtual_pc),
                        Cell::Str(r.source.as_ref().map(|s| s.filename.clone()).unwrap_or_default()),
                        Cell::Int(r.source.as_ref().map(|s| u64::from(s.line)).unwrap_or_default()),
                    ]
                })
                .collect();
            emit_table(
                self.ui.as_mut(),
                "threads",
                &[
                    "Kernel", "From BlockIdx", "From ThreadIdx", "To BlockIdx", "To ThreadIdx",
                    "Count", "Virtual PC", "Filename", "Line",
                ],
                &rows,
            );
            return Ok(());
        }

        let mut rows = Vec::with_capacity(iter.size());
        for point in iter.points() {
            let dev = point.dev.val().unwrap_or_default();
            let sm = point.sm.val().unwrap_or_default();
            let wp = point.wp.val().unwrap_or_default();
            let ln = point.ln.val().unwrap_or_default();
            let vpc = self.lane_get_virtual_pc(dev, sm, wp, ln)?;
            let source = self.host.find_source_line(vpc);
            rows.push(vec![
                marker(focus.as_ref(), point),
                Cell::Int(point.kernel_id.val().unwrap_or_default()),
                Cell::Str(point.block_idx.val().unwrap_or_default().to_string()),
                Cell::Str(point.thread_idx.val().unwrap_or_default().to_string()),
                hex(vpc),
                Cell::Int(u64::from(dev)),
                Cell::Int(u64::from(sm)),
                Cell::Int(u64::from(wp)),
                Cell::Int(u64::from(ln)),
                Cell::Str(source.as_ref().map(|s| s.filename.clone()).unwrap_or_default()),
                Cell::Int(source.as_ref().map(|s| u64::from(s.line)).unwrap_or_default()),
            ]);
        }
        emit_table(
            self.ui.as_mut(),
            "threads",
            &[
                " ", "Kernel", "BlockIdx", "ThreadIdx", "Virtual PC", "Dev", "SM", "Wp", "Ln",
                "Filename", "Line",
            ],
            &rows,
        );
        Ok(())
    }

    /// Every context on every device, with the UI-current one marked.
    pub fn info_contexts(&mut self, _filter: &str) -> Result<()> {
        let num_devices = self.system_get_num_devices()?;
        let current = self.current_context;

        let mut rows = Vec::new();
        for dev in 0..num_devices {
            for ctx in self.system.device(dev).contexts.contexts() {
                let mark = if current == Some((dev, ctx.context_id)) {
                    "*"
                } else {
                    ""
                };
                rows.push(vec![
                    Cell::Str(mark.to_string()),
                    Cell::Str(format!("{:#x}", ctx.context_id)),
                    Cell::Int(u64::from(dev)),
                    Cell::Int(ctx.modules.len() as u64),
                ]);
            }
        }
        emit_table(
            self.ui.as_mut(),
            "contexts",
            &[" ", "Context", "Dev", "Modules"],
            &rows,
        );
        Ok(())
    }
}

// ===============================================================================================
// Coalescing
// ===============================================================================================

#[derive(Debug, Clone)]
pub(crate) struct CoalescedRun {
    pub(crate) from: Coords,
    pub(crate) to: Coords,
    pub(crate) count: u64,
    pub(crate) virtual_pc: u64,
    pub(crate) source: Option<SourceLine>,
}

impl Session {
    /// Collapses logically-contiguous thread points with identical display
    /// attributes (virtual PC, filename, line) into from/to runs.
    pub(crate) fn coalesce_thread_runs(&mut self, points: &[Coords]) -> Result<Vec<CoalescedRun>> {
        let mut runs = Vec::new();
        let mut i = 0;
        while i < points.len() {
            let first = points[i];
            let dims = first
                .kernel_id
                .val()
                .and_then(|k| self.kernels.find_by_kernel_id(k))
                .map(|k| (k.grid_dim, k.block_dim));
            let vpc = self.point_virtual_pc(&first)?;
            let source = self.host.find_source_line(vpc);

            let mut j = i;
            if let Some((grid_dim, block_dim)) = dims {
                let mut expected = first;
                while j + 1 < points.len() {
                    if !expected.increment_thread(grid_dim, block_dim) {
                        break;
                    }
                    let next = points[j + 1];
                    if next.kernel_id != first.kernel_id
                        || next.block_idx != expected.block_idx
                        || next.thread_idx != expected.thread_idx
                    {
                        break;
                    }
                    let next_vpc = self.point_virtual_pc(&next)?;
                    if next_vpc != vpc || self.host.find_source_line(next_vpc) != source {
                        break;
                    }
                    j += 1;
                }
            }

            runs.push(CoalescedRun {
                from: first,
                to: points[j],
                count: (j - i + 1) as u64,
                virtual_pc: vpc,
                source,
            });
            i = j + 1;
        }
        Ok(runs)
    }

    /// Same shape for blocks; the only display attribute is the kernel.
    pub(crate) fn coalesce_block_runs(&mut self, points: &[Coords]) -> Result<Vec<CoalescedRun>> {
        let mut runs = Vec::new();
        let mut i = 0;
        while i < points.len() {
            let first = points[i];
            let grid_dim = first
                .kernel_id
                .val()
                .and_then(|k| self.kernels.find_by_kernel_id(k))
                .map(|k| k.grid_dim);

            let mut j = i;
            if let Some(grid_dim) = grid_dim {
                let mut expected = first;
                while j + 1 < points.len() {
                    if !expected.increment_block(grid_dim) {
                        break;
                    }
                    let next = points[j + 1];
                    if next.kernel_id != first.kernel_id || next.block_idx != expected.block_idx {
                        break;
                    }
                    j += 1;
                }
            }

            runs.push(CoalescedRun {
                from: first,
                to: points[j],
                count: (j - i + 1) as u64,
                virtual_pc: 0,
                source: None,
            });
            i = j + 1;
        }
        Ok(runs)
    }

    fn point_virtual_pc(&mut self, point: &Coords) -> Result<u64> {
        self.lane_get_virtual_pc(
            point.dev.val().unwrap_or_default(),
            point.sm.val().unwrap_or_default(),
            point.wp.val().unwrap_or_default(),
            point.ln.val().unwrap_or_default(),
        )
    }
}
