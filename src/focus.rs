//! The focus: the coordinate under which debugger commands are interpreted.

use crate::coords::parser::{self, AcceptedKinds, CommandKind, UnspecifiedDefault};
use crate::coords::{
    compare_logical, CandidateKind, CandidateSet, CoordValue, Coords, RequireFlags,
};
use crate::error::{Error, Result};
use crate::iter::{IteratorKind, Select};
use crate::session::Session;

/// Current coordinate plus the save/restore stack used by transient
/// operations (e.g. evaluating an expression under a different focus).
#[derive(Debug, Default)]
pub struct FocusState {
    current: Option<Coords>,
    stack: Vec<Option<Coords>>,
}

impl FocusState {
    pub fn get_current(&self) -> Option<&Coords> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, coords: Coords) {
        self.current = Some(coords);
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn save_current(&mut self) {
        self.stack.push(self.current);
    }

    pub fn restore_current(&mut self) {
        if let Some(saved) = self.stack.pop() {
            self.current = saved;
        }
    }
}

impl Session {
    // ===========================================================================================
    // Focus Accessors
    // ===========================================================================================

    pub fn current_focus(&self) -> Option<&Coords> {
        self.focus.get_current()
    }

    pub fn set_focus(&mut self, coords: Coords) {
        self.focus.set_current(coords);
    }

    pub fn save_focus(&mut self) {
        self.focus.save_current();
    }

    pub fn restore_focus(&mut self) {
        self.focus.restore_current();
    }

    // ===========================================================================================
    // Nearest-Match Resolution
    // ===========================================================================================

    /// Fills the candidate slots for `requested` from the valid lanes of the
    /// mirror. Exact candidates honour every concrete cell; closest
    /// candidates minimise the lexicographic distance along their axis.
    pub fn find_valid_coords(&mut self, requested: &Coords) -> Result<CandidateSet> {
        let iter = self.iterate(IteratorKind::Lanes, &Coords::wildcard(), Select::Valid)?;
        let mut set = CandidateSet::default();

        let mut exact_logical: Option<Coords> = None;
        let mut closest_physical: Option<(Coords, [u64; 4])> = None;
        let mut closest_logical: Option<(Coords, [u64; 7])> = None;

        for point in iter.points() {
            if requested.matches_point(point) {
                if set.get(CandidateKind::ExactPhysical).is_none() {
                    set.set(CandidateKind::ExactPhysical, *point);
                }
                let better = exact_logical
                    .as_ref()
                    .is_none_or(|best| compare_logical(point, best).is_lt());
                if better {
                    exact_logical = Some(*point);
                }
            }

            let pd = requested.physical_distance(point);
            let better_physical = closest_physical.as_ref().is_none_or(|(_, best)| pd < *best);
            if better_physical {
                closest_physical = Some((*point, pd));
            }

            let ld = requested.logical_distance(point);
            let better_logical = closest_logical.as_ref().is_none_or(|(best, bd)| {
                ld < *bd || (ld == *bd && compare_logical(point, best).is_lt())
            });
            if better_logical {
                closest_logical = Some((*point, ld));
            }
        }

        if let Some(c) = exact_logical {
            set.set(CandidateKind::ExactLogical, c);
        }
        if let Some((c, _)) = closest_physical {
            set.set(CandidateKind::ClosestPhysical, c);
        }
        if let Some((c, _)) = closest_logical {
            set.set(CandidateKind::ClosestLogical, c);
        }
        Ok(set)
    }

    // ===========================================================================================
    // Commands
    // ===========================================================================================

    /// The `cuda <selectors>` focus-switch command.
    pub fn command_switch(&mut self, arg: &str) -> Result<()> {
        let req = parser::parse(
            arg,
            AcceptedKinds::SWITCH | AcceptedKinds::QUERY,
            UnspecifiedDefault::Current,
        )?;
        if req.kind == CommandKind::Query {
            return self.command_query(arg);
        }

        let focus = self.focus.current;
        let evaluated = req.coords.evaluate_current(focus.as_ref(), req.physical_selector);

        let candidates = self.find_valid_coords(&evaluated)?;
        let kind = if req.physical_selector {
            CandidateKind::ClosestPhysical
        } else {
            CandidateKind::ClosestLogical
        };
        let resolved = *candidates.get(kind).ok_or(Error::UnsatisfiableFocus)?;

        // every cell the user pinned must be honoured by the resolution
        if !req.explicit.matches_point(&resolved) {
            return Err(Error::UnsatisfiableFocus);
        }

        if self.focus.current.as_ref() == Some(&resolved) {
            self.ui.message(&format!("[CUDA focus unchanged: {resolved}]"));
            return Ok(());
        }
        self.apply_focus(resolved)
    }

    fn apply_focus(&mut self, coords: Coords) -> Result<()> {
        debug_assert!(coords.check_fully_defined(RequireFlags::PHYSICAL | RequireFlags::LOGICAL));
        self.focus.set_current(coords);
        self.host.update_convenience_variables(&coords);

        if let (Some(kernel_id), Some(dev)) = (coords.kernel_id.val(), coords.dev.val()) {
            if let Some(k) = self.kernels.find_by_kernel_id(kernel_id) {
                let (module_id, context_id, launch_tid) = (k.module_id, k.context_id, k.launch_tid);
                let module = self
                    .system
                    .device(dev)
                    .contexts
                    .find_by_id(context_id)
                    .and_then(|c| c.find_module(module_id))
                    .map(|m| (m.elf_image, m.elf_size));
                if let Some((elf_image, elf_size)) = module {
                    self.host.load_elf_image(module_id, elf_image, elf_size);
                }
                self.current_context = Some((dev, context_id));
                self.host.switch_to_thread(launch_tid);
            }
        }

        self.ui
            .message(&format!("[Switching focus to CUDA {coords}]"));
        self.host.print_frame();
        Ok(())
    }

    /// The bare-selector query: prints the requested cells of the current
    /// focus without mutating it.
    pub fn command_query(&mut self, arg: &str) -> Result<()> {
        let req = parser::parse(arg, AcceptedKinds::QUERY, UnspecifiedDefault::Wildcard)?;
        let current = self.focus.current.ok_or(Error::NoCurrentDevice)?;

        fn pick<T: Copy + PartialEq>(asked: &CoordValue<T>, cur: &CoordValue<T>) -> CoordValue<T> {
            match asked {
                CoordValue::Current => *cur,
                _ => CoordValue::Wildcard,
            }
        }

        let named_any = req.coords != Coords::wildcard();
        let shown = if named_any {
            Coords {
                valid: true,
                dev: pick(&req.coords.dev, &current.dev),
                sm: pick(&req.coords.sm, &current.sm),
                wp: pick(&req.coords.wp, &current.wp),
                ln: pick(&req.coords.ln, &current.ln),
                kernel_id: pick(&req.coords.kernel_id, &current.kernel_id),
                grid_id: pick(&req.coords.grid_id, &current.grid_id),
                block_idx: pick(&req.coords.block_idx, &current.block_idx),
                thread_idx: pick(&req.coords.thread_idx, &current.thread_idx),
            }
        } else {
            current
        };
        self.ui.message(&shown.to_string());
        Ok(())
    }
}
