//! Per-device registry of GPU execution contexts and their loaded modules.
//!
//! Contexts are owned by exactly one device's registry. Between its create
//! and destroy events a context may be pushed and popped on per-host-thread
//! stacks; the stack top is that thread's active context.

use crate::host::HostDebugger;
use std::collections::HashMap;

/// A loaded ELF image inside a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub module_id: u64,
    pub context_id: u64,
    pub elf_image: u64,
    pub elf_size: u64,
}

impl Module {
    /// True when `addr` falls inside this image's text range.
    #[must_use]
    pub fn contains_address(&self, addr: u64) -> bool {
        addr >= self.elf_image && addr < self.elf_image.saturating_add(self.elf_size)
    }
}

/// A GPU execution context and the modules it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub context_id: u64,
    pub dev_id: u32,
    pub modules: Vec<Module>,
}

impl Context {
    pub fn new(context_id: u64, dev_id: u32) -> Self {
        Self {
            context_id,
            dev_id,
            modules: Vec::new(),
        }
    }

    pub fn find_module(&self, module_id: u64) -> Option<&Module> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }
}

/// One device's context list plus the per-host-thread context stacks.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: Vec<Context>,
    stacks: HashMap<u32, Vec<u64>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_context(&mut self, ctx: Context) {
        debug_assert!(
            self.find_by_id(ctx.context_id).is_none(),
            "duplicate context id {:#x}",
            ctx.context_id
        );
        self.contexts.push(ctx);
    }

    /// Unlinks and returns the context. Stack entries referring to it are the
    /// caller's to unwind first.
    pub fn remove_context(&mut self, context_id: u64) -> Option<Context> {
        let pos = self.contexts.iter().position(|c| c.context_id == context_id)?;
        Some(self.contexts.remove(pos))
    }

    pub fn stack_context(&mut self, context_id: u64, tid: u32) {
        self.stacks.entry(tid).or_default().push(context_id);
    }

    pub fn unstack_context(&mut self, tid: u32) -> Option<u64> {
        let stack = self.stacks.get_mut(&tid)?;
        let top = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(&tid);
        }
        top
    }

    pub fn active_context(&self, tid: u32) -> Option<u64> {
        self.stacks.get(&tid).and_then(|s| s.last().copied())
    }

    pub fn find_by_id(&self, context_id: u64) -> Option<&Context> {
        self.contexts.iter().find(|c| c.context_id == context_id)
    }

    pub fn find_by_id_mut(&mut self, context_id: u64) -> Option<&mut Context> {
        self.contexts.iter_mut().find(|c| c.context_id == context_id)
    }

    /// The module whose ELF text range covers `addr`, if any.
    pub fn find_by_address(&self, addr: u64) -> Option<&Module> {
        self.contexts
            .iter()
            .flat_map(|c| c.modules.iter())
            .find(|m| m.contains_address(addr))
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.contexts.iter()
    }

    /// Asks the host to re-resolve breakpoints against every module.
    pub fn resolve_breakpoints(&self, host: &mut dyn HostDebugger) {
        for ctx in &self.contexts {
            for module in &ctx.modules {
                host.resolve_breakpoints(
                    ctx.context_id,
                    module.module_id,
                    module.elf_image,
                    module.elf_size,
                );
            }
        }
    }

    /// Reverts every context's breakpoints to pending.
    pub fn cleanup_breakpoints(&self, host: &mut dyn HostDebugger) {
        for ctx in &self.contexts {
            host.unresolve_breakpoints(ctx.context_id);
        }
    }
}
