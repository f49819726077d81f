//! Semantic handlers for control flow, method return, and the opcodes that
//! suspend or signal: sleep, stall, mutexes, events, notify, fatal.

use tracing::{debug, warn};

use crate::consts::{TICKS_PER_MS, TIMEOUT_INFINITE};
use crate::error::{AmlError, Result};
use crate::host::FirmwareRequest;
use crate::object::Object;
use crate::opcode::code;
use crate::sync::Acquired;

use super::exec::Ctx;
use super::frame::{BlockKind, CodeBlock, WhileEntry};
use super::Interpreter;

impl Interpreter {
    /// `If`/`Else`/`While`/`Scope`: evaluate the entry condition and either
    /// enter the body (pushing a code block) or jump the cursor past it.
    pub(super) fn handle_code_block(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;
        let pkg = ctx.item_pkg(0)?;

        let skip = match op {
            code::ELSE => ctx.skip_else,
            code::SCOPE => false,
            code::IF | code::WHILE => {
                self.objects.get(ctx.item_obj(1)?).as_integer()? == 0
            }
            _ => return Err(AmlError::InvalidArgument),
        };

        if op == code::WHILE {
            // The loop budget is tracked per dynamic entry, keyed by the
            // opcode's offset; leaving the loop retires the entry.
            let begin = pkg.begin - 1;
            let now = self.host.ticks();
            let deadline = now + self.params.loop_timeout_ms * TICKS_PER_MS;
            let frame = ctx.frame();

            if skip {
                frame.whiles.retain(|w| w.begin != begin);
            } else if let Some(entry) = frame.whiles.iter().find(|w| w.begin == begin) {
                if now >= entry.deadline_ticks {
                    warn!("while loop exceeded its wall-clock budget");
                    frame.whiles.retain(|w| w.begin != begin);
                    return Err(AmlError::LoopTimeout);
                }
            } else {
                frame.whiles.push(WhileEntry {
                    begin,
                    deadline_ticks: deadline,
                });
            }
        }

        if skip {
            ctx.frame().code_offset = pkg.end;
            return Ok(());
        }

        let (kind, node) = match op {
            code::IF => (BlockKind::If, None),
            code::ELSE => (BlockKind::Else, None),
            code::WHILE => (BlockKind::While, None),
            code::SCOPE => (BlockKind::Scope, Some(ctx.item_node(1)?)),
            _ => unreachable!("filtered above"),
        };

        let frame = ctx.frame();
        frame.blocks.push(CodeBlock {
            // One byte back so `While` re-evaluates from its opcode.
            begin: pkg.begin - 1,
            end: pkg.end,
            kind,
            node,
        });
        if kind == BlockKind::Scope {
            frame.update_scope();
        }
        Ok(())
    }

    /// `Break`/`Continue`: unwind the block stack to the innermost `While`
    /// and jump to its end or its re-evaluation point.
    pub(super) fn handle_control_flow(&mut self, ctx: &mut Ctx) -> Result<()> {
        let is_break = ctx.op().spec.code == code::BREAK;
        let frame = ctx.frame();

        loop {
            let Some(block) = frame.blocks.last().copied() else {
                warn!("Break/Continue outside of a While");
                return Err(AmlError::BadBytecode);
            };

            if block.kind != BlockKind::While {
                frame.blocks.pop();
                frame.update_scope();
                continue;
            }

            if is_break {
                frame.code_offset = block.end;
                frame.whiles.retain(|w| w.begin != block.begin);
            } else {
                frame.code_offset = block.begin;
            }
            frame.blocks.pop();
            return Ok(());
        }
    }

    /// `Return`: park the cursor at the end of the body and hand the value
    /// to whoever awaits it one frame below (or the evaluation's return
    /// slot).
    pub(super) fn handle_return(&mut self, ctx: &mut Ctx) -> Result<()> {
        let value = ctx.item_obj(0)?;
        {
            let frame = ctx.frame();
            frame.code_offset = frame.method.len;
        }

        match self.method_ret_target(ctx) {
            // Call site discarded the value.
            None => Ok(()),
            Some(dst) => {
                let dst = self.objects.deref_internal(dst);
                self.objects.assign_deep(dst, value);
                Ok(())
            }
        }
    }

    pub(super) fn handle_acquire(&mut self, ctx: &mut Ctx) -> Result<()> {
        let mutex = match self.objects.get(ctx.item_obj(0)?) {
            Object::Mutex(id) => *id,
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };
        let timeout = ctx.item_imm(1)? as u16;

        let timed_out = match self.sync.acquire(self.host.as_ref(), mutex, timeout)? {
            Acquired::Yes => {
                ctx.frame().held_mutexes.push(mutex);
                false
            }
            Acquired::TimedOut => true,
        };

        // Acquire answers true on timeout.
        let value = if timed_out { self.ones() } else { 0 };
        self.set_result(ctx, 2, Object::Integer(value))
    }

    pub(super) fn handle_release(&mut self, ctx: &mut Ctx) -> Result<()> {
        let mutex = match self.objects.get(ctx.item_obj(0)?) {
            Object::Mutex(id) => *id,
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        self.sync.release(self.host.as_ref(), mutex)?;
        let frame = ctx.frame();
        if let Some(pos) = frame.held_mutexes.iter().rposition(|&m| m == mutex) {
            frame.held_mutexes.remove(pos);
        }
        Ok(())
    }

    fn item_event(&self, ctx: &Ctx) -> Result<crate::sync::EventId> {
        match self.objects.get(ctx.item_obj(0)?) {
            Object::Event(id) => Ok(*id),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    pub(super) fn handle_wait_event(&mut self, ctx: &mut Ctx) -> Result<()> {
        let event = self.item_event(ctx)?;
        let timeout = self.objects.get(ctx.item_obj(1)?).as_integer()?;
        let timeout = if timeout >= TIMEOUT_INFINITE as u64 {
            TIMEOUT_INFINITE
        } else {
            timeout as u16
        };

        let satisfied = self.sync.wait(self.host.as_ref(), event, timeout);
        let value = if satisfied { 0 } else { self.ones() };
        self.set_result(ctx, 2, Object::Integer(value))
    }

    pub(super) fn handle_signal_event(&mut self, ctx: &mut Ctx) -> Result<()> {
        let event = self.item_event(ctx)?;
        self.sync.signal(event);
        Ok(())
    }

    pub(super) fn handle_reset_event(&mut self, ctx: &mut Ctx) -> Result<()> {
        let event = self.item_event(ctx)?;
        self.sync.reset(event);
        Ok(())
    }

    pub(super) fn handle_stall(&mut self, ctx: &mut Ctx) -> Result<()> {
        let usec = self.objects.get(ctx.item_obj(0)?).as_integer()?;
        self.host.stall(usec);
        Ok(())
    }

    pub(super) fn handle_sleep(&mut self, ctx: &mut Ctx) -> Result<()> {
        let msec = self.objects.get(ctx.item_obj(0)?).as_integer()?;
        self.host.sleep(msec);
        Ok(())
    }

    pub(super) fn handle_timer(&mut self, ctx: &mut Ctx) -> Result<()> {
        let ticks = self.host.ticks();
        self.set_result(ctx, 0, Object::Integer(ticks))
    }

    pub(super) fn handle_fatal(&mut self, ctx: &mut Ctx) -> Result<()> {
        let kind = ctx.item_imm(0)? as u8;
        let code = ctx.item_imm(1)? as u32;
        let arg = self.objects.get(ctx.item_obj(2)?).as_integer()?;

        warn!(kind, code, arg, "AML Fatal");
        self.host
            .firmware_request(FirmwareRequest::Fatal { kind, code, arg })
    }

    pub(super) fn handle_breakpoint(&mut self, ctx: &mut Ctx) -> Result<()> {
        let offset = ctx.frame_ref().code_offset;
        debug!(offset, "AML BreakPoint");
        self.host.firmware_request(FirmwareRequest::Breakpoint)
    }

    pub(super) fn handle_notify(&mut self, ctx: &mut Ctx) -> Result<()> {
        let target = self.objects.unwind(ctx.item_obj(0)?);
        let value = self.objects.get(ctx.item_obj(1)?).as_integer()?;

        let node = self
            .ns
            .owner_of(target)
            .ok_or(AmlError::InvalidArgument)?;
        if node != self.ns.root() {
            match self.objects.get(target) {
                Object::Device | Object::ThermalZone | Object::Processor { .. } => {}
                other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
            }
        }

        self.dispatch_notification(node, value)
    }
}
