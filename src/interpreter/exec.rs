//! The main execution loop: opcode fetch, parse-program stepping,
//! preemption, transfers, block ends and the store-to-target algorithm.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{AmlError, Result};
use crate::namespace::NodeHandle;
use crate::object::{Object, ObjectHandle, ObjectType, RefKind};
use crate::opcode::{self, code, OpSpec, ParseOp};
use crate::opcode::OpProperties;
use crate::stream;

use super::frame::{Frame, Item, OpCtx};
use super::{Interpreter, MethodRef};

/// State of one top-level method evaluation: the call stack and the return
/// slot.
pub(crate) struct Ctx {
    pub frames: Vec<Frame>,
    /// Receives the value of a top-level `Return`.
    pub ret: ObjectHandle,
    /// Set while the `Else` following a taken `If` is being skipped.
    pub skip_else: bool,
}

impl Ctx {
    pub(crate) fn new(ret: ObjectHandle) -> Self {
        Self {
            frames: Vec::new(),
            ret,
            skip_else: false,
        }
    }

    pub(crate) fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("an active call frame")
    }

    pub(crate) fn frame_ref(&self) -> &Frame {
        self.frames.last().expect("an active call frame")
    }

    pub(crate) fn op(&self) -> &OpCtx {
        self.frame_ref().pending.last().expect("an active op")
    }

    pub(crate) fn op_mut(&mut self) -> &mut OpCtx {
        self.frame().pending.last_mut().expect("an active op")
    }

    pub(crate) fn item_obj(&self, index: usize) -> Result<ObjectHandle> {
        self.op().item(index)?.object()
    }

    pub(crate) fn item_node(&self, index: usize) -> Result<NodeHandle> {
        self.op().item(index)?.node()
    }

    pub(crate) fn item_imm(&self, index: usize) -> Result<u64> {
        self.op().item(index)?.imm()
    }

    pub(crate) fn item_pkg(&self, index: usize) -> Result<crate::stream::PkgLength> {
        self.op().item(index)?.pkg()
    }
}

/// Name-string resolution behavior: the create form allocates the last
/// segment, the existing form requires every segment to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolveMode {
    CreateLastSegment,
    FailIfDoesntExist,
}

/// Run `f` against the current frame's code slice and cursor.
pub(crate) fn with_code<R>(frame: &mut Frame, f: impl FnOnce(&[u8], &mut u32) -> R) -> R {
    let image = Arc::clone(&frame.method.image);
    let start = frame.method.start as usize;
    let end = start + frame.method.len as usize;
    let code = &image[start..end];

    let mut offset = frame.code_offset;
    let result = f(code, &mut offset);
    frame.code_offset = offset;
    result
}

fn typecheck_against_parent(want: ParseOp, spec: &OpSpec) -> Result<()> {
    let (mask, expected) = match want {
        ParseOp::SimpleName => (
            OpProperties::SIMPLE_NAME,
            "SimpleName := NameString | ArgObj | LocalObj",
        ),
        ParseOp::Target => (
            OpProperties::TARGET.union(OpProperties::SUPERNAME),
            "Target := SuperName | NullName",
        ),
        ParseOp::SuperName | ParseOp::SuperNameImplicitDeref | ParseOp::MaybeSuperName => (
            OpProperties::SUPERNAME,
            "SuperName := SimpleName | DebugObj | ReferenceTypeOpcode",
        ),
        ParseOp::TermArg
        | ParseOp::TermArgUnwrapInternal
        | ParseOp::Operand
        | ParseOp::PackageElement => (
            OpProperties::TERM_ARG,
            "TermArg := ExpressionOpcode | DataObject | ArgObj | LocalObj",
        ),
        _ => return Ok(()),
    };

    if spec.props.intersects(mask) {
        Ok(())
    } else {
        warn!(op = spec.name, expected, "invalid argument opcode");
        Err(AmlError::BadBytecode)
    }
}

impl Interpreter {
    fn has_non_preempted_op(ctx: &Ctx) -> bool {
        ctx.frames
            .last()
            .and_then(|f| f.pending.last())
            .is_some_and(|op| !op.preempted)
    }

    /// Drive the call stack until it drains or an error unwinds it.
    pub(crate) fn run(&mut self, ctx: &mut Ctx) -> Result<()> {
        loop {
            if !Self::has_non_preempted_op(ctx) {
                if ctx.frames.is_empty() {
                    return Ok(());
                }

                if self.maybe_end_block(ctx) {
                    continue;
                }

                if !ctx.frame_ref().has_code() {
                    let frame = ctx.frames.pop().expect("frame present");
                    self.cleanup_frame(frame);
                    continue;
                }

                self.fetch_op(ctx)?;
            }

            if let Err(err) = self.exec_op(ctx) {
                let frame = ctx.frame_ref();
                let (name, code) = frame
                    .pending
                    .last()
                    .map(|op| (op.spec.name, op.spec.code))
                    .unwrap_or(("?", 0));
                warn!(
                    op = name,
                    code = format_args!("{code:#06X}"),
                    offset = frame.code_offset,
                    error = %err,
                    "aborting method"
                );
                return Err(err);
            }

            ctx.skip_else = false;
        }
    }

    /// Fetch the opcode at the cursor and push a fresh op context for it.
    fn fetch_op(&mut self, ctx: &mut Ctx) -> Result<()> {
        let frame = ctx.frame();
        let offset = frame.code_offset;

        let op = with_code(frame, |code, cursor| -> Result<u16> {
            let byte = stream::read_u8(code, cursor)?;
            if stream::is_name_string_start(byte) {
                return Ok(code::INTERNAL_UNRESOLVED_NAME);
            }
            if byte == crate::consts::EXT_PREFIX {
                let ext = stream::read_u8(code, cursor)?;
                return Ok(0x5B00 | ext as u16);
            }
            Ok(byte as u16)
        })?;

        let spec = opcode::lookup(op).ok_or_else(|| {
            warn!(code = format_args!("{op:#06X}"), offset, "illegal opcode");
            AmlError::BadBytecode
        })?;

        trace!(
            op = spec.name,
            code = format_args!("{:#06X}", spec.code),
            offset,
            "processing op"
        );
        ctx.frame().pending.push(OpCtx::new(spec));
        Ok(())
    }

    /// Apply block-end semantics when the cursor reached the innermost
    /// block's end. Returns whether the main loop should restart without
    /// fetching (the just-ended `If` must keep `skip_else` armed).
    fn maybe_end_block(&mut self, ctx: &mut Ctx) -> bool {
        let block = {
            let frame = ctx.frame_ref();
            match frame.blocks.last() {
                Some(block) if frame.code_offset == block.end => *block,
                _ => return false,
            }
        };

        ctx.skip_else = false;
        let mut restart = false;

        match block.kind {
            super::frame::BlockKind::While => ctx.frame().code_offset = block.begin,
            super::frame::BlockKind::If => {
                ctx.skip_else = true;
                restart = true;
            }
            _ => {}
        }

        let frame = ctx.frame();
        frame.blocks.pop();
        frame.update_scope();
        restart
    }

    /// Step the innermost pending op's parse program until it preempts,
    /// finishes, or dispatches a method call.
    fn exec_op(&mut self, ctx: &mut Ctx) -> Result<()> {
        let prev_awaited = {
            let frame = ctx.frame_ref();
            frame
                .prev_op()
                .filter(|op| op.preempted)
                .map(|op| op.spec.decode[op.pc])
        };

        loop {
            {
                let op = ctx.op();
                if op.pc == 0 {
                    if let Some(want) = prev_awaited {
                        typecheck_against_parent(want, op.spec)?;
                    }
                }
            }

            let step = {
                let op = ctx.op_mut();
                let step = op.spec.decode[op.pc];
                op.pc += 1;
                step
            };

            match step {
                ParseOp::PackageElement => {
                    let end = {
                        let op = ctx.op();
                        let idx = op.tracked_pkg.ok_or(AmlError::BadBytecode)?;
                        op.item(idx)?.pkg()?.end
                    };
                    if ctx.frame_ref().code_offset >= end {
                        continue;
                    }
                    let op = ctx.op_mut();
                    op.preempted = true;
                    op.pc -= 1;
                    return Ok(());
                }

                step if step.requests_expression() => {
                    let op = ctx.op_mut();
                    op.items.push(Item::Empty);
                    op.preempted = true;
                    op.pc -= 1;
                    return Ok(());
                }

                ParseOp::PkgLen | ParseOp::TrackedPkgLen => {
                    let frame = ctx.frame();
                    let pkg = with_code(frame, stream::parse_pkg_length)?;
                    if pkg.end > frame.method.len {
                        return Err(AmlError::BadBytecode);
                    }
                    let op = ctx.op_mut();
                    op.items.push(Item::Pkg(pkg));
                    if step == ParseOp::TrackedPkgLen {
                        op.tracked_pkg = Some(op.items.len() - 1);
                    }
                }

                ParseOp::CreateNamestring => {
                    let node = self.resolve_name(ctx, ResolveMode::CreateLastSegment)?;
                    ctx.op_mut().items.push(Item::Node(node));
                }

                ParseOp::ExistingNamestring => {
                    match self.resolve_name(ctx, ResolveMode::FailIfDoesntExist) {
                        Ok(node) => ctx.op_mut().items.push(Item::Node(node)),
                        Err(AmlError::UndefinedReference)
                            if prev_awaited == Some(ParseOp::MaybeSuperName) =>
                        {
                            // CondRefOf on a missing name: report "absent"
                            // instead of aborting.
                            return self.recover_unresolved(ctx);
                        }
                        Err(err) => return Err(err),
                    }
                }

                ParseOp::SkipNamestring => {
                    let frame = ctx.frame();
                    with_code(frame, stream::skip_name_string)?;
                }

                ParseOp::LoadImm(width) => {
                    let frame = ctx.frame();
                    let value = with_code(frame, |code, cursor| {
                        stream::read_le(code, cursor, width as usize)
                    })?;
                    ctx.op_mut().items.push(Item::Imm(value));
                }

                ParseOp::LoadImmAsObject(width) => {
                    let frame = ctx.frame();
                    let value = with_code(frame, |code, cursor| {
                        stream::read_le(code, cursor, width as usize)
                    })?;
                    let handle = self.objects.alloc(Object::Integer(value));
                    ctx.op_mut().items.push(Item::Object(handle));
                }

                ParseOp::LoadInlineImm(value) => {
                    let handle = self.objects.alloc(Object::Integer(value));
                    ctx.op_mut().items.push(Item::Object(handle));
                }

                ParseOp::RecordAmlPc => {
                    let offset = ctx.frame_ref().code_offset;
                    ctx.op_mut().items.push(Item::Imm(offset as u64));
                }

                ParseOp::AmlPcDecrement => {
                    ctx.frame().code_offset -= 1;
                }

                ParseOp::ObjectAlloc => {
                    let handle = self.objects.alloc(Object::Uninitialized);
                    ctx.op_mut().items.push(Item::Object(handle));
                }

                ParseOp::ObjectAllocTyped(ty) => {
                    let object = match ty {
                        ObjectType::Integer => Object::Integer(0),
                        ObjectType::String => Object::String(Vec::new()),
                        ObjectType::Buffer => Object::Buffer(Vec::new()),
                        ObjectType::Package => Object::Package(Vec::new()),
                        ObjectType::Debug => Object::Debug,
                        _ => unreachable!("no typed allocation for {ty}"),
                    };
                    let handle = self.objects.alloc(object);
                    ctx.op_mut().items.push(Item::Object(handle));
                }

                ParseOp::TruncateNumber => {
                    let handle = ctx.op().items.last().ok_or(AmlError::BadBytecode)?.object()?;
                    let truncated = self.truncate(self.objects.get(handle).as_integer()?);
                    *self.objects.get_mut(handle) = Object::Integer(truncated);
                }

                ParseOp::Typecheck(ty) => {
                    let handle = ctx.op().items.last().ok_or(AmlError::BadBytecode)?.object()?;
                    let actual = self.objects.type_of(handle);
                    if actual != ty {
                        warn!(op = ctx.op().spec.name, expected = %ty, got = %actual, "bad object type");
                        return Err(AmlError::IncompatibleObjectType(actual));
                    }
                }

                ParseOp::ItemPop => {
                    if let Some(Item::Object(handle)) = ctx.op_mut().items.pop() {
                        self.objects.unref(handle);
                    }
                }

                ParseOp::InstallNamespaceNode(index) => {
                    let node = ctx.item_node(index as usize)?;
                    let parent = self.ns.parent(node).unwrap_or_else(|| self.ns.root());
                    self.ns.install(parent, node);
                }

                ParseOp::ConvertNamestring => {
                    let node = ctx.op().items.last().ok_or(AmlError::BadBytecode)?.node()?;
                    let wants_name = prev_awaited.is_some_and(|p| p.wants_name());

                    let new_code = if wants_name {
                        code::INTERNAL_NAMED_OBJECT
                    } else {
                        match self.objects.get(self.ns.object(node)) {
                            Object::Method(method) => {
                                code::INTERNAL_METHOD_CALL0 + method.args as u16
                            }
                            _ => code::INTERNAL_NAMED_OBJECT,
                        }
                    };

                    let op = ctx.op_mut();
                    op.spec = opcode::lookup(new_code).expect("internal pseudo-op");
                    op.pc = 0;
                }

                ParseOp::ObjectTransferToPrev | ParseOp::ObjectCopyToPrev => {
                    let Some(want) = prev_awaited else {
                        continue;
                    };
                    let src = ctx.op().items.last().ok_or(AmlError::BadBytecode)?.object()?;
                    let mut owned = self.coerce_for_parent(ctx, want, src)?;

                    if step == ParseOp::ObjectCopyToPrev {
                        let copy = self.objects.clone_deep(owned);
                        let copy = self.objects.alloc(copy);
                        self.objects.unref(owned);
                        owned = copy;
                    }

                    self.deliver_to_parent(ctx, want, owned)?;
                }

                ParseOp::StoreToTargetIndirect(target, source) => {
                    let dst = ctx.item_obj(target as usize)?;
                    let src = ctx.item_obj(source as usize)?;
                    self.store_to_target(dst, src)?;
                }

                ParseOp::InvokeHandler => self.dispatch_handler(ctx)?,

                ParseOp::DispatchMethodCall => {
                    if self.dispatch_method_call(ctx)? {
                        return Ok(());
                    }
                }

                ParseOp::Todo => {
                    warn!(op = ctx.op().spec.name, "not yet implemented");
                    return Err(AmlError::Unimplemented);
                }

                ParseOp::End => return self.finish_op(ctx),

                other => {
                    warn!(?other, "unhandled parse op");
                    return Err(AmlError::Unimplemented);
                }
            }
        }
    }

    /// Route `InvokeHandler` to the opcode's semantic action.
    fn dispatch_handler(&mut self, ctx: &mut Ctx) -> Result<()> {
        use crate::opcode::OpHandler;

        match ctx.op().spec.handler {
            OpHandler::None => {
                warn!(op = ctx.op().spec.name, "no dedicated handler installed");
                Err(AmlError::Unimplemented)
            }
            OpHandler::Local => self.handle_local(ctx),
            OpHandler::Arg => self.handle_arg(ctx),
            OpHandler::NamedObject => self.handle_named_object(ctx),
            OpHandler::String => self.handle_string(ctx),
            OpHandler::Buffer => self.handle_buffer(ctx),
            OpHandler::Package => self.handle_package(ctx),
            OpHandler::BinaryMath => self.handle_binary_math(ctx),
            OpHandler::UnaryMath => self.handle_unary_math(ctx),
            OpHandler::LogicalBinary => self.handle_logical_binary(ctx),
            OpHandler::LogicalCompare => self.handle_logical_compare(ctx),
            OpHandler::LogicalNot => self.handle_logical_not(ctx),
            OpHandler::IncDec => self.handle_inc_dec(ctx),
            OpHandler::RefOrDerefOf => self.handle_ref_or_deref_of(ctx),
            OpHandler::CondRefOf => self.handle_cond_ref_of(ctx),
            OpHandler::CopyObjectOrStore => self.handle_copy_object_or_store(ctx),
            OpHandler::Index => self.handle_index(ctx),
            OpHandler::Match => self.handle_match(ctx),
            OpHandler::SizeOf => self.handle_size_of(ctx),
            OpHandler::ObjectType => self.handle_object_type(ctx),
            OpHandler::Concat => self.handle_concat(ctx),
            OpHandler::ConcatRes => self.handle_concat_res(ctx),
            OpHandler::Mid => self.handle_mid(ctx),
            OpHandler::Convert => self.handle_convert(ctx),
            OpHandler::CodeBlock => self.handle_code_block(ctx),
            OpHandler::ControlFlow => self.handle_control_flow(ctx),
            OpHandler::Return => self.handle_return(ctx),
            OpHandler::CreateMethod => self.handle_create_method(ctx),
            OpHandler::CreateNamed => self.handle_create_named(ctx),
            OpHandler::Alias => self.handle_alias(ctx),
            OpHandler::CreateBufferField => self.handle_create_buffer_field(ctx),
            OpHandler::Field => self.handle_field(ctx),
            OpHandler::IndexField => self.handle_index_field(ctx),
            OpHandler::BankField => self.handle_bank_field(ctx),
            OpHandler::OpRegion => self.handle_op_region(ctx),
            OpHandler::CreateMutex => self.handle_create_mutex(ctx),
            OpHandler::CreateEvent => self.handle_create_event(ctx),
            OpHandler::ScopedObject => self.handle_scoped_object(ctx),
            OpHandler::Acquire => self.handle_acquire(ctx),
            OpHandler::Release => self.handle_release(ctx),
            OpHandler::SignalEvent => self.handle_signal_event(ctx),
            OpHandler::ResetEvent => self.handle_reset_event(ctx),
            OpHandler::WaitEvent => self.handle_wait_event(ctx),
            OpHandler::Stall => self.handle_stall(ctx),
            OpHandler::Sleep => self.handle_sleep(ctx),
            OpHandler::Timer => self.handle_timer(ctx),
            OpHandler::Fatal => self.handle_fatal(ctx),
            OpHandler::Breakpoint => self.handle_breakpoint(ctx),
            OpHandler::Notify => self.handle_notify(ctx),
        }
    }

    /// Pop the finished op, apply its tracked package length, and resume the
    /// preempted parent.
    fn finish_op(&mut self, ctx: &mut Ctx) -> Result<()> {
        let frame = ctx.frame();
        let op = frame.pending.last().expect("finishing op");

        if let Some(idx) = op.tracked_pkg {
            let end = op.item(idx)?.pkg()?.end;
            frame.code_offset = end;
        }

        let op = frame.pending.pop().expect("finishing op");
        self.cleanup_op_items(op.items);

        let frame = ctx.frame();
        if let Some(parent) = frame.pending.last_mut() {
            parent.preempted = false;
            // A package-element request loops in place; everything else
            // advances past the satisfied request.
            if parent.spec.decode[parent.pc] != ParseOp::PackageElement {
                parent.pc += 1;
            }
        }
        Ok(())
    }

    /// `CondRefOf` fallback: the current (namestring) op could not resolve.
    /// Satisfy the parent with an uninitialized object instead.
    fn recover_unresolved(&mut self, ctx: &mut Ctx) -> Result<()> {
        let frame = ctx.frame();
        let op = frame.pending.pop().expect("unresolved namestring op");
        self.cleanup_op_items(op.items);

        let absent = self.objects.alloc(Object::Uninitialized);
        let frame = ctx.frame();
        let parent = frame.pending.last_mut().ok_or(AmlError::BadBytecode)?;
        *parent.items.last_mut().ok_or(AmlError::BadBytecode)? = Item::Object(absent);
        parent.preempted = false;
        parent.pc += 1;
        Ok(())
    }

    /// Apply the parent request's dereference rules to a produced object.
    /// Returns an owned (+1) handle.
    fn coerce_for_parent(
        &mut self,
        ctx: &Ctx,
        want: ParseOp,
        src: ObjectHandle,
    ) -> Result<ObjectHandle> {
        match want {
            ParseOp::Operand | ParseOp::TermArgUnwrapInternal => {
                let owned = self.resolve_value_owned(src)?;
                if want == ParseOp::Operand {
                    let ty = self.objects.type_of(owned);
                    if ty != ObjectType::Integer {
                        warn!(
                            op = ctx.op().spec.name,
                            got = %ty,
                            "expected Operand := TermArg => Integer"
                        );
                        self.objects.unref(owned);
                        return Err(AmlError::BadBytecode);
                    }
                }
                Ok(owned)
            }
            ParseOp::SuperNameImplicitDeref => {
                let handle = self.objects.deref_implicit(src);
                self.objects.ref_(handle);
                Ok(handle)
            }
            _ => {
                self.objects.ref_(src);
                Ok(src)
            }
        }
    }

    /// Hand an owned object to the preempted parent op.
    fn deliver_to_parent(&mut self, ctx: &mut Ctx, want: ParseOp, owned: ObjectHandle) -> Result<()> {
        let frame = ctx.frame();
        let parent_index = frame.pending.len().checked_sub(2).ok_or(AmlError::BadBytecode)?;
        let parent = &mut frame.pending[parent_index];

        if want == ParseOp::PackageElement {
            let package = parent
                .items
                .last()
                .ok_or(AmlError::BadBytecode)?
                .object()?;
            match self.objects.get_mut(package) {
                Object::Package(elements) => elements.push(owned),
                other => {
                    let ty = other.type_of();
                    self.objects.unref(owned);
                    return Err(AmlError::IncompatibleObjectType(ty));
                }
            }
            return Ok(());
        }

        *parent.items.last_mut().ok_or(AmlError::BadBytecode)? = Item::Object(owned);
        Ok(())
    }

    /// Push a frame for the resolved method call, or run it natively.
    /// Returns whether a frame was pushed.
    fn dispatch_method_call(&mut self, ctx: &mut Ctx) -> Result<bool> {
        let (node, args, ret_slot) = {
            let op = ctx.op();
            let node = op.item(0)?.node()?;
            let count = op.items.len();
            let mut args = Vec::with_capacity(count.saturating_sub(2));
            for item in &op.items[1..count - 1] {
                args.push(item.object()?);
            }
            let ret_slot = op.items[count - 1].object()?;
            (node, args, ret_slot)
        };

        if self.ns.is_dangling(node) {
            return Err(AmlError::UndefinedReference);
        }

        let method = match self.objects.get(self.ns.object(node)) {
            Object::Method(method) => method.clone(),
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        if let Some(native) = method.native {
            let value = native(&mut self.objects, &args)?;
            self.objects.replace(ret_slot, value);
            return Ok(false);
        }

        if ctx.frames.len() as u32 >= self.params.max_call_depth {
            return Err(AmlError::CallStackDepthLimit);
        }

        let method_ref = MethodRef {
            image: Arc::clone(&method.image),
            start: method.start,
            len: method.len,
            node,
        };
        let mut frame = Frame::new(method_ref);
        for (slot, &arg) in frame.args.iter_mut().zip(args.iter()) {
            self.objects.ref_(arg);
            *slot = Some(arg);
        }

        if method.serialized {
            let mutex = self.serialization_mutex(&frame, method.sync_level)?;
            match self
                .sync
                .acquire(self.host.as_ref(), mutex, crate::consts::TIMEOUT_INFINITE)
            {
                Ok(_) => frame.method_mutex = Some(mutex),
                Err(err) => {
                    self.cleanup_frame(frame);
                    return Err(err);
                }
            }
        }

        ctx.frames.push(frame);
        Ok(true)
    }

    /// Find the slot a returning method's value should land in: the last
    /// item of the caller's innermost pending op, the evaluation's return
    /// slot at top level, or nothing if the call site discarded the value.
    pub(super) fn method_ret_target(&self, ctx: &Ctx) -> Option<ObjectHandle> {
        if ctx.frames.len() > 1 {
            let caller = &ctx.frames[ctx.frames.len() - 2];
            let op = caller.pending.last()?;
            match op.items.last() {
                Some(Item::Object(handle)) => Some(*handle),
                _ => None,
            }
        } else {
            Some(ctx.ret)
        }
    }

    /// Strip internal references and read through field-like objects,
    /// yielding the plain value an operand read observes. Always returns an
    /// owned (+1) handle.
    pub(crate) fn resolve_value_owned(&mut self, handle: ObjectHandle) -> Result<ObjectHandle> {
        let handle = self.objects.deref_internal(handle);
        match self.read_if_field(handle)? {
            Some(fresh) => Ok(fresh),
            None => {
                self.objects.ref_(handle);
                Ok(handle)
            }
        }
    }

    /// Resolve to a plain integer value.
    pub(crate) fn resolve_integer(&mut self, handle: ObjectHandle) -> Result<u64> {
        let owned = self.resolve_value_owned(handle)?;
        let result = self.objects.get(owned).as_integer();
        self.objects.unref(owned);
        result
    }

    /// If `handle` is a field-like object, read it and return the fresh
    /// value object.
    fn read_if_field(&mut self, handle: ObjectHandle) -> Result<Option<ObjectHandle>> {
        match self.objects.type_of(handle) {
            ObjectType::FieldUnit => self.read_field_unit_value(handle).map(Some),
            ObjectType::BufferField => self.read_buffer_field_value(handle).map(Some),
            ObjectType::BufferIndex => {
                let (buffer, index) = match self.objects.get(handle) {
                    Object::BufferIndex { buffer, index } => (*buffer, *index),
                    _ => unreachable!("type checked above"),
                };
                let byte = match self.objects.get(buffer) {
                    Object::Buffer(bytes) | Object::String(bytes) => {
                        *bytes.get(index).ok_or(AmlError::IndexOutOfBounds)?
                    }
                    other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
                };
                Ok(Some(self.objects.alloc(Object::Integer(byte as u64))))
            }
            _ => Ok(None),
        }
    }

    /// The store-to-target algorithm.
    pub(crate) fn store_to_target(&mut self, dst: ObjectHandle, src: ObjectHandle) -> Result<()> {
        match self.objects.type_of(dst) {
            ObjectType::Debug => self.debug_store(src),
            // Integer zero is how a null target is encoded; drop the value.
            ObjectType::Integer if self.objects.get(dst).as_integer()? == 0 => Ok(()),
            ObjectType::Reference => self.store_to_reference(dst, src),
            ObjectType::FieldUnit | ObjectType::BufferField | ObjectType::BufferIndex => {
                self.write_field_like(dst, src)
            }
            _ => Err(AmlError::BadBytecode),
        }
    }

    /// Store through a reference, honoring the per-kind overwrite rules:
    /// arguments overwrite through `RefOf` chains, locals implicit-cast
    /// through them, named objects always unwind and implicit-cast.
    fn store_to_reference(&mut self, dst: ObjectHandle, src: ObjectHandle) -> Result<()> {
        let (kind, inner) = match self.objects.get(dst) {
            Object::Reference { kind, inner } => (*kind, *inner),
            _ => return Err(AmlError::InvalidArgument),
        };

        let (dst_obj, mut overwrite) = match kind {
            RefKind::Local | RefKind::Arg => {
                let referenced = self.objects.deref_internal(dst);
                if matches!(
                    self.objects.get(referenced),
                    Object::Reference {
                        kind: RefKind::RefOf,
                        ..
                    }
                ) {
                    (self.objects.unwind(referenced), kind == RefKind::Arg)
                } else {
                    (inner, true)
                }
            }
            RefKind::Named => (self.objects.unwind(dst), false),
            RefKind::RefOf => return Err(AmlError::InvalidArgument),
        };

        if matches!(
            self.objects.get(dst_obj),
            Object::FieldUnit(_) | Object::BufferField(_) | Object::BufferIndex { .. }
        ) {
            return self.write_field_like(dst_obj, src);
        }

        let src_owned = self.resolve_value_owned(src)?;
        overwrite |= self.objects.type_of(dst_obj) == ObjectType::Uninitialized;

        let result = if overwrite {
            self.objects.assign_deep(dst_obj, src_owned);
            Ok(())
        } else {
            self.objects
                .assign_implicit_cast(dst_obj, src_owned, self.int_bytes())
        };
        self.objects.unref(src_owned);
        result
    }

    /// `CopyObject` semantics: always overwrite, and only arguments chase
    /// `RefOf` chains.
    pub(crate) fn copy_object_to_reference(
        &mut self,
        dst: ObjectHandle,
        src: ObjectHandle,
    ) -> Result<()> {
        let (kind, inner) = match self.objects.get(dst) {
            Object::Reference { kind, inner } => (*kind, *inner),
            _ => return Err(AmlError::InvalidArgument),
        };

        let dst_obj = match kind {
            RefKind::Arg => {
                let referenced = self.objects.deref_internal(dst);
                if matches!(
                    self.objects.get(referenced),
                    Object::Reference {
                        kind: RefKind::RefOf,
                        ..
                    }
                ) {
                    self.objects.unwind(referenced)
                } else {
                    inner
                }
            }
            RefKind::Local | RefKind::Named => inner,
            RefKind::RefOf => return Err(AmlError::InvalidArgument),
        };

        let src_owned = self.resolve_value_owned(src)?;
        self.objects.assign_deep(dst_obj, src_owned);
        self.objects.unref(src_owned);
        Ok(())
    }

    /// Stores to the Debug object format and log the source.
    fn debug_store(&mut self, src: ObjectHandle) -> Result<()> {
        let owned = self.resolve_value_owned(src)?;
        match self.objects.get(owned) {
            Object::Uninitialized => debug!("[AML DEBUG, Uninitialized]"),
            Object::Integer(value) => {
                if self.rev_is_32bit() {
                    debug!("[AML DEBUG, Integer] {value:#010X}");
                } else {
                    debug!("[AML DEBUG, Integer] {value:#018X}");
                }
            }
            Object::String(bytes) => {
                debug!("[AML DEBUG, String] {}", String::from_utf8_lossy(bytes));
            }
            Object::Buffer(bytes) => {
                debug!("[AML DEBUG, Buffer] {} bytes {bytes:02X?}", bytes.len());
            }
            Object::Package(elements) => {
                debug!("[AML DEBUG, Package] {} elements", elements.len());
            }
            other => debug!("[AML DEBUG, {}]", other.type_of()),
        }
        self.objects.unref(owned);
        Ok(())
    }

    fn rev_is_32bit(&self) -> bool {
        self.int_bytes() == 4
    }

    /// Decode and resolve a name string at the cursor.
    pub(crate) fn resolve_name(&mut self, ctx: &mut Ctx, mode: ResolveMode) -> Result<NodeHandle> {
        let frame = ctx.frame();
        let scope = frame.cur_scope;
        let raw = with_code(frame, stream::parse_name_string)?;

        let mut cur = if raw.root { self.ns.root() } else { scope };
        for _ in 0..raw.parents {
            cur = self.ns.parent(cur).ok_or(AmlError::BadBytecode)?;
        }

        if raw.segments.is_empty() {
            // A null name is only meaningful with an explicit anchor.
            if mode == ResolveMode::CreateLastSegment || (!raw.root && raw.parents == 0) {
                return Err(AmlError::BadBytecode);
            }
            return Ok(cur);
        }

        let last = raw.segments.len() - 1;
        for (i, seg) in raw.segments.iter().enumerate() {
            if mode == ResolveMode::CreateLastSegment && i == last {
                if self.ns.find_child(cur, *seg).is_some() {
                    warn!(name = %seg, "named object already exists");
                    return Err(AmlError::ObjectAlreadyExists);
                }
                return Ok(self.ns.alloc(*seg, cur, &mut self.objects));
            }

            let mut next = self.ns.find_child(cur, *seg);
            if next.is_none() && raw.search_upward {
                let mut ancestor = self.ns.parent(cur);
                while let Some(above) = ancestor {
                    next = self.ns.find_child(above, *seg);
                    if next.is_some() {
                        break;
                    }
                    ancestor = self.ns.parent(above);
                }
            }

            cur = next.ok_or(AmlError::UndefinedReference)?;
        }

        if self.ns.is_dangling(cur) {
            return Err(AmlError::UndefinedReference);
        }
        Ok(cur)
    }
}
