//! Semantic handlers that create namespace objects: named data, methods,
//! buffers, packages, fields, regions, devices and synchronization objects.

use std::sync::Arc;

use tracing::warn;

use crate::error::{AmlError, Result};
use crate::field::{BufferField, FieldKind, FieldUnit, UpdateRule};
use crate::namespace::NodeHandle;
use crate::object::{Method, Object, ObjectHandle, RefKind};
use crate::opcode::code;
use crate::opregion::{AddressSpace, OpRegion};
use crate::stream;

use super::exec::{with_code, Ctx};
use super::frame::{BlockKind, CodeBlock, Item};
use super::Interpreter;

impl Interpreter {
    pub(super) fn handle_local(&mut self, ctx: &mut Ctx) -> Result<()> {
        let index = (ctx.op().spec.code - code::LOCAL0) as usize;
        self.reference_slot(ctx, index, false)
    }

    pub(super) fn handle_arg(&mut self, ctx: &mut Ctx) -> Result<()> {
        let index = (ctx.op().spec.code - code::ARG0) as usize;
        self.reference_slot(ctx, index, true)
    }

    /// Produce a `Local`/`Arg` reference to the frame slot, creating the
    /// slot's object on first touch (a store is hopefully incoming).
    fn reference_slot(&mut self, ctx: &mut Ctx, index: usize, is_arg: bool) -> Result<()> {
        let slot = {
            let frame = ctx.frame();
            let slot = if is_arg {
                frame.args.get_mut(index)
            } else {
                frame.locals.get_mut(index)
            }
            .ok_or(AmlError::BadBytecode)?;

            match slot {
                Some(handle) => *handle,
                None => {
                    let fresh = self.objects.alloc(Object::Uninitialized);
                    *slot = Some(fresh);
                    fresh
                }
            }
        };

        let kind = if is_arg { RefKind::Arg } else { RefKind::Local };
        self.objects.ref_(slot);
        let dst = ctx.item_obj(0)?;
        self.objects.replace(dst, Object::Reference { kind, inner: slot });
        Ok(())
    }

    pub(super) fn handle_named_object(&mut self, ctx: &mut Ctx) -> Result<()> {
        let node = ctx.item_node(0)?;
        if self.ns.is_dangling(node) {
            return Err(AmlError::UndefinedReference);
        }

        let object = self.ns.object(node);
        self.objects.ref_(object);
        let dst = ctx.item_obj(1)?;
        self.objects.replace(
            dst,
            Object::Reference {
                kind: RefKind::Named,
                inner: object,
            },
        );
        Ok(())
    }

    pub(super) fn handle_string(&mut self, ctx: &mut Ctx) -> Result<()> {
        let frame = ctx.frame();
        let bytes = with_code(frame, |code, cursor| -> Result<Vec<u8>> {
            let rest = code.get(*cursor as usize..).ok_or(AmlError::OutOfBounds)?;
            let len = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(AmlError::BadBytecode)?;
            *cursor += len as u32 + 1;
            Ok(rest[..len].to_vec())
        })?;

        let dst = ctx.item_obj(0)?;
        *self.objects.get_mut(dst) = Object::String(bytes);
        Ok(())
    }

    pub(super) fn handle_buffer(&mut self, ctx: &mut Ctx) -> Result<()> {
        let pkg = ctx.item_pkg(0)?;
        let declared = self.objects.get(ctx.item_obj(1)?).as_integer()? as usize;
        let dst = ctx.item_obj(2)?;

        let frame = ctx.frame_ref();
        let start = frame.code_offset as usize;
        let init = frame
            .method
            .code()
            .get(start..pkg.end as usize)
            .ok_or(AmlError::BadBytecode)?;

        if init.len() > declared {
            warn!(
                declared,
                initializers = init.len(),
                "buffer initializer overflows its declared size"
            );
            return Err(AmlError::BadBytecode);
        }

        let mut data = Vec::new();
        data.try_reserve_exact(declared)
            .map_err(|_| AmlError::OutOfMemory)?;
        data.extend_from_slice(init);
        data.resize(declared, 0);

        *self.objects.get_mut(dst) = Object::Buffer(data);
        Ok(())
    }

    pub(super) fn handle_package(&mut self, ctx: &mut Ctx) -> Result<()> {
        let declared = match ctx.op().item(1)? {
            Item::Imm(count) => *count as usize,
            Item::Object(handle) => self.objects.get(*handle).as_integer()? as usize,
            _ => return Err(AmlError::BadBytecode),
        };
        let package = ctx.item_obj(2)?;

        let have = match self.objects.get(package) {
            Object::Package(elements) => elements.len(),
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        if have > declared {
            warn!(declared, have, "package has more initializers than elements");
            return Err(AmlError::BadBytecode);
        }

        let mut padding = Vec::with_capacity(declared - have);
        for _ in have..declared {
            padding.push(self.objects.alloc(Object::Uninitialized));
        }
        match self.objects.get_mut(package) {
            Object::Package(elements) => elements.extend(padding),
            _ => unreachable!("checked above"),
        }
        Ok(())
    }

    pub(super) fn handle_create_named(&mut self, ctx: &mut Ctx) -> Result<()> {
        let node = ctx.item_node(0)?;
        let value = ctx.item_obj(1)?;

        self.objects.ref_(value);
        self.ns.set_object(node, value, &mut self.objects);
        Ok(())
    }

    pub(super) fn handle_alias(&mut self, ctx: &mut Ctx) -> Result<()> {
        let source = ctx.item_node(0)?;
        let alias = ctx.item_node(1)?;

        let object = self.ns.object(source);
        self.objects.ref_(object);
        self.ns.set_object(alias, object, &mut self.objects);
        self.ns.mark_alias(alias);
        Ok(())
    }

    pub(super) fn handle_create_method(&mut self, ctx: &mut Ctx) -> Result<()> {
        let pkg = ctx.item_pkg(0)?;
        let node = ctx.item_node(1)?;
        let flags = ctx.item_imm(2)? as u8;
        let body_start = ctx.item_imm(3)? as u32;

        let frame = ctx.frame_ref();
        let method = Method {
            image: Arc::clone(&frame.method.image),
            start: frame.method.start + body_start,
            len: pkg.end - body_start,
            args: flags & 0b111,
            serialized: flags & (1 << 3) != 0,
            sync_level: flags >> 4,
            mutex: None,
            native: None,
        };

        let object = self.objects.alloc(Object::Method(method));
        self.ns.set_object(node, object, &mut self.objects);
        Ok(())
    }

    pub(super) fn handle_create_buffer_field(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;

        let (bit_index, bit_length, node_index) = match op {
            code::CREATE_BIT_FIELD => (self.item_int(ctx, 1)?, 1, 2),
            code::CREATE_BYTE_FIELD => (self.item_int(ctx, 1)? * 8, 8, 2),
            code::CREATE_WORD_FIELD => (self.item_int(ctx, 1)? * 8, 16, 2),
            code::CREATE_DWORD_FIELD => (self.item_int(ctx, 1)? * 8, 32, 2),
            code::CREATE_QWORD_FIELD => (self.item_int(ctx, 1)? * 8, 64, 2),
            code::CREATE_FIELD => {
                let bits = self.item_int(ctx, 2)?;
                if bits == 0 {
                    return Err(AmlError::BadBytecode);
                }
                (self.item_int(ctx, 1)?, bits as u32, 3)
            }
            _ => return Err(AmlError::InvalidArgument),
        };

        let buffer = self.objects.unwind(ctx.item_obj(0)?);
        let len_bits = match self.objects.get(buffer) {
            Object::Buffer(bytes) => bytes.len() as u64 * 8,
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };
        if bit_index + bit_length as u64 > len_bits {
            return Err(AmlError::IndexOutOfBounds);
        }

        self.objects.ref_(buffer);
        let object = self.objects.alloc(Object::BufferField(BufferField {
            buffer,
            bit_index: bit_index as u32,
            bit_length,
        }));

        let node = ctx.item_node(node_index)?;
        self.ns.set_object(node, object, &mut self.objects);
        Ok(())
    }

    fn item_int(&self, ctx: &Ctx, index: usize) -> Result<u64> {
        self.objects.get(ctx.item_obj(index)?).as_integer()
    }

    pub(super) fn handle_op_region(&mut self, ctx: &mut Ctx) -> Result<()> {
        let node = ctx.item_node(0)?;
        let space = AddressSpace::from_raw(ctx.item_imm(1)? as u8)?;
        let offset = self.item_int(ctx, 2)?;
        let length = self.item_int(ctx, 3)?;

        let object = self.objects.alloc(Object::OpRegion(OpRegion {
            space,
            offset,
            length,
            attached: false,
        }));
        self.ns.set_object(node, object, &mut self.objects);
        Ok(())
    }

    pub(super) fn handle_create_mutex(&mut self, ctx: &mut Ctx) -> Result<()> {
        let node = ctx.item_node(0)?;
        let sync_level = (ctx.item_imm(1)? as u8) & 0xF;

        let mutex = self.sync.create_mutex(sync_level);
        let object = self.objects.alloc(Object::Mutex(mutex));
        self.ns.set_object(node, object, &mut self.objects);
        Ok(())
    }

    pub(super) fn handle_create_event(&mut self, ctx: &mut Ctx) -> Result<()> {
        let node = ctx.item_node(0)?;
        let event = self.sync.create_event();
        let object = self.objects.alloc(Object::Event(event));
        self.ns.set_object(node, object, &mut self.objects);
        Ok(())
    }

    /// `Device`, `Processor`, `PowerResource`, `ThermalZone`: create the
    /// container object, then execute the body as the new node's scope.
    pub(super) fn handle_scoped_object(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;
        let pkg = ctx.item_pkg(0)?;
        let node = ctx.item_node(1)?;

        let object = match op {
            code::DEVICE => Object::Device,
            code::THERMAL_ZONE => Object::ThermalZone,
            code::PROCESSOR => Object::Processor {
                id: ctx.item_imm(2)? as u8,
                block_address: ctx.item_imm(3)? as u32,
                block_length: ctx.item_imm(4)? as u8,
            },
            code::POWER_RES => Object::PowerResource {
                system_level: ctx.item_imm(2)? as u8,
                resource_order: ctx.item_imm(3)? as u16,
            },
            _ => return Err(AmlError::InvalidArgument),
        };

        let handle = self.objects.alloc(object);
        self.ns.set_object(node, handle, &mut self.objects);

        let frame = ctx.frame();
        frame.blocks.push(CodeBlock {
            kind: BlockKind::Scope,
            begin: pkg.begin,
            end: pkg.end,
            node: Some(node),
        });
        frame.cur_scope = node;
        Ok(())
    }

    pub(super) fn handle_field(&mut self, ctx: &mut Ctx) -> Result<()> {
        let pkg = ctx.item_pkg(0)?;
        let region = ctx.item_node(1)?;
        let flags = ctx.item_imm(2)? as u8;

        self.parse_field_list(ctx, pkg.end, flags, FieldKind::Normal { region })
    }

    pub(super) fn handle_index_field(&mut self, ctx: &mut Ctx) -> Result<()> {
        let pkg = ctx.item_pkg(0)?;
        let index_node = ctx.item_node(1)?;
        let data_node = ctx.item_node(2)?;
        let flags = ctx.item_imm(3)? as u8;

        let index = self.field_unit_object(index_node)?;
        let data = self.field_unit_object(data_node)?;
        self.parse_field_list(ctx, pkg.end, flags, FieldKind::Index { index, data })
    }

    pub(super) fn handle_bank_field(&mut self, ctx: &mut Ctx) -> Result<()> {
        let pkg = ctx.item_pkg(0)?;
        let region = ctx.item_node(1)?;
        let bank_node = ctx.item_node(2)?;
        let value = self.item_int(ctx, 3)?;
        let flags = ctx.item_imm(4)? as u8;

        let bank = self.field_unit_object(bank_node)?;
        self.parse_field_list(
            ctx,
            pkg.end,
            flags,
            FieldKind::Bank {
                region,
                bank,
                value,
            },
        )
    }

    fn field_unit_object(&self, node: NodeHandle) -> Result<ObjectHandle> {
        let object = self.ns.object(node);
        match self.objects.get(object) {
            Object::FieldUnit(_) => Ok(object),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    /// Walk a field list, creating one field-unit node per named element.
    /// Reserved elements skip bits, access elements change the access going
    /// forward.
    fn parse_field_list(
        &mut self,
        ctx: &mut Ctx,
        list_end: u32,
        flags: u8,
        kind: FieldKind,
    ) -> Result<()> {
        let mut access_type = flags & 0xF;
        let lock = flags & (1 << 4) != 0;
        let update_rule = match (flags >> 5) & 0b11 {
            0 => UpdateRule::Preserve,
            1 => UpdateRule::WriteAsOnes,
            2 => UpdateRule::WriteAsZeros,
            _ => return Err(AmlError::BadBytecode),
        };

        let mut bit_cursor: u64 = 0;
        let mut created: Vec<(NodeHandle, FieldUnit)> = Vec::new();

        {
            let frame = ctx.frame();
            let scope = frame.cur_scope;
            let mut pending: Vec<(crate::namespace::NameSeg, FieldUnit)> = Vec::new();

            with_code(frame, |code, cursor| -> Result<()> {
                while *cursor < list_end {
                    match code[*cursor as usize] {
                        0x00 => {
                            *cursor += 1;
                            let pkg = stream::parse_pkg_length(code, cursor)?;
                            bit_cursor += (pkg.end - pkg.begin) as u64;
                        }
                        0x01 => {
                            *cursor += 1;
                            access_type = stream::read_u8(code, cursor)? & 0xF;
                            let _attrib = stream::read_u8(code, cursor)?;
                        }
                        0x02 => {
                            warn!("connection fields are not supported");
                            return Err(AmlError::Unimplemented);
                        }
                        0x03 => {
                            *cursor += 1;
                            access_type = stream::read_u8(code, cursor)? & 0xF;
                            let _attrib = stream::read_u8(code, cursor)?;
                            let _access_length = stream::read_u8(code, cursor)?;
                        }
                        _ => {
                            let start = *cursor as usize;
                            let seg: [u8; 4] = code
                                .get(start..start + 4)
                                .ok_or(AmlError::OutOfBounds)?
                                .try_into()
                                .expect("sliced exactly four bytes");
                            *cursor += 4;
                            let name = crate::namespace::NameSeg::new(seg)?;
                            let pkg = stream::parse_pkg_length(code, cursor)?;
                            let bit_length = pkg.end - pkg.begin;

                            let access_bytes = access_width_bytes(access_type);
                            let access_bits = access_bytes as u64 * 8;
                            let byte_offset =
                                (bit_cursor / access_bits) as u32 * access_bytes as u32;
                            let bit_offset = (bit_cursor - byte_offset as u64 * 8) as u8;

                            pending.push((
                                name,
                                FieldUnit {
                                    kind: kind.clone(),
                                    byte_offset,
                                    bit_offset,
                                    bit_length,
                                    access_bytes,
                                    update_rule,
                                    lock,
                                },
                            ));
                            bit_cursor += bit_length as u64;
                        }
                    }
                }
                Ok(())
            })?;

            for (name, unit) in pending {
                if self.ns.find_child(scope, name).is_some() {
                    warn!(name = %name, "field name already exists");
                    return Err(AmlError::ObjectAlreadyExists);
                }
                let node = self.ns.alloc(name, scope, &mut self.objects);
                self.ns.install(scope, node);
                created.push((node, unit));
            }
        }

        for (node, unit) in created {
            for child in unit.object_children() {
                self.objects.ref_(child);
            }
            for region in unit.node_children() {
                self.ns.ref_node(region);
            }
            let object = self.objects.alloc(Object::FieldUnit(unit));
            self.ns.set_object(node, object, &mut self.objects);
        }
        Ok(())
    }
}

fn access_width_bytes(access_type: u8) -> u8 {
    match access_type {
        // AnyAcc, ByteAcc and BufferAcc use byte-wide accesses.
        0 | 1 | 5 => 1,
        2 => 2,
        3 => 4,
        4 => 8,
        _ => 1,
    }
}
