//! Semantic handlers for arithmetic, logic, comparison, conversion and the
//! reference-producing expression opcodes.

use tracing::warn;

use crate::error::{AmlError, Result};
use crate::object::{Object, ObjectHandle, ObjectType, RefKind};
use crate::opcode::code;

use super::exec::Ctx;
use super::Interpreter;

impl Interpreter {
    fn item_integer(&self, ctx: &Ctx, index: usize) -> Result<u64> {
        self.objects.get(ctx.item_obj(index)?).as_integer()
    }

    pub(super) fn set_result(&mut self, ctx: &Ctx, index: usize, value: Object) -> Result<()> {
        let handle = ctx.item_obj(index)?;
        self.objects.replace(handle, value);
        Ok(())
    }

    fn set_integer_result(&mut self, ctx: &Ctx, index: usize, value: u64) -> Result<()> {
        self.set_result(ctx, index, Object::Integer(self.truncate(value)))
    }

    pub(super) fn handle_binary_math(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;
        let lhs = self.item_integer(ctx, 0)?;
        let rhs = self.item_integer(ctx, 1)?;

        if op == code::DIVIDE {
            if rhs == 0 {
                warn!("AML division by zero");
                return Err(AmlError::BadBytecode);
            }
            self.set_integer_result(ctx, 4, lhs % rhs)?;
            self.set_integer_result(ctx, 5, lhs / rhs)?;
            return Ok(());
        }

        let max_shift = self.int_bits() as u64 - 1;
        let result = match op {
            code::ADD => lhs.wrapping_add(rhs),
            code::SUBTRACT => lhs.wrapping_sub(rhs),
            code::MULTIPLY => lhs.wrapping_mul(rhs),
            code::SHIFT_LEFT => {
                if rhs <= max_shift {
                    lhs << rhs
                } else {
                    0
                }
            }
            code::SHIFT_RIGHT => {
                if rhs <= max_shift {
                    lhs >> rhs
                } else {
                    0
                }
            }
            code::AND => lhs & rhs,
            code::NAND => !(lhs & rhs),
            code::OR => lhs | rhs,
            code::NOR => !(lhs | rhs),
            code::XOR => lhs ^ rhs,
            code::MOD => {
                if rhs == 0 {
                    warn!("AML modulus by zero");
                    return Err(AmlError::BadBytecode);
                }
                lhs % rhs
            }
            _ => return Err(AmlError::InvalidArgument),
        };

        self.set_integer_result(ctx, 3, result)
    }

    pub(super) fn handle_unary_math(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;
        let value = self.item_integer(ctx, 0)?;

        let result = match op {
            code::NOT => !value,
            code::FIND_SET_LEFT_BIT => {
                if value == 0 {
                    0
                } else {
                    64 - self.truncate(value).leading_zeros() as u64
                }
            }
            code::FIND_SET_RIGHT_BIT => {
                if value == 0 {
                    0
                } else {
                    value.trailing_zeros() as u64 + 1
                }
            }
            code::FROM_BCD => {
                let mut raw = value;
                let mut out = 0u64;
                let mut scale = 1u64;
                while raw != 0 {
                    let digit = raw & 0xF;
                    if digit > 9 {
                        return Err(AmlError::BadBytecode);
                    }
                    out += digit * scale;
                    scale = scale.saturating_mul(10);
                    raw >>= 4;
                }
                out
            }
            code::TO_BCD => {
                let mut raw = value;
                let mut out = 0u64;
                let mut shift = 0;
                while raw != 0 {
                    if shift >= 64 {
                        return Err(AmlError::BadBytecode);
                    }
                    out |= (raw % 10) << shift;
                    raw /= 10;
                    shift += 4;
                }
                out
            }
            _ => return Err(AmlError::InvalidArgument),
        };

        self.set_integer_result(ctx, 2, result)
    }

    pub(super) fn handle_logical_binary(&mut self, ctx: &mut Ctx) -> Result<()> {
        let lhs = self.item_integer(ctx, 0)? != 0;
        let rhs = self.item_integer(ctx, 1)? != 0;
        let truth = match ctx.op().spec.code {
            code::LAND => lhs && rhs,
            code::LOR => lhs || rhs,
            _ => return Err(AmlError::InvalidArgument),
        };
        self.set_result(ctx, 2, Object::Integer(if truth { self.ones() } else { 0 }))
    }

    pub(super) fn handle_logical_not(&mut self, ctx: &mut Ctx) -> Result<()> {
        let value = self.item_integer(ctx, 0)?;
        self.set_result(ctx, 1, Object::Integer(if value == 0 { self.ones() } else { 0 }))
    }

    pub(super) fn handle_logical_compare(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;
        let lhs = ctx.item_obj(0)?;
        let rhs = ctx.item_obj(1)?;

        let ordering = self.compare_values(lhs, rhs)?;
        let truth = match op {
            code::LEQUAL => ordering == core::cmp::Ordering::Equal,
            code::LGREATER => ordering == core::cmp::Ordering::Greater,
            code::LLESS => ordering == core::cmp::Ordering::Less,
            _ => return Err(AmlError::InvalidArgument),
        };
        self.set_result(ctx, 2, Object::Integer(if truth { self.ones() } else { 0 }))
    }

    /// Compare two data objects, implicitly converting the right-hand side
    /// to the left-hand side's type.
    fn compare_values(
        &mut self,
        lhs: ObjectHandle,
        rhs: ObjectHandle,
    ) -> Result<core::cmp::Ordering> {
        match self.objects.get(lhs).clone() {
            Object::Integer(a) => {
                let b = self.convert_to_integer(rhs)?;
                Ok(a.cmp(&b))
            }
            Object::String(a) => {
                let b = self.convert_to_string_bytes(rhs)?;
                Ok(a.cmp(&b))
            }
            Object::Buffer(a) => {
                let b = self.convert_to_buffer_bytes(rhs)?;
                Ok(a.cmp(&b))
            }
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    pub(super) fn handle_inc_dec(&mut self, ctx: &mut Ctx) -> Result<()> {
        let target = ctx.item_obj(0)?;
        let delta: i64 = if ctx.op().spec.code == code::INCREMENT {
            1
        } else {
            -1
        };

        match self.objects.type_of(target) {
            ObjectType::Integer => {
                let current = self.objects.get(target).as_integer()?;
                let next = self.truncate(current.wrapping_add_signed(delta));
                *self.objects.get_mut(target) = Object::Integer(next);
                Ok(())
            }
            ObjectType::FieldUnit | ObjectType::BufferField | ObjectType::BufferIndex => {
                let current = self.resolve_integer(target)?;
                let next = self.truncate(current.wrapping_add_signed(delta));
                let value = self.objects.alloc(Object::Integer(next));
                let written = self.write_field_like(target, value);
                self.objects.unref(value);
                written?;

                // The op's value is the new contents.
                let fresh = self.objects.alloc(Object::Integer(next));
                let op = ctx.op_mut();
                if let Some(slot) = op.items.last_mut() {
                    *slot = super::frame::Item::Object(fresh);
                    self.objects.unref(target);
                }
                Ok(())
            }
            other => Err(AmlError::IncompatibleObjectType(other)),
        }
    }

    pub(super) fn handle_concat(&mut self, ctx: &mut Ctx) -> Result<()> {
        let lhs = ctx.item_obj(0)?;
        let rhs = ctx.item_obj(1)?;

        let result = match self.objects.get(lhs).clone() {
            Object::Integer(a) => {
                let b = self.convert_to_integer(rhs)?;
                let mut bytes = a.to_le_bytes()[..self.int_bytes()].to_vec();
                bytes.extend_from_slice(&b.to_le_bytes()[..self.int_bytes()]);
                Object::Buffer(bytes)
            }
            Object::String(mut a) => {
                a.extend_from_slice(&self.convert_to_string_bytes(rhs)?);
                Object::String(a)
            }
            Object::Buffer(mut a) => {
                a.extend_from_slice(&self.convert_to_buffer_bytes(rhs)?);
                Object::Buffer(a)
            }
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        self.set_result(ctx, 3, result)
    }

    pub(super) fn handle_concat_res(&mut self, ctx: &mut Ctx) -> Result<()> {
        let lhs = self.resource_template_bytes(ctx.item_obj(0)?)?;
        let rhs = self.resource_template_bytes(ctx.item_obj(1)?)?;

        let mut out = lhs;
        out.extend_from_slice(&rhs);
        // Fresh end tag with a zero checksum (treated as "always valid").
        out.extend_from_slice(&[0x79, 0x00]);
        self.set_result(ctx, 3, Object::Buffer(out))
    }

    /// A resource-template buffer without its trailing end tag.
    fn resource_template_bytes(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        match self.objects.get(handle) {
            Object::Buffer(bytes) => {
                if bytes.len() < 2 || bytes[bytes.len() - 2] != 0x79 {
                    return Err(AmlError::BadBytecode);
                }
                Ok(bytes[..bytes.len() - 2].to_vec())
            }
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    pub(super) fn handle_mid(&mut self, ctx: &mut Ctx) -> Result<()> {
        let src = ctx.item_obj(0)?;
        let index = self.item_integer(ctx, 1)? as usize;
        let length = self.item_integer(ctx, 2)? as usize;

        let result = match self.objects.get(src) {
            Object::String(bytes) => {
                let slice = mid_slice(bytes, index, length);
                Object::String(slice.to_vec())
            }
            Object::Buffer(bytes) => {
                let slice = mid_slice(bytes, index, length);
                Object::Buffer(slice.to_vec())
            }
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        self.set_result(ctx, 4, result)
    }

    pub(super) fn handle_match(&mut self, ctx: &mut Ctx) -> Result<()> {
        let package = ctx.item_obj(0)?;
        let op1 = ctx.item_imm(1)? as u8;
        let val1 = ctx.item_obj(2)?;
        let op2 = ctx.item_imm(3)? as u8;
        let val2 = ctx.item_obj(4)?;
        let start = self.item_integer(ctx, 5)? as usize;

        let elements = match self.objects.get(package) {
            Object::Package(elements) => elements.clone(),
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        let mut found = self.ones();
        for (i, &element) in elements.iter().enumerate().skip(start) {
            let value = self.resolve_value_owned(element)?;
            let matched = self.match_one(value, op1, val1)? && self.match_one(value, op2, val2)?;
            self.objects.unref(value);
            if matched {
                found = i as u64;
                break;
            }
        }

        self.set_result(ctx, 6, Object::Integer(found))
    }

    fn match_one(&mut self, element: ObjectHandle, op: u8, operand: ObjectHandle) -> Result<bool> {
        use core::cmp::Ordering::*;

        // MTR matches anything without looking at the operand.
        if op == 0 {
            return Ok(true);
        }

        let ordering = self.compare_values(element, operand)?;
        Ok(match op {
            1 => ordering == Equal,
            2 => ordering != Greater,
            3 => ordering == Less,
            4 => ordering != Less,
            5 => ordering == Greater,
            _ => return Err(AmlError::BadBytecode),
        })
    }

    pub(super) fn handle_convert(&mut self, ctx: &mut Ctx) -> Result<()> {
        let op = ctx.op().spec.code;
        let src = ctx.item_obj(0)?;

        let (result, result_idx) = match op {
            code::TO_INTEGER => (Object::Integer(self.convert_to_integer(src)?), 2),
            code::TO_BUFFER => (Object::Buffer(self.convert_to_buffer_bytes(src)?), 2),
            code::TO_DECIMAL_STRING => (Object::String(self.format_as_string(src, 10)?), 2),
            code::TO_HEX_STRING => (Object::String(self.format_as_string(src, 16)?), 2),
            code::TO_STRING => {
                let length = self.item_integer(ctx, 1)?;
                let bytes = match self.objects.get(src) {
                    Object::Buffer(bytes) => bytes.clone(),
                    other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
                };

                let limit = if length == self.ones() {
                    bytes.len()
                } else {
                    (length as usize).min(bytes.len())
                };
                let end = bytes[..limit]
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(limit);
                (Object::String(bytes[..end].to_vec()), 3)
            }
            _ => return Err(AmlError::InvalidArgument),
        };

        self.set_result(ctx, result_idx, result)
    }

    /// Implicit conversion to integer: strings parse as hex with an optional
    /// `0x` prefix or as decimal, buffers read little-endian up to the
    /// integer width.
    pub(super) fn convert_to_integer(&self, handle: ObjectHandle) -> Result<u64> {
        match self.objects.get(handle) {
            Object::Integer(value) => Ok(*value),
            Object::String(bytes) => {
                let text = core::str::from_utf8(bytes).map_err(|_| AmlError::BadBytecode)?;
                let text = text.trim();
                let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16)
                } else if text.chars().any(|c| c.is_ascii_hexdigit() && !c.is_ascii_digit()) {
                    u64::from_str_radix(text, 16)
                } else {
                    text.parse()
                };
                parsed.map(|v| self.truncate(v)).map_err(|_| AmlError::BadBytecode)
            }
            Object::Buffer(bytes) => {
                let mut raw = [0u8; 8];
                let n = bytes.len().min(self.int_bytes());
                raw[..n].copy_from_slice(&bytes[..n]);
                Ok(u64::from_le_bytes(raw))
            }
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    /// Implicit conversion to string bytes: integers format as hex.
    fn convert_to_string_bytes(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        match self.objects.get(handle) {
            Object::String(bytes) => Ok(bytes.clone()),
            Object::Integer(_) | Object::Buffer(_) => self.format_as_string(handle, 16),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    /// Implicit conversion to buffer bytes: integers contribute their
    /// revision-sized little-endian bytes, strings their characters plus the
    /// terminating NUL.
    fn convert_to_buffer_bytes(&self, handle: ObjectHandle) -> Result<Vec<u8>> {
        match self.objects.get(handle) {
            Object::Buffer(bytes) => Ok(bytes.clone()),
            Object::Integer(value) => Ok(value.to_le_bytes()[..self.int_bytes()].to_vec()),
            Object::String(bytes) => {
                let mut out = bytes.clone();
                out.push(0);
                Ok(out)
            }
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    /// Render integers and buffers as decimal or hexadecimal strings; buffer
    /// bytes are comma-separated.
    fn format_as_string(&self, handle: ObjectHandle, radix: u32) -> Result<Vec<u8>> {
        let format_value = |value: u64| {
            if radix == 16 {
                format!("{value:X}")
            } else {
                format!("{value}")
            }
        };

        match self.objects.get(handle) {
            Object::Integer(value) => Ok(format_value(*value).into_bytes()),
            Object::Buffer(bytes) => {
                let mut out = String::new();
                for (i, &b) in bytes.iter().enumerate() {
                    if i != 0 {
                        out.push(',');
                    }
                    out.push_str(&format_value(b as u64));
                }
                Ok(out.into_bytes())
            }
            Object::String(bytes) => Ok(bytes.clone()),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    pub(super) fn handle_size_of(&mut self, ctx: &mut Ctx) -> Result<()> {
        let target = ctx.item_obj(0)?;
        let size = match self.objects.get(self.objects.unwind(target)) {
            Object::String(bytes) | Object::Buffer(bytes) => bytes.len() as u64,
            Object::Package(elements) => elements.len() as u64,
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };
        self.set_result(ctx, 1, Object::Integer(size))
    }

    pub(super) fn handle_object_type(&mut self, ctx: &mut Ctx) -> Result<()> {
        let target = ctx.item_obj(0)?;
        let object = self.objects.unwind(target);
        let code = match self.objects.type_of(object) {
            // `Index` results report as buffer fields.
            ObjectType::BufferIndex => ObjectType::BufferField as u64,
            other => other as u64,
        };
        self.set_result(ctx, 1, Object::Integer(code))
    }

    pub(super) fn handle_index(&mut self, ctx: &mut Ctx) -> Result<()> {
        let src = ctx.item_obj(0)?;
        let index = self.item_integer(ctx, 1)? as usize;

        enum Kind {
            Element(ObjectHandle),
            Byte,
        }

        let picked = match self.objects.get(src) {
            Object::Package(elements) => {
                Kind::Element(*elements.get(index).ok_or(AmlError::IndexOutOfBounds)?)
            }
            Object::Buffer(bytes) | Object::String(bytes) => {
                if index >= bytes.len() {
                    return Err(AmlError::IndexOutOfBounds);
                }
                Kind::Byte
            }
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        let result = match picked {
            Kind::Element(element) => {
                self.objects.ref_(element);
                Object::Reference {
                    kind: RefKind::Named,
                    inner: element,
                }
            }
            Kind::Byte => {
                self.objects.ref_(src);
                Object::BufferIndex { buffer: src, index }
            }
        };

        self.set_result(ctx, 3, result)
    }

    pub(super) fn handle_ref_or_deref_of(&mut self, ctx: &mut Ctx) -> Result<()> {
        let src = ctx.item_obj(0)?;
        let dst = ctx.item_obj(1)?;

        if ctx.op().spec.code == code::DEREF_OF {
            // Explicit dereferencing grabs the bottom-most non-reference,
            // matching the NT interpreter (not the one-level ACPICA rule).
            let bottom = self.objects.unwind(src);
            if self.objects.type_of(bottom) == ObjectType::BufferIndex {
                let byte = self.resolve_value_owned(bottom)?;
                self.objects.assign_shallow(dst, byte);
                self.objects.unref(byte);
            } else {
                self.objects.assign_shallow(dst, bottom);
            }
            return Ok(());
        }

        self.objects.ref_(src);
        self.objects.replace(
            dst,
            Object::Reference {
                kind: RefKind::RefOf,
                inner: src,
            },
        );
        Ok(())
    }

    pub(super) fn handle_cond_ref_of(&mut self, ctx: &mut Ctx) -> Result<()> {
        let target = ctx.item_obj(1)?;

        let exists = {
            let probed = ctx.item_obj(0)?;
            self.objects.type_of(probed) != ObjectType::Uninitialized
        };

        if exists {
            let probed = ctx.item_obj(0)?;
            self.objects.ref_(probed);
            let reference = self.objects.alloc(Object::Reference {
                kind: RefKind::RefOf,
                inner: probed,
            });
            let stored = self.store_to_target(target, reference);
            self.objects.unref(reference);
            stored?;
        }

        self.set_result(ctx, 2, Object::Integer(if exists { self.ones() } else { 0 }))
    }

    pub(super) fn handle_copy_object_or_store(&mut self, ctx: &mut Ctx) -> Result<()> {
        let src = ctx.item_obj(0)?;
        let dst = ctx.item_obj(1)?;

        if ctx.op().spec.code == code::STORE {
            self.store_to_target(dst, src)
        } else {
            self.copy_object_to_reference(dst, src)
        }
    }
}

fn mid_slice(bytes: &[u8], index: usize, length: usize) -> &[u8] {
    if index >= bytes.len() {
        return &[];
    }
    let end = index.saturating_add(length).min(bytes.len());
    &bytes[index..end]
}
