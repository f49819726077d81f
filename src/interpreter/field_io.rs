//! Field-unit and buffer-field access: turning bit-granular reads and
//! writes into access-sized bursts against region handlers, with bank and
//! index indirection.

use crate::consts::TIMEOUT_INFINITE;
use crate::error::{AmlError, Result};
use crate::field::{self, BufferField, FieldKind, FieldUnit, UpdateRule};
use crate::namespace::NodeHandle;
use crate::object::{Object, ObjectHandle};
use crate::opregion::RegionOp;

use super::Interpreter;

impl Interpreter {
    /// Read a field unit into a fresh value object: an integer when it
    /// fits the revision's integer width, a buffer otherwise.
    pub(crate) fn read_field_unit_value(&mut self, handle: ObjectHandle) -> Result<ObjectHandle> {
        let unit = match self.objects.get(handle) {
            Object::FieldUnit(unit) => unit.clone(),
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        let data = self.field_read(&unit)?;
        Ok(self.bytes_to_value(data, unit.bit_length))
    }

    /// Read a buffer field into a fresh value object.
    pub(crate) fn read_buffer_field_value(&mut self, handle: ObjectHandle) -> Result<ObjectHandle> {
        let BufferField {
            buffer,
            bit_index,
            bit_length,
        } = match self.objects.get(handle) {
            Object::BufferField(bf) => *bf,
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        let data = match self.objects.get(buffer) {
            Object::Buffer(bytes) => {
                if (bit_index + bit_length).div_ceil(8) as usize > bytes.len() {
                    return Err(AmlError::IndexOutOfBounds);
                }
                field::read_buffer_field(bytes, bit_index, bit_length)
            }
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        Ok(self.bytes_to_value(data, bit_length))
    }

    fn bytes_to_value(&mut self, data: Vec<u8>, bit_length: u32) -> ObjectHandle {
        if bit_length > self.int_bits() {
            self.objects.alloc(Object::Buffer(data))
        } else {
            let mut raw = [0u8; 8];
            raw[..data.len()].copy_from_slice(&data);
            self.objects.alloc(Object::Integer(u64::from_le_bytes(raw)))
        }
    }

    /// Store a value into a field-like destination (field unit, buffer
    /// field, or buffer index).
    pub(crate) fn write_field_like(&mut self, dst: ObjectHandle, src: ObjectHandle) -> Result<()> {
        let src_owned = self.resolve_value_owned(src)?;
        let bytes = match self.objects.get(src_owned) {
            Object::Integer(value) => value.to_le_bytes()[..self.int_bytes()].to_vec(),
            Object::Buffer(data) | Object::String(data) => data.clone(),
            other => {
                let ty = other.type_of();
                self.objects.unref(src_owned);
                return Err(AmlError::IncompatibleObjectType(ty));
            }
        };
        self.objects.unref(src_owned);

        match self.objects.get(dst).clone() {
            Object::FieldUnit(unit) => self.field_write(&unit, &bytes),
            Object::BufferField(bf) => {
                match self.objects.get_mut(bf.buffer) {
                    Object::Buffer(backing) => {
                        if (bf.bit_index + bf.bit_length).div_ceil(8) as usize > backing.len() {
                            return Err(AmlError::IndexOutOfBounds);
                        }
                        field::write_buffer_field(backing, bf.bit_index, bf.bit_length, &bytes);
                        Ok(())
                    }
                    other => Err(AmlError::IncompatibleObjectType(other.type_of())),
                }
            }
            Object::BufferIndex { buffer, index } => {
                let byte = bytes.first().copied().unwrap_or(0);
                match self.objects.get_mut(buffer) {
                    Object::Buffer(data) | Object::String(data) => {
                        *data.get_mut(index).ok_or(AmlError::IndexOutOfBounds)? = byte;
                        Ok(())
                    }
                    other => Err(AmlError::IncompatibleObjectType(other.type_of())),
                }
            }
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    /// Read a whole field unit, honoring its lock rule.
    fn field_read(&mut self, unit: &FieldUnit) -> Result<Vec<u8>> {
        let locked = self.lock_field(unit)?;
        let result = self.field_read_unlocked(unit);
        self.unlock_field(locked);
        result
    }

    /// Write a whole field unit, honoring its lock rule.
    fn field_write(&mut self, unit: &FieldUnit, src: &[u8]) -> Result<()> {
        let locked = self.lock_field(unit)?;
        let result = self.field_write_unlocked(unit, src);
        self.unlock_field(locked);
        result
    }

    fn lock_field(&mut self, unit: &FieldUnit) -> Result<bool> {
        if !unit.lock {
            return Ok(false);
        }
        let global = self.sync.global_lock_mutex();
        self.sync
            .acquire(self.host.as_ref(), global, TIMEOUT_INFINITE)?;
        Ok(true)
    }

    fn unlock_field(&mut self, locked: bool) {
        if locked {
            let global = self.sync.global_lock_mutex();
            let _ = self.sync.release(self.host.as_ref(), global);
        }
    }

    fn field_read_unlocked(&mut self, unit: &FieldUnit) -> Result<Vec<u8>> {
        let byte_len = field::bits_to_bytes(unit.bit_length);

        // Fast path: aligned within a single access.
        if unit.bit_offset == 0 && byte_len <= unit.access_bytes as usize {
            let mut word = 0u64;
            self.access_field(unit, unit.byte_offset, RegionOp::Read, &mut word)?;

            let mut out = word.to_le_bytes()[..byte_len].to_vec();
            field::cut_misaligned_tail(&mut out, byte_len - 1, unit.bit_length);
            return Ok(out);
        }

        let access_bits = unit.access_bytes as u32 * 8;
        let mut out = vec![0u8; byte_len];
        let mut bits_left = unit.bit_length;
        let mut src_index = unit.bit_offset as u64;
        let mut dst_index = 0u64;
        let mut byte_offset = unit.byte_offset;

        while bits_left > 0 {
            let mut word = 0u64;
            self.access_field(unit, byte_offset, RegionOp::Read, &mut word)?;

            let span = ((access_bits as u64 - src_index) as u32).min(bits_left) as u64;
            field::bit_copy(
                &mut out,
                dst_index,
                span,
                &word.to_le_bytes(),
                src_index,
                span,
            );

            bits_left -= span as u32;
            dst_index += span;
            src_index = 0;
            byte_offset += unit.access_bytes as u32;
        }

        Ok(out)
    }

    fn field_write_unlocked(&mut self, unit: &FieldUnit, src: &[u8]) -> Result<()> {
        let access_bits = unit.access_bytes as u64 * 8;
        let src_bits = src.len() as u64 * 8;

        let mut bits_left = unit.bit_length as u64;
        let mut dst_index = unit.bit_offset as u64;
        let mut src_index = 0u64;
        let mut byte_offset = unit.byte_offset;

        while bits_left > 0 {
            let span = (access_bits - dst_index).min(bits_left);
            let mut word = 0u64;

            // A stripe not fully covered by source bits is completed per the
            // update rule before merging.
            if dst_index != 0 || span < access_bits {
                match unit.update_rule {
                    UpdateRule::Preserve => {
                        self.access_field(unit, byte_offset, RegionOp::Read, &mut word)?;
                    }
                    UpdateRule::WriteAsOnes => word = u64::MAX,
                    UpdateRule::WriteAsZeros => {}
                }
            }

            let mut stripe = word.to_le_bytes();
            field::bit_copy(
                &mut stripe,
                dst_index,
                span,
                src,
                src_index,
                src_bits.saturating_sub(src_index),
            );
            let mut merged = u64::from_le_bytes(stripe);

            self.access_field(unit, byte_offset, RegionOp::Write, &mut merged)?;

            bits_left -= span;
            src_index += span;
            dst_index = 0;
            byte_offset += unit.access_bytes as u32;
        }

        Ok(())
    }

    /// One access-width transfer, routed per the field's kind: banked
    /// accesses select the bank first, index fields tunnel through their
    /// data field instead of a region.
    fn access_field(
        &mut self,
        unit: &FieldUnit,
        byte_offset: u32,
        op: RegionOp,
        value: &mut u64,
    ) -> Result<()> {
        match &unit.kind {
            FieldKind::Normal { region } => {
                self.region_access(*region, op, byte_offset, unit.access_bytes, value)
            }
            FieldKind::Bank {
                region,
                bank,
                value: bank_value,
            } => {
                let selection = bank_value.to_le_bytes();
                self.write_field_object(*bank, &selection)?;
                self.region_access(*region, op, byte_offset, unit.access_bytes, value)
            }
            FieldKind::Index { index, data } => {
                let offset_bytes = byte_offset.to_le_bytes();
                self.write_field_object(*index, &offset_bytes)?;

                match op {
                    RegionOp::Read => {
                        let data_unit = self.field_unit_at(*data)?;
                        let bytes = self.field_read(&data_unit)?;
                        let mut raw = [0u8; 8];
                        let n = bytes.len().min(8);
                        raw[..n].copy_from_slice(&bytes[..n]);
                        *value = u64::from_le_bytes(raw);
                        Ok(())
                    }
                    RegionOp::Write => {
                        let bytes = value.to_le_bytes();
                        self.write_field_object(*data, &bytes[..unit.access_bytes as usize])
                    }
                    _ => Err(AmlError::InvalidArgument),
                }
            }
        }
    }

    fn field_unit_at(&self, handle: ObjectHandle) -> Result<FieldUnit> {
        match self.objects.get(handle) {
            Object::FieldUnit(unit) => Ok(unit.clone()),
            other => Err(AmlError::IncompatibleObjectType(other.type_of())),
        }
    }

    fn write_field_object(&mut self, handle: ObjectHandle, bytes: &[u8]) -> Result<()> {
        let unit = self.field_unit_at(handle)?;
        self.field_write(&unit, bytes)
    }

    /// Dispatch one access to the region's space handler, attaching the
    /// region on first touch.
    fn region_access(
        &mut self,
        region_node: NodeHandle,
        op: RegionOp,
        field_offset: u32,
        byte_width: u8,
        value: &mut u64,
    ) -> Result<()> {
        if self.ns.is_dangling(region_node) {
            return Err(AmlError::UndefinedReference);
        }

        let object = self.ns.object(region_node);
        let mut region = match self.objects.get(object) {
            Object::OpRegion(region) => region.clone(),
            other => return Err(AmlError::IncompatibleObjectType(other.type_of())),
        };

        if field_offset as u64 + byte_width as u64 > region.length {
            return Err(AmlError::IndexOutOfBounds);
        }

        if !region.attached {
            self.regions.attach(self.host.as_ref(), &mut region)?;
            if let Object::OpRegion(stored) = self.objects.get_mut(object) {
                stored.attached = true;
            }
        }

        self.regions.access(
            self.host.as_ref(),
            &region,
            op,
            field_offset as u64,
            byte_width,
            value,
        )
    }
}
