//! Operation regions and field units: packing, update rules, access
//! routing.

mod common;

use std::cell::RefCell;
use std::collections::HashMap;

use amlvm::error::Result;
use amlvm::prelude::*;
use common::*;

const FIELD_BYTE_ACCESS: u8 = 0x01;
const FIELD_PRESERVE: u8 = 0x00;
const FIELD_WRITE_AS_ONES: u8 = 0x20;

fn vm_with_host(aml: &[u8]) -> (Interpreter, std::rc::Rc<TestHost>) {
    // The interpreter owns its host box; tests that need to inspect memory
    // keep a second handle to the same maps.
    struct Shared(std::rc::Rc<TestHost>);
    impl Host for Shared {
        fn mem_read(&self, a: u64, w: AccessWidth) -> Result<u64> {
            self.0.mem_read(a, w)
        }
        fn mem_write(&self, a: u64, w: AccessWidth, v: u64) -> Result<()> {
            self.0.mem_write(a, w, v)
        }
        fn io_read(&self, a: u64, w: AccessWidth) -> Result<u64> {
            self.0.io_read(a, w)
        }
        fn io_write(&self, a: u64, w: AccessWidth, v: u64) -> Result<()> {
            self.0.io_write(a, w, v)
        }
        fn stall(&self, u: u64) {
            self.0.stall(u)
        }
        fn sleep(&self, m: u64) {
            self.0.sleep(m)
        }
        fn ticks(&self) -> u64 {
            self.0.ticks()
        }
        fn thread_id(&self) -> u64 {
            self.0.thread_id()
        }
        fn mem_cmpxchg(&self, a: u64, e: u32, n: u32) -> Result<u32> {
            self.0.mem_cmpxchg(a, e, n)
        }
        fn wait_for_global_lock_event(&self, t: u16) -> bool {
            self.0.wait_for_global_lock_event(t)
        }
        fn signal_global_lock_release(&self) {
            self.0.signal_global_lock_release()
        }
        fn schedule_work(&self, q: WorkQueue, w: WorkItem) -> Result<()> {
            self.0.schedule_work(q, w)
        }
        fn drain_work(&self) {
            self.0.drain_work()
        }
        fn firmware_request(&self, r: FirmwareRequest) -> Result<()> {
            self.0.firmware_request(r)
        }
    }

    let host = std::rc::Rc::new(TestHost::new());
    let mut vm = Interpreter::new(Box::new(Shared(host.clone())), Params::default());
    vm.load_table(&dsdt(2, aml)).expect("table load");
    (vm, host)
}

fn set_mem(host: &TestHost, base: u64, bytes: &[u8]) {
    let mut mem = host.mem.borrow_mut();
    for (i, &b) in bytes.iter().enumerate() {
        mem.insert(base + i as u64, b);
    }
}

fn get_mem(host: &TestHost, base: u64, len: usize) -> Vec<u8> {
    let mem = host.mem.borrow();
    (0..len)
        .map(|i| *mem.get(&(base + i as u64)).unwrap_or(&0))
        .collect()
}

#[test]
fn aligned_field_reads_and_writes() {
    let aml = [
        op_region("REG0", 0, 0x1000, 0x10),
        field(
            "REG0",
            FIELD_BYTE_ACCESS | FIELD_PRESERVE,
            &[("FLD0", 8), ("FLD1", 8)],
        ),
        method("RD01", 0, &ret(&name("FLD1"))),
        method("WR00", 1, &store(&arg(0), &name("FLD0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    set_mem(&host, 0x1000, &[0x12, 0x34]);
    assert_eq!(vm.eval("\\RD01", &[]).unwrap(), Some(Value::Integer(0x34)));

    vm.eval("\\WR00", &[Value::Integer(0xAB)]).unwrap();
    assert_eq!(get_mem(&host, 0x1000, 2), vec![0xAB, 0x34]);
}

#[test]
fn field_read_across_access_boundary() {
    // A 16-bit field at bit offset 4 of a byte-access region is assembled
    // from multiple single-byte reads.
    let aml = [
        op_region("REG0", 0, 0x2000, 0x10),
        field(
            "REG0",
            FIELD_BYTE_ACCESS | FIELD_PRESERVE,
            &[("", 4), ("FLD0", 16)],
        ),
        method("MAIN", 0, &ret(&name("FLD0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    // Bits 4..20 of 0x87654321 (little-endian bytes 21 43 65 87) = 0x5432.
    set_mem(&host, 0x2000, &[0x21, 0x43, 0x65, 0x87]);
    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0x5432)));
}

#[test]
fn preserve_update_rule_keeps_neighboring_bits() {
    let aml = [
        op_region("REG0", 0, 0x3000, 0x10),
        field(
            "REG0",
            FIELD_BYTE_ACCESS | FIELD_PRESERVE,
            &[("", 4), ("FLD0", 4)],
        ),
        method("MAIN", 1, &store(&arg(0), &name("FLD0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    set_mem(&host, 0x3000, &[0xFF]);
    vm.eval("\\MAIN", &[Value::Integer(0)]).unwrap();
    assert_eq!(get_mem(&host, 0x3000, 1), vec![0x0F]);
}

#[test]
fn write_as_ones_update_rule_sets_neighboring_bits() {
    let aml = [
        op_region("REG0", 0, 0x4000, 0x10),
        field(
            "REG0",
            FIELD_BYTE_ACCESS | FIELD_WRITE_AS_ONES,
            &[("", 4), ("FLD0", 4)],
        ),
        method("MAIN", 1, &store(&arg(0), &name("FLD0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    set_mem(&host, 0x4000, &[0x00]);
    vm.eval("\\MAIN", &[Value::Integer(0)]).unwrap();
    assert_eq!(get_mem(&host, 0x4000, 1), vec![0x0F]);
}

#[test]
fn field_write_then_read_round_trips() {
    let aml = [
        op_region("REG0", 0, 0x5000, 0x10),
        field(
            "REG0",
            FIELD_BYTE_ACCESS | FIELD_PRESERVE,
            &[("", 3), ("FLD0", 13)],
        ),
        method("WRIT", 1, &store(&arg(0), &name("FLD0"))),
        method("READ", 0, &ret(&name("FLD0"))),
    ]
    .concat();
    let (mut vm, _host) = vm_with_host(&aml);

    for value in [0u64, 1, 0x1FFF, 0x1234, 0x0AAA] {
        vm.eval("\\WRIT", &[Value::Integer(value)]).unwrap();
        assert_eq!(
            vm.eval("\\READ", &[]).unwrap(),
            Some(Value::Integer(value)),
            "value {value:#X} must survive the field"
        );
    }
}

#[test]
fn wide_fields_come_back_as_buffers() {
    let aml = [
        op_region("REG0", 0, 0x6000, 0x20),
        field("REG0", FIELD_BYTE_ACCESS, &[("FLD0", 128)]),
        method("MAIN", 0, &ret(&name("FLD0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    let bytes: Vec<u8> = (0u8..16).collect();
    set_mem(&host, 0x6000, &bytes);
    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Buffer(bytes)));
}

#[test]
fn system_io_fields_use_port_space() {
    let aml = [
        op_region("REG0", 1, 0x60, 0x4),
        field("REG0", FIELD_BYTE_ACCESS, &[("PRT0", 8)]),
        method("MAIN", 0, &ret(&name("PRT0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    host.io.borrow_mut().insert(0x60, 0x5A);
    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0x5A)));
}

#[test]
fn index_fields_tunnel_through_their_data_field() {
    // IDX selects a byte offset, DAT is the data window; an IndexField
    // read at offset N writes N into IDX, then reads DAT.
    let aml = [
        op_region("REG0", 0, 0x7000, 0x10),
        field("REG0", FIELD_BYTE_ACCESS, &[("IDX0", 8), ("DAT0", 8)]),
        index_field("IDX0", "DAT0", FIELD_BYTE_ACCESS, &[("", 16), ("IFD0", 8)]),
        method("MAIN", 0, &ret(&name("IFD0"))),
    ]
    .concat();
    let (mut vm, host) = vm_with_host(&aml);

    // IFD0 lives at indexed offset 2. The data register (offset 1 in the
    // region) answers 0x77 once the index register holds 2.
    set_mem(&host, 0x7000, &[0x00, 0x77]);
    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0x77)));
    // The index register observed the offset write.
    assert_eq!(get_mem(&host, 0x7000, 1), vec![0x02]);
}

#[test]
fn custom_region_handlers_receive_accesses() {
    struct Recorder {
        log: RefCell<Vec<(RegionOp, u64, u8)>>,
        data: RefCell<HashMap<u64, u64>>,
    }

    impl RegionHandler for Recorder {
        fn run(&self, _host: &dyn Host, op: RegionOp, rw: &mut RegionRw) -> Result<()> {
            self.log.borrow_mut().push((op, rw.offset, rw.byte_width));
            match op {
                RegionOp::Read => {
                    rw.value = *self.data.borrow().get(&rw.offset).unwrap_or(&0);
                }
                RegionOp::Write => {
                    self.data.borrow_mut().insert(rw.offset, rw.value);
                }
                _ => {}
            }
            Ok(())
        }
    }

    let aml = [
        op_region("ECRG", 0x03, 0x80, 0x10),
        field("ECRG", FIELD_BYTE_ACCESS, &[("ECF0", 8)]),
        method("MAIN", 0, &[
            store(&int(0x42), &name("ECF0")),
            ret(&name("ECF0")),
        ]
        .concat()),
    ]
    .concat();

    let mut vm = Interpreter::new(Box::new(TestHost::new()), Params::default());
    vm.install_region_handler(
        AddressSpace::EmbeddedController,
        Box::new(Recorder {
            log: RefCell::new(Vec::new()),
            data: RefCell::new(HashMap::new()),
        }),
    );
    vm.load_table(&dsdt(2, &aml)).unwrap();

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0x42)));
}

#[test]
fn missing_region_handler_aborts() {
    let aml = [
        op_region("SMB0", 0x04, 0, 0x10),
        field("SMB0", FIELD_BYTE_ACCESS, &[("FLD0", 8)]),
        method("MAIN", 0, &ret(&name("FLD0"))),
    ]
    .concat();
    let (mut vm, _host) = vm_with_host(&aml);

    assert_eq!(
        vm.eval("\\MAIN", &[]),
        Err(amlvm::error::AmlError::NoHandler)
    );
}
