//! End-to-end evaluation scenarios against handcrafted definition blocks.

mod common;

use amlvm::error::AmlError;
use amlvm::prelude::*;
use common::*;

#[test]
fn integer_arithmetic() {
    let aml = method("MAIN", 0, &ret(&add(&int(2), &int(3), NULL_TARGET)));
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(5)));
}

#[test]
fn string_identity() {
    let aml = method("MAIN", 0, &ret(&string("hello")));
    let mut vm = load(&aml);

    let result = vm.eval("\\MAIN", &[]).unwrap();
    assert_eq!(result, Some(Value::String("hello".into())));
}

#[test]
fn method_without_return_yields_nothing() {
    let aml = method("MAIN", 0, &store(&int(5), &local(0)));
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), None);
}

#[test]
fn unbounded_while_hits_loop_timeout() {
    let aml = [
        method(
            "MAIN",
            0,
            &[
                store(&int(0), &local(0)),
                while_(&int(1), &increment(&local(0))),
            ]
            .concat(),
        ),
    ]
    .concat();

    let params = Params::default().with_loop_timeout_ms(50);
    let mut vm = Interpreter::new(Box::new(TestHost::new()), params);
    vm.load_table(&dsdt(2, &aml)).unwrap();

    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::LoopTimeout));
}

#[test]
fn store_overwrites_the_local_not_the_source() {
    let body = [
        store(&buffer(&[1, 2, 3, 4]), &local(0)),
        store(&local(0), &local(1)),
        store(&buffer(&[9, 9]), &local(1)),
        ret(&local(0)),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(
        vm.eval("\\MAIN", &[]).unwrap(),
        Some(Value::Buffer(vec![1, 2, 3, 4]))
    );
}

#[test]
fn copy_object_behaves_like_store_for_locals() {
    let body = [
        copy_object(&buffer(&[1, 2, 3, 4]), &local(0)),
        copy_object(&local(0), &local(1)),
        copy_object(&buffer(&[9, 9]), &local(1)),
        ret(&local(0)),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(
        vm.eval("\\MAIN", &[]).unwrap(),
        Some(Value::Buffer(vec![1, 2, 3, 4]))
    );
}

#[test]
fn scope_create_then_resolve() {
    let aml = scope("\\", &name_decl("XYZ", &int(0x42)));
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\XYZ", &[]).unwrap(), Some(Value::Integer(0x42)));
}

#[test]
fn predefined_objects_respond() {
    let mut vm = load(&[]);

    assert_eq!(vm.eval("\\_REV", &[]).unwrap(), Some(Value::Integer(2)));
    assert_eq!(
        vm.eval("\\_OS_", &[]).unwrap(),
        Some(Value::String("Microsoft Windows NT".into()))
    );

    let yes = vm
        .eval("\\_OSI", &[Value::String("Windows 2015".into())])
        .unwrap();
    assert_eq!(yes, Some(Value::Integer(u64::MAX)));

    let no = vm
        .eval("\\_OSI", &[Value::String("Not An Interface".into())])
        .unwrap();
    assert_eq!(no, Some(Value::Integer(0)));
}

#[test]
fn eval_typed_enforces_the_mask() {
    let aml = method("MAIN", 0, &ret(&string("nope")));
    let mut vm = load(&aml);

    assert_eq!(vm.eval_integer("\\_REV", &[]).unwrap(), 2);
    assert!(matches!(
        vm.eval_typed("\\MAIN", &[], TypeMask::INTEGER),
        Err(AmlError::TypeMismatch { .. })
    ));
}

#[test]
fn arguments_reach_the_method() {
    let aml = method("MAIN", 2, &ret(&add(&arg(0), &arg(1), NULL_TARGET)));
    let mut vm = load(&aml);

    let result = vm
        .eval("\\MAIN", &[Value::Integer(40), Value::Integer(2)])
        .unwrap();
    assert_eq!(result, Some(Value::Integer(42)));

    // Wrong argument count is rejected before execution.
    assert_eq!(
        vm.eval("\\MAIN", &[Value::Integer(1)]),
        Err(AmlError::InvalidArgument)
    );
}

#[test]
fn rev1_dsdt_truncates_integers() {
    let aml = method("MAIN", 0, &ret(&[0xFF])); // OnesOp
    let mut vm = Interpreter::new(Box::new(TestHost::new()), Params::default());
    vm.load_table(&dsdt(1, &aml)).unwrap();

    assert!(vm.is_rev1());
    assert_eq!(
        vm.eval("\\MAIN", &[]).unwrap(),
        Some(Value::Integer(0xFFFF_FFFF))
    );
}

#[test]
fn undefined_path_is_reported() {
    let mut vm = load(&[]);
    assert_eq!(
        vm.eval("\\NOPE", &[]),
        Err(AmlError::UndefinedReference)
    );
}

#[test]
fn notify_reaches_installed_handlers() {
    use std::sync::{Arc, Mutex};

    struct Recorder(Mutex<Vec<(String, u64)>>);
    impl NotifyHandler for Recorder {
        fn notify(&self, path: &str, value: u64) {
            self.0.lock().unwrap().push((path.into(), value));
        }
    }

    let aml = [
        device("DEV0", &[]),
        method("MAIN", 0, &notify("DEV0", 0x80)),
    ]
    .concat();
    let mut vm = load(&aml);

    // Nothing is listening yet.
    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::NoHandler));

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let dev0 = vm.namespace().find_path(vm.namespace().root(), "\\DEV0").unwrap();
    vm.install_notify_handler(dev0, recorder.clone()).unwrap();

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), None);
    assert_eq!(
        recorder.0.lock().unwrap().as_slice(),
        &[("\\DEV0".to_string(), 0x80)]
    );
}

#[test]
fn root_notify_handler_hears_every_device() {
    use std::sync::{Arc, Mutex};

    struct Recorder(Mutex<Vec<(String, u64)>>);
    impl NotifyHandler for Recorder {
        fn notify(&self, path: &str, value: u64) {
            self.0.lock().unwrap().push((path.into(), value));
        }
    }

    let aml = [
        device("DEV0", &[]),
        device("DEV1", &[]),
        method(
            "MAIN",
            0,
            &[notify("DEV0", 1), notify("DEV1", 2)].concat(),
        ),
    ]
    .concat();
    let mut vm = load(&aml);

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let root = vm.namespace().root();
    vm.install_notify_handler(root, recorder.clone()).unwrap();

    vm.eval("\\MAIN", &[]).unwrap();
    assert_eq!(
        recorder.0.lock().unwrap().as_slice(),
        &[("\\DEV0".to_string(), 1), ("\\DEV1".to_string(), 2)]
    );
}

#[test]
fn notify_handlers_reject_plain_data_targets() {
    use std::sync::Arc;

    struct Ignore;
    impl NotifyHandler for Ignore {
        fn notify(&self, _: &str, _: u64) {}
    }

    let mut vm = load(&name_decl("INTG", &int(5)));
    let node = vm.namespace().find_path(vm.namespace().root(), "\\INTG").unwrap();
    assert!(matches!(
        vm.install_notify_handler(node, Arc::new(Ignore)),
        Err(AmlError::IncompatibleObjectType(_))
    ));
}

#[test]
fn unloading_a_table_removes_its_objects() {
    let mut vm = Interpreter::new(Box::new(TestHost::new()), Params::default());
    vm.load_table(&dsdt(2, &name_decl("KEEP", &int(1)))).unwrap();
    let extra = vm
        .load_table(&ssdt(
            &[
                name_decl("TEMP", &int(2)),
                method("TMTH", 0, &ret(&int(3))),
            ]
            .concat(),
        ))
        .unwrap();

    assert_eq!(vm.eval("\\TEMP", &[]).unwrap(), Some(Value::Integer(2)));
    assert_eq!(vm.eval("\\TMTH", &[]).unwrap(), Some(Value::Integer(3)));

    vm.unload_table(extra).unwrap();

    assert_eq!(vm.eval("\\TEMP", &[]), Err(AmlError::UndefinedReference));
    assert_eq!(vm.eval("\\TMTH", &[]), Err(AmlError::UndefinedReference));
    // Objects from other tables are untouched.
    assert_eq!(vm.eval("\\KEEP", &[]).unwrap(), Some(Value::Integer(1)));

    // A retired index cannot be unloaded twice.
    assert_eq!(vm.unload_table(extra), Err(AmlError::InvalidArgument));
}

#[test]
fn devices_scope_their_children() {
    let aml = device(
        "DEV0",
        &[
            name_decl("_HID", &int(0x1234)),
            method("STAT", 0, &ret(&int(0x0F))),
        ]
        .concat(),
    );
    let mut vm = load(&aml);

    assert_eq!(
        vm.eval("\\DEV0._HID", &[]).unwrap(),
        Some(Value::Integer(0x1234))
    );
    assert_eq!(
        vm.eval("\\DEV0.STAT", &[]).unwrap(),
        Some(Value::Integer(0x0F))
    );
}
