//! Control flow, method calls, and synchronization behavior.

mod common;

use amlvm::error::AmlError;
use amlvm::prelude::*;
use common::*;

#[test]
fn if_else_selects_by_predicate() {
    let body = [
        if_(&lequal(&arg(0), &int(1)), &ret(&int(10))),
        else_(&ret(&int(20))),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 1, &body));

    assert_eq!(
        vm.eval("\\MAIN", &[Value::Integer(1)]).unwrap(),
        Some(Value::Integer(10))
    );
    assert_eq!(
        vm.eval("\\MAIN", &[Value::Integer(7)]).unwrap(),
        Some(Value::Integer(20))
    );
}

#[test]
fn while_accumulates() {
    // Local0 = 0; Local1 = 0; While (Local0 < 5) { Local1 += Local0; Local0++ }
    let body = [
        store(&int(0), &local(0)),
        store(&int(0), &local(1)),
        while_(
            &lless(&local(0), &int(5)),
            &[
                store(&add(&local(1), &local(0), NULL_TARGET), &local(1)),
                increment(&local(0)),
            ]
            .concat(),
        ),
        ret(&local(1)),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(10)));
}

#[test]
fn break_leaves_the_innermost_while() {
    // While(1) { Local0++; If (Local0 == 3) { Break } } ; Return(Local0)
    let body = [
        store(&int(0), &local(0)),
        while_(
            &int(1),
            &[
                increment(&local(0)),
                if_(&lequal(&local(0), &int(3)), BREAK),
            ]
            .concat(),
        ),
        ret(&local(0)),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(3)));
}

#[test]
fn continue_reevaluates_the_predicate() {
    // Count odd numbers below 10 the hard way.
    // While (Local0 < 10) { Local0++; If (And(Local0, 1) == 0) { Continue };
    //                       Local1++ }
    let and_with_one = {
        let mut out = vec![0x7B];
        out.extend_from_slice(&local(0));
        out.extend_from_slice(&int(1));
        out.extend_from_slice(NULL_TARGET);
        out
    };
    let body = [
        store(&int(0), &local(0)),
        store(&int(0), &local(1)),
        while_(
            &lless(&local(0), &int(10)),
            &[
                increment(&local(0)),
                if_(&lequal(&and_with_one, &int(0)), CONTINUE),
                increment(&local(1)),
            ]
            .concat(),
        ),
        ret(&local(1)),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(5)));
}

#[test]
fn methods_call_each_other() {
    let aml = [
        method("HELP", 2, &ret(&multiply(&arg(0), &arg(1), NULL_TARGET))),
        method(
            "MAIN",
            0,
            &ret(&add(
                &call("HELP", &[int(6), int(7)]),
                &int(0),
                NULL_TARGET,
            )),
        ),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(42)));
}

#[test]
fn method_return_value_can_be_discarded() {
    let aml = [
        method("HELP", 0, &ret(&int(9))),
        method(
            "MAIN",
            0,
            &[call0("HELP"), ret(&int(1))].concat(),
        ),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(1)));
}

#[test]
fn runaway_recursion_is_bounded() {
    let aml = [
        method("RECR", 0, &call0("RECR")),
        method("MAIN", 0, &call0("RECR")),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::CallStackDepthLimit));
}

#[test]
fn serialized_method_reenters_without_blocking() {
    // Name(CNT, 3); serialized RECR decrements CNT and re-enters while it
    // is non-zero; completing proves re-acquisition nests instead of
    // deadlocking.
    let body = [
        if_(
            &lless(&int(0), &name("CNT")),
            &[
                store(&subtract(&name("CNT"), &int(1), NULL_TARGET), &name("CNT")),
                call0("RECR"),
            ]
            .concat(),
        ),
    ]
    .concat();
    let aml = [
        name_decl("CNT", &int(3)),
        method("RECR", 0x08, &body),
        method("MAIN", 0, &[call0("RECR"), ret(&name("CNT"))].concat()),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0)));
}

#[test]
fn aml_mutexes_acquire_and_release() {
    let aml = [
        mutex("MTX0", 0),
        method(
            "MAIN",
            0,
            &[
                // Acquire returns false (zero) on success.
                store(&acquire("MTX0", 0xFFFF), &local(0)),
                release("MTX0"),
                ret(&local(0)),
            ]
            .concat(),
        ),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0)));
    // Leftover state would make a second run fail.
    assert_eq!(vm.eval("\\MAIN", &[]).unwrap(), Some(Value::Integer(0)));
}

#[test]
fn out_of_order_mutex_acquisition_fails() {
    let aml = [
        mutex("MTXH", 5),
        mutex("MTXL", 2),
        method(
            "MAIN",
            0,
            &[
                store(&acquire("MTXH", 0xFFFF), &local(0)),
                store(&acquire("MTXL", 0xFFFF), &local(1)),
            ]
            .concat(),
        ),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::SyncLevelTooHigh));
    // The abort released everything; the method can run again.
    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::SyncLevelTooHigh));
}

#[test]
fn nested_scopes_resolve_relative_names() {
    let aml = [
        scope(
            "\\_SB_",
            &[
                name_decl("ROOT", &int(7)),
                device(
                    "PCI0",
                    &method("GETR", 0, &ret(&name("ROOT"))),
                ),
            ]
            .concat(),
        ),
    ]
    .concat();
    let mut vm = load(&aml);

    // GETR finds ROOT by walking up from \_SB_.PCI0.
    assert_eq!(
        vm.eval("\\_SB_.PCI0.GETR", &[]).unwrap(),
        Some(Value::Integer(7))
    );
}
