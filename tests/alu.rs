//! Arithmetic, conversions, packages, buffers and references.

mod common;

use amlvm::error::AmlError;
use amlvm::prelude::*;
use common::*;

fn eval_main(body: &[u8]) -> Option<Value> {
    let mut vm = load(&method("MAIN", 0, body));
    vm.eval("\\MAIN", &[]).unwrap()
}

#[test]
fn divide_produces_quotient_and_remainder() {
    let body = [
        store(
            &divide(&int(7), &int(2), &local(0), NULL_TARGET),
            &local(1),
        ),
        ret(&package(&[local(0), local(1)])),
    ]
    .concat();

    assert_eq!(
        eval_main(&body),
        Some(Value::Package(vec![Value::Integer(1), Value::Integer(3)]))
    );
}

#[test]
fn division_by_zero_aborts() {
    let body = ret(&divide(&int(7), &int(0), NULL_TARGET, NULL_TARGET));
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::BadBytecode));
}

#[test]
fn shifts_saturate_past_the_integer_width() {
    assert_eq!(
        eval_main(&ret(&shift_left(&int(1), &int(4), NULL_TARGET))),
        Some(Value::Integer(16))
    );
    assert_eq!(
        eval_main(&ret(&shift_left(&int(1), &int(200), NULL_TARGET))),
        Some(Value::Integer(0))
    );
}

#[test]
fn comparisons_yield_all_ones_or_zero() {
    assert_eq!(
        eval_main(&ret(&lequal(&string("abc"), &string("abc")))),
        Some(Value::Integer(u64::MAX))
    );
    assert_eq!(
        eval_main(&ret(&lless(&int(3), &int(2)))),
        Some(Value::Integer(0))
    );
}

#[test]
fn logical_not_of_zero_is_ones() {
    let mut body = vec![0x92]; // LNot
    body.extend_from_slice(&int(0));
    assert_eq!(eval_main(&ret(&body)), Some(Value::Integer(u64::MAX)));
}

#[test]
fn concat_strings_and_buffers() {
    let mut concat = vec![0x73];
    concat.extend_from_slice(&string("ab"));
    concat.extend_from_slice(&string("cd"));
    concat.extend_from_slice(NULL_TARGET);
    assert_eq!(
        eval_main(&ret(&concat)),
        Some(Value::String("abcd".into()))
    );

    let mut concat = vec![0x73];
    concat.extend_from_slice(&buffer(&[1, 2]));
    concat.extend_from_slice(&buffer(&[3]));
    concat.extend_from_slice(NULL_TARGET);
    assert_eq!(
        eval_main(&ret(&concat)),
        Some(Value::Buffer(vec![1, 2, 3]))
    );
}

#[test]
fn to_integer_parses_strings() {
    let mut convert = vec![0x99]; // ToInteger
    convert.extend_from_slice(&string("0x2A"));
    convert.extend_from_slice(NULL_TARGET);
    assert_eq!(eval_main(&ret(&convert)), Some(Value::Integer(42)));

    let mut convert = vec![0x99];
    convert.extend_from_slice(&string("123"));
    convert.extend_from_slice(NULL_TARGET);
    assert_eq!(eval_main(&ret(&convert)), Some(Value::Integer(123)));
}

#[test]
fn to_hex_string_formats() {
    let mut convert = vec![0x98]; // ToHexString
    convert.extend_from_slice(&int(0x1A3));
    convert.extend_from_slice(NULL_TARGET);
    assert_eq!(
        eval_main(&ret(&convert)),
        Some(Value::String("1A3".into()))
    );
}

#[test]
fn mid_slices_strings() {
    let mut mid = vec![0x9E];
    mid.extend_from_slice(&string("hello world"));
    mid.extend_from_slice(&int(6));
    mid.extend_from_slice(&int(5));
    mid.extend_from_slice(NULL_TARGET);
    assert_eq!(
        eval_main(&ret(&mid)),
        Some(Value::String("world".into()))
    );
}

#[test]
fn from_bcd_decodes() {
    let mut op = vec![0x5B, 0x28];
    op.extend_from_slice(&int(0x1234));
    op.extend_from_slice(NULL_TARGET);
    assert_eq!(eval_main(&ret(&op)), Some(Value::Integer(1234)));
}

#[test]
fn find_set_bits() {
    let mut left = vec![0x81];
    left.extend_from_slice(&int(0x40));
    left.extend_from_slice(NULL_TARGET);
    assert_eq!(eval_main(&ret(&left)), Some(Value::Integer(7)));

    let mut right = vec![0x82];
    right.extend_from_slice(&int(0x40));
    right.extend_from_slice(NULL_TARGET);
    assert_eq!(eval_main(&ret(&right)), Some(Value::Integer(7)));
}

#[test]
fn packages_index_and_measure() {
    let body = [
        store(&package(&[int(10), int(20), int(30)]), &local(0)),
        ret(&deref_of(&index(&local(0), &int(1), NULL_TARGET))),
    ]
    .concat();
    assert_eq!(eval_main(&body), Some(Value::Integer(20)));

    let body = [
        store(&package(&[int(1), int(2), int(3)]), &local(0)),
        ret(&size_of(&local(0))),
    ]
    .concat();
    assert_eq!(eval_main(&body), Some(Value::Integer(3)));
}

#[test]
fn store_into_package_element() {
    let body = [
        store(&package(&[int(1), int(2)]), &local(0)),
        store(&int(99), &index(&local(0), &int(0), NULL_TARGET)),
        ret(&local(0)),
    ]
    .concat();
    assert_eq!(
        eval_main(&body),
        Some(Value::Package(vec![Value::Integer(99), Value::Integer(2)]))
    );
}

#[test]
fn buffers_index_bytewise() {
    let body = [
        store(&buffer(&[0x10, 0x20, 0x30]), &local(0)),
        store(&int(0xAA), &index(&local(0), &int(1), NULL_TARGET)),
        ret(&local(0)),
    ]
    .concat();
    assert_eq!(
        eval_main(&body),
        Some(Value::Buffer(vec![0x10, 0xAA, 0x30]))
    );

    let body = [
        store(&buffer(&[0x10, 0x20, 0x30]), &local(0)),
        ret(&deref_of(&index(&local(0), &int(2), NULL_TARGET))),
    ]
    .concat();
    assert_eq!(eval_main(&body), Some(Value::Integer(0x30)));
}

#[test]
fn index_out_of_bounds_aborts() {
    let body = [
        store(&buffer(&[1]), &local(0)),
        ret(&index(&local(0), &int(5), NULL_TARGET)),
    ]
    .concat();
    let mut vm = load(&method("MAIN", 0, &body));

    assert_eq!(vm.eval("\\MAIN", &[]), Err(AmlError::IndexOutOfBounds));
}

#[test]
fn buffer_declared_larger_than_initializer_zero_fills() {
    let mut body = vec![0x11]; // BufferOp
    let mut inner = int(4);
    inner.extend_from_slice(&[0xAB]);
    body.extend_from_slice(&pkg(&inner));

    assert_eq!(
        eval_main(&ret(&body)),
        Some(Value::Buffer(vec![0xAB, 0, 0, 0]))
    );
}

#[test]
fn ref_of_then_deref_of_round_trips() {
    let body = [
        store(&int(7), &local(0)),
        store(&ref_of(&local(0)), &local(1)),
        ret(&deref_of(&local(1))),
    ]
    .concat();
    assert_eq!(eval_main(&body), Some(Value::Integer(7)));
}

#[test]
fn stores_through_stored_references_reach_the_target() {
    // Local1 = RefOf(Local0); Store(42, Local1) writes Local0 through the
    // reference.
    let body = [
        store(&int(0), &local(0)),
        store(&ref_of(&local(0)), &local(1)),
        store(&int(42), &local(1)),
        ret(&local(0)),
    ]
    .concat();
    assert_eq!(eval_main(&body), Some(Value::Integer(42)));
}

#[test]
fn cond_ref_of_reports_presence() {
    let aml = [
        name_decl("EXST", &int(1)),
        method("MAIN", 0, &{
            let mut cond = vec![0x5B, 0x12];
            cond.extend_from_slice(&name("EXST"));
            cond.extend_from_slice(NULL_TARGET);
            let mut cond_missing = vec![0x5B, 0x12];
            cond_missing.extend_from_slice(&name("GONE"));
            cond_missing.extend_from_slice(NULL_TARGET);

            [
                store(&cond, &local(0)),
                store(&cond_missing, &local(1)),
                ret(&package(&[local(0), local(1)])),
            ]
            .concat()
        }),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(
        vm.eval("\\MAIN", &[]).unwrap(),
        Some(Value::Package(vec![
            Value::Integer(u64::MAX),
            Value::Integer(0)
        ]))
    );
}

#[test]
fn object_type_reports_acpi_codes() {
    let aml = [
        name_decl("INTG", &int(1)),
        name_decl("STRG", &string("x")),
        method("MAIN", 0, &{
            let mut ty_int = vec![0x8E];
            ty_int.extend_from_slice(&name("INTG"));
            let mut ty_str = vec![0x8E];
            ty_str.extend_from_slice(&name("STRG"));
            ret(&package(&[ty_int, ty_str]))
        }),
    ]
    .concat();
    let mut vm = load(&aml);

    assert_eq!(
        vm.eval("\\MAIN", &[]).unwrap(),
        Some(Value::Package(vec![Value::Integer(1), Value::Integer(2)]))
    );
}

#[test]
fn match_finds_the_first_element() {
    // Match(Package{10, 20, 30}, MEQ, 20, MTR, 0, 0) == 1
    let mut op = vec![0x89];
    op.extend_from_slice(&package(&[int(10), int(20), int(30)]));
    op.push(1); // MEQ
    op.extend_from_slice(&int(20));
    op.push(0); // MTR
    op.extend_from_slice(&int(0));
    op.extend_from_slice(&int(0));
    assert_eq!(eval_main(&ret(&op)), Some(Value::Integer(1)));
}

#[test]
fn buffer_fields_view_their_buffer() {
    let body = [
        store(&buffer(&[0x11, 0x22, 0x33]), &local(0)),
        create_byte_field(&local(0), &int(1), "BF01"),
        store(&int(0xEE), &name("BF01")),
        ret(&local(0)),
    ]
    .concat();
    assert_eq!(
        eval_main(&body),
        Some(Value::Buffer(vec![0x11, 0xEE, 0x33]))
    );
}
