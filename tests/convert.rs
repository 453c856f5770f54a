//! End-to-end conversions through the expression interpreter: schema text
//! to driver expression to bytes and back, across codec pairs.

use dessser::codec::rowbinary::{RowBinaryDes, RowBinarySer};
use dessser::codec::sexpr::{SExprDes, SExprSer};
use dessser::codec::{Des, Ser};
use dessser::desser::{converter, desser};
use dessser::expr::eval::{self, DataPtr, Env, HeapVal, RtVal, ValuePtr};
use dessser::expr::typing;
use dessser::heap::{materialize, serialize, HeapDes, HeapSer};
use dessser::schema::parser::parse;
use dessser::{Expr, GenCtx, Mac, Type};

/// Decode `input` with `des` into a fresh heap value.
fn read_value(des: &mut dyn Des, schema: &str, input: &[u8]) -> HeapVal {
    let mn = parse(0, schema).unwrap();
    let mut ctx = GenCtx::new();
    let expr = desser(
        des,
        &mut HeapSer,
        &mn,
        Expr::ident("src"),
        Expr::ident("heap"),
        &mut ctx,
    )
    .unwrap();
    let heap = ValuePtr::alloc(&mn).unwrap();
    let mut env = Env::new();
    env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(input.to_vec())));
    env.bind("heap", RtVal::ValuePtr(heap.clone()));
    eval::eval(&mut env, &expr).unwrap_or_else(|err| panic!("read failed: {}", err));
    heap.value()
}

/// Encode a heap value with `ser`.
fn write_value(ser: &mut dyn Ser, schema: &str, value: HeapVal) -> Vec<u8> {
    let mn = parse(0, schema).unwrap();
    let mut ctx = GenCtx::new();
    let expr = desser(
        &mut HeapDes,
        ser,
        &mn,
        Expr::ident("src"),
        Expr::ident("dst"),
        &mut ctx,
    )
    .unwrap();
    let mut env = Env::new();
    env.bind("src", RtVal::ValuePtr(ValuePtr::of_value(&mn, value)));
    env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
    let result = eval::eval(&mut env, &expr).unwrap_or_else(|err| panic!("write failed: {}", err));
    let (_, dst) = result.into_pair().unwrap();
    dst.into_data_ptr().unwrap().bytes()
}

/// Convert bytes directly between two wire formats.
fn transcode(des: &mut dyn Des, ser: &mut dyn Ser, schema: &str, input: &[u8]) -> Vec<u8> {
    let mn = parse(0, schema).unwrap();
    let mut ctx = GenCtx::new();
    let expr = desser(des, ser, &mn, Expr::ident("src"), Expr::ident("dst"), &mut ctx).unwrap();
    let mut env = Env::new();
    env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(input.to_vec())));
    env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
    let result =
        eval::eval(&mut env, &expr).unwrap_or_else(|err| panic!("transcode failed: {}", err));
    let (_, dst) = result.into_pair().unwrap();
    dst.into_data_ptr().unwrap().bytes()
}

#[test]
fn converter_expressions_are_well_typed() {
    for schema in [
        "u8",
        "string?",
        "{a: u8; b: string?}",
        "char[2]",
        "u16[]",
        "{xs: (u8; bool)[]; s: string?; big: i128}",
    ] {
        let mn = parse(0, schema).unwrap();
        let mut ctx = GenCtx::new();
        let expr = converter(
            &mut SExprDes::default(),
            &mut RowBinarySer,
            &mn,
            &mut ctx,
        )
        .unwrap();
        let r#type = typing::type_of(&expr)
            .unwrap_or_else(|err| panic!("converter for {} is ill-typed: {}", schema, err));
        assert_eq!(
            r#type,
            Type::function(
                vec![Type::DataPtr, Type::DataPtr],
                Type::pair(Type::DataPtr, Type::DataPtr)
            ),
            "converter type for {}",
            schema
        );
    }
}

#[test]
fn sexpr_to_rowbinary_and_back() {
    let schema = "{a: u8; b: string?; c: u16[]}";
    let input = b"(42 null 2 (7 9))";
    let binary = transcode(
        &mut SExprDes::default(),
        &mut RowBinarySer,
        schema,
        input,
    );
    assert_eq!(binary, vec![42, 1, 2, 7, 0, 9, 0]);
    let text = transcode(&mut RowBinaryDes, &mut SExprSer::default(), schema, &binary);
    assert_eq!(text, input.to_vec());
}

#[test]
fn nested_value_survives_both_formats() {
    let schema = "{xs: (u8; bool)[]; s: string?; v: char[2]; big: i128}";
    let value = HeapVal::Rec(vec![
        (
            "xs".to_owned(),
            HeapVal::List(vec![
                HeapVal::Tup(vec![HeapVal::Int(Mac::U8, 1), HeapVal::Bool(true)]),
                HeapVal::Tup(vec![HeapVal::Int(Mac::U8, 2), HeapVal::Bool(false)]),
            ]),
        ),
        ("s".to_owned(), HeapVal::Null),
        (
            "v".to_owned(),
            HeapVal::Vec(vec![HeapVal::Char('a'), HeapVal::Char('b')]),
        ),
        (
            "big".to_owned(),
            HeapVal::Int(Mac::I128, (1u128 << 126).wrapping_neg() & u128::MAX),
        ),
    ]);

    // Heap -> S-expr -> RowBinary -> heap.
    let text = write_value(&mut SExprSer::default(), schema, value.clone());
    let binary = transcode(
        &mut SExprDes::default(),
        &mut RowBinarySer,
        schema,
        &text,
    );
    let back = read_value(&mut RowBinaryDes, schema, &binary);
    assert_eq!(back, value);
}

#[test]
fn deeply_nested_schema_text_round_trips() {
    let source = "(u8; bool[string])[]?[string?[u8?]]";
    let parsed = parse(0, source).unwrap();
    let printed = parsed.to_string();
    assert_eq!(parse(0, &printed).unwrap(), parsed);
}

#[test]
fn i128_power_of_two_survives_the_decimal_path() {
    // 2^126 as a decimal literal goes through the limb splitter on the way
    // in and comes back identical.
    let huge = (1u128 << 126).to_string();
    let schema = "i128";
    let input = huge.as_bytes();
    let binary = transcode(
        &mut SExprDes::default(),
        &mut RowBinarySer,
        schema,
        input,
    );
    let text = transcode(&mut RowBinaryDes, &mut SExprSer::default(), schema, &binary);
    assert_eq!(text, input.to_vec());
}

#[test]
fn materialize_and_serialize_are_dual() {
    let schema = "{a: u8; b: string?}";
    let mn = parse(0, schema).unwrap();
    let mut ctx = GenCtx::new();

    let reader = materialize(&mut SExprDes::default(), &mn, &mut ctx).unwrap();
    assert_eq!(
        typing::type_of(&reader).unwrap(),
        Type::function(
            vec![Type::DataPtr],
            Type::pair(Type::ValuePtr(mn.clone()), Type::DataPtr)
        )
    );

    let writer = serialize(&mut SExprSer::default(), &mn, &mut ctx).unwrap();
    assert_eq!(
        typing::type_of(&writer).unwrap(),
        Type::function(
            vec![Type::ValuePtr(mn.clone()), Type::DataPtr],
            Type::pair(Type::ValuePtr(mn.clone()), Type::DataPtr)
        )
    );

    // Chain them over an actual record.
    let value = read_value(&mut SExprDes::default(), schema, b"(9 \"ok\")");
    assert_eq!(
        value,
        HeapVal::Rec(vec![
            ("a".to_owned(), HeapVal::Int(Mac::U8, 9)),
            ("b".to_owned(), HeapVal::Str("ok".to_owned())),
        ])
    );
    let bytes = write_value(&mut SExprSer::default(), schema, value);
    assert_eq!(bytes, b"(9 \"ok\")");
}

#[test]
fn odd_widths_cross_formats_exactly() {
    let schema = "(u24; i40; u56)";
    let input = b"(16777215 -549755813888 1)";
    let binary = transcode(
        &mut SExprDes::default(),
        &mut RowBinarySer,
        schema,
        input,
    );
    assert_eq!(binary.len(), 3 + 5 + 7);
    let text = transcode(&mut RowBinaryDes, &mut SExprSer::default(), schema, &binary);
    assert_eq!(text, input.to_vec());
}
