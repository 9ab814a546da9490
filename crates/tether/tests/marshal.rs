/// Conversions between host objects and interpreter values at the run boundary.
use num_bigint::BigInt;
use tether::{ConversionError, DictPairs, ErrorKind, ExcType, TetherObject, TetherRun};

fn echo(value: TetherObject) -> TetherObject {
    let program = TetherRun::new("x".to_owned(), "echo.py", vec!["x".to_owned()], vec![]).unwrap();
    program.run_no_limits(vec![value]).unwrap()
}

fn eval(code: &str) -> TetherObject {
    TetherRun::new(code.to_owned(), "eval.py", vec![], vec![])
        .unwrap()
        .run_no_limits(vec![])
        .unwrap()
}

#[test]
fn supported_values_round_trip() {
    let values = vec![
        TetherObject::None,
        TetherObject::Bool(false),
        TetherObject::Int(-7),
        TetherObject::Int(i64::MAX),
        TetherObject::BigInt(BigInt::from(i64::MAX) * 1000),
        TetherObject::Float(0.1),
        TetherObject::Float(-0.0),
        TetherObject::Float(f64::INFINITY),
        TetherObject::from("héllo \u{1F600}\n"),
        TetherObject::from(""),
        TetherObject::List(vec![TetherObject::Int(1), TetherObject::List(vec![]), TetherObject::from("a")]),
        TetherObject::dict(vec![
            (TetherObject::from("b"), TetherObject::Int(2)),
            (TetherObject::Int(1), TetherObject::None),
            (TetherObject::Float(2.5), TetherObject::Float(1.5)),
        ]),
    ];
    for value in values {
        assert_eq!(echo(value.clone()), value);
    }
}

#[test]
fn nan_round_trips_bit_for_bit() {
    let TetherObject::Float(f) = echo(TetherObject::Float(f64::NAN)) else {
        panic!("expected a float");
    };
    assert_eq!(f.to_bits(), f64::NAN.to_bits());
}

#[test]
fn big_int_that_fits_comes_back_small() {
    assert_eq!(echo(TetherObject::BigInt(BigInt::from(5))), TetherObject::Int(5));
    assert_eq!(eval("2 ** 64 // 2 ** 60"), TetherObject::Int(16));
    assert_eq!(eval("2 ** 70").py_repr(), "1180591620717411303424");
}

#[test]
fn tuples_come_out_as_read_only_sequences() {
    let value = eval("(1, 'a', (2,))");
    let TetherObject::Tuple(items) = &value else {
        panic!("expected a tuple, got {value:?}");
    };
    assert_eq!(items.len(), 3);
    assert_eq!(items[1], TetherObject::from("a"));
    assert_eq!(value.py_repr(), "(1, 'a', (2,))");
    // accepted going in as a convenience
    assert_eq!(echo(value.clone()), value);
}

#[test]
fn dict_keys_may_be_any_hashable_value() {
    let value = eval("{(1, 2): 'pair', None: 0, 2.5: 'f'}");
    let TetherObject::Dict(pairs) = value else {
        panic!("expected a dict");
    };
    let key = TetherObject::tuple(vec![TetherObject::Int(1), TetherObject::Int(2)]);
    assert_eq!(pairs.get(&key), Some(&TetherObject::from("pair")));
    assert_eq!(pairs.get(&TetherObject::None), Some(&TetherObject::Int(0)));
}

#[test]
fn unhashable_dict_keys_are_rejected() {
    let pairs = DictPairs::from(vec![(TetherObject::List(vec![]), TetherObject::Int(1))]);
    let program = TetherRun::new("x".to_owned(), "echo.py", vec!["x".to_owned()], vec![]).unwrap();
    let err = program.run_no_limits(vec![TetherObject::Dict(pairs)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedValue);
    assert_eq!(err.to_string(), "unsupported value: unhashable dict key of type list");
}

#[test]
fn values_without_data_come_out_as_repr() {
    assert_eq!(eval("range(3)"), TetherObject::Repr("range(0, 3)".to_owned()));
    let TetherObject::Repr(text) = eval("def f():\n    pass\nf") else {
        panic!("expected a repr");
    };
    assert!(text.starts_with("<function f"), "{text}");
}

#[test]
fn exceptions_can_be_returned() {
    let value = eval("ValueError('bad')");
    assert_eq!(
        value,
        TetherObject::Exception {
            exc_type: ExcType::ValueError,
            arg: Some("bad".to_owned()),
        }
    );
    assert_eq!(value.py_repr(), "ValueError('bad')");
}

#[test]
fn output_only_values_cannot_be_passed_in() {
    let program = TetherRun::new("x".to_owned(), "echo.py", vec!["x".to_owned()], vec![]).unwrap();
    for value in [
        TetherObject::Repr("<function f>".to_owned()),
        TetherObject::Exception {
            exc_type: ExcType::KeyError,
            arg: None,
        },
    ] {
        let err = program.run_no_limits(vec![value]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedValue);
    }
}

#[test]
fn self_referential_containers_cannot_be_returned() {
    let program = TetherRun::new("a = []\na.append(a)\na".to_owned(), "cycle.py", vec![], vec![]).unwrap();
    let err = program.run_no_limits(vec![]).unwrap_err();
    assert_eq!(err.to_string(), "unsupported value: cannot marshal a self-referential list");
}

#[test]
fn deeply_nested_results_are_rejected() {
    let code = "x = []\nfor _ in range(300000):\n    x = [x]\nx";
    let program = TetherRun::new(code.to_owned(), "nest.py", vec![], vec![]).unwrap();
    let err = program.run_no_limits(vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedValue);
    assert_eq!(err.to_string(), "unsupported value: value is nested deeper than 200 levels");

    let mut shallow = TetherObject::List(vec![]);
    for _ in 0..100 {
        shallow = TetherObject::List(vec![shallow]);
    }
    assert_eq!(echo(shallow.clone()), shallow);
}

#[test]
fn deeply_nested_inputs_are_rejected() {
    let mut value = TetherObject::Int(0);
    for _ in 0..1000 {
        value = TetherObject::List(vec![value]);
    }
    let program = TetherRun::new("x".to_owned(), "echo.py", vec!["x".to_owned()], vec![]).unwrap();
    let err = program.run_no_limits(vec![value]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedValue);
    assert_eq!(err.to_string(), "unsupported value: value is nested deeper than 200 levels");
}

#[test]
fn keys_the_interpreter_would_merge_are_rejected() {
    let pairs = DictPairs::from(vec![
        (TetherObject::Int(1), TetherObject::from("a")),
        (TetherObject::Float(1.0), TetherObject::from("b")),
    ]);
    let program = TetherRun::new("x".to_owned(), "echo.py", vec!["x".to_owned()], vec![]).unwrap();
    let err = program.run_no_limits(vec![TetherObject::Dict(pairs)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedValue);
    assert_eq!(err.to_string(), "unsupported value: duplicate dict key 1.0");

    let distinct = TetherObject::dict(vec![
        (TetherObject::Int(1), TetherObject::from("a")),
        (TetherObject::Float(1.5), TetherObject::from("b")),
    ]);
    assert_eq!(echo(distinct.clone()), distinct);
}

#[test]
fn symbols_become_strings() {
    #[derive(Debug)]
    enum Colour {
        Red,
    }
    impl std::fmt::Display for Colour {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Red => f.write_str("red"),
            }
        }
    }
    assert_eq!(echo(TetherObject::symbol(Colour::Red)), TetherObject::from("red"));
}

#[test]
fn try_from_conversions() {
    assert_eq!(i64::try_from(&eval("6 * 7")), Ok(42));
    assert_eq!(f64::try_from(&eval("1 / 4")), Ok(0.25));
    assert_eq!(f64::try_from(&eval("3")), Ok(3.0));
    assert_eq!(String::try_from(&eval("'a' + 'b'")), Ok("ab".to_owned()));
    assert_eq!(bool::try_from(&eval("1 < 2")), Ok(true));

    assert_eq!(i64::try_from(&eval("'42'")), Err(ConversionError::new("int", "str")));
    assert_eq!(bool::try_from(&eval("1")), Err(ConversionError::new("bool", "int")));
    assert_eq!(
        String::try_from(&eval("None")).unwrap_err().to_string(),
        "expected str, got NoneType"
    );
}

#[test]
fn display_is_python_str() {
    assert_eq!(eval("'x'").to_string(), "x");
    assert_eq!(eval("['x', 1.0]").to_string(), "['x', 1.0]");
    assert_eq!(eval("None").to_string(), "None");
}
