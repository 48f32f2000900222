use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::{ArgValue, CallValue, Domain, DomainError, OperationSpec, Param};

fn transfer() -> OperationSpec {
    OperationSpec::mutating(
        "transfer",
        vec![
            Param::new("to", Domain::Address),
            Param::new("amount", Domain::int(0, 1_000)),
        ],
    )
}

#[test]
fn test_validate_accepts_in_domain_values() {
    let args = CallValue::new(vec![ArgValue::Address(3), ArgValue::Int(500)]);
    assert!(transfer().validate(&args).is_ok());
}

#[test]
fn test_validate_rejects_wrong_arity() {
    let args = CallValue::new(vec![ArgValue::Address(3)]);
    assert_eq!(
        transfer().validate(&args),
        Err(DomainError::Arity {
            operation: "transfer".to_string(),
            expected: 2,
            actual: 1,
        })
    );
}

#[test]
fn test_validate_rejects_out_of_range() {
    let args = CallValue::new(vec![ArgValue::Address(3), ArgValue::Int(1_001)]);
    let err = transfer().validate(&args).unwrap_err();
    assert!(matches!(err, DomainError::OutOfDomain { ref param, .. } if param == "amount"));
}

#[test]
fn test_validate_rejects_type_mismatch() {
    let args = CallValue::new(vec![ArgValue::Bool(true), ArgValue::Int(1)]);
    assert!(transfer().validate(&args).is_err());
}

#[test]
fn test_sequence_validate_unknown_operation() {
    let mut seq = CallSequence::new();
    seq.push("mint", CallValue::default());
    let err = seq.validate(&[transfer()]).unwrap_err();
    assert_eq!(
        err,
        DomainError::UnknownOperation {
            operation: "mint".to_string()
        }
    );
}

#[test]
fn test_enum_domain() {
    let domain = Domain::Enum {
        values: vec!["low".into(), "high".into()],
    };
    assert!(domain.contains(&ArgValue::Enum("high".into())));
    assert!(!domain.contains(&ArgValue::Enum("mid".into())));
    assert_eq!(domain.simplest(), Some(ArgValue::Enum("low".into())));
    assert_eq!(domain.complexity(&ArgValue::Enum("high".into())), 1);
}

#[test]
fn test_empty_enum_has_no_simplest() {
    let domain = Domain::Enum { values: vec![] };
    assert_eq!(domain.simplest(), None);
}

#[test]
fn test_bytes_display() {
    assert_eq!(ArgValue::Bytes(vec![0xde, 0xad]).to_string(), "0xdead");
    assert_eq!(ArgValue::Address(7).to_string(), "@7");
}
