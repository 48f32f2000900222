use lodestar_ir::sequence::{CallSequence, Invocation};
use lodestar_ir::types::{ArgValue, CallValue, Domain, InvariantSpec};
use lodestar_model::adapter::{AdapterFault, CallStatus, SutAdapter};
use lodestar_model::executor::{run, ExecutionOptions};
use lodestar_sandbox::config::SandboxConfig;
use lodestar_sandbox::wasm_sut::WasmSut;

/// `doStuff(data)` sets `flag` when the previous argument was 5678.
const FLAG_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global $flag (export "flag") (mut i32) (i32.const 0))
  (global $h (export "h") (mut i32) (i32.const 0))

  (func (export "doStuff") (param $data i32)
    (if (i32.eq (global.get $h) (i32.const 5678))
      (then (global.set $flag (i32.const 1))))
    (global.set $h (local.get $data)))

  ;; Reverts for amounts above 100.
  (func (export "withdraw") (param $amount i32)
    (if (i32.gt_s (local.get $amount) (i32.const 100))
      (then unreachable))
    (i32.store (i32.const 0)
      (i32.add (i32.load (i32.const 0)) (local.get $amount))))

  (func (export "spin")
    (loop $forever (br $forever)))

  (func (export "invariant_flag_is_zero") (result i32)
    (i32.eqz (global.get $flag)))

  (func (export "invariant_total_small") (result i32)
    (i32.lt_s (i32.load (i32.const 0)) (i32.const 150)))
)
"#;

fn load() -> WasmSut {
    let config = SandboxConfig {
        fuel_per_call: Some(100_000),
        ..Default::default()
    };
    WasmSut::load(FLAG_WAT.as_bytes(), &config).unwrap()
}

fn invocation(op: &str, args: Vec<i64>) -> Invocation {
    Invocation {
        operation: op.to_string(),
        args: CallValue::new(args.into_iter().map(ArgValue::Int).collect()),
        ordinal: 0,
    }
}

fn sequence(calls: &[(&str, i64)]) -> CallSequence {
    CallSequence::from_calls(
        calls
            .iter()
            .map(|(op, v)| (op.to_string(), CallValue::new(vec![ArgValue::Int(*v)]))),
    )
}

#[test]
fn test_exports_become_operations_and_invariants() {
    let sut = load();
    let names: Vec<&str> = sut.operations().iter().map(|op| op.name.as_str()).collect();
    assert_eq!(names, vec!["doStuff", "withdraw", "spin"]);

    let do_stuff = sut.operation("doStuff").unwrap();
    assert_eq!(do_stuff.params.len(), 1);
    assert_eq!(
        do_stuff.params[0].domain,
        Domain::int(i32::MIN as i64, i32::MAX as i64)
    );

    assert!(sut.has_invariant("flag_is_zero"));
    assert!(sut.has_invariant("total_small"));
    assert!(!sut.has_invariant("doStuff"));
    assert_eq!(
        sut.invariant_specs(),
        vec![
            InvariantSpec::new("flag_is_zero"),
            InvariantSpec::new("total_small")
        ]
    );
}

#[test]
fn test_dictionary_contains_magic_constant() {
    let sut = load();
    let dictionary = sut.dictionary();
    assert!(dictionary.contains(&5678));
    assert!(dictionary.contains(&100));
}

#[test]
fn test_two_call_violation() {
    let sut = load();
    let invariants = vec![InvariantSpec::new("flag_is_zero")];
    let seq = sequence(&[("doStuff", 5678), ("doStuff", 3)]);
    let result = run(&seq, &sut, &invariants, ExecutionOptions::default());
    assert_eq!(result.violation_of("flag_is_zero"), Some(2));
    assert_eq!(result.final_state["globals"]["flag"], 1);
    assert_eq!(result.final_state["globals"]["h"], 3);
}

#[test]
fn test_wasm_execution_is_deterministic() {
    let sut = load();
    let invariants = sut.invariant_specs();
    let seq = sequence(&[
        ("withdraw", 60),
        ("doStuff", 5678),
        ("withdraw", 500),
        ("withdraw", 90),
        ("doStuff", 1),
    ]);
    let first = run(&seq, &sut, &invariants, ExecutionOptions::default());
    let second = run(&seq, &sut, &invariants, ExecutionOptions::default());
    assert_eq!(first, second);
    assert_eq!(first.violation_of("total_small"), Some(4));
    assert_eq!(first.violation_of("flag_is_zero"), Some(5));
}

#[test]
fn test_trap_is_rejection_and_reverts() {
    let sut = load();
    let s0 = sut.new_instance().unwrap();
    let s1 = sut.apply(&s0, &invocation("withdraw", vec![40])).unwrap();
    assert_eq!(s1.status, CallStatus::Ok);

    let s2 = sut.apply(&s1.snapshot, &invocation("withdraw", vec![101])).unwrap();
    assert!(matches!(s2.status, CallStatus::Rejected { .. }));
    assert_eq!(s2.snapshot, s1.snapshot);
}

#[test]
fn test_apply_does_not_disturb_input_snapshot() {
    let sut = load();
    let s0 = sut.new_instance().unwrap();
    let a = sut.apply(&s0, &invocation("withdraw", vec![7])).unwrap();
    let b = sut.apply(&s0, &invocation("withdraw", vec![7])).unwrap();
    assert_eq!(a.snapshot, b.snapshot);
    assert_ne!(a.snapshot, s0);
    assert_eq!(sut.fingerprint(&s0), sut.fingerprint(&sut.new_instance().unwrap()));
}

#[test]
fn test_fuel_exhaustion_is_timeout_fault() {
    let sut = load();
    let s0 = sut.new_instance().unwrap();
    let err = sut.apply(&s0, &invocation("spin", vec![])).unwrap_err();
    assert_eq!(
        err,
        AdapterFault::Timeout {
            operation: "spin".to_string()
        }
    );

    // The adapter stays usable after a timeout.
    let t = sut.apply(&s0, &invocation("doStuff", vec![1])).unwrap();
    assert_eq!(t.status, CallStatus::Ok);
}

#[test]
fn test_unknown_names_are_faults() {
    let sut = load();
    let s0 = sut.new_instance().unwrap();
    assert!(matches!(
        sut.apply(&s0, &invocation("missing", vec![])),
        Err(AdapterFault::UnknownOperation { .. })
    ));
    assert!(matches!(
        sut.observe(&s0, &InvariantSpec::new("missing")),
        Err(AdapterFault::UnknownInvariant { .. })
    ));
}

#[test]
fn test_out_of_range_argument_is_fault() {
    let sut = load();
    let s0 = sut.new_instance().unwrap();
    let err = sut
        .apply(&s0, &invocation("doStuff", vec![i64::MAX]))
        .unwrap_err();
    assert!(matches!(err, AdapterFault::Corrupted { .. }));
}

#[test]
fn test_load_rejects_invalid_module() {
    assert!(WasmSut::load(b"(module (func (export \"f\") (result i32)))", &SandboxConfig::default()).is_err());
    assert!(WasmSut::load(b"not wasm at all", &SandboxConfig::default()).is_err());
}
