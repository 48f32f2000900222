use std::time::Duration;

use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::{
    ArgValue, CallValue, CheckpointPolicy, Domain, InvariantSpec, OperationSpec, Param,
};
use lodestar_model::adapter::{AdapterFault, CallStatus};
use lodestar_model::counterexample::{replay, Counterexample, ReplayError};
use lodestar_model::executor::{run, Execution, ExecutionOptions};
use lodestar_model::invariant::InvariantOutcome;
use lodestar_model::model_sut::{ModelSut, OpError};
use serde::Serialize;

#[derive(Debug, Clone, Default, Hash, Serialize)]
struct Flag {
    flag: i64,
    h: i64,
}

/// `doStuff(data)`: sets `flag` if the previous argument was 5678.
fn flag_sut() -> ModelSut<Flag> {
    ModelSut::builder(Flag::default())
        .operation(
            OperationSpec::mutating("doStuff", vec![Param::new("data", Domain::unbounded_int())]),
            |s: &mut Flag, args: &CallValue| {
                let data = args.int(0).ok_or_else(|| OpError::reject("missing data"))?;
                if s.h == 5678 {
                    s.flag = 1;
                }
                s.h = data;
                Ok(())
            },
        )
        .operation(
            OperationSpec::mutating("guarded", vec![Param::new("x", Domain::int(0, 100))]),
            |_s: &mut Flag, args: &CallValue| {
                if args.int(0) == Some(0) {
                    Err(OpError::reject("zero"))
                } else {
                    Ok(())
                }
            },
        )
        .operation(OperationSpec::mutating("explode", vec![]), |_s: &mut Flag, _| {
            Err(OpError::corrupt("boom"))
        })
        .operation(OperationSpec::mutating("slow", vec![]), |_s: &mut Flag, _| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(())
        })
        .invariant("flag_is_zero", |s: &Flag| s.flag == 0)
        .invariant("h_small", |s: &Flag| s.h < 10_000)
        .state_coverage()
        .build()
}

fn call(op: &str, args: Vec<ArgValue>) -> (String, CallValue) {
    (op.to_string(), CallValue::new(args))
}

fn do_stuff(v: i64) -> (String, CallValue) {
    call("doStuff", vec![ArgValue::Int(v)])
}

fn flag_invariant() -> Vec<InvariantSpec> {
    vec![InvariantSpec::new("flag_is_zero")]
}

#[test]
fn test_violation_appears_after_second_call() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![do_stuff(5678), do_stuff(1)]);
    let result = run(&seq, &sut, &flag_invariant(), ExecutionOptions::default());

    assert_eq!(result.violation_of("flag_is_zero"), Some(2));
    assert_eq!(result.steps.len(), 2);
    assert!(result.fault.is_none());
    assert_eq!(result.final_state["flag"], 1);
}

#[test]
fn test_single_magic_call_does_not_violate() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![do_stuff(1), do_stuff(5678)]);
    let result = run(&seq, &sut, &flag_invariant(), ExecutionOptions::default());
    assert_eq!(result.invariants["flag_is_zero"], InvariantOutcome::Held);
    assert!(result.first_violation().is_none());
}

#[test]
fn test_execution_is_deterministic() {
    let sut = flag_sut();
    let invariants = vec![
        InvariantSpec::new("flag_is_zero"),
        InvariantSpec::new("h_small"),
    ];
    let seq = CallSequence::from_calls(vec![
        do_stuff(5678),
        call("guarded", vec![ArgValue::Int(0)]),
        do_stuff(20_000),
        do_stuff(3),
    ]);
    let first = run(&seq, &sut, &invariants, ExecutionOptions::default());
    let second = run(&seq, &sut, &invariants, ExecutionOptions::default());
    assert_eq!(first, second);
}

#[test]
fn test_each_invariant_keeps_its_first_violation() {
    let sut = flag_sut();
    let invariants = vec![
        InvariantSpec::new("flag_is_zero"),
        InvariantSpec::new("h_small"),
    ];
    let seq = CallSequence::from_calls(vec![
        do_stuff(20_000),
        do_stuff(5678),
        do_stuff(1),
        do_stuff(50_000),
    ]);
    let result = run(&seq, &sut, &invariants, ExecutionOptions::default());
    // h_small fails at 1, recovers at 3, fails again at 4: only 1 is kept.
    assert_eq!(result.violation_of("h_small"), Some(1));
    assert_eq!(result.violation_of("flag_is_zero"), Some(3));
    assert_eq!(
        result.violations(),
        vec![("h_small", 1), ("flag_is_zero", 3)]
    );
    assert_eq!(result.first_violation(), Some(("h_small", 1)));
}

#[test]
fn test_end_of_sequence_misses_transient_violation() {
    let sut = flag_sut();
    let invariants = vec![InvariantSpec::new("h_small")];
    let seq = CallSequence::from_calls(vec![do_stuff(20_000), do_stuff(1)]);

    let per_call = run(&seq, &sut, &invariants, ExecutionOptions::default());
    assert_eq!(per_call.violation_of("h_small"), Some(1));

    let options = ExecutionOptions {
        policy: CheckpointPolicy::EndOfSequence,
        call_timeout: None,
    };
    let end_only = run(&seq, &sut, &invariants, options);
    assert_eq!(end_only.violation_of("h_small"), None);

    let seq = CallSequence::from_calls(vec![do_stuff(1), do_stuff(20_000)]);
    let end_only = run(&seq, &sut, &invariants, options);
    assert_eq!(end_only.violation_of("h_small"), Some(2));
}

#[test]
fn test_rejection_is_recorded_and_execution_continues() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![
        call("guarded", vec![ArgValue::Int(0)]),
        call("guarded", vec![ArgValue::Int(5)]),
    ]);
    let result = run(&seq, &sut, &flag_invariant(), ExecutionOptions::default());
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].status, CallStatus::rejected("zero"));
    assert_eq!(result.steps[1].status, CallStatus::Ok);
    assert_eq!(result.rejected_calls(), 1);
    assert!(!result.is_fault());
}

#[test]
fn test_fault_aborts_with_partial_result() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![
        do_stuff(1),
        call("explode", vec![]),
        do_stuff(2),
    ]);
    let result = run(&seq, &sut, &flag_invariant(), ExecutionOptions::default());
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.sequence.len(), 2);
    assert_eq!(
        result.fault,
        Some(AdapterFault::Corrupted {
            detail: "boom".to_string()
        })
    );
    assert_eq!(result.final_state["h"], 1);
}

#[test]
fn test_call_timeout_is_a_fault() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![call("slow", vec![]), do_stuff(1)]);
    let options = ExecutionOptions {
        policy: CheckpointPolicy::PerCall,
        call_timeout: Some(Duration::from_millis(1)),
    };
    let result = run(&seq, &sut, &flag_invariant(), options);
    assert_eq!(
        result.fault,
        Some(AdapterFault::Timeout {
            operation: "slow".to_string()
        })
    );
    assert!(result.steps.is_empty());
}

#[test]
fn test_unknown_invariant_is_a_fault() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![do_stuff(1)]);
    let invariants = vec![InvariantSpec::new("nonexistent")];
    let result = run(&seq, &sut, &invariants, ExecutionOptions::default());
    assert!(matches!(
        result.fault,
        Some(AdapterFault::UnknownInvariant { .. })
    ));
}

#[test]
fn test_incremental_session_matches_run() {
    let sut = flag_sut();
    let invariants = flag_invariant();
    let seq = CallSequence::from_calls(vec![do_stuff(5678), do_stuff(9), do_stuff(4)]);

    let mut session = Execution::start(&sut, &invariants, ExecutionOptions::default());
    for c in &seq {
        assert!(session.step(c.clone()));
    }
    assert!(session.has_violation());
    let incremental = session.finish();

    assert_eq!(incremental, run(&seq, &sut, &invariants, ExecutionOptions::default()));
}

#[test]
fn test_replay_confirms_counterexample() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![do_stuff(5678), do_stuff(0)]);
    let cx = Counterexample {
        invariant: "flag_is_zero".to_string(),
        sequence: seq.clone(),
        checkpoint: 2,
        final_state: serde_json::json!({ "flag": 1, "h": 0 }),
        original_length: 7,
        shrink_attempts: 12,
    };
    let replayed = cx.replay(&sut, ExecutionOptions::default()).unwrap();
    assert_eq!(replayed.final_state, cx.final_state);

    let err = replay(&seq, "flag_is_zero", 1, &sut, ExecutionOptions::default()).unwrap_err();
    assert_eq!(
        err,
        ReplayError::Mismatch {
            invariant: "flag_is_zero".to_string(),
            expected: 1,
            actual: Some(2),
        }
    );
}

#[test]
fn test_fingerprints_follow_state() {
    let sut = flag_sut();
    let seq = CallSequence::from_calls(vec![do_stuff(1), do_stuff(1), do_stuff(2)]);
    let result = run(&seq, &sut, &flag_invariant(), ExecutionOptions::default());
    let prints: Vec<Option<u64>> = result.steps.iter().map(|s| s.fingerprint).collect();
    assert!(prints.iter().all(|p| p.is_some()));
    assert_eq!(prints[0], prints[1]);
    assert_ne!(prints[1], prints[2]);
}
