use lodestar_sandbox::config::SandboxConfig;
use lodestar_sandbox::sandbox::{Sandbox, SandboxError};
use lodestar_sandbox::snapshot::SerializedVal;
use wasmtime::Val;

const STATEFUL_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global (export "counter") (mut i32) (i32.const 0))
  (global (export "limit") i32 (i32.const 10))

  (func (export "increment") (result i32)
    (global.set 0 (i32.add (global.get 0) (i32.const 1)))
    (global.get 0))

  (func (export "store_at") (param i32 i32)
    (i32.store (local.get 0) (local.get 1)))

  (func (export "load_from") (param i32) (result i32)
    (i32.load (local.get 0)))

  (func (export "grow")
    (drop (memory.grow (i32.const 1))))

  (func (export "boom")
    unreachable)
)
"#;

fn sandbox() -> Sandbox {
    Sandbox::new(&SandboxConfig::default()).unwrap()
}

#[test]
fn test_snapshot_and_restore_memory() {
    let sandbox = sandbox();
    let module = sandbox.load_module(STATEFUL_WAT.as_bytes()).unwrap();
    let mut instance = sandbox.instantiate(&module).unwrap();

    instance
        .call_func("store_at", &[Val::I32(0), Val::I32(999)])
        .unwrap();
    let snap = instance.snapshot().unwrap();

    instance
        .call_func("store_at", &[Val::I32(0), Val::I32(111)])
        .unwrap();
    instance
        .call_func("store_at", &[Val::I32(64), Val::I32(5)])
        .unwrap();

    assert!(instance.restore(&snap).unwrap());
    let val = instance.call_func("load_from", &[Val::I32(0)]).unwrap();
    assert!(matches!(val[0], Val::I32(999)));
    let val = instance.call_func("load_from", &[Val::I32(64)]).unwrap();
    assert!(matches!(val[0], Val::I32(0)));
}

#[test]
fn test_snapshot_captures_only_mutable_globals() {
    let sandbox = sandbox();
    let module = sandbox.load_module(STATEFUL_WAT.as_bytes()).unwrap();
    let mut instance = sandbox.instantiate(&module).unwrap();

    instance.call_func("increment", &[]).unwrap();
    instance.call_func("increment", &[]).unwrap();
    let snap = instance.snapshot().unwrap();

    assert_eq!(snap.global("counter"), Some(SerializedVal::I32(2)));
    assert_eq!(snap.global("limit"), None);
    assert_eq!(snap.globals().len(), 1);

    instance.call_func("increment", &[]).unwrap();
    assert!(instance.restore(&snap).unwrap());
    let after = instance.snapshot().unwrap();
    assert_eq!(after, snap);
}

#[test]
fn test_restore_into_fresh_instance() {
    let sandbox = sandbox();
    let module = sandbox.load_module(STATEFUL_WAT.as_bytes()).unwrap();
    let mut a = sandbox.instantiate(&module).unwrap();
    a.call_func("store_at", &[Val::I32(8), Val::I32(42)]).unwrap();
    a.call_func("increment", &[]).unwrap();
    let snap = a.snapshot().unwrap();

    let mut b = sandbox.instantiate(&module).unwrap();
    assert!(b.restore(&snap).unwrap());
    assert_eq!(b.snapshot().unwrap(), snap);
    assert_eq!(b.snapshot().unwrap().fingerprint(), snap.fingerprint());
}

#[test]
fn test_restore_refuses_grown_memory() {
    let sandbox = sandbox();
    let module = sandbox.load_module(STATEFUL_WAT.as_bytes()).unwrap();
    let mut instance = sandbox.instantiate(&module).unwrap();
    let small = instance.snapshot().unwrap();

    instance.call_func("grow", &[]).unwrap();
    let large = instance.snapshot().unwrap();
    assert_eq!(large.memory_len(), 2 * 65536);

    assert!(!instance.restore(&small).unwrap());

    // A small instance can still be grown into the large snapshot.
    let mut fresh = sandbox.instantiate(&module).unwrap();
    assert!(fresh.restore(&large).unwrap());
    assert_eq!(fresh.snapshot().unwrap().memory_len(), 2 * 65536);
}

#[test]
fn test_trap_and_missing_export() {
    let sandbox = sandbox();
    let module = sandbox.load_module(STATEFUL_WAT.as_bytes()).unwrap();
    let mut instance = sandbox.instantiate(&module).unwrap();

    assert!(matches!(
        instance.call_func("boom", &[]),
        Err(SandboxError::Trap { .. })
    ));
    assert!(matches!(
        instance.call_func("nope", &[]),
        Err(SandboxError::ExportNotFound { .. })
    ));
}

#[test]
fn test_exported_funcs_lists_signatures() {
    let sandbox = sandbox();
    let module = sandbox.load_module(STATEFUL_WAT.as_bytes()).unwrap();
    let funcs = module.exported_funcs();
    let store_at = funcs.iter().find(|f| f.name == "store_at").unwrap();
    assert_eq!(store_at.params.len(), 2);
    assert_eq!(store_at.results, 0);
    assert_eq!(funcs.len(), 5);
}
