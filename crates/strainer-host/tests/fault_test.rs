//! Integration tests for fault containment and load-time interface checks.

mod common;

use common::*;
use std::time::{Duration, Instant};
use strainer_abi::{AbiConfig, PrefixWidth};
use strainer_host::{
    BlueprintConfig, BlueprintError, FaultKind, InstanceState, ModuleInstance, Phase,
    WasiCapabilities,
};

fn configured(runtime: &strainer_host::BlueprintRuntime, wat: &str) -> ModuleInstance {
    let module = load(runtime, "faulty", wat);
    let mut instance = runtime.instantiate(&module).unwrap();
    instance.configure(b"").unwrap();
    instance
}

fn fault_kind(err: &BlueprintError) -> Option<FaultKind> {
    match err {
        BlueprintError::ModuleFault(fault) => Some(fault.kind),
        _ => None,
    }
}

#[test]
fn test_infinite_loop_exhausts_fuel() {
    let config = BlueprintConfig::default()
        .fuel_per_call(100_000)
        .call_timeout(Duration::ZERO);
    let runtime = runtime_with(config);
    let mut instance = configured(&runtime, &infinite_loop());

    let err = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::FuelExhausted));
    assert!(err.is_terminal());
    assert!(instance.is_poisoned());
    assert_eq!(instance.phase(), Phase::Idle);
}

#[test]
fn test_infinite_loop_hits_deadline() {
    let config = BlueprintConfig::default()
        .unmetered()
        .call_timeout(Duration::from_millis(50))
        .epoch_tick(Duration::from_millis(5));
    let runtime = runtime_with(config);
    let mut instance = configured(&runtime, &infinite_loop());

    let start = Instant::now();
    let err = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::DeadlineExceeded));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_poisoned_instance_is_never_entered_again() {
    let runtime = runtime();
    let mut instance = configured(&runtime, &infinite_loop());

    let first = instance.evaluate(&record("orders")).unwrap_err();
    let calls = instance.stats().module_calls;
    assert_eq!(calls, 2);

    for _ in 0..3 {
        let again = instance.evaluate(&record("orders")).unwrap_err();
        assert_eq!(fault_kind(&again), fault_kind(&first));
    }
    assert!(matches!(instance.configure(b""), Err(BlueprintError::ModuleFault(_))));
    assert_eq!(instance.stats().module_calls, calls);
    assert!(instance.memory_size().is_none());
}

#[test]
fn test_unreachable_is_contained() {
    let runtime = runtime();
    let mut instance = configured(&runtime, &aborts());

    let err = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::Unreachable));
    match instance.state() {
        InstanceState::Poisoned(fault) => assert_eq!(fault.export, "matches"),
        other => panic!("expected poisoned, got {:?}", other),
    }
}

#[test]
fn test_out_of_bounds_access_is_contained() {
    let runtime = runtime();
    let mut instance = configured(&runtime, &out_of_bounds());

    let err = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::MemoryOutOfBounds));
}

#[test]
fn test_fault_does_not_affect_siblings() {
    let runtime = runtime();
    let module = load(&runtime, "faulty", &aborts());
    let mut broken = runtime.instantiate(&module).unwrap();
    let mut healthy = runtime.instantiate(&module).unwrap();
    broken.configure(b"").unwrap();
    healthy.configure(b"").unwrap();

    assert!(broken.evaluate(&record("orders")).is_err());
    assert!(!healthy.is_poisoned());
    // a fresh instance of the same module still works
    let mut fresh = module.instantiate().unwrap();
    assert!(fresh.configure(b"").is_ok());
}

#[test]
fn test_batch_reports_fault_per_record() {
    let runtime = runtime();
    let mut instance = configured(&runtime, &aborts());

    let records = [record("a"), record("b"), record("c")];
    let results = instance.evaluate_batch(&records);
    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(fault_kind(result.as_ref().unwrap_err()), Some(FaultKind::Unreachable));
    }
    // configure plus the first record only
    assert_eq!(instance.stats().module_calls, 2);
}

#[test]
fn test_malformed_result_poisons() {
    let runtime = runtime();
    let mut instance = configured(&runtime, &with_matches("(i32.const 7)"));

    let err = instance.evaluate(&record("orders")).unwrap_err();
    assert!(matches!(err, BlueprintError::MalformedResult { export: "matches", value: 7 }));
    assert!(err.is_retryable());

    let again = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&again), Some(FaultKind::ContractViolation));
}

#[test]
fn test_bad_log_pointer_is_host_call_fault() {
    let runtime = runtime();
    let mut instance = configured(&runtime, BAD_LOG_POINTER);

    let err = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::HostCall));
}

#[test]
fn test_log_flood_is_bounded() {
    let config = BlueprintConfig::default();
    let limit = config.max_log_entries_per_call;
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
    let runtime = runtime_with(config);
    let mut instance = configured(&runtime, &logger(limit as u32 * 4));

    // surplus entries are dropped, not fatal
    assert!(!instance.evaluate(&record("orders")).unwrap().is_match());
    assert!(!instance.evaluate(&record("orders")).unwrap().is_match());
}

#[test]
fn test_start_function_trap_at_instantiate() {
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func $boom unreachable)
          (start $boom)
          (func (export "parse_parameters") (result i32) (i32.const 0))
          (func (export "matches") (result i32) (i32.const 0)))
    "#;
    let runtime = runtime();
    let module = load(&runtime, "boom", wat);

    let err = runtime.instantiate(&module).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::Unreachable));
}

#[test]
fn test_start_function_host_call_fault_at_instantiate() {
    let wat = r#"
        (module
          (import "blueprint" "log" (func $log (param i32 i32 i32)))
          (memory (export "memory") 1)
          (func $boom (call $log (i32.const 0) (i32.const -16) (i32.const 8)))
          (start $boom)
          (func (export "parse_parameters") (result i32) (i32.const 0))
          (func (export "matches") (result i32) (i32.const 0)))
    "#;
    let runtime = runtime();
    let module = load(&runtime, "boom", wat);

    let err = runtime.instantiate(&module).unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::HostCall));
    assert!(err.is_terminal());
}

#[test]
fn test_configure_fault_poisons() {
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func (export "parse_parameters") (result i32) unreachable)
          (func (export "matches") (result i32) (i32.const 1)))
    "#;
    let runtime = runtime();
    let module = load(&runtime, "bad-parser", wat);
    let mut instance = runtime.instantiate(&module).unwrap();

    let err = instance.configure(b"anything").unwrap_err();
    assert_eq!(fault_kind(&err), Some(FaultKind::Unreachable));
    assert_eq!(instance.phase(), Phase::Idle);
    match instance.state() {
        InstanceState::Poisoned(fault) => assert_eq!(fault.export, "parse_parameters"),
        other => panic!("expected poisoned, got {:?}", other),
    }

    let again = instance.evaluate(&record("orders")).unwrap_err();
    assert_eq!(fault_kind(&again), Some(FaultKind::Unreachable));
    assert_eq!(instance.stats().module_calls, 1);
}

#[test]
fn test_record_beyond_abi_prefix_is_resource_exhausted() {
    let config = BlueprintConfig::default()
        .arena_pages(4)
        .abi(AbiConfig::default().length_prefix(PrefixWidth::U16));
    let runtime = runtime_with(config);
    let module = load(&runtime, "topic-equals", TOPIC_EQUALS);
    let mut instance = runtime.instantiate(&module).unwrap();
    instance.configure(&topic_params("orders")).unwrap();

    let oversized = record("orders").value("x".repeat(70_000));
    let err = instance.evaluate(&oversized).unwrap_err();
    assert!(matches!(err, BlueprintError::ResourceExhausted(_)), "{:?}", err);
    assert!(!instance.is_poisoned());
    assert_eq!(instance.stats().module_calls, 1);
}

#[test]
fn test_arena_cannot_exceed_declared_maximum() {
    let wat = r#"
        (module
          (memory (export "memory") 1 1)
          (func (export "parse_parameters") (result i32) (i32.const 0))
          (func (export "matches") (result i32) (i32.const 0)))
    "#;
    let runtime = runtime();
    let module = load(&runtime, "capped", wat);
    assert_eq!(module.max_memory_pages(), Some(1));

    let err = runtime.instantiate(&module).unwrap_err();
    assert!(matches!(err, BlueprintError::ResourceExhausted(_)));
}

#[test]
fn test_memory_limit() {
    let config = BlueprintConfig::default().max_memory(4 * 65536).arena_pages(1);
    let runtime = runtime_with(config);

    // fits, but the arena does not
    let at_limit = with_matches("(i32.const 0)")
        .replace("(memory (export \"memory\") 1)", "(memory (export \"memory\") 4)");
    let module = load(&runtime, "at-limit", &at_limit);
    assert!(matches!(runtime.instantiate(&module), Err(BlueprintError::ResourceExhausted(_))));

    // does not fit at all
    let over = with_matches("(i32.const 0)")
        .replace("(memory (export \"memory\") 1)", "(memory (export \"memory\") 5)");
    let module = load(&runtime, "over-limit", &over);
    assert!(matches!(runtime.instantiate(&module), Err(BlueprintError::ResourceExhausted(_))));

    // leaves room
    let module = load(&runtime, "small", &with_matches("(i32.const 0)"));
    let instance = runtime.instantiate(&module).unwrap();
    assert_eq!(instance.memory_size(), Some(2 * 65536));
}

#[test]
fn test_invalid_bytes() {
    let runtime = runtime();
    assert!(matches!(
        runtime.load("garbage", b"\0asm\x01\0\0\0\xff\xff"),
        Err(BlueprintError::InvalidModule(_))
    ));
    assert!(matches!(
        runtime.load("text", b"definitely not a module"),
        Err(BlueprintError::InvalidModule(_))
    ));
}

fn load_err(config: BlueprintConfig, wat: &str) -> String {
    match runtime_with(config).load("candidate", wat.as_bytes()) {
        Err(BlueprintError::UnsupportedInterface(msg)) => msg,
        other => panic!("expected unsupported interface, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_interface_missing_export() {
    let msg = load_err(
        BlueprintConfig::default(),
        r#"(module
             (memory (export "memory") 1)
             (func (export "parse_parameters") (result i32) (i32.const 0)))"#,
    );
    assert!(msg.contains("matches"), "{}", msg);
}

#[test]
fn test_interface_wrong_signature() {
    let msg = load_err(
        BlueprintConfig::default(),
        r#"(module
             (memory (export "memory") 1)
             (func (export "parse_parameters") (result i32) (i32.const 0))
             (func (export "matches") (param i32) (result i32) (local.get 0)))"#,
    );
    assert!(msg.contains("() -> i32"), "{}", msg);
}

#[test]
fn test_interface_missing_memory() {
    let msg = load_err(
        BlueprintConfig::default(),
        r#"(module
             (func (export "parse_parameters") (result i32) (i32.const 0))
             (func (export "matches") (result i32) (i32.const 0)))"#,
    );
    assert!(msg.contains("memory"), "{}", msg);
}

#[test]
fn test_interface_foreign_import() {
    let msg = load_err(
        BlueprintConfig::default(),
        r#"(module
             (import "env" "abort" (func))
             (memory (export "memory") 1)
             (func (export "parse_parameters") (result i32) (i32.const 0))
             (func (export "matches") (result i32) (i32.const 0)))"#,
    );
    assert!(msg.contains("env::abort"), "{}", msg);
}

#[test]
fn test_interface_unknown_host_function() {
    let msg = load_err(
        BlueprintConfig::default(),
        r#"(module
             (import "blueprint" "clock" (func (result i64)))
             (memory (export "memory") 1)
             (func (export "parse_parameters") (result i32) (i32.const 0))
             (func (export "matches") (result i32) (i32.const 0)))"#,
    );
    assert!(msg.contains("unknown host function"), "{}", msg);
}

#[test]
fn test_interface_host_function_signature() {
    let msg = load_err(
        BlueprintConfig::default(),
        r#"(module
             (import "blueprint" "log" (func (param i32)))
             (memory (export "memory") 1)
             (func (export "parse_parameters") (result i32) (i32.const 0))
             (func (export "matches") (result i32) (i32.const 0)))"#,
    );
    assert!(msg.contains("log"), "{}", msg);
}

const WASI_BLUEPRINT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "parse_parameters") (result i32) (i32.const 0))
  (func (export "matches") (result i32) (i32.const 0)))
"#;

#[test]
fn test_wasi_requires_opt_in() {
    let msg = load_err(BlueprintConfig::default(), WASI_BLUEPRINT);
    assert!(msg.contains("WASI"), "{}", msg);

    let runtime = runtime_with(BlueprintConfig::default().wasi(WasiCapabilities::none()));
    let module = load(&runtime, "wasi", WASI_BLUEPRINT);
    let mut instance = runtime.instantiate(&module).unwrap();
    instance.configure(b"").unwrap();
    assert!(!instance.evaluate(&record("orders")).unwrap().is_match());
}
