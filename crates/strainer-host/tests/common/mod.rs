//! Blueprints used by the integration tests, as WAT.

#![allow(dead_code)]

use strainer_host::{BlueprintConfig, BlueprintRuntime, CompiledModule, InputRecord};

/// Parameters: `0x01` followed by a topic name. Matches records whose topic
/// equals it byte for byte. Rejects empty parameters with -1 and an unknown
/// version byte with -2.
pub const TOPIC_EQUALS: &str = r#"
(module
  (import "blueprint" "input_offset" (func $input_offset (result i32)))
  (import "blueprint" "input_length" (func $input_length (result i32)))
  (memory (export "memory") 1)
  (global $topic_len (mut i32) (i32.const 0))

  (func (export "parse_parameters") (result i32)
    (local $ptr i32) (local $len i32)
    (local.set $ptr (call $input_offset))
    (local.set $len (call $input_length))
    (if (i32.eqz (local.get $len)) (then (return (i32.const -1))))
    (if (i32.ne (i32.load8_u (local.get $ptr)) (i32.const 1)) (then (return (i32.const -2))))
    (global.set $topic_len (i32.sub (local.get $len) (i32.const 1)))
    (memory.copy (i32.const 1024) (i32.add (local.get $ptr) (i32.const 1)) (global.get $topic_len))
    (i32.const 0))

  (func (export "matches") (result i32)
    (local $p i32) (local $len i32) (local $i i32)
    (local.set $p (call $input_offset))
    ;; skip value, then key
    (local.set $p (i32.add (i32.add (local.get $p) (i32.const 4)) (i32.load (local.get $p))))
    (local.set $p (i32.add (i32.add (local.get $p) (i32.const 4)) (i32.load (local.get $p))))
    (local.set $len (i32.load (local.get $p)))
    (local.set $p (i32.add (local.get $p) (i32.const 4)))
    (if (i32.ne (local.get $len) (global.get $topic_len)) (then (return (i32.const 0))))
    (block $done
      (loop $cmp
        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
        (if (i32.ne (i32.load8_u (i32.add (local.get $p) (local.get $i)))
                    (i32.load8_u (i32.add (i32.const 1024) (local.get $i))))
          (then (return (i32.const 0))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $cmp)))
    (i32.const 1))
)
"#;

/// Accepts any parameters with handle 7 and matches iff the host reports that
/// handle back.
pub const HANDLE_ECHO: &str = r#"
(module
  (import "blueprint" "params_handle" (func $params_handle (result i32)))
  (memory (export "memory") 1)
  (func (export "parse_parameters") (result i32) (i32.const 7))
  (func (export "matches") (result i32)
    (i32.eq (call $params_handle) (i32.const 7)))
)
"#;

/// Handle is the parameter length; matches iff the record descriptor lies in
/// the pages grown for the arena.
pub const DESCRIPTOR: &str = r#"
(module
  (import "blueprint" "input_offset" (func $input_offset (result i32)))
  (import "blueprint" "input_length" (func $input_length (result i32)))
  (memory (export "memory") 1)
  (func (export "parse_parameters") (result i32) (call $input_length))
  (func (export "matches") (result i32)
    (i32.ge_u (call $input_offset) (i32.const 65536)))
)
"#;

/// Build a blueprint whose `matches` body is `body`; `parse_parameters`
/// always succeeds.
pub fn with_matches(body: &str) -> String {
    format!(
        r#"
(module
  (memory (export "memory") 1)
  (func (export "parse_parameters") (result i32) (i32.const 0))
  (func (export "matches") (result i32) {})
)
"#,
        body
    )
}

/// `matches` never returns.
pub fn infinite_loop() -> String {
    with_matches("(loop $spin (br $spin)) (i32.const 0)")
}

/// `matches` executes `unreachable`.
pub fn aborts() -> String {
    with_matches("unreachable")
}

/// `matches` reads far outside linear memory.
pub fn out_of_bounds() -> String {
    with_matches("(i32.load (i32.const -4))")
}

/// Logs through the host. `parse_parameters` logs one message; `matches`
/// logs `count` times, then returns 0.
pub fn logger(count: u32) -> String {
    format!(
        r#"
(module
  (import "blueprint" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "hello from blueprint")
  (func (export "parse_parameters") (result i32)
    (call $log (i32.const 2) (i32.const 16) (i32.const 20))
    (i32.const 0))
  (func (export "matches") (result i32)
    (local $i i32)
    (block $done
      (loop $again
        (br_if $done (i32.ge_u (local.get $i) (i32.const {})))
        (call $log (i32.const 3) (i32.const 16) (i32.const 20))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $again)))
    (i32.const 0))
)
"#,
        count
    )
}

/// `matches` hands the host a pointer outside linear memory.
pub const BAD_LOG_POINTER: &str = r#"
(module
  (import "blueprint" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "parse_parameters") (result i32) (i32.const 0))
  (func (export "matches") (result i32)
    (call $log (i32.const 0) (i32.const -16) (i32.const 8))
    (i32.const 0))
)
"#;

/// Runtime with default limits.
pub fn runtime() -> BlueprintRuntime {
    runtime_with(BlueprintConfig::default())
}

/// Runtime with the given configuration.
pub fn runtime_with(config: BlueprintConfig) -> BlueprintRuntime {
    BlueprintRuntime::new(config).expect("failed to create runtime")
}

/// Load `wat` under `name`.
pub fn load(runtime: &BlueprintRuntime, name: &str, wat: &str) -> CompiledModule {
    runtime.load(name, wat.as_bytes()).expect("failed to load blueprint")
}

/// Parameters for [`TOPIC_EQUALS`].
pub fn topic_params(topic: &str) -> Vec<u8> {
    let mut params = vec![0x01];
    params.extend_from_slice(topic.as_bytes());
    params
}

/// A record on `topic` with some payload.
pub fn record(topic: &str) -> InputRecord {
    InputRecord::new(topic)
        .key("customer-42")
        .value(r#"{"amount":12.5}"#)
        .timestamp_millis(1_700_000_000_000)
        .at(3, 1024)
        .header("source", "checkout")
}
