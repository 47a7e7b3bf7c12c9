//! Blueprint Sandbox Benchmarks
//!
//! Run with: cargo run -p strainer-host --example blueprint_benchmark --release

use std::time::Instant;
use strainer_host::{BlueprintConfig, BlueprintRuntime, InputRecord, LatencyStats};

/// Topic-equals blueprint: parameters are `0x01` followed by the topic.
const TOPIC_EQUALS: &str = r#"
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

fn main() {
    println!("=== Blueprint Sandbox Benchmarks ===\n");

    bench_module_loading();
    bench_instantiation();
    bench_evaluate();
    bench_record_size();
    bench_with_fuel_metering();
    bench_native_comparison();

    println!("\n=== Benchmark Complete ===");
}

fn params() -> Vec<u8> {
    let mut params = vec![0x01];
    params.extend_from_slice(b"orders");
    params
}

fn sample_record(value_len: usize) -> InputRecord {
    InputRecord::new("orders")
        .key("customer-42")
        .value("x".repeat(value_len))
        .at(0, 42)
        .header("source", "bench")
}

fn bench_module_loading() {
    println!("## Module Loading");

    let runtime = BlueprintRuntime::new(BlueprintConfig::default()).unwrap();
    let _ = runtime.load("warmup", TOPIC_EQUALS.as_bytes()).unwrap();

    let mut stats = LatencyStats::new();
    for _ in 0..100 {
        let start = Instant::now();
        let _ = runtime.load("topic-equals", TOPIC_EQUALS.as_bytes()).unwrap();
        stats.record(start.elapsed().as_micros() as u64);
    }

    println!("  load:                     {}", stats.summary());
    println!();
}

fn bench_instantiation() {
    println!("## Instantiation");

    let runtime = BlueprintRuntime::new(BlueprintConfig::default()).unwrap();
    let module = runtime.load("topic-equals", TOPIC_EQUALS.as_bytes()).unwrap();

    for _ in 0..5 {
        let _ = runtime.instantiate(&module).unwrap();
    }

    let mut instantiate = LatencyStats::new();
    let mut configure = LatencyStats::new();
    for _ in 0..100 {
        let start = Instant::now();
        let mut instance = runtime.instantiate(&module).unwrap();
        instantiate.record(start.elapsed().as_micros() as u64);

        let start = Instant::now();
        instance.configure(&params()).unwrap();
        configure.record(start.elapsed().as_micros() as u64);
    }

    println!("  instantiate:              {}", instantiate.summary());
    println!("  instantiate + configure:  {}", configure.summary());
    println!();
}

fn bench_evaluate() {
    println!("## Evaluate Overhead");

    let runtime = BlueprintRuntime::new(BlueprintConfig::default().unmetered()).unwrap();
    let module = runtime.load("topic-equals", TOPIC_EQUALS.as_bytes()).unwrap();
    let mut instance = runtime.instantiate(&module).unwrap();
    instance.configure(&params()).unwrap();

    let hit = sample_record(64);
    let miss = InputRecord::new("payments");

    for _ in 0..100 {
        let _ = instance.evaluate(&hit);
    }

    let iterations = 10_000;
    let mut in_module = LatencyStats::new();
    let mut end_to_end = LatencyStats::new();
    for i in 0..iterations {
        let record = if i % 2 == 0 { &hit } else { &miss };
        let start = Instant::now();
        instance.evaluate(record).unwrap();
        end_to_end.record(start.elapsed().as_micros() as u64);
        in_module.record(instance.last_call().unwrap().execution_time_us);
    }

    println!("  in module:                {}", in_module.summary());
    println!("  with marshalling:         {}", end_to_end.summary());
    println!();
}

fn bench_record_size() {
    println!("## Record Size");

    let runtime = BlueprintRuntime::new(BlueprintConfig::default()).unwrap();
    let module = runtime.load("topic-equals", TOPIC_EQUALS.as_bytes()).unwrap();
    let mut instance = runtime.instantiate(&module).unwrap();
    instance.configure(&params()).unwrap();

    for size in [64, 1024, 16 * 1024, 128 * 1024] {
        let record = sample_record(size);
        let iterations = 1000;

        let start = Instant::now();
        for _ in 0..iterations {
            instance.evaluate(&record).unwrap();
        }
        let elapsed = start.elapsed();
        let per_call = elapsed.as_nanos() as f64 / iterations as f64;
        println!(
            "  value {:>6} bytes:       {:.0}ns/call ({:.1} MB/s)",
            size,
            per_call,
            size as f64 / per_call * 1000.0
        );
    }

    println!();
}

fn bench_with_fuel_metering() {
    println!("## Fuel Metering Overhead");

    let record = sample_record(64);
    let iterations = 10_000;

    let mut results = Vec::new();
    for config in [BlueprintConfig::default().unmetered(), BlueprintConfig::default()] {
        let metered = config.fuel_per_call.is_some();
        let runtime = BlueprintRuntime::new(config).unwrap();
        let module = runtime.load("topic-equals", TOPIC_EQUALS.as_bytes()).unwrap();
        let mut instance = runtime.instantiate(&module).unwrap();
        instance.configure(&params()).unwrap();

        for _ in 0..100 {
            let _ = instance.evaluate(&record);
        }

        let mut stats = LatencyStats::new();
        for _ in 0..iterations {
            instance.evaluate(&record).unwrap();
            stats.record(instance.last_call().unwrap().execution_time_us);
        }
        let avg_fuel = instance.stats().fuel_consumed / instance.stats().module_calls;
        results.push((metered, stats, avg_fuel));
    }

    for (metered, stats, avg_fuel) in &results {
        let label = if *metered { "with fuel metering:" } else { "without fuel metering:" };
        println!("  {:<25} {}", label, stats.summary());
        if *metered {
            println!("  avg fuel per call:        {}", avg_fuel);
        }
    }

    let (plain, metered) = (results[0].1.mean_us(), results[1].1.mean_us());
    let overhead = if plain > 0.0 { (metered - plain) / plain * 100.0 } else { 0.0 };
    println!("  overhead:                 {:.1}%", overhead);
    println!();
}

fn bench_native_comparison() {
    println!("## Native vs Sandbox Comparison");

    let runtime = BlueprintRuntime::new(BlueprintConfig::default().unmetered()).unwrap();
    let module = runtime.load("topic-equals", TOPIC_EQUALS.as_bytes()).unwrap();
    let mut instance = runtime.instantiate(&module).unwrap();
    instance.configure(&params()).unwrap();

    let record = sample_record(64);
    let iterations = 100_000;

    let start = Instant::now();
    let mut hits = 0usize;
    for _ in 0..iterations {
        hits += native_matches(&record, "orders") as usize;
    }
    let native_time = start.elapsed();
    std::hint::black_box(hits);

    let start = Instant::now();
    let mut hits = 0usize;
    for _ in 0..iterations {
        hits += instance.evaluate(&record).unwrap().is_match() as usize;
    }
    let sandbox_time = start.elapsed();
    std::hint::black_box(hits);

    println!("  topic equals ({} calls):", iterations);
    println!("    native:   {:?} ({:.1} ns/call)",
             native_time, native_time.as_nanos() as f64 / iterations as f64);
    println!("    sandbox:  {:?} ({:.1} ns/call)",
             sandbox_time, sandbox_time.as_nanos() as f64 / iterations as f64);
    println!("    overhead: {:.1}x",
             sandbox_time.as_nanos() as f64 / native_time.as_nanos().max(1) as f64);
    println!();
}

#[inline(never)]
fn native_matches(record: &InputRecord, topic: &str) -> bool {
    record.topic == topic
}
