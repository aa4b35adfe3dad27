use std::cmp::Ordering;
use std::fs;
use std::time::Instant;

use ds_core::clock::SystemClock;
use ds_core::domain::{parse_whitelist, DomainMatcher};

pub struct BenchOptions {
    /// JSON array of hostnames; synthetic hosts when unset
    pub hosts_path: Option<String>,
    /// Whitelist file; synthetic whitelist when unset
    pub whitelist_path: Option<String>,
    pub iterations: usize,
    pub synthetic_hosts: usize,
    pub seed: u32,
}

struct BenchResult {
    ops: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
    matched_pct: f64,
}

pub fn run_bench(opts: BenchOptions) -> Result<(), String> {
    let hosts = match &opts.hosts_path {
        Some(path) => load_hosts(path)?,
        None => generate_hosts(opts.synthetic_hosts, opts.seed),
    };
    if hosts.is_empty() {
        return Err("No hosts to benchmark".to_string());
    }

    let whitelist = match &opts.whitelist_path {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?,
        None => generate_whitelist(),
    };
    let entries = parse_whitelist(&whitelist).len();

    println!("Whitelist Matching Benchmark");
    println!("==================================================");
    println!("Hosts: {}, whitelist entries: {}, iterations: {}", hosts.len(), entries, opts.iterations);
    println!();

    let mut cold = DomainMatcher::with_clock(SystemClock);
    let cold_result = run_matching(&hosts, opts.iterations, |host| {
        cold.clear_caches();
        cold.is_whitelisted(host, &whitelist)
    });
    println!("{}", format_result("Cold (caches cleared per lookup)", &cold_result));
    println!();

    let mut warm = DomainMatcher::with_clock(SystemClock);
    for host in &hosts {
        warm.is_whitelisted(host, &whitelist);
    }
    let warm_result = run_matching(&hosts, opts.iterations, |host| warm.is_whitelisted(host, &whitelist));
    println!("{}", format_result("Warm (shared caches)", &warm_result));
    println!("  Cached results: {}, cached base domains: {}", warm.cached_matches(), warm.cached_base_domains());

    Ok(())
}

fn run_matching(hosts: &[String], iterations: usize, mut f: impl FnMut(&str) -> bool) -> BenchResult {
    let mut latencies = Vec::with_capacity(hosts.len() * iterations);
    let mut matched = 0usize;

    for _ in 0..iterations {
        for host in hosts {
            let start = Instant::now();
            if f(host) {
                matched += 1;
            }
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let ops = latencies.len();
    let total_us = latencies.iter().sum::<f64>();
    let total_ms = total_us / 1000.0;

    BenchResult {
        ops,
        total_ms,
        avg_us: if ops == 0 { 0.0 } else { total_us / ops as f64 },
        p50_us: percentile(&latencies, 0.50),
        p95_us: percentile(&latencies, 0.95),
        p99_us: percentile(&latencies, 0.99),
        ops_per_sec: if total_ms > 0.0 { (ops as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
        matched_pct: if ops == 0 { 0.0 } else { matched as f64 * 100.0 / ops as f64 },
    }
}

fn format_result(name: &str, result: &BenchResult) -> String {
    format!(
        "{}:\n  Lookups: {}\n  Total time: {:.2}ms\n  Avg latency: {:.2}μs\n  P50 latency: {:.2}μs\n  P95 latency: {:.2}μs\n  P99 latency: {:.2}μs\n  Throughput:  {} ops/sec\n  Matched: {:.1}%",
        name,
        result.ops,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.matched_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

fn load_hosts(path: &str) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse '{}': {}", path, e))
}

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64)
    }
}

fn pick<'a>(items: &[&'a str], rand: &mut impl FnMut() -> f64) -> &'a str {
    let idx = (rand() * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)]
}

const SITES: &[&str] = &[
    "example.com",
    "github.com",
    "news.ycombinator.com",
    "wikipedia.org",
    "bank.co.uk",
    "docs.rs",
    "shop.example.net",
    "calendar.google.com",
];

const PREFIXES: &[&str] = &["", "www.", "api.", "cdn.", "static.", "m.", "login."];

fn generate_hosts(count: usize, seed: u32) -> Vec<String> {
    let mut rand = create_rng(seed);
    (0..count)
        .map(|i| {
            let prefix = pick(PREFIXES, &mut rand);
            if i % 5 == 0 {
                format!("{}unlisted{}.org", prefix, i)
            } else {
                format!("{}{}", prefix, pick(SITES, &mut rand))
            }
        })
        .collect()
}

fn generate_whitelist() -> String {
    SITES[..4].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.50), 50.0);
        assert_eq!(percentile(&values, 0.99), 99.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_generated_hosts_are_deterministic() {
        assert_eq!(generate_hosts(20, 7), generate_hosts(20, 7));
        assert_eq!(generate_hosts(20, 7).len(), 20);
    }
}
