use std::env;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Simulated fetch latency in milliseconds (from FETCH_LATENCY_MS env var, defaults to 5)
    pub fetch_latency_ms: u64,

    /// Number of distinct keys (from BENCH_KEYS env var, defaults to 1000)
    pub num_keys: usize,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 100)
    pub sample_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            fetch_latency_ms: env::var("FETCH_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            num_keys: env::var("BENCH_KEYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            sample_size: env::var("BENCH_SAMPLE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  Fetch Latency: {}ms", config.fetch_latency_ms);
        eprintln!("  Keys: {}", config.num_keys);
        eprintln!("  Sample Size: {}", config.sample_size);
        config
    }
}
