//! Shared configuration constants for trendscrape
//!
//! Default values used by the configuration layer and by modules that are
//! constructed without a full `ScraperConfig` (mostly tests and embedding).

/// Default number of headless browsers kept alive by the pool
pub const DEFAULT_BROWSERS: usize = 2;

/// Default number of pre-warmed pages per browser
pub const DEFAULT_PAGES_PER_BROWSER: usize = 4;

/// Default bounded wait for a page checkout
pub const DEFAULT_CHECKOUT_TIMEOUT_MS: u64 = 15_000;

/// Interval between browser connectivity checks
pub const DEFAULT_BROWSER_MONITOR_INTERVAL_SECS: u64 = 30;

/// API calls: bucket capacity and refill rate (tokens per second)
///
/// The platform's private endpoints start answering 429 at roughly
/// 3-4 requests per second per egress address.
pub const DEFAULT_API_BUCKET_CAPACITY: u32 = 5;
pub const DEFAULT_API_REFILL_PER_SEC: f64 = 2.0;

/// Page navigations are far more expensive and far more closely watched.
pub const DEFAULT_NAVIGATION_BUCKET_CAPACITY: u32 = 2;
pub const DEFAULT_NAVIGATION_REFILL_PER_SEC: f64 = 0.5;

/// Longest a caller waits for a rate-limit token before `ResourceExhausted`
pub const DEFAULT_LIMITER_MAX_WAIT_MS: u64 = 60_000;

/// Fixed timeout applied to every outbound call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Retry policy defaults: `delay = base * multiplier^attempt`, capped, jittered
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RETRY_JITTER: f64 = 0.25;

/// How many `429` waits a single pipeline call tolerates before giving up.
/// These do not consume retry-budget slots, so they need their own cap.
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 8;

/// Upper bound on a remote-supplied `Retry-After`
pub const MAX_RETRY_AFTER_SECS: u64 = 3_600;

/// Circuit breaker defaults
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_FAILURE_RATE: f64 = 0.5;
pub const DEFAULT_BREAKER_MINIMUM_CALLS: u32 = 10;
pub const DEFAULT_BREAKER_WINDOW_SECS: u64 = 60;
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;

/// Proxy health checking
pub const DEFAULT_PROXY_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_PROXY_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_PROXY_PROBE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PROXY_PROBE_URL: &str = "https://www.gstatic.com/generate_204";

/// L1: small and short-lived, L2: large and longer-lived
pub const DEFAULT_L1_CAPACITY: usize = 2_048;
pub const DEFAULT_L1_TTL_SECS: u64 = 60;
pub const DEFAULT_L2_TTL_SECS: u64 = 3_600;

/// Values above this size are gzip-compressed before they reach L2
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 4 * 1024;

/// Interval of the expired-entry sweeper
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 30;

/// Namespace prefix of every cache key produced by the scraper
pub const CACHE_NAMESPACE: &str = "scrape";

/// Job queue and worker pool
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_JOB_MAX_RETRIES: u32 = 2;
pub const DEFAULT_JOB_RETRY_DELAY_MS: u64 = 2_000;

/// Finished jobs are kept this long, checked every prune interval
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 86_400;
pub const DEFAULT_JOB_PRUNE_INTERVAL_SECS: u64 = 600;

/// Metrics reporting
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 15;
pub const METRICS_MEASUREMENT: &str = "scraper_metrics";
pub const METRICS_SERVICE_TAG: &str = "scraper";

/// Event bus buffer
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1_024;

/// Chrome user agent used when no fingerprint has been applied yet
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
