use once_cell::sync::Lazy;

/// Cached access tokens are treated as fresh for this long. Google access
/// tokens live for an hour; refreshing at ~50 minutes keeps a safety margin.
pub const TOKEN_REFRESH_INTERVAL_MS: i64 = 3_000_000;

/// Cooldown applied to an (account, model) pair when a 429 carries no
/// parseable reset hint.
pub const DEFAULT_COOLDOWN_MS: i64 = 60_000;

/// When every account is cooling down and the soonest reset is within this
/// window, the dispatcher sleeps in-process instead of failing the request.
pub const MAX_WAIT_BEFORE_ERROR_MS: i64 = 120_000;

/// Thought signatures shorter than this are treated as corrupt and never
/// forwarded upstream.
pub const MIN_SIGNATURE_LENGTH: usize = 50;

/// Hard output ceiling accepted by Gemini targets.
pub const GEMINI_MAX_OUTPUT_TOKENS: i64 = 65_536;

/// Fixed string the upstream accepts in place of a real thought signature.
pub const SENTINEL_SIGNATURE: &str = "skip_thought_signature_validator";

/// Project id used when `:loadCodeAssist` fails on every endpoint.
pub const DEFAULT_PROJECT_ID: &str = "cloudcode-default";

pub const DEFAULT_MAX_RETRIES: usize = 3;

pub const DEFAULT_PORT: u16 = 8045;

/// Cloud Code hosts, tried in order.
pub const CLOUDCODE_HOSTS: &[&str] = &[
    "daily-cloudcode-pa.googleapis.com",
    "cloudcode-pa.googleapis.com",
];

pub const TOOL_SIGNATURE_CACHE_CAPACITY: usize = 512;
pub const FAMILY_CACHE_CAPACITY: usize = 256;

/// Client identity attached to every Cloud Code call.
pub const IDE_TYPE: &str = "ANTIGRAVITY";
pub const PLUGIN_TYPE: &str = "GEMINI";

pub static USER_AGENT: Lazy<String> = Lazy::new(|| {
    format!(
        "antigravity/{} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});
