use std::time::Duration;

/// Concurrent in-flight RPCs per lookup (spec.md §4.8).
pub const ALPHA: usize = 3;

/// Overall deadline after which a lookup completes with its best partial
/// result (spec.md §4.9 glossary: `LOOKUP_TIMEOUT`, default 60s).
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);
