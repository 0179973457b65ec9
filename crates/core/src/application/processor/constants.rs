// Processor constants (no magic values)
use std::time::Duration;

/// Items drained per pass; bounds the load put on the invoicing API
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Interval between scheduled passes (1 minute)
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Claims older than this are considered stranded by a crash (5 minutes)
pub const DEFAULT_STALE_CLAIM_MS: i64 = 5 * 60 * 1000;
