use std::time::Duration;

/// How often the maintenance loop scans for buckets overdue for refresh and
/// for persistent records overdue for republish (spec.md §4.9). Not pinned by
/// the wire protocol, so chosen to match `boson-routing`'s
/// `BUCKET_REFRESH_INTERVAL` cadence.
pub const REPUBLISH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// A persistent value/peer older than this since its last successful
/// announce is due for re-announcement (spec.md §4.9's `ANNOUNCE_INTERVAL`).
/// Mirrors the ~1 hour republish window conventional in mainline-style DHTs.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on how long `stop()` waits for in-flight RPCs to drain before
/// giving up and closing storage anyway (spec.md §4.9 `stop()`).
pub const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Fan-out width of the startup bootstrap FIND_NODE (spec.md §4.9).
pub const BOOTSTRAP_CONCURRENCY: usize = 8;

/// Interval between maintenance-loop ticks (bucket refresh scan, republish
/// scan, token rotation). `--developerMode` shortens this for local
/// multi-node testing.
pub const MAINTENANCE_TICK: Duration = Duration::from_secs(60);
pub const MAINTENANCE_TICK_DEVELOPER: Duration = Duration::from_secs(5);
