use once_cell::sync::Lazy;

/// The publicly visible name of the engine.
pub const ENGINE_NAME: &str = "Trellis";

/// The maximum alignment of any packed record. Field alignments above
/// this value are capped when the record layout is computed.
pub const MAX_RECORD_ALIGNMENT: usize = 16;

/// The service protocol version implemented by this engine.
pub const PROTOCOL_VERSION_MAJOR: u32 = 1;

/// The minor component of the service protocol version.
pub const PROTOCOL_VERSION_MINOR: u32 = 4;

/// The name of the system storage holding sequences and schema
/// metadata. Created on first start if absent.
pub const SYSTEM_STORAGE_NAME: &str = "__system";

/// Specifies how many threads the parallel scheduler spawns.
pub static WORKER_THREADS: Lazy<usize> =
	lazy_env_parse!("TRELLIS_WORKER_THREADS", usize, num_cpus::get());

/// The default number of partitions used by shuffle and aggregate
/// exchanges when the plan does not specify one.
pub static DEFAULT_PARTITIONS: Lazy<usize> = lazy_env_parse!("TRELLIS_DEFAULT_PARTITIONS", usize, 5);

/// The size in bytes of a single arena page.
pub static ARENA_PAGE_SIZE: Lazy<usize> =
	lazy_env_parse!("TRELLIS_ARENA_PAGE_SIZE", usize, 2 * 1024 * 1024);

/// The maximum number of keys fetched from the storage engine in one
/// scan batch.
pub static SCAN_BATCH_SIZE: Lazy<u32> = lazy_env_parse!("TRELLIS_SCAN_BATCH_SIZE", u32, 500);

/// The size in bytes of a result writer buffer. A writer blocks when
/// the buffer is full and the consumer has not caught up.
pub static WRITER_BUFFER_SIZE: Lazy<usize> =
	lazy_env_parse!("TRELLIS_WRITER_BUFFER_SIZE", usize, 32 * 1024);

/// The default statement timeout in milliseconds. Zero disables the
/// deadline entirely.
pub static STATEMENT_TIMEOUT_MS: Lazy<u64> = lazy_env_parse!("TRELLIS_STATEMENT_TIMEOUT_MS", u64, 0);

/// When enabled, a durability callback arriving while no waiter is
/// registered advances the marker inline instead of scheduling a task.
pub static DURABILITY_IDLE_INLINE: Lazy<bool> =
	lazy_env_parse!("TRELLIS_DURABILITY_IDLE_INLINE", bool, true);

/// The number of tasks a strand drains in one scheduler slot before
/// yielding the worker back to the pool.
pub static STRAND_DRAIN_LIMIT: Lazy<usize> = lazy_env_parse!("TRELLIS_STRAND_DRAIN_LIMIT", usize, 64);
