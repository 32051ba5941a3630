//! Logging infrastructure - structured tracing for both engines
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels via environment
//! - Zero-cost when disabled (hot paths only emit `trace!`)
//! - Console output (plain or JSON) plus optional file output
//!
//! Growth, recycling and teardown events are emitted through the typed
//! helpers below so every event carries the same `event = "..."` field.

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MEMPOOL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("MEMPOOL_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // MEMPOOL_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("MEMPOOL_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("MEMPOOL_LOG_JSON").is_ok();
        config.show_spans = std::env::var("MEMPOOL_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (errors only)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (every allocator event, mirrored to a file)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("mempool.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration.
///
/// Only the first call installs a subscriber; later calls are ignored, as is
/// a subscriber installed by the host application.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("mempool={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (plain, json) = if config.json_format {
            let layer = fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_span_events(span_events);
            (None, Some(layer))
        } else {
            let layer = fmt::layer()
                .with_writer(io::stdout)
                .with_span_events(span_events)
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions));
            (Some(layer), None)
        };

        let file = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let directory = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|name| name.to_os_string())
                    .unwrap_or_else(|| "mempool.log".into());
                fmt::layer()
                    .with_writer(tracing_appender::rolling::never(directory, file_name))
                    .with_ansi(false)
                    .with_target(true)
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(plain)
            .with(json)
            .with(file)
            .try_init()
            .ok(); // Host may already own the global subscriber
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Arena pool events
// ============================================================================

/// Log pool construction
pub fn log_pool_created(total_size: usize, max_small: usize) {
    use tracing::debug;
    debug!(
        event = "pool_created",
        total_size,
        max_small,
        "Arena pool created"
    );
}

/// Log a new block linked onto the chain
#[inline]
pub fn log_block_growth(block_count: usize, block_size: usize, current: usize) {
    use tracing::debug;
    debug!(
        event = "block_growth",
        blocks = block_count,
        block_size,
        current_block = current,
        "Arena block chain grown"
    );
}

/// Log a block skipped by the current-block heuristic
#[inline]
pub fn log_block_retired(index: usize, failures: usize) {
    use tracing::trace;
    trace!(
        event = "block_retired",
        block = index,
        failures,
        "Block no longer scanned for small allocations"
    );
}

/// Log a large allocation
#[inline]
pub fn log_large_alloc(size: usize, ptr: *const u8, recycled: bool) {
    use tracing::trace;
    trace!(
        event = "large_alloc",
        size_bytes = size,
        address = ?ptr,
        recycled_slot = recycled,
        "Large allocation tracked"
    );
}

/// Log an explicit large free
#[inline]
pub fn log_large_free(ptr: *const u8, found: bool) {
    use tracing::trace;
    trace!(
        event = "large_free",
        address = ?ptr,
        found,
        "Large allocation freed"
    );
}

/// Log growth that failed and was unwound
pub fn log_growth_failure(what: &str, size: usize) {
    use tracing::warn;
    warn!(
        event = "growth_failure",
        what,
        size_bytes = size,
        "Allocation failed during growth"
    );
}

/// Log pool reset
pub fn log_pool_reset(large_released: usize, blocks: usize) {
    use tracing::debug;
    debug!(
        event = "pool_reset",
        large_released,
        blocks,
        "Arena pool reset"
    );
}

/// Log a cleanup handler about to run
#[inline]
pub fn log_cleanup_invoked(position: usize, data: Option<*const u8>) {
    use tracing::trace;
    trace!(
        event = "cleanup_invoked",
        position,
        data = ?data,
        "Running cleanup handler"
    );
}

/// Log pool teardown
pub fn log_pool_teardown(cleanups: usize, large_released: usize, blocks: usize) {
    use tracing::debug;
    debug!(
        event = "pool_teardown",
        cleanups_invoked = cleanups,
        large_released,
        blocks_released = blocks,
        "Arena pool destroyed"
    );
}

// ============================================================================
// Free-list events
// ============================================================================

/// Log a new slab obtained from the heap
pub fn log_slab_growth(bytes: usize, heap_size: usize) {
    use tracing::debug;
    debug!(
        event = "slab_growth",
        slab_bytes = bytes,
        heap_size,
        "Free-list slab obtained"
    );
}

/// Log slab leftover threaded onto a smaller class
#[inline]
pub fn log_leftover_salvaged(bytes: usize) {
    use tracing::trace;
    trace!(
        event = "leftover_salvaged",
        bytes,
        "Slab leftover moved to free list"
    );
}

/// Log a free node turned into a slab after heap exhaustion
pub fn log_node_requisitioned(class_size: usize, requested: usize) {
    use tracing::warn;
    warn!(
        event = "node_requisitioned",
        class_size,
        requested,
        "Heap exhausted, borrowing free node as slab"
    );
}

/// Log one out-of-memory handler round
pub fn log_oom_retry(size: usize, attempt: usize) {
    use tracing::warn;
    warn!(
        event = "oom_retry",
        size_bytes = size,
        attempt,
        "Out of memory, invoking handler"
    );
}

/// Log unrecoverable exhaustion
pub fn log_oom_fatal(size: usize) {
    use tracing::error;
    error!(
        event = "oom_fatal",
        size_bytes = size,
        "Out of memory with no handler registered"
    );
}
