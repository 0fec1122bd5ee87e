//! Default constants for tristore configuration.

// =============================================================================
// Network Defaults
// =============================================================================

/// Default proxy listen address
pub const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:10000";

// =============================================================================
// Streaming Defaults
// =============================================================================

/// Per-shard upload stream channel capacity.
/// Bounds buffered records while a slow shard applies flow control.
pub const DEFAULT_WRITE_BUFFER: usize = 64;

/// Merged read stream channel capacity, shared by all shard drains.
pub const DEFAULT_MERGE_BUFFER: usize = 64;
