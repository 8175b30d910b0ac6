//! # Engine Primitives
//!
//! Hardcoded limits and format constants for the graph engine.
//!
//! These are compiled into the binary and are immutable at runtime.

/// Magic bytes for the persisted snapshot header.
///
/// - Snapshot Header = Magic Bytes ("GMAP") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"GMAP";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the wire format.
pub const FORMAT_VERSION: u8 = 1;

/// Edge type assigned when an `add edge` statement names none.
pub const DEFAULT_EDGE_TYPE: &str = "default";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a node key or edge type, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum size of an opaque entity payload (4 MB).
pub const MAX_ENTITY_SIZE: usize = 4 * 1024 * 1024;

/// Maximum length of a single command string (8 MB).
///
/// Longer commands are rejected before tokenizing.
pub const MAX_COMMAND_LENGTH: usize = 8 * 1024 * 1024;

/// Maximum number of stages in one chained `select`.
pub const MAX_SELECT_STAGES: usize = 64;
