/// Common constants used across the pod core.
///
/// These defaults are used for configuration when explicit values are not
/// provided, and for the reserved metadata columns every table carries.
pub const DEFAULT_LINKS_CLASS: &str = "network_links";

/// Cache rows expiring within this many seconds are re-confirmed by a refresh sweep.
pub const DEFAULT_REFRESH_HORIZON_SECS: u64 = 4 * 60 * 60;
/// Cache rows expiring within this many seconds are removed by an expire sweep.
pub const DEFAULT_EXPIRE_HORIZON_SECS: u64 = 15 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_DEDUP_WINDOW: usize = 256;

/// Hex characters kept from the SHA-256 digest when deriving a row cursor.
pub const CURSOR_LEN: usize = 16;

pub const COL_SEQ: &str = "_seq";
pub const COL_CURSOR: &str = "_cursor";
pub const COL_ORIGIN_ID: &str = "_origin_id";
pub const COL_ORIGIN_ID_TYPE: &str = "_origin_id_type";
pub const COL_EXPIRES: &str = "_expires";
pub const COL_ORIGIN_CLASS: &str = "_origin_class";

/// Field names on rows of the links class.
pub const LINK_PEER_FIELD: &str = "peer_id";
pub const LINK_RELATION_FIELD: &str = "relation";
pub const LINK_ANNOTATIONS_FIELD: &str = "annotations";

/// Relation wildcard accepted by listen rules.
pub const ANY_RELATION: &str = "*";
