/// Capability name connectors register under in the directory.
pub const PLANT_CONNECTION_CAPABILITY: &str = "plant_connection";

/// Offer content sent by a connector that owns no connection yet.
pub const OFFER_READY: &str = "ready";
/// Offer content sent by a connector already attached to the requested plant.
pub const OFFER_CONNECTED: &str = "connected";

/// Failure content tag for a lost plant socket. Kept byte-identical with
/// legacy peers.
pub const PLANT_DISCONNECTED_TAG: &str = "Plant_disconnected";

/// Separator between entries of an Inform payload.
pub const ENTRY_SEPARATOR: char = ';';
/// Separator between name and value inside a value update entry.
pub const PAIR_SEPARATOR: char = ':';

/// Closing line of one plant document.
pub const DEFAULT_CLOSING_MARKER: &str = "</Cluster>";
pub const DEFAULT_NAME_TAG: &str = "Name";
pub const DEFAULT_VALUE_TAG: &str = "Val";
/// Largest document accepted before its closing marker arrives.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

// Monitor-side timing defaults (milliseconds).
pub const DISCOVERY_RETRY_MS: u64 = 2_000;
pub const CFP_REPLY_MS: u64 = 5_000;
pub const ACCEPT_REPLY_MS: u64 = 15_000;
pub const SUBSCRIBE_REPLY_MS: u64 = 2_000;
pub const CANCEL_REPLY_MS: u64 = 2_000;
/// TCP connect timeout towards a remote connector.
pub const CONNECTOR_CONNECT_MS: u64 = 3_000;

// Connector-side timing defaults (milliseconds).
pub const PLANT_CONNECT_TIMEOUT_MS: u64 = 3_000;
/// Wait budget for a first snapshot when the Accept carried no deadline.
pub const DEFAULT_ACCEPT_WAIT_MS: u64 = 10_000;
/// Margin kept before the Accept deadline when a connect is already pending.
pub const CONNECTING_MARGIN_MS: u64 = 100;
/// Margin kept before the Accept deadline when this Accept opens the socket.
pub const IDLE_MARGIN_MS: u64 = 500;
/// How long teardown waits for the ingester worker before detaching it.
pub const INGESTER_JOIN_GRACE_MS: u64 = 5_000;
