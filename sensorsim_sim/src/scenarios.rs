//! Reconciliation scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: Snapshot with one enabled and one disabled sensor
    InitialSync,

    /// DST-002: Upsert event disabling a running sensor
    DisableViaEvent,

    /// DST-003: Delete event for a sensor that never ran
    DeleteUnknown,

    /// DST-004: Remove during a stalled delivery, racing a late upsert
    RemoveMidDelivery,

    /// DST-005: Catalog unavailable at startup
    CatalogOutage,

    /// DST-006: Topic not ready, broken subscriptions, malformed events
    StreamFlap,

    /// DST-007: Interleaved concurrent upserts/removes on a few identities
    UpsertStorm,

    /// DST-008: Process shutdown with slow sinks
    Shutdown,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::InitialSync,
            ScenarioId::DisableViaEvent,
            ScenarioId::DeleteUnknown,
            ScenarioId::RemoveMidDelivery,
            ScenarioId::CatalogOutage,
            ScenarioId::StreamFlap,
            ScenarioId::UpsertStorm,
            ScenarioId::Shutdown,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::InitialSync => "initial_sync",
            ScenarioId::DisableViaEvent => "disable_via_event",
            ScenarioId::DeleteUnknown => "delete_unknown",
            ScenarioId::RemoveMidDelivery => "remove_mid_delivery",
            ScenarioId::CatalogOutage => "catalog_outage",
            ScenarioId::StreamFlap => "stream_flap",
            ScenarioId::UpsertStorm => "upsert_storm",
            ScenarioId::Shutdown => "shutdown",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::InitialSync => "Snapshot [A enabled, B disabled] starts only A",
            ScenarioId::DisableViaEvent => "upserted A with enabled=false removes A's handle",
            ScenarioId::DeleteUnknown => "deleted A with no handle is a silent no-op",
            ScenarioId::RemoveMidDelivery => "Remove within 2s grace, late upsert leaves exactly one handle",
            ScenarioId::CatalogOutage => "Catalog down for N attempts, backoff 2/4/8/16/30s then sync",
            ScenarioId::StreamFlap => "Subscription failures and junk events, backoff resets, state converges",
            ScenarioId::UpsertStorm => "Seeded burst of concurrent upsert/remove, at most one generator per id",
            ScenarioId::Shutdown => "Broadcast cancellation stops every generator within one grace period",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initial_sync" | "a" | "dst-001" => Ok(ScenarioId::InitialSync),
            "disable_via_event" | "b" | "dst-002" => Ok(ScenarioId::DisableViaEvent),
            "delete_unknown" | "c" | "dst-003" => Ok(ScenarioId::DeleteUnknown),
            "remove_mid_delivery" | "d" | "dst-004" => Ok(ScenarioId::RemoveMidDelivery),
            "catalog_outage" | "dst-005" => Ok(ScenarioId::CatalogOutage),
            "stream_flap" | "dst-006" => Ok(ScenarioId::StreamFlap),
            "upsert_storm" | "dst-007" => Ok(ScenarioId::UpsertStorm),
            "shutdown" | "dst-008" => Ok(ScenarioId::Shutdown),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
