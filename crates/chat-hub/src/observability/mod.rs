//! Observability for the chat hub.
//!
//! Structured logs go through `tracing` with one target per component
//! (`chat.hub`, `chat.connection`, `chat.fanout`, `chat.processor`, `chat.health`,
//! `chat.ws`, `chat.repo`). Room ids and user ids may appear in log fields;
//! message content never does.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `chat_hub_connections_active` | Gauge | none |
//! | `chat_hub_rooms_active` | Gauge | none |
//! | `chat_hub_fanout_enabled` | Gauge | none |
//! | `chat_hub_events_dispatched_total` | Counter | `origin` |
//! | `chat_hub_deliveries_total` | Counter | none |
//! | `chat_hub_evictions_total` | Counter | `reason` |
//! | `chat_hub_processor_drops_total` | Counter | `reason` |
//! | `chat_hub_processing_duration_seconds` | Histogram | `kind` |
//! | `chat_hub_bus_publish_total` | Counter | `status` |
//! | `chat_hub_bus_events_received_total` | Counter | `status` |
//! | `chat_hub_handshakes_total` | Counter | `status` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
