//! Telemetry sink
//!
//! Mirrors telemetry events into the log and keeps a small summary of the
//! machine (last position and connection per axis, executor status,
//! progress, fault count) for status displays.

use depokit_core::{
    Axis, CommandOutcome, EventBus, EventCategory, EventFilter, ExecutionStatus, FaultKind,
    Progress, SubscriptionId, TelemetryEvent,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Summary kept by the sink
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySummary {
    /// Last reported position per axis
    pub positions: BTreeMap<Axis, f64>,
    /// Last reported connection state per axis
    pub connected: BTreeMap<Axis, bool>,
    /// Last executor status
    pub status: Option<ExecutionStatus>,
    /// Last progress report
    pub progress: Option<Progress>,
    /// Faults seen
    pub faults: u64,
    /// Commands that failed
    pub failed_commands: u64,
    /// Events seen
    pub events: u64,
}

/// Logging subscriber on the telemetry bus
///
/// Unsubscribes when dropped.
pub struct TelemetrySink {
    bus: Arc<EventBus>,
    id: SubscriptionId,
    summary: Arc<RwLock<TelemetrySummary>>,
}

impl TelemetrySink {
    /// Subscribe to every category except raw bus traffic
    pub fn attach(bus: Arc<EventBus>) -> Self {
        Self::attach_with(bus, false)
    }

    /// Subscribe, optionally including raw bus traffic
    pub fn attach_with(bus: Arc<EventBus>, include_bus_traffic: bool) -> Self {
        let mut categories = vec![
            EventCategory::Position,
            EventCategory::Connection,
            EventCategory::Command,
            EventCategory::Execution,
            EventCategory::Fault,
        ];
        if include_bus_traffic {
            categories.push(EventCategory::Bus);
        }

        let summary = Arc::new(RwLock::new(TelemetrySummary::default()));
        let state = Arc::clone(&summary);
        let id = bus.subscribe(EventFilter::Categories(categories), move |event| {
            log_event(&event);
            record(&mut state.write(), &event);
        });
        Self { bus, id, summary }
    }

    /// Copy of the current summary
    pub fn summary(&self) -> TelemetrySummary {
        self.summary.read().clone()
    }

    /// Faults seen since attaching
    pub fn fault_count(&self) -> u64 {
        self.summary.read().faults
    }

    /// Last reported position of an axis
    pub fn last_position(&self, axis: Axis) -> Option<f64> {
        self.summary.read().positions.get(&axis).copied()
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

fn record(summary: &mut TelemetrySummary, event: &TelemetryEvent) {
    summary.events += 1;
    match event {
        TelemetryEvent::PositionUpdated { axis, value } => {
            summary.positions.insert(*axis, *value);
        }
        TelemetryEvent::ConnectionChanged { axis, connected } => {
            summary.connected.insert(*axis, *connected);
        }
        TelemetryEvent::CommandCompleted {
            result: CommandOutcome::Failed { .. },
            ..
        } => summary.failed_commands += 1,
        TelemetryEvent::ExecutionStateChanged { new, .. } => summary.status = Some(*new),
        TelemetryEvent::Progress(progress) => summary.progress = Some(*progress),
        TelemetryEvent::Fault { .. } => summary.faults += 1,
        _ => {}
    }
}

fn log_event(event: &TelemetryEvent) {
    let description = event.description();
    match event {
        TelemetryEvent::BusTraffic(_) => tracing::trace!(target: "depokit::bus", "{}", description),
        TelemetryEvent::PositionUpdated { .. } | TelemetryEvent::Progress(_) => {
            tracing::debug!(target: "depokit::telemetry", "{}", description)
        }
        TelemetryEvent::CommandStarted { .. }
        | TelemetryEvent::CommandCompleted {
            result: CommandOutcome::Succeeded,
            ..
        } => tracing::debug!(target: "depokit::telemetry", "{}", description),
        TelemetryEvent::CommandCompleted { .. } => {
            tracing::warn!(target: "depokit::telemetry", "{}", description)
        }
        TelemetryEvent::ConnectionChanged { .. } | TelemetryEvent::ExecutionStateChanged { .. } => {
            tracing::info!(target: "depokit::telemetry", "{}", description)
        }
        TelemetryEvent::Fault {
            kind: FaultKind::StopFailed,
            ..
        } => tracing::error!(target: "depokit::telemetry", "{}", description),
        TelemetryEvent::Fault { .. } => {
            tracing::warn!(target: "depokit::telemetry", "{}", description)
        }
    }
}
