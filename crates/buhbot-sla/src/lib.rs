//! SLA timing and escalation: schedule resolution (C8) and the breach/warning
//! job handlers that drive escalation through the delayed-job queue (C9).

pub mod breach;
pub mod error;
pub mod timer;

pub use breach::{EscalationHandler, SlaTimerRouter};
pub use error::{Result, SlaError};
pub use timer::{resolve_schedule, start_sla_timer, stop_sla_timer, StopOutcome, TimerPayload};
