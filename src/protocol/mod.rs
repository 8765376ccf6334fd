//! Inbound protocol message types.
//!
//! The wire transport and codec live outside this crate; transports decode
//! whatever they carry into these types and feed them to the coordinator's
//! dispatch loop.

mod types;

pub use types::{
    AgentIdentity, AgentProcessReport, ConsoleMessage, ProcessReportMessage,
    RegisterExpressionViewMessage, RegisterTestsMessage, ReportStatisticsMessage,
    WorkerProcessState, WorkerState,
};
