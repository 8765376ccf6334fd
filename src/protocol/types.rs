use serde::{Deserialize, Serialize};

use crate::model::{Test, TestStatisticsDelta};

/// Messages delivered by the wire transport to the dispatch loop, in
/// arrival order.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleMessage {
    RegisterTests(RegisterTestsMessage),
    ReportStatistics(Box<ReportStatisticsMessage>),
    RegisterExpressionView(RegisterExpressionViewMessage),
    ProcessReport(Box<ProcessReportMessage>),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterTestsMessage {
    pub tests: Vec<Test>,
}

/// One sampling tick: the per-test statistic deltas accumulated since the
/// previous report.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportStatisticsMessage {
    pub deltas: Vec<TestStatisticsDelta>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterExpressionViewMessage {
    pub display_name: String,
    pub formula: String,
}

/// Liveness update: the full set of worker-process states per agent.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessReportMessage {
    pub reports: Vec<AgentProcessReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProcessReport {
    pub agent: AgentIdentity,
    pub workers: Vec<WorkerProcessState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    Started,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerProcessState {
    pub state: WorkerState,
    pub running_threads: u32,
}
