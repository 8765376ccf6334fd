//! Statistics snapshots, metric naming, and expression evaluation.
//!
//! Snapshots are point-in-time frozen copies of named statistic values.
//! Expression views are named formulas evaluated against a snapshot by an
//! injected [`ExpressionEngine`]; the coordinator never interprets formulas
//! itself.

mod expression;
mod format;
mod index;
mod snapshot;

pub use expression::{
    ExpressionEngine, ExpressionView, ExpressionViewRegistry, NamedLookup, NamedLookupEngine,
    StatisticExpression,
};
pub use format::{format_value, real_double_value};
pub use index::MetricIndex;
pub use snapshot::StatisticsSnapshot;
