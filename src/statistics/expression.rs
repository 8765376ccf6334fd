use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

use super::index::MetricIndex;
use super::snapshot::StatisticsSnapshot;

/// Injected capability that evaluates one formula against a snapshot.
pub trait StatisticExpression: Send + Sync {
    fn value(&self, snapshot: &StatisticsSnapshot) -> f64;
}

/// Compiles the formula carried by an expression-view registration into an
/// evaluatable expression. Implemented by the surrounding application; the
/// coordinator only stores and evaluates the result.
pub trait ExpressionEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the formula cannot be compiled.
    fn compile(
        &self,
        display_name: &str,
        formula: &str,
    ) -> CoreResult<Arc<dyn StatisticExpression>>;
}

/// Expression that looks a single statistic key up in the snapshot.
pub struct NamedLookup {
    key: String,
}

impl NamedLookup {
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self {
            key: key.trim().to_owned(),
        }
    }
}

impl StatisticExpression for NamedLookup {
    fn value(&self, snapshot: &StatisticsSnapshot) -> f64 {
        snapshot.value_or_zero(&self.key)
    }
}

/// Default engine: treats the formula as a plain statistic key.
pub struct NamedLookupEngine;

impl ExpressionEngine for NamedLookupEngine {
    fn compile(
        &self,
        _display_name: &str,
        formula: &str,
    ) -> CoreResult<Arc<dyn StatisticExpression>> {
        if formula.trim().is_empty() {
            return Err(CoreError::expression("empty formula"));
        }
        Ok(Arc::new(NamedLookup::new(formula)))
    }
}

/// A named derived metric: display name plus compiled formula.
#[derive(Clone)]
pub struct ExpressionView {
    display_name: String,
    expression: Arc<dyn StatisticExpression>,
}

impl ExpressionView {
    /// The display name is normalized on construction (whitespace runs
    /// collapse to underscores).
    #[must_use]
    pub fn new(display_name: &str, expression: Arc<dyn StatisticExpression>) -> Self {
        Self {
            display_name: MetricIndex::normalize_display_name(display_name),
            expression,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn value(&self, snapshot: &StatisticsSnapshot) -> f64 {
        self.expression.value(snapshot)
    }
}

impl fmt::Debug for ExpressionView {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExpressionView")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Ordered registry of expression views. Registration order matters for
/// display; uniqueness is by normalized display name.
#[derive(Debug, Default)]
pub struct ExpressionViewRegistry {
    views: Vec<ExpressionView>,
    names: HashSet<String>,
}

impl ExpressionViewRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            views: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Returns false when a view with the same normalized name is already
    /// registered; the existing view wins.
    pub fn register(&mut self, view: ExpressionView) -> bool {
        if self.names.contains(view.display_name()) {
            return false;
        }
        self.names.insert(view.display_name().to_owned());
        self.views.push(view);
        true
    }

    #[must_use]
    pub fn views(&self) -> &[ExpressionView] {
        &self.views
    }

    #[must_use]
    pub fn find(&self, display_name: &str) -> Option<&ExpressionView> {
        self.views
            .iter()
            .find(|view| view.display_name() == display_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
