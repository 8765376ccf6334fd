use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc};
use tracing::{error, info, warn};

use crate::error::CoreResult;
use crate::protocol::ConsoleMessage;
use crate::shutdown::ShutdownReceiver;

use super::aggregator::SampleAggregator;
use super::epoch_millis;
use super::listener::{ConsoleShutdownListener, ListenerSet};
use super::tracker::AgentReportTracker;

pub(in crate::coordinator) struct DispatchContext {
    pub(in crate::coordinator) aggregator: Arc<Mutex<SampleAggregator>>,
    pub(in crate::coordinator) tracker: AgentReportTracker,
    pub(in crate::coordinator) shutdown_listeners: Arc<ListenerSet<dyn ConsoleShutdownListener>>,
    pub(in crate::coordinator) run_error: Arc<Mutex<Option<String>>>,
}

/// Single-threaded message loop: blocks for the next inbound protocol
/// message and routes it by kind, strictly in arrival order. Terminates
/// when the transport closes the stream, on shutdown broadcast, or when
/// the report pipeline fails (losing report data silently is worse than
/// failing the run).
pub(in crate::coordinator) async fn dispatch_loop(
    mut inbox: mpsc::Receiver<ConsoleMessage>,
    context: DispatchContext,
    ready: Arc<Notify>,
    mut shutdown_rx: ShutdownReceiver,
) {
    ready.notify_one();
    info!("Console dispatch loop started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_message = inbox.recv() => {
                let Some(message) = maybe_message else { break };
                if let Err(err) = handle_message(&context, message) {
                    error!("Report pipeline failure, stopping dispatch loop: {}", err);
                    *context
                        .run_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                    break;
                }
            }
        }
    }
    info!("Console dispatch loop stopped");
}

fn handle_message(context: &DispatchContext, message: ConsoleMessage) -> CoreResult<()> {
    match message {
        ConsoleMessage::RegisterTests(msg) => {
            lock_aggregator(context).register_tests(&msg.tests);
            Ok(())
        }
        ConsoleMessage::ReportStatistics(msg) => {
            let counts = context.tracker.counts();
            let now_ms = epoch_millis();
            lock_aggregator(context).on_report_statistics(&msg.deltas, now_ms, counts)
        }
        ConsoleMessage::RegisterExpressionView(msg) => {
            let result = lock_aggregator(context).register_view(&msg.display_name, &msg.formula);
            if let Err(err) = result {
                warn!("Rejected expression view {}: {}", msg.display_name, err);
            }
            Ok(())
        }
        ConsoleMessage::ProcessReport(msg) => {
            let before_first_sample = lock_aggregator(context).sampling_count() == 0;
            if let Some(reason) = context.tracker.on_report(&msg.reports, before_first_sample) {
                context
                    .shutdown_listeners
                    .apply("shutdown signal", |listener| listener.ready_to_stop(reason));
            }
            Ok(())
        }
    }
}

fn lock_aggregator(context: &DispatchContext) -> MutexGuard<'_, SampleAggregator> {
    context
        .aggregator
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
