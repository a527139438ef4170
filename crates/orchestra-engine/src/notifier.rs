use orchestra_core::{EventBus, EventPayload, ExecutionContext, OrchestraEvent, TaskStatus};

/// Agent name used on events the orchestrator raises about itself.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";

/// Publishes lifecycle events and keeps the task log in step with them.
#[derive(Clone)]
pub(crate) struct Notifier {
    bus: EventBus,
    publish_logs: bool,
}

impl Notifier {
    pub(crate) fn new(bus: EventBus, publish_logs: bool) -> Self {
        Self { bus, publish_logs }
    }

    pub(crate) async fn emit(&self, ctx: &ExecutionContext, agent: &str, payload: EventPayload) {
        self.bus
            .publish(OrchestraEvent::new(ctx.task_id(), agent, payload))
            .await;
    }

    /// Appends to the task log and mirrors the line as a `LogMessage` event.
    pub(crate) async fn log(&self, ctx: &ExecutionContext, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[{}] {}", ctx.task_id(), message);
        ctx.log(message.clone());

        if self.publish_logs {
            self.emit(ctx, ORCHESTRATOR_AGENT, EventPayload::LogMessage { message })
                .await;
        }
    }

    pub(crate) async fn set_status(&self, ctx: &ExecutionContext, status: TaskStatus) {
        let previous = ctx.set_status(status);
        if previous == status {
            return;
        }

        log::info!(
            "[{}] Status {} -> {}",
            ctx.task_id(),
            previous.as_str(),
            status.as_str()
        );
        self.emit(
            ctx,
            ORCHESTRATOR_AGENT,
            EventPayload::StatusChanged {
                from: previous,
                to: status,
            },
        )
        .await;
    }
}
