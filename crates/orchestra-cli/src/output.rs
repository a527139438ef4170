use colored::Colorize;
use orchestra_core::{EventPayload, OrchestraEvent, TaskStatus};
use orchestra_engine::TaskReport;

/// One terminal line per event; `None` for events not worth showing.
pub fn render_event(event: &OrchestraEvent, verbose: bool) -> Option<String> {
    let time = event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed();

    let line = match &event.payload {
        EventPayload::PlanCreated { plan } => format!(
            "{} plan v{} with {} steps ({})",
            "PLAN".blue().bold(),
            plan.version,
            plan.steps.len(),
            plan.mode.as_str()
        ),
        EventPayload::PlanUpdated { plan } => format!(
            "{} plan v{} installed with {} steps",
            "PLAN".blue().bold(),
            plan.version,
            plan.steps.len()
        ),
        EventPayload::AgentStart { order, action, .. } => format!(
            "{} #{} {}:{}",
            "START".cyan(),
            order,
            event.agent,
            action
        ),
        EventPayload::AgentAction { detail, .. } => {
            format!("{} {} {}", "NOTE".cyan(), event.agent, detail)
        }
        EventPayload::AgentResult { result, .. } => format!(
            "{} {} {}",
            "DONE".green(),
            event.agent,
            result.value.to_string().dimmed()
        ),
        EventPayload::AgentError {
            error,
            will_retry,
            attempt,
            ..
        } => {
            let tag = if *will_retry {
                "RETRY".yellow()
            } else {
                "FAIL".red()
            };
            format!("{} {} attempt {}: {}", tag, event.agent, attempt, error)
        }
        EventPayload::ToolCall { tool, arguments } => {
            format!("{} {} {}", "TOOL".magenta(), tool, arguments)
        }
        EventPayload::Replan {
            reason,
            previous_version,
            new_version,
            ..
        } => format!(
            "{} v{} -> v{}: {}",
            "REPLAN".yellow().bold(),
            previous_version,
            new_version,
            reason
        ),
        EventPayload::HumanApprovalRequired { reason, .. } => format!(
            "{} {}",
            "APPROVAL".magenta().bold(),
            reason.as_deref().unwrap_or("plan requires approval")
        ),
        EventPayload::StatusChanged { from, to } if verbose => {
            format!("{} {} -> {}", "STATUS".dimmed(), from.as_str(), to.as_str())
        }
        EventPayload::LogMessage { message } if verbose => message.dimmed().to_string(),
        EventPayload::WorkflowCompleted {
            status,
            duration_ms,
            ..
        } => format!(
            "{} {} in {} ms",
            "FINISHED".bold(),
            colored_status(*status),
            duration_ms
        ),
        _ => return None,
    };

    Some(format!("{time} {line}"))
}

pub fn colored_status(status: TaskStatus) -> String {
    match status {
        TaskStatus::Completed => status.as_str().green().bold().to_string(),
        TaskStatus::Failed => status.as_str().red().bold().to_string(),
        TaskStatus::Cancelled => status.as_str().yellow().bold().to_string(),
        _ => status.as_str().to_string(),
    }
}

pub fn print_report(report: &TaskReport) {
    println!();
    println!("{} {}", "Task".bold(), report.task_id);
    println!("  status:   {}", colored_status(report.status));
    println!("  duration: {} ms", report.duration_ms);
    println!("  progress: {:.0}%", report.progress * 100.0);
    println!("  replans:  {}", report.replan_count);
    println!("  results:  {}", report.results.len());

    for error in &report.errors {
        println!("  {} {}", "error:".red(), error);
    }
}
