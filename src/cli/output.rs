//! Output formatting for CLI commands.
//!
//! Every formatter returns a `String`; the binary decides where it goes.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::auth::{AccessToken, EndpointCheck, ProbeReport};
use crate::cloud::{ObservedState, RunState};
use crate::config::DeploymentTarget;
use crate::lifecycle::{DeleteReport, GroupOutcome};
use crate::planner::{ActionKind, DeploymentPlan, ExecutionReport, Outcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Execution result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Probe row for table display.
#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Endpoint")]
    url: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, target: &DeploymentTarget) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::new(plan, target)),
            OutputFormat::Text => Self::format_plan_text(plan, target),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, target: &DeploymentTarget) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nDeployment Plan for {target}");
        let _ = writeln!(output, "   Run: {}", plan.run_id);
        let _ = writeln!(
            output,
            "   Desired state: {}",
            &plan.fingerprint[..8.min(plan.fingerprint.len())]
        );
        let _ = writeln!(
            output,
            "   Observed: group {}, registry {}, instance {}\n",
            Self::presence(plan.observed.resource_group_exists),
            Self::presence(plan.observed.registry_exists),
            plan.observed.instance.summary()
        );

        if plan.is_empty() {
            let _ = writeln!(output, "{} Nothing to do.", "✓".green());
            return output;
        }

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_kind(a.kind),
                target: Self::truncate(&a.target, 40),
                reason: Self::truncate(&a.reason, 50),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} actions, {} destructive\n",
            plan.action_count(),
            plan.destructive_count().to_string().red()
        );

        output
    }

    /// Formats the results of an executed plan.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport, service_url: Option<&str>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ReportJson::new(report, service_url)),
            OutputFormat::Text => Self::format_report_text(report, service_url),
        }
    }

    fn format_report_text(report: &ExecutionReport, service_url: Option<&str>) -> String {
        let mut output = String::new();

        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .enumerate()
            .map(|(i, r)| ResultRow {
                index: i + 1,
                action: r.action.kind.to_string(),
                target: Self::truncate(&r.action.target, 40),
                outcome: Self::format_outcome(r.outcome),
                detail: Self::truncate(&r.detail, 60),
            })
            .collect();

        if !rows.is_empty() {
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let status = if report.cancelled {
            format!("{} Cancelled", "✗".red())
        } else if !report.succeeded() {
            format!("{} Deployment failed", "✗".red())
        } else if report.timed_out() {
            format!("{} Deployed, not yet confirmed running", "⚠".yellow())
        } else {
            format!("{} Deployment successful", "✓".green())
        };
        let _ = write!(output, "\n{status}\n{report}\n");

        if let Some(failure) = report.first_failure() {
            let _ = writeln!(
                output,
                "   First failure: {}: {}",
                failure.action.description(),
                failure.detail
            );
        }

        if let Some(url) = service_url {
            let _ = writeln!(output, "   Service URL: {}", url.cyan());
        }

        output
    }

    /// Formats the observed state of an instance.
    #[must_use]
    pub fn format_status(
        &self,
        target: &DeploymentTarget,
        state: &ObservedState,
        service_url: Option<&str>,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "target": target,
                "state": state,
                "service_url": service_url,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nInstance: {target}\n");
                let _ = writeln!(output, "   State: {}", Self::format_run_state(state.run_state));
                let _ = writeln!(output, "   Image: {}", Self::or_dash(state.current_image.as_deref()));
                let _ = writeln!(output, "   IP: {}", Self::or_dash(state.ip_address.as_deref()));
                let _ = writeln!(output, "   FQDN: {}", Self::or_dash(state.fqdn.as_deref()));
                let _ = writeln!(
                    output,
                    "   Started: {}",
                    state
                        .start_time
                        .map_or_else(|| String::from("-"), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                );
                let _ = writeln!(
                    output,
                    "   Last exit code: {}",
                    state
                        .last_exit_code
                        .map_or_else(|| String::from("-"), |c| c.to_string())
                );
                if let Some(url) = service_url {
                    let _ = writeln!(output, "   URL: {}", url.cyan());
                }
                output
            }
        }
    }

    /// Formats the outcome of a delete or cleanup.
    #[must_use]
    pub fn format_delete(&self, report: &DeleteReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(
                    output,
                    "   Instance: {}",
                    if report.instance_deleted { "deleted" } else { "not present" }
                );
                if report.registry_deleted {
                    let _ = writeln!(output, "   Registry: deleted");
                }
                match &report.group {
                    GroupOutcome::NotRequested => {}
                    GroupOutcome::Deleted => {
                        let _ = writeln!(output, "   Resource group: deleted");
                    }
                    GroupOutcome::Absent => {
                        let _ = writeln!(output, "   Resource group: not present");
                    }
                    GroupOutcome::Kept { remaining } => {
                        let _ = writeln!(
                            output,
                            "{} Resource group kept, it still holds: {}",
                            "⚠".yellow(),
                            remaining.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats a token. The raw token is shown only when `show` is set.
    #[must_use]
    pub fn format_token(&self, token: &AccessToken, show: bool) -> String {
        let value = if show { token.token.clone() } else { token.masked() };
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "access_token": value,
                "token_type": token.token_type,
                "expires_at": token.expires_at,
            })),
            OutputFormat::Text => format!(
                "Token: {value}\nType: {}\nExpires: {}\n",
                token.token_type,
                token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }

    /// Formats a probe report.
    #[must_use]
    pub fn format_probe(&self, report: &ProbeReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "healthy": report.healthy(),
                "report": report,
            })),
            OutputFormat::Text => {
                let rows: Vec<ProbeRow> = report.checks().into_iter().map(Self::probe_row).collect();
                let mut output = format!("\nServer: {}\n\n", report.base_url);
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                if report.tools.is_none() {
                    let _ = writeln!(output, "   /tools skipped (no token)");
                }
                let verdict = if report.healthy() {
                    format!("{} Server is healthy", "✓".green())
                } else {
                    format!("{} Server is unhealthy", "✗".red())
                };
                let _ = writeln!(output, "\n{verdict}");
                output
            }
        }
    }

    fn probe_row(check: &EndpointCheck) -> ProbeRow {
        ProbeRow {
            url: check.url.clone(),
            status: check.status_code.map_or_else(
                || "-".red().to_string(),
                |code| {
                    if check.healthy {
                        code.to_string().green().to_string()
                    } else {
                        code.to_string().red().to_string()
                    }
                },
            ),
            time: check
                .response_time_ms
                .map_or_else(|| String::from("-"), |ms| format!("{ms} ms")),
            error: Self::truncate(check.error.as_deref().unwrap_or(""), 50),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, kind: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": "error",
                "kind": kind,
                "message": message,
            })),
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, icon: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": status,
                "message": message,
            })),
            OutputFormat::Text => format!("{icon} {message}"),
        }
    }

    fn format_action_kind(kind: ActionKind) -> String {
        if kind.is_destructive() {
            format!("-{kind}").red().to_string()
        } else if matches!(kind, ActionKind::WaitForRunning) {
            kind.to_string().dimmed().to_string()
        } else {
            format!("+{kind}").green().to_string()
        }
    }

    fn format_outcome(outcome: Outcome) -> String {
        match outcome {
            Outcome::Success => outcome.to_string().green().to_string(),
            Outcome::Failed => outcome.to_string().red().to_string(),
            Outcome::Skipped => outcome.to_string().dimmed().to_string(),
            Outcome::TimeoutWarning => outcome.to_string().yellow().to_string(),
        }
    }

    fn format_run_state(state: RunState) -> String {
        match state {
            RunState::Running => state.to_string().green().to_string(),
            RunState::Creating => state.to_string().yellow().to_string(),
            RunState::Stopped | RunState::Terminated | RunState::Failed => {
                state.to_string().red().to_string()
            }
            RunState::Unknown => state.to_string().dimmed().to_string(),
        }
    }

    const fn presence(exists: bool) -> &'static str {
        if exists { "exists" } else { "absent" }
    }

    fn or_dash(value: Option<&str>) -> &str {
        value.unwrap_or("-")
    }

    /// Truncates a string to at most `max_len` characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson<'a> {
    run_id: String,
    target: &'a DeploymentTarget,
    fingerprint: &'a str,
    action_count: usize,
    destructive: usize,
    observed: &'a crate::cloud::ObservedTarget,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    kind: ActionKind,
    target: String,
    reason: String,
}

impl<'a> PlanJson<'a> {
    fn new(plan: &'a DeploymentPlan, target: &'a DeploymentTarget) -> Self {
        Self {
            run_id: plan.run_id.to_string(),
            target,
            fingerprint: &plan.fingerprint,
            action_count: plan.action_count(),
            destructive: plan.destructive_count(),
            observed: &plan.observed,
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    kind: a.kind,
                    target: a.target.clone(),
                    reason: a.reason.clone(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ReportJson<'a> {
    succeeded: bool,
    cancelled: bool,
    timed_out: bool,
    successful: usize,
    failed: usize,
    skipped: usize,
    service_url: Option<&'a str>,
    final_state: Option<&'a ObservedState>,
    results: Vec<ResultJson<'a>>,
}

#[derive(serde::Serialize)]
struct ResultJson<'a> {
    kind: ActionKind,
    target: &'a str,
    outcome: Outcome,
    detail: &'a str,
}

impl<'a> ReportJson<'a> {
    fn new(report: &'a ExecutionReport, service_url: Option<&'a str>) -> Self {
        Self {
            succeeded: report.succeeded(),
            cancelled: report.cancelled,
            timed_out: report.timed_out(),
            successful: report.successful(),
            failed: report.failed(),
            skipped: report.skipped(),
            service_url,
            final_state: report.final_state(),
            results: report
                .results
                .iter()
                .map(|r| ResultJson {
                    kind: r.action.kind,
                    target: &r.action.target,
                    outcome: r.outcome,
                    detail: &r.detail,
                })
                .collect(),
        }
    }
}
