//! Confirmation, execution and result reporting

use anyhow::Result;
use colored::Colorize;

use reconcile::{ConfirmCallback, ExecutionReport, Plan, RemoteApi, apply};

use super::differ::display_plan;
use crate::progress::BarProgress;
use crate::ui;

/// Options for execution (includes `yes` for confirmation skip)
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Leave the remote store untouched
    pub dry_run: bool,
    /// `api` is a disposable copy, so a dry run may apply to it
    pub simulated: bool,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Skip confirmation prompts
    pub yes: bool,
    pub fail_fast: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            simulated: false,
            jobs: 1,
            yes: false,
            fail_fast: false,
        }
    }
}

/// Confirmation through an interactive prompt
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(std::io::Error::other)
    }
}

/// Display the plan, confirm, and apply it through `api`.
///
/// Returns `None` when there was nothing to do or the user declined.
pub fn execute(
    plan: &Plan,
    api: &dyn RemoteApi,
    opts: &ExecuteOptions,
    confirm: &mut dyn ConfirmCallback,
) -> Result<Option<ExecutionReport>> {
    display_plan(plan);
    if !plan.has_changes() {
        return Ok(None);
    }

    println!();
    if !opts.yes && !opts.dry_run && !confirm.confirm("Apply these changes?")? {
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }
    if opts.dry_run && opts.simulated {
        println!(
            "  {} Dry run: applying to a simulated copy of the remote store",
            "ℹ".blue()
        );
    } else if opts.dry_run {
        println!("  {} Dry run: no remote calls will be made", "ℹ".blue());
    }

    let options = reconcile::ExecuteOptions {
        dry_run: opts.dry_run && !opts.simulated,
        jobs: opts.jobs.max(1),
        fail_fast: opts.fail_fast,
    };
    let report = apply(plan, api, &options, &mut BarProgress::new());
    print_report(&report, opts.dry_run);
    Ok(Some(report))
}

/// Print final summary
pub fn print_report(report: &ExecutionReport, dry_run: bool) {
    println!();
    let suffix = if dry_run { " (dry run)" } else { "" };
    if report.is_success() && report.skipped.is_empty() {
        println!("  {} Apply complete{suffix}", "✓".green().bold());
    } else if report.is_success() {
        println!(
            "  {} Apply complete with skipped entries{suffix}",
            "⚠".yellow().bold()
        );
    } else {
        println!("  {} Apply finished with errors{suffix}", "⚠".yellow().bold());
    }

    let count = |action: reconcile::Action| {
        report
            .succeeded
            .iter()
            .filter(|s| s.pass == reconcile::Pass::Apply && s.action == action)
            .count()
    };
    let created = count(reconcile::Action::Create);
    let updated = count(reconcile::Action::Update);
    let deleted = count(reconcile::Action::Delete);
    let patched = report
        .succeeded
        .iter()
        .filter(|s| s.pass == reconcile::Pass::Resolve)
        .count();

    if created > 0 {
        println!("    • {created} created");
    }
    if updated > 0 {
        println!("    • {updated} updated");
    }
    if deleted > 0 {
        println!("    • {deleted} deleted");
    }
    if patched > 0 {
        println!("    • {patched} with references patched");
    }
    if report.unchanged > 0 {
        ui::dim(&format!("  {} unchanged", report.unchanged));
    }
    for skipped in &report.skipped {
        println!(
            "    {} {} {} {}",
            "⊘".dimmed(),
            skipped.kind,
            skipped.target,
            format!("skipped: {}", skipped.reason).dimmed()
        );
    }
    for failed in &report.failed {
        ui::error(&format!(
            "{} {} {} ({}): {}",
            failed.action,
            failed.kind,
            failed.target,
            failed.pass,
            failed.error
        ));
    }
}
