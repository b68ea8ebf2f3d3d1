//! Plan display

use colored::{ColoredString, Colorize};
use similar::{ChangeTag, TextDiff};

use reconcile::summary::{EntrySummary, LineKind, describe};
use reconcile::{Action, Attribute, ChangeKey, Orphan, Plan, Value};

fn action_symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Delete => "-".red(),
        Action::NoOp => "=".dimmed(),
    }
}

fn line_symbol(kind: LineKind) -> ColoredString {
    match kind {
        LineKind::Added => kind.symbol().green(),
        LineKind::Changed => kind.symbol().yellow(),
        LineKind::Removed => kind.symbol().red(),
    }
}

/// Display every entry that changes remote state, then the summary
pub fn display_plan(plan: &Plan) {
    let entries = describe(plan);
    if entries.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        display_orphans(plan);
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Plan".bold()
    );
    println!("│");
    for entry in &entries {
        display_entry(plan, entry);
        println!("│");
    }
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ Summary: {}", plan.summary().to_string().bold());
    println!("└─────────────────────────────────────────────────────┘");
    display_orphans(plan);
}

fn display_entry(plan: &Plan, entry: &EntrySummary) {
    println!(
        "│ {} {} {}",
        action_symbol(entry.action),
        entry.kind.to_string().dimmed(),
        entry.target.as_str().bold()
    );
    for line in &entry.lines {
        let detail = match (&line.before, &line.after) {
            (Some(before), Some(after)) => format!("{} → {}", before.dimmed(), after),
            (None, Some(after)) => after.clone(),
            (Some(before), None) => before.dimmed().to_string(),
            (None, None) => String::new(),
        };
        println!("│     {} {:<24} {}", line_symbol(line.kind), line.key, detail);
    }

    if let Some((old, new)) = body_change(plan, entry)
        && old.lines().count() + new.lines().count() > 2
    {
        for (tag, text) in body_diff(&old, &new) {
            let rendered = match tag {
                ChangeTag::Insert => format!("+ {text}").green(),
                ChangeTag::Delete => format!("- {text}").red(),
                ChangeTag::Equal => format!("  {text}").dimmed(),
            };
            println!("│         {rendered}");
        }
    }

    for deferred in &entry.deferred {
        println!("│     {} {} {}", "↻".cyan(), deferred, "(after creation)".dimmed());
    }
}

fn body_change(plan: &Plan, entry: &EntrySummary) -> Option<(String, String)> {
    let change = plan
        .entry(entry.target.as_str())?
        .changes
        .changed
        .get(&ChangeKey::Attribute(Attribute::Body))?;
    match (&change.old, &change.new) {
        (Value::Text(old), Value::Text(new)) => Some((old.clone(), new.clone())),
        _ => None,
    }
}

/// Line diff of two bodies, without trailing newlines
pub fn body_diff(old: &str, new: &str) -> Vec<(ChangeTag, String)> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .map(|change| (change.tag(), change.value().trim_end_matches('\n').to_string()))
        .collect()
}

/// List managed entities that no manifest declares, and those a prune or
/// destroy keeps because something still links to them
pub fn display_orphans(plan: &Plan) {
    if !plan.retained.is_empty() {
        println!();
        println!(
            "  {} {} managed entities kept: still referenced",
            "ℹ".blue(),
            plan.retained.len()
        );
        for kept in &plan.retained {
            println!(
                "    • {} {} {}",
                kept.kind,
                kept.id,
                format!("(#{})", kept.remote_id).dimmed()
            );
        }
    }

    let pending = unhandled_orphans(plan);
    if pending.is_empty() {
        return;
    }
    println!();
    println!(
        "  {} {} managed entities have no manifest (use --prune to delete them):",
        "⚠".yellow(),
        pending.len()
    );
    for orphan in pending {
        println!(
            "    • {} {} {}",
            orphan.kind,
            orphan.id,
            format!("(#{})", orphan.remote_id).dimmed()
        );
    }
}

/// Orphans the plan neither deletes nor deliberately keeps
fn unhandled_orphans(plan: &Plan) -> Vec<&Orphan> {
    plan.orphans
        .iter()
        .filter(|orphan| {
            !plan.retained.iter().any(|kept| kept.id == orphan.id)
                && plan
                    .entry(orphan.id.as_str())
                    .is_none_or(|e| e.action != Action::Delete)
        })
        .collect()
}
