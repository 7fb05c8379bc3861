use crate::cmd::reconcile::print_mismatches;
use crate::output::print_json;
use anyhow::Context;
use specflow_core::{
    git::GitCli,
    reconcile,
    registry::Registry,
    types::{PhaseStatus, WorkflowStep},
};
use std::path::Path;

fn step_label(step: Option<WorkflowStep>) -> String {
    step.map(|s| format!("{} ({})", s.as_str(), s.index()))
        .unwrap_or_else(|| "-".to_string())
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let reg = Registry::load(root).context("failed to load roadmap")?;
    let records = reg.records()?;
    let git = GitCli::new(root, reg.config.git.remote.clone());
    let report = reconcile::evaluate(&reg, &git)?;

    let counts: Vec<(PhaseStatus, usize)> = PhaseStatus::all()
        .iter()
        .map(|s| (*s, records.iter().filter(|r| r.status == *s).count()))
        .collect();

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(s, n)| (s.as_str().to_string(), serde_json::json!(n)))
            .collect();
        print_json(&serde_json::json!({
            "project": reg.config.project.name,
            "phases": records.len(),
            "by_status": by_status,
            "backlog": reg.backlog().len(),
            "warnings": reg.parse_warnings().len(),
            "report": report,
        }))?;
        return Ok(());
    }

    println!("Project:  {}", reg.config.project.name);
    let summary: Vec<String> = counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(s, n)| format!("{} {n}", s.glyph()))
        .collect();
    println!("Phases:   {}  {}", records.len(), summary.join("  "));
    println!("Backlog:  {}", reg.backlog().len());
    if !reg.parse_warnings().is_empty() {
        println!("Warnings: {} malformed row(s)", reg.parse_warnings().len());
    }

    println!();
    match (report.phase, report.name.as_deref()) {
        (Some(n), Some(name)) => println!("Current:  {n} - {name}"),
        (Some(n), None) => println!("Current:  {n}"),
        _ => println!("Current:  none"),
    }
    if let Some(status) = report.roadmap_status {
        println!("Status:   {} {}", status.glyph(), status.label());
    }
    println!("Step:     {}", step_label(report.effective_step));
    if report.tasks.total > 0 {
        println!("Tasks:    {}/{}", report.tasks.checked, report.tasks.total);
    }
    if report.git.available {
        println!(
            "Branch:   {} (expected {})",
            report.git.current_branch.as_deref().unwrap_or("(detached)"),
            report.git.expected_branch
        );
    }
    println!("Next:     {} ({})", report.recommendation.action, report.recommendation.message);
    println!();
    print_mismatches(&report);
    Ok(())
}
