use crate::output::print_json;
use anyhow::Context;
use specflow_core::{git::GitCli, reconcile, registry::Registry};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let reg = Registry::load(root).context("failed to load roadmap")?;
    let git = GitCli::new(root, reg.config.git.remote.clone());
    let report = reconcile::evaluate(&reg, &git)?;
    let rec = &report.recommendation;

    if json {
        print_json(&serde_json::json!({
            "phase": report.phase,
            "action": rec.action,
            "message": rec.message,
            "ready": rec.ready,
            "rule": rec.rule,
        }))?;
        return Ok(());
    }

    if let Some(n) = report.phase {
        println!("Phase:    {n}");
    }
    println!("Action:   {}", rec.action);
    println!("Message:  {}", rec.message);
    if !rec.ready {
        println!("Ready:    no (resolve this before continuing)");
    }
    Ok(())
}
