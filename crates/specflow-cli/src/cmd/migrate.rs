use crate::output::{print_json, print_table};
use specflow_core::registry;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let out = registry::migrate_legacy_widths(root)?;
    if json {
        print_json(&out)?;
        return Ok(());
    }
    if out.migrated.is_empty() {
        println!("No legacy-width keys found.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = out
        .migrated
        .iter()
        .map(|m| vec![m.kind.to_string(), m.from.clone(), m.to.to_string()])
        .collect();
    print_table(&["KIND", "FROM", "TO"], rows);
    if let Some(backup) = &out.backup {
        println!("\nBackup: {}", backup.display());
    }
    Ok(())
}
