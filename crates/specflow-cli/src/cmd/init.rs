use anyhow::Context;
use specflow_core::{config::Config, io, paths, roadmap::Roadmap};
use std::path::Path;

pub fn run(root: &Path, title: Option<&str>) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    println!("Initializing specflow in: {}", root.display());

    // 1. Create .specflow directory structure
    let dirs = [
        paths::SPECFLOW_DIR,
        paths::PHASES_DIR,
        paths::BACKLOG_DIR,
        paths::ARCHIVE_DIR,
    ];
    for dir in dirs {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    // 2. Write config.yaml if missing
    let config = if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to load config")?
    } else {
        let cfg = Config::new(&project_name);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    // 3. Write the roadmap skeleton if missing
    let roadmap_path = config.roadmap_path(root);
    let skeleton = Roadmap::skeleton(title.unwrap_or(&config.project.name)).render();
    if io::write_if_missing(&roadmap_path, skeleton.as_bytes())
        .with_context(|| format!("failed to write {}", roadmap_path.display()))?
    {
        println!("  created: {}", config.roadmap.path);
    } else {
        println!("  exists:  {}", config.roadmap.path);
    }

    // 4. Keep lock and backups out of version control
    for entry in [paths::LOCK_FILE, paths::BACKUPS_DIR] {
        io::ensure_gitignore_entry(root, entry).context("failed to update .gitignore")?;
    }

    println!("\nspecflow initialized. Add phase rows to the roadmap, then run: specflow phase list");
    Ok(())
}
