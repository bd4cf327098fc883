//! Command implementations for the scopestore CLI.

use crate::output::{self, OutputFormat};
use crate::project::Project;
use anyhow::{Context, Result, bail};
use scopestore_core::StoreConfig;
use scopestore_core::types::{ChangedFiles, ExternalChanges};
use scopestore_store::SaveSession;
use scopestore_vfs::{ChangeTracker, FileWatcher, WatcherConfig};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct ScopeSummary {
    name: String,
    dir: String,
    components: Vec<ComponentSummary>,
}

#[derive(Serialize)]
struct ComponentSummary {
    name: String,
    file: String,
    state: Option<serde_json::Value>,
}

fn open(project: &Path, config: &StoreConfig) -> Result<Project> {
    Project::open(project, config)
        .with_context(|| format!("Failed to open project {}", project.display()))
}

/// List the storage files a save of the project would touch
pub fn list_files(
    project: &Path,
    own_only: bool,
    config: &StoreConfig,
    format: OutputFormat,
) -> Result<()> {
    let project = open(project, config)?;

    let mut session = project.root().start_save();
    let files = session.all_storage_files(!own_only);
    session.reset()?;

    if format.is_json() {
        return output::json(&files);
    }

    output::header(format!(
        "Storage files of '{}'{}",
        project.manifest.name,
        if own_only { "" } else { " and its modules" }
    ));
    if files.is_empty() {
        output::info("No storage files");
        return Ok(());
    }
    for file in &files {
        println!("  {}", file);
    }
    Ok(())
}

/// Show scopes, components and where they are stored
pub fn show(project: &Path, config: &StoreConfig, format: OutputFormat) -> Result<()> {
    let project = open(project, config)?;

    let summaries: Vec<ScopeSummary> = project
        .scopes()
        .iter()
        .map(|scope| ScopeSummary {
            name: scope.name.clone(),
            dir: scope.dir.display().to_string(),
            components: scope
                .components
                .iter()
                .map(|(name, component)| ComponentSummary {
                    name: name.clone(),
                    file: scope
                        .store
                        .storage_of(name)
                        .map(|u| u.to_string())
                        .unwrap_or_default(),
                    state: component.get(),
                })
                .collect(),
        })
        .collect();

    if format.is_json() {
        return output::json(&summaries);
    }

    for scope in &summaries {
        output::header(&scope.name);
        output::kv("Directory", &scope.dir);
        if scope.components.is_empty() {
            output::info("No components");
            continue;
        }

        let rows = scope.components.iter().map(|component| {
            let state = component
                .state
                .as_ref()
                .map(|v| output::preview(v, 60))
                .unwrap_or_else(|| "-".to_string());
            vec![component.name.clone(), component.file.clone(), state]
        });
        println!("{}", output::table(&["Component", "File", "State"], rows));
    }
    Ok(())
}

/// Set one component's state and save the tree
pub fn set(
    project: &Path,
    scope: &str,
    component: &str,
    value: &str,
    config: &StoreConfig,
) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(value).context("State must be valid JSON")?;
    let mut project = open(project, config)?;

    let target = project.component_or_create(scope, component)?;
    target.set(value);
    project.root().save()?;

    output::success(format!("Saved '{}' in scope '{}'", component, scope));
    Ok(())
}

/// Save the whole tree
pub fn save(project: &Path, config: &StoreConfig, format: OutputFormat) -> Result<()> {
    let project = open(project, config)?;

    let mut session = project.root().start_save();
    let mut readonly = Vec::new();
    let staged = session.save(&mut readonly);

    if !readonly.is_empty() {
        session.reset()?;
        for file in &readonly {
            output::warning(format!("{} ({}) is read-only", file.unit, file.scope));
        }
        bail!("Save aborted: {} read-only file(s)", readonly.len());
    }

    let files = session.storage_files_to_save(true);
    let finished = session.finish_save();
    staged?;
    finished?;

    if format.is_json() {
        return output::json(&files);
    }
    if files.is_empty() {
        output::info("Nothing to save");
    } else {
        output::success(format!("Wrote {} file(s)", files.len()));
    }
    Ok(())
}

/// Watch the project for external edits and reload what changed
pub async fn watch(project: &Path, config: &StoreConfig) -> Result<()> {
    let project = open(project, config)?;

    let mut watcher = FileWatcher::with_config(&project.dir, WatcherConfig::from(&config.watcher))
        .context("Failed to start watching")?;
    let tracker = ChangeTracker::new();

    output::info(format!(
        "Watching {} (Ctrl-C to stop)",
        project.dir.display()
    ));

    loop {
        tokio::select! {
            batch = watcher.recv() => {
                let Some(batch) = batch else {
                    warn!("Change feed closed");
                    break;
                };
                tracker.record_events(&batch);
                reconcile(&project, tracker.take_snapshot())?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }
    Ok(())
}

/// Analyze a snapshot of changes and reload or ask what to do
fn reconcile(project: &Project, changed: ChangedFiles) -> Result<()> {
    let mut session = project.root().start_save();
    let known = session.all_storage_files(true);
    let relevant: ChangedFiles = project
        .attribute(changed)
        .into_iter()
        .filter(|file| known.contains(&file.unit))
        .collect();

    if relevant.is_empty() {
        session.reset()?;
        return Ok(());
    }

    let changes = session.analyze_external_changes(&relevant);
    session.reset()?;

    match changes {
        ExternalChanges::Unreloadable => {
            output::warning("Storage files changed in a way that cannot be reloaded safely");
            if output::confirm("Reload the whole project from disk?")? {
                let all = project.all_component_names();
                match project.root().reinit_components(&all, true) {
                    Ok(()) => output::success(format!("Reloaded {} component(s)", all.len())),
                    Err(e) => output::error(format!("Reload failed: {}", e)),
                }
            } else {
                output::info("Keeping in-memory state; the next save overwrites the files");
            }
        }
        ExternalChanges::Reloadable(names) if names.is_empty() => {
            debug!("No component changed on disk");
        }
        ExternalChanges::Reloadable(names) => {
            if !project.root().is_reload_possible(&names) {
                output::warning("A scope refused to reload the changed components");
                return Ok(());
            }
            project.root().reinit_components(&names, true)?;
            let list: Vec<String> = names.iter().map(|n| n.to_string()).collect();
            output::success(format!("Reloaded {}", list.join(", ")));
        }
    }
    Ok(())
}
