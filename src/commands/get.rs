//! Export remote entities in manifest form

use anyhow::{Context as _, Result};
use std::fs;

use reconcile::{EntityKind, RawManifest, RemoteSnapshot};

use super::apply::{connect, fetch};
use crate::Context;
use crate::cli::{GetArgs, OutputFormat};
use crate::ui;

pub fn run(ctx: &Context, args: GetArgs) -> Result<()> {
    let (_, client) = connect(ctx)?;
    // Every kind is listed so links render as manifest ids.
    let (_, snapshot) = fetch(&client)?;
    let manifests = export(&snapshot, args.kind, args.all);
    let content = render(&manifests, args.format)?;

    match args.output {
        Some(path) => {
            fs::write(&path, content)
                .with_context(|| format!("Could not write {}", path.display()))?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Wrote {} to {}",
                    ui::plural(manifests.len(), "manifest"),
                    path.display()
                ));
            }
        }
        None => print!("{content}"),
    }
    Ok(())
}

/// Entities of `kind` as manifests; unmanaged ones only with `all`
pub fn export(snapshot: &RemoteSnapshot, kind: EntityKind, all: bool) -> Vec<RawManifest> {
    snapshot
        .entities()
        .filter(|e| e.kind == kind && (all || e.is_managed()))
        .map(RawManifest::from_remote)
        .collect()
}

pub fn render(manifests: &[RawManifest], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(manifests).context("Could not encode YAML"),
        OutputFormat::Json => {
            let mut json =
                serde_json::to_string_pretty(manifests).context("Could not encode JSON")?;
            json.push('\n');
            Ok(json)
        }
    }
}
