//! `plan`, `apply` and `destroy`

use anyhow::{Context as _, Result, bail};
use std::path::{Path, PathBuf};

use elabapi::Client;
use reconcile::{
    EntityKind, InMemoryRemote, ManifestSet, Plan, PlanOptions, RawRecord, RemoteApi,
    RemoteSnapshot, build_destroy_plan, build_plan,
};

use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs, PlanArgs, SourceArgs};
use crate::config::Config;
use crate::engine::{self, ExecuteOptions, PromptConfirm};
use crate::{loader, progress, ui, version};

/// Raw records of every kind, in listing order
pub type Records = Vec<(EntityKind, RawRecord)>;

/// Load the config and open a client for the profile in effect
pub fn connect(ctx: &Context) -> Result<(Config, Client)> {
    let config = Config::load()?;
    let profile = config.resolve(&ctx.overrides)?;
    log::info!(
        "Profile '{}': {}",
        config.profile_name(&ctx.overrides),
        profile.host_url
    );
    let client = Client::new(&profile.client_config()).context("Could not create API client")?;
    Ok((config, client))
}

/// List every kind and decode the remote state
pub fn fetch(api: &dyn RemoteApi) -> Result<(Records, RemoteSnapshot)> {
    let pb = progress::spinner("Fetching remote state...");
    let mut records = Vec::new();
    for kind in EntityKind::ALL {
        pb.set_message(format!("Listing {kind} records..."));
        match api.list(kind) {
            Ok(listed) => records.extend(listed.into_iter().map(|record| (kind, record))),
            Err(err) => {
                progress::finish_error(&pb, &format!("Could not list {kind} records"));
                return Err(err).with_context(|| format!("Listing {kind} records failed"));
            }
        }
    }

    let snapshot =
        RemoteSnapshot::decode(records.clone()).context("Could not decode remote state")?;
    progress::finish_success(
        &pb,
        &format!(
            "Fetched {} entities ({} managed)",
            snapshot.len(),
            snapshot.len() - snapshot.unmanaged().count()
        ),
    );
    Ok((records, snapshot))
}

/// Manifest path from the command line, the config, or the current directory
pub fn manifest_path(config: &Config, explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .or_else(|| config.manifest_dir())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Directory whose git state provides the version tag
fn version_dir(path: &Path) -> &Path {
    if path.is_file() {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    } else {
        path
    }
}

fn load_source(
    ctx: &Context,
    config: &Config,
    source: &SourceArgs,
) -> Result<(ManifestSet, String)> {
    let path = manifest_path(config, source.manifests.as_ref());
    let set = loader::load(&path)?;
    let version = version::resolve(source.version_tag.as_deref(), version_dir(&path));
    if ctx.verbose > 0 && !ctx.quiet {
        ui::kv("Manifests", &format!("{} ({})", path.display(), set.len()));
        ui::kv("Version", &version);
    }
    Ok((set, version))
}

pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let (config, client) = connect(ctx)?;
    let (set, version) = load_source(ctx, &config, &args.source)?;
    let (_, snapshot) = fetch(&client)?;
    let options = PlanOptions {
        version,
        prune: args.prune,
    };
    let plan = build_plan(&set, &snapshot, &options).context("Could not build plan")?;
    engine::differ::display_plan(&plan);
    Ok(())
}

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let (config, client) = connect(ctx)?;
    let (set, version) = load_source(ctx, &config, &args.source)?;
    let (records, snapshot) = fetch(&client)?;
    let options = PlanOptions {
        version,
        prune: args.prune,
    };
    let plan = build_plan(&set, &snapshot, &options).context("Could not build plan")?;
    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        jobs: args.jobs,
        yes: args.yes,
        fail_fast: args.fail_fast,
        ..ExecuteOptions::default()
    };
    run(&plan, &client, records, &opts)
}

pub fn destroy(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let (config, client) = connect(ctx)?;
    let scope = if args.all {
        None
    } else {
        Some(loader::load(&manifest_path(&config, args.manifests.as_ref()))?)
    };
    let (records, snapshot) = fetch(&client)?;
    let plan = build_destroy_plan(&snapshot, scope.as_ref()).context("Could not build plan")?;
    if args.all && plan.has_changes() {
        ui::warn("Every entity managed by elabctl on this instance will be deleted");
    }
    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        ..ExecuteOptions::default()
    };
    run(&plan, &client, records, &opts)
}

/// Execute against the instance, or against a seeded simulation for dry runs
fn run(plan: &Plan, client: &Client, records: Records, opts: &ExecuteOptions) -> Result<()> {
    let report = if opts.dry_run {
        let simulated = InMemoryRemote::with_records(records);
        let opts = ExecuteOptions {
            simulated: true,
            ..opts.clone()
        };
        engine::execute(plan, &simulated, &opts, &mut PromptConfirm)?
    } else {
        engine::execute(plan, client, opts, &mut PromptConfirm)?
    };

    match report {
        Some(report) if !report.is_success() => {
            bail!(
                "{} of {} changes failed",
                report.failed.len(),
                report.failed.len() + report.succeeded.len()
            )
        }
        _ => Ok(()),
    }
}
