use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use poetrytool_core::analyze::analyze;
use poetrytool_core::assign::{
    AssignCommand, AssignPrompt, PoemPrompt, apply_suggestions, random_assign, run_manual_session,
    suggest, unlink_image, unlinked_images, unlinked_poems,
};
use poetrytool_core::backup::{
    create_backup, latest_backup, list_backups, load_manifest, resolve_backup, restore_backup,
    verify_backup,
};
use poetrytool_core::config::{PoetryConfig, load_config, save_config, write_default_config};
use poetrytool_core::consumer::ConsumerUpdate;
use poetrytool_core::layout::{
    load_mappings, poem_web_paths, refresh_image_headers, renumber_poems, restructure_to_folders,
};
use poetrytool_core::migrate::{ItemFailure, Migrator, PhaseSummary};
use poetrytool_core::poem::{
    NewPoem, PoemFilter, PoemSummary, PoemUpdate, create_poem, delete_poem, list_poems,
    resolve_poem, search_poems, show_poem, update_poem,
};
use poetrytool_core::registry::{POEM_ID_PREFIX, Registry, format_id};
use poetrytool_core::runtime::{
    ContentLayout, PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime,
    resolve_paths,
};
use poetrytool_core::stats::{CollectionStats, collection_stats};
use poetrytool_core::validate::{
    IntegrityReport, MIN_IMAGE_AVAILABILITY_RATE, MIN_POEM_LOAD_RATE, ReadinessReport,
    test_website_readiness, validate_integrity,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "poetrytool",
    version,
    about = "Registry, migration and validation pipeline for the poetry site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write the default config and state directories")]
    Init,
    #[command(about = "Scan the legacy layout and report discrepancies")]
    Analyze,
    Registry(RegistryArgs),
    #[command(about = "Backup, assign IDs, move files and sync loader scripts")]
    Migrate(MigrateArgs),
    #[command(about = "Restore poems, images, scripts and registry from a backup")]
    Rollback(RollbackArgs),
    #[command(name = "sync-consumers", about = "Regenerate loader script path arrays")]
    SyncConsumers(SyncConsumersArgs),
    Assign(AssignArgs),
    #[command(about = "Check registry and file integrity")]
    Validate,
    #[command(about = "Check whether the site would load")]
    Readiness,
    #[command(about = "Statistics, integrity and readiness together")]
    Report(ReportArgs),
    #[command(about = "Collection statistics")]
    Stats,
    Poem(PoemArgs),
    Backup(BackupArgs),
    #[command(about = "Convert the flat ID layout into one folder per poem")]
    Restructure(RestructureArgs),
    #[command(about = "Show the legacy mapping written by restructure")]
    Mapping,
    #[command(about = "Close gaps in poem IDs and move files to match")]
    Renumber(RenumberArgs),
    Vocab(VocabArgs),
}

#[derive(Debug, Args)]
struct RegistryArgs {
    #[command(subcommand)]
    command: RegistrySubcommand,
}

#[derive(Debug, Subcommand)]
enum RegistrySubcommand {
    #[command(about = "Register discovered poems and images without moving files")]
    Generate,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(long, help = "Apply the migration instead of printing the plan")]
    yes: bool,
}

#[derive(Debug, Args)]
struct RollbackArgs {
    #[arg(
        long,
        value_name = "NAME_OR_PATH",
        help = "Backup to restore (defaults to the newest)"
    )]
    backup: Option<String>,
}

#[derive(Debug, Args)]
struct SyncConsumersArgs {
    #[arg(long, help = "Print a diff instead of writing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct AssignArgs {
    #[command(subcommand)]
    command: AssignSubcommand,
}

#[derive(Debug, Subcommand)]
enum AssignSubcommand {
    #[command(about = "List unlinked poems and images")]
    List,
    #[command(about = "Link images to poems interactively")]
    Manual,
    #[command(about = "Suggest links by title and filename similarity")]
    Suggest {
        #[arg(long, help = "Link every suggestion")]
        apply: bool,
    },
    #[command(about = "Pair unlinked poems and images at random")]
    Random {
        #[arg(long, help = "Confirm random pairing")]
        yes: bool,
    },
    #[command(about = "Release the image linked to a poem")]
    Unlink {
        #[arg(value_name = "POEM")]
        reference: String,
    },
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[arg(long, help = "Emit JSON instead of status lines")]
    json: bool,
}

#[derive(Debug, Args)]
struct PoemArgs {
    #[command(subcommand)]
    command: PoemSubcommand,
}

#[derive(Debug, Subcommand)]
enum PoemSubcommand {
    #[command(about = "Create a poem under the next ID")]
    Add(PoemAddArgs),
    #[command(about = "List poems, optionally filtered")]
    List(PoemListArgs),
    #[command(about = "Show one poem's record and text")]
    Show {
        #[arg(value_name = "POEM", help = "ID, number or legacy file name")]
        reference: String,
    },
    #[command(about = "Change a poem's metadata or text")]
    Edit(PoemEditArgs),
    #[command(about = "Remove a poem and release its image")]
    Delete {
        #[arg(value_name = "POEM")]
        reference: String,
        #[arg(long, help = "Confirm deletion")]
        yes: bool,
    },
    #[command(about = "Find poems by title or text")]
    Search { query: String },
}

#[derive(Debug, Args)]
struct PoemListArgs {
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    form: Option<String>,
    #[arg(long)]
    length: Option<String>,
    #[arg(long)]
    author: Option<String>,
}

#[derive(Debug, Args)]
struct PoemEditArgs {
    #[arg(value_name = "POEM")]
    reference: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    form: Option<String>,
    #[arg(long)]
    length: Option<String>,
    #[arg(long, conflicts_with = "content_file", help = "New poem body")]
    content: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read the new body from a file")]
    content_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PoemAddArgs {
    #[arg(long)]
    title: String,
    #[arg(long, help = "Defaults to the configured author")]
    author: Option<String>,
    #[arg(long, default_value = "en")]
    language: String,
    #[arg(long, default_value = "Free Verse")]
    form: String,
    #[arg(long, default_value = "Standard")]
    length: String,
    #[arg(long, conflicts_with = "content_file", help = "Poem body")]
    content: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read the poem body from a file")]
    content_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[command(subcommand)]
    command: BackupSubcommand,
}

#[derive(Debug, Subcommand)]
enum BackupSubcommand {
    Create {
        #[arg(long, default_value = "manual backup")]
        description: String,
    },
    List,
    Verify {
        #[arg(value_name = "NAME_OR_PATH")]
        backup: String,
    },
    Restore {
        #[arg(value_name = "NAME_OR_PATH")]
        backup: String,
        #[arg(long, help = "Confirm overwriting current content")]
        yes: bool,
    },
}

#[derive(Debug, Args)]
struct RestructureArgs {
    #[arg(long, help = "Apply the restructure")]
    yes: bool,
}

#[derive(Debug, Args)]
struct RenumberArgs {
    #[arg(long, help = "Apply the renumbering")]
    yes: bool,
}

#[derive(Debug, Args)]
struct VocabArgs {
    #[command(subcommand)]
    command: VocabSubcommand,
}

#[derive(Debug, Subcommand)]
enum VocabSubcommand {
    #[command(about = "Show the configured forms, lengths and languages")]
    List,
    AddForm { form: String },
    RemoveForm { form: String },
    AddLength { length: String },
    RemoveLength { length: String },
    AddLanguage { code: String, name: String },
}

struct Workspace {
    paths: ResolvedPaths,
    config: PoetryConfig,
    layout: ContentLayout,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init) => run_init(&runtime),
        Some(Commands::Analyze) => run_analyze(&runtime),
        Some(Commands::Registry(RegistryArgs { command })) => match command {
            RegistrySubcommand::Generate => run_registry_generate(&runtime),
        },
        Some(Commands::Migrate(args)) => run_migrate(&runtime, args),
        Some(Commands::Rollback(args)) => run_rollback(&runtime, args),
        Some(Commands::SyncConsumers(args)) => run_sync_consumers(&runtime, args),
        Some(Commands::Assign(AssignArgs { command })) => match command {
            AssignSubcommand::List => run_assign_list(&runtime),
            AssignSubcommand::Manual => run_assign_manual(&runtime),
            AssignSubcommand::Suggest { apply } => run_assign_suggest(&runtime, apply),
            AssignSubcommand::Random { yes } => run_assign_random(&runtime, yes),
            AssignSubcommand::Unlink { reference } => run_assign_unlink(&runtime, &reference),
        },
        Some(Commands::Validate) => run_validate(&runtime),
        Some(Commands::Readiness) => run_readiness(&runtime),
        Some(Commands::Report(args)) => run_report(&runtime, args),
        Some(Commands::Stats) => run_stats(&runtime),
        Some(Commands::Poem(PoemArgs { command })) => match command {
            PoemSubcommand::Add(args) => run_poem_add(&runtime, args),
            PoemSubcommand::List(args) => run_poem_list(&runtime, args),
            PoemSubcommand::Show { reference } => run_poem_show(&runtime, &reference),
            PoemSubcommand::Edit(args) => run_poem_edit(&runtime, args),
            PoemSubcommand::Delete { reference, yes } => run_poem_delete(&runtime, &reference, yes),
            PoemSubcommand::Search { query } => run_poem_search(&runtime, &query),
        },
        Some(Commands::Backup(BackupArgs { command })) => match command {
            BackupSubcommand::Create { description } => run_backup_create(&runtime, &description),
            BackupSubcommand::List => run_backup_list(&runtime),
            BackupSubcommand::Verify { backup } => run_backup_verify(&runtime, &backup),
            BackupSubcommand::Restore { backup, yes } => {
                run_backup_restore(&runtime, &backup, yes)
            }
        },
        Some(Commands::Restructure(args)) => run_restructure(&runtime, args),
        Some(Commands::Mapping) => run_mapping(&runtime),
        Some(Commands::Renumber(args)) => run_renumber(&runtime, args),
        Some(Commands::Vocab(VocabArgs { command })) => run_vocab(&runtime, command),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let wrote_config = write_default_config(&paths.config_path)?;
    fs::create_dir_all(&paths.backups_dir)
        .with_context(|| format!("failed to create {}", paths.backups_dir.display()))?;
    let workspace = load_workspace(runtime)?;
    let status = inspect_runtime(&workspace.paths, &workspace.layout)?;

    println!("Initialized poetrytool runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("backups_dir: {}", normalize_path(&paths.backups_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("wrote_config: {}", format_flag(wrote_config));
    println!("poetry_dir_exists: {}", format_flag(status.poetry_dir_exists));
    println!("image_dir_exists: {}", format_flag(status.image_dir_exists));
    println!("registry_exists: {}", format_flag(status.registry_exists));
    print_list("warnings", &status.warnings);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_analyze(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let report = analyze(&workspace.layout, &workspace.config)?;

    println!("structure analysis");
    println!("project_root: {}", normalize_path(&workspace.paths.project_root));
    println!("poems.total: {}", report.total_poems());
    println!("poems.without_images: {}", report.poems_without_images.len());
    println!("images.total: {}", report.total_images());
    println!("images.orphaned: {}", report.orphaned_images.len());
    print_list("poems_without_images", &report.poems_without_images);
    print_list("orphaned_images", &report.orphaned_images);
    print_list("flagged", &report.flagged);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_registry_generate(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let migrator = Migrator::new(&workspace.paths, &workspace.layout, &workspace.config);
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let report = migrator.analyze()?;
    let summary = migrator.generate_registry(&mut registry, &report)?;

    println!("registry generate");
    println!("registry: {}", normalize_path(registry.path()));
    println!("poems.added: {}", summary.poems_added);
    println!("poems.skipped: {}", summary.poems_skipped);
    println!("images.added: {}", summary.images_added);
    println!("images.skipped: {}", summary.images_skipped);
    println!("links: {}", summary.links);
    print_failures("link_conflicts", &summary.link_conflicts);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let migrator = Migrator::new(&workspace.paths, &workspace.layout, &workspace.config);

    if !args.yes {
        let report = migrator.analyze()?;
        println!("migration plan");
        println!("project_root: {}", normalize_path(&workspace.paths.project_root));
        println!("poems.to_migrate: {}", report.total_poems());
        println!("images.to_migrate: {}", report.total_images());
        println!("images.orphaned: {}", report.orphaned_images.len());
        print_list("flagged", &report.flagged);
        println!("applied: no (re-run with --yes)");
        print_diagnostics(runtime, &workspace.paths);
        return Ok(());
    }

    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let report = migrator.run(&mut registry)?;

    println!("migration complete");
    println!("backup: {}", normalize_path(&report.backup_dir));
    println!("registry.poems_added: {}", report.generation.poems_added);
    println!("registry.images_added: {}", report.generation.images_added);
    println!("registry.links: {}", report.generation.links);
    print_failures("registry.link_conflicts", &report.generation.link_conflicts);
    print_phase("files.poems", &report.files.poems);
    print_phase("files.images", &report.files.images);
    print_phase("cleanup", &report.cleanup);
    print_consumer_updates(&report.consumers);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_rollback(runtime: &RuntimeOptions, args: RollbackArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let backup_dir = match args.backup.as_deref() {
        Some(reference) => resolve_backup(&workspace.paths, reference)?,
        None => match latest_backup(&workspace.paths)? {
            Some(path) => path,
            None => bail!(
                "no backups found under {}",
                normalize_path(&workspace.paths.backups_dir)
            ),
        },
    };
    let migrator = Migrator::new(&workspace.paths, &workspace.layout, &workspace.config);
    let summary = migrator.rollback(&backup_dir)?;

    println!("rollback complete");
    println!("backup: {}", normalize_path(&backup_dir));
    println!("poem_files: {}", summary.poem_files);
    println!("image_files: {}", summary.image_files);
    println!("consumer_files: {}", summary.consumer_files);
    println!("registry_restored: {}", format_flag(summary.registry_restored));
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_sync_consumers(runtime: &RuntimeOptions, args: SyncConsumersArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    if registry.is_empty() {
        bail!("registry is empty; run `poetrytool migrate --yes` first");
    }
    let migrator = Migrator::new(&workspace.paths, &workspace.layout, &workspace.config);
    let updates = migrator.sync_consumers(&registry, args.dry_run)?;

    println!("sync consumers");
    println!(
        "paths: {}",
        poem_web_paths(&workspace.layout, &registry).len()
    );
    println!("dry_run: {}", format_flag(args.dry_run));
    print_consumer_updates(&updates);
    for update in &updates {
        if let Some(diff) = &update.diff {
            print!("{diff}");
        }
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_assign_list(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let poems = unlinked_poems(&registry);
    let images = unlinked_images(&registry);

    println!("unlinked items");
    println!("poems.unlinked: {}", poems.len());
    for poem_id in &poems {
        let title = registry.poem(poem_id).map(|poem| poem.title.as_str()).unwrap_or("");
        println!("  - {poem_id}: {title}");
    }
    println!("images.unlinked: {}", images.len());
    for image_id in &images {
        let filename = registry
            .image(image_id)
            .map(|image| image.original_filename.as_str())
            .unwrap_or("");
        println!("  - {image_id}: {filename}");
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_assign_manual(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let stdin = io::stdin();
    let mut prompt = TerminalPrompt {
        input: stdin.lock(),
    };
    let summary = run_manual_session(&mut registry, &mut prompt)?;

    println!("manual assignment");
    println!("linked: {}", summary.linked.len());
    for (poem_id, image_id) in &summary.linked {
        println!("  - {poem_id} <- {image_id}");
    }
    println!("skipped: {}", summary.skipped);
    println!("stopped_early: {}", format_flag(summary.stopped_early));
    println!("images.remaining: {}", summary.remaining_images);
    if !summary.linked.is_empty() {
        print_header_refresh(&workspace.layout, &registry)?;
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_assign_suggest(runtime: &RuntimeOptions, apply: bool) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let suggestions = suggest(&registry);

    println!("assignment suggestions");
    println!("suggestions: {}", suggestions.len());
    for suggestion in &suggestions {
        println!(
            "  - {} ({}) <- {} ({}) score={:.2}",
            suggestion.poem_id,
            suggestion.title,
            suggestion.image_id,
            suggestion.original_filename,
            suggestion.score
        );
    }
    if apply {
        let summary = apply_suggestions(&mut registry, &suggestions)?;
        println!("applied: {}", summary.applied.len());
        println!("rejected: {}", summary.rejected.len());
        for (poem_id, reason) in &summary.rejected {
            println!("  - {poem_id}: {reason}");
        }
        if !summary.applied.is_empty() {
            print_header_refresh(&workspace.layout, &registry)?;
        }
    } else {
        println!("applied: no (re-run with --apply)");
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_assign_random(runtime: &RuntimeOptions, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "random assignment links images without regard to content; re-run with `assign random --yes` to proceed"
        );
    }
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let mut rng = rand::thread_rng();
    let outcome = random_assign(&mut registry, &mut rng, &workspace.paths.state_dir)?;

    println!("random assignment");
    println!("pairs: {}", outcome.pairs.len());
    for (poem_id, image_id) in &outcome.pairs {
        println!("  - {poem_id} <- {image_id}");
    }
    println!(
        "log: {}",
        outcome
            .log_path
            .as_deref()
            .map(normalize_path)
            .unwrap_or_else(|| "<none>".to_string())
    );
    if !outcome.pairs.is_empty() {
        print_header_refresh(&workspace.layout, &registry)?;
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_assign_unlink(runtime: &RuntimeOptions, reference: &str) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let poem_id = resolve_poem(&registry, reference)?;
    let image_id = unlink_image(&mut registry, &poem_id)?;

    println!("image unlinked");
    println!("poem_id: {poem_id}");
    println!("image_id: {image_id}");
    print_header_refresh(&workspace.layout, &registry)?;
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_validate(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let report = validate_integrity(&workspace.layout, &registry);

    println!("integrity validation");
    print_integrity(&report);
    print_diagnostics(runtime, &workspace.paths);
    if !report.is_clean() {
        bail!("integrity validation found {} issue(s)", report.total_issues());
    }
    Ok(())
}

fn run_readiness(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let report = test_website_readiness(&workspace.layout, &registry);

    println!("website readiness");
    print_readiness(&report);
    print_diagnostics(runtime, &workspace.paths);
    if !report.ready {
        bail!("website is not ready");
    }
    Ok(())
}

fn run_report(runtime: &RuntimeOptions, args: ReportArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let stats = collection_stats(&registry, &workspace.config);
    let integrity = validate_integrity(&workspace.layout, &registry);
    let readiness = test_website_readiness(&workspace.layout, &registry);

    if args.json {
        let rendered = serde_json::json!({
            "stats": stats,
            "integrity": integrity,
            "readiness": readiness,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    println!("collection report");
    print_stats(&stats);
    println!();
    print_integrity(&integrity);
    println!();
    print_readiness(&readiness);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_stats(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let stats = collection_stats(&registry, &workspace.config);

    println!("collection stats");
    print_stats(&stats);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn read_body(content: Option<String>, content_file: Option<&Path>) -> Result<Option<String>> {
    match (content, content_file) {
        (Some(content), _) => Ok(Some(content)),
        (None, Some(path)) => fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("failed to read {}", path.display())),
        (None, None) => Ok(None),
    }
}

fn run_poem_add(runtime: &RuntimeOptions, args: PoemAddArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let content = match read_body(args.content, args.content_file.as_deref())? {
        Some(content) => content,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read poem body from stdin")?;
            buffer
        }
    };
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let created = create_poem(
        &workspace.layout,
        &workspace.config,
        &mut registry,
        &NewPoem {
            title: args.title,
            content,
            author: args.author,
            language: args.language,
            form: args.form,
            length: args.length,
        },
    )?;

    println!("poem created");
    println!("poem_id: {}", created.poem_id);
    println!("path: {}", normalize_path(&created.path));
    print_consumer_updates(&created.consumers);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_poem_list(runtime: &RuntimeOptions, args: PoemListArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let filter = PoemFilter {
        language: args.language,
        form: args.form,
        length: args.length,
        author: args.author,
    };
    let poems = list_poems(&registry, &filter);

    println!("poems");
    print_poem_summaries(&poems);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_poem_search(runtime: &RuntimeOptions, query: &str) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let poems = search_poems(&registry, query)?;

    println!("poem search");
    println!("query: {query}");
    print_poem_summaries(&poems);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_poem_show(runtime: &RuntimeOptions, reference: &str) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let registry = Registry::load(&workspace.layout.registry_path)?;
    let poem_id = resolve_poem(&registry, reference)?;
    let view = show_poem(&workspace.layout, &registry, &poem_id)?;
    let record = &view.record;

    println!("poem_id: {}", view.poem_id);
    println!("title: {}", record.title);
    println!("author: {}", record.author);
    println!("language: {}", record.language);
    println!("form: {}", record.form);
    println!("length: {}", record.length);
    println!("image_id: {}", record.image_id.as_deref().unwrap_or("<none>"));
    if let Some(image_path) = &view.image_path {
        println!("image_path: {}", normalize_path(image_path));
    }
    println!("path: {}", normalize_path(&view.path));
    println!("file_present: {}", format_flag(view.file_present));
    println!("created: {}", record.created_date);
    println!("last_modified: {}", record.last_modified);
    println!();
    print!("{}", record.content);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_poem_edit(runtime: &RuntimeOptions, args: PoemEditArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let poem_id = resolve_poem(&registry, &args.reference)?;
    let update = PoemUpdate {
        title: args.title,
        author: args.author,
        language: args.language,
        form: args.form,
        length: args.length,
        content: read_body(args.content, args.content_file.as_deref())?,
    };
    let path = update_poem(
        &workspace.layout,
        &workspace.config,
        &mut registry,
        &poem_id,
        &update,
    )?;

    println!("poem updated");
    println!("poem_id: {poem_id}");
    println!("path: {}", normalize_path(&path));
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_poem_delete(runtime: &RuntimeOptions, reference: &str, yes: bool) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;
    let poem_id = resolve_poem(&registry, reference)?;
    if !yes {
        let title = registry.poem(&poem_id).map(|poem| poem.title.as_str()).unwrap_or("");
        bail!("deleting {poem_id} ({title}) removes its file; re-run with --yes");
    }
    let deleted = delete_poem(&workspace.paths, &workspace.layout, &mut registry, &poem_id)?;

    println!("poem deleted");
    println!("poem_id: {}", deleted.poem_id);
    println!("title: {}", deleted.title);
    println!("backup: {}", normalize_path(&deleted.backup_dir));
    println!(
        "released_image: {}",
        deleted.released_image.as_deref().unwrap_or("<none>")
    );
    print_consumer_updates(&deleted.consumers);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_backup_create(runtime: &RuntimeOptions, description: &str) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let backup_dir = create_backup(&workspace.paths, &workspace.layout, description)?;
    let manifest = load_manifest(&backup_dir)?;

    println!("backup created");
    println!("backup: {}", normalize_path(&backup_dir));
    println!("description: {}", manifest.description);
    println!("files: {}", manifest.files.len());
    println!("registry_present: {}", format_flag(manifest.registry_present));
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_backup_list(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let backups = list_backups(&paths)?;

    println!("backups");
    println!("backups_dir: {}", normalize_path(&paths.backups_dir));
    println!("count: {}", backups.len());
    for entry in &backups {
        match &entry.manifest {
            Some(manifest) => println!(
                "  - {} [{}] poems={} images={} files={}",
                entry.name,
                manifest.description,
                manifest.total_poems,
                manifest.total_images,
                manifest.files.len()
            ),
            None => println!("  - {} <manifest unreadable>", entry.name),
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_backup_verify(runtime: &RuntimeOptions, reference: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let backup_dir = resolve_backup(&paths, reference)?;
    let report = verify_backup(&backup_dir)?;

    println!("backup verify");
    println!("backup: {}", normalize_path(&backup_dir));
    println!("checked: {}", report.checked);
    print_list("missing", &report.missing);
    print_list("mismatched", &report.mismatched);
    println!("intact: {}", format_flag(report.is_intact()));
    print_diagnostics(runtime, &paths);
    if !report.is_intact() {
        bail!("backup {} failed verification", normalize_path(&backup_dir));
    }
    Ok(())
}

fn run_backup_restore(runtime: &RuntimeOptions, reference: &str, yes: bool) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let backup_dir = resolve_backup(&workspace.paths, reference)?;
    if !yes {
        bail!(
            "restoring {} replaces the current poems, images and registry; re-run with --yes",
            normalize_path(&backup_dir)
        );
    }
    let summary = restore_backup(&workspace.layout, &backup_dir)?;

    println!("backup restored");
    println!("backup: {}", normalize_path(&backup_dir));
    println!("poem_files: {}", summary.poem_files);
    println!("image_files: {}", summary.image_files);
    println!("consumer_files: {}", summary.consumer_files);
    println!("registry_restored: {}", format_flag(summary.registry_restored));
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_restructure(runtime: &RuntimeOptions, args: RestructureArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;

    if !args.yes {
        println!("restructure plan");
        println!("layout.current: {}", registry.layout().as_str());
        println!("poems: {}", registry.poems().len());
        println!("applied: no (re-run with --yes)");
        print_diagnostics(runtime, &workspace.paths);
        return Ok(());
    }

    let summary = restructure_to_folders(&workspace.paths, &workspace.layout, &mut registry)?;

    println!("restructure complete");
    println!("backup: {}", normalize_path(&summary.backup_dir));
    println!("folders: {}", summary.folders);
    println!("images_moved: {}", summary.images_moved);
    print_list("skipped", &summary.skipped);
    print_failures("failed", &summary.failed);
    print_consumer_updates(&summary.consumers);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_renumber(runtime: &RuntimeOptions, args: RenumberArgs) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut registry = Registry::load(&workspace.layout.registry_path)?;

    if !args.yes {
        let ids = registry.sorted_poem_ids();
        let moved = ids
            .iter()
            .enumerate()
            .filter(|(index, poem_id)| **poem_id != format_id(POEM_ID_PREFIX, *index as u32 + 1))
            .count();
        println!("renumber plan");
        println!("layout: {}", registry.layout().as_str());
        println!("poems: {}", ids.len());
        println!("poems.to_renumber: {moved}");
        println!("applied: no (re-run with --yes)");
        print_diagnostics(runtime, &workspace.paths);
        return Ok(());
    }

    let summary = renumber_poems(&workspace.paths, &workspace.layout, &mut registry)?;

    println!("renumber complete");
    if let Some(backup_dir) = &summary.backup_dir {
        println!("backup: {}", normalize_path(backup_dir));
    }
    println!("renamed: {}", summary.renamed.len());
    for (from, to) in &summary.renamed {
        println!("  - {from} -> {to}");
    }
    print_consumer_updates(&summary.consumers);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_vocab(runtime: &RuntimeOptions, command: VocabSubcommand) -> Result<()> {
    let workspace = load_workspace(runtime)?;
    let mut config = workspace.config;
    let change = match command {
        VocabSubcommand::List => None,
        VocabSubcommand::AddForm { form } => Some(config.add_form(&form)),
        VocabSubcommand::RemoveForm { form } => Some(config.remove_form(&form)),
        VocabSubcommand::AddLength { length } => Some(config.add_length(&length)),
        VocabSubcommand::RemoveLength { length } => Some(config.remove_length(&length)),
        VocabSubcommand::AddLanguage { code, name } => Some(config.add_language(&code, &name)),
    };
    if let Some(change) = change {
        change?;
        save_config(&workspace.paths.config_path, &config)?;
        println!("config: {}", normalize_path(&workspace.paths.config_path));
    }

    println!("vocabulary");
    print_list("forms", &config.collection.forms);
    print_list("lengths", &config.collection.lengths);
    let languages: Vec<String> = config
        .collection
        .languages
        .iter()
        .map(|language| format!("{} ({})", language.code, language.name))
        .collect();
    print_list("languages", &languages);
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_mapping(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;

    println!("legacy mapping");
    let Some(mappings) = load_mappings(&paths.project_root)? else {
        println!("mapping: <none> (run `poetrytool restructure --yes`)");
        print_diagnostics(runtime, &paths);
        return Ok(());
    };
    println!("folders: {}", mappings.folder_numbers().len());
    for number in mappings.folder_numbers() {
        let poem = mappings
            .poems
            .get(&number)
            .map(|entry| format!("{} ({})", entry.title, entry.original_file))
            .unwrap_or_else(|| "<no poem>".to_string());
        let image = mappings
            .images
            .get(&number)
            .map(String::as_str)
            .unwrap_or("<no image>");
        println!("  - {number}: {poem} | {image}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

/// Reads operator commands from stdin. End of input stops the session.
struct TerminalPrompt<R> {
    input: R,
}

impl<R: BufRead> AssignPrompt for TerminalPrompt<R> {
    fn next_command(&mut self, prompt: &PoemPrompt<'_>) -> Result<AssignCommand> {
        println!();
        println!(
            "[{}/{}] {} \"{}\" by {}",
            prompt.position, prompt.total, prompt.poem_id, prompt.title, prompt.author
        );
        for line in prompt.preview.lines() {
            println!("    {line}");
        }
        for (index, candidate) in prompt.candidates.iter().enumerate() {
            println!(
                "  {:>3}. {} ({})",
                index + 1,
                candidate.image_id,
                candidate.original_filename
            );
        }
        loop {
            print!("image number, s to skip, q to stop: ");
            io::stdout().flush().context("failed to flush stdout")?;
            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("failed to read operator input")?;
            if read == 0 {
                println!();
                return Ok(AssignCommand::Stop);
            }
            match line.parse::<AssignCommand>() {
                Ok(command) => return Ok(command),
                Err(message) => println!("{message}"),
            }
        }
    }

    fn rejected(&mut self, message: &str) {
        println!("{message}");
    }
}

fn load_workspace(runtime: &RuntimeOptions) -> Result<Workspace> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let layout = ContentLayout::resolve(&paths, &config)?;
    debug!(
        project_root = %paths.project_root.display(),
        registry = %layout.registry_path.display(),
        "workspace resolved"
    );
    Ok(Workspace {
        paths,
        config,
        layout,
    })
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_stats(stats: &CollectionStats) {
    println!("poems.total: {}", stats.total_poems);
    println!("images.total: {}", stats.total_images);
    println!("poems.with_images: {}", stats.poems_with_images);
    println!("images.unlinked: {}", stats.unlinked_images);
    println!("assignment_rate: {:.1}%", stats.assignment_rate);
    for (language, count) in &stats.by_language {
        println!("language.{language}: {count}");
    }
    for (form, count) in &stats.by_form {
        println!("form.{form}: {count}");
    }
    for (length, count) in &stats.by_length {
        println!("length.{length}: {count}");
    }
    println!("layout: {}", stats.layout);
    println!("registry.version: {}", stats.version);
    println!("registry.last_updated: {}", stats.last_updated);
}

fn print_integrity(report: &IntegrityReport) {
    for (name, issues) in report.categories() {
        println!("{name}: {}", issues.len());
        for issue in issues {
            println!("  - {issue}");
        }
    }
    println!("total_issues: {}", report.total_issues());
    println!("clean: {}", format_flag(report.is_clean()));
}

fn print_readiness(report: &ReadinessReport) {
    println!(
        "poems.loadable: {}/{} ({:.1}%, need {MIN_POEM_LOAD_RATE:.0}%)",
        report.loadable_poems, report.total_poems, report.poem_load_rate
    );
    println!(
        "images.available: {}/{} ({:.1}%, need {MIN_IMAGE_AVAILABILITY_RATE:.0}%)",
        report.available_images, report.total_images, report.image_availability_rate
    );
    for check in &report.consumers {
        let state = match (&check.error, check.entries) {
            (Some(error), _) => format!("error: {error}"),
            (None, Some(entries)) => format!("{entries} entries"),
            (None, None) => "missing".to_string(),
        };
        println!("consumer.{}: {state}", normalize_path(&check.path));
    }
    println!("consumers_ok: {}", format_flag(report.consumers_ok));
    println!("ready: {}", format_flag(report.ready));
}

fn print_phase(label: &str, summary: &PhaseSummary) {
    println!("{label}.succeeded: {}", summary.succeeded);
    println!("{label}.skipped: {}", summary.skipped);
    print_failures(&format!("{label}.failed"), &summary.failed);
}

fn print_failures(label: &str, failures: &[ItemFailure]) {
    println!("{label}: {}", failures.len());
    for failure in failures {
        println!("  - {}: {}", failure.item, failure.reason);
    }
}

fn print_consumer_updates(updates: &[ConsumerUpdate]) {
    for update in updates {
        let state = match (update.changed, update.dry_run) {
            (false, _) => "unchanged",
            (true, true) => "would change",
            (true, false) => "updated",
        };
        println!(
            "consumer.{}: {state} ({} entries)",
            normalize_path(&update.path),
            update.entries
        );
    }
}

fn print_poem_summaries(poems: &[PoemSummary]) {
    println!("count: {}", poems.len());
    for poem in poems {
        println!(
            "  - {}: {} | {} | {} | {} | {}{}",
            poem.poem_id,
            poem.title,
            poem.author,
            poem.language,
            poem.form,
            poem.length,
            poem.image_id
                .as_deref()
                .map(|image_id| format!(" | {image_id}"))
                .unwrap_or_default()
        );
    }
}

fn print_header_refresh(layout: &ContentLayout, registry: &Registry) -> Result<()> {
    let updated = refresh_image_headers(layout, registry)?;
    println!("headers.updated: {}", updated.len());
    Ok(())
}

fn print_list(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{label}:");
    for item in items {
        println!("  - {item}");
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
