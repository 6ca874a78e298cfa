use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flowlock::batch;
use flowlock::compiler::{CancelFlag, Compiler, Reporter};
use flowlock::config;
use flowlock::loader::ImportCache;
use flowlock::redact::redact;
use flowlock_types::{CompileError, CompileOptions};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "flowlock", version, long_version = long_version())]
#[command(about = "Compile agentic workflow markdown into CI lock files")]
struct Cli {
    /// Repository root; source paths and imports resolve against it.
    #[arg(long, default_value = ".", global = true)]
    repo_root: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile one or more workflow files (or a whole directory).
    Compile(CompileArgs),
    /// Validate without writing lock files.
    Check(CompileArgs),
    /// Print environment diagnostics: engines, linters, cache, credentials.
    Doctor,
    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args, Debug)]
struct CompileArgs {
    /// Workflow files to compile. When omitted, compiles every `.md` file
    /// under `--dir`.
    files: Vec<PathBuf>,

    /// Directory to scan when no files are given.
    #[arg(long, default_value = ".github/workflows")]
    dir: PathBuf,

    /// Enable strict mode: require timeout, refuse write permissions,
    /// require network configuration.
    #[arg(long)]
    strict: bool,

    /// Allow `write` permissions under strict mode.
    #[arg(long)]
    dangerous_permissions_write: bool,

    /// Probe container images declared by MCP tools.
    #[arg(long)]
    validate_containers: bool,

    /// Probe collected npm/PyPI packages against their registries.
    #[arg(long)]
    validate_packages: bool,

    /// Run actionlint on emitted lock files when installed.
    #[arg(long)]
    actionlint: bool,

    /// Run zizmor on emitted lock files when installed.
    #[arg(long)]
    zizmor: bool,

    /// Run poutine on emitted lock files when installed.
    #[arg(long)]
    poutine: bool,

    /// Write dependency manifests for collected packages.
    #[arg(long)]
    dependabot: bool,

    /// Delete the remote-import cache before compiling.
    #[arg(long)]
    purge_cache: bool,

    /// Worker threads for multi-file compiles.
    #[arg(long)]
    jobs: Option<usize>,
}

fn long_version() -> String {
    format!(
        "{} (sha: {}, profile: {})",
        env!("CARGO_PKG_VERSION"),
        env!("FLOWLOCK_BUILD_SHA"),
        env!("FLOWLOCK_BUILD_PROFILE"),
    )
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {}", redact(msg));
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {}", redact(msg));
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FLOWLOCK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[error] {}", redact(&format!("{e:#}")));
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.cmd {
        Commands::Compile(args) => compile(&cli.repo_root, args, false),
        Commands::Check(args) => compile(&cli.repo_root, args, true),
        Commands::Doctor => {
            doctor(&cli.repo_root);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_options(repo_root: &PathBuf, args: &CompileArgs, no_emit: bool) -> Result<CompileOptions> {
    let mut options = CompileOptions {
        repo_root: repo_root.clone(),
        no_emit,
        ..CompileOptions::default()
    };
    if let Some(file) = config::load(repo_root)? {
        config::apply(&file, &mut options);
    }
    // Flags only tighten; absence of a flag never overrides the config file.
    options.strict |= args.strict;
    options.dangerous_permissions_write |= args.dangerous_permissions_write;
    options.validate_containers |= args.validate_containers;
    options.validate_packages |= args.validate_packages;
    options.actionlint |= args.actionlint;
    options.zizmor |= args.zizmor;
    options.poutine |= args.poutine;
    options.dependabot_manifests |= args.dependabot;
    if let Some(jobs) = args.jobs {
        options.jobs = jobs.max(1);
    }
    Ok(options)
}

fn compile(repo_root: &PathBuf, args: CompileArgs, no_emit: bool) -> Result<ExitCode> {
    let options = build_options(repo_root, &args, no_emit)?;

    if args.purge_cache {
        let cache_root = options
            .cache_root
            .clone()
            .unwrap_or_else(ImportCache::default_root);
        ImportCache::new(cache_root).purge()?;
        eprintln!("[info] import cache purged");
    }

    let sources = if args.files.is_empty() {
        let dir = if args.dir.is_absolute() {
            args.dir.clone()
        } else {
            repo_root.join(&args.dir)
        };
        batch::discover_sources(&dir)?
    } else {
        args.files.clone()
    };
    if sources.is_empty() {
        eprintln!("[error] no workflow files to compile");
        return Ok(ExitCode::from(3));
    }

    let cancel = CancelFlag::new();
    let mut failures: Vec<(PathBuf, CompileError)> = Vec::new();
    let mut compiled = 0usize;

    if sources.len() > 1 && options.jobs > 1 {
        let result = batch::compile_many(&sources, &options, &cancel);
        compiled = result.artifacts.len();
        failures = result.failures;
        for artifact in &result.artifacts {
            if let Some(lock) = &artifact.lock_path {
                eprintln!(
                    "[info] {} -> {} ({} jobs)",
                    artifact.source.display(),
                    lock.display(),
                    artifact.job_count
                );
            }
        }
    } else {
        let compiler = Compiler::new(options.clone());
        let mut bar = progress::BatchProgress::new(sources.len());
        let mut reporter = CliReporter;
        for source in &sources {
            match compiler.compile_file_with(source, &cancel, &mut reporter) {
                Ok(_) => compiled += 1,
                Err(error) => failures.push((source.clone(), error)),
            }
            bar.file_done(&source.display().to_string());
        }
        bar.finish();
    }

    if failures.is_empty() {
        eprintln!(
            "[info] {compiled} workflow(s) {}",
            if no_emit { "validated" } else { "compiled" }
        );
        return Ok(ExitCode::SUCCESS);
    }

    for (source, error) in &failures {
        eprintln!();
        eprintln!("[error] {}: {}", source.display(), redact(&error.to_string()));
        for diagnostic in error.diagnostics() {
            eprintln!();
            eprintln!("{}", redact(&diagnostic.render()));
        }
    }
    eprintln!();
    eprintln!("[error] {} of {} workflow(s) failed", failures.len(), sources.len());

    // Configuration problems trump I/O problems trump validation problems.
    let code = failures
        .iter()
        .map(|(_, e)| e.exit_code())
        .max()
        .unwrap_or(1);
    Ok(ExitCode::from(code as u8))
}

fn doctor(repo_root: &PathBuf) {
    println!("flowlock {}", long_version());
    println!();
    println!("repo_root: {}", repo_root.display());
    println!("cache_root: {}", ImportCache::default_root().display());
    println!(
        "config: {}",
        if repo_root.join(config::CONFIG_FILE_NAME).exists() {
            "present"
        } else {
            "absent"
        }
    );
    println!(
        "github_token: {}",
        if std::env::var("GITHUB_TOKEN").is_ok_and(|t| !t.is_empty()) {
            "detected"
        } else {
            "not detected"
        }
    );
    println!();
    for tool in ["docker", "actionlint", "zizmor", "poutine"] {
        let status = match which::which(tool) {
            Ok(path) => format!("{}", path.display()),
            Err(_) => "not installed".to_string(),
        };
        println!("{tool}: {status}");
    }
}
