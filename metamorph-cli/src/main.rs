//! The `metamorph` command-line tool.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use metamorph::cancellation::CancellationToken;
use metamorph::config::Config;
use metamorph::logging;
use metamorph::manifest::{load_file, ManifestOverrides, Pipeline};
use metamorph::runner::{FailurePolicy, Runner, StepResult};
use metamorph::runtime::RuntimeType;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "metamorph")]
#[command(author, version, about = "Batch-apply containerized commands across many repositories")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply a manifest to the specified repositories
    Apply(ApplyArgs),
    /// Load and validate a manifest without running it
    Validate {
        /// Path to the manifest file
        manifest: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ApplyArgs {
    /// Path to the manifest file
    #[arg(long)]
    manifest: PathBuf,

    /// Repository to operate on (can be specified multiple times)
    #[arg(short = 'r', long = "repo")]
    repos: Vec<String>,

    /// Branch to use for applying changes
    #[arg(short, long)]
    branch: Option<String>,

    /// Commit message to use for the commit
    #[arg(short = 'm', long)]
    commit_msg: Option<String>,

    /// GitLab organization to use
    #[arg(long, env = "GITLAB_ORG")]
    gitlab_org: Option<String>,

    /// Execution backend
    #[arg(long, value_parser = ["docker", "local"])]
    runtime: Option<String>,

    /// Number of repositories processed at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Keep going with other repositories after a step fails
    #[arg(long)]
    continue_on_failure: bool,

    /// Do not check that the container engine is installed and running
    #[arg(long)]
    skip_runtime_check: bool,

    /// Show what would be run without making changes
    #[arg(long)]
    dry_run: bool,
}

impl ApplyArgs {
    fn apply_to(&self, mut config: Config) -> Result<Config> {
        if let Some(runtime) = &self.runtime {
            config = config.with_runtime(runtime.parse::<RuntimeType>()?);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(org) = self.gitlab_org.as_deref().filter(|o| !o.is_empty()) {
            config = config.with_org(org);
        }
        if self.continue_on_failure {
            config = config.with_failure_policy(FailurePolicy::ContinueOnFailure);
        }
        if self.skip_runtime_check {
            config = config.with_check_runtime(false);
        }
        Ok(config.with_repos(self.repos.clone()))
    }

    fn apply_publishing(&self, pipeline: &mut Pipeline, config: &Config) {
        if let Some(branch) = self.branch.as_deref().filter(|b| !b.is_empty()) {
            pipeline.gitlab.branch_name = branch.to_string();
        }
        if let Some(org) = &config.org {
            pipeline.gitlab.org.clone_from(org);
        }
        if let Some(message) = &self.commit_msg {
            debug!(commit_message = %message, "Commit message recorded");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env().context("failed to read configuration from the environment")?;
    if cli.verbose {
        config.log = config.log.with_level("debug");
    }
    config.log = config.log.with_json(cli.log_json);
    logging::init(&config.log);

    match cli.command {
        Commands::Apply(args) => apply(&args, config).await,
        Commands::Validate { manifest } => {
            let overrides = ManifestOverrides {
                org: config.org.clone(),
            };
            let pipeline = load_file(&manifest, &overrides)?;
            println!(
                "{}: ok ({} repo(s), {} step(s))",
                manifest.display(),
                pipeline.repos.len(),
                pipeline.steps.len()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn apply(args: &ApplyArgs, config: Config) -> Result<ExitCode> {
    let config = args.apply_to(config)?;
    config.validate()?;

    let overrides = ManifestOverrides {
        org: config.org.clone(),
    };
    let mut pipeline = load_file(&args.manifest, &overrides)?;
    args.apply_publishing(&mut pipeline, &config);

    let runner = Runner::new(Arc::new(config), Arc::new(pipeline));

    if args.dry_run {
        print_plan(runner.pipeline());
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let handler = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping at the next step boundary");
            handler.cancel("interrupted");
        }
    });

    match runner.run(&cancel).await {
        Ok(results) => {
            print_results(&results);
            let failed = results.iter().any(|r| !r.success());
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Err(aborted) => {
            print_results(&aborted.results);
            eprintln!("Error: {}", aborted.error);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_plan(pipeline: &Pipeline) {
    println!("Pipeline: {}", pipeline.name);
    for repo in &pipeline.repos {
        for step in &pipeline.steps {
            println!(
                "{}\t{}\t{}\t{}",
                repo.name,
                step.name,
                step.image,
                step.commands().join(" ")
            );
        }
    }
}

fn print_results(results: &[StepResult]) {
    for result in results {
        println!("{}", format_result(result));
    }
}

fn format_result(result: &StepResult) -> String {
    format!(
        "Repo: {}\nStep: {}\nExit Code: {}\nOutput: {}\nError: {}\nDuration: {:?}\n",
        result.repo,
        result.step_name,
        result.exit_code,
        result.output,
        result.error.as_deref().unwrap_or("<nil>"),
        result.duration
    )
}
