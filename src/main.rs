//! Storyloop - autonomous implementation loop.
//!
//! Drives an external coding agent through a user-story backlog until every
//! story passes or a guard (budget, breaker, iteration cap) stops the run.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use storyloop::agent::ClaudeCli;
use storyloop::backlog::Backlog;
use storyloop::config::{
    RunConfig, DEFAULT_MAX_CALLS_PER_HOUR, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_MAX_ITERATIONS, DEFAULT_NO_PROGRESS_THRESHOLD, DEFAULT_TIMEOUT_MINUTES,
};
use storyloop::r#loop::LoopController;
use storyloop::session::{latest_session, SessionSummary};
use storyloop::shutdown::Shutdown;
use storyloop::TerminationReason;

#[derive(Parser)]
#[command(name = "storyloop")]
#[command(version)]
#[command(about = "Autonomous implementation loop over a user-story backlog", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory the agent works in (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the implementation loop
    Run {
        /// Path to the backlog file
        #[arg(short, long, default_value = "backlog.json")]
        backlog: PathBuf,

        /// Maximum iterations before stopping
        #[arg(short, long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: u32,

        /// Per-call idle-output timeout in minutes
        #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MINUTES)]
        timeout: u64,

        /// Call budget within the trailing 60-minute window
        #[arg(long, default_value_t = DEFAULT_MAX_CALLS_PER_HOUR)]
        max_calls_per_hour: u32,

        /// Consecutive invocations without progress before stopping
        #[arg(long, default_value_t = DEFAULT_NO_PROGRESS_THRESHOLD)]
        no_progress_threshold: u32,

        /// Consecutive failed invocations before stopping
        #[arg(long, default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
        max_consecutive_failures: u32,

        /// Agent model name passed through to the CLI
        #[arg(long, default_value = "sonnet")]
        model: String,

        /// Agent binary to drive (mainly for testing)
        #[arg(long, default_value = "claude")]
        agent_cmd: String,

        /// Root directory for session logs
        #[arg(long, default_value = ".storyloop/logs")]
        logs_dir: PathBuf,

        /// Resume the most recent session instead of starting fresh
        #[arg(long)]
        resume: bool,
    },

    /// Show backlog progress and the latest session summary
    Status {
        /// Path to the backlog file
        #[arg(short, long, default_value = "backlog.json")]
        backlog: PathBuf,

        /// Root directory for session logs
        #[arg(long, default_value = ".storyloop/logs")]
        logs_dir: PathBuf,
    },

    /// Delete session logs, optionally clearing story pass flags too
    Reset {
        /// Path to the backlog file
        #[arg(short, long, default_value = "backlog.json")]
        backlog: PathBuf,

        /// Root directory for session logs
        #[arg(long, default_value = ".storyloop/logs")]
        logs_dir: PathBuf,

        /// Also clear the `passes` flag on every story
        #[arg(long)]
        stories: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "storyloop=debug,info"
    } else {
        "storyloop=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project.display()
        );
        std::process::exit(1);
    }

    let code = match cli.command {
        Commands::Run {
            backlog,
            max_iterations,
            timeout,
            max_calls_per_hour,
            no_progress_threshold,
            max_consecutive_failures,
            model,
            agent_cmd,
            logs_dir,
            resume,
        } => {
            let config = RunConfig::default()
                .with_backlog_path(project.join(backlog))
                .with_logs_root(project.join(logs_dir))
                .with_max_iterations(max_iterations)
                .with_timeout_minutes(timeout)
                .with_max_calls_per_hour(max_calls_per_hour)
                .with_no_progress_threshold(no_progress_threshold)
                .with_max_consecutive_failures(max_consecutive_failures)
                .with_model(model);
            run_loop(&project, config, &agent_cmd, resume).await
        }
        Commands::Status { backlog, logs_dir } => {
            show_status(&project.join(backlog), &project.join(logs_dir))
        }
        Commands::Reset {
            backlog,
            logs_dir,
            stories,
        } => reset(&project.join(backlog), &project.join(logs_dir), stories),
    };
    std::process::exit(code);
}

async fn run_loop(
    project: &std::path::Path,
    config: RunConfig,
    agent_cmd: &str,
    resume: bool,
) -> i32 {
    let agent = ClaudeCli::new(project, config.model.clone()).with_command(agent_cmd);
    if let Err(e) = agent.check_available() {
        eprintln!("{} {}", "Error:".red().bold(), e);
        return e.exit_code();
    }

    let shutdown = Shutdown::new();
    shutdown.install();

    let controller = LoopController::new(config, Arc::new(agent)).with_shutdown(shutdown);
    let result = if resume {
        controller.resume().await
    } else {
        controller.run().await
    };

    match result {
        Ok(report) => {
            let reason = match report.reason {
                TerminationReason::AllComplete | TerminationReason::AgentSignaledDone => {
                    report.reason.as_str().green().bold()
                }
                TerminationReason::Interrupted => report.reason.as_str().yellow().bold(),
                _ => report.reason.as_str().red().bold(),
            };
            println!(
                "\n{} {} after {} iterations ({} ok, {} failed), stories {}/{}",
                "Finished:".bold(),
                reason,
                report.iterations,
                report.successful_invocations,
                report.failed_invocations,
                report.stories_passed,
                report.stories_total
            );
            println!("Session: {}", report.session_id);
            report.reason.exit_code()
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            e.exit_code()
        }
    }
}

fn show_status(backlog_path: &std::path::Path, logs_root: &std::path::Path) -> i32 {
    let backlog = match Backlog::load(backlog_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return e.exit_code();
        }
    };

    let (passed, total) = backlog.progress();
    println!(
        "{} {} ({})",
        "Project:".bold(),
        backlog.project,
        backlog.branch_name
    );
    println!("{} {passed}/{total} stories passing", "Progress:".bold());
    for story in &backlog.user_stories {
        let mark = if story.passes {
            "PASS".green()
        } else {
            "open".yellow()
        };
        println!("  [{mark}] {} (p{}) {}", story.id, story.priority, story.title);
    }

    match latest_session(logs_root) {
        Ok(Some(dir)) => {
            println!("\n{} {}", "Latest session:".bold(), dir.display());
            let summary_path = dir.join("summary.json");
            if let Ok(summary) = storyloop::persist::read_json::<SessionSummary>(&summary_path) {
                println!(
                    "  ended {} after {} iterations: {}",
                    summary.ended_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    summary.total_iterations,
                    summary.exit_reason
                );
            } else {
                println!("  no summary written (run in progress or killed)");
            }
        }
        Ok(None) => println!("\nNo sessions yet."),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return e.exit_code();
        }
    }
    0
}

fn reset(backlog_path: &std::path::Path, logs_root: &std::path::Path, stories: bool) -> i32 {
    if logs_root.exists() {
        if let Err(e) = std::fs::remove_dir_all(logs_root) {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return 1;
        }
        println!("Removed {}", logs_root.display());
    } else {
        println!("No session logs at {}", logs_root.display());
    }

    if stories {
        let mut backlog = match Backlog::load(backlog_path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                return e.exit_code();
            }
        };
        backlog.reset_stories();
        if let Err(e) = backlog.save(backlog_path) {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return e.exit_code();
        }
        println!("Cleared pass flags in {}", backlog_path.display());
    }
    0
}
