use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_clicker::config::parse_duration;
use cadence_clicker::{
    AppConfig, AutomationSessionEngine, ClickExecutor, DeferredExecutionScheduler,
    DryRunClickExecutor, HotkeyAction, HotkeyManager, Point, ProcessFinder, SessionState,
    SessionSummary, StatusSnapshot, TargetGuard, TargetProcess,
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Clicks between liveness checks of a targeted process.
const TARGET_CHECK_EVERY: u64 = 10;

/// Low-jitter click automation with humanlike timing
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// start clicking immediately
    Run(RunArgs),

    /// start clicking at a future wall-clock instant
    Schedule {
        /// RFC 3339 timestamp, e.g. 2026-10-16T18:00:00Z
        #[arg(long)]
        at: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// write a configuration file with default settings
    InitConfig {
        /// where to write the file
        path: String,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<String>,

    /// horizontal click coordinate in pixels
    #[arg(short = 'x', long)]
    x: Option<f64>,

    /// vertical click coordinate in pixels
    #[arg(short = 'y', long)]
    y: Option<f64>,

    /// left, right, middle or double
    #[arg(short, long)]
    button: Option<String>,

    /// base interval between clicks, e.g. 100ms or 1.5s
    #[arg(short, long)]
    interval: Option<String>,

    /// stop after this many clicks
    #[arg(long)]
    max_clicks: Option<u64>,

    /// stop after this much active time, e.g. 30s or 5m
    #[arg(long)]
    max_duration: Option<String>,

    /// stop the session on the first failed click
    #[arg(long)]
    stop_on_error: bool,

    /// randomize intervals around the base interval
    #[arg(short, long)]
    randomize: bool,

    /// none, low, medium, high or extreme
    #[arg(long)]
    humanness: Option<String>,

    /// uniform, normal, exponential or triangular
    #[arg(long)]
    distribution: Option<String>,

    /// fraction of the base interval the random offset may span
    #[arg(long)]
    variance: Option<f64>,

    /// radius in pixels to scatter click locations within
    #[arg(long)]
    jitter: Option<f64>,

    /// only click while this process is running
    #[arg(short, long)]
    process: Option<String>,

    /// seed for reproducible randomization
    #[arg(long)]
    seed: Option<u64>,

    /// log clicks instead of sending input
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn has_location(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// Loads the config file, if any, and applies command-line overrides.
    fn app_config(&self) -> Result<AppConfig> {
        let mut app = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        let session = &mut app.session;
        if self.has_location() {
            session.location = Point::new(
                self.x.unwrap_or(session.location.x),
                self.y.unwrap_or(session.location.y),
            );
        }
        if let Some(button) = &self.button {
            session.click_kind = button.parse()?;
        }
        if let Some(interval) = &self.interval {
            session.base_interval = parse_duration(interval)?;
        }
        if let Some(max_clicks) = self.max_clicks {
            session.max_clicks = Some(max_clicks);
        }
        if let Some(max_duration) = &self.max_duration {
            session.max_duration = Some(parse_duration(max_duration)?);
        }
        if let Some(jitter) = self.jitter {
            session.location_jitter = jitter;
        }
        if let Some(process) = &self.process {
            session.target_process = Some(process.clone());
        }
        session.stop_on_error |= self.stop_on_error;
        session.randomize |= self.randomize;

        let randomizer = &mut app.randomizer;
        if let Some(humanness) = &self.humanness {
            randomizer.humanness = humanness.parse()?;
        }
        if let Some(distribution) = &self.distribution {
            randomizer.distribution = distribution.parse()?;
        }
        if let Some(variance) = self.variance {
            randomizer.variance = variance;
        }

        app.validate()?;
        Ok(app)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args, None).await,
        Command::Schedule { at, run: args } => {
            let target = DateTime::parse_from_rfc3339(&at)
                .with_context(|| format!("invalid timestamp '{at}'"))?
                .with_timezone(&Utc);
            run(args, Some(target)).await
        }
        Command::InitConfig { path } => {
            AppConfig::default().save_to_file(&path)?;
            println!("{} {}", "Wrote default configuration to".green(), path.bold());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "cadence_clicker=debug,cadence=debug"
    } else {
        "cadence_clicker=info,cadence=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(args: RunArgs, start_at: Option<DateTime<Utc>>) -> Result<()> {
    let app = args.app_config()?;
    let mut session = app.session.clone();

    let target = match &session.target_process {
        Some(name) => Some(resolve_target(name)?),
        None => None,
    };

    let platform = platform_executor(args.dry_run);
    let executor: Arc<dyn ClickExecutor> = match target.as_ref().and_then(|t| t.pid) {
        Some(_) => Arc::new(TargetGuard::new(Arc::clone(&platform), TARGET_CHECK_EVERY)),
        None => Arc::clone(&platform),
    };

    let mut builder =
        AutomationSessionEngine::builder(executor).randomizer(app.randomizer.clone());
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    let engine = builder.build()?;

    let hotkeys = register_hotkeys(&app);
    let mut actions = hotkeys.as_ref().map(HotkeyManager::start_listener);

    if let Some(at) = start_at {
        let fired = wait_until(&app, at, &mut actions).await?;
        if !fired {
            return Ok(());
        }
        if !args.has_location() && args.config.is_none() {
            if let Some(location) = platform.current_location() {
                println!("Clicking at current pointer position {}", location.to_string().cyan());
                session.location = location;
            }
        }
    }

    engine.start_targeting(session.clone(), target).await?;
    print_banner(&app, &session);

    let mut status = engine.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                emergency_stop(&engine).await;
                break;
            }
            Some(action) = next_action(&mut actions) => match action {
                HotkeyAction::TogglePause => {
                    let state = engine.toggle_pause().await;
                    println!();
                    println!("{}", format!("Session {state}").yellow());
                }
                HotkeyAction::EmergencyStop => {
                    emergency_stop(&engine).await;
                    break;
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.state == SessionState::Idle && snapshot.last_session.is_some() {
                    break;
                }
                print_progress(&snapshot);
            }
        }
    }

    println!();
    match engine.status().last_session {
        Some(summary) => print_summary(&summary),
        None => println!("{}", "Session ended without a summary".yellow()),
    }
    Ok(())
}

fn resolve_target(name: &str) -> Result<TargetProcess> {
    let mut finder = ProcessFinder::new();
    match finder.resolve(name)? {
        Some(target) => {
            println!(
                "{} {} (PID {})",
                "Targeting".green(),
                target.name.bold(),
                target.pid.unwrap_or_default()
            );
            Ok(target)
        }
        None => {
            println!(
                "{}",
                format!("Process '{name}' not found, clicking without a liveness check").yellow()
            );
            Ok(TargetProcess::new(name))
        }
    }
}

#[cfg(windows)]
fn platform_executor(dry_run: bool) -> Arc<dyn ClickExecutor> {
    if dry_run {
        Arc::new(DryRunClickExecutor::new())
    } else {
        Arc::new(cadence_clicker::SendInputClickExecutor::new())
    }
}

#[cfg(not(windows))]
fn platform_executor(dry_run: bool) -> Arc<dyn ClickExecutor> {
    if !dry_run {
        warn!("input injection is only available on Windows, running in dry-run mode");
    }
    Arc::new(DryRunClickExecutor::new())
}

fn register_hotkeys(app: &AppConfig) -> Option<HotkeyManager> {
    let mut manager = match HotkeyManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            warn!(error = %e, "global hotkeys unavailable");
            return None;
        }
    };

    let bindings = [
        (app.pause_hotkey.as_str(), HotkeyAction::TogglePause),
        (app.emergency_hotkey.as_str(), HotkeyAction::EmergencyStop),
    ];
    for (hotkey, action) in bindings {
        if let Err(e) = manager.register(hotkey, action) {
            warn!(error = %e, "hotkey not registered");
        }
    }
    Some(manager)
}

async fn next_action(
    actions: &mut Option<mpsc::UnboundedReceiver<HotkeyAction>>,
) -> Option<HotkeyAction> {
    match actions {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Blocks until `at`, printing a countdown. Returns `false` if interrupted.
///
/// Hotkey presses are consumed here so none carry over into the session:
/// emergency stop cancels the start, pause-toggle has nothing to pause yet.
async fn wait_until(
    app: &AppConfig,
    at: DateTime<Utc>,
    actions: &mut Option<mpsc::UnboundedReceiver<HotkeyAction>>,
) -> Result<bool> {
    let scheduler = DeferredExecutionScheduler::new(app.scheduler.clone())?;
    if let Err(e) = scheduler.validate_system_time() {
        println!("{} {}", "Warning:".yellow().bold(), e);
    }

    let mut fired = scheduler.schedule_signal(at)?;
    let mut countdown = scheduler.subscribe();
    println!("{} {}", "Scheduled start at".green(), at.to_rfc3339().bold());

    loop {
        tokio::select! {
            result = &mut fired => {
                let fired_at = result.context("schedule was dropped before firing")?;
                debug!(%fired_at, "scheduled start fired");
                println!();
                return Ok(true);
            }
            _ = tokio::signal::ctrl_c() => {
                scheduler.cancel();
                println!();
                println!("{}", "Scheduled start cancelled".yellow());
                return Ok(false);
            }
            Some(action) = next_action(actions) => match action {
                HotkeyAction::EmergencyStop => {
                    scheduler.cancel();
                    println!();
                    println!("{}", "Scheduled start cancelled by emergency stop".red().bold());
                    return Ok(false);
                }
                HotkeyAction::TogglePause => {
                    debug!("pause toggle ignored during countdown");
                    println!();
                    println!("{}", "Nothing to pause before the session starts".yellow());
                }
            },
            changed = countdown.changed() => {
                if changed.is_err() {
                    return Ok(false);
                }
                let remaining = countdown.borrow_and_update().remaining;
                print!("\rStarting in {}   ", format_remaining(remaining).cyan());
                let _ = io::stdout().flush();
            }
        }
    }
}

async fn emergency_stop(engine: &AutomationSessionEngine) {
    let report = engine.emergency_stop().await;
    println!();
    let line = format!("Emergency stop in {:.1}ms", report.elapsed.as_secs_f64() * 1000.0);
    if report.within_budget {
        println!("{}", line.red().bold());
    } else {
        println!("{} {}", line.red().bold(), "(over budget)".yellow());
    }
}

fn print_banner(app: &AppConfig, session: &cadence_clicker::SessionConfiguration) {
    println!(
        "{} {} click at {} every {:?}",
        "Running:".green().bold(),
        session.click_kind,
        session.location,
        session.base_interval
    );
    if session.randomize {
        println!(
            "  randomized: {} distribution, {} humanness, variance {:.2}",
            app.randomizer.distribution, app.randomizer.humanness, app.randomizer.variance
        );
    }
    println!(
        "  {} pause/resume, {} or Ctrl+C emergency stop",
        app.pause_hotkey.bold(),
        app.emergency_hotkey.bold()
    );
}

fn print_progress(snapshot: &StatusSnapshot) {
    let Some(stats) = &snapshot.session else {
        return;
    };
    let health = match snapshot.health {
        cadence_clicker::HealthStatus::Healthy => snapshot.health.to_string().green(),
        cadence_clicker::HealthStatus::Warning => snapshot.health.to_string().yellow(),
        _ => snapshot.health.to_string().red(),
    };
    print!(
        "\r[{}] {} clicks  {:.1}/s  {:.0}% ok  {}   ",
        snapshot.state,
        stats.total_clicks,
        stats.clicks_per_second,
        stats.success_rate * 100.0,
        health
    );
    let _ = io::stdout().flush();
}

fn print_summary(summary: &SessionSummary) {
    let stats = &summary.statistics;
    println!("{}", "Session summary".bold().underline());
    println!("  stopped:      {:?}", summary.reason);
    println!("  duration:     {:.2?}", stats.duration);
    println!(
        "  clicks:       {} ({} ok, {} failed)",
        stats.total_clicks, stats.successful_clicks, stats.failed_clicks
    );
    println!("  success rate: {:.1}%", stats.success_rate * 100.0);
    println!("  rate:         {:.2} clicks/s", stats.clicks_per_second);
    println!("  mean latency: {:.2?}", stats.mean_latency);
    println!("  pauses:       {}", stats.pause_count);
    for (kind, count) in &summary.failures {
        println!("  {} {}x {}", "failure:".red(), count, kind);
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
