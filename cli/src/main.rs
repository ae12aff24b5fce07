//! album-upload - Command-line interface for the upload engine.
//!
//! Uploads photos to an album one file at a time and renders a progress row
//! per file on stderr. Ctrl-C aborts the running transfer.

use clap::Parser;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use upload_engine::{
    fs_ops, view::format_bytes, AlbumContext, BatchSummary, Protocol, TaskId, TaskSnapshot,
    TaskStatus, TaskView, UploadConfig, UploadCoordinator, UploadObserver,
};

/// album-upload - Upload photos to an album
#[derive(Parser, Debug)]
#[command(name = "album-upload")]
#[command(version = "0.1.0")]
#[command(about = "Upload files to an album, one at a time, with progress tracking")]
struct Args {
    /// URL of the album page, e.g. https://photos.example/album/abc123
    #[arg(long, value_name = "URL")]
    album_url: String,

    /// Backend protocol: direct or signed
    #[arg(long, value_name = "PROTOCOL", default_value = "direct")]
    protocol: String,

    /// Endpoint returning signed upload URLs (signed protocol only)
    #[arg(long, value_name = "URL")]
    sign_endpoint: Option<String>,

    /// How many times failed files are queued again
    #[arg(long, value_name = "N", default_value_t = 0)]
    retries: u32,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Print the final task list as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Files or directories to upload
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
}

/// CLI implementation of UploadObserver: one row per file on stderr
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    rows: Mutex<HashMap<TaskId, TaskView>>,
    last_progress_update: Mutex<Instant>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        let now = Instant::now();
        CliProgress {
            verbose,
            start_time: now,
            rows: Mutex::new(HashMap::new()),
            last_progress_update: Mutex::new(now),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let mins = secs / 60;
        let secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskView>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn print_row(&self, task: &TaskSnapshot) {
        let row = TaskView::from_snapshot(task);
        eprint!("\r{}", row.render());
        if task.status.is_terminal() {
            eprintln!();
        }
        self.rows().insert(task.id, row);
    }
}

impl UploadObserver for CliProgress {
    fn on_task_added(&self, task: &TaskSnapshot) {
        if self.verbose {
            eprintln!("Queued: {} ({})", task.filename, format_bytes(task.size));
        }
        self.rows().insert(task.id, TaskView::from_snapshot(task));
    }

    fn on_task_started(&self, task: &TaskSnapshot) {
        self.print_row(task);
    }

    fn on_task_progress(&self, id: TaskId, percent: u8) {
        let rendered = {
            let mut rows = self.rows();
            let Some(row) = rows.get_mut(&id) else {
                return;
            };
            row.set_progress(percent);
            row.render()
        };

        // Throttle progress updates to avoid spam (max once per 200ms)
        let mut last = self
            .last_progress_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if percent < 100 && last.elapsed() < Duration::from_millis(200) {
            return;
        }
        *last = Instant::now();

        eprint!("\r{}", rendered);
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn on_task_finished(&self, task: &TaskSnapshot) {
        self.print_row(task);
    }

    fn on_task_aborted(&self, task: &TaskSnapshot) {
        eprintln!();
        eprintln!("Aborted: {}", task.filename);
        self.rows().insert(task.id, TaskView::from_snapshot(task));
    }

    fn on_task_removed(&self, id: TaskId) {
        self.rows().remove(&id);
    }

    fn on_batch_started(&self, pending: usize) {
        eprintln!("Uploading {} file(s)...", pending);
    }

    fn on_batch_completed(&self, summary: &BatchSummary) {
        let elapsed = self.start_time.elapsed();
        eprintln!(
            "Summary: {} done, {} failed{}",
            summary.done,
            summary.failed,
            if summary.aborted { " (aborted)" } else { "" }
        );
        eprintln!("Elapsed: {}", Self::format_duration(elapsed));
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let coordinator = match build_coordinator(&args) {
        Ok(coordinator) => coordinator,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            std::process::exit(2);
        }
    };

    let interrupted = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, aborting upload");
            interrupted.abort_all();
        }
    });

    let exit_code = match run_cli(&args, &coordinator).await {
        Ok(tasks) => {
            if args.json {
                match serde_json::to_string_pretty(&tasks) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error: failed to encode task list: {}", e),
                }
            }
            exit_code_for(&tasks)
        }
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve the album and protocol from the arguments.
fn build_coordinator(args: &Args) -> Result<UploadCoordinator, String> {
    let album = AlbumContext::from_page_url(&args.album_url).map_err(|e| e.to_string())?;

    let protocol = match args.protocol.to_lowercase().as_str() {
        "direct" => Protocol::Direct,
        "signed" => match &args.sign_endpoint {
            Some(sign_endpoint) => Protocol::Signed {
                sign_endpoint: sign_endpoint.clone(),
            },
            None => {
                return Err("Protocol 'signed' requires --sign-endpoint".to_string());
            }
        },
        _ => {
            return Err(format!(
                "Invalid protocol '{}'. Must be 'direct' or 'signed'",
                args.protocol
            ))
        }
    };

    let observer: Arc<dyn UploadObserver> = Arc::new(CliProgress::new(args.verbose));
    Ok(UploadConfig::new(album, protocol).coordinator(Some(observer)))
}

/// Main CLI logic - separated for testability
async fn run_cli(
    args: &Args,
    coordinator: &UploadCoordinator,
) -> Result<Vec<TaskSnapshot>, String> {
    let files = fs_ops::collect_files(&args.paths).map_err(|e| e.to_string())?;
    if files.is_empty() {
        return Err("No files to upload".to_string());
    }

    let report = coordinator.on_files_selected(files);
    for rejected in &report.rejected {
        eprintln!("Skipped: {}", rejected);
    }

    let mut summary = coordinator
        .submit()
        .await
        .map_err(|e| format!("Upload failed: {}", e))?;

    let mut retry = 0;
    while retry < args.retries {
        if summary.as_ref().is_some_and(|s| s.aborted) {
            break;
        }
        let requeued = coordinator.requeue_failed();
        if requeued == 0 {
            break;
        }
        retry += 1;
        info!("retry {}/{}: {} file(s)", retry, args.retries, requeued);
        summary = coordinator
            .submit()
            .await
            .map_err(|e| format!("Upload failed: {}", e))?;
    }

    let tasks = coordinator.tasks();
    let failed: Vec<_> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .collect();
    if !failed.is_empty() {
        eprintln!();
        eprintln!("Failed files:");
        for task in failed {
            eprintln!(
                "  {}: {}",
                task.filename,
                task.error.as_deref().unwrap_or("(unknown error)")
            );
        }
    }

    Ok(tasks)
}

/// 0 when every file was uploaded, 1 when some failed or were left pending
fn exit_code_for(tasks: &[TaskSnapshot]) -> i32 {
    if tasks.iter().all(|t| t.status == TaskStatus::Done) {
        0
    } else {
        1
    }
}
