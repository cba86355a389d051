//! Mount a view of a directory with environment placeholders filled in.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use fuser::MountOption;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

use env_fs::env::{EnvSnapshot, ShellTracer, watcher};
use env_fs::fs::OverlayFs;
use env_fs::fs::fuser::FuserAdapter;
use env_fs::fs::overlay::BinaryPolicy;

#[derive(Parser)]
#[command(
    version,
    about = "Mirrors a directory into a mount point, substituting ${NAME} \
             placeholders from the parent shell's environment."
)]
struct Args {
    /// The directory whose files are mirrored.
    base_dir: PathBuf,

    /// The path at which the view is mounted.
    view_dir: PathBuf,

    /// How files that do not decode as UTF-8 text are served.
    #[arg(long, env = "ENV_FS_BINARY_FILES", default_value = "pass-through")]
    binary_files: BinaryPolicy,

    /// The bpftrace executable used to observe the parent shell.
    #[arg(long, env = "ENV_FS_TRACER", default_value = "bpftrace")]
    tracer: PathBuf,

    /// Serve only the environment captured at startup, without watching the
    /// parent shell for new assignments.
    #[arg(long)]
    no_watch: bool,
}

fn main() {
    let args = Args::parse();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(fmt::format::FmtSpan::EXIT)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("Failed to create Tokio runtime: {e}"));
    if let Err(e) = runtime.block_on(run(args, runtime.handle().clone())) {
        error!("env-fs failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args, handle: tokio::runtime::Handle) -> Result<(), std::io::Error> {
    let base_meta = tokio::fs::metadata(&args.base_dir).await.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!(
                "Cannot read base directory '{}': {e}",
                args.base_dir.display()
            ),
        )
    })?;
    if !base_meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!(
                "Base path '{}' is not a directory.",
                args.base_dir.display()
            ),
        ));
    }

    prepare_view_dir(&args.view_dir).await?;

    let env = Arc::new(EnvSnapshot::from_process_env());
    let watcher = if args.no_watch {
        None
    } else {
        let tracer = ShellTracer::for_parent_shell(&args.tracer);
        info!(
            shell_pid = %tracer.pid(),
            "Watching the parent shell for new assignments."
        );
        Some(watcher::spawn(tracer, Arc::clone(&env)))
    };

    let overlay = OverlayFs::new(&args.base_dir, Arc::clone(&env), args.binary_files);
    let adapter = FuserAdapter::new(overlay, handle);

    let options = vec![
        MountOption::RO,
        MountOption::AutoUnmount,
        MountOption::FSName("env-fs".to_owned()),
    ];
    // spawn_mount2 gives a BackgroundSession; dropping it unmounts the view.
    let session = fuser::spawn_mount2(adapter, &args.view_dir, &options)?;
    info!(
        "Mounted at {}. Press Ctrl+C to unmount.",
        args.view_dir.display()
    );

    wait_for_exit().await?;

    info!("Unmounting...");
    drop(session);
    if let Some(watcher) = watcher {
        watcher.shutdown();
    }
    Ok(())
}

/// Prepares the view directory.
///
/// The mount shadows whatever the directory holds, so an existing non-empty
/// directory is refused rather than silently hidden. A missing directory is
/// created, parents included.
async fn prepare_view_dir(view_dir: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(view_dir).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "View directory '{}' is not empty. Mounting over it would hide its contents.",
                        view_dir.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(view_dir).await?;
            info!(path = %view_dir.display(), "Created view directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    tokio::select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}
