use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{gallery, AttendanceLedger, CaptureSession, Config, OnnxEmbedder};
use rollcall_hw::Camera;
use std::path::PathBuf;

mod console;

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn capture(&self) -> zbus::Result<String>;
    async fn confirm_enrollment(&self, name: &str) -> zbus::Result<String>;
    async fn decline_enrollment(&self) -> zbus::Result<bool>;
    async fn attendance(&self, date: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn quit(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance kiosk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kiosk in this terminal (camera and models opened directly)
    Run,
    /// Ask the daemon to capture a frame and record attendance
    Capture,
    /// Register the face from the daemon's last unrecognized capture
    Enroll {
        /// Name to register the face under
        name: String,
    },
    /// Discard the daemon's pending registration
    Skip,
    /// List who was present on a date
    Attendance {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Show daemon status
    Status,
    /// Stop the daemon
    Stop,
    /// Add a ledger row for every reference image not yet listed
    Reconcile,
    /// Print the attendance ledger
    Roster,
    /// Run camera diagnostics
    Test {
        /// V4L2 device (default: configured camera)
        #[arg(short, long)]
        device: Option<String>,
        /// Save the captured frame to this path
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = Config::load()?;
            tokio::task::spawn_blocking(move || run_console(&config)).await??;
        }
        Commands::Capture => {
            let proxy = connect().await?;
            print_json(&proxy.capture().await?)?;
        }
        Commands::Enroll { name } => {
            let proxy = connect().await?;
            print_json(&proxy.confirm_enrollment(&name).await?)?;
        }
        Commands::Skip => {
            let proxy = connect().await?;
            if proxy.decline_enrollment().await? {
                println!("Registration skipped.");
            } else {
                println!("No registration was pending.");
            }
        }
        Commands::Attendance { date } => {
            let proxy = connect().await?;
            print_json(&proxy.attendance(date.as_deref().unwrap_or("")).await?)?;
        }
        Commands::Status => {
            let proxy = connect().await?;
            print_json(&proxy.status().await?)?;
        }
        Commands::Stop => {
            let proxy = connect().await?;
            proxy.quit().await?;
            println!("rollcalld stopped.");
        }
        Commands::Reconcile => {
            let config = Config::load()?;
            let roster = gallery::roster(&config.image_dir)?;
            let mut ledger = AttendanceLedger::open(&config.ledger_path)?;
            let added = ledger.reconcile(&roster)?;
            println!(
                "{added} row(s) added; {} identities in {}",
                ledger.len(),
                ledger.path().display()
            );
        }
        Commands::Roster => {
            let config = Config::load()?;
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            print_ledger(&ledger);
        }
        Commands::Test { device, save } => {
            let config = Config::load()?;
            camera_test(device.as_deref().unwrap_or(&config.camera_device), save)?;
        }
    }

    Ok(())
}

async fn connect() -> Result<RollcallProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

fn print_json(reply: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(reply)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_console(config: &Config) -> Result<()> {
    tracing::info!(device = %config.camera_device, "starting console kiosk");
    let camera = Camera::open(&config.camera_device)?;
    camera.warm_up(config.warmup_frames);
    let embedder = OnnxEmbedder::load(&config.model_dir)
        .with_context(|| format!("cannot load face models from {}", config.model_dir.display()))?;

    let mut session = CaptureSession::start(config.session(), camera, embedder)?;
    let status = session.status();
    println!(
        "{} face(s) in gallery, {} identities on the roster.",
        status.gallery_size, status.roster_size
    );

    let stdin = std::io::stdin();
    let mut prompt = console::ConsolePrompt::new(stdin.lock(), std::io::stdout());
    session.run(&mut prompt)?;
    Ok(())
}

fn print_ledger(ledger: &AttendanceLedger) {
    let width = ledger
        .identities()
        .map(|i| i.chars().count())
        .max()
        .unwrap_or(0)
        .max("Identity".len());

    let mut header = format!("{:<width$}", "Identity");
    for date in ledger.dates() {
        header.push_str(&format!("  {}", date.format("%Y-%m-%d")));
    }
    println!("{header}");

    for row in ledger.rows() {
        let mut line = format!("{:<width$}", row.identity);
        for cell in &row.cells {
            match cell {
                Some(t) => line.push_str(&format!("  {:<10}", t.format("%H:%M:%S"))),
                None => line.push_str(&format!("  {:<10}", "-")),
            }
        }
        println!("{}", line.trim_end());
    }
}

fn camera_test(device: &str, save: Option<PathBuf>) -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
    }
    for d in &devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    println!("Opening {device}...");
    let camera = Camera::open(device)?;
    println!(
        "Negotiated {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );

    let frame = camera.capture_frame()?;
    println!(
        "Frame #{}: {}x{}, brightness {:.1}, dark: {}",
        frame.sequence,
        frame.image.width(),
        frame.image.height(),
        frame.avg_brightness(),
        frame.is_dark
    );
    if frame.image.width() == 0 || frame.image.height() == 0 {
        bail!("camera returned an empty frame");
    }

    if let Some(path) = save {
        frame
            .image
            .save(&path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}
