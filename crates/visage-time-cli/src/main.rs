use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use visage_time_hw::Camera;

#[zbus::proxy(
    interface = "org.freedesktop.VisageTime1",
    default_service = "org.freedesktop.VisageTime1",
    default_path = "/org/freedesktop/VisageTime1"
)]
trait VisageTime {
    async fn sign_in(&self, credential: &str) -> zbus::Result<String>;
    async fn sign_out(&self) -> zbus::Result<()>;
    async fn navigate(&self, path: &str) -> zbus::Result<String>;
    async fn start_detection(&self) -> zbus::Result<()>;
    async fn capture_face(&self) -> zbus::Result<()>;
    async fn retake_face(&self) -> zbus::Result<()>;
    async fn register(&self, name: &str, employee_id: &str, department: &str)
        -> zbus::Result<String>;
    async fn registration(&self) -> zbus::Result<String>;
    async fn attendance(&self) -> zbus::Result<String>;
    async fn dashboard(&self) -> zbus::Result<String>;
    async fn report(
        &self,
        date: &str,
        search: &str,
        department: &str,
        status: &str,
    ) -> zbus::Result<String>;
    async fn notifications(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "visage-time", about = "Visage Time attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with a Google id token from the provider popup flow
    Login {
        #[arg(long)]
        id_token: String,
    },
    /// Sign out and return to the login view
    Logout,
    /// Open a view: /, /register, /attendance, /reports, /login
    Open { path: String },
    /// Start face detection on the current capture view
    Detect,
    /// Capture the detected face (registration view)
    Capture,
    /// Discard the captured face and detect again
    Retake,
    /// Register an employee with the captured face
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        employee_id: String,
        #[arg(long)]
        department: String,
    },
    /// Show the attendance view: recognition result and recent records
    Attendance,
    /// Show dashboard statistics
    Dashboard,
    /// Show the daily attendance report
    Report {
        /// Report date (YYYY-MM-DD, default: today)
        #[arg(long, default_value = "")]
        date: String,
        /// Filter by name or employee id
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        department: String,
        /// present, late, absent or all
        #[arg(long, default_value = "all")]
        status: String,
    },
    /// Print and clear pending notifications
    Notifications,
    /// Show daemon status
    Status,
    /// Run camera diagnostics
    Test {
        /// Camera device (default: first capture device found)
        #[arg(long)]
        device: Option<String>,
        /// Where to save the test frame
        #[arg(long, default_value = "/tmp/visage-time-test.png")]
        output: PathBuf,
    },
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(e) => {
            tracing::debug!(error = %e, "daemon reply is not JSON");
            println!("{raw}");
        }
    }
}

async fn connect() -> Result<VisageTimeProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    tracing::debug!(unique_name = ?conn.unique_name(), "connected to session bus");
    VisageTimeProxy::new(&conn)
        .await
        .context("visage-timed is not running")
}

fn camera_test(device: Option<String>, output: PathBuf) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
    }
    for d in &devices {
        println!("  {}: {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let path = device
        .or_else(|| devices.first().map(|d| d.path.clone()))
        .context("no camera to test")?;
    tracing::debug!(device = %path, candidates = devices.len(), "opening camera for diagnostics");
    let camera = Camera::open(&path)?;
    println!(
        "Opened {path}: {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );

    let started = Instant::now();
    let mut last = None;
    for _ in 0..10 {
        let frame = camera.capture_frame()?;
        println!(
            "  frame {:>3}  brightness {:>6.1}",
            frame.sequence,
            frame.avg_brightness()
        );
        last = Some(frame);
    }
    let elapsed = started.elapsed();
    println!("10 frames in {:.2?} ({:.1} fps)", elapsed, 10.0 / elapsed.as_secs_f64());

    if let Some(frame) = last {
        std::fs::write(&output, frame.to_png()?)
            .with_context(|| format!("writing {}", output.display()))?;
        println!("Saved last frame to {}", output.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    run(cli.command).await
}

async fn run(command: Commands) -> Result<()> {
    // Diagnostics open the camera directly and need no daemon.
    if let Commands::Test { device, output } = command {
        return camera_test(device, output);
    }

    let proxy = connect().await?;
    match command {
        Commands::Login { id_token } => {
            let landed = proxy.sign_in(&id_token).await?;
            println!("Signed in, now on {landed}");
        }
        Commands::Logout => {
            proxy.sign_out().await?;
            println!("Signed out");
        }
        Commands::Open { path } => print_json(&proxy.navigate(&path).await?),
        Commands::Detect => {
            proxy.start_detection().await?;
            println!("Detecting...");
        }
        Commands::Capture => {
            proxy.capture_face().await?;
            println!("Face captured");
        }
        Commands::Retake => {
            proxy.retake_face().await?;
            println!("Detecting...");
        }
        Commands::Register {
            name,
            employee_id,
            department,
        } => print_json(&proxy.register(&name, &employee_id, &department).await?),
        Commands::Attendance => print_json(&proxy.attendance().await?),
        Commands::Dashboard => print_json(&proxy.dashboard().await?),
        Commands::Report {
            date,
            search,
            department,
            status,
        } => print_json(&proxy.report(&date, &search, &department, &status).await?),
        Commands::Notifications => print_json(&proxy.notifications().await?),
        Commands::Status => print_json(&proxy.status().await?),
        Commands::Test { .. } => {}
    }

    // Surface any toasts the command produced.
    let pending = proxy.notifications().await?;
    match serde_json::from_str(&pending) {
        Ok(serde_json::Value::Array(toasts)) => {
            for t in toasts {
                let mark = if t["variant"] == "destructive" { "!" } else { "*" };
                eprintln!(
                    "{mark} {}: {}",
                    t["title"].as_str().unwrap_or_default(),
                    t["description"].as_str().unwrap_or_default()
                );
            }
        }
        Ok(other) => tracing::warn!(reply = %other, "unexpected notifications payload"),
        Err(e) => tracing::warn!(error = %e, "malformed notifications payload"),
    }

    Ok(())
}
