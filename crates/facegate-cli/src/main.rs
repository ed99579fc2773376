use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face enrollment and recognition CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face image under an identity
    Enroll {
        /// Identity to enroll (case-sensitive)
        identity: String,
        /// Image file containing exactly one face
        image: PathBuf,
    },
    /// Recognize the face in an image
    Recognize {
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        identity: String,
    },
    /// Show daemon status
    Status,
    /// Score image quality locally, without the daemon
    Quality {
        image: PathBuf,
    },
}

// `#[zbus::proxy]` generates `FacegateProxy` (async) and `FacegateProxyBlocking`.
#[zbus::proxy(
    interface = "org.facegate.Facegate1",
    default_service = "org.facegate.Facegate1",
    default_path = "/org/facegate/Facegate1"
)]
trait Facegate {
    async fn register(&self, identity: &str, image: &[u8]) -> zbus::Result<String>;
    async fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    async fn list_users(&self) -> zbus::Result<String>;
    async fn delete_user(&self, identity: &str) -> zbus::Result<bool>;
    async fn health(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll { identity, image } => {
            let bytes = read_image(&image)?;
            let reply = connect(cli.system).await?.register(&identity, &bytes).await?;
            println!("{}", format_enroll(&serde_json::from_str(&reply)?));
        }
        Commands::Recognize { image } => {
            let bytes = read_image(&image)?;
            let reply = connect(cli.system).await?.recognize(&bytes).await?;
            println!("{}", format_recognize(&serde_json::from_str(&reply)?));
        }
        Commands::List => {
            let reply = connect(cli.system).await?.list_users().await?;
            println!("{}", format_users(&serde_json::from_str(&reply)?));
        }
        Commands::Remove { identity } => {
            if connect(cli.system).await?.delete_user(&identity).await? {
                println!("Removed {identity}");
            } else {
                println!("{identity} is not enrolled");
            }
        }
        Commands::Status => {
            let reply = connect(cli.system).await?.health().await?;
            let status: Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Quality { image } => {
            // Runs locally; the daemon is not needed.
            let img =
                image::open(&image).with_context(|| format!("opening {}", image.display()))?;
            let report = facegate_core::quality::assess(&img);
            println!("sharpness:  {:.2}", report.sharpness);
            println!("brightness: {:.2}", report.brightness);
            println!("contrast:   {:.2}", report.contrast);
            println!("live:       {}", if report.is_live { "yes" } else { "no" });
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<FacegateProxy<'static>> {
    let bus = if system { "system" } else { "session" };
    tracing::debug!(bus, "connecting to facegated");
    let connection = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .map_err(|e| {
        tracing::warn!(bus, error = %e, "D-Bus connection failed");
        e
    })
    .context("connecting to D-Bus")?;
    FacegateProxy::new(&connection)
        .await
        .map_err(|e| {
            tracing::warn!(bus, error = %e, "facegated proxy setup failed");
            e
        })
        .context("facegated is not reachable")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "image loaded");
    Ok(bytes)
}

fn liveness_note(reply: &Value) -> &'static str {
    match reply["liveness_metrics"]["is_live"].as_bool() {
        Some(false) => " (warning: low image quality)",
        _ => "",
    }
}

fn format_enroll(reply: &Value) -> String {
    format!(
        "Enrolled {} ({}/{}){}",
        reply["identity"].as_str().unwrap_or("?"),
        reply["encodings_count"],
        reply["capacity"],
        liveness_note(reply)
    )
}

fn format_recognize(reply: &Value) -> String {
    if let Some(reason) = reply["reason"].as_str() {
        return format!("Not recognized: {reason}");
    }
    let identity = reply["identity"].as_str().unwrap_or("unknown");
    if reply["accepted"].as_bool().unwrap_or(false) {
        format!(
            "Recognized {identity} (confidence {}, distance {}){}",
            reply["confidence"],
            reply["distance"],
            liveness_note(reply)
        )
    } else {
        format!(
            "Not recognized: closest is {identity} at distance {} (threshold {})",
            reply["distance"], reply["threshold"]
        )
    }
}

fn format_users(reply: &Value) -> String {
    let users = reply["users"].as_array().cloned().unwrap_or_default();
    if users.is_empty() {
        return "No identities enrolled".to_string();
    }
    users
        .iter()
        .map(|u| {
            format!(
                "{}\t{}",
                u["identity"].as_str().unwrap_or("?"),
                u["encodings_count"]
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
