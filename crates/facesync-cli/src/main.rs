use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use facesync_core::{DetectedFace, Identity, RecognitionResult};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.facesync.Daemon1",
    default_service = "org.facesync.Daemon1",
    default_path = "/org/facesync/Daemon1"
)]
trait FaceSync {
    fn get_logs(&self) -> zbus::Result<Vec<String>>;
    fn delete_logs(&self) -> zbus::Result<bool>;
    fn get_faces(&self) -> zbus::Result<String>;
    fn detect(&self, image: &str) -> zbus::Result<String>;
    fn enroll(&self, image: &str, identity: &str) -> zbus::Result<bool>;
    fn unenroll(&self, token: &str) -> zbus::Result<bool>;
    fn recognize(&self, image: &str, origin: &str) -> zbus::Result<String>;
    fn get_snapshot(&self, handle: &str) -> zbus::Result<Vec<u8>>;
    fn get_reference_image(&self, token: &str) -> zbus::Result<Vec<u8>>;
    fn relabel(&self, token: &str, label: &str) -> zbus::Result<bool>;
    fn configure(&self, api_key: &str, api_secret: &str, threshold: f64) -> zbus::Result<bool>;
    fn sync(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn face_detected(&self, payload: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "facesync", about = "FaceSync face recognition CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the daemon's recent log lines
    Logs,
    /// Clear the daemon's log buffer
    ClearLogs,
    /// List enrolled faces
    Faces,
    /// Detect faces in an image without recognizing them
    Detect {
        image: PathBuf,
    },
    /// Enroll the face in an image under a label
    Enroll {
        image: PathBuf,
        /// Name shown when this face is recognized
        #[arg(short, long)]
        label: String,
        /// Which detected face to enroll when the image has several
        #[arg(long)]
        face: Option<usize>,
    },
    /// Remove an enrolled face
    Unenroll {
        token: String,
    },
    /// Rename an enrolled face
    Relabel {
        token: String,
        label: String,
    },
    /// Recognize every face in an image
    Recognize {
        image: PathBuf,
        /// Tag carried through to the FaceDetected event
        #[arg(long, default_value = "")]
        origin: String,
    },
    /// Save a face snapshot from a recognition result
    Snapshot {
        handle: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Save a reference image of an enrolled face
    ReferenceImage {
        token: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Set the provider credentials and match threshold
    Configure {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        api_secret: String,
        /// Confidence a match must exceed (default 75)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Reconcile the remote face set with the enrolled faces now
    Sync,
    /// Show daemon status
    Status,
    /// Print FaceDetected events as they arrive
    Watch,
}

fn read_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Pick the face to enroll: the only one, or the one chosen with `--face`.
fn choose_face(mut faces: Vec<DetectedFace>, index: Option<usize>) -> Result<DetectedFace> {
    match (faces.len(), index) {
        (0, _) => bail!("no face found in image"),
        (1, None) => Ok(faces.remove(0)),
        (n, None) => {
            for (i, face) in faces.iter().enumerate() {
                let b = &face.bounding_box;
                eprintln!(
                    "  [{i}] {}x{} at ({}, {}), {} {}",
                    b.width, b.height, b.left, b.top, face.attributes.gender, face.attributes.age
                );
            }
            bail!("{n} faces found; pick one with --face")
        }
        (n, Some(i)) if i < n => Ok(faces.swap_remove(i)),
        (n, Some(i)) => bail!("--face {i} is out of range; image has {n} face(s)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = FaceSyncProxy::new(&conn)
        .await
        .context("facesyncd is not reachable")?;

    match cli.command {
        Commands::Logs => {
            for line in proxy.get_logs().await? {
                println!("{line}");
            }
        }
        Commands::ClearLogs => {
            proxy.delete_logs().await?;
            println!("Logs cleared");
        }
        Commands::Faces => {
            let faces: HashMap<String, Identity> = serde_json::from_str(&proxy.get_faces().await?)?;
            if faces.is_empty() {
                println!("No faces enrolled");
            }
            let mut faces: Vec<_> = faces.into_values().collect();
            faces.sort_by(|a, b| a.label.cmp(&b.label));
            for face in faces {
                println!(
                    "{}  {:<20} {} {}",
                    face.token, face.label, face.attributes.gender, face.attributes.age
                );
            }
        }
        Commands::Detect { image } => {
            print_json(&proxy.detect(&read_image(&image)?).await?)?;
        }
        Commands::Enroll { image, label, face } => {
            let encoded = read_image(&image)?;
            let faces: Vec<DetectedFace> = serde_json::from_str(&proxy.detect(&encoded).await?)?;
            let chosen = choose_face(faces, face)?;
            let identity = Identity {
                token: chosen.token,
                label,
                attributes: chosen.attributes,
            };
            proxy
                .enroll(&encoded, &serde_json::to_string(&identity)?)
                .await?;
            println!("Enrolled {} as '{}'", identity.token, identity.label);
        }
        Commands::Unenroll { token } => {
            if proxy.unenroll(&token).await? {
                println!("Removed {token}");
            } else {
                println!("{token} was not enrolled");
            }
        }
        Commands::Relabel { token, label } => {
            proxy.relabel(&token, &label).await?;
            println!("Relabeled {token} as '{label}'");
        }
        Commands::Recognize { image, origin } => {
            let raw = proxy.recognize(&read_image(&image)?, &origin).await?;
            let results: Vec<RecognitionResult> = serde_json::from_str(&raw)?;
            if results.is_empty() {
                println!("No faces found");
            }
            for r in results {
                println!(
                    "{:<20} confidence {:>5.1}  {} {} {}  snapshot {}",
                    r.label, r.confidence, r.gender, r.age, r.emotion, r.face_image_token
                );
            }
        }
        Commands::Snapshot { handle, output } => {
            let jpeg = proxy.get_snapshot(&handle).await?;
            std::fs::write(&output, jpeg)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Saved {}", output.display());
        }
        Commands::ReferenceImage { token, output } => {
            let bytes = proxy.get_reference_image(&token).await?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Saved {}", output.display());
        }
        Commands::Configure {
            api_key,
            api_secret,
            threshold,
        } => {
            proxy
                .configure(&api_key, &api_secret, threshold.unwrap_or(0.0))
                .await?;
            println!("Settings saved");
        }
        Commands::Sync => {
            print_json(&proxy.sync().await?)?;
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
        Commands::Watch => {
            let mut events = proxy.receive_face_detected().await?;
            eprintln!("Waiting for FaceDetected events (Ctrl-C to stop)");
            while let Some(signal) = events.next().await {
                match signal.args() {
                    Ok(args) => print_json(args.payload())?,
                    Err(e) => tracing::warn!(error = %e, "malformed FaceDetected signal"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facesync_core::{BoundingBox, FaceAttributes};

    fn faces(n: usize) -> Vec<DetectedFace> {
        (0..n)
            .map(|i| DetectedFace {
                token: format!("{i:032}"),
                bounding_box: BoundingBox::default(),
                attributes: FaceAttributes::default(),
            })
            .collect()
    }

    #[test]
    fn test_choose_single_face() {
        assert_eq!(choose_face(faces(1), None).unwrap().token, format!("{:032}", 0));
    }

    #[test]
    fn test_choose_requires_index_for_several_faces() {
        assert!(choose_face(faces(2), None).is_err());
        assert_eq!(choose_face(faces(2), Some(1)).unwrap().token, format!("{:032}", 1));
        assert!(choose_face(faces(2), Some(2)).is_err());
    }

    #[test]
    fn test_choose_no_faces() {
        assert!(choose_face(Vec::new(), Some(0)).is_err());
    }

    #[test]
    fn test_cli_parses_enroll() {
        let cli = Cli::try_parse_from(["facesync", "enroll", "me.jpg", "--label", "Alice", "--face", "1"])
            .unwrap();
        match cli.command {
            Commands::Enroll { label, face, .. } => {
                assert_eq!(label, "Alice");
                assert_eq!(face, Some(1));
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_cli_parses_sync_on_system_bus() {
        let cli = Cli::try_parse_from(["facesync", "sync", "--system"]).unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::Sync));
    }
}
