use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    default_data_dir, enrollment_fingerprint, CacheError, EnrollmentSource, GalleryStore,
};
use rollcall_store::{name_from_path, prepare_image, CommandExtractor, FaceStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Upper bound on any daemon call, so a stuck daemon cannot hang the CLI.
const DBUS_METHOD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Enrollment database
    #[arg(long, global = true, env = "ROLLCALL_DB_PATH")]
    db: Option<PathBuf>,

    /// Gallery cache file
    #[arg(long, global = true, env = "ROLLCALL_CACHE_PATH")]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face image
    Enroll {
        /// Identity name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
        /// Image file (any format the image crate decodes)
        image: PathBuf,
    },
    /// Enroll every image in a directory, named by file stem
    EnrollDir {
        dir: PathBuf,
    },
    /// List enrolled images
    List,
    /// Remove an enrollment row
    Remove {
        /// Row ID from `rollcall list`
        id: i64,
    },
    /// Inspect or manage the gallery cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// Show daemon status
    Status,
    /// Show this session's attendance
    Attendance,
    /// End the daemon's attendance session
    Stop,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache contents and whether it matches the enrollment db
    Info,
    /// Delete the cache so the daemon rebuilds it on next start
    Clear,
    /// Rebuild the cache now
    Rebuild {
        /// Embedding extractor command line
        #[arg(long, env = "ROLLCALL_EXTRACTOR_CMD")]
        extractor: String,
        /// Seconds allowed per enrollment image before the extractor is killed
        #[arg(long, env = "ROLLCALL_EXTRACTOR_TIMEOUT_SECS", default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn status(&self) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .unwrap_or_else(|| default_data_dir().join("faces.db"));
    let cache_path = cli
        .cache
        .unwrap_or_else(|| default_data_dir().join("encodings.json"));

    match cli.command {
        Commands::Enroll { name, image } => {
            let store = open_store(&db_path)?;
            let name = match name {
                Some(n) => n,
                None => name_from_path(&image)
                    .with_context(|| format!("cannot derive a name from {}", image.display()))?,
            };
            let id = enroll_one(&store, &name, &image)?;
            println!("Enrolled {} as id {id}", name.trim());
        }
        Commands::EnrollDir { dir } => {
            let store = open_store(&db_path)?;
            let images = collect_images(&dir)?;
            if images.is_empty() {
                bail!("no images found in {}", dir.display());
            }
            let mut enrolled = 0;
            for path in &images {
                let Some(name) = name_from_path(path) else {
                    eprintln!("skipping {}: no usable file name", path.display());
                    continue;
                };
                match enroll_one(&store, &name, path) {
                    Ok(id) => {
                        println!("  {id:>4}  {name}");
                        enrolled += 1;
                    }
                    Err(e) => eprintln!("skipping {}: {e:#}", path.display()),
                }
            }
            println!("Enrolled {enrolled} of {} images", images.len());
        }
        Commands::List => {
            let store = open_store(&db_path)?;
            let faces = store.list()?;
            if faces.is_empty() {
                println!("No faces enrolled");
            } else {
                println!("{:>4}  {:<24}  {:>8}", "ID", "NAME", "BYTES");
                for face in faces {
                    println!("{:>4}  {:<24}  {:>8}", face.id, face.name, face.image_bytes);
                }
            }
        }
        Commands::Remove { id } => {
            let store = open_store(&db_path)?;
            let name = store.name_of(id)?;
            if store.remove(id)? {
                println!("Removed {} (id {id})", name.unwrap_or_default());
            } else {
                bail!("no enrollment with id {id}");
            }
        }
        Commands::Cache { command } => {
            let gallery_store = GalleryStore::new(&cache_path);
            match command {
                CacheCommand::Info => cache_info(&gallery_store, &db_path)?,
                CacheCommand::Clear => {
                    if gallery_store.invalidate()? {
                        println!("Removed {}", cache_path.display());
                    } else {
                        println!("No cache at {}", cache_path.display());
                    }
                }
                CacheCommand::Rebuild {
                    extractor,
                    timeout_secs,
                } => {
                    let store = open_store(&db_path)?;
                    let mut extractor = CommandExtractor::from_command_line(&extractor)
                        .context("extractor command is blank")?
                        .with_timeout(Duration::from_secs(timeout_secs.max(1)));
                    let report = gallery_store.rebuild(&store, &mut extractor)?;
                    gallery_store.save(&report.gallery, Some(&report.fingerprint))?;
                    println!(
                        "Cached {} embeddings from {} images ({} skipped) to {}",
                        report.gallery.len(),
                        report.images,
                        report.skipped,
                        cache_path.display()
                    );
                }
            }
        }
        Commands::Status => {
            let proxy = connect().await?;
            let status = proxy.status().await?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Attendance => {
            let proxy = connect().await?;
            let records: Vec<serde_json::Value> =
                serde_json::from_str(&proxy.list_attendance().await?)?;
            if records.is_empty() {
                println!("Nobody recorded yet");
            }
            for record in records {
                println!(
                    "{:<24}  {}",
                    record["identity"].as_str().unwrap_or("?"),
                    record["first_seen"].as_str().unwrap_or("?")
                );
            }
        }
        Commands::Stop => {
            let proxy = connect().await?;
            proxy.stop().await?;
            println!("Session stopped");
        }
    }

    Ok(())
}

async fn connect() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::connection::Builder::session()?
        .method_timeout(DBUS_METHOD_TIMEOUT)
        .build()
        .await
        .context("cannot reach the D-Bus session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("cannot create rollcalld proxy")
}

fn open_store(path: &Path) -> Result<FaceStore> {
    FaceStore::open(path).with_context(|| format!("failed to open {}", path.display()))
}

fn enroll_one(store: &FaceStore, name: &str, image: &Path) -> Result<i64> {
    let bytes = prepare_image(image)?;
    Ok(store.insert(name, &bytes)?)
}

/// Image files directly inside `dir`, sorted by path.
fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if is_image {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn cache_info(gallery_store: &GalleryStore, db_path: &Path) -> Result<()> {
    let path = gallery_store.cache_path().display();
    let cached = match gallery_store.load() {
        Ok(cached) => cached,
        Err(CacheError::Miss(_)) => {
            println!("No cache at {path}");
            return Ok(());
        }
        Err(e) => {
            println!("Cache at {path} is unusable: {e}");
            return Ok(());
        }
    };

    println!("Cache:       {path}");
    println!("Created:     {}", cached.created_at.to_rfc3339());
    println!("Entries:     {}", cached.gallery.len());
    println!(
        "Dimension:   {}",
        cached.gallery.dimension().map_or("-".to_string(), |d| d.to_string())
    );
    println!("Identities:  {}", cached.gallery.identities().join(", "));

    let store = open_store(db_path)?;
    println!("Enrolled:    {} images", store.count()?);
    let current = enrollment_fingerprint(&store.records()?);
    let state = match cached.fingerprint.as_deref() {
        Some(f) if f == current => "current",
        Some(_) => "stale",
        None => "unknown (no fingerprint)",
    };
    println!("Enrollment:  {state}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_images_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["carol.PNG", "alice.jpg", "notes.txt", "bob.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let names: Vec<String> = collect_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alice.jpg", "bob.jpeg", "carol.PNG"]);
    }

    #[test]
    fn test_collect_images_missing_dir() {
        assert!(collect_images(Path::new("/nonexistent/rollcall-enroll")).is_err());
    }

    #[test]
    fn test_cli_parses_cache_rebuild() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "--db",
            "/tmp/f.db",
            "cache",
            "rebuild",
            "--extractor",
            "face-embed --json",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/f.db")));
        match cli.command {
            Commands::Cache {
                command:
                    CacheCommand::Rebuild {
                        extractor,
                        timeout_secs,
                    },
            } => {
                assert_eq!(extractor, "face-embed --json");
                assert_eq!(timeout_secs, 10);
            }
            _ => panic!("wrong command"),
        }
    }
}
