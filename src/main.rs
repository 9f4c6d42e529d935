use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use sharpic::config::{Config, IngestConfig};
use sharpic::db::NewAccount;
use sharpic::{logging, IngestRequest, Library, Upload};

enum Command {
    Init,
    Signup {
        username: String,
        email: Option<String>,
    },
    AlbumCreate {
        username: String,
        title: String,
    },
    Albums {
        username: String,
    },
    Upload {
        username: String,
        album: Option<i64>,
        orientation: i32,
        paths: Vec<PathBuf>,
    },
    Fetch {
        username: String,
        image_id: i64,
        output: PathBuf,
    },
    Orient {
        username: String,
        image_id: i64,
        orientation: i32,
    },
}

struct Args {
    config_path: Option<PathBuf>,
    stderr_log: bool,
    command: Command,
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("Run `sharpic --help` for usage.");
    std::process::exit(1);
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| fail(&format!("{what} must be a number, got {value:?}")))
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut stderr_log = false;
    let mut email = None;
    let mut album = None;
    let mut orientation = 0;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let needs_value = |flag: &str| -> String {
            match args.get(i + 1) {
                Some(value) => value.clone(),
                None => fail(&format!("{flag} requires an argument")),
            }
        };
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("sharpic {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(needs_value("--config")));
                i += 1;
            }
            "--stderr" => stderr_log = true,
            "--email" => {
                email = Some(needs_value("--email"));
                i += 1;
            }
            "--album" => {
                album = Some(number(&needs_value("--album"), "--album"));
                i += 1;
            }
            "--up" => {
                orientation = number(&needs_value("--up"), "--up");
                i += 1;
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                fail(&format!("unknown option {flag}"));
            }
            value => positional.push(value.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let name = positional.next().unwrap_or_else(|| fail("missing command"));
    let mut arg = |what: &str| -> String {
        positional
            .next()
            .unwrap_or_else(|| fail(&format!("{name} requires {what}")))
    };

    let command = match name.as_str() {
        "init" => Command::Init,
        "signup" => Command::Signup {
            username: arg("USERNAME"),
            email,
        },
        "album-create" => Command::AlbumCreate {
            username: arg("USERNAME"),
            title: arg("TITLE"),
        },
        "albums" => Command::Albums {
            username: arg("USERNAME"),
        },
        "upload" => {
            let username = arg("USERNAME");
            let paths: Vec<PathBuf> = positional.by_ref().map(PathBuf::from).collect();
            if paths.is_empty() {
                fail("upload requires at least one PATH");
            }
            Command::Upload {
                username,
                album,
                orientation,
                paths,
            }
        }
        "fetch" => Command::Fetch {
            username: arg("USERNAME"),
            image_id: number(&arg("IMAGE_ID"), "IMAGE_ID"),
            output: PathBuf::from(arg("OUTPUT")),
        },
        "orient" => Command::Orient {
            username: arg("USERNAME"),
            image_id: number(&arg("IMAGE_ID"), "IMAGE_ID"),
            orientation: number(&arg("N"), "N"),
        },
        other => fail(&format!("unknown command {other}")),
    };

    Args {
        config_path,
        stderr_log,
        command,
    }
}

fn print_help() {
    println!(
        r#"sharpic - content-addressable image library

USAGE:
    sharpic [OPTIONS] <COMMAND>

COMMANDS:
    init                                   Create the catalog schema and bucket
    signup USERNAME [--email EMAIL]        Create an account and its default album
    album-create USERNAME TITLE            Create an album
    albums USERNAME                        List albums with their images
    upload USERNAME [--album ID] [--up N] PATH...
                                           Ingest files, or image files under directories
    fetch USERNAME IMAGE_ID OUTPUT         Write an image's original bytes to OUTPUT
    orient USERNAME IMAGE_ID N             Set an image's orientation flag

OPTIONS:
    --config, -c PATH   Path to config file
    --stderr            Log to stderr instead of journald or the log file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SHARPIC_CONFIG      Path to config file (overrides default location)
    SHARPIC_LOG         Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/sharpic/config.toml"#
    );
}

/// Expand directories into the image files beneath them, in path order.
fn collect_files(paths: &[PathBuf], ingest: &IngestConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|file| ingest.is_image_path(file))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("{} does not exist", path.display());
        }
    }
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn upload(
    library: &Library,
    config: &Config,
    username: String,
    album: Option<i64>,
    orientation: i32,
    paths: &[PathBuf],
) -> Result<()> {
    let files = collect_files(paths, &config.ingest)?;
    if files.is_empty() {
        bail!("no image files found");
    }

    let mut uploads = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        uploads.push(Upload::new(display_name(file), bytes));
    }

    let mut request = IngestRequest::new(username, uploads).with_orientation(orientation);
    request.target_album = album;
    let report = library.ingest(request).await?;

    for (file, image_id) in files.iter().zip(&report.image_ids) {
        println!("{image_id}\t{}", file.display());
    }
    if let Some(failure) = report.failure {
        bail!(
            "{} failed after {} ingested: {}",
            files[failure.index].display(),
            report.image_ids.len(),
            failure.error
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.stderr_log {
        logging::init_stderr()?;
    } else {
        // Uses journald on Linux, file fallback otherwise
        let _ = logging::init(Some(Config::config_dir().join("logs")));
    }

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let library = Library::open(&config)
        .await
        .context("opening library")?;

    match args.command {
        Command::Init => {
            println!(
                "Catalog and bucket {:?} ready under {}",
                config.store.bucket,
                config.store.root.display()
            );
        }
        Command::Signup { username, email } => {
            let mut account = NewAccount::new(username);
            account.email = email;
            let account = library.create_account(account).await?;
            println!("Created account {}", account.username);
        }
        Command::AlbumCreate { username, title } => {
            let album = library.create_album(&username, &title).await?;
            println!("{}\t{}", album.id, album.title);
        }
        Command::Albums { username } => {
            for album in library.list_albums(&username).await? {
                let marker = if album.is_default { " (default)" } else { "" };
                println!(
                    "{}\t{}{}\t{} images",
                    album.id,
                    album.title,
                    marker,
                    album.image_ids.len()
                );
            }
        }
        Command::Upload {
            username,
            album,
            orientation,
            paths,
        } => {
            upload(&library, &config, username, album, orientation, &paths).await?;
        }
        Command::Fetch {
            username,
            image_id,
            output,
        } => {
            let (image, bytes) = library.fetch_image(&username, image_id, None).await?;
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "Wrote {} ({} bytes) to {}",
                image.filename,
                bytes.len(),
                output.display()
            );
        }
        Command::Orient {
            username,
            image_id,
            orientation,
        } => {
            library
                .update_orientation(&username, image_id, orientation, None)
                .await?;
            println!("Image {image_id} orientation set to {orientation}");
        }
    }

    Ok(())
}
