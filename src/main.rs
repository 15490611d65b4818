use clap::{Parser, Subcommand};
use std::path::PathBuf;
use webalbum::codec::RasterCodec;
use webalbum::metadata::FileMetadataSource;
use webalbum::pipeline::{Exporter, Outcome, ProgressEvent, Stage};
use webalbum::settings::ExportSettings;
use webalbum::theme::Theme;
use webalbum::transport::LocalTransport;

#[derive(Parser)]
#[command(name = "webalbum")]
#[command(about = "Export photographs as a static HTML album")]
#[command(long_about = "\
Export photographs as a static HTML album

The album is assembled in a staging directory and copied to the
destination in one pass, so an existing album is never left
half-overwritten.

Destination layout (with the default subfolder names):

  album/
  ├── index.html                   # First index page
  ├── page2.html                   # Further index pages
  ├── thumbnails/001-dawn.thumb.jpg
  ├── previews/001-dawn.preview.jpg
  ├── images/001-dawn.jpg          # Full-size copy (optional)
  ├── pages/001-dawn.html          # One page per image
  └── theme/style.css              # Theme assets, copied verbatim

A theme directory holds up to three template files — index.tmpl,
image.tmpl, thumbnail.tmpl — plus static assets. Missing templates fall
back to built-in layouts. Image captions come from sidecar text files
(001-dawn.txt next to 001-dawn.jpg).")]
#[command(version)]
struct Cli {
    /// Settings file (TOML); flags override its values
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export images into a static album
    Export {
        /// Theme directory
        #[arg(long)]
        theme: Option<PathBuf>,
        /// Destination directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Album title
        #[arg(long)]
        title: Option<String>,
        /// Image files to export
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Parse a theme's templates and report problems without exporting
    CheckTheme {
        /// Theme directory
        dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => ExportSettings::load(path)?,
        None => ExportSettings::default(),
    };

    match cli.command {
        Command::Export {
            theme,
            output,
            title,
            images,
        } => {
            if let Some(theme) = theme {
                settings.theme_dir = theme;
            }
            if let Some(output) = output {
                settings.destination = output;
            }
            if let Some(title) = title {
                settings.album_title = title;
            }

            let codec = RasterCodec::new();
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    match event {
                        ProgressEvent::StageStarted(Stage::Cleanup) => {}
                        ProgressEvent::StageStarted(stage) => {
                            println!("==> {}", stage.label());
                        }
                        ProgressEvent::Item { done, total, .. } => {
                            println!("    {done}/{total}");
                        }
                        ProgressEvent::Copy { done, total } => {
                            println!("    {done}/{total} files");
                        }
                    }
                }
            });

            let outcome = {
                let mut exporter = Exporter::new(
                    &settings,
                    &codec,
                    &FileMetadataSource,
                    &LocalTransport,
                    images,
                )
                .with_progress(tx);
                exporter.run()
            };
            // the exporter (and its sender) is gone, so the printer drains
            printer
                .join()
                .map_err(|_| "progress printer panicked")?;

            match outcome {
                Outcome::Completed => {
                    println!("==> Album written to {}", settings.destination.display());
                    Ok(())
                }
                Outcome::Cancelled => {
                    println!("==> Export cancelled");
                    std::process::exit(130);
                }
                Outcome::Failed(e) => Err(e.into()),
            }
        }
        Command::CheckTheme { dir } => {
            let problems = Theme::check(&dir)?;
            if problems.is_empty() {
                println!("==> Theme is valid");
                Ok(())
            } else {
                for problem in &problems {
                    println!("{problem}");
                }
                std::process::exit(1);
            }
        }
    }
}
