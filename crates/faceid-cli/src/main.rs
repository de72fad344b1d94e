use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::canvas::load_label_font;
use faceid_core::toast::ToastEvent;
use faceid_core::views::{GalleryStatus, GalleryView, HomeView, ProfilesView, RecognizeView};
use faceid_core::{
    ModelLoader, ModelSource, ModelState, Notifier, Profile, ProfileStore, SqliteStore, UploadFile,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceid", about = "Recognize faces in photos against saved profiles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show profile and model status
    ///
    /// Models already on disk are loaded to check they work. Remote models
    /// that have not been downloaded yet are reported, not fetched.
    Home,
    /// Detect and identify faces in an image
    ///
    /// A face is named only when its embedding lies within Euclidean distance
    /// 0.6 of a saved one. With ArcFace embeddings that is a strict test:
    /// different photos of the same person are often labelled "Unknown".
    /// Adding several photos per profile (`profiles add-descriptor`) helps.
    Recognize {
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Save the first face found in an image as a new profile
    Enroll {
        image: PathBuf,
        #[arg(short, long)]
        name: String,
    },
    /// Manage saved profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesAction,
    },
    /// Browse profiles, optionally filtered by name
    Gallery {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfilesAction {
    /// List profiles in creation order
    List {
        #[arg(long)]
        json: bool,
    },
    /// Change a profile's display name
    Rename { id: String, name: String },
    /// Add the first face found in an image to an existing profile
    AddDescriptor { id: String, image: PathBuf },
    /// Delete a profile
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    tracing::debug!(
        db = %config.db_path.display(),
        models = %config.model_base,
        "faceid starting"
    );

    let notifier = Notifier::new(config.toast_duration);
    let mut toasts = notifier.subscribe();

    let storage = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let mut store = ProfileStore::open(storage);

    let outcome = run(cli.command, &config, &notifier, &mut store).await;
    print_toasts(&mut toasts);
    outcome
}

async fn run(
    command: Commands,
    config: &Config,
    notifier: &Notifier,
    store: &mut ProfileStore<SqliteStore>,
) -> Result<()> {
    match command {
        Commands::Home => {
            let source = ModelSource::parse(&config.model_base);
            let missing = source.missing_bundles();
            let loader = ModelLoader::new(source);
            if missing.is_empty() {
                if let Err(e) = loader.load().await {
                    tracing::debug!(error = %e, "model check failed");
                }
            }

            let summary = HomeView::summary(store, &loader.state());
            println!("profiles:    {}", summary.profile_count);
            println!("descriptors: {}", summary.descriptor_count);
            match summary.models {
                ModelState::Ready => println!("models:      ready"),
                ModelState::Loading => {
                    println!("models:      not on disk ({})", missing.join(", "))
                }
                ModelState::Failed(reason) => println!("models:      failed ({reason})"),
            }
        }
        Commands::Recognize { image, out } => {
            let loader = ModelLoader::new(ModelSource::parse(&config.model_base));
            let mut ready = loader.load().await.context("loading face models")?;
            let state = loader.state();

            let mut view = recognize_view(config, notifier)?;
            view.upload(read_upload(&image)?)?;
            view.detect(&mut ready.analyzer, &state, store)?;
            let results = view.identify(&state, store)?;

            for (i, result) in results.iter().enumerate() {
                println!("face {}: {}", i + 1, result.name);
            }

            if let Some(out) = out {
                if let Some(frame) = view.render() {
                    frame
                        .save(&out)
                        .with_context(|| format!("writing {}", out.display()))?;
                    println!("annotated image written to {}", out.display());
                }
            }
        }
        Commands::Enroll { image, name } => {
            let loader = ModelLoader::new(ModelSource::parse(&config.model_base));
            let mut ready = loader.load().await.context("loading face models")?;

            let mut view = recognize_view(config, notifier)?;
            view.upload(read_upload(&image)?)?;
            view.detect(&mut ready.analyzer, &loader.state(), store)?;
            let pending = view.pending_profile()?;

            let id = ProfilesView::new(notifier.clone()).create(store, &name, pending)?;
            println!("{id}");
        }
        Commands::Profiles { action } => {
            let profiles = ProfilesView::new(notifier.clone());
            match action {
                ProfilesAction::List { json } => {
                    print_profiles(profiles.list(store).iter(), json)?
                }
                ProfilesAction::Rename { id, name } => profiles.rename(store, &id, &name)?,
                ProfilesAction::AddDescriptor { id, image } => {
                    if store.get(&id).is_none() {
                        bail!("no profile with id {id}");
                    }
                    let loader = ModelLoader::new(ModelSource::parse(&config.model_base));
                    let mut ready = loader.load().await.context("loading face models")?;

                    let mut view = RecognizeView::new(notifier.clone());
                    view.upload(read_upload(&image)?)?;
                    view.detect(&mut ready.analyzer, &loader.state(), store)?;
                    profiles.add_descriptor(store, &id, view.pending_profile()?);
                }
                ProfilesAction::Delete { id } => profiles.delete(store, &id),
            }
        }
        Commands::Gallery { search, json } => {
            let mut gallery = GalleryView::new();
            if let Some(term) = search {
                gallery.set_search(term);
            }
            match gallery.status(store) {
                GalleryStatus::NoProfiles => println!("No profiles yet. Enroll a face first."),
                GalleryStatus::NoMatches => println!("No profiles match your search."),
                GalleryStatus::Showing(_) => {
                    print_profiles(gallery.visible(store).into_iter(), json)?
                }
            }
        }
    }

    Ok(())
}

fn recognize_view(config: &Config, notifier: &Notifier) -> Result<RecognizeView> {
    let view = RecognizeView::new(notifier.clone());
    match &config.label_font {
        Some(path) => {
            let font = load_label_font(path).context("loading label font")?;
            Ok(view.with_label_font(font))
        }
        None => Ok(view),
    }
}

fn read_upload(path: &Path) -> Result<UploadFile> {
    UploadFile::from_path(path).with_context(|| format!("reading {}", path.display()))
}

fn print_profiles<'a>(profiles: impl Iterator<Item = &'a Profile>, json: bool) -> Result<()> {
    if json {
        let rows: Vec<_> = profiles
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "descriptors": p.descriptors.len(),
                    "imageUrl": p.image_url,
                    "createdAt": p.created_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for p in profiles {
        let count = p.descriptors.len();
        println!(
            "{}  {}  ({} facial descriptor{})  added {}  {}",
            p.id,
            p.name,
            count,
            if count == 1 { "" } else { "s" },
            p.created_at.format("%Y-%m-%d"),
            p.image_url,
        );
    }
    Ok(())
}

/// Print every toast shown so far to stderr.
fn print_toasts(rx: &mut broadcast::Receiver<ToastEvent>) {
    while let Ok(event) = rx.try_recv() {
        if let ToastEvent::Shown(toast) = event {
            eprintln!("[{}] {}", toast.severity, toast.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_help_explains_home_and_threshold() {
        let mut cmd = Cli::command();
        let home = cmd
            .find_subcommand_mut("home")
            .unwrap()
            .render_long_help()
            .to_string();
        assert!(home.contains("not fetched"));

        let recognize = cmd
            .find_subcommand_mut("recognize")
            .unwrap()
            .render_long_help()
            .to_string();
        assert!(recognize.contains("0.6"));
        assert!(recognize.contains("Unknown"));
    }

    #[test]
    fn test_parses_profile_subcommands() {
        let args = ["faceid", "profiles", "add-descriptor", "abc", "me.jpg"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Profiles {
                action: ProfilesAction::AddDescriptor { .. }
            }
        ));
    }
}
