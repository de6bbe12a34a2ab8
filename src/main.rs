mod album;
mod cache;
mod config;
mod error;
mod flickr;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use album::{AlbumController, ImageBytes};
use cache::ContentCache;
use flickr::{ImageFetcher, SearchClient};
use store::{Photo, PhotoStore, StoreEvent};

#[derive(Parser, Debug)]
#[command(name = "vtour")]
#[command(about = "Drop pins on a map and browse cached albums of nearby Flickr photos")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vtour/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage location pins
  Pin {
    #[command(subcommand)]
    action: PinAction,
  },
  /// Load or refresh a pin's photo album
  Album {
    #[command(subcommand)]
    action: AlbumAction,
  },
  /// Manage individual photos
  Photo {
    #[command(subcommand)]
    action: PhotoAction,
  },
}

#[derive(Subcommand, Debug)]
enum PinAction {
  /// Drop a new pin at a coordinate
  Add { latitude: f64, longitude: f64 },
  /// List all pins
  List,
  /// Move a pin to a new coordinate
  Mv {
    id: i64,
    latitude: f64,
    longitude: f64,
  },
  /// Delete a pin and all of its photos
  Rm { id: i64 },
}

#[derive(Subcommand, Debug)]
enum AlbumAction {
  /// Show a pin's album, fetching it first if it is empty
  Show { pin_id: i64 },
  /// Discard the album and fetch a new collection
  New { pin_id: i64 },
  /// Download the whole album into a directory
  Save {
    pin_id: i64,
    /// Output directory
    #[arg(short, long)]
    dir: PathBuf,
  },
}

#[derive(Subcommand, Debug)]
enum PhotoAction {
  /// Delete one photo from its album
  Rm { id: i64 },
  /// Download (or read from cache) a photo's bytes and write them to a file
  Save {
    id: i64,
    /// Output file
    #[arg(short, long)]
    output: PathBuf,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config)?;

  let cache = ContentCache::open(config.image_cache_dir()?)?;
  let store = PhotoStore::open(&config.store_path()?, cache.clone())?;

  match args.command {
    Command::Pin { action } => run_pin(&store, action),
    Command::Album { action } => {
      let albums = controller(&config, &store, &cache)?;
      run_album(&store, &albums, action).await
    }
    Command::Photo { action } => {
      let albums = controller(&config, &store, &cache)?;
      run_photo(&store, &albums, action).await
    }
  }
}

/// Log to a daily-rotated file under the data dir; level via VTOUR_LOG.
fn init_tracing(config: &config::Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = config.log_dir()?;
  std::fs::create_dir_all(&log_dir)?;
  let appender = tracing_appender::rolling::daily(log_dir, "vtour.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("VTOUR_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn controller(
  config: &config::Config,
  store: &PhotoStore,
  cache: &ContentCache,
) -> Result<AlbumController> {
  let client = SearchClient::new(config)?;
  let fetcher = ImageFetcher::with_client(client.http());
  Ok(AlbumController::new(
    client,
    fetcher,
    store.clone(),
    cache.clone(),
  ))
}

fn run_pin(store: &PhotoStore, action: PinAction) -> Result<()> {
  match action {
    PinAction::Add {
      latitude,
      longitude,
    } => {
      let pin = store.create_pin(latitude, longitude)?;
      println!("Pin {} at ({}, {})", pin.id, pin.latitude, pin.longitude);
    }
    PinAction::List => {
      let pins = store.list_pins()?;
      if pins.is_empty() {
        println!("No pins.");
      }
      for pin in pins {
        let count = store.list_photos(pin.id)?.len();
        println!(
          "{:>4}  ({}, {})  {} photos  added {}",
          pin.id,
          pin.latitude,
          pin.longitude,
          count,
          pin.created_at.format("%Y-%m-%d")
        );
      }
    }
    PinAction::Mv {
      id,
      latitude,
      longitude,
    } => {
      let pin = store.move_pin(id, latitude, longitude)?;
      println!("Pin {} moved to ({}, {})", pin.id, pin.latitude, pin.longitude);
    }
    PinAction::Rm { id } => {
      store.delete_pin(id)?;
      println!("Pin {} deleted", id);
    }
  }
  Ok(())
}

async fn run_album(store: &PhotoStore, albums: &AlbumController, action: AlbumAction) -> Result<()> {
  let photos = match action {
    AlbumAction::Show { pin_id } => albums.load_album(pin_id).await?,
    AlbumAction::New { pin_id } => {
      let mut events = store.subscribe();
      let photos = albums.refresh_album(pin_id).await?;
      // Replay the change stream the way a resident display layer would.
      while let Ok(event) = events.try_recv() {
        match event {
          StoreEvent::PhotoDeleted(id) => println!("- photo {}", id),
          StoreEvent::PhotoCreated(photo) => println!("+ photo {}", photo.id),
          _ => {}
        }
      }
      photos
    }
    AlbumAction::Save { pin_id, dir } => {
      albums.load_album(pin_id).await?;
      std::fs::create_dir_all(&dir)?;
      let mut saved = 0;
      for (photo, bytes) in albums.materialize_album(pin_id).await? {
        if let ImageBytes::Bytes(bytes) = bytes {
          std::fs::write(dir.join(&photo.image_path), &bytes)?;
          saved += 1;
        }
      }
      println!("Saved {} images to {}", saved, dir.display());
      return Ok(());
    }
  };

  print_album(store, &photos)
}

fn print_album(store: &PhotoStore, photos: &[Photo]) -> Result<()> {
  if photos.is_empty() {
    println!("No images.");
    return Ok(());
  }

  for photo in photos {
    let label = if photo.image_url.is_empty() {
      "(no image)"
    } else {
      photo.image_path.as_str()
    };
    let cached = if store.cache().contains(&photo.image_path) {
      "cached"
    } else {
      "-"
    };
    println!("{:>4}  {:<40}  {}", photo.id, label, cached);
  }
  Ok(())
}

async fn run_photo(store: &PhotoStore, albums: &AlbumController, action: PhotoAction) -> Result<()> {
  match action {
    PhotoAction::Rm { id } => {
      store.delete_photo(id)?;
      println!("Photo {} deleted", id);
    }
    PhotoAction::Save { id, output } => match albums.materialize_image(id).await? {
      ImageBytes::NoImage => println!("Photo {} has no image", id),
      ImageBytes::Bytes(bytes) => {
        std::fs::write(&output, &bytes)?;
        println!("Wrote {} bytes to {}", bytes.len(), output.display());
      }
    },
  }
  Ok(())
}
