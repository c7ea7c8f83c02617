use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use where_did_i_park::config::Config;
use where_did_i_park::geocode::create_geocoding_service;
use where_did_i_park::location::{Coordinate, CoordinateFix, FixedLocationSource, LocationSource};
use where_did_i_park::navigation::{
    HandoffTarget, MapsLauncher, NavigationLauncher, PrintOpener, SystemOpener,
};
use where_did_i_park::store::{FileKeyValueStore, LocationStore, ParkingStore};
use where_did_i_park::workflow::{AddressOutcome, FindOutcome, MarkOutcome, ParkingWorkflow};

#[derive(Parser)]
#[command(author, version, about = "Remember where you parked and find your way back")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Mark the given position as where you parked
    Park {
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Altitude in meters
        #[arg(long, allow_hyphen_values = true)]
        altitude: Option<f64>,

        /// Horizontal accuracy in meters
        #[arg(long)]
        accuracy: Option<f64>,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Start directions back to the parked car
    Find {
        /// Print the directions URL instead of opening it
        #[arg(long)]
        dry_run: bool,

        /// Current latitude, to route from here
        #[arg(long, allow_hyphen_values = true, requires = "from_lon")]
        from_lat: Option<f64>,

        /// Current longitude, to route from here
        #[arg(long, allow_hyphen_values = true, requires = "from_lat")]
        from_lon: Option<f64>,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show the saved parking spot
    Status {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force, config } => init_config(config, *force),
        Commands::Park {
            lat,
            lon,
            altitude,
            accuracy,
            config,
        } => {
            let config_data = load_config(config)?;
            let mut fix = CoordinateFix::new(Coordinate::new(*lat, *lon));
            fix.altitude = *altitude;
            fix.horizontal_accuracy = *accuracy;

            let workflow = build_workflow(
                &config_data,
                Arc::new(FixedLocationSource::new(fix)),
                false,
            )?;

            println!("Marking parking spot...");
            match workflow.mark_parked().await.context("Failed to mark parking spot")? {
                MarkOutcome::Parked { record, address } => {
                    println!("Parked at {}", record.fix.coordinate);
                    match address {
                        AddressOutcome::Resolved(text) => println!("Address: {text}"),
                        AddressOutcome::NoCandidates => println!("Address: unknown"),
                        AddressOutcome::Failed(_) => {
                            println!("Address: unknown (lookup failed)")
                        }
                    }
                }
                MarkOutcome::Superseded => println!("A newer parking spot was marked"),
            }
            Ok(())
        }
        Commands::Find {
            dry_run,
            from_lat,
            from_lon,
            config,
        } => {
            let config_data = load_config(config)?;

            // The workflow only takes an origin fix when routing from here
            let origin = match (from_lat, from_lon) {
                (Some(lat), Some(lon)) => Some(Coordinate::new(*lat, *lon)),
                _ => None,
            };
            let location = Arc::new(FixedLocationSource::new(CoordinateFix::new(
                origin.unwrap_or(Coordinate::new(0.0, 0.0)),
            )));
            // The CLI has no location service of its own, so without an explicit
            // origin the maps app routes from wherever it thinks the user is
            if origin.is_none() && config_data.navigation.route_from_current_location {
                println!(
                    "No current position given; pass --from-lat and --from-lon to route from a specific point"
                );
            }

            let workflow = build_workflow(&config_data, location, *dry_run)?
                .with_route_from_current_location(origin.is_some());

            match workflow.find_car().await.context("Failed to start navigation")? {
                FindOutcome::NoRecord => println!("No parking spot saved yet"),
                FindOutcome::Launched(handoff) => match handoff.target {
                    HandoffTarget::App => println!("Opened directions in the maps app"),
                    HandoffTarget::Web => println!("Opened directions in the browser"),
                },
            }
            Ok(())
        }
        Commands::Status { config } => {
            let config_data = load_config(config)?;
            println!("Where did I park - Status");
            println!("Configuration:");
            println!("  Data file: {}", config_data.data_file);
            println!("  Geocoder: {:?}", config_data.geocoder.provider);
            println!("  Travel mode: {}", config_data.navigation.travel_mode);

            match open_store(&config_data).load() {
                Some(record) => {
                    println!("Parking spot: {}", record.label());
                    println!("  Coordinate: {}", record.fix.coordinate);
                    println!("  Saved at: {}", record.fix.timestamp);
                    if let Some(accuracy) = record.fix.horizontal_accuracy {
                        println!("  Accuracy: {accuracy} m");
                    }
                }
                None => println!("No parking spot saved yet"),
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Arc<dyn LocationStore> {
    Arc::new(ParkingStore::new(FileKeyValueStore::new(&config.data_file)))
}

fn build_workflow(
    config: &Config,
    location: Arc<dyn LocationSource>,
    dry_run: bool,
) -> Result<ParkingWorkflow> {
    let resolver =
        create_geocoding_service(&config.geocoder).context("Failed to create geocoder")?;
    let launcher: Arc<dyn NavigationLauncher> = if dry_run {
        Arc::new(MapsLauncher::new(PrintOpener, &config.navigation))
    } else {
        Arc::new(MapsLauncher::new(SystemOpener, &config.navigation))
    };

    Ok(ParkingWorkflow::new(open_store(config), location, resolver, launcher))
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'parked init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
