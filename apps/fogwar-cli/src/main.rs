use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use fogwar_common::{ActorId, ActorSample, HeightBounds, TilePosition};
use fogwar_kernel::{ActorRegistry, ApplyQueue, LayeredWorld, VisibilityStore};
use fogwar_persist::{RecordStore, SessionKey};
use fogwar_session::{CONFIG_FILE_NAME, Collaborators, FogConfig, FogSession};
use fogwar_stream::{ProximityClassifier, ProximityConfig};
use fogwar_sync::TcpLineConnector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fogwar-cli", about = "CLI tool for fog-of-war operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the configuration a session would use
    Info {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,
    },
    /// Print the summary of a stored fog record
    Inspect {
        #[arg(long, default_value = "fog_data")]
        data_dir: PathBuf,
        #[arg(long)]
        world: String,
        #[arg(long)]
        player: String,
    },
    /// Drive the proximity classifier over a synthetic world
    Simulate {
        /// Number of passes to run
        #[arg(short, long, default_value = "10")]
        ticks: u64,
        /// Number of wandering actors
        #[arg(short, long, default_value = "3")]
        actors: usize,
        /// RNG seed for actor movement
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Run a full session against an authority for a bounded time
    Listen {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,
        #[arg(long, default_value = "world")]
        world: String,
        #[arg(long, default_value = "player")]
        player: String,
        /// Actor identity sent to the authority; random when omitted
        #[arg(long)]
        identity: Option<Uuid>,
        #[arg(long, default_value = "30")]
        seconds: u64,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { config: path } => {
            init_logging(cli.verbose);
            let loaded = FogConfig::load_existing(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            println!("fogwar-cli v{}", env!("CARGO_PKG_VERSION"));
            let config = match loaded {
                Some(config) => {
                    println!("config: {}", path.display());
                    config
                }
                None => {
                    println!("config: {} not found, showing defaults", path.display());
                    FogConfig::default()
                }
            };
            println!("default state: {}", config.default_state);
            println!("default fog appearance: {}", config.default_fog_appearance);
            println!("endpoint: {}", config.websocket_endpoint);
            println!(
                "proximity: check={} scan={} period={}ms",
                config.proximity.check_radius, config.proximity.scan_radius, config.proximity.period_ms
            );
        }
        Commands::Inspect {
            data_dir,
            world,
            player,
        } => {
            init_logging(cli.verbose);
            if !data_dir.is_dir() {
                bail!("no fog data directory at {}", data_dir.display());
            }
            let records = RecordStore::open(&data_dir)?;
            if let Err(err) = records.verify_integrity() {
                println!("integrity: FAILED ({err})");
            } else {
                println!("integrity: OK ({} records)", records.filenames().count());
            }

            let key = SessionKey::new(world, player);
            let Some(record) = records.read(&key)? else {
                bail!("no record for {key} at {}", records.record_path(&key).display());
            };
            record.verify()?;
            let summary = record.summary();
            println!("record: {key}");
            println!("  schema: v{}", record.body.schema_version);
            println!("  default state: {}", record.body.default_state);
            println!(
                "  tiles: {} (fogged={}, hidden={}, visible={})",
                summary.tiles, summary.fogged, summary.hidden, summary.visible
            );
            println!("  overrides: {}", summary.overrides);
            println!(
                "  snapshots: {} ({} bytes)",
                summary.snapshots, summary.snapshot_bytes
            );
            println!("  hash: {}", record.hash);
        }
        Commands::Simulate {
            ticks,
            actors,
            seed,
        } => {
            init_logging(cli.verbose);
            simulate(ticks, actors, seed)?;
        }
        Commands::Listen {
            config,
            world,
            player,
            identity,
            seconds,
        } => {
            let config = FogConfig::load_or_create(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            init_logging(cli.verbose || config.debug_mode);
            listen(config, SessionKey::new(world, player), identity, seconds)?;
        }
    }

    Ok(())
}

fn simulate(ticks: u64, actor_count: usize, seed: u64) -> anyhow::Result<()> {
    println!("Proximity simulation: seed={seed}, ticks={ticks}, actors={actor_count}");

    let store = Arc::new(VisibilityStore::default());
    store.attach_world(Arc::new(LayeredWorld::new(HeightBounds::new(-64, 384), 0, 62)));
    let queue = ApplyQueue::spawn(store.clone())?;
    let registry = ActorRegistry::new();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples: Vec<ActorSample> = (0..actor_count)
        .map(|_| {
            let x = rng.gen_range(-64.0..64.0);
            let z = rng.gen_range(-64.0..64.0);
            ActorSample::at(ActorId::new(), x, z)
        })
        .collect();
    registry.extend(samples.iter().map(|s| s.id));

    let mut classifier = ProximityClassifier::new(ProximityConfig::default());
    let sink = |_: &BTreeSet<TilePosition>| {};
    let apply = queue.handle();
    for tick in 0..ticks {
        let changed = classifier.pass(samples.clone(), &registry, &apply, &sink)?;
        let stats = classifier.stats();
        println!(
            "pass {tick}: near={} visible+={} fogged+={} changed={} time={:?}",
            stats.near_tiles, stats.to_visible, stats.to_fogged, changed.len(), stats.pass_time
        );
        for sample in &mut samples {
            sample.position.x += rng.gen_range(-24.0..24.0);
            sample.position.z += rng.gen_range(-24.0..24.0);
        }
    }
    queue.shutdown();

    let stats = store.stats();
    println!(
        "Store: tiles={} fogged={} hidden={} snapshots={} ({} bytes)",
        stats.tiles, stats.fogged, stats.hidden, stats.snapshots, stats.snapshot_bytes
    );
    println!(
        "Timing: avg={:?} max={:?}",
        classifier.timer().average(),
        classifier.timer().max()
    );
    Ok(())
}

fn listen(config: FogConfig, key: SessionKey, identity: Option<Uuid>, seconds: u64) -> anyhow::Result<()> {
    let identity = identity.unwrap_or_else(Uuid::new_v4);
    let sink = |tiles: &BTreeSet<TilePosition>| {
        tracing::debug!(tiles = tiles.len(), "tiles changed");
    };
    let session = FogSession::start(
        config,
        Collaborators {
            world: None,
            feed: Arc::new(Vec::<ActorSample>::new),
            sink: Arc::new(sink),
            connector: Arc::new(TcpLineConnector),
        },
    )?;
    if !session.endpoint_supported() {
        println!("warning: {} needs TLS, which this client does not speak", session.config().websocket_endpoint);
    }

    let report = session.begin(key.clone(), Some(identity))?;
    println!("Session {key} begun as {identity}: record={:?}, actors={}", report.record, report.actors);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_secs(1).min(deadline.saturating_duration_since(Instant::now())));
        let stats = session.store().stats();
        println!(
            "[{:?}] connection={} tiles={} fogged={} hidden={}",
            session.supervisor_status(),
            session.connection_state(),
            stats.tiles,
            stats.fogged,
            stats.hidden
        );
    }

    session.shutdown()?;
    println!("Session {key} saved and shut down");
    Ok(())
}
