use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use concert_ingest::apis::jambase::JamBaseApi;
use concert_ingest::apis::setlistfm::{SetlistFmApi, SetlistQuery, SetlistResolver};
use concert_ingest::apis::spotify::SpotifyApi;
use concert_ingest::apis::ticketmaster::TicketmasterApi;
use concert_ingest::app::ports::{HttpClientPort, Pacer};
use concert_ingest::config::{Config, Credentials};
use concert_ingest::constants::{self, DEFAULT_ARTIST_LIMIT, DEFAULT_GENRES};
use concert_ingest::infra::http_client::ReqwestHttp;
use concert_ingest::infra::ingest_meta::IngestMeta;
use concert_ingest::infra::pacer::TokioPacer;
use concert_ingest::infra::rate_limiter::{Limits, RateLimitedHttp};
use concert_ingest::infra::supabase::SupabaseStorage;
use concert_ingest::pipeline::genre_backfill::GenreBackfill;
use concert_ingest::pipeline::jambase_sync::{JamBaseSync, SyncOptions};
use concert_ingest::pipeline::setlist_enrich::SetlistEnricher;
use concert_ingest::pipeline::spotify_seed::SpotifySeeder;
use concert_ingest::pipeline::{city_seeds, SeedOrchestrator, Upserter};
use concert_ingest::server::{start_server, AppState};
use concert_ingest::storage::{InMemoryStorage, Storage};
use concert_ingest::{logging, observability};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "concert_ingest")]
#[command(about = "Concert event, artist and venue ingestion from JamBase, Ticketmaster, Spotify and Setlist.fm")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to a config file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest Ticketmaster music events for the top US cities
    Ticketmaster {
        /// Only these cities (comma-separated names)
        #[arg(long, value_delimiter = ',')]
        cities: Option<Vec<String>>,
        /// Map and count without writing to the database
        #[arg(long)]
        dry_run: bool,
        /// Rows per upsert chunk
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Sync the full JamBase event feed page by page
    JambaseSync {
        #[arg(long)]
        start_page: Option<u32>,
        /// Continue after the last checkpointed page
        #[arg(long)]
        resume: bool,
        #[arg(long)]
        max_pages: Option<u32>,
        /// Only events modified since this date (YYYY-MM-DD)
        #[arg(long)]
        modified_since: Option<String>,
        /// Only events modified since the newest one already stored
        #[arg(long, conflicts_with = "modified_since")]
        incremental: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Seed artists from Spotify genre playlists
    SpotifyArtists {
        #[arg(long, default_value_t = DEFAULT_ARTIST_LIMIT)]
        limit: usize,
        /// Genres to search (comma-separated)
        #[arg(long, value_delimiter = ',')]
        genres: Option<Vec<String>>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill empty artist genres from Spotify
    BackfillGenres {
        /// Stop after this many artists without genres
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Find a setlist and store it on an event or in the setlists table
    Setlist {
        /// Artist name
        artist: String,
        /// Event date (YYYY-MM-DD or DD-MM-YYYY)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        venue: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        /// Provider event id whose row receives the setlist
        #[arg(long)]
        event_id: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve the cache API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Shared runtime wiring built once from config and environment
struct Runtime {
    config: Config,
    credentials: Credentials,
    http: Arc<dyn HttpClientPort>,
    pacer: Arc<dyn Pacer>,
}

impl Runtime {
    fn new(config: Config) -> Result<Self> {
        let http = ReqwestHttp::new(config.pipeline.request_timeout())
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            credentials: Credentials::from_env(),
            http: Arc::new(http),
            pacer: Arc::new(TokioPacer),
        })
    }

    /// HTTP port limited to the provider's configured requests per minute
    fn http_for(&self, provider: &str) -> Arc<dyn HttpClientPort> {
        let rpm = self.config.rate_limits.for_provider(provider);
        Arc::new(RateLimitedHttp::new(self.http.clone(), Limits::per_minute(rpm)))
    }

    fn storage(&self, dry_run: bool) -> Result<Arc<dyn Storage>> {
        if dry_run {
            info!("Dry run: writes go to an in-memory store");
            return Ok(Arc::new(InMemoryStorage::new()));
        }
        let credentials = self.credentials.require_supabase()?;
        Ok(Arc::new(SupabaseStorage::new(
            &credentials,
            self.config.pipeline.request_timeout(),
        )?))
    }

    fn upserter(&self, storage: Arc<dyn Storage>, batch_size: Option<usize>) -> Upserter {
        let batch_size = batch_size.unwrap_or(self.config.pipeline.batch_size);
        Upserter::new(storage, self.pacer.clone(), batch_size)
            .with_chunk_pause(self.config.pipeline.chunk_pause())
    }

    fn jambase(&self, key: String) -> JamBaseApi {
        JamBaseApi::new(self.http_for(constants::JAMBASE), self.pacer.clone(), key)
            .with_page_pause(self.config.pipeline.page_pause())
            .with_max_pages(self.config.pipeline.jambase_max_pages)
    }
}

async fn run_ticketmaster(
    rt: &Runtime,
    cities: Option<Vec<String>>,
    dry_run: bool,
    batch_size: Option<usize>,
) -> Result<()> {
    let key = rt.credentials.require_ticketmaster()?;
    let storage = rt.storage(dry_run)?;
    let api = TicketmasterApi::new(rt.http_for(constants::TICKETMASTER), rt.pacer.clone(), key)
        .with_page_pause(rt.config.pipeline.page_pause())
        .with_months_ahead(rt.config.pipeline.ticketmaster_months_ahead);

    let seeds = city_seeds(cities.as_deref());
    if seeds.is_empty() {
        anyhow::bail!("none of the requested cities are in the seed list");
    }
    println!("🔄 Ingesting Ticketmaster events for {} cities...", seeds.len());

    let orchestrator = SeedOrchestrator::new(
        Arc::new(api),
        rt.upserter(storage, batch_size),
        rt.pacer.clone(),
        &rt.config.pipeline.events_table,
    )
    .with_seed_pause(rt.config.pipeline.seed_pause());
    let summary = orchestrator.run(&seeds).await;

    println!("\n📊 Ticketmaster results:");
    println!("   Cities: {} ({} with errors)", summary.seeds, summary.seeds_failed);
    println!("   Fetched: {}", summary.fetched);
    println!("   Skipped: {}", summary.skipped);
    println!("   Upserted: {}", summary.upserted);
    println!("   Failed chunks: {}", summary.failed_chunks);
    print_errors(&summary.errors);
    Ok(())
}

async fn run_jambase_sync(rt: &Runtime, options: SyncOptions, dry_run: bool, batch_size: Option<usize>) -> Result<()> {
    let key = rt.credentials.require_jambase()?;
    let storage = rt.storage(dry_run)?;
    let meta = if dry_run {
        IngestMeta::open_in_memory()
    } else {
        IngestMeta::open_at_root(&rt.config.pipeline.checkpoint_dir)
    }
    .context("failed to open checkpoint store")?;

    let sync = JamBaseSync::new(
        Arc::new(rt.jambase(key)),
        rt.upserter(storage, batch_size),
        rt.pacer.clone(),
        &rt.config.pipeline.events_table,
    )
    .with_page_pause(rt.config.pipeline.page_pause())
    .with_checkpoints(Arc::new(meta));

    println!("🔄 Syncing JamBase events...");
    let summary = sync.run(&options).await?;

    println!("\n📊 JamBase sync results:");
    println!(
        "   Pages: {} (from {}, last {})",
        summary.pages,
        summary.first_page,
        summary.last_page.map_or("-".to_string(), |p| p.to_string())
    );
    println!("   Events fetched: {}", summary.events_fetched);
    println!("   Events upserted: {}", summary.events_upserted);
    println!("   Artists upserted: {}", summary.artists_upserted);
    println!("   Venues upserted: {}", summary.venues_upserted);
    if let Some(from) = &summary.date_modified_from {
        println!("   Modified since: {}", from);
    }
    println!("   Completed: {}", if summary.completed { "yes" } else { "no" });
    print_errors(&summary.errors);
    Ok(())
}

async fn run_spotify(rt: &Runtime, limit: usize, genres: Option<Vec<String>>, dry_run: bool) -> Result<()> {
    let credentials = rt.credentials.require_spotify()?;
    let storage = rt.storage(dry_run)?;
    let genres = genres
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| DEFAULT_GENRES.iter().map(|g| g.to_string()).collect());

    let api = SpotifyApi::new(rt.http_for(constants::SPOTIFY), rt.pacer.clone(), credentials)
        .with_request_delay(rt.config.pipeline.page_pause());
    println!("🔄 Seeding up to {} Spotify artists from {}...", limit, genres.join(", "));
    let summary = SpotifySeeder::new(Arc::new(api), storage).run(&genres, limit).await;

    println!("\n📊 Spotify results:");
    println!("   Discovered: {}", summary.discovered);
    println!("   Already known: {}", summary.already_known);
    println!("   Inserted: {}", summary.inserted);
    println!("   Linked to existing: {}", summary.linked);
    println!("   Failed: {}", summary.failed);
    print_errors(&summary.errors);
    Ok(())
}

async fn run_genre_backfill(rt: &Runtime, limit: Option<usize>) -> Result<()> {
    let credentials = rt.credentials.require_spotify()?;
    let storage = rt.storage(false)?;
    let api = SpotifyApi::new(rt.http_for(constants::SPOTIFY), rt.pacer.clone(), credentials)
        .with_request_delay(rt.config.pipeline.page_pause());

    println!("🔄 Backfilling artist genres from Spotify...");
    let summary = GenreBackfill::new(Arc::new(api), storage).run(limit).await?;

    println!("\n📊 Genre backfill results:");
    println!("   Artists without genres: {}", summary.artists_found);
    println!("   With a Spotify id: {}", summary.with_spotify_id);
    println!("   Updated: {}", summary.updated);
    println!("   No Spotify genres: {}", summary.no_genres);
    println!("   Failed: {}", summary.failed);
    print_errors(&summary.errors);
    Ok(())
}

async fn run_setlist(rt: &Runtime, query: SetlistQuery, event_id: Option<String>, dry_run: bool) -> Result<()> {
    let storage = rt.storage(dry_run)?;
    let http = rt.http_for(constants::SETLIST_FM);

    let mut resolver = SetlistResolver::new(http.clone(), rt.config.setlist.proxies.clone());
    match &rt.credentials.setlist_fm_api_key {
        Some(key) => resolver = resolver.with_direct(SetlistFmApi::new(http, key.clone())),
        None => warn!("SETLIST_FM_API_KEY not set; using proxies only"),
    }
    if rt.config.setlist.use_cache {
        resolver = resolver.with_cache(storage.clone());
    }

    let enricher = SetlistEnricher::new(resolver, storage, &rt.config.pipeline.events_table);
    match enricher.enrich(&query, event_id.as_deref()).await? {
        Some(outcome) => {
            println!(
                "✅ {} songs from {} ({}), stored in {}",
                outcome.setlist.song_count, outcome.source, outcome.setlist.setlist_fm_id, outcome.stored_in
            );
            for song in &outcome.setlist.songs {
                println!("   {}.{} {}", song.set_number, song.position, song.name);
            }
        }
        None => println!("⚠️  No setlist found for {}", query.artist_name),
    }
    Ok(())
}

async fn run_server(rt: &Runtime, port: Option<u16>) -> Result<()> {
    observability::init_metrics();
    let storage = rt.storage(false)?;
    let jambase = match rt.credentials.require_jambase() {
        Ok(key) => Some(Arc::new(rt.jambase(key))),
        Err(e) => {
            warn!("Live JamBase fallback disabled: {}", e);
            None
        }
    };
    let state = AppState {
        storage,
        jambase,
        events_table: rt.config.server.events_table.clone(),
        response_timeout: Duration::from_secs(rt.config.server.response_timeout_secs),
    };
    start_server(state, port.unwrap_or(rt.config.server.port)).await?;
    Ok(())
}

fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    warn!("{} error(s) during run", errors.len());
    println!("\n⚠️  Errors encountered:");
    for error in errors {
        println!("   - {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let rt = Runtime::new(config)?;

    match cli.command {
        Commands::Ticketmaster {
            cities,
            dry_run,
            batch_size,
        } => run_ticketmaster(&rt, cities, dry_run, batch_size).await,
        Commands::JambaseSync {
            start_page,
            resume,
            max_pages,
            modified_since,
            incremental,
            dry_run,
            batch_size,
        } => {
            let options = SyncOptions {
                start_page,
                resume,
                max_pages,
                date_modified_from: modified_since,
                incremental,
            };
            run_jambase_sync(&rt, options, dry_run, batch_size).await
        }
        Commands::SpotifyArtists {
            limit,
            genres,
            dry_run,
        } => run_spotify(&rt, limit, genres, dry_run).await,
        Commands::BackfillGenres { limit } => run_genre_backfill(&rt, limit).await,
        Commands::Setlist {
            artist,
            date,
            venue,
            city,
            state,
            event_id,
            dry_run,
        } => {
            let query = SetlistQuery {
                artist_name: artist,
                date,
                venue_name: venue,
                city_name: city,
                state_code: state,
            };
            run_setlist(&rt, query, event_id, dry_run).await
        }
        Commands::Serve { port } => run_server(&rt, port).await,
    }
}
