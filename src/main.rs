use petty_house::config::{load_config, save_default_config, Config};
use petty_house::constants::CONFIG_PATH;
use petty_house::error::{AppError, AppResult};
use petty_house::location::{clamp_radius_km, LastLocationCache};
use petty_house::logging::{init_logging, install_panic_hook, log_error};
use petty_house::models::{Coordinate, RadiusQuery};
use petty_house::session::MapSession;
use petty_house::store::{Identity, PocketBaseClient};
use petty_house::utils::geo::haversine_km;
use petty_house::utils::geocoding::reverse_geocode;
use std::sync::Arc;
use tracing::{info, warn};

const USAGE: &str = "Usage:
  petty-house --init-config
  petty-house nearby <lat> <lon> [radius_km]
  petty-house watch <lat> <lon> [radius_km]";

enum Command {
    Nearby(RadiusQuery),
    Watch(RadiusQuery),
}

fn parse_query(args: &[String], config: &Config) -> AppResult<RadiusQuery> {
    let [lat, lon, rest @ ..] = args else {
        return Err(AppError::Validation("latitude and longitude are required".to_string()));
    };
    let parse = |name: &str, value: &str| {
        value
            .parse::<f64>()
            .map_err(|_| AppError::Validation(format!("{} is not a number: {}", name, value)))
    };

    let center = Coordinate::new(parse("latitude", lat)?, parse("longitude", lon)?)?;
    let radius = match rest.first() {
        Some(value) => parse("radius", value)?,
        None => config.map.default_radius_km,
    };
    RadiusQuery::new(center, clamp_radius_km(radius))
}

fn parse_command(args: &[String], config: &Config) -> AppResult<Command> {
    match args.split_first() {
        Some((cmd, rest)) if cmd == "nearby" => Ok(Command::Nearby(parse_query(rest, config)?)),
        Some((cmd, rest)) if cmd == "watch" => Ok(Command::Watch(parse_query(rest, config)?)),
        _ => Err(AppError::Validation("unknown command".to_string())),
    }
}

async fn describe_center(config: &Config, query: &RadiusQuery) {
    match reverse_geocode(&config.reverse_geocoding, &query.center).await {
        Ok(Some(label)) => info!("Searching {}km around {}", query.radius_km, label),
        Ok(None) => info!(
            "Searching {}km around {:.5},{:.5}",
            query.radius_km, query.center.latitude, query.center.longitude
        ),
        Err(e) => warn!("Reverse geocoding failed: {}", e),
    }
}

fn print_markers(session: &MapSession, query: &RadiusQuery) {
    for post in session.markers().snapshot() {
        println!(
            "{:>6.2} km  {:>4} likes{}  {}  {}",
            haversine_km(&query.center, &post.coordinate),
            post.like_count,
            if post.has_liked_by_current_user { " (you)" } else { "" },
            post.id,
            post.address.as_deref().unwrap_or("-"),
        );
    }
}

async fn run(config: Config, command: Command) -> AppResult<()> {
    let identity = match (&config.auth.user_id, &config.auth.token) {
        (Some(user_id), Some(token)) => Identity::new(user_id, token),
        _ => Identity::anonymous(),
    };
    let client = Arc::new(PocketBaseClient::new(&config.backend, identity.token.clone())?);
    let mut session = MapSession::new(client.clone(), client, identity, &config);

    match command {
        Command::Nearby(query) => {
            describe_center(&config, &query).await;
            let count = session.refresh(query).await?;
            info!("{} posts within {}km", count, query.radius_km);
            print_markers(&session, &query);
        }
        Command::Watch(query) => {
            describe_center(&config, &query).await;
            session.refresh(query).await?;
            print_markers(&session, &query);

            if let Err(e) = LastLocationCache::default_path().save(&query.center) {
                warn!("Failed to remember location: {}", e);
            }

            session.mount().await?;
            info!("Watching for changes, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;

            session.unmount().await;
            print_markers(&session, &query);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--init-config") {
        match save_default_config(&CONFIG_PATH) {
            Ok(_) => {
                println!("Default configuration saved to {:?}", *CONFIG_PATH);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Failed to save default configuration: {}", e);
                std::process::exit(1);
            }
        }
    }

    init_logging();
    install_panic_hook();

    let mut config = load_config(&CONFIG_PATH);
    config.apply_env_overrides();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args, &config) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config, command).await {
        log_error("petty-house", &e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}
