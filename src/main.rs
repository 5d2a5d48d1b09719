//! geotrail - location timelines from Instagram profiles
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use geotrail::api::Challenge;
use geotrail::api::instagram::InstagramClient;
use geotrail::auth::{SessionManager, SessionStore};
use geotrail::config::{DateBound, parse_date};
use geotrail::models::{Identity, Session};
use geotrail::{Config, HarvestEvent, HarvestSettings, Harvester, ProgressSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match parse_args(std::env::args().skip(1).collect())? {
        Command::Harvest(options) => harvest_cli(options).await,
        Command::Login { options } => login_cli(&options).await,
        Command::Logout { username, config } => logout_cli(username, config.as_deref()),
        Command::Sessions { config } => list_sessions(config.as_deref()),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Flags shared by the commands that talk to the service
#[derive(Debug, Default)]
struct Options {
    profiles: Vec<String>,
    username: Option<String>,
    token: Option<String>,
    limit: Option<usize>,
    from: Option<String>,
    to: Option<String>,
    floor_ms: Option<u64>,
    workers: Option<usize>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
}

/// CLI commands
#[derive(Debug)]
enum Command {
    Harvest(Options),
    Login { options: Options },
    Logout { username: Option<String>, config: Option<PathBuf> },
    Sessions { config: Option<PathBuf> },
    Help,
    Version,
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut i = 0;

    let value = |i: usize, flag: &str| -> Result<String> {
        args.get(i + 1)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing value for {flag}"))
    };

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-u" | "--user" => options.username = Some(value(i, arg)?),
            "--token" => options.token = Some(value(i, arg)?),
            "-l" | "--limit" => {
                options.limit = Some(value(i, arg)?.parse().context("--limit expects a number")?);
            }
            "--from" => options.from = Some(value(i, arg)?),
            "--to" => options.to = Some(value(i, arg)?),
            "--floor" => {
                options.floor_ms = Some(value(i, arg)?.parse().context("--floor expects milliseconds")?);
            }
            "-w" | "--workers" => {
                options.workers = Some(value(i, arg)?.parse().context("--workers expects a number")?);
            }
            "-o" | "--output" => options.output = Some(PathBuf::from(value(i, arg)?)),
            "-c" | "--config" => options.config = Some(PathBuf::from(value(i, arg)?)),
            flag if flag.starts_with('-') => {
                return Err(anyhow::anyhow!("Unknown option: {flag}\nRun 'geotrail --help' for usage"));
            }
            profile => {
                options.profiles.push(profile.to_string());
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    Ok(options)
}

fn parse_args(args: Vec<String>) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),
        "harvest" | "run" => Ok(Command::Harvest(parse_options(&args[1..])?)),
        "login" => {
            let mut options = parse_options(&args[1..])?;
            if options.username.is_none() && !options.profiles.is_empty() {
                options.username = Some(options.profiles.remove(0));
            }
            Ok(Command::Login { options })
        }
        "logout" => {
            let options = parse_options(&args[1..])?;
            let username = options.username.or_else(|| options.profiles.into_iter().next());
            Ok(Command::Logout {
                username,
                config: options.config,
            })
        }
        "sessions" => Ok(Command::Sessions {
            config: parse_options(&args[1..])?.config,
        }),
        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'geotrail --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = geotrail::Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"{}
geotrail - location timelines from Instagram profiles

USAGE:
    geotrail <COMMAND> [OPTIONS]

COMMANDS:
    harvest [profile...] [OPTIONS]     Build location timelines and export CSV
      Options:
        -u, --user <name>              Account to log in with
            --token <token>            Use an API access token instead of a password
        -l, --limit <n>                Posts per profile (default: 50)
            --from <date>              Skip posts before YYYY-MM-DD or RFC 3339
            --to <date>                Skip posts after YYYY-MM-DD or RFC 3339
            --floor <ms>               Minimum delay between requests (default: 3000)
        -w, --workers <n>              Concurrent location lookups (default: 4)
        -o, --output <dir>             Output directory (default: output)
      Examples:
        geotrail harvest natgeo --user me
        geotrail harvest https://www.instagram.com/natgeo/ --limit 200
        geotrail harvest alice bob --from 2024-01-01 --to 2024-06-30

    login <name> [--token <token>]     Log in and store the session
    logout <name>                      Forget the stored session
    sessions                           List stored sessions

OPTIONS:
    -c, --config <path>                Use another config file
    -h, --help                         Show this help message
    -v, --version                      Show version information

ENVIRONMENT:
    GEOTRAIL_PASSWORD                  Password, instead of prompting
    RUST_LOG                           Log filter (default: warn)

CONFIG:
    {}
"#,
        geotrail::LOGO,
        config_path
    );
}

fn print_version() {
    println!("geotrail {}", geotrail::VERSION);
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn session_store(config: &Config) -> Result<SessionStore> {
    match &config.auth.session_file {
        Some(path) => Ok(SessionStore::at(path)),
        None => SessionStore::open_default(),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Reads two-factor codes from stdin; an empty line gives up
fn prompt_code(challenge: &Challenge, attempt: u32) -> Option<String> {
    if attempt > 1 {
        println!("✗ Code rejected");
    }
    let code = prompt(&format!("Two-factor code for @{}", challenge.username)).ok()?;
    (!code.is_empty()).then_some(code)
}

/// Get an authenticated session, reusing the stored one when it is still valid
async fn login(config: &Config, options: &Options, client: &InstagramClient) -> Result<Session> {
    let username = options
        .username
        .clone()
        .or_else(|| config.auth.username.clone())
        .ok_or_else(|| anyhow::anyhow!("No account given. Use --user <name> or set auth.username"))?;

    let mut manager = SessionManager::new(client, session_store(config)?)
        .with_max_challenge_attempts(config.auth.max_challenge_attempts);

    let session = if let Some(token) = &options.token {
        manager
            .establish(&Identity::token(&username, token), &mut prompt_code)
            .await?
    } else {
        // Only ask for the password when the stored session is unusable
        let restored = manager.restore(&Identity::password(&username, "")).await?;
        if restored.is_authenticated() {
            return Ok(restored);
        }
        let password = match std::env::var("GEOTRAIL_PASSWORD") {
            Ok(password) => password,
            Err(_) => prompt(&format!("Password for @{username}"))?,
        };
        manager
            .sign_in(&Identity::password(&username, &password), &mut prompt_code)
            .await?
    };
    println!("✓ Logged in as @{}", session.username);
    Ok(session)
}

fn apply_overrides(config: &mut Config, options: &Options) -> Result<()> {
    if let Some(limit) = options.limit {
        config.max_posts = limit;
    }
    if let Some(from) = &options.from {
        config.date_from =
            Some(parse_date(from, DateBound::Start).ok_or_else(|| anyhow::anyhow!("Invalid --from date: {from}"))?);
    }
    if let Some(to) = &options.to {
        config.date_to =
            Some(parse_date(to, DateBound::End).ok_or_else(|| anyhow::anyhow!("Invalid --to date: {to}"))?);
    }
    if let Some(floor) = options.floor_ms {
        config.rate_limit_floor_ms = floor;
    }
    if let Some(workers) = options.workers {
        config.resolver.workers = workers;
    }
    if let Some(output) = &options.output {
        config.export.output_dir.clone_from(output);
    }
    Ok(())
}

/// Prints entries as they are added
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Started { profile, limit, .. } => {
                println!("\n📍 {profile} (up to {limit} posts)");
                println!("{}", "─".repeat(60));
            }
            HarvestEvent::EntryAdded { taken_at, location, .. } => {
                let place = if location.is_resolved() {
                    location.name.as_str()
                } else {
                    geotrail::export::UNKNOWN_LOCATION
                };
                println!("  {}  {place}", taken_at.format("%Y-%m-%d %H:%M"));
            }
            HarvestEvent::PostSkipped { .. } => {}
            HarvestEvent::Finished { profile, completion, entries, skipped } => {
                println!("✓ {profile}: {entries} posts, {skipped} skipped ({completion})");
            }
        }
    }
}

async fn harvest_cli(options: Options) -> Result<()> {
    let mut config = load_config(options.config.as_deref())?;
    apply_overrides(&mut config, &options)?;

    let mut targets = Vec::new();
    if options.profiles.is_empty() {
        targets.push(config.validate()?);
    } else {
        for profile in &options.profiles {
            config.profile.clone_from(profile);
            targets.push(config.validate()?);
        }
    }

    let client = InstagramClient::new(&config.api)?;
    let session = login(&config, &options, &client).await?;

    let harvester = Harvester::new(&client, &client, session, HarvestSettings::from_config(&config))
        .with_sink(ConsoleSink);

    let token = harvester.cancellation_token();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling, finishing the current request...");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let several = targets.len() > 1;
    let timelines = harvester.harvest_profiles(targets).await;

    for timeline in &timelines {
        let mut path = config.export_path(timeline.profile());
        if several && config.export.file_name.is_some() {
            path = config
                .export
                .output_dir
                .join(format!("{}_location_timeline.csv", timeline.profile().name()));
        }
        geotrail::export::export_csv(timeline, &path)?;
        println!(
            "  {} located, {} unknown → {}",
            timeline.resolved(),
            timeline.unresolved(),
            path.display()
        );
    }

    Ok(())
}

async fn login_cli(options: &Options) -> Result<()> {
    let config = load_config(options.config.as_deref())?;
    let client = InstagramClient::new(&config.api)?;
    login(&config, options, &client).await?;
    println!("✓ Session saved");
    Ok(())
}

fn logout_cli(username: Option<String>, config: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(config)?;
    let username = username
        .or_else(|| config.auth.username.clone())
        .ok_or_else(|| anyhow::anyhow!("Missing account name\nExample: geotrail logout me"))?;

    let client = InstagramClient::new(&config.api)?;
    let manager = SessionManager::new(&client, session_store(&config)?);
    manager.logout(&mut Session::new(&username))?;

    println!("✓ Logged out @{username}");
    Ok(())
}

fn list_sessions(config: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(config)?;
    let usernames = session_store(&config)?.usernames();

    if usernames.is_empty() {
        println!("No stored sessions.");
        println!("\nLog in with:");
        println!("  geotrail login <name>");
        return Ok(());
    }

    println!("Stored sessions:\n");
    for username in usernames {
        println!("  @{username}");
    }
    Ok(())
}
