//! PlantWatch Console - command-line front end
//!
//! Each subcommand renders one page of the console. `dashboard --follow` and
//! `watch` keep a realtime stream open until Ctrl-C.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use plantwatch::analytics::{load_cards, CategoryFilter, DatePreset};
use plantwatch::config::SessionBackendKind;
use plantwatch::inventory::{InventoryQuery, SortConfig, SortDirection, SortKey, StatusFilter};
use plantwatch::logs::LiveLog;
use plantwatch::models::{DeviceStatus, DeviceType, DeviceUpdate, NewDevice, WeatherReport};
use plantwatch::session::{FileBackend, KeyringBackend, SessionBackend};
use plantwatch::views::{self, DashboardView};
use plantwatch::{
    api, auth, ConnectionState, ConsoleConfig, DeviceCategory, Fleet, Gateway, HistoryQuery, RealtimeHandle,
    RealtimeOptions, Route, SessionStore, UiEvent, UiEvents,
};

#[derive(Parser)]
#[command(name = "plantwatch")]
#[command(about = "Operator console for the PlantWatch IoT platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API base URL, overrides config and environment
    #[arg(short = 'u', long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
    Logout,
    Whoami,
    Dashboard {
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long, default_value = "today")]
        range: DatePreset,
        /// Keep streaming live telemetry
        #[arg(short, long)]
        follow: bool,
    },
    #[command(subcommand)]
    Devices(DeviceCommands),
    History {
        device: String,
        /// Ranged query (up to 500 points); latest 100 when omitted
        #[arg(short, long)]
        range: Option<DatePreset>,
    },
    Analytics {
        #[arg(short, long, default_value = "24h")]
        range: DatePreset,
        #[arg(short = 'C', long, default_value = "all")]
        category: CategoryFilter,
    },
    Users,
    Weather,
    /// Live telemetry log
    Watch {
        /// Only show this device
        #[arg(short, long)]
        device: Option<String>,
    },
    Settings,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum DeviceCommands {
    List {
        #[arg(short, long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        status: StatusFilter,
        #[arg(long, default_value = "name")]
        sort: SortKey,
        #[arg(long)]
        desc: bool,
    },
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short = 'C', long, value_parser = parse_wire::<DeviceCategory>)]
        category: DeviceCategory,
        #[arg(short = 't', long = "type", value_parser = parse_wire::<DeviceType>)]
        device_type: DeviceType,
    },
    Update {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short = 'C', long, value_parser = parse_wire::<DeviceCategory>)]
        category: Option<DeviceCategory>,
        #[arg(short, long, value_parser = parse_wire::<DeviceStatus>)]
        status: Option<DeviceStatus>,
    },
    Remove {
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show,
    /// Write the effective configuration to the config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

/// Parse a CLI value with the same spelling as the wire format
fn parse_wire<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string())).map_err(|e| e.to_string())
}

struct Console {
    config: ConsoleConfig,
    config_path: Option<PathBuf>,
    session: SessionStore,
    gateway: Gateway,
}

impl Console {
    /// Route a command lands on for the current session
    fn guard(&self, requested: Route) -> Result<()> {
        match Route::resolve(requested, &self.session) {
            resolved if resolved == requested => Ok(()),
            Route::Login => bail!("not logged in, run `plantwatch login --email <email>` first"),
            _ if requested == Route::AdminUsers => bail!("administrator access required"),
            resolved => {
                debug!("{} redirected to {}", requested.path(), resolved.path());
                Ok(())
            }
        }
    }

    fn fleet(&self) -> Fleet {
        Fleet::with_capacity(self.gateway.clone(), self.config.windows.chart_points)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plantwatch=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (mut config, config_path) = match &cli.config {
        Some(path) => {
            let mut config = ConsoleConfig::load_from(path)
                .await
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok());
            (config, Some(path.clone()))
        }
        None => {
            if ConsoleConfig::is_first_time_setup() && !matches!(cli.command, Commands::Config(_)) {
                info!("no configuration file yet, using defaults (run `plantwatch config init` to write one)");
            }
            (
                ConsoleConfig::load().await.context("failed to load configuration")?,
                ConsoleConfig::config_file_path().ok(),
            )
        }
    };
    if let Some(url) = cli.api_url {
        config.api.url = url;
    }

    let backend: Box<dyn SessionBackend> = match config.session.backend {
        SessionBackendKind::File => Box::new(FileBackend::new(
            config.session_file_path().context("no location for the session file")?,
        )),
        SessionBackendKind::Keyring => Box::new(KeyringBackend::default()),
    };
    let session = SessionStore::init(backend);

    let events = UiEvents::default();
    let mut toasts = events.subscribe();
    let gateway = Gateway::new(&config.api, session.clone(), events).context("failed to build HTTP client")?;

    let console = Console { config, config_path, session, gateway };
    let result = run(cli.command, &console, &mut toasts).await;
    flush_events(&mut toasts);
    result
}

async fn run(command: Commands, console: &Console, toasts: &mut broadcast::Receiver<UiEvent>) -> Result<()> {
    let gateway = &console.gateway;

    match command {
        Commands::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => read_line("password: ").await?,
            };
            let user = auth::login(gateway, &email, &password).await?;
            println!("{} <{}> ({})", user.name, user.email, user.role.title());
        }

        Commands::Register { email, password, confirm } => {
            auth::register(gateway, &email, &password, &confirm).await?;
        }

        Commands::Logout => {
            auth::logout(gateway).context("failed to clear stored session")?;
            println!("Logged out.");
        }

        Commands::Whoami => match console.session.user() {
            Some(user) => println!("{} <{}> id={} ({})", user.name, user.email, user.id, user.role.title()),
            None => println!("Not logged in."),
        },

        Commands::Dashboard { device, range, follow } => {
            console.guard(Route::Dashboard)?;
            dashboard(console, device, range, follow, toasts).await?;
        }

        Commands::Devices(cmd) => {
            console.guard(Route::Devices)?;
            devices(console, cmd).await?;
        }

        Commands::History { device, range } => {
            console.guard(Route::Dashboard)?;
            let mut fleet = console.fleet();
            fleet.refresh_devices().await;
            if !fleet.select(&device) {
                bail!("device {device} is not in your inventory");
            }
            let query = match range {
                Some(preset) => HistoryQuery::ranged(preset.resolve(Local::now())),
                None => HistoryQuery::recent(),
            };
            fleet.load_history(query).await;
            println!("{}", views::render_series(fleet.selected_device(), fleet.series()));
        }

        Commands::Analytics { range, category } => {
            console.guard(Route::Analytics)?;
            let mut fleet = console.fleet();
            fleet.refresh_devices().await;
            let cards = load_cards(
                gateway,
                fleet.devices(),
                category,
                range.resolve(Local::now()),
                console.config.windows.analytics_points,
            )
            .await;
            println!("{}", views::render_analytics(&cards, range, category));
        }

        Commands::Users => {
            console.guard(Route::AdminUsers)?;
            let users = api::list_users(gateway).await.unwrap_or_else(|e| {
                warn!("failed to fetch users: {e}");
                Vec::new()
            });
            println!("{}", views::render_users(&users));
        }

        Commands::Weather => {
            console.guard(Route::Dashboard)?;
            match api::current_weather(gateway).await {
                Ok(report) => println!("{}", views::render_weather(&report)),
                Err(e) => warn!("failed to fetch weather: {e}"),
            }
        }

        Commands::Watch { device } => {
            console.guard(Route::Dashboard)?;
            watch(console, device, toasts).await?;
        }

        Commands::Settings => {
            console.guard(Route::Settings)?;
            if let Some(user) = console.session.user() {
                println!(
                    "{}",
                    views::render_settings(&user, &console.config, console.config_path.as_deref())
                );
            }
        }

        Commands::Config(ConfigCommands::Show) => {
            let text = toml::to_string_pretty(&console.config).context("failed to serialize configuration")?;
            if let Some(path) = &console.config_path {
                println!("# {}", path.display());
            }
            println!("{text}");
        }

        Commands::Config(ConfigCommands::Init { force }) => {
            let path = match &console.config_path {
                Some(path) => path.clone(),
                None => ConsoleConfig::config_file_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            console.config.save_to(&path).await?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

async fn devices(console: &Console, cmd: DeviceCommands) -> Result<()> {
    let mut fleet = console.fleet();

    match cmd {
        DeviceCommands::List { search, status, sort, desc } => {
            fleet.refresh_devices().await;
            let mut order = SortConfig { key: sort, direction: SortDirection::Asc };
            if desc {
                order = order.toggle(sort);
            }
            let query = InventoryQuery { search, status, sort: Some(order) };
            println!("{}", views::render_devices_table(&query.apply(fleet.devices())));
        }
        DeviceCommands::Add { name, category, device_type } => {
            if !fleet.add_device(NewDevice::new(name, category, device_type)).await {
                bail!("device was not registered");
            }
            println!("{}", views::render_devices_table(&fleet.devices().iter().collect::<Vec<_>>()));
        }
        DeviceCommands::Update { id, name, category, status } => {
            let update = DeviceUpdate { name, category, status, configuration: None };
            if update.is_empty() {
                bail!("nothing to update: pass --name, --category or --status");
            }
            fleet.refresh_devices().await;
            if !fleet.update_device(&id, update).await {
                bail!("device {id} was not updated");
            }
            if let Some(device) = fleet.device(&id) {
                println!("{}", views::render_devices_table(&[device]));
            }
        }
        DeviceCommands::Remove { id } => {
            if !fleet.remove_device(&id).await {
                bail!("device {id} was not removed");
            }
        }
    }
    Ok(())
}

async fn dashboard(
    console: &Console,
    device: Option<String>,
    range: DatePreset,
    follow: bool,
    toasts: &mut broadcast::Receiver<UiEvent>,
) -> Result<()> {
    let Some(user) = console.session.user() else {
        bail!("not logged in");
    };

    let mut fleet = console.fleet();
    fleet.refresh_devices().await;
    if let Some(id) = device.as_deref() {
        if !fleet.select(id) {
            warn!("device {id} is not in your inventory, showing {:?}", fleet.selected_id());
        }
    }
    fleet.load_history(HistoryQuery::ranged(range.resolve(Local::now()))).await;
    let mut weather: Option<WeatherReport> = api::current_weather(&console.gateway).await.ok();

    let render = |fleet: &Fleet, weather: Option<&WeatherReport>, log: Option<&LiveLog>, stream: ConnectionState| {
        views::render_dashboard(&DashboardView {
            user: &user,
            devices: fleet.devices(),
            selected: fleet.selected_device(),
            series: fleet.series(),
            weather,
            log,
            connection: stream,
            range_label: range.label(),
        })
    };

    if !follow {
        println!(
            "{}",
            render(&fleet, weather.as_ref(), None, ConnectionState::Disconnected)
        );
        return Ok(());
    }

    let handle = RealtimeHandle::spawn(RealtimeOptions::from(&console.config));
    let mut metrics = handle.subscribe_metrics();
    let mut weather_rx = handle.subscribe_weather();
    let mut state = handle.subscribe_state();
    let mut log = LiveLog::new(console.config.windows.log_entries);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        flush_events(toasts);
        print!("\x1b[2J\x1b[H");
        println!("{}", render(&fleet, weather.as_ref(), Some(&log), handle.state()));

        tokio::select! {
            changed = metrics.changed() => {
                if changed.is_err() { break; }
                let latest = metrics.borrow_and_update().clone();
                if let Some(metric) = latest {
                    fleet.apply_live(metric.clone());
                    log.accept(metric, &user);
                }
            }
            changed = weather_rx.changed() => {
                if changed.is_err() { break; }
                if let Some(report) = weather_rx.borrow_and_update().clone() {
                    weather = Some(report);
                }
            }
            changed = state.changed() => {
                if changed.is_err() { break; }
                if handle.is_exhausted() {
                    warn!("realtime stream unavailable, showing last known data");
                }
            }
            _ = &mut ctrl_c => break,
        }

        if !console.session.is_authenticated() {
            warn!("session ended");
            break;
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn watch(console: &Console, device: Option<String>, toasts: &mut broadcast::Receiver<UiEvent>) -> Result<()> {
    let Some(user) = console.session.user() else {
        bail!("not logged in");
    };

    let mut handle = RealtimeHandle::spawn(RealtimeOptions::from(&console.config));
    let mut metrics = handle.subscribe_metrics();
    let mut state = handle.subscribe_state();
    let mut log = LiveLog::new(console.config.windows.log_entries);
    info!("streaming from {}", console.config.socket_url());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        flush_events(toasts);
        tokio::select! {
            changed = metrics.changed() => {
                if changed.is_err() { break; }
                let Some(metric) = metrics.borrow_and_update().clone() else { continue };
                if device.as_deref().is_some_and(|id| id != metric.device_id) {
                    continue;
                }
                if log.accept(metric, &user) {
                    if let Some(entry) = log.latest() {
                        println!("{}", views::render_log_line(entry));
                    }
                }
            }
            changed = state.changed() => {
                if changed.is_err() { break; }
                let current = *state.borrow_and_update();
                eprintln!("[stream] {}", views::connection_label(current));
                if handle.is_exhausted() {
                    eprintln!("[stream] reconnect attempts exhausted, press Enter to retry or Ctrl-C to quit");
                    tokio::select! {
                        line = read_line("") => {
                            line?;
                            handle.restart();
                        }
                        _ = &mut ctrl_c => break,
                    }
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Print pending toasts to stderr
fn flush_events(rx: &mut broadcast::Receiver<UiEvent>) {
    loop {
        match rx.try_recv() {
            Ok(UiEvent::Toast(toast)) => eprintln!("{}", views::render_toast(&toast)),
            Ok(UiEvent::Navigate(route)) => debug!("navigate to {}", route.path()),
            Err(broadcast::error::TryRecvError::Lagged(n)) => warn!("{n} notifications dropped"),
            Err(_) => break,
        }
    }
}

async fn read_line(prompt: &str) -> Result<String> {
    if !prompt.is_empty() {
        eprint!("{prompt}");
    }
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
