mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use hostwatch_core::{
    alert_channel, format_response_time, AlertDispatcher, CheckKind, DnsResolver, Engine,
    EngineConfig, MemoryStore, Notifier, Probe, Prober, Target, TargetStatus, TargetStore,
    WebhookNotifier,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        // Leak is fine — called once, lives for the program's lifetime.
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Host uptime monitor — probe endpoints and alert on status changes.
#[derive(Parser)]
#[command(name = "hostwatch", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring engine for all targets in a config file.
    Run {
        /// Path to TOML config file.
        #[arg(short, long)]
        config: PathBuf,

        /// Probe interval in seconds. Overrides config file.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Monitor a single host from the command line.
    Watch {
        /// Hostname, IP address, or URL to monitor.
        address: String,

        /// Check kind: icmp, tcp, http, or https.
        #[arg(long, default_value = "icmp")]
        check: CheckKind,

        /// Port for tcp checks (or to override the URL scheme default).
        #[arg(long)]
        port: Option<u16>,

        /// Probe interval in seconds.
        #[arg(long, default_value_t = 60)]
        interval: u64,

        /// Optional webhook URL to POST alerts to.
        #[arg(long)]
        webhook_url: Option<String>,
    },
    /// Probe a host once and exit. Exit code 1 if offline.
    Check {
        /// Hostname, IP address, or URL to probe.
        address: String,

        /// Check kind: icmp, tcp, http, or https.
        #[arg(long, default_value = "icmp")]
        check: CheckKind,

        /// Port for tcp checks.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, interval } => {
            run_engine(config, interval).await;
        }
        Commands::Watch {
            address,
            check,
            port,
            interval,
            webhook_url,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_watch(address, check, port, interval, webhook_url).await;
        }
        Commands::Check {
            address,
            check,
            port,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_check(address, check, port).await;
        }
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

fn build_prober(config: &EngineConfig) -> Arc<dyn Probe> {
    let resolver = match DnsResolver::from_system_conf(config.dns_cache_ttl, config.dns_timeout) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize DNS resolver");
            std::process::exit(1);
        }
    };
    let client = Prober::build_client(config.http_timeout);
    Arc::new(Prober::new(resolver, client, config.clone()))
}

async fn run_engine(config_path: PathBuf, interval_override: Option<u64>) {
    let app_config = match config::AppConfig::load(&config_path) {
        Ok(c) => {
            init_tracing(&c.monitor.log_format);
            tracing::info!(path = %config_path.display(), "Loaded config file");
            c
        }
        Err(e) => {
            init_tracing("pretty");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut engine_config = app_config.monitor.to_engine_config();
    if let Some(secs) = interval_override {
        engine_config = engine_config.with_probe_interval(Duration::from_secs(secs));
    }

    if app_config.target.is_empty() {
        tracing::error!("No targets configured, nothing to monitor");
        std::process::exit(1);
    }

    let targets: Vec<Target> = app_config.target.iter().map(|t| t.to_target()).collect();
    let target_count = targets.len();
    let store = Arc::new(MemoryStore::with_targets(targets));
    let prober = build_prober(&engine_config);

    let (alert_tx, alert_rx) = alert_channel();

    let dispatcher_handle = if let Some(ref alert) = app_config.alert {
        let notifier = WebhookNotifier::new(
            Prober::build_client(Duration::from_millis(alert.timeout_ms)),
            alert.webhook_url.clone(),
        )
        .with_timeout(Duration::from_millis(alert.timeout_ms))
        .with_max_retries(alert.max_retries);
        let notifier = match &alert.secret {
            Some(secret) => notifier.with_secret(secret.clone()),
            None => notifier,
        };
        let dispatcher = AlertDispatcher::new(alert_rx, Arc::new(notifier) as Arc<dyn Notifier>);
        tracing::info!(url = %alert.webhook_url, "Webhook alert dispatcher started");
        tokio::spawn(dispatcher.run())
    } else {
        // No delivery channel configured: drain so transitions still log.
        tokio::spawn(async move {
            let mut rx = alert_rx;
            while rx.recv().await.is_some() {}
        })
    };

    let engine = Arc::new(Engine::new(
        engine_config,
        Arc::clone(&store) as Arc<dyn TargetStore>,
        prober,
        Some(alert_tx),
    ));

    if let Err(e) = engine.start().await {
        tracing::error!(error = %e, "Failed to start engine");
        std::process::exit(1);
    }
    tracing::info!(targets = target_count, "Monitoring started");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping engine...");
    engine.stop().await;

    // Engine holds the only sender; once its tasks wind down the dispatcher
    // sees the channel close.
    drop(engine);

    match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
        Ok(_) => tracing::info!("Alert dispatcher shut down"),
        Err(_) => tracing::warn!("Alert dispatcher did not shut down in time, aborting"),
    }

    tracing::info!("Shutdown complete");
}

async fn run_watch(
    address: String,
    check: CheckKind,
    port: Option<u16>,
    interval: u64,
    webhook_url: Option<String>,
) {
    let engine_config = EngineConfig::default()
        .with_probe_interval(Duration::from_secs(interval));

    let mut target = Target::new(1, 0, address.clone(), address.clone(), check);
    if let Some(p) = port {
        target = target.with_port(p);
    }

    let store = Arc::new(MemoryStore::with_targets(vec![target]));
    let prober = build_prober(&engine_config);
    let (alert_tx, mut alert_rx) = alert_channel();

    if let Some(ref url) = webhook_url {
        tracing::info!(url = %url, "Alerts will be posted to webhook");
    }
    let webhook = webhook_url.as_ref().map(|url| {
        WebhookNotifier::new(Prober::build_client(Duration::from_secs(5)), url.clone())
    });

    let engine = Arc::new(Engine::new(
        engine_config,
        Arc::clone(&store) as Arc<dyn TargetStore>,
        prober,
        Some(alert_tx),
    ));

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{wide_msg}").expect("valid template");

    multi
        .println(format!(
            "{} {}",
            style("hostwatch").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
    multi
        .println(format!(
            "  {} {}",
            style("target:  ").dim(),
            style(&address).bold()
        ))
        .ok();
    multi
        .println(format!("  {} {}", style("check:   ").dim(), check))
        .ok();
    if let Some(p) = port {
        multi
            .println(format!("  {} {}", style("port:    ").dim(), p))
            .ok();
    }
    multi
        .println(format!("  {} {}s", style("interval:").dim(), interval))
        .ok();
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    if let Err(e) = engine.start().await {
        tracing::error!(error = %e, "Failed to start engine");
        std::process::exit(1);
    }

    let status_bar = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status_bar.set_message(format!("  {}", style("Waiting for first probe...").dim()));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = &mut shutdown => {
                status_bar.finish_and_clear();
                multi.println(format!("\n{}", style("Monitor stopped.").dim())).ok();
                engine.stop().await;
                return;
            }
        }

        while let Ok(alert) = alert_rx.try_recv() {
            let badge = match alert.status {
                TargetStatus::Online => style("ONLINE ").green().bold(),
                TargetStatus::Offline => style("OFFLINE").red().bold(),
                TargetStatus::Unknown => style("UNKNOWN").dim().bold(),
            };
            for line in alert.message.lines() {
                multi.println(format!("  {}  {}", badge, line)).ok();
            }
            multi.println("").ok();
            if let Some(ref notifier) = webhook {
                if let Err(e) = notifier.notify(alert.user_id, &alert.message).await {
                    tracing::warn!(error = %e, "Webhook delivery failed");
                }
            }
        }

        if let Ok(current) = store.get_target(1).await {
            let stats = engine.stats(1);
            let badge = match current.status {
                TargetStatus::Online => style("up  ").green(),
                TargetStatus::Offline => style("down").red(),
                TargetStatus::Unknown => style("... ").dim(),
            };
            status_bar.set_message(format!(
                "  {}  {}  {}  uptime {:.1}%  ({}/{} probes)",
                badge,
                style(&address).bold(),
                format_response_time(current.last_latency),
                stats.uptime_pct,
                stats.successful,
                stats.total,
            ));
        }
    }
}

async fn run_check(address: String, check: CheckKind, port: Option<u16>) {
    let engine_config = EngineConfig::default();

    let mut target = Target::new(1, 0, address.clone(), address.clone(), check);
    if let Some(p) = port {
        target = target.with_port(p);
    }

    let prober = build_prober(&engine_config);
    let outcome = prober.probe(&target).await;

    if outcome.online {
        println!(
            "{} {} {}",
            style("online").green().bold(),
            style(&address).bold(),
            format_response_time(Some(outcome.latency)),
        );
    } else {
        println!(
            "{} {} {}",
            style("offline").red().bold(),
            style(&address).bold(),
            outcome.error.as_deref().unwrap_or("unknown error"),
        );
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
