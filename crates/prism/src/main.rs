mod client;
mod output;
mod telemetry;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use prism_core::config::Config;
use prism_core::time::TimeUnit;
use prism_ingest::Backend;
use prism_live::stream::StreamClient;
use prism_live::{SpanSnapshot, StreamStatus, TraceSession, TraceView};
use prism_store::Store;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::client::{HubClient, TracesQuery};
use crate::output::{BAR_WIDTH, Style, print_status_human, render_trace, render_traces, status_label};
use crate::telemetry::{SelfObserveMode, init_cli_tracing, init_run_tracing, shutdown_tracing};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(about = "Live distributed trace viewer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Base URL of a running `prism run`")]
    hub: Option<String>,

    #[arg(long, global = true, default_value = "us", help = "Unit of span timestamps (us or ms)")]
    unit: TimeUnit,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the OTLP receivers, live hub and archive")]
    Run {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        http_addr: Option<String>,
        #[arg(long)]
        grpc_addr: Option<String>,
        #[arg(long, help = "Serve live streams only, without the DuckDB archive")]
        no_archive: bool,
    },
    #[command(about = "Follow one trace live until it completes")]
    Watch { trace_id: String },
    #[command(about = "Show an archived trace")]
    Trace { trace_id: String },
    #[command(about = "List archived traces")]
    Traces {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "Show archive status")]
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let style = Style {
        unit: cli.unit,
        color: std::io::stdout().is_terminal(),
        bar_width: BAR_WIDTH,
    };

    match cli.command {
        Commands::Run {
            db_path,
            http_addr,
            grpc_addr,
            no_archive,
        } => {
            run_server(
                RunArgs {
                    db_path,
                    http_addr,
                    grpc_addr,
                    no_archive,
                },
                SelfObserveMode::from_env(),
            )
            .await
        }
        Commands::Watch { trace_id } => {
            init_cli_tracing();
            let cfg = Config::load().context("load config")?;
            let hub = cli.hub.unwrap_or_else(|| cfg.hub_url.clone());
            run_watch(&hub, &trace_id, cfg.render_interval, style, cli.json).await
        }
        Commands::Trace { trace_id } => {
            init_cli_tracing();
            let client = HubClient::new(&hub_url(cli.hub)?);
            let trace = client.get_trace(&trace_id).await?;
            let view = TraceView::derive(&SpanSnapshot::from_spans(trace.spans));
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", render_trace(&view, None, style));
            }
            Ok(())
        }
        Commands::Traces {
            service,
            since,
            until,
            limit,
        } => {
            init_cli_tracing();
            let client = HubClient::new(&hub_url(cli.hub)?);
            let response = client
                .list_traces(&TracesQuery {
                    limit,
                    service,
                    since,
                    until,
                })
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", render_traces(&response.traces, style));
            }
            Ok(())
        }
        Commands::Status => {
            init_cli_tracing();
            let client = HubClient::new(&hub_url(cli.hub)?);
            let status = client.status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status_human(&status);
            }
            Ok(())
        }
    }
}

fn hub_url(flag: Option<String>) -> anyhow::Result<String> {
    match flag {
        Some(url) => Ok(url),
        None => Ok(Config::load().context("load config")?.hub_url),
    }
}

struct RunArgs {
    db_path: Option<PathBuf>,
    http_addr: Option<String>,
    grpc_addr: Option<String>,
    no_archive: bool,
}

async fn run_server(args: RunArgs, self_observe: SelfObserveMode) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = args.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = args.http_addr {
        cfg.http_addr = v;
    }
    if let Some(v) = args.grpc_addr {
        cfg.grpc_addr = v;
    }

    let store = if args.no_archive {
        None
    } else {
        Some(
            Store::open(&cfg.db_path)
                .with_context(|| format!("open archive {}", cfg.db_path.display()))?,
        )
    };
    let backend = Backend::new(&cfg, store);
    init_run_tracing(self_observe, &backend.sink);

    eprintln!("prism run");
    if args.no_archive {
        eprintln!("  archive: disabled");
    } else {
        eprintln!("  archive: {}", cfg.db_path.display());
    }
    eprintln!("  http (otlp, stream, api): {}", cfg.http_addr);
    eprintln!("  grpc (otlp): {}", cfg.grpc_addr);
    eprintln!("  tip: run `prism watch <trace_id>` in another shell");

    let result = tokio::select! {
        res = backend.serve(&cfg) => res.context("backend stopped"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    };

    shutdown_tracing();
    result
}

#[derive(Serialize)]
struct WatchFrame<'a> {
    status: String,
    view: &'a TraceView,
}

async fn run_watch(
    hub: &str,
    trace_id: &str,
    render_interval: Duration,
    style: Style,
    json: bool,
) -> anyhow::Result<()> {
    let live = style.color && !json;
    let mut session = TraceSession::new(StreamClient::new(hub));
    session.open(trace_id);
    let mut state_rx = session.subscribe();

    let mut ticker = tokio::time::interval(render_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last: Option<(StreamStatus, TraceView)> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                session.close();
                return Ok(());
            }
        }

        let status = session.state().status;
        let view = session.view();
        let changed = last
            .as_ref()
            .is_none_or(|(s, v)| *s != status || *v != view);
        if changed {
            if json {
                let frame = WatchFrame {
                    status: status_label(&status),
                    view: &view,
                };
                println!("{}", serde_json::to_string(&frame)?);
            } else if live {
                print!("{CLEAR_SCREEN}{}", render_trace(&view, Some(&status), style));
            } else if status.is_terminal() {
                print!("{}", render_trace(&view, Some(&status), style));
            }
            last = Some((status.clone(), view));
        }

        if status.is_terminal() {
            if let StreamStatus::ConnectionLost(reason) = status {
                anyhow::bail!(reason);
            }
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_watch_with_global_flags() {
        let cli = Cli::try_parse_from([
            "prism",
            "watch",
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "--hub",
            "http://127.0.0.1:7000",
            "--unit",
            "ms",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.unit, TimeUnit::Millis);
        assert_eq!(cli.hub.as_deref(), Some("http://127.0.0.1:7000"));
        assert!(matches!(cli.command, Commands::Watch { ref trace_id } if trace_id.len() == 32));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(Cli::try_parse_from(["prism", "--unit", "weeks", "status"]).is_err());
    }

    #[test]
    fn run_flags() {
        let cli = Cli::try_parse_from(["prism", "run", "--no-archive", "--http-addr", "0.0.0.0:7000"])
            .unwrap();
        let Commands::Run {
            no_archive,
            http_addr,
            db_path,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert!(no_archive);
        assert_eq!(http_addr.as_deref(), Some("0.0.0.0:7000"));
        assert!(db_path.is_none());
    }
}
