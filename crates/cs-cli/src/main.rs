//! # cs — callscope command line
//!
//! Thin client for a running `cs-hub`.
//!
//! - `cs hub` — Launch the hub.
//! - `cs search --to-user bob` — Search captured packets.
//! - `cs call <call-id>` — Every packet of a call across its legs.
//! - `cs dump <call-id> --ip <addr>` — Text dump of a call.

use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand};
use cs_core::PacketRecord;
use serde::Serialize;
use tabled::{Table, Tabled};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// callscope: search, correlate and tail captured SIP traffic.
#[derive(Parser)]
#[command(name = "cs", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the hub server.
    Hub {
        /// Server bind address.
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,

        /// JSON-lines file of packets to preload.
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Directory of static UI assets.
        #[arg(long)]
        assets: Option<PathBuf>,
    },

    /// Search captured packets (one row per call by default).
    Search {
        /// Inclusive lower bound, RFC 3339.
        #[arg(long)]
        start: Option<String>,
        /// Inclusive upper bound, RFC 3339.
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        to_user: Option<String>,
        #[arg(long)]
        from_user: Option<String>,
        #[arg(long)]
        source_ip: Option<String>,
        #[arg(long)]
        dest_ip: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Sort field, `-` prefix for descending (repeatable).
        #[arg(long, allow_hyphen_values = true)]
        order_by: Vec<String>,
        /// Print a table instead of JSON.
        #[arg(long)]
        table: bool,
    },

    /// Show every packet of a call, following linked legs.
    Call {
        id: String,
        #[arg(long)]
        table: bool,
    },

    /// Download the text dump of a call.
    Dump {
        id: String,
        /// Only packets sent from or to this address.
        #[arg(long)]
        ip: Option<String>,
        /// Write to a file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Manage settings groups.
    Settings {
        #[command(subcommand)]
        action: SettingsCmd,
    },

    /// Push packets from a JSON-lines file into the hub.
    Capture { file: PathBuf },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Get { group: String },
    Set { group: String, key: String, value: String },
    Delete { group: String, key: String },
}

#[derive(Serialize)]
struct SettingForm<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Tabled)]
struct PacketRow {
    time: String,
    call_id: String,
    from: String,
    to: String,
    route: String,
    first_line: String,
}

impl From<&PacketRecord> for PacketRow {
    fn from(p: &PacketRecord) -> Self {
        Self {
            time: format!(
                "{}.{:06}",
                p.date_time.format("%Y-%m-%d %H:%M:%S"),
                p.microseconds
            ),
            call_id: p.call_id.clone(),
            from: p.from_user.clone(),
            to: p.to_user.clone(),
            route: format!(
                "{}:{} -> {}:{}",
                p.source_ip, p.source_port, p.destination_ip, p.destination_port
            ),
            first_line: p.message.lines().next().unwrap_or_default().to_string(),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub { bind, seed, assets } => {
            eprintln!("callscope: launching hub on {}", bind);

            let mut args = vec![
                "run".to_string(),
                "-p".into(),
                "cs-hub".into(),
                "--".into(),
                "--bind".into(),
                bind,
            ];
            if let Some(seed) = seed {
                args.push("--seed".into());
                args.push(seed.display().to_string());
            }
            if let Some(assets) = assets {
                args.push("--assets".into());
                args.push(assets.display().to_string());
            }

            match Command::new("cargo").args(&args).status() {
                Ok(s) if s.success() => {}
                Ok(s) => {
                    eprintln!("Hub exited with: {}", s);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Failed to launch hub: {}", e);
                    std::process::exit(1);
                }
            }
        }

        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = rt.block_on(async_main(cmd)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn async_main(cmd: Commands) -> CliResult<()> {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("CS_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());

    match cmd {
        Commands::Search {
            start,
            end,
            to_user,
            from_user,
            source_ip,
            dest_ip,
            limit,
            order_by,
            table,
        } => {
            let mut query: Vec<(&str, String)> = Vec::new();
            let optional = [
                ("startdate", start),
                ("enddate", end),
                ("touser", to_user),
                ("fromuser", from_user),
                ("sourceip", source_ip),
                ("destip", dest_ip),
                ("limit", limit.map(|l| l.to_string())),
            ];
            for (key, value) in optional {
                if let Some(value) = value {
                    query.push((key, value));
                }
            }
            for order in order_by {
                query.push(("orderby", order));
            }

            let url = endpoint(&base_url, &["search"])?;
            let resp = checked(client.get(url).query(&query).send().await?).await?;
            let packets: Vec<PacketRecord> = resp.json().await?;
            print_packets(&packets, table)?;
        }

        Commands::Call { id, table } => {
            let url = endpoint(&base_url, &["call", id.as_str()])?;
            let resp = checked(client.get(url).send().await?).await?;
            let packets: Vec<PacketRecord> = resp.json().await?;
            print_packets(&packets, table)?;
        }

        Commands::Dump { id, ip, output } => {
            let url = endpoint(&base_url, &["call", id.as_str(), "dump"])?;
            let mut request = client.get(url);
            if let Some(ip) = &ip {
                request = request.query(&[("ip", ip)]);
            }
            let dump = checked(request.send().await?).await?.text().await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, dump)?;
                    eprintln!("Wrote {}", path.display());
                }
                None => print!("{}", dump),
            }
        }

        Commands::Settings { action } => match action {
            SettingsCmd::Get { group } => {
                let url = endpoint(&base_url, &["settings", group.as_str()])?;
                let resp = checked(client.get(url).send().await?).await?;
                let json: serde_json::Value = resp.json().await?;
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            SettingsCmd::Set { group, key, value } => {
                let url = endpoint(&base_url, &["settings", group.as_str()])?;
                let form = SettingForm {
                    key: &key,
                    value: &value,
                };
                let resp = checked(client.post(url).form(&form).send().await?).await?;
                println!("Setting stored: {}", resp.status());
            }
            SettingsCmd::Delete { group, key } => {
                let url = endpoint(&base_url, &["settings", group.as_str(), key.as_str()])?;
                let resp = checked(client.delete(url).send().await?).await?;
                let json: serde_json::Value = resp.json().await?;
                if json["result"].as_bool() == Some(true) {
                    println!("Setting removed");
                } else {
                    return Err(json["error"]
                        .as_str()
                        .unwrap_or("delete failed")
                        .to_string()
                        .into());
                }
            }
        },

        Commands::Capture { file } => {
            let content = std::fs::read_to_string(&file)?;
            let url = endpoint(&base_url, &["capture"])?;
            let mut sent = 0usize;
            for (idx, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let packet: PacketRecord = serde_json::from_str(line)
                    .map_err(|e| format!("{}:{}: {}", file.display(), idx + 1, e))?;
                checked(client.post(url.clone()).json(&packet).send().await?).await?;
                sent += 1;
            }
            eprintln!("Captured {} packets", sent);
        }

        Commands::Hub { .. } => {}
    }

    Ok(())
}

/// Hub URL for `segments`, each percent-encoded as a single path segment.
/// Call-IDs may contain `/`, `?` or `%`.
fn endpoint(base_url: &str, segments: &[&str]) -> CliResult<reqwest::Url> {
    let mut url = reqwest::Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| format!("invalid hub URL: {}", base_url))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turn a non-success response into an error carrying the hub's message.
async fn checked(resp: reqwest::Response) -> CliResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(ToString::to_string))
        .unwrap_or(body);
    Err(format!("{}: {}", status, message).into())
}

fn print_packets(packets: &[PacketRecord], table: bool) -> CliResult<()> {
    if table {
        let rows: Vec<PacketRow> = packets.iter().map(PacketRow::from).collect();
        println!("{}", Table::new(rows));
    } else {
        println!("{}", serde_json::to_string_pretty(packets)?);
    }
    Ok(())
}
