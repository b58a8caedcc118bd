use clap::{Parser, Subcommand};
use log::{error, info};
use serde_json::Value;
use sipsift::configuration::config::Config;
use sipsift::model::context::CallerContext;
use sipsift::model::correlation::{CorrelationRule, ReportType};
use sipsift::model::filter::{FieldMappingTable, SearchRequest};
use sipsift::model::summary::AliasTable;
use sipsift::service::search_service::{FieldMappings, SearchService, TransactionReport};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sipsift")]
#[command(version = "0.1.0")]
#[command(about = "Search and correlate captured VoIP signaling across capture nodes")]
struct Args {
    config_file: PathBuf,

    /// Group used to pick the isolation fragment
    #[arg(long, env = "SIPSIFT_USER_GROUP", default_value = "")]
    user_group: String,

    /// IPs whose records are hidden from this caller
    #[arg(long, value_delimiter = ',')]
    exclude_ip: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Filtered search
    Search {
        request: PathBuf,
        #[arg(long)]
        aliases: Option<PathBuf>,
        /// JSON object of category to smart-input field mappings
        #[arg(long)]
        mappings: Option<PathBuf>,
    },
    /// Records by id or uuid
    Message { request: PathBuf },
    /// Records by id or uuid, run through the external decoder
    Decode { request: PathBuf },
    /// Correlated call transaction
    Transaction {
        request: PathBuf,
        rules: PathBuf,
        #[arg(long)]
        aliases: Option<PathBuf>,
        #[arg(long, default_value = "summary")]
        report: ReportType,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// RTCP and RTP reports of a call
    Qos { request: PathBuf },
    /// Log records of a call
    Log { request: PathBuf },
    /// Decode a capture file into the import node
    Import {
        capture: PathBuf,
        /// Shift frame times so the earliest frame lands on now
        #[arg(long)]
        align: bool,
    },
    /// Configured node names
    Nodes,
}

fn read_json(path: &Path) -> Result<Value, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&contents).map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))
}

fn read_request(path: &Path) -> Result<SearchRequest, String> {
    SearchRequest::from_json(&read_json(path)?).map_err(|e| e.to_string())
}

fn read_aliases(path: Option<&Path>) -> Result<AliasTable, String> {
    match path {
        Some(path) => serde_json::from_value(read_json(path)?).map_err(|e| format!("invalid alias table: {}", e)),
        None => Ok(AliasTable::default()),
    }
}

fn read_mappings(path: Option<&Path>) -> Result<FieldMappings, String> {
    let mut mappings = FieldMappings::new();
    if let Some(path) = path {
        let value = read_json(path)?;
        let categories = value
            .as_object()
            .ok_or_else(|| format!("{} must hold an object keyed by category", path.display()))?;
        for (category, table) in categories {
            mappings.insert(category.clone(), FieldMappingTable::from_json(table));
        }
    }
    Ok(mappings)
}

fn print_json(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn write_bytes(bytes: &[u8], output: Option<&Path>) -> Result<(), String> {
    match output {
        Some(path) => std::fs::write(path, bytes).map_err(|e| format!("cannot write {}: {}", path.display(), e)),
        None => std::io::stdout().write_all(bytes).map_err(|e| e.to_string()),
    }
}

fn run(service: &SearchService, caller: &CallerContext, command: Command) -> Result<(), String> {
    match command {
        Command::Search { request, aliases, mappings } => {
            let request = read_request(&request)?;
            let aliases = read_aliases(aliases.as_deref())?;
            let mappings = read_mappings(mappings.as_deref())?;
            let reply = service
                .search_data(&request, &aliases, caller, &mappings)
                .map_err(|e| e.to_string())?;
            print_json(&reply)
        }
        Command::Message { request } => {
            let request = read_request(&request)?;
            print_json(&service.get_message_by_id(&request, caller).map_err(|e| e.to_string())?)
        }
        Command::Decode { request } => {
            let request = read_request(&request)?;
            print_json(&service.get_decoded_message_by_id(&request, caller).map_err(|e| e.to_string())?)
        }
        Command::Transaction { request, rules, aliases, report, output } => {
            let request = read_request(&request)?;
            let rules: Vec<CorrelationRule> =
                serde_json::from_value(read_json(&rules)?).map_err(|e| format!("invalid correlation rules: {}", e))?;
            let aliases = read_aliases(aliases.as_deref())?;
            match service
                .get_transaction(&request, &rules, &aliases, report, caller)
                .map_err(|e| e.to_string())?
            {
                TransactionReport::Summary(value) => print_json(&value),
                TransactionReport::Pcap(bytes) => write_bytes(&bytes, output.as_deref()),
                TransactionReport::Text(text) => write_bytes(text.as_bytes(), output.as_deref()),
            }
        }
        Command::Qos { request } => {
            let request = read_request(&request)?;
            print_json(&service.get_transaction_qos(&request, caller).map_err(|e| e.to_string())?)
        }
        Command::Log { request } => {
            let request = read_request(&request)?;
            print_json(&service.get_transaction_log(&request, caller).map_err(|e| e.to_string())?)
        }
        Command::Import { capture, align } => {
            let bytes = std::fs::read(&capture).map_err(|e| format!("cannot read {}: {}", capture.display(), e))?;
            let report = service.import_capture(bytes, align).map_err(|e| e.to_string())?;
            info!("Imported {} frame(s), {} rejected", report.good, report.bad);
            print_json(&serde_json::to_value(report).map_err(|e| e.to_string())?)
        }
        Command::Nodes => print_json(&Value::from(service.node_list())),
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let config = Config::from_file(&args.config_file).unwrap_or_else(|e| {
        error!("Unable to import configuration from file: {}", e);
        std::process::exit(1);
    });

    let service = SearchService::from_config(&config).unwrap_or_else(|e| {
        error!("Unable to open node storage: {}, exiting...", e);
        std::process::exit(1);
    });

    let caller = CallerContext::new(args.user_group).with_excluded_ips(args.exclude_ip);
    if let Err(e) = run(&service, &caller, args.command) {
        error!("[{}] {}", caller.request_id, e);
        std::process::exit(1);
    }
}
