use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tarm::armclient::{ArmClient, ArmCredentials};
use tarm::config::Config;
use tarm::expanders::{
    register_expanders, Dispatcher, Expansion, TreeNode, RESOURCE_GROUP_TYPE, RESOURCE_TYPE, SUBSCRIPTION_TYPE,
    TENANT_TYPE,
};
use tarm::notification::StatusBus;
use tarm::swagger::{merge_paths, render_paths, PathTreeConfig, SwaggerDocument};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Browse Azure resources as a tree
#[derive(Parser, Debug)]
#[command(name = "tarm", version, about, long_about = None)]
struct Args {
    /// Azure AD tenant to request tokens for
    #[arg(long, global = true)]
    tenant: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Deadline for one expansion, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand a URL and print its content and children
    Expand {
        /// ARM path, e.g. /subscriptions/{id}/resourceGroups/{rg}
        url: Option<String>,
        /// Node type (tenant, subscription, resourcegroup, resource, ...)
        #[arg(long)]
        item_type: Option<String>,
    },
    /// List the actions available on a resource
    Actions { url: String },
    /// Delete the item at a URL
    Delete {
        url: String,
        #[arg(long)]
        item_type: Option<String>,
    },
    /// Replace a resource with the content of a file (PUT)
    Update {
        url: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the merged path tree of a swagger document
    Paths { swagger: PathBuf },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(tracing_level.to_string())),
        )
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("tarm started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = Config::config_dir() {
        return config_dir.join("tarm.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".tarm").join("tarm.log");
    }
    PathBuf::from("tarm.log")
}

/// Node for a URL given on the command line
fn node_for_url(url: &str, item_type: Option<&str>) -> TreeNode {
    let path = url.split('?').next().unwrap_or_default().trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let item_type = item_type.unwrap_or(match segments.as_slice() {
        [] => TENANT_TYPE,
        ["subscriptions", _] => SUBSCRIPTION_TYPE,
        ["subscriptions", _, "resourceGroups", _] => RESOURCE_GROUP_TYPE,
        _ => RESOURCE_TYPE,
    });
    let name = segments.last().copied().unwrap_or("Subscriptions");

    let mut node = TreeNode::new(if path.is_empty() { "/" } else { path }, name, item_type);
    if item_type != TENANT_TYPE {
        node.expand_url = url.to_string();
    }
    if let Some(index) = segments.iter().position(|s| s.eq_ignore_ascii_case("subscriptions")) {
        node.subscription_id = segments.get(index + 1).copied().unwrap_or_default().to_string();
    }
    // providers/{namespace}/{type}/{name}
    if let Some(index) = segments.iter().rposition(|s| s.eq_ignore_ascii_case("providers")) {
        if let (Some(namespace), Some(arm_type)) = (segments.get(index + 1), segments.get(index + 2)) {
            node.namespace = namespace.to_string();
            node.arm_type = format!("{}/{}", namespace, arm_type);
        }
    }
    node
}

fn print_expansion(expansion: &Expansion) {
    if let Some(content) = &expansion.content {
        println!("{}", content.pretty());
        println!();
    }
    for child in &expansion.nodes {
        let title = child.title().replace('\n', " ");
        if child.is_expand_supported() {
            println!("{}\t{}", title, child.expand_url);
        } else {
            println!("{}\t{}", title, child.id);
        }
    }
    for failure in &expansion.failures {
        eprintln!("{}: {:#}", failure.expander, failure.error);
    }
}

async fn run(args: Args, mut config: Config) -> Result<()> {
    if let Command::Paths { swagger } = &args.command {
        let text = std::fs::read_to_string(swagger).with_context(|| format!("Failed to read {:?}", swagger))?;
        let document = SwaggerDocument::from_json(&text)?;
        let paths = merge_paths(Vec::new(), &document.paths, document.version.as_deref(), &PathTreeConfig::default())?;
        print!("{}", render_paths(&paths));
        return Ok(());
    }

    let tenant = config.effective_tenant(args.tenant.as_deref());
    let client = ArmClient::new(&config.arm_endpoint, ArmCredentials::from_cli(tenant))?;
    let dispatcher: Dispatcher =
        register_expanders(client, StatusBus::new())?.with_timeout(config.effective_timeout(args.timeout));

    match args.command {
        Command::Expand { url, item_type } => {
            let url = url.unwrap_or_default();
            let mut node = node_for_url(&url, item_type.as_deref());
            let expansion = dispatcher.expand_item(&mut node).await?;
            print_expansion(&expansion);
            if !url.is_empty() {
                if let Err(e) = config.set_last_url(&url) {
                    tracing::warn!("Failed to save config: {:#}", e);
                }
            }
        }
        Command::Actions { url } => {
            let node = node_for_url(&url, Some(RESOURCE_TYPE));
            let expansion = dispatcher.get_actions(&node).await?;
            print_expansion(&expansion);
        }
        Command::Delete { url, item_type } => {
            let mut node = node_for_url(&url, item_type.as_deref()).with_delete_url(url.clone());
            node.expander = dispatcher.default_expander().cloned();
            dispatcher.delete_item(&node).await?;
            println!("Deleted {}", url);
        }
        Command::Update { url, file } => {
            let content = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let mut node = node_for_url(&url, Some(RESOURCE_TYPE));
            dispatcher.resolve(&mut node);
            node.expander = dispatcher
                .expanders()
                .iter()
                .find(|e| e.can_update(&node))
                .cloned();
            dispatcher.update_item(&node, &content).await?;
            println!("Updated {}", url);
        }
        Command::Paths { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level)?;

    let config = Config::load();
    if let Err(err) = run(args, config).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}
