use anyhow::{anyhow, Context};
use cifras_core::backend::remote::filter_candidates;
use cifras_core::{
    Backends, CollectionService, IncomingFile, RemoteStore, SettingsStore, StorageMode,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: collection-harness [--config <path>] [--db <path>] [--remote] <command>
Commands:
  tabs
  add-tab <name>
  import --tab <id> <file>...
  show [--tab <id>] [--filter <text>]
  pick [--folder <id>] [--query <text>]";

#[derive(Debug, PartialEq)]
enum Command {
    Tabs,
    AddTab { name: String },
    Import { tab_id: String, files: Vec<PathBuf> },
    Show { tab_id: Option<String>, filter: Option<String> },
    Pick { folder_id: Option<String>, query: Option<String> },
}

#[derive(Debug, PartialEq)]
struct HarnessArgs {
    config_path: Option<PathBuf>,
    database_path: Option<PathBuf>,
    remote: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<HarnessArgs, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut database_path: Option<PathBuf> = None;
    let mut remote = false;
    let mut command: Option<String> = None;
    let mut tab_id: Option<String> = None;
    let mut filter: Option<String> = None;
    let mut folder_id: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().ok_or_else(|| "Missing --config value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            "--db" => {
                let value = iter.next().ok_or_else(|| "Missing --db value".to_string())?;
                database_path = Some(PathBuf::from(value));
            }
            "--remote" => remote = true,
            "--tab" => {
                let value = iter.next().ok_or_else(|| "Missing --tab value".to_string())?;
                tab_id = Some(value.to_string());
            }
            "--filter" | "--query" => {
                let value = iter
                    .next()
                    .ok_or_else(|| format!("Missing {arg} value"))?;
                filter = Some(value.to_string());
            }
            "--folder" => {
                let value = iter.next().ok_or_else(|| "Missing --folder value".to_string())?;
                folder_id = Some(value.to_string());
            }
            "--help" | "-h" => {
                return Err(String::new());
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown argument: {arg}")),
            _ if command.is_none() => command = Some(arg.to_string()),
            _ => positional.push(arg.to_string()),
        }
    }

    let command = match command.as_deref() {
        Some("tabs") => Command::Tabs,
        Some("add-tab") => Command::AddTab {
            name: positional.join(" "),
        },
        Some("import") => {
            let tab_id = tab_id.ok_or_else(|| "Missing --tab".to_string())?;
            if positional.is_empty() {
                return Err("Nothing to import".to_string());
            }
            Command::Import {
                tab_id,
                files: positional.into_iter().map(PathBuf::from).collect(),
            }
        }
        Some("show") => Command::Show { tab_id, filter },
        Some("pick") => Command::Pick {
            folder_id,
            query: filter,
        },
        Some(other) => return Err(format!("Unknown command: {other}")),
        None => return Err("Missing command".to_string()),
    };

    Ok(HarnessArgs {
        config_path,
        database_path,
        remote,
        command,
    })
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn run(args: HarnessArgs) -> anyhow::Result<()> {
    let store = match args.config_path {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_store()?,
    };
    let mut settings = store.load().context("loading settings")?;
    if let Some(path) = args.database_path {
        settings.database_path = Some(path);
    }
    settings.validate()?;

    if let Command::Pick { folder_id, query } = &args.command {
        let remote = settings
            .remote
            .as_ref()
            .ok_or_else(|| anyhow!("no remote storage configured"))?;
        let folder_id = folder_id
            .as_deref()
            .or(remote.folder_id.as_deref())
            .ok_or_else(|| anyhow!("no folder given and none configured"))?;
        let store = RemoteStore::from_settings(remote)?;
        let candidates = store.list_folder(folder_id)?;
        for candidate in filter_candidates(&candidates, query.as_deref().unwrap_or("")) {
            println!("{}\t{}", candidate.id, candidate.name);
        }
        return Ok(());
    }

    let backends = Backends::from_settings(&settings)?;
    let mut service = CollectionService::open(backends, &settings)?;
    if args.remote {
        service.switch_mode(StorageMode::Remote)?;
    }

    match args.command {
        Command::Tabs => {
            for tab in service.model().tabs() {
                let marker = if tab.id() == service.active_tab_id() { "*" } else { " " };
                println!(
                    "{marker} {}\t{}\t{} items",
                    tab.id(),
                    tab.name(),
                    service.model().items(tab.id()).len()
                );
            }
        }
        Command::AddTab { name } => {
            let tab = service.add_tab(&name)?;
            println!("{}", tab.id());
        }
        Command::Import { tab_id, files } => {
            let mut incoming = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| anyhow!("unusable file name {}", path.display()))?;
                incoming.push(IncomingFile::new(name, mime_for(path), bytes));
            }
            let outcome = service.add_items(&tab_id, incoming)?;
            println!("added {}", outcome.added.len());
            for (name, reason) in &outcome.skipped {
                println!("skipped {name} ({reason:?})");
            }
            for failure in &outcome.failures {
                eprintln!("failed {}: {}", failure.name, failure.error);
            }
        }
        Command::Show { tab_id, filter } => {
            let tab_id = tab_id.unwrap_or_else(|| service.active_tab_id().to_string());
            for item in service.items_view(&tab_id, filter.as_deref()) {
                let marker = if service.model().is_selected(&tab_id, &item.key) {
                    "x"
                } else {
                    " "
                };
                println!("[{marker}] {:>3} {}", item.order, item.label());
            }
        }
        Command::Pick { .. } => {}
    }

    service.flush()?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().collect::<Vec<_>>();
    let parsed = match parse_args(&args) {
        Ok(value) => value,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(parsed) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
