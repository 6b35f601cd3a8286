use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use dbfcomment::{
    config::{CodePage, ConfigStore, Settings, DEFAULT_CONFIG_FILE},
    extract::{display_value, extract_values},
    history::TranslationHistory,
    scan::Scanner,
    translate::{HttpTranslator, Translate},
    writeback::{translate_table, FieldPrecedence, RerunPolicy, WritebackOptions},
};
use std::{fs, path::PathBuf};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Find dBASE tables carrying COMMENT/_COMMENT fields and translate them.
#[derive(Parser, Debug)]
#[command(name = "dbfcomment", version)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct TableArgs {
    /// Root directory to walk (default: `directories.db_root_dir`)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Code page or its display name (default: `default_encoding`)
    #[arg(long)]
    encoding: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tables that carry COMMENT or _COMMENT
    Scan {
        #[command(flatten)]
        table: TableArgs,

        /// Print the full summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the reported fields of every record of every matching table
    Extract {
        #[command(flatten)]
        table: TableArgs,
    },
    /// Translate comment fields and write them back into the tables
    Translate {
        #[command(flatten)]
        table: TableArgs,

        /// Target language (default: `translator_settings.target_language`)
        #[arg(long)]
        target: Option<String>,

        #[arg(long, value_enum, default_value_t)]
        precedence: FieldPrecedence,

        #[arg(long, value_enum, default_value_t)]
        rerun: RerunPolicy,

        /// Translate and report without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Translation history file (default: next to the settings file)
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// List the configured code pages
    CodePages,
    /// Set the default code page (code or display name)
    SetEncoding { value: String },
    /// Set the translation target language
    SetLanguage { language: String },
    /// Set the default database directory
    SetRoot { dir: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // ─── 2) load settings ────────────────────────────────────────────
    let mut store = ConfigStore::load_or_default(&cli.config)?;

    // ─── 3) dispatch ─────────────────────────────────────────────────
    match cli.command {
        Command::Scan { table, json } => run_scan(store.settings(), &table, json),
        Command::Extract { table } => run_extract(store.settings(), &table),
        Command::Translate {
            table,
            target,
            precedence,
            rerun,
            dry_run,
            history,
        } => {
            let options = WritebackOptions {
                precedence,
                rerun,
                dry_run,
            };
            let history_path = history.unwrap_or_else(|| store.history_path());
            run_translate(store.settings(), &table, target, options, history_path).await
        }
        Command::Config { action } => run_config(&mut store, action),
    }
}

fn code_page(settings: &Settings, table: &TableArgs) -> Result<CodePage> {
    match &table.encoding {
        Some(input) => settings.code_page(input),
        None => settings.default_code_page(),
    }
}

fn scanner(settings: &Settings, table: &TableArgs) -> Result<(Scanner, CodePage)> {
    let root = table
        .root
        .clone()
        .or_else(|| settings.directories.db_root_dir.clone())
        .ok_or_else(|| {
            anyhow!("database directory is not selected; pass --root or run `config set-root`")
        })?;
    let root = fs::canonicalize(&root)
        .with_context(|| format!("resolving database directory {}", root.display()))?;
    let page = code_page(settings, table)?;

    let scanner = Scanner::new(root, page.encoding).with_allow_list(settings.scan.allow_list.clone());
    Ok((scanner, page))
}

fn run_scan(settings: &Settings, table: &TableArgs, json: bool) -> Result<()> {
    let (scanner, page) = scanner(settings, table)?;
    info!(root = %scanner.root().display(), code_page = page.label(), "starting database scan");
    let summary = scanner.summarize()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for m in &summary.matches {
        let fields: Vec<String> = m
            .fields
            .iter()
            .map(|f| format!("{}:{:?}", f.name, f.field_type))
            .collect();
        println!(
            "Table {} contains COMMENT or _COMMENT field. [{}] in {}",
            m.table_name,
            fields.join(", "),
            m.directory.display()
        );
    }
    for skipped in &summary.skipped_files {
        println!("skipped {} ({})", skipped.path.display(), skipped.message);
    }
    println!("found {} files", summary.matched);
    Ok(())
}

fn run_extract(settings: &Settings, table: &TableArgs) -> Result<()> {
    let (scanner, page) = scanner(settings, table)?;

    let mut tables = 0;
    for m in scanner.matches()? {
        tables += 1;
        let rows = match extract_values(&m, page.encoding) {
            Ok(rows) => rows,
            Err(err) => {
                error!(table = %m.table_name, error = %err, "extraction failed");
                continue;
            }
        };

        let header: Vec<String> = m
            .fields
            .iter()
            .map(|f| format!("{}:{:?}", f.name, f.field_type))
            .collect();
        println!("== {} [{}]", m.path.display(), header.join(", "));
        for row in rows {
            let cells: Vec<String> = row.values.iter().map(|(_, v)| display_value(v)).collect();
            println!("{:>6}  {}", row.index, cells.join(" | "));
        }
    }
    println!("found {} files", tables);
    Ok(())
}

async fn run_translate(
    settings: &Settings,
    table: &TableArgs,
    target: Option<String>,
    options: WritebackOptions,
    history_path: PathBuf,
) -> Result<()> {
    let (scanner, page) = scanner(settings, table)?;

    let mut translator_settings = settings.translator_settings.clone();
    if let Some(target) = target {
        translator_settings.target_language = target;
    }
    let translator = HttpTranslator::from_settings(&translator_settings)?;
    let mut history = TranslationHistory::open(&history_path)?;
    info!(
        root = %scanner.root().display(),
        target = translator.target_language(),
        precedence = ?options.precedence,
        rerun = ?options.rerun,
        dry_run = options.dry_run,
        "starting database processing"
    );

    let (mut done, mut failed) = (0usize, 0usize);
    for m in scanner.matches()? {
        match translate_table(&m, &translator, &mut history, page.encoding, &options).await {
            Ok(s) => {
                done += 1;
                println!(
                    "{}: {} records, {} translated, {} unchanged, {} already translated, {} empty, {} truncated, {} failed",
                    s.table,
                    s.records,
                    s.translated,
                    s.unchanged,
                    s.skipped_translated,
                    s.skipped_empty,
                    s.truncated,
                    s.failed
                );
            }
            Err(err) => {
                failed += 1;
                error!(table = %m.table_name, error = ?err, "table processing failed");
            }
        }
    }

    println!("processed {} tables, {} failed", done, failed);
    info!("finished processing all databases in {}", scanner.root().display());
    Ok(())
}

fn run_config(store: &mut ConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(store.settings())?);
        }
        ConfigAction::CodePages => {
            let settings = store.settings();
            for (code, name) in &settings.code_pages {
                let marker = if *code == settings.default_encoding { "*" } else { " " };
                println!("{} {:<8} {}", marker, code, name);
            }
        }
        ConfigAction::SetEncoding { value } => {
            let page = store.set_default_encoding(&value)?;
            println!("Encoding changed to {} --> {}", page.code, page.label());
        }
        ConfigAction::SetLanguage { language } => {
            store.set_target_language(&language)?;
            println!("Target language changed to {}", language.trim());
        }
        ConfigAction::SetRoot { dir } => {
            let dir = fs::canonicalize(&dir)
                .with_context(|| format!("resolving {}", dir.display()))?;
            if !dir.is_dir() {
                return Err(anyhow!("{} is not a directory", dir.display()));
            }
            println!("Selected database directory: {}", dir.display());
            store.set_db_root_dir(dir)?;
        }
    }
    Ok(())
}
