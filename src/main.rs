use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ringsdb_translator::config::{init_default_config, Settings};
use ringsdb_translator::dictionary::{CompiledDictionary, TermDictionary};
use ringsdb_translator::dom::{parse_xhtml, write_xhtml};
use ringsdb_translator::expansions::{CardInput, Expansion, ExpansionStore};
use ringsdb_translator::intercept::{HostHttp, HttpRequest, HttpResponse, TranslatingInterceptor};
use ringsdb_translator::lookup::{CardNameIndex, DEFAULT_SUGGESTIONS};
use ringsdb_translator::owned::CustomOwnedCards;
use ringsdb_translator::progress::ConsoleProgress;
use ringsdb_translator::session::{stored_mode, store_mode, Command, Session, SessionState};
use ringsdb_translator::store::JsonFileStore;
use ringsdb_translator::substitute::Mode;

#[derive(Parser, Debug)]
#[command(name = "ringsdb-translator")]
#[command(about = "Card-name substitution for RingsDB pages and responses", long_about = None)]
struct Args {
    /// Config file path (default: search for ringsdb-translator.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// No progress lines on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Write a default config and the bundled dictionary, then exit
    InitConfig {
        /// Target directory (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Substitute a piece of text (stdin when TEXT is omitted)
    TranslateText {
        text: Option<String>,
        /// zh_only | bilingual | restore (default: stored mode)
        #[arg(long)]
        mode: Option<Mode>,
    },
    /// Sweep an XHTML page and write the result
    TranslateHtml {
        #[arg(value_name = "HTML")]
        input: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "HTML")]
        output: Option<PathBuf>,
        /// Switch to this mode before sweeping (persisted like a popup command)
        #[arg(long)]
        mode: Option<Mode>,
    },
    /// Run a response body through the interception layer
    Intercept {
        #[arg(value_name = "BODY")]
        body: PathBuf,
        #[arg(long, default_value = "text/html; charset=utf-8")]
        content_type: String,
        #[arg(long, default_value_t = 200)]
        status: u16,
        #[arg(long)]
        mode: Option<Mode>,
        /// Use the XMLHttpRequest-style path instead of fetch
        #[arg(long)]
        xhr: bool,
    },
    /// Read or change the stored translation mode
    Mode {
        #[command(subcommand)]
        action: ModeCmd,
    },
    /// Manage user-defined expansions
    Expansions {
        #[command(subcommand)]
        action: ExpansionCmd,
    },
    /// Manage custom owned cards
    Owned {
        #[command(subcommand)]
        action: OwnedCmd,
    },
    /// Look up a single card name in either direction
    Lookup {
        query: String,
        /// List names containing QUERY instead of resolving it
        #[arg(long)]
        suggest: bool,
        /// Maximum number of suggestions
        #[arg(long, default_value_t = DEFAULT_SUGGESTIONS)]
        limit: usize,
    },
    /// Translate a decklist line by line (stdin when FILE is omitted)
    Batch {
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ModeCmd {
    Get,
    Set { mode: Command },
}

#[derive(Subcommand, Debug)]
enum ExpansionCmd {
    List,
    Show { id: String },
    /// Create from a JSON object of card code -> {name?, count?}
    Create {
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, value_name = "JSON")]
        cards: Option<PathBuf>,
    },
    Rename { id: String, name: String },
    Delete { id: String },
    /// Merge expansions from a JSON export
    Import {
        #[arg(value_name = "JSON")]
        file: PathBuf,
    },
    Export {
        #[arg(short, long, value_name = "JSON")]
        output: Option<PathBuf>,
    },
    Clear,
    Enable { id: String },
    Disable { id: String },
    /// Replace the owned-card list with the cards of all enabled expansions
    Apply,
}

#[derive(Subcommand, Debug)]
enum OwnedCmd {
    List,
    Add {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    Remove { code: String },
    Clear,
    /// Rewrite a card-list query (JSON) to include owned cards
    Query { query: String },
}

fn init_logger(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_millis(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .context("init logger")
}

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("read input: {}", p.display())),
        None => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s).context("read stdin")?;
            Ok(s)
        }
    }
}

fn write_output(path: Option<&Path>, data: &[u8]) -> anyhow::Result<()> {
    match path {
        Some(p) => std::fs::write(p, data).with_context(|| format!("write output: {}", p.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data).context("write stdout")?;
            stdout.flush().context("flush stdout")
        }
    }
}

fn current_mode(settings: &Settings, store: &JsonFileStore) -> Mode {
    match stored_mode(store) {
        Ok(Some(m)) => m,
        Ok(None) => settings.session.default_mode,
        Err(err) => {
            log::warn!("using default mode: {err:#}");
            settings.session.default_mode
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose)?;
    let progress = ConsoleProgress::new(!args.quiet);

    if let Cmd::InitConfig { dir, force } = &args.command {
        let dir = dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, *force).context("init default config")?;
        progress.info(format!("Wrote config: {}", cfg_path.display()));
        return Ok(());
    }

    let settings = Settings::discover(args.config.clone()).context("load config")?;
    let mut store = JsonFileStore::new(settings.store_path.clone());

    match args.command {
        // Handled before config discovery.
        Cmd::InitConfig { .. } => {}
        Cmd::TranslateText { text, mode } => {
            let mode = mode.unwrap_or_else(|| current_mode(&settings, &store));
            let text = match text {
                Some(t) => t,
                None => read_input(None)?,
            };
            let dict = CompiledDictionary::load_or_empty(&settings.dictionary_path);
            let out = dict.substitute(&text, mode);
            write_output(None, out.as_bytes())?;
        }
        Cmd::TranslateHtml { input, output, mode } => {
            let markup = read_input(Some(&input))?;
            let mut doc = parse_xhtml(&markup).with_context(|| format!("parse page: {}", input.display()))?;
            let dict = CompiledDictionary::load_or_empty(&settings.dictionary_path);
            let mut session = Session::start(store, dict, settings.session.clone());
            let stats = match mode {
                Some(m) => session.apply(&mut doc, Command::from(m)),
                None => session.attach(&mut doc),
            };
            progress.sweep_done(&format!("{} ({})", input.display(), session.mode()), stats);
            session.teardown(&mut doc);
            let html = write_xhtml(&doc).context("serialize page")?;
            write_output(output.as_deref(), html.as_bytes())?;
        }
        Cmd::Intercept {
            body,
            content_type,
            status,
            mode,
            xhr,
        } => {
            let mode = mode.unwrap_or_else(|| current_mode(&settings, &store));
            let bytes = std::fs::read(&body).with_context(|| format!("read body: {}", body.display()))?;
            let url = body.display().to_string();
            let mut http = HostHttp::new(move |_: &HttpRequest| -> anyhow::Result<HttpResponse> {
                let mut resp = HttpResponse::new(status, &content_type, bytes.clone());
                if status != 200 {
                    resp.status_text = "Error".to_string();
                }
                Ok(resp)
            });
            let state = Rc::new(SessionState::new(mode));
            state.set_dictionary(CompiledDictionary::load_or_empty(&settings.dictionary_path));
            let _ = http.register_interceptor(Rc::new(TranslatingInterceptor::new(
                state,
                settings.session.content_types.clone(),
            )));

            let out = if xhr {
                let mut req = http.xhr();
                req.open("GET", &url);
                req.send(None)?;
                if let Some(err) = req.error() {
                    return Err(anyhow::anyhow!("request failed: {err:#}"));
                }
                req.response().map(|r| r.body.clone()).unwrap_or_default()
            } else {
                http.fetch(HttpRequest::get(url))?.body
            };
            write_output(None, &out)?;
        }
        Cmd::Mode { action } => match action {
            ModeCmd::Get => println!("{}", current_mode(&settings, &store)),
            ModeCmd::Set { mode } => {
                store_mode(&mut store, mode.mode())?;
                progress.info(format!("Translation mode set to {mode}"));
            }
        },
        Cmd::Expansions { action } => run_expansions(action, &mut store, &progress)?,
        Cmd::Owned { action } => run_owned(action, &mut store, &progress)?,
        Cmd::Lookup { query, suggest, limit } => {
            let terms = TermDictionary::load(&settings.dictionary_path)?;
            let index = CardNameIndex::from_dictionary(&terms);
            if suggest {
                for name in index.suggest(&query, limit) {
                    println!("{name}");
                }
            } else {
                match index.lookup(&query) {
                    Some(found) => println!("{found}"),
                    None => anyhow::bail!("not found: {}", query.trim()),
                }
            }
        }
        Cmd::Batch { input } => {
            let text = read_input(input.as_deref())?;
            let terms = TermDictionary::load(&settings.dictionary_path)?;
            let out = CardNameIndex::from_dictionary(&terms).batch_translate(&text);
            println!("{}", out.text);
            if !out.changed {
                progress.info("No line contained a known card name");
            }
        }
    }
    Ok(())
}

fn run_expansions(action: ExpansionCmd, store: &mut JsonFileStore, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let mut expansions = ExpansionStore::new(&mut *store);
    match action {
        ExpansionCmd::List => {
            let enabled = expansions.enabled()?;
            let mut list: Vec<Expansion> = expansions.list()?.into_values().collect();
            // Newest first.
            list.sort_by(|a, b| b.created.cmp(&a.created));
            for exp in list {
                let mark = if enabled.contains(&exp.id) { "*" } else { " " };
                println!("{mark} {}  {}  ({} cards)", exp.id, exp.name, exp.cards.len());
            }
        }
        ExpansionCmd::Show { id } => {
            let exp = expansions.get(&id)?;
            let mut cards: Vec<_> = exp.cards.values().collect();
            cards.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{} ({})", exp.name, exp.id);
            for card in cards {
                println!("  {}  {} x{}", card.code, card.name, card.count);
            }
        }
        ExpansionCmd::Create { name, cards } => {
            let cards: BTreeMap<String, CardInput> = match cards {
                Some(p) => serde_json::from_str(&read_input(Some(&p))?)
                    .with_context(|| format!("parse cards: {}", p.display()))?,
                None => BTreeMap::new(),
            };
            let created = expansions.create_with_cards(&name, cards)?;
            println!("{}", created.id);
            progress.info(format!("Created expansion with {} cards (enabled)", created.card_count));
        }
        ExpansionCmd::Rename { id, name } => expansions.rename(&id, &name)?,
        ExpansionCmd::Delete { id } => {
            let removed = expansions.delete(&id)?;
            progress.info(format!("Deleted {} ({})", removed.name, removed.id));
        }
        ExpansionCmd::Import { file } => {
            let incoming: BTreeMap<String, Expansion> = serde_json::from_str(&read_input(Some(&file))?)
                .with_context(|| format!("parse expansions: {}", file.display()))?;
            let merged = expansions.import(incoming)?;
            progress.info(format!("{} expansions stored", merged.len()));
        }
        ExpansionCmd::Export { output } => match expansions.export_json()? {
            Some(json) => write_output(output.as_deref(), json.as_bytes())?,
            None => progress.info("No expansions to export"),
        },
        ExpansionCmd::Clear => {
            expansions.clear_all()?;
            progress.info("Expansion data cleared");
        }
        ExpansionCmd::Enable { id } => {
            expansions.get(&id)?;
            expansions.set_enabled(&id, true)?;
        }
        ExpansionCmd::Disable { id } => {
            expansions.set_enabled(&id, false)?;
        }
        ExpansionCmd::Apply => {
            let codes = expansions.enabled_card_codes()?;
            drop(expansions);
            let mut owned = CustomOwnedCards::load(&mut *store);
            let n = owned.apply(&codes)?;
            progress.info(format!("{n} owned cards from enabled expansions"));
        }
    }
    Ok(())
}

fn run_owned(action: OwnedCmd, store: &mut JsonFileStore, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let mut owned = CustomOwnedCards::load(store);
    match action {
        OwnedCmd::List => {
            for code in owned.list() {
                println!("{code}");
            }
        }
        OwnedCmd::Add { codes } => {
            let n = owned.add_many(&codes)?;
            progress.info(format!("{n} new owned cards"));
        }
        OwnedCmd::Remove { code } => {
            if !owned.remove(&code)? {
                progress.info(format!("{code} was not in the list"));
            }
        }
        OwnedCmd::Clear => {
            let n = owned.clear()?;
            progress.info(format!("Cleared {n} owned cards"));
        }
        OwnedCmd::Query { query } => {
            let base: serde_json::Value = serde_json::from_str(&query).context("parse query json")?;
            let rewritten = owned.rewrite_query(&base);
            println!("{}", serde_json::to_string(&rewritten)?);
        }
    }
    Ok(())
}
