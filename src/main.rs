//! Main module of the `cfa` notes assistant.
//!
//! Parses the command line, loads the configuration, opens the user's notebook
//! and dispatches to the requested command.
//!
//! # Examples
//!
//! ```sh
//! cfa init
//! cfa --user alice notes set notes.txt
//! cfa --user alice ask "How do I block public access to an S3 bucket?"
//! cfa --user alice chat -t 0.7
//! RUST_LOG=cf_assistant=debug cfa --user alice watch
//! ```

use cf_assistant::{
    api::{LlmClient, RagAnswer, RagChat},
    chunker::Chunker,
    cloud::{CloudSync, RestoreOutcome, store_from_config},
    commands::{Cli, Commands, NotesAction},
    config::{self, RagConfig, ResponseStyle},
    embeddings::{configured_model_id, load_embedder},
    notebook::{NoteStore, Notebook, RebuildSummary, index_is_stale},
    retriever::RetrievedChunk,
    session::UserSession,
    template::{self, PromptTemplate},
    vector_store::{VectorIndex, index_files_present},
    watcher::NotesWatcher,
};
use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, Print, SetAttribute, SetForegroundColor},
};
use indicatif::ProgressBar;
use once_cell::sync::OnceCell;
use std::{
    error::Error,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => cf_assistant::default_config_path()?,
    };

    if let Commands::Init = cli.command {
        return init(&config_path);
    }

    let config = config::load_config(&config_path)?;
    debug!("Config loaded: {:?}", config);
    let templates_dir = config_home(&config_path);

    let uid = cli
        .user
        .or_else(|| config.user.clone())
        .ok_or("No user given: pass --user or set `user` in the config file")?;
    let data_dir = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => cf_assistant::data_dir()?,
    };
    let session = UserSession::new(&data_dir, &uid)?;
    debug!("Session: {:?}", session);

    match cli.command {
        // Handled before the config is loaded.
        Commands::Init => {}
        Commands::Notes { action } => match action {
            NotesAction::Show => {
                print!("{}", NoteStore::new(&session.notes_path).load()?);
                io::stdout().flush()?;
            }
            NotesAction::Set { file } => {
                let text = match file {
                    Some(path) => fs::read_to_string(&path)?,
                    None => {
                        let mut text = String::new();
                        io::stdin().read_to_string(&mut text)?;
                        text
                    }
                };
                let notebook = open_notebook(&config, session)?;
                report_rebuild(&notebook.save_notes(&text)?);
            }
            NotesAction::Append { text } => {
                let notebook = open_notebook(&config, session)?;
                report_rebuild(&notebook.append_notes(&text)?);
            }
        },
        Commands::Rebuild => {
            let notebook = open_notebook(&config, session)?;
            report_rebuild(&notebook.rebuild()?);
        }
        Commands::Status => status(&config, &session)?,
        Commands::Ask {
            question,
            temperature,
            top_k,
        } => {
            let mut config = config;
            if let Some(top_k) = top_k {
                config.retrieval.top_k = top_k;
            }
            let template = template::resolve_template(&templates_dir, config.template.as_deref())?;
            let notebook = Arc::new(open_notebook(&config, session)?);
            let llm = LlmClient::new(&config, &template)
                .with_temperature(temperature.unwrap_or(config.temperature));
            let mut chat = RagChat::new(notebook, &llm, &template, &config);

            let answer = answer_and_print(&mut chat, &question).await?;
            print_sources(&answer.sources);
        }
        Commands::Chat { temperature } => {
            let template = template::resolve_template(&templates_dir, config.template.as_deref())?;
            let notebook = Arc::new(open_notebook(&config, session)?);
            let llm = LlmClient::new(&config, &template)
                .with_temperature(temperature.unwrap_or(config.temperature));
            interactive(notebook, &llm, &template, &config).await?;
        }
        Commands::Watch { debounce_secs } => {
            let debounce =
                Duration::from_secs(debounce_secs.unwrap_or(config.index.watch_debounce_secs));
            let notebook = Arc::new(open_notebook(&config, session)?);
            let watcher = NotesWatcher::new(notebook, debounce)?;
            println!("Watching for note changes, press Ctrl-C to stop.");
            let rebuilds = watcher
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            println!("Stopped after {rebuilds} rebuild(s).");
        }
        Commands::Backup => {
            let cloud = config.cloud.as_ref().ok_or("No `cloud` section in the config file")?;
            let store = store_from_config(cloud)?;
            let report = CloudSync::new(store.as_ref(), &session).backup().await?;
            println!(
                "Backed up notes: {}, index files: {}",
                if report.notes { "yes" } else { "no notes yet" },
                if report.index_files.is_empty() {
                    "none".to_string()
                } else {
                    report.index_files.join(", ")
                }
            );
        }
        Commands::Restore => {
            let cloud = config.cloud.as_ref().ok_or("No `cloud` section in the config file")?;
            let store = store_from_config(cloud)?;
            let report = CloudSync::new(store.as_ref(), &session).restore().await;
            println!("notes.txt: {}", report.notes);
            for (file, outcome) in &report.index_files {
                println!("{file}: {outcome}");
            }
            let failed = std::iter::once(&report.notes)
                .chain(report.index_files.iter().map(|(_, o)| o))
                .any(|o| matches!(o, RestoreOutcome::Failed(_)));
            if failed {
                return Err("Restore finished with failures".into());
            }
        }
    }

    Ok(())
}

/// Directory holding `config.yaml` and `templates/`.
fn config_home(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Writes a default configuration and prompt template next to `config_path`.
///
/// An existing configuration file is left alone.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let home = config_home(config_path);
    info!("Creating config directory: {}", home.display());
    fs::create_dir_all(&home)?;
    template::write_default_template(&home)?;

    if config_path.exists() {
        println!("Keeping existing config at {}", config_path.display());
    } else {
        config::save_config(&RagConfig::default(), config_path)?;
        println!("Wrote config to {}", config_path.display());
    }

    let data_dir = cf_assistant::data_dir()?;
    fs::create_dir_all(&data_dir)?;
    println!("Notes will be stored under {}", data_dir.display());
    Ok(())
}

fn open_notebook(config: &RagConfig, session: UserSession) -> Result<Notebook, Box<dyn Error>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Loading embedding model...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let embedder = load_embedder(&config.embedding);
    spinner.finish_and_clear();

    Ok(Notebook::new(
        session,
        Chunker::from_config(&config.chunking)?,
        embedder?,
        Duration::from_secs(config.index.cache_ttl_secs),
    )
    .with_progress(true))
}

fn report_rebuild(summary: &RebuildSummary) {
    println!("Index rebuilt: {} chunk(s).", summary.chunks);
}

fn status(config: &RagConfig, session: &UserSession) -> Result<(), Box<dyn Error>> {
    let notes = NoteStore::new(&session.notes_path).load()?;
    println!("User:        {}", session.uid);
    println!(
        "Notes:       {} ({} characters)",
        session.notes_path.display(),
        notes.chars().count()
    );

    match index_files_present(&session.index_dir) {
        (false, false) => println!("Index:       not built yet"),
        _ => {
            let index = VectorIndex::load(&session.index_dir, config.embedding.dimension)?;
            let meta = index.metadata();
            println!(
                "Index:       {} ({} chunks, {}, built {})",
                session.index_dir.display(),
                index.len(),
                meta.embedding_model,
                meta.built_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if index_is_stale(&index, &notes, configured_model_id(&config.embedding)) {
                println!("             out of date, run `cfa rebuild`");
            }
        }
    }

    println!(
        "Model:       {} at {} (temperature {}, {})",
        config.model,
        config.api_base,
        config.temperature,
        ResponseStyle::from_temperature(config.temperature)
    );
    Ok(())
}

/// Runs one chat turn, printing the reply in colour as it arrives.
async fn answer_and_print(
    chat: &mut RagChat<'_>,
    input: &str,
) -> Result<RagAnswer, Box<dyn Error>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut out = io::stdout();
    let mut started = false;
    let result = chat
        .answer(input, |delta| {
            if !started {
                spinner.finish_and_clear();
                let _ = out.execute(SetForegroundColor(Color::Blue));
                let _ = out.execute(SetAttribute(Attribute::Bold));
                started = true;
            }
            let _ = write!(out, "{delta}");
            let _ = out.flush();
        })
        .await;

    spinner.finish_and_clear();
    out.execute(SetAttribute(Attribute::Reset))?;
    out.execute(SetForegroundColor(Color::Reset))?;
    println!();
    Ok(result?)
}

fn print_sources(sources: &[RetrievedChunk]) {
    if sources.is_empty() {
        println!("(no matching notes)");
        return;
    }
    println!("Sources:");
    for (i, source) in sources.iter().enumerate() {
        let preview: String = source
            .text
            .chars()
            .take(80)
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        println!("  [{}] {} (distance {:.3})", i + 1, preview.trim(), source.distance);
    }
}

/// Enters interactive chat mode until `/exit` or end of input.
async fn interactive(
    notebook: Arc<Notebook>,
    llm: &LlmClient,
    template: &PromptTemplate,
    config: &RagConfig,
) -> Result<(), Box<dyn Error>> {
    println!(
        "Chatting as {} ({} style). /new starts over, /append <text> adds a note, /exit quits.",
        notebook.session().uid,
        ResponseStyle::from_temperature(llm.temperature())
    );
    let mut chat = RagChat::new(Arc::clone(&notebook), llm, template, config);
    let stdin = io::stdin();

    loop {
        let mut out = io::stdout();
        out.execute(SetForegroundColor(Color::Green))?;
        out.execute(Print("\nYou: "))?;
        out.execute(SetForegroundColor(Color::Reset))?;
        out.flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();

        if input.is_empty() {
            continue;
        } else if input == "/exit" || input == "exit" {
            break;
        } else if input == "/new" {
            chat.reset();
            println!("Started a new chat.");
        } else if let Some(text) = input.strip_prefix("/append ") {
            match notebook.append_notes(text.trim()) {
                Ok(summary) => {
                    report_rebuild(&summary);
                    chat.reset();
                    println!("Notes changed, started a new chat.");
                }
                Err(e) => eprintln!("error: {e}"),
            }
        } else {
            match answer_and_print(&mut chat, input).await {
                Ok(answer) => print_sources(&answer.sources),
                Err(e) => eprintln!("error: {e}"),
            }
        }
    }

    Ok(())
}
