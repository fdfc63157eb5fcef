use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use g3studio_contracts::codec::humanize_size;
use g3studio_contracts::journal::JOURNAL_FILE_NAME;
use g3studio_contracts::presets::{export_file_name, SaveOutcome};
use g3studio_contracts::request::{CredentialTransport, DirectoryPreviewHost, PreviewHost, RequestMode};
use g3studio_contracts::response::current_batch_tag;
use g3studio_contracts::store::{JsonFileStore, KeyValueStore};
use g3studio_contracts::{ClientError, ErrorKind};
use g3studio_engine::config::{self, PREVIEW_DIR_NAME, STATE_FILE_NAME};
use g3studio_engine::images::attach_images;
use g3studio_engine::{
    KeepAwake, NoopKeepAwake, ProcessKeepAwake, ReqwestSender, RunOptions, Session,
    TransportPolicy,
};

const EXIT_OK: i32 = 0;
const EXIT_INVALID: i32 = 2;
const EXIT_HTTP: i32 = 3;
const EXIT_TRANSPORT: i32 = 4;
const EXIT_OTHER: i32 = 1;

#[derive(Debug, Parser)]
#[command(
    name = "g3studio",
    version,
    about = "Compose, send and keep generateContent image requests"
)]
struct Cli {
    /// State directory (defaults to G3STUDIO_HOME, then the platform data dir).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Form(FormCommand),
    /// Switch the canonical representation. Switching to json re-syncs it from the form.
    Mode { mode: ModeArg },
    #[command(subcommand)]
    Json(JsonCommand),
    Run(RunArgs),
    /// Print the request as a copy-pasteable cURL command.
    Curl(ImageArgs),
    #[command(subcommand)]
    Preset(PresetCommand),
    /// Clear prompts, generation settings and the JSON text. Host and key are kept.
    Reset,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    Set(ConfigSetArgs),
}

#[derive(Debug, Args)]
struct ConfigSetArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    remember_key: Option<bool>,
    /// Send the key as the x-goog-api-key header instead of the `key` query parameter.
    #[arg(long)]
    header_key: Option<bool>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_version: Option<String>,
}

#[derive(Debug, Subcommand)]
enum FormCommand {
    Show,
    Set(FormSetArgs),
}

#[derive(Debug, Args)]
struct FormSetArgs {
    #[arg(long)]
    system_prompt: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    aspect_ratio: Option<String>,
    #[arg(long)]
    image_size: Option<String>,
    #[arg(long)]
    temperature: Option<String>,
    #[arg(long)]
    top_p: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Form,
    Json,
}

impl From<ModeArg> for RequestMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Form => RequestMode::Form,
            ModeArg::Json => RequestMode::Json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum JsonCommand {
    Show,
    /// Overwrite the JSON text with the form projection.
    Sync,
    /// Copy what can be recognised in the JSON text (or FILE) back into the form.
    Apply {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Format,
    /// Show what `json sync` would change.
    Diff,
    Set {
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        #[arg(long)]
        text: Option<String>,
    },
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[arg(long = "image")]
    images: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    images: ImageArgs,
    /// Directory for the returned images (defaults to the current directory).
    #[arg(long)]
    out: Option<PathBuf>,
    /// This invocation runs detached; allow the single retry on a dropped connection.
    #[arg(long)]
    background_retry: bool,
    /// Print the cURL reproduction before sending.
    #[arg(long)]
    curl: bool,
}

#[derive(Debug, Subcommand)]
enum PresetCommand {
    List,
    Save {
        name: String,
        #[arg(long)]
        overwrite: bool,
    },
    Update {
        name: String,
    },
    Delete {
        name: String,
    },
    Apply {
        name: String,
    },
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import {
        file: PathBuf,
    },
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("g3studio error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env("G3STUDIO_LOG")
        .unwrap_or_else(|_| "g3studio=info,g3studio_engine=info,g3studio_contracts=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let home = resolve_home(cli.home.as_deref(), env::var_os("G3STUDIO_HOME").map(PathBuf::from))?;
    let mut session = open_session(&home)?;
    match cli.command {
        Command::Config(command) => run_config(&mut session, command),
        Command::Form(command) => run_form(&mut session, command),
        Command::Mode { mode } => {
            session.set_mode(mode.into())?;
            println!("mode: {}", session.model().mode().as_str());
            Ok(EXIT_OK)
        }
        Command::Json(command) => run_json(&mut session, command),
        Command::Run(args) => run_request(&mut session, args),
        Command::Curl(args) => run_curl(&mut session, args),
        Command::Preset(command) => run_preset(&mut session, command),
        Command::Reset => {
            session.reset()?;
            println!("cleared form fields, JSON text and images");
            Ok(EXIT_OK)
        }
    }
}

fn resolve_home(flag: Option<&Path>, from_env: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(path);
    }
    let Some(data_dir) = dirs::data_dir() else {
        bail!("no data directory on this platform; pass --home or set G3STUDIO_HOME");
    };
    Ok(data_dir.join("g3studio"))
}

fn open_session(home: &Path) -> Result<Session> {
    fs::create_dir_all(home)
        .with_context(|| format!("failed to create state directory {}", home.display()))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(home.join(STATE_FILE_NAME)));
    let previews: Arc<dyn PreviewHost> =
        Arc::new(DirectoryPreviewHost::new(home.join(PREVIEW_DIR_NAME)));
    let mut session =
        Session::open(store, Some(previews)).with_journal(home.join(JOURNAL_FILE_NAME));
    session.fallback_api_key(config::api_key_from_env());
    Ok(session)
}

fn run_config(session: &mut Session, command: ConfigCommand) -> Result<i32> {
    match command {
        ConfigCommand::Show => {
            print_config(session);
            Ok(EXIT_OK)
        }
        ConfigCommand::Set(args) => {
            let settings = session.settings_mut();
            if let Some(host) = args.host {
                settings.connection.host = host;
            }
            if let Some(api_key) = args.api_key {
                settings.connection.api_key = api_key.trim().to_string();
            }
            if let Some(remember_key) = args.remember_key {
                settings.remember_key = remember_key;
            }
            if let Some(header_key) = args.header_key {
                settings.connection.credential_transport = if header_key {
                    CredentialTransport::Header
                } else {
                    CredentialTransport::Query
                };
            }
            if let Some(model) = args.model {
                settings.connection.model_id = model;
            }
            if let Some(api_version) = args.api_version {
                settings.connection.api_version = api_version;
            }
            let remembered = settings.remember_key;
            let has_key = settings.connection.has_credential();
            session.save_settings()?;
            if has_key && !remembered {
                eprintln!("note: the API key is not remembered; use --remember-key true or G3STUDIO_API_KEY");
            }
            print_config(session);
            Ok(EXIT_OK)
        }
    }
}

fn print_config(session: &Session) {
    let settings = session.settings();
    let connection = &settings.connection;
    println!("host:         {}", connection.effective_host());
    let key_state = if connection.has_credential() {
        "set"
    } else if session.uses_fallback_key() {
        "from environment (not saved)"
    } else {
        "not set"
    };
    println!("api key:      {key_state}");
    println!("remember key: {}", settings.remember_key);
    println!(
        "credential:   {}",
        match connection.credential_transport {
            CredentialTransport::Query => "query parameter",
            CredentialTransport::Header => "x-goog-api-key header",
        }
    );
    println!("model:        {}", connection.model_id);
    println!("api version:  {}", connection.api_version);
    println!("endpoint:     {}", connection.endpoint());
}

fn run_form(session: &mut Session, command: FormCommand) -> Result<i32> {
    if let FormCommand::Set(args) = command {
        let fields = session.model_mut().fields_mut();
        let updates = [
            (&mut fields.system_prompt, args.system_prompt),
            (&mut fields.prompt, args.prompt),
            (&mut fields.aspect_ratio, args.aspect_ratio),
            (&mut fields.image_size, args.image_size),
            (&mut fields.temperature, args.temperature),
            (&mut fields.top_p, args.top_p),
        ];
        for (field, value) in updates {
            if let Some(value) = value {
                *field = value;
            }
        }
        session.save_model()?;
    }
    println!("{}", serde_json::to_string_pretty(session.model().fields())?);
    Ok(EXIT_OK)
}

fn run_json(session: &mut Session, command: JsonCommand) -> Result<i32> {
    let outcome = match command {
        JsonCommand::Show => {
            println!("{}", session.model().raw_json());
            return Ok(EXIT_OK);
        }
        JsonCommand::Diff => {
            let drift = session.model().json_drift();
            if drift.is_empty() {
                println!("JSON text matches the form");
            }
            for line in drift {
                println!("{line}");
            }
            return Ok(EXIT_OK);
        }
        JsonCommand::Sync => {
            session.model_mut().sync_json_from_form();
            Ok(())
        }
        JsonCommand::Format => session.model_mut().format_json(),
        JsonCommand::Set { file, text } => {
            let raw = match (file, text) {
                (Some(path), _) => read_text(&path)?,
                (None, Some(text)) => text,
                (None, None) => bail!("pass --file or --text"),
            };
            session.model_mut().set_raw_json(raw);
            Ok(())
        }
        JsonCommand::Apply { file } => {
            let raw = match file {
                Some(path) => read_text(&path)?,
                None => session.model().raw_json().to_string(),
            };
            session
                .model_mut()
                .apply_json_to_form_best_effort(&raw)
                .map(|applied| {
                    let names = applied.names();
                    if names.is_empty() {
                        println!("nothing recognised; images cleared");
                    } else {
                        println!("applied: {}", names.join(", "));
                    }
                })
        }
    };
    if let Err(err) = outcome {
        return Ok(report(&err));
    }
    session.save_model()?;
    println!("{}", session.model().raw_json());
    Ok(EXIT_OK)
}

fn run_request(session: &mut Session, args: RunArgs) -> Result<i32> {
    attach_or_warn(session, &args.images.images);
    if args.curl {
        match session.curl() {
            Ok(curl) => print!("{curl}"),
            Err(err) => return Ok(report(&err)),
        }
    }

    let sender = ReqwestSender::new(config::request_timeout())?;
    let keep_awake: Arc<dyn KeepAwake> = match ProcessKeepAwake::platform() {
        Some(keep_awake) => Arc::new(keep_awake),
        None => Arc::new(NoopKeepAwake),
    };
    let mut transport = TransportPolicy::new(Box::new(sender), keep_awake);
    let options = RunOptions {
        out_dir: Some(args.out.unwrap_or_else(|| PathBuf::from("."))),
        background_retry: args.background_retry,
    };

    tracing::info!(
        model = %session.settings().connection.model_id,
        images = session.model().images().len(),
        "sending generateContent request"
    );
    let outcome = match session.run(&mut transport, &options) {
        Ok(outcome) => outcome,
        Err(err) => return Ok(report(&err)),
    };

    let text = outcome.result.joined_text();
    if !text.is_empty() {
        println!("{text}");
    }
    for image in &outcome.written {
        println!(
            "saved {} ({}, {})",
            image.path.display(),
            image.mime_type,
            humanize_size(image.size)
        );
    }
    for failure in &outcome.image_failures {
        eprintln!("image not saved: {}: {}", failure.file_name, failure.reason);
    }
    if outcome.result.texts.is_empty() && outcome.result.images.is_empty() {
        println!("response carried no text or images");
        println!("{}", outcome.result.raw_pretty());
    }
    eprintln!(
        "latency: {} · model: {}",
        outcome.result.latency_display(),
        outcome.model_id
    );
    Ok(EXIT_OK)
}

fn run_curl(session: &mut Session, args: ImageArgs) -> Result<i32> {
    attach_or_warn(session, &args.images);
    match session.curl() {
        Ok(curl) => {
            print!("{curl}");
            Ok(EXIT_OK)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn attach_or_warn(session: &mut Session, paths: &[PathBuf]) {
    for failure in attach_images(session.model_mut(), paths) {
        eprintln!("skipped image: {failure}");
    }
}

fn run_preset(session: &mut Session, command: PresetCommand) -> Result<i32> {
    match command {
        PresetCommand::List => {
            let active = session.presets().active_name();
            if session.presets().is_empty() {
                println!("no presets");
            }
            for preset in session.presets().list() {
                let marker = if active.as_deref() == Some(preset.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}  [{}]  updated {}",
                    preset.name,
                    preset.mode.as_str(),
                    preset.updated_at
                );
            }
        }
        PresetCommand::Save { name, overwrite } => match session.save_preset(&name, overwrite) {
            Ok(SaveOutcome::Created) => println!("saved preset {}", name.trim()),
            Ok(SaveOutcome::Overwritten) => println!("overwrote preset {}", name.trim()),
            Ok(SaveOutcome::NeedsConfirmation) => {
                eprintln!("preset {} exists; pass --overwrite to replace it", name.trim());
                return Ok(EXIT_INVALID);
            }
            Err(err) => return Ok(report(&err)),
        },
        PresetCommand::Update { name } => {
            if !session.update_preset(&name)? {
                eprintln!("no preset named {name}");
                return Ok(EXIT_INVALID);
            }
            println!("updated preset {name}");
        }
        PresetCommand::Delete { name } => {
            if session.delete_preset(&name)? {
                println!("deleted preset {name}");
            } else {
                println!("no preset named {name}");
            }
        }
        PresetCommand::Apply { name } => {
            if !session.apply_preset(&name)? {
                eprintln!("no preset named {name}");
                return Ok(EXIT_INVALID);
            }
            println!(
                "applied preset {name} (mode: {})",
                session.model().mode().as_str()
            );
        }
        PresetCommand::Export { out } => {
            let path = out.unwrap_or_else(|| PathBuf::from(export_file_name(&current_batch_tag())));
            let export = session.export_presets();
            fs::write(&path, export.to_pretty_json()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("exported {} presets to {}", export.presets.len(), path.display());
        }
        PresetCommand::Import { file } => {
            let text = read_text(&file)?;
            match session.import_presets(&text) {
                Ok(added) => println!("imported {added} presets"),
                Err(err) => return Ok(report(&err)),
            }
        }
    }
    Ok(EXIT_OK)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Prints a client failure and picks the exit code for its kind.
fn report(err: &ClientError) -> i32 {
    eprintln!("g3studio: {err}");
    exit_code_for_kind(err.kind())
}

fn exit_code_for_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Validation | ErrorKind::Parse | ErrorKind::ImageRead => EXIT_INVALID,
        ErrorKind::Http => EXIT_HTTP,
        ErrorKind::Transport => EXIT_TRANSPORT,
        ErrorKind::Storage => EXIT_OTHER,
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ClientError>())
        .map(|client| exit_code_for_kind(client.kind()))
        .unwrap_or(EXIT_OTHER)
}
