use std::env;
use std::fs;
use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use subtext_contracts::analysis::AnalysisResult;
use subtext_contracts::chat::{
    parse_command, PasteBuffer, SessionCommand, PASTE_TERMINATOR, SESSION_HELP_COMMANDS,
};
use subtext_contracts::error::PipelineError;
use subtext_contracts::events::PipelineEvents;
use subtext_contracts::session::{ImageRef, RawInput};
use subtext_contracts::store::{AuthStatus, Credentials, FileStore, SecureStore};
use subtext_engine::{
    AnalysisPipeline, ApiClient, AuthSession, ClientConfig, PipelineOutcome, SharedSession,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "subtext", version, about = "SubText conversation analysis client")]
struct Cli {
    /// Backend base URL; overrides SUBTEXT_API_BASE.
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Credential store file; overrides SUBTEXT_STORE.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Append pipeline stage events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Signup(SignupArgs),
    Login(LoginArgs),
    Logout,
    Status,
    Plans,
    Subscribe(SubscribeArgs),
    Analyze(AnalyzeArgs),
    Onboarding {
        #[command(subcommand)]
        action: OnboardingAction,
    },
    /// Remove every locally stored key.
    Clear,
    /// Interactive session: /image, /text, /paste, /reset, /show.
    Session,
}

#[derive(Debug, Parser)]
struct SignupArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    full_name: String,
}

#[derive(Debug, Parser)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Debug, Parser)]
struct SubscribeArgs {
    /// Subscription id issued by the payment provider.
    #[arg(long)]
    subscription_id: String,
    #[arg(long)]
    tier: String,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long, conflicts_with_all = ["text", "text_file"])]
    image: Option<PathBuf>,
    /// MIME type for --image when sniffing is not wanted.
    #[arg(long, requires = "image")]
    mime: Option<String>,
    #[arg(long, conflicts_with = "text_file")]
    text: Option<String>,
    #[arg(long)]
    text_file: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum OnboardingAction {
    Complete,
    Reset,
    Status,
}

type CliPipeline = AnalysisPipeline<ApiClient, FileStore>;

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("subtext error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = env::var("SUBTEXT_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(cli.api_base.as_deref(), cli.store.clone());
    debug!(api_base = %config.api_base, store = %config.store_path.display(), "config resolved");
    let credentials = Credentials::new(FileStore::new(&config.store_path));

    match cli.command {
        Command::Signup(args) => {
            let client = ApiClient::new(config)?;
            let session =
                client.signup(&credentials, &args.email, &args.password, &args.full_name)?;
            println!("Signed up as {}", display_user(&session, &args.email));
            Ok(0)
        }
        Command::Login(args) => {
            let client = ApiClient::new(config)?;
            let session = client.login(&credentials, &args.email, &args.password)?;
            println!("Logged in as {}", display_user(&session, &args.email));
            if session.access_token.is_some() {
                let subscribed = client.subscription_status(&credentials);
                println!("Subscription: {}", if subscribed { "active" } else { "none" });
            }
            Ok(0)
        }
        Command::Logout => {
            ApiClient::new(config)?.logout(&credentials)?;
            println!("Logged out.");
            Ok(0)
        }
        Command::Status => {
            let client = ApiClient::new(config)?;
            print_status(&client, &credentials)?;
            Ok(0)
        }
        Command::Plans => {
            let plans = ApiClient::new(config)?.subscription_plans()?;
            if plans.is_empty() {
                println!("No plans available.");
            }
            for plan in plans {
                println!(
                    "{}  {}  {}  {} analyses/month",
                    plan.id,
                    plan.name,
                    plan.price_label(),
                    plan.limit_label()
                );
                for feature in &plan.features {
                    println!("    - {feature}");
                }
            }
            Ok(0)
        }
        Command::Subscribe(args) => {
            ApiClient::new(config)?.activate_subscription(
                &credentials,
                &args.subscription_id,
                &args.tier,
            )?;
            println!("Subscription activated ({}).", args.tier);
            Ok(0)
        }
        Command::Analyze(args) => {
            let input = resolve_input(&args)?;
            let pipeline = build_pipeline(config, credentials, cli.events.as_deref())?;
            run_analyze(&pipeline, input, args.json)
        }
        Command::Onboarding { action } => {
            match action {
                OnboardingAction::Complete => credentials.mark_onboarding_complete()?,
                OnboardingAction::Reset => credentials.reset_onboarding()?,
                OnboardingAction::Status => {}
            }
            println!(
                "Onboarding: {}",
                if credentials.has_seen_onboarding() { "seen" } else { "not seen" }
            );
            Ok(0)
        }
        Command::Clear => {
            credentials.clear_all()?;
            println!("Local data cleared ({}).", credentials.store().path().display());
            Ok(0)
        }
        Command::Session => {
            let pipeline = build_pipeline(config, credentials, cli.events.as_deref())?;
            run_session(Arc::new(pipeline))?;
            Ok(0)
        }
    }
}

fn resolve_config(api_base: Option<&str>, store: Option<PathBuf>) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(base) = api_base {
        config = config.with_api_base(base);
    }
    if let Some(path) = store {
        config = config.with_store_path(path);
    }
    config
}

fn build_pipeline(
    config: ClientConfig,
    credentials: Credentials<FileStore>,
    events_path: Option<&Path>,
) -> Result<CliPipeline> {
    let client = ApiClient::new(config)?;
    let mut pipeline = AnalysisPipeline::new(client, credentials);
    if let Some(path) = events_path {
        pipeline = pipeline.with_events(PipelineEvents::with_new_session(path));
    }
    Ok(pipeline)
}

fn resolve_input(args: &AnalyzeArgs) -> Result<RawInput> {
    if let Some(path) = &args.image {
        if !path.is_file() {
            bail!("image not found: {}", path.display());
        }
        let mut image = ImageRef::from_path(path);
        if let Some(mime) = args.mime.as_deref() {
            image = image.with_mime_type(mime);
        }
        return Ok(RawInput::image(image));
    }
    let text = match (&args.text, &args.text_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed reading conversation text from stdin")?;
            buffer
        }
    };
    Ok(RawInput::manual_text(text)?)
}

fn run_analyze(pipeline: &CliPipeline, input: RawInput, as_json: bool) -> Result<i32> {
    match pipeline.run(input) {
        Ok(PipelineOutcome::Completed(result)) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&analysis_json(&result))?);
            } else {
                println!("{}", format_analysis(&result));
            }
            Ok(0)
        }
        Ok(PipelineOutcome::Superseded) => {
            eprintln!("Analysis result was discarded.");
            Ok(1)
        }
        Err(err) => Err(pipeline_error(err)),
    }
}

fn pipeline_error(err: PipelineError) -> anyhow::Error {
    let message = err.user_message();
    let hint = match &err {
        PipelineError::AuthRequired(_) => " Run `subtext login`.",
        PipelineError::SubscriptionRequired => " Run `subtext plans` to pick one.",
        _ => "",
    };
    anyhow::Error::new(err).context(format!("{}: {}{hint}", message.title, message.body))
}

/// Reads session commands, folding a `/paste` block into one text command.
struct SessionReader<R> {
    input: R,
    line: String,
}

impl<R: BufRead> SessionReader<R> {
    fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }

    fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line.clear();
        loop {
            match self.input.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(self.line.trim_end_matches(['\n', '\r']))),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// `None` at end of input. A paste cut short by end of input is still returned.
    fn next_command(&mut self) -> io::Result<Option<SessionCommand>> {
        let Some(line) = self.read_line()? else {
            return Ok(None);
        };
        let command = parse_command(line);
        if command.action != "paste" {
            return Ok(Some(command));
        }

        println!("Paste the conversation, then a line with only {PASTE_TERMINATOR}");
        let mut paste = PasteBuffer::new();
        while let Some(line) = self.read_line()? {
            if paste.push_line(line) {
                break;
            }
        }
        debug!(lines = paste.len(), "paste block collected");
        Ok(Some(paste.finish()))
    }
}

fn run_session(pipeline: Arc<CliPipeline>) -> Result<()> {
    let mut reader = SessionReader::new(io::stdin().lock());
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    println!("SubText session started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(command) = reader.next_command()? else {
            break;
        };
        workers.retain(|worker| !worker.is_finished());

        match command.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", SESSION_HELP_COMMANDS.join(" "));
            }
            "analyze_text" => {
                match RawInput::manual_text(command.text.clone().unwrap_or_default()) {
                    Ok(input) => workers.push(spawn_analysis(&pipeline, input)),
                    Err(err) => print_user_message(&err),
                }
            }
            "analyze_image" => {
                let path = command.arg_str("path").unwrap_or_default();
                if path.is_empty() {
                    println!("/image requires a path");
                } else if !Path::new(path).is_file() {
                    println!("Image not found: {path}");
                } else {
                    let input = RawInput::image(ImageRef::from_path(path));
                    workers.push(spawn_analysis(&pipeline, input));
                }
            }
            "reset" => {
                pipeline.reset();
                println!("Session reset.");
            }
            "show" => print_session(pipeline.session()),
            "status" => {
                if let Err(err) = print_status(pipeline.backend(), pipeline.credentials()) {
                    println!("Status failed: {err:#}");
                }
            }
            "quit" => break,
            _ => {
                let name = command.arg_str("command").unwrap_or_default();
                println!("Unknown command: /{name}. Type /help for commands.");
            }
        }
    }

    for worker in workers {
        if worker.join().is_err() {
            eprintln!("analysis worker panicked");
        }
    }
    Ok(())
}

fn spawn_analysis(pipeline: &Arc<CliPipeline>, input: RawInput) -> JoinHandle<()> {
    println!("Scanning ({})...", input.source_label());
    let pipeline = Arc::clone(pipeline);
    thread::spawn(move || match pipeline.run(input) {
        Ok(PipelineOutcome::Completed(result)) => {
            println!("\n{}", format_analysis(&result));
        }
        Ok(PipelineOutcome::Superseded) => {
            debug!("analysis superseded");
        }
        Err(err) => print_user_message(&err),
    })
}

fn print_user_message(err: &PipelineError) {
    let message = err.user_message();
    println!("{}: {}", message.title, message.body);
}

fn print_session(session: &SharedSession) {
    let snapshot = session.snapshot();
    println!("State: {}", snapshot.state().label());
    if let Some(input) = snapshot.input() {
        println!("Input: {}", input.source_label());
    }
    if let Some(result) = snapshot.analysis() {
        println!("{}", format_analysis(result));
    } else if let Some(segments) = snapshot.segments() {
        println!("Messages: {}", segments.len());
    }
}

fn print_status<S: SecureStore>(client: &ApiClient, credentials: &Credentials<S>) -> Result<()> {
    match credentials.check_auth()? {
        AuthStatus::Authenticated { user, .. } => {
            let who = user
                .email()
                .or(user.full_name())
                .unwrap_or("unknown user");
            println!("Logged in as {who}");
            let subscribed = client.subscription_status(credentials);
            println!("Subscription: {}", if subscribed { "active" } else { "none" });
        }
        AuthStatus::Unauthenticated => println!("Not logged in."),
    }
    println!(
        "Onboarding: {}",
        if credentials.has_seen_onboarding() { "seen" } else { "not seen" }
    );
    Ok(())
}

fn display_user<'a>(session: &'a AuthSession, fallback: &'a str) -> &'a str {
    session
        .user
        .as_ref()
        .and_then(|user| user.email())
        .unwrap_or(fallback)
}

fn format_analysis(result: &AnalysisResult) -> String {
    let parsed = result.parsed();
    let mut lines = vec![
        format!("Behavior Type: {}", parsed.behavior_type),
        format!("Hidden Intent: {}", or_dash(&parsed.intent)),
        format!("Strategic Reply: {}", or_dash(&parsed.reply)),
        "Messages analyzed:".to_string(),
    ];
    lines.extend(parsed.selected_messages.iter().map(|message| format!("  - {message}")));
    lines.join("\n")
}

fn analysis_json(result: &AnalysisResult) -> Value {
    let parsed = result.parsed();
    json!({
        "behavior_type": parsed.behavior_type,
        "intent": parsed.intent,
        "reply": parsed.reply,
        "selected_messages": parsed.selected_messages,
        "combined_analysis": result.combined_analysis,
    })
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
