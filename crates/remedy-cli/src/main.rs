use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remedy_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use remedy_contracts::error::RemedyError;
use remedy_contracts::model::RemedyResult;
use remedy_engine::{build_session, Advance, EngineConfig, RemedySession, StepsOutcome, ViewState};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DISCLAIMER: &str = "Always consult a qualified healthcare professional if symptoms persist or worsen, or before starting any new treatment, especially if you have underlying health conditions or are on other medications.";

#[derive(Debug, Parser)]
#[command(name = "remedy-rs", version, about = "Symptom to remedy assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session with clarification questionnaire.
    Chat(ChatArgs),
    /// One-shot remedy suggestions.
    Remedies(RemediesArgs),
    /// One-shot clarification questionnaire, printed as JSON.
    Clarify(ClarifyArgs),
    /// Resolve and print the session identity.
    Whoami,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
}

#[derive(Debug, Parser)]
struct RemediesArgs {
    #[arg(long)]
    symptoms: String,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    /// Print the raw result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ClarifyArgs {
    #[arg(long)]
    symptoms: String,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("remedy-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Remedies(args) => run_remedies(args),
        Command::Clarify(args) => run_clarify(args),
        Command::Whoami => run_whoami(),
    }
}

fn open_session(text_model: Option<String>, events: Option<PathBuf>) -> Result<RemedySession> {
    let mut config = EngineConfig::from_env();
    if let Some(model) = text_model {
        config = config.with_text_model(model);
    }
    let mut session = build_session(&config, events).context("session setup failed")?;
    if let Some(notice) = session.bootstrap() {
        eprintln!("{notice}");
    }
    Ok(session)
}

fn run_remedies(args: RemediesArgs) -> Result<i32> {
    let mut session = open_session(args.text_model, args.events)?;
    session.edit_query(args.symptoms);
    session.fetch_remedies()?;
    let Some(result) = session.result() else {
        return Ok(1);
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", render_remedies(result));
    }
    Ok(0)
}

fn run_clarify(args: ClarifyArgs) -> Result<i32> {
    let mut session = open_session(args.text_model, args.events)?;
    session.edit_query(args.symptoms);
    let pending = session.begin_clarify()?;
    let outcome = session.run_clarify(&pending);
    let steps = outcome.clone().unwrap_or_default();
    match session.complete_clarify(pending, outcome)? {
        StepsOutcome::Started { .. } => {
            println!("{}", serde_json::to_string_pretty(&steps)?);
            Ok(0)
        }
        StepsOutcome::NoClarification => {
            println!("{}", session.message().unwrap_or_default());
            Ok(0)
        }
    }
}

fn run_whoami() -> Result<i32> {
    let session = open_session(None, None)?;
    let identity = session.identity();
    println!(
        "{} ({})",
        identity.user_id.as_deref().unwrap_or("-"),
        identity.provider
    );
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events = args.events.clone();
    let mut session = open_session(args.text_model, args.events)?;
    if let Some(path) = events {
        eprintln!("Session {}: logging events to {}", session.session_id(), path.display());
    }
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();

    println!("Remedy chat started. Describe your symptoms, or type /help for commands.");
    println!("{DISCLAIMER}");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        if intent.action == "quit" {
            break;
        }
        debug!(action = %intent.action, "chat intent");
        handle_intent(&mut session, &intent);
    }

    session.teardown();
    Ok(())
}

fn handle_intent(session: &mut RemedySession, intent: &Intent) {
    match intent.action.as_str() {
        "help" => {
            println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            println!("Any other text replaces the symptom description.");
        }
        "edit_query" => {
            session.edit_query(intent.text.clone().unwrap_or_default());
            println!("Symptoms: {}", session.query());
        }
        "fetch_remedies" => {
            println!("Fetching remedies...");
            report(session.fetch_remedies());
            print_result(session);
        }
        "clarify" => {
            println!("Preparing questions...");
            match session.clarify() {
                Ok(StepsOutcome::Started { steps }) => {
                    println!("{steps} question(s). Tick options with /toggle, then /next.");
                    print!("{}", render_step(&session.view()));
                }
                Ok(StepsOutcome::NoClarification) => print_message(session),
                Err(err) => report_err(err),
            }
        }
        "toggle_option" => {
            let arg = intent
                .command_args
                .get("option")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let view = session.view();
            let Some(label) = resolve_option(&view, arg) else {
                println!("/toggle requires an option label or number");
                return;
            };
            match session.toggle_option(&label) {
                Ok(true) => println!("[x] {label}"),
                Ok(false) => println!("[ ] {label}"),
                Err(err) => report_err(err),
            }
        }
        "advance_step" => match session.advance_step() {
            Ok(Advance::Next { .. }) => {
                println!("Symptoms: {}", session.query());
                print!("{}", render_step(&session.view()));
            }
            Ok(Advance::Submit { .. }) => {
                println!("Symptoms: {}", session.query());
                print_result(session);
            }
            Err(err) => report_err(err),
        },
        "start_voice" => {
            println!("Listening...");
            match session.start_voice_input() {
                Ok(_) => println!("Symptoms: {}", session.query()),
                Err(err) => report_err(err),
            }
        }
        "toggle_theme" => {
            let theme = session.toggle_theme();
            println!("Theme: {theme}");
        }
        "reset" => {
            session.reset();
            println!("Cleared.");
        }
        "status" => {
            print!("{}", render_status(&session.view()));
        }
        "unknown" => {
            let command = intent
                .command_args
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default();
            println!("Unknown command: /{command}. Type /help.");
        }
        other => {
            println!("Unhandled action: {other}");
        }
    }
}

fn report(outcome: Result<(), RemedyError>) {
    if let Err(err) = outcome {
        report_err(err);
    }
}

fn report_err(err: RemedyError) {
    if let Some(line) = render_error(&err) {
        println!("{line}");
    }
}

/// The session already holds the same text in its message slot, so a failed
/// action prints this line and nothing else.
fn render_error(err: &RemedyError) -> Option<String> {
    if *err == RemedyError::Cancelled {
        return None;
    }
    let label = if err.is_fatal() { "Error" } else { "Notice" };
    Some(format!("{label}: {err}"))
}

fn print_message(session: &RemedySession) {
    if let Some(message) = session.message() {
        println!("{message}");
    }
}

fn print_result(session: &RemedySession) {
    if let Some(result) = session.result() {
        print!("{}", render_remedies(result));
    }
}

/// Accepts an exact label or a 1-based index into the current step.
fn resolve_option(view: &ViewState, arg: &str) -> Option<String> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }
    let step = view.current_step.as_ref();
    if let (Ok(number), Some(step)) = (arg.parse::<usize>(), step) {
        if !step.contains(arg) {
            return number
                .checked_sub(1)
                .and_then(|index| step.options.get(index))
                .cloned();
        }
    }
    if let Some(step) = step {
        if let Some(found) = step
            .options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(arg))
        {
            return Some(found.clone());
        }
    }
    Some(arg.to_string())
}

fn render_step(view: &ViewState) -> String {
    let Some(step) = &view.current_step else {
        return String::new();
    };
    let mut out = format!(
        "Question {}/{}: {}\n",
        view.step_index + 1,
        view.step_count,
        step.category
    );
    for (index, option) in step.options.iter().enumerate() {
        let mark = if view.selections.iter().any(|item| item == option) {
            "x"
        } else {
            " "
        };
        out.push_str(&format!("  {}. [{mark}] {option}\n", index + 1));
    }
    let next = if view.is_last_step {
        "/next to get remedies"
    } else {
        "/next for the next question"
    };
    out.push_str(&format!("  ({next})\n"));
    out
}

fn render_remedies(result: &RemedyResult) -> String {
    if !result.has_remedies() {
        return "No remedies suggested.\n".to_string();
    }
    let mut out = String::new();
    for (index, remedy) in result.remedies.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", index + 1, remedy.name));
        for (label, value) in [
            ("Used for", &remedy.used_for),
            ("How it works", &remedy.how_it_works),
            ("Dosage", &remedy.dosage),
            ("Stop when", &remedy.stop_when),
            ("Avoid", &remedy.avoid),
            ("Side effects", &remedy.side_effects),
            ("Source", &remedy.source),
        ] {
            out.push_str(&format!("   {label}: {value}\n"));
        }
    }
    if !result.lifestyle_tips.is_empty() {
        out.push_str("Lifestyle tips:\n");
        for tip in &result.lifestyle_tips {
            out.push_str(&format!("  - {tip}\n"));
        }
    }
    out.push_str(&format!("\n{DISCLAIMER}\n"));
    out
}

fn render_status(view: &ViewState) -> String {
    let mut out = format!(
        "User: {} ({})\nTheme: {}\nSymptoms: {}\n",
        view.identity.user_id.as_deref().unwrap_or("-"),
        view.identity.provider,
        view.theme,
        if view.query.is_empty() { "-" } else { view.query.as_str() }
    );
    if view.current_step.is_some() {
        out.push_str(&render_step(view));
    }
    if let Some(message) = &view.message {
        out.push_str(&format!("Message: {message}\n"));
    }
    if !view.voice_available {
        out.push_str("Voice input: unavailable (set REMEDY_SPEECH_CMD)\n");
    }
    out
}
