use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use tokio::io::{AsyncBufReadExt, BufReader};

use streamchat::api::{ChatApi, ChatSummary};
use streamchat::core::config::{load_config, resolve};
use streamchat::core::files::Attachment;
use streamchat::core::message::{Message, Role};
use streamchat::core::pagination::{ScrollAnchor, ScrollMetrics};
use streamchat::core::state::OpsPatch;
use streamchat::core::{ChatSession, Effect, Session, SessionHooks};
use streamchat::transport::TokenStore;

#[derive(Parser)]
#[command(name = "streamchat", about = "Terminal client for a streaming chat backend")]
struct Args {
    /// Backend base URL (overrides config and STREAMCHAT_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Model for new messages
    #[arg(short, long)]
    model: Option<String>,

    /// Open an existing conversation by id
    #[arg(short, long)]
    chat: Option<String>,
}

const HELP: &str = "commands: /new /open ID /chats /older /attach PATH /detach \
/transcribe PATH /retry /cancel /temperature T /max-tokens N /web /image /quit";

struct TerminalHooks;

impl SessionHooks for TerminalHooks {
    fn navigate_to_conversation(&self, id: &str) {
        println!("[conversation {id}]");
    }

    fn conversation_created(&self, chat: &ChatSummary) {
        info!("New conversation {} \"{}\"", chat.id, chat.title);
    }

    fn restore_scroll(&self, _anchor: ScrollAnchor, prepended: usize) {
        println!("[loaded {prepended} older messages]");
    }
}

/// Prints the assistant's reply as it grows.
#[derive(Default)]
struct Printer {
    /// Bytes of the tail assistant message already on screen.
    printed: usize,
    streaming: bool,
    /// Epoch of the conversation the turn was started in.
    epoch: u64,
}

impl Printer {
    fn start_turn(&mut self, state: &Session) {
        self.printed = 0;
        self.streaming = true;
        self.epoch = state.epoch();
    }

    /// Forgets the current turn without printing any more of it.
    fn stop(&mut self) {
        self.printed = 0;
        self.streaming = false;
    }

    fn sync(&mut self, state: &Session, out: &mut impl Write) -> io::Result<()> {
        if !self.streaming {
            return Ok(());
        }
        // The conversation was replaced underneath the turn.
        if state.epoch() != self.epoch {
            if self.printed > 0 {
                writeln!(out)?;
            }
            self.stop();
            return Ok(());
        }

        if let Some(last) = state.last_message().filter(|m| m.role == Role::Assistant)
            && let Some(fresh) = last.content.get(self.printed..)
            && !fresh.is_empty()
        {
            if self.printed == 0 {
                write!(out, "assistant: ")?;
            }
            write!(out, "{fresh}")?;
            self.printed = last.content.len();
            out.flush()?;
        }

        if !state.is_sending() {
            if self.printed > 0 {
                writeln!(out)?;
            }
            self.stop();
            if let Some(reason) = state.failed_turn() {
                writeln!(out, "[failed: {reason}] /retry to send again")?;
            } else if let Some(last) = state.last_message() {
                if let Some(url) = &last.image_url {
                    writeln!(out, "[image] {url}")?;
                }
                let input = state
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .and_then(|m| m.input_tokens);
                if let (Some(input), Some(output)) = (input, last.output_tokens) {
                    writeln!(out, "[tokens: {input} in / {output} out]")?;
                }
            }
        }
        Ok(())
    }
}

fn print_message(message: &Message) {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("{who}: {}", message.content);
    if let Some(file) = &message.file {
        println!("  [file] {}", file.display_name());
    }
    if let Some(url) = &message.image_url {
        println!("  [image] {url}");
    }
}

/// Fake viewport: one unit per message, always at the top when asked.
fn viewport(session: &ChatSession) -> ScrollMetrics {
    ScrollMetrics {
        scroll_top: 0.0,
        scroll_height: session.state().messages().len() as f64,
    }
}

async fn apply_ops(session: &mut ChatSession, patch: OpsPatch) {
    if let Err(e) = session.set_ops(patch).await {
        println!("[settings not saved: {e}]");
    }
    let ops = session.state().ops();
    println!(
        "[temperature {} | max tokens {} | web search {} | image generation {}]",
        ops.temperature, ops.max_tokens, ops.is_web_search, ops.is_image_generation
    );
}

/// Returns false when the user asked to quit.
async fn handle_line(session: &mut ChatSession, printer: &mut Printer, line: &str) -> bool {
    let line = line.trim();
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/help" => println!("{HELP}"),
        "/new" => {
            printer.stop();
            session.enter_new_conversation();
            println!("[new conversation]");
        }
        "/open" if !arg.is_empty() => {
            printer.stop();
            match session.enter_conversation(arg).await {
                Ok(()) => session.state().messages().iter().for_each(print_message),
                Err(e) => println!("[could not open {arg}: {e}]"),
            }
        }
        "/chats" => match session.list_chats().await {
            Ok(chats) => {
                for chat in chats {
                    println!("{}  {}", chat.id, chat.title);
                }
            }
            Err(e) => println!("[could not list conversations: {e}]"),
        },
        "/older" => {
            if !session.load_older(viewport(session)) {
                println!("[nothing older to load]");
            }
        }
        "/attach" if !arg.is_empty() => match Attachment::from_path(Path::new(arg)) {
            Ok(attachment) => {
                println!("[attached {} ({})]", attachment.name, attachment.mime);
                session.attach_file(attachment);
            }
            Err(e) => println!("[could not read {arg}: {e}]"),
        },
        "/detach" => session.detach_file(),
        "/transcribe" if !arg.is_empty() => {
            let audio = match Attachment::from_path(Path::new(arg)) {
                Ok(audio) => audio,
                Err(e) => {
                    println!("[could not read {arg}: {e}]");
                    return true;
                }
            };
            match session.transcribe(audio.into()).await {
                Ok(text) => {
                    println!("you: {text}");
                    if session.handle_user_message(&text, None) {
                        printer.start_turn(session.state());
                    }
                }
                Err(e) => println!("[transcription failed: {e}]"),
            }
        }
        "/retry" => {
            if session.retry_failed_turn() {
                printer.start_turn(session.state());
            } else {
                println!("[nothing to retry]");
            }
        }
        "/cancel" => session.cancel_turn(),
        "/temperature" => match arg.parse::<f32>() {
            Ok(t) => {
                let patch = OpsPatch {
                    temperature: Some(t),
                    ..OpsPatch::default()
                };
                apply_ops(session, patch).await;
            }
            Err(_) => println!("[usage: /temperature 0.7]"),
        },
        "/max-tokens" => match arg.parse::<u32>() {
            Ok(n) => {
                let patch = OpsPatch {
                    max_tokens: Some(n),
                    ..OpsPatch::default()
                };
                apply_ops(session, patch).await;
            }
            Err(_) => println!("[usage: /max-tokens 2048]"),
        },
        "/web" => {
            let patch = OpsPatch {
                is_web_search: Some(!session.state().ops().is_web_search),
                ..OpsPatch::default()
            };
            apply_ops(session, patch).await;
        }
        "/image" => {
            let patch = OpsPatch {
                is_image_generation: Some(!session.state().ops().is_image_generation),
                ..OpsPatch::default()
            };
            apply_ops(session, patch).await;
        }
        _ if command.starts_with('/') => println!("{HELP}"),
        _ => {
            if session.handle_user_message(line, None) {
                printer.start_turn(session.state());
            } else {
                println!("[still answering, /cancel to stop]");
            }
        }
    }
    true
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    // Initialize file logger - writes to streamchat.log in current directory
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();

    if let Ok(log_file) = File::create("streamchat.log") {
        let _ = WriteLogger::init(LevelFilter::Debug, log_config, log_file);
    }

    let config = load_config().unwrap_or_else(|e| {
        warn!("Ignoring config file: {}", e);
        eprintln!("warning: {e}, using defaults");
        Default::default()
    });
    let resolved = resolve(&config, args.api_url.as_deref(), args.model.as_deref());
    info!(
        "streamchat starting up: api={}, model={}",
        resolved.api_url, resolved.model
    );

    let tokens = Arc::new(TokenStore::new(resolved.token.clone()));
    let backend = ChatApi::new(&resolved.api_url, tokens.clone())
        .with_stream_timeout(resolved.stream_timeout);
    let mut session = ChatSession::new(
        Arc::new(backend),
        Arc::new(TerminalHooks),
        resolved.session_ops(),
    );

    if let Some(chat) = &args.chat {
        match session.enter_conversation(chat).await {
            Ok(()) => session.state().messages().iter().for_each(print_message),
            Err(e) => eprintln!("could not open conversation {chat}: {e}"),
        }
    }

    println!("{HELP}");
    let mut printer = Printer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&mut session, &mut printer, &line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin failed: {}", e);
                    break;
                }
            },
            effect = session.process_next() => {
                if let Effect::OlderPrepended { count } = effect {
                    session.state().messages()[..count].iter().for_each(print_message);
                }
            }
        }

        if let Err(e) = printer.sync(session.state(), &mut io::stdout()) {
            warn!("stdout failed: {}", e);
        }

        if tokens.is_logged_out() {
            eprintln!("Session expired. Set a new token and restart.");
            break;
        }
    }

    info!("streamchat shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamchat::api::MessagesHistory;
    use streamchat::core::state::{SessionOps, TurnId};
    use streamchat::core::{Action, update};

    fn streaming_session() -> (Session, TurnId) {
        let mut state = Session::new(SessionOps::with_model("test-model"));
        let effect = update(
            &mut state,
            Action::Submit {
                text: "hi".to_string(),
                attachment: None,
                conversation_id: Some("c1".to_string()),
            },
        );
        let Effect::StartTurn { turn, .. } = effect else {
            panic!("expected StartTurn, got {:?}", effect);
        };
        (state, turn)
    }

    fn delta(turn: TurnId, text: &str) -> Action {
        Action::StreamDelta {
            turn,
            text: text.to_string(),
            image_url: None,
        }
    }

    fn printed(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_printer_streams_only_new_text() {
        let (mut state, turn) = streaming_session();
        let mut printer = Printer::default();
        let mut out = Vec::new();
        printer.start_turn(&state);

        update(&mut state, delta(turn, "Hel"));
        printer.sync(&state, &mut out).unwrap();
        update(&mut state, delta(turn, "lo 日本"));
        printer.sync(&state, &mut out).unwrap();
        update(&mut state, Action::TurnFinished { turn });
        printer.sync(&state, &mut out).unwrap();

        assert_eq!(printed(out), "assistant: Hello 日本\n");
        assert!(!printer.streaming);
    }

    #[test]
    fn test_printer_stops_when_conversation_is_replaced_mid_turn() {
        let (mut state, turn) = streaming_session();
        let mut printer = Printer::default();
        let mut out = Vec::new();
        printer.start_turn(&state);

        update(&mut state, delta(turn, "xyz"));
        printer.sync(&state, &mut out).unwrap();

        update(&mut state, Action::SetConversationId(Some("c2".to_string())));
        let epoch = state.epoch();
        update(
            &mut state,
            Action::HistoryLoaded {
                epoch,
                history: MessagesHistory {
                    messages: vec![Message::user("q", None), Message::assistant("ab日本")],
                    ..MessagesHistory::default()
                },
            },
        );
        printer.sync(&state, &mut out).unwrap();
        printer.sync(&state, &mut out).unwrap();

        assert_eq!(printed(out), "assistant: xyz\n");
        assert!(!printer.streaming);
    }

    #[test]
    fn test_stopped_printer_prints_nothing() {
        let (mut state, turn) = streaming_session();
        let mut printer = Printer::default();
        let mut out = Vec::new();
        printer.start_turn(&state);
        printer.stop();

        update(&mut state, delta(turn, "ignored"));
        printer.sync(&state, &mut out).unwrap();

        assert!(out.is_empty());
    }
}
