use std::io::{self, Write};
use std::sync::Arc;

use rapport_core::engine::{AnalysisReport, CONTINUE_SENTINEL, ImageOutcome, TurnOutput};
use rapport_core::types::{ChatMessage, Polarity, Scenario, Sender, SessionState};
use rapport_core::{EngineCfg, EngineError, TurnOrchestrator};
use rapport_llm::image::MockImageProvider;
use rapport_llm::provider::MockProvider;
use rapport_llm::{ImageProvider, LlmProvider};
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Reply used when no text service is configured.
const OFFLINE_REPLY: &str = r#"{
  "aiName": "Sam",
  "dialogue": [{"type": "action", "text": "glances up from the menu"}, {"type": "dialogue", "text": "Sorry, what was that?"}],
  "bodyLanguage": "Polite, slightly distracted smile",
  "feedback": {"engagementDelta": 0, "effectivenessScore": 50},
  "inferredUserAction": "You wait for a reply."
}"#;

const DEFAULT_SCENARIO: &str = r#"{
  "name": "Sam",
  "gender": "man",
  "age": "early thirties",
  "personalityTraits": ["dry humour", "curious"],
  "environment": "a small neighbourhood coffee shop on a rainy afternoon"
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = EngineCfg::from_env();
    for (key, value, description) in cfg.to_entries() {
        tracing::debug!(key, value = %value, description, "engine parameter");
    }

    let scenario = load_scenario(std::env::args().nth(1))?;

    let text: Arc<dyn LlmProvider> = match rapport_llm::http::from_env() {
        Some(p) => Arc::new(p),
        None => {
            println!("RAPPORT_LLM_MODEL / RAPPORT_LLM_API_KEY not set, running with an offline stand-in.");
            Arc::new(MockProvider::new(OFFLINE_REPLY))
        }
    };
    let images: Arc<dyn ImageProvider> = match rapport_llm::image::from_env() {
        Some(p) => Arc::new(p),
        None => Arc::new(MockImageProvider::new()),
    };
    tracing::info!(text = text.name(), images = images.name(), "providers ready");

    let engine = TurnOrchestrator::new(cfg, text, images);
    let opening = engine.start_session(scenario).await?;
    let mut state = opening.state;
    let mut history: Vec<ChatMessage> = Vec::new();
    if let Some(backstory) = opening.backstory {
        print_message(&state, &backstory);
        history.push(backstory);
    }
    print_message(&state, &opening.message);
    history.push(opening.message);
    println!("(empty line or {CONTINUE_SENTINEL} stays silent; /pause /resume /status /end /quit)");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);

    loop {
        request_next_prompt(&ready_tx);
        let Some(event) = line_rx.recv().await else {
            break;
        };
        let line = match event {
            InputEvent::Line(line) => line,
            InputEvent::Interrupted | InputEvent::Eof => break,
            InputEvent::Error(err) => {
                eprintln!("input error: {err}");
                break;
            }
        };

        let text = line.trim();
        match text {
            "/q" | "/quit" | "/exit" => return Ok(()),
            "/end" => break,
            "/status" => {
                print_status(&state);
                continue;
            }
            "/pause" | "/resume" => {
                state = engine.set_action_paused(&state, text == "/pause");
                print_status(&state);
                continue;
            }
            _ => {}
        }
        let input = if text.is_empty() { CONTINUE_SENTINEL } else { text };

        let cancel = CancellationToken::new();
        match run_turn(&engine, &state, &history, input, &cancel).await {
            Ok(TurnOutput { state: next, user_message, reply, outcome }) => {
                if user_message.sender == Sender::UserSilentAction {
                    print_message(&next, &user_message);
                }
                print_feedback(&user_message);
                print_message(&next, &reply);
                if let Some(summary) = &outcome.visual_summary {
                    println!("  [{summary}]");
                }
                if outcome.image == ImageOutcome::ReusedPrevious {
                    println!("  [image unavailable, showing the previous one]");
                }
                if outcome.goal_achieved {
                    println!("  [goal achieved]");
                }
                history.push(user_message);
                history.push(reply);
                state = next;
                if let Some(reason) = outcome.ended {
                    println!("-- conversation over: {} --", reason.as_str());
                    break;
                }
            }
            Err(EngineError::Cancelled) => println!("(turn cancelled)"),
            Err(e) => {
                tracing::warn!(error = %e, resendable = e.is_resendable(), "turn failed");
                let notice = ChatMessage::retry_notice(input, &e);
                print_message(&state, &notice);
                history.push(notice);
                if !e.is_resendable() {
                    break;
                }
            }
        }
    }
    drop(ready_tx);

    println!("analysing the conversation...");
    match engine.end_session(&state, &history).await {
        Ok(report) => print_report(&report),
        Err(e) => eprintln!("analysis failed: {e}"),
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RAPPORT_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
}

fn load_scenario(path: Option<String>) -> anyhow::Result<Scenario> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read scenario {path}: {e}"))?,
        None => DEFAULT_SCENARIO.to_owned(),
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Await a turn; Ctrl-C cancels it but the in-flight call is left to finish.
async fn run_turn(
    engine: &TurnOrchestrator,
    state: &SessionState,
    history: &[ChatMessage],
    input: &str,
    cancel: &CancellationToken,
) -> Result<TurnOutput, EngineError> {
    let turn = engine.process_turn(state, history, input, cancel);
    tokio::pin!(turn);
    print!("\r{} is thinking...", state.persona_name);
    let _ = io::stdout().flush();
    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                cancel.cancel();
            }
        }
    };
    print!("\r\x1b[2K");
    let _ = io::stdout().flush();
    result
}

fn print_message(state: &SessionState, m: &ChatMessage) {
    match m.sender {
        Sender::Persona => {
            println!("{}: {}", state.persona_name, m.render_text());
            if let Some(body) = &m.body_language {
                println!("  ({body})");
            }
            if let Some(img) = &m.image {
                println!("  [new image {} {}]", img.id, img.mime_type);
            }
        }
        Sender::Backstory => println!("~ {}", m.render_text()),
        Sender::System => println!("! {}", m.render_text()),
        Sender::User | Sender::UserSilentAction => println!("You: {}", m.render_text()),
    }
}

fn print_feedback(m: &ChatMessage) {
    let Some(fb) = &m.feedback else {
        return;
    };
    let mut line = format!("  engagement {:+}, effectiveness {}/100", fb.engagement_delta, fb.effectiveness);
    if let Some(t) = &fb.trait_label {
        let sign = match t.polarity {
            Polarity::Positive => '+',
            Polarity::Negative => '-',
        };
        line.push_str(&format!(", {sign}{}: {}", t.label, t.justification));
    }
    println!("{line}");
}

fn print_status(state: &SessionState) {
    println!("  engagement {}/100, momentum {}/100, turn {}", state.engagement, state.conversation_momentum, state.turn);
    if let Some(g) = &state.active_goal {
        println!("  goal: {} ({}%)", g.text, g.progress);
    }
    match &state.active_action {
        Some(a) if a.paused => println!("  action: {} ({}%, paused)", a.description, a.progress),
        Some(a) => println!("  action: {} ({}%)", a.description, a.progress),
        None => {}
    }
}

fn print_report(r: &AnalysisReport) {
    println!("\n== {}/100 after {} turns ==", r.overall_score, r.turns);
    println!("{}", r.summary);
    for (title, items) in [("Strengths", &r.strengths), ("To improve", &r.improvements), ("Key moments", &r.key_moments)] {
        if items.is_empty() {
            continue;
        }
        println!("{title}:");
        for item in items {
            println!("  - {item}");
        }
    }
    if let Some(goal) = &r.goal_outcome {
        println!("Goal: {goal}");
    }
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

fn spawn_input_thread(line_tx: mpsc::UnboundedSender<InputEvent>, ready_rx: std::sync::mpsc::Receiver<()>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline("You> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}
