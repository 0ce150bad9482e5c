//! Tutor entry point.
//!
//! Initialises all components from environment configuration and runs
//! an interactive REPL: one line in, one streamed answer out. Type
//! `/quit` to exit.

use std::io::{BufRead, Write};
use std::sync::Arc;

use netlab_tutor::config::load_config;
use netlab_tutor::driver::Tutor;
use netlab_tutor::events::TutorEvent;
use netlab_tutor::types::MasteryLevel;

#[tokio::main]
async fn main() {
    // Structured logging — default level WARN to keep the REPL clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            eprintln!("Check your .env file for the required variables.");
            std::process::exit(1);
        }
    };

    let lab_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "01-basic-routing".to_string());
    let mastery = std::env::args()
        .nth(2)
        .and_then(|s| MasteryLevel::parse(&s))
        .unwrap_or(MasteryLevel::Novice);

    println!("Network lab tutor");
    println!("  Model:    {}", config.llm_model_name);
    println!("  Endpoint: {}", config.llm_endpoint_url);
    println!("  Lab:      {lab_id} ({})", mastery.as_str());

    let tutor = match Tutor::new(&config) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("Initialisation error: {e}");
            std::process::exit(1);
        }
    };

    let session_id = match tutor.start_session(&lab_id, mastery).await {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Could not start session: {e}");
            std::process::exit(1);
        }
    };

    println!("Session {session_id} started. Ask away (/quit to exit).\n");

    let stdin = std::io::stdin();
    loop {
        print!("You: ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/quit" {
            break;
        }

        let mut events = match tutor.ask(&session_id, question, None).await {
            Ok(rx) => rx,
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        print!("Tutor: ");
        let _ = std::io::stdout().flush();

        while let Some(event) = events.recv().await {
            match event {
                TutorEvent::Content { text } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                TutorEvent::Error { message } => {
                    eprintln!("\n[error] {message}");
                }
                TutorEvent::Done => {
                    println!("\n");
                }
                TutorEvent::Info { .. } | TutorEvent::Metadata { .. } => {}
            }
        }
    }

    println!("Goodbye!");
}
