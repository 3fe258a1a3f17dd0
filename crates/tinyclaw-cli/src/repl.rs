//! Interactive REPL for the `agent` command.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use tinyclaw_agent::{AgentLoop, StreamSink};

const REPL_SESSION_KEY: &str = "cli:repl";

pub async fn run(agent: Arc<AgentLoop>, sessions: Arc<tinyclaw_core::session::SessionStore>) -> Result<()> {
    println!();
    println!(
        "  {} — {} to quit, {} to clear the conversation",
        "interactive mode".bold(),
        "/exit".cyan(),
        "/reset".cyan()
    );
    println!();

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("you> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line).ok();

                match line {
                    "/exit" | "/quit" => break,
                    "/reset" => {
                        sessions.delete(REPL_SESSION_KEY);
                        println!("  {}", "conversation cleared".dimmed());
                        continue;
                    }
                    _ => {}
                }

                print!("{} ", "claw>".cyan());
                let sink: StreamSink = Arc::new(|delta: &str| {
                    use std::io::Write;
                    print!("{delta}");
                    std::io::stdout().flush().ok();
                });

                match agent
                    .process_direct_stream(line, REPL_SESSION_KEY, sink)
                    .await
                {
                    Ok(_) => println!(),
                    Err(e) => println!("{} {e}", "error:".red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }

    println!("  bye!");
    Ok(())
}
