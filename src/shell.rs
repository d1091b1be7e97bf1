//! The interactive shell: a rustyline loop that accumulates statements
//! until a terminating semicolon, executes them, and keeps going on
//! errors. History persists across sessions.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::error::{EngineError, ErrorKind};
use crate::procedure::{Flow, Procedure};
use crate::txn;

const PROMPT: &str = "csvql> ";
const CONTINUED_PROMPT: &str = "     > ";

fn history_path() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(|home| std::path::PathBuf::from(home).join(".csvql_history"))
}

/// Runs the REPL until EOF or EXIT. Statement errors print and the loop
/// continues; views the failing input freshly loaded are evicted from
/// the cache (mark-and-sweep against a pre-statement snapshot) unless
/// they already carry uncommitted changes, so a retry rereads the disk.
pub fn launch_interactive_shell(proc: &mut Procedure) -> Result<(), EngineError> {
    let mut editor = DefaultEditor::new().map_err(|e| {
        EngineError::new(ErrorKind::Internal, format!("terminal setup failed: {e}"))
    })?;
    if let Some(path) = history_path() {
        let _ = editor.load_history(&path);
    }

    println!("csvql interactive shell");
    println!("Press Ctrl+D or execute \"EXIT;\" to terminate this shell.");
    println!();

    let mut exit_error: Option<EngineError> = None;
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() {
            PROMPT
        } else {
            CONTINUED_PROMPT
        };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                exit_error = Some(EngineError::new(
                    ErrorKind::Internal,
                    format!("terminal read failed: {e}"),
                ));
                break;
            }
        };
        if buffer.is_empty() && line.trim().is_empty() {
            continue;
        }
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);
        if !buffer.trim_end().ends_with(';') {
            continue;
        }

        let source = std::mem::take(&mut buffer);
        let _ = editor.add_history_entry(source.trim());

        let statements = match crate::parser::parse(&source) {
            Ok(statements) => statements,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        let loaded = proc.session.cache.snapshot();
        match proc.execute(&statements) {
            Ok(Flow::Normal) | Ok(Flow::Return(_)) => {}
            Ok(Flow::Exit(0)) => break,
            Ok(Flow::Exit(code)) => {
                exit_error = Some(EngineError::new(
                    ErrorKind::ForcedExit(code),
                    format!("exit with code {code}"),
                ));
                break;
            }
            Ok(Flow::Break) | Ok(Flow::Continue) => {
                eprintln!("BREAK and CONTINUE are only allowed inside loops");
            }
            Err(err) => {
                if let ErrorKind::ForcedExit(_) = err.kind {
                    exit_error = Some(err);
                    break;
                }
                eprintln!("{err}");
                proc.session
                    .cache
                    .evict_fresh_since(&loaded, &proc.session.uncommitted);
            }
        }
    }

    txn::rollback(&mut proc.session);
    txn::release_resources(&mut proc.session);
    if let Some(path) = history_path() {
        let _ = editor.save_history(&path);
    }
    match exit_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
