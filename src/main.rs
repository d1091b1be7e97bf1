use std::io::Read;
use std::process::ExitCode;

use csvql::action;
use csvql::error::{EngineError, ErrorKind};
use csvql::procedure::Procedure;
use csvql::session::flags::set_flag;
use csvql::session::{apply_env_config, load_env_config, preload_files, Session};
use csvql::shell::launch_interactive_shell;
use csvql::value::Value;

const USAGE: &str = "\
usage: csvql [options] [statements]
       csvql [options] -s FILE
       csvql calc \"expression\"
       csvql fields FILE
       csvql syntax [keywords...]

options:
  -s, --source FILE         read statements from FILE
  -o, --out FILE            write query results to FILE
  -r, --repository DIR      table search directory
  -z, --timezone NAME       UTC, Local or a fixed offset like +09:00
  -d, --delimiter CHAR      field delimiter for CSV files
  -e, --encoding NAME       file encoding: UTF8, UTF8M or SJIS
  -w, --wait-timeout SECS   seconds to wait for file locks
  -n, --no-header           tables have no header line
  -a, --without-null        read empty fields as empty strings
  -f, --format NAME         result format: CSV, TSV, FIXED, LTSV, JSON, GFM, ORG, TEXT
  -l, --line-break NAME     line break on write: LF, CR or CRLF
  -Q, --enclose-all         enclose all text fields on write
  -P, --pretty-print        pretty-print JSON output
  -q, --quiet               suppress operation notices
  -h, --help                print this message
";

struct Invocation {
    source_file: Option<String>,
    out_file: Option<String>,
    rest: Vec<String>,
}

fn fail_usage(message: &str) -> ExitCode {
    eprintln!("csvql: {message}");
    eprintln!("{USAGE}");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args) {
        Ok(Some(invocation)) => dispatch(invocation),
        Ok(None) => {
            println!("{USAGE}");
            ExitCode::SUCCESS
        }
        Err(message) => fail_usage(&message),
    }
}

fn set_flag_arg(name: &str, value: &str) -> Result<(), String> {
    set_flag(name, &Value::String(value.to_string())).map_err(|e| e.to_string())
}

fn parse_args(args: &[String]) -> Result<Option<Invocation>, String> {
    let mut invocation = Invocation {
        source_file: None,
        out_file: None,
        rest: Vec::new(),
    };
    let mut iter = args.iter().peekable();
    let mut take_value = |iter: &mut std::iter::Peekable<std::slice::Iter<'_, String>>,
                          flag: &str|
     -> Result<String, String> {
        iter.next()
            .cloned()
            .ok_or_else(|| format!("option {flag} requires a value"))
    };
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-s" | "--source" => invocation.source_file = Some(take_value(&mut iter, arg)?),
            "-o" | "--out" => invocation.out_file = Some(take_value(&mut iter, arg)?),
            "-r" | "--repository" => set_flag_arg("REPOSITORY", &take_value(&mut iter, arg)?)?,
            "-z" | "--timezone" => set_flag_arg("TIMEZONE", &take_value(&mut iter, arg)?)?,
            "-d" | "--delimiter" => set_flag_arg("DELIMITER", &take_value(&mut iter, arg)?)?,
            "-e" | "--encoding" => set_flag_arg("ENCODING", &take_value(&mut iter, arg)?)?,
            "-w" | "--wait-timeout" => set_flag_arg("WAIT_TIMEOUT", &take_value(&mut iter, arg)?)?,
            "-n" | "--no-header" => set_flag_arg("NO_HEADER", "true")?,
            "-a" | "--without-null" => set_flag_arg("WITHOUT_NULL", "true")?,
            "-f" | "--format" => set_flag_arg("FORMAT", &take_value(&mut iter, arg)?)?,
            "-l" | "--line-break" => set_flag_arg("LINE_BREAK", &take_value(&mut iter, arg)?)?,
            "-Q" | "--enclose-all" => set_flag_arg("ENCLOSE_ALL", "true")?,
            "-P" | "--pretty-print" => set_flag_arg("PRETTY_PRINT", "true")?,
            "-q" | "--quiet" => set_flag_arg("QUIET", "true")?,
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("unknown option {other}"));
            }
            _ => {
                invocation.rest.push(arg.clone());
                invocation.rest.extend(iter.by_ref().cloned());
            }
        }
    }
    Ok(Some(invocation))
}

fn read_stdin() -> String {
    let mut text = String::new();
    let _ = std::io::stdin().read_to_string(&mut text);
    text
}

fn report(err: &EngineError) -> ExitCode {
    if !matches!(err.kind, ErrorKind::ForcedExit(_)) {
        eprintln!("{err}");
    }
    let code = err.code().clamp(1, 255) as u8;
    ExitCode::from(code)
}

fn dispatch(invocation: Invocation) -> ExitCode {
    if let Err(err) = load_env_config().map(|config| apply_env_config(&config)) {
        return report(&err);
    }

    match invocation.rest.first().map(String::as_str) {
        Some("calc") => {
            let Some(expr) = invocation.rest.get(1) else {
                return fail_usage("calc requires an expression");
            };
            return match action::calc(expr, &read_stdin()) {
                Ok(result) => {
                    println!("{result}");
                    ExitCode::SUCCESS
                }
                Err(err) => report(&err),
            };
        }
        Some("fields") => {
            let Some(file) = invocation.rest.get(1) else {
                return fail_usage("fields requires a file name");
            };
            return match action::fields(file) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(err) => report(&err),
            };
        }
        Some("syntax") => {
            println!("{}", action::syntax(&invocation.rest[1..]));
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let input = if let Some(path) = &invocation.source_file {
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                eprintln!("csvql: file {path}: {e}");
                return ExitCode::from(ErrorKind::ReadFile.code() as u8);
            }
        }
    } else if invocation.rest.is_empty() {
        None
    } else {
        Some(invocation.rest.join(" "))
    };

    let capture_output = invocation.out_file.is_some();
    let session = if capture_output {
        Session::captured()
    } else {
        Session::new()
    };
    let mut proc = Procedure::new(session);

    for preload_path in preload_files() {
        let text = match std::fs::read_to_string(&preload_path) {
            Ok(text) => text,
            Err(_) => continue,
        };
        if let Err(err) = preload(&mut proc, &text) {
            return report(&err);
        }
    }

    let result = match input {
        Some(input) => action::run(&mut proc, &input),
        None => launch_interactive_shell(&mut proc),
    };

    if let Some(out_file) = &invocation.out_file {
        if let Some(text) = proc.session.take_captured_output() {
            let path = std::path::Path::new(out_file);
            if path.exists() {
                eprintln!("csvql: file {out_file} already exists");
                return ExitCode::from(ErrorKind::FileAlreadyExist.code() as u8);
            }
            if !text.is_empty() {
                if let Err(e) = std::fs::write(path, text) {
                    eprintln!("csvql: file {out_file}: {e}");
                    return ExitCode::from(ErrorKind::WriteFile.code() as u8);
                }
            }
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

/// Runs a csvqlrc pre-load file inside the session's scope without the
/// end-of-run commit.
fn preload(proc: &mut Procedure, text: &str) -> Result<(), EngineError> {
    let statements = csvql::parser::parse(text)?;
    proc.execute(&statements).map(|_| ())
}
