//! One-shot execution and the subcommand entry points the CLI calls
//! into.

use std::path::PathBuf;

use crate::commands;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::executor::exec_expr::eval;
use crate::executor::exec_query::load_table_expr;
use crate::parser::ast::TableExpr;
use crate::procedure::{Flow, Procedure};
use crate::session::flags::with_flags_read;
use crate::session::Session;
use crate::storage::codec;
use crate::storage::file_info::{FileInfo, Format};
use crate::txn;
use crate::value::Value;
use crate::view::View;

/// Parses and executes `input`, committing on clean termination and
/// rolling back on error. Resources are released either way.
pub fn run(proc: &mut Procedure, input: &str) -> EngineResult<()> {
    let result = run_inner(proc, input);
    if result.is_err() {
        txn::rollback(&mut proc.session);
    }
    txn::release_resources(&mut proc.session);
    result
}

fn run_inner(proc: &mut Procedure, input: &str) -> EngineResult<()> {
    let statements = crate::parser::parse(input)?;
    match proc.execute(&statements)? {
        Flow::Normal => {
            txn::commit(&mut proc.session)?;
            Ok(())
        }
        Flow::Exit(0) => Ok(()),
        Flow::Exit(code) => Err(EngineError::new(
            ErrorKind::ForcedExit(code),
            format!("exit with code {code}"),
        )),
        _ => Ok(()),
    }
}

/// `calc "<expr>"`: stdin is one delimited record bound as c1..cN.
pub fn calc(expr_src: &str, stdin_text: &str) -> EngineResult<String> {
    let expr = crate::parser::parse_expression(expr_src)?;
    let (delimiter, without_null) = with_flags_read(|f| (f.delimiter, f.without_null));
    let mut info = FileInfo::new(PathBuf::from("stdin"), Format::Csv);
    info.delimiter = delimiter;
    info.no_header = true;
    let table = codec::decode(&info, stdin_text.trim_end_matches('\n').as_bytes(), without_null)?;
    let view = View::from_decoded("stdin", table, info);
    let mut filter = crate::executor::scope::Filter::new(crate::procedure::system_now());
    let mut session = Session::captured();
    if let Some(record) = view.records.first() {
        filter.push_record(view.header.clone(), record.clone());
    }
    let value = eval(&expr, &mut filter, &mut session)?;
    Ok(match value {
        Value::Null => "NULL".to_string(),
        other => other.to_text(),
    })
}

/// `fields <file>`: prints the field list of one table.
pub fn fields(table_name: &str) -> EngineResult<String> {
    let mut session = Session::captured();
    let mut filter = crate::executor::scope::Filter::new(crate::procedure::system_now());
    let table = TableExpr::Table {
        name: table_name.to_string(),
        alias: None,
        loc: crate::error::SourceLocation::default(),
    };
    let view = load_table_expr(&table, &mut filter, &mut session)?;
    let text = commands::show_fields(table_name, &view);
    txn::release_resources(&mut session);
    Ok(text)
}

/// `syntax [words...]`: a compact statement reference, filtered by
/// keyword when arguments are given.
pub fn syntax(words: &[String]) -> String {
    const ENTRIES: &[(&str, &str)] = &[
        ("SELECT", "SELECT [DISTINCT] fields [FROM tables] [WHERE cond] [GROUP BY keys] [HAVING cond] [ORDER BY keys] [LIMIT n] [OFFSET n]"),
        ("INSERT", "INSERT INTO table [(columns)] VALUES (values)... | INSERT INTO table [(columns)] select_query"),
        ("UPDATE", "UPDATE table SET column = value [, ...] [WHERE cond]"),
        ("DELETE", "DELETE FROM table [WHERE cond]"),
        ("CREATE", "CREATE TABLE file [(columns)] [AS select_query]"),
        ("ALTER", "ALTER TABLE table ADD column [DEFAULT value] [FIRST|LAST|AFTER col|BEFORE col] | DROP column | RENAME column TO new"),
        ("VAR", "VAR @var [:= value] [, ...]"),
        ("DECLARE", "DECLARE name CURSOR FOR select_query | DECLARE name VIEW (columns) [AS select_query] | DECLARE name FUNCTION (@args) AS BEGIN statements END | DECLARE name AGGREGATE (cursor, @args) AS BEGIN statements END"),
        ("FETCH", "FETCH [NEXT|PRIOR|FIRST|LAST|ABSOLUTE n|RELATIVE n] cursor INTO @var [, ...]"),
        ("IF", "IF cond THEN statements [ELSEIF cond THEN statements] [ELSE statements] END IF"),
        ("WHILE", "WHILE cond DO statements END WHILE | WHILE @var [, ...] IN cursor DO statements END WHILE"),
        ("COMMIT", "COMMIT"),
        ("ROLLBACK", "ROLLBACK"),
        ("PRINT", "PRINT value | PRINTF format USING values | ECHO value"),
        ("SET", "SET @@flag TO value | ADD value TO @@flag | REMOVE value FROM @@flag | SHOW @@flag | SHOW [TABLES|VIEWS|CURSORS|FUNCTIONS|FLAGS|ENV|RUNINFO]"),
        ("TRIGGER", "TRIGGER ERROR [code] [message]"),
        ("SOURCE", "SOURCE file_path | EXECUTE format [USING values]"),
    ];
    let mut out = String::new();
    for (keyword, usage) in ENTRIES {
        let matched = words.is_empty()
            || words
                .iter()
                .any(|w| keyword.eq_ignore_ascii_case(w) || usage.to_ascii_uppercase().contains(&w.to_ascii_uppercase()));
        if matched {
            out.push_str(&format!("{keyword}\n    {usage}\n"));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_binds_stdin_fields() {
        crate::session::flags::with_flags_test_lock(|| {
            crate::session::flags::reset_flags_for_tests();
            assert_eq!(calc("base64_encode(c1)", "foo\n").unwrap(), "Zm9v");
            assert_eq!(calc("c1 + 100", "123\n").unwrap(), "223");
            assert_eq!(calc("c1 || '-' || c2", "a,b\n").unwrap(), "a-b");
        });
    }

    #[test]
    fn syntax_filters_by_keyword() {
        let all = syntax(&[]);
        assert!(all.contains("SELECT"));
        assert!(all.contains("TRIGGER"));
        let filtered = syntax(&["fetch".to_string()]);
        assert!(filtered.contains("FETCH"));
        assert!(!filtered.contains("TRIGGER ERROR"));
    }
}
