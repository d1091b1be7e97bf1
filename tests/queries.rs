//! End-to-end statement execution over real files in a scratch
//! directory. Tests serialize on the flags lock because session flags
//! are process-wide.

use csvql::parser::parse;
use csvql::procedure::{Flow, Procedure};
use csvql::session::flags::{reset_flags_for_tests, set_flag, with_flags_test_lock};
use csvql::session::Session;
use csvql::txn;
use csvql::value::Value;
use csvql::ErrorKind;

struct Scratch {
    _dir: tempfile::TempDir,
    proc: Procedure,
}

impl Scratch {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("scratch dir should be created");
        reset_flags_for_tests();
        set_flag(
            "REPOSITORY",
            &Value::String(dir.path().display().to_string()),
        )
        .unwrap();
        set_flag("QUIET", &Value::Boolean(true)).unwrap();
        Self {
            _dir: dir,
            proc: Procedure::new(Session::captured()),
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self._dir.path().join(name)
    }

    fn write_file(&self, name: &str, content: &str) {
        std::fs::write(self.path(name), content).unwrap();
    }

    fn execute(&mut self, src: &str) -> Result<Flow, csvql::EngineError> {
        let statements = parse(src)?;
        self.proc.execute(&statements)
    }

    fn output(&mut self) -> String {
        self.proc.session.take_captured_output().unwrap_or_default()
    }

    fn finish(mut self) {
        txn::release_resources(&mut self.proc.session);
        reset_flags_for_tests();
    }
}

fn table_rows(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|line| line.starts_with('|'))
        .skip(1)
        .map(|line| {
            line.trim_matches('|')
                .split('|')
                .map(|cell| cell.trim().to_string())
                .collect()
        })
        .collect()
}

#[test]
fn select_update_commit_cycle() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Sean\n");

        scratch.execute("SELECT id, name FROM users;").unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(
            rows,
            vec![
                vec!["1".to_string(), "Louis".to_string()],
                vec!["2".to_string(), "Sean".to_string()],
            ]
        );

        scratch
            .execute("UPDATE users SET name = 'Mildred' WHERE id = 2; COMMIT;")
            .unwrap();
        scratch.output();
        scratch.execute("SELECT name FROM users WHERE id = 2;").unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(rows, vec![vec!["Mildred".to_string()]]);

        let on_disk = std::fs::read_to_string(scratch.path("users.csv")).unwrap();
        assert_eq!(on_disk, "id,name\n1,Louis\n2,Mildred\n");
        scratch.finish();
    });
}

#[test]
fn update_without_commit_leaves_file_untouched() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n");
        scratch
            .execute("UPDATE users SET name = 'X' WHERE id = 1;")
            .unwrap();
        let on_disk = std::fs::read_to_string(scratch.path("users.csv")).unwrap();
        assert_eq!(on_disk, "id,name\n1,Louis\n");

        // Rollback discards the cached mutation as well.
        scratch.execute("ROLLBACK;").unwrap();
        scratch.output();
        scratch.execute("SELECT name FROM users;").unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["Louis".to_string()]]);
        scratch.finish();
    });
}

#[test]
fn variable_substitution_in_select() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Sean\n");
        scratch
            .execute("VAR @id := 0; SELECT @id := @id + 1 AS id, name FROM users;")
            .unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(
            rows,
            vec![
                vec!["1".to_string(), "Louis".to_string()],
                vec!["2".to_string(), "Sean".to_string()],
            ]
        );
        scratch.execute("PRINT @id;").unwrap();
        assert_eq!(scratch.output().trim(), "2");
        scratch.finish();
    });
}

#[test]
fn cursor_round_trip_matches_select_order() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Sean\n");
        scratch
            .execute(
                "VAR @a, @b; \
                 DECLARE cur CURSOR FOR SELECT id, name FROM users; \
                 OPEN cur; \
                 FETCH NEXT cur INTO @a, @b; PRINT @a; PRINT @b;",
            )
            .unwrap();
        assert_eq!(scratch.output(), "1\n'Louis'\n");

        scratch.execute("FETCH cur INTO @a, @b; PRINT @b;").unwrap();
        assert_eq!(scratch.output(), "'Sean'\n");

        scratch
            .execute(
                "FETCH cur INTO @a, @b; \
                 PRINT @a; \
                 PRINT CURSOR cur IS IN RANGE;",
            )
            .unwrap();
        assert_eq!(scratch.output(), "NULL\nFALSE\n");
        scratch.finish();
    });
}

#[test]
fn create_insert_commit_makes_file_visible() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch
            .execute("CREATE TABLE t.csv (a, b); INSERT INTO t.csv VALUES (1, 2), (3, 4);")
            .unwrap();
        scratch.execute("SELECT * FROM t.csv;").unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 2);
        assert!(!scratch.path("t.csv").exists());

        scratch.execute("COMMIT;").unwrap();
        let on_disk = std::fs::read_to_string(scratch.path("t.csv")).unwrap();
        assert_eq!(on_disk, "a,b\n1,2\n3,4\n");
        scratch.finish();
    });
}

#[test]
fn rollback_discards_created_table() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch
            .execute("CREATE TABLE gone.csv (x); INSERT INTO gone.csv VALUES (1); ROLLBACK;")
            .unwrap();
        assert!(!scratch.path("gone.csv").exists());
        let err = scratch.execute("SELECT * FROM gone.csv;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileNotExist);
        scratch.finish();
    });
}

#[test]
fn group_by_having_and_aggregates() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file(
            "sales.csv",
            "city,amount\nNY,10\nNY,20\nLA,5\nSF,1\nLA,15\n",
        );
        scratch
            .execute(
                "SELECT city, COUNT(*) AS c, SUM(amount) AS total FROM sales \
                 GROUP BY city HAVING COUNT(*) > 1 ORDER BY total DESC;",
            )
            .unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(
            rows,
            vec![
                vec!["NY".to_string(), "2".to_string(), "30".to_string()],
                vec!["LA".to_string(), "2".to_string(), "20".to_string()],
            ]
        );
        scratch.finish();
    });
}

#[test]
fn joins_and_set_operations() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Sean\n3,Mina\n");
        scratch.write_file("orders.csv", "user_id,item\n1,pen\n1,ink\n3,pad\n");

        scratch
            .execute(
                "SELECT name, item FROM users JOIN orders ON users.id = orders.user_id \
                 ORDER BY name, item;",
            )
            .unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["Louis".to_string(), "ink".to_string()]);

        scratch
            .execute(
                "SELECT name FROM users LEFT JOIN orders ON users.id = orders.user_id \
                 WHERE item IS NULL;",
            )
            .unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["Sean".to_string()]]);

        scratch
            .execute("SELECT 1 UNION SELECT 2 UNION SELECT 1;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 2);

        scratch
            .execute("SELECT id FROM users EXCEPT SELECT id FROM users;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 0);
        scratch.finish();
    });
}

#[test]
fn intersect_all_and_except_all_count_duplicates() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch
            .execute(
                "DECLARE l VIEW (n) AS SELECT 1 UNION ALL SELECT 1 UNION ALL SELECT 1; \
                 DECLARE r VIEW (n) AS SELECT 1;",
            )
            .unwrap();

        // min(3, 1) copies survive an INTERSECT ALL.
        scratch
            .execute("SELECT n FROM l INTERSECT ALL SELECT n FROM r;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 1);

        // max(3 - 1, 0) copies survive an EXCEPT ALL.
        scratch
            .execute("SELECT n FROM l EXCEPT ALL SELECT n FROM r;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 2);

        // Without ALL both collapse to one distinct row / none.
        scratch
            .execute("SELECT n FROM l INTERSECT SELECT n FROM r;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 1);
        scratch
            .execute("SELECT n FROM l EXCEPT ALL SELECT n FROM l;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()).len(), 0);
        scratch.finish();
    });
}

#[test]
fn failed_statement_drops_freshly_loaded_views() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n");

        // The statement loads users, then fails; the shell's error path
        // sweeps loads that were fresh to the failing input.
        let loaded = scratch.proc.session.cache.snapshot();
        let err = scratch
            .execute("SELECT id FROM users; TRIGGER ERROR 'late failure';")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Trigger(1));
        scratch
            .proc
            .session
            .cache
            .evict_fresh_since(&loaded, &scratch.proc.session.uncommitted);
        scratch.output();

        // With the stale entry gone, a retry sees the file as it is now.
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Mina\n");
        scratch.execute("SELECT name FROM users;").unwrap();
        assert_eq!(
            table_rows(&scratch.output()),
            vec![vec!["Louis".to_string()], vec!["Mina".to_string()]]
        );

        // A view loaded fresh by the failing input survives the sweep
        // when it carries uncommitted changes.
        scratch.write_file("orders.csv", "id\n1\n");
        let loaded = scratch.proc.session.cache.snapshot();
        scratch
            .execute("UPDATE orders SET id = 9; TRIGGER ERROR 'again';")
            .unwrap_err();
        scratch
            .proc
            .session
            .cache
            .evict_fresh_since(&loaded, &scratch.proc.session.uncommitted);
        scratch.execute("SELECT id FROM orders;").unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["9".to_string()]]);
        scratch.finish();
    });
}

#[test]
fn while_loop_and_control_flow() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch
            .execute(
                "VAR @i := 0, @sum := 0; \
                 WHILE @i < 10 DO \
                   @i := @i + 1; \
                   IF @i % 2 = 1 THEN CONTINUE; END IF; \
                   IF @i > 6 THEN BREAK; END IF; \
                   @sum := @sum + @i; \
                 END WHILE; \
                 PRINT @sum;",
            )
            .unwrap();
        // 2 + 4 + 6
        assert_eq!(scratch.output().trim(), "12");
        scratch.finish();
    });
}

#[test]
fn while_in_cursor_iterates_rows() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Sean\n");
        scratch
            .execute(
                "VAR @id, @name, @out := ''; \
                 DECLARE cur CURSOR FOR SELECT id, name FROM users; \
                 OPEN cur; \
                 WHILE @id, @name IN cur DO \
                   @out := @out || @id || ':' || @name || ';'; \
                 END WHILE; \
                 CLOSE cur; \
                 ECHO @out;",
            )
            .unwrap();
        assert_eq!(scratch.output().trim(), "1:Louis;2:Sean;");
        scratch.finish();
    });
}

#[test]
fn user_defined_scalar_and_aggregate_functions() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("sales.csv", "city,amount\nNY,10\nNY,30\nLA,5\n");
        scratch
            .execute(
                "DECLARE halve FUNCTION (@x) AS BEGIN RETURN @x / 2; END; \
                 SELECT halve(10) AS h FROM DUAL;",
            )
            .unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["5".to_string()]]);

        scratch
            .execute(
                "DECLARE second_max AGGREGATE (list) AS \
                 BEGIN \
                   VAR @v, @max, @second; \
                   WHILE @v IN list DO \
                     IF @max IS NULL OR @v > @max THEN \
                       @second := @max; @max := @v; \
                     ELSEIF @second IS NULL OR @v > @second THEN \
                       @second := @v; \
                     END IF; \
                   END WHILE; \
                   RETURN @second; \
                 END; \
                 SELECT second_max(amount) AS s FROM sales;",
            )
            .unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["10".to_string()]]);
        scratch.finish();
    });
}

#[test]
fn analytic_functions_over_partitions() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file(
            "sales.csv",
            "city,amount\nNY,10\nNY,20\nLA,5\nLA,15\n",
        );
        scratch
            .execute(
                "SELECT city, amount, \
                        ROW_NUMBER() OVER (PARTITION BY city ORDER BY amount DESC) AS rn, \
                        SUM(amount) OVER (PARTITION BY city ORDER BY amount) AS running \
                 FROM sales ORDER BY city, amount;",
            )
            .unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(
            rows,
            vec![
                vec!["LA".to_string(), "5".to_string(), "2".to_string(), "5".to_string()],
                vec!["LA".to_string(), "15".to_string(), "1".to_string(), "20".to_string()],
                vec!["NY".to_string(), "10".to_string(), "2".to_string(), "10".to_string()],
                vec!["NY".to_string(), "20".to_string(), "1".to_string(), "30".to_string()],
            ]
        );
        scratch.finish();
    });
}

#[test]
fn temporary_views_never_touch_disk() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch
            .execute(
                "DECLARE tmp VIEW (a, b); \
                 INSERT INTO tmp VALUES (1, 'x'), (2, 'y'); \
                 UPDATE tmp SET b = 'z' WHERE a = 2; \
                 SELECT b FROM tmp ORDER BY a; \
                 COMMIT;",
            )
            .unwrap();
        let rows = table_rows(&scratch.output());
        assert_eq!(rows, vec![vec!["x".to_string()], vec!["z".to_string()]]);
        assert!(!scratch.path("tmp").exists());
        assert!(!scratch.path("tmp.csv").exists());
        scratch.finish();
    });
}

#[test]
fn with_clause_binds_common_tables() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch
            .execute("WITH t (n) AS (SELECT 1 UNION ALL SELECT 2) SELECT SUM(n) AS s FROM t;")
            .unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["3".to_string()]]);
        scratch.finish();
    });
}

#[test]
fn alter_table_reshapes_columns() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n");
        scratch
            .execute(
                "ALTER TABLE users ADD age DEFAULT 0 AFTER id; \
                 ALTER TABLE users RENAME name TO full_name; \
                 SELECT * FROM users; \
                 COMMIT;",
            )
            .unwrap();
        scratch.output();
        let on_disk = std::fs::read_to_string(scratch.path("users.csv")).unwrap();
        assert_eq!(on_disk, "id,age,full_name\n1,0,Louis\n");

        scratch
            .execute("ALTER TABLE users DROP age; COMMIT;")
            .unwrap();
        let on_disk = std::fs::read_to_string(scratch.path("users.csv")).unwrap();
        assert_eq!(on_disk, "id,full_name\n1,Louis\n");
        scratch.finish();
    });
}

#[test]
fn trigger_error_carries_code_and_message() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        let err = scratch
            .execute("TRIGGER ERROR 73 'custom failure';")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Trigger(73));
        assert_eq!(err.code(), 73);
        assert!(err.message.contains("custom failure"));
        scratch.finish();
    });
}

#[test]
fn order_by_is_stable_with_nulls_placement() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("t.csv", "k,v\n1,a\n,b\n1,c\n0,d\n");
        scratch
            .execute("SELECT v FROM t ORDER BY k NULLS LAST;")
            .unwrap();
        let rows = table_rows(&scratch.output());
        // Equal keys keep input order: a before c; the null key sinks.
        assert_eq!(
            rows,
            vec![
                vec!["d".to_string()],
                vec!["a".to_string()],
                vec!["c".to_string()],
                vec!["b".to_string()],
            ]
        );
        scratch.finish();
    });
}

#[test]
fn insert_from_select_and_distinct() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("src.csv", "n\n1\n2\n2\n3\n");
        scratch
            .execute(
                "CREATE TABLE dst.csv (n) AS SELECT DISTINCT n FROM src; \
                 INSERT INTO dst.csv SELECT n + 10 FROM src WHERE n = 1; \
                 COMMIT;",
            )
            .unwrap();
        let on_disk = std::fs::read_to_string(scratch.path("dst.csv")).unwrap();
        assert_eq!(on_disk, "n\n1\n2\n3\n11\n");
        scratch.finish();
    });
}

#[test]
fn correlated_subquery_resolves_outer_fields() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("users.csv", "id,name\n1,Louis\n2,Sean\n");
        scratch.write_file("orders.csv", "user_id,item\n1,pen\n1,ink\n");
        scratch
            .execute(
                "SELECT name FROM users \
                 WHERE EXISTS (SELECT 1 FROM orders WHERE user_id = users.id);",
            )
            .unwrap();
        assert_eq!(table_rows(&scratch.output()), vec![vec!["Louis".to_string()]]);
        scratch.finish();
    });
}

#[test]
fn source_and_execute_run_nested_statements() {
    with_flags_test_lock(|| {
        let mut scratch = Scratch::new();
        scratch.write_file("setup.sql", "VAR @fromfile := 41;");
        let path = scratch.path("setup.sql").display().to_string();
        scratch
            .execute(&format!(
                "SOURCE '{path}'; PRINT @fromfile + 1; EXECUTE 'PRINT %s;' USING 7;"
            ))
            .unwrap();
        assert_eq!(scratch.output(), "42\n7\n");
        scratch.finish();
    });
}
