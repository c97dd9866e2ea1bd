use std::fs;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use vortex::value::Value;
use vortex::{
    compile, run, run_with, CompileOptions, Compilation, FsReader, Level, MemoryReader, Note,
    Outcome, VortexError, MAIN_FILE,
};

fn render(source: &str) -> String {
    match run(source) {
        Ok(value) => value.to_string(),
        Err(e) => panic!("Analysis failed: {}", e),
    }
}

fn uncaught(source: &str) -> Note {
    match run(source) {
        Err(VortexError::Uncaught(note)) => *note,
        other => panic!("Expected an uncaught exception, got {:?}", other),
    }
}

fn rejected(source: &str) -> Vec<Note> {
    match run(source) {
        Err(VortexError::Rejected(notes)) => notes,
        other => panic!("Expected rejection, got {:?}", other),
    }
}

fn compile_package(files: &[(&str, &str)]) -> Compilation {
    let mut reader = MemoryReader::new();
    for (file, text) in files {
        reader.insert(*file, *text);
    }
    compile(&[files[0].0.to_string()], &reader, &CompileOptions::default())
}

#[test]
fn test_copies_never_alias() {
    let source = r#"
        x := [5, 6, 7];
        y := x;
        y[1] *= 10;
        return [x, y];
    "#;
    assert_eq!(render(source), "[[5, 6, 7], [5, 60, 7]]");

    let source = r#"
        config := {retries: 3, hosts: ['a', 'b']};
        copy := config;
        copy.hosts[0] = 'z';
        copy.retries++;
        return [config, copy];
    "#;
    assert_eq!(
        render(source),
        "[{hosts: ['a', 'b'], retries: 3}, {hosts: ['z', 'b'], retries: 4}]"
    );
}

#[test]
fn test_matrix_multiplication() {
    assert_eq!(render("return [[1, 2], [3, 4]] * [[5], [6]];"), "[[17], [39]]");
    assert_eq!(render("return [1, 2, 3]:Row() * [1, 2, 3]:Column();"), "[[14]]");

    let note = uncaught("return [[1, 2]] * [[1, 2]];");
    assert!(note.has_tag("type-error"));
    assert!(note.has_tag("matrix-multiplication"));
    assert_eq!(
        note.message,
        "Type error: cannot multiply a 1x2 matrix by a 1x2 matrix"
    );
}

#[test]
fn test_object_concatenation() {
    assert_eq!(render("return {a: 1} ++ {b: 2};"), "{a: 1, b: 2}");

    let note = uncaught("return {a: 1} ++ {a: 2};");
    assert!(note.has_tag("duplicate-key"));
}

#[test]
fn test_deep_tail_recursion() {
    let source = r#"
        func count(n, total) {
            if (n == 0) {
                return total;
            }
            return count(n - 1, total + 2);
        }
        return count(1000000, 0);
    "#;
    assert_eq!(run(source).expect("Analysis failed"), Value::Number(2000000.0));
}

#[test]
fn test_runaway_recursion_hits_step_limit() {
    let source = "func spin(n) => spin(n + 1);\nreturn spin(0);";
    let options = CompileOptions {
        step_limit: Some(10_000),
    };
    match run_with(source, &options) {
        Err(VortexError::Uncaught(note)) => {
            assert!(note.has_tag("step-limit"));
            assert_eq!(note.message, "Step limit reached: 10000");
        }
        other => panic!("Expected step limit, got {:?}", other),
    }
}

#[test]
fn test_hoisting() {
    assert_eq!(
        render("x := doublePlus1(10); func doublePlus1(y) => 2 * y + 1; return x;"),
        "21"
    );

    let notes = rejected("x := double(10); double := func(y) => 2 * y; return x;");
    assert!(notes.iter().any(|n| n.has_tag("not-found")));
}

#[test]
fn test_closure_used_before_capture_exists() {
    let notes = rejected("x := f(); func f() => y; y := 1; return x;");
    let note = notes.iter().find(|n| n.has_tag("incomplete-closure")).unwrap();
    assert_eq!(note.pos.line(), Some(1));
}

#[test]
fn test_mutual_imports_inside_functions() {
    let c = compile_package(&[
        ("@/main.vx", "import a;\nreturn a.f(3);"),
        (
            "@/a.vx",
            "import b;\n\
             func f(n) => switch {\n  (n == 0) => 'done';\n  true => b.g(n - 1);\n};\n\
             return {f};",
        ),
        ("@/b.vx", "import a;\nfunc g(n) => a.f(n);\nreturn {g};"),
    ]);

    assert!(!c.has_errors(), "{}", c.render_notes(Level::Error));
    assert_eq!(
        c.outcome(MAIN_FILE),
        Some(&Outcome::Value(Value::string("done")))
    );
}

#[test]
fn test_eager_import_loop() {
    let c = compile_package(&[
        ("@/main.vx", "import a;\nreturn a;"),
        ("@/a.vx", "import main;\nreturn main + 1;"),
    ]);

    assert_eq!(
        c.outcome(MAIN_FILE),
        Some(&Outcome::Value(Value::Unknown(Level::Error)))
    );
    let note = c.notes.iter().find(|n| n.has_tag("import-loop")).unwrap();
    assert_eq!(note.pos.file, "@/a.vx");
}

#[test]
fn test_import_exception_is_traced_at_import_site() {
    let c = compile_package(&[
        ("@/main.vx", "import lib;\nreturn lib;"),
        ("@/lib.vx", "empty := [];\nreturn empty[0];"),
    ]);

    let Some(Outcome::Exception(ex)) = c.outcome(MAIN_FILE) else {
        panic!("expected an exception");
    };
    assert!(ex.has_tag("out-of-bounds"));

    let note = ex.clone().into_note(vortex::Pos::file(MAIN_FILE));
    assert_eq!(note.pos.file, "@/lib.vx");
    assert!(note
        .subnotes
        .iter()
        .any(|n| n.pos.file == MAIN_FILE && n.pos.line() == Some(2)));
}

#[test]
fn test_one_trace_per_line() {
    let source = "if (true) { if (true) { if (true) { if (true) { if (true) { \
                  x := [1][3]; } } } } }\nreturn 0;";
    let note = uncaught(source);

    assert!(note.has_tag("out-of-bounds"));
    assert_eq!(note.pos.line(), Some(1));
    assert_eq!(
        note.subnotes.iter().filter(|n| n.pos.line() == Some(1)).count(),
        1
    );
}

#[test]
fn test_long_string_round_trip() {
    let source = r#"
        return {
            name: 'round \'trip\'',
            matrix: [[1.5, -2], [3, 4]],
            nested: {flags: [true, false, null], 'odd key': 'x'},
            words: ['alpha', 'beta', 'gamma', 'delta', 'epsilon'],
        };
    "#;
    let first = run(source).expect("Analysis failed");
    let text = first.long_string();
    assert!(text.contains('\n'), "expected multi-line form: {}", text);

    let second = run(&format!("return {};", text)).expect("Re-parse failed");
    assert_eq!(second, first);
    assert_eq!(second.long_string(), text);
}

#[test]
fn test_tutorial_program() {
    let source = r#"
        func isPrime(n) {
            if (n < 2) {
                return false;
            }
            for (d := 2; d * d <= n; d++) {
                if (n % d == 0) {
                    return false;
                }
            }
            return true;
        }

        numbers := [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        primes := numbers:filter(isPrime);
        squares := primes:map(func(p) => p ** 2);

        return {
            primes,
            total: squares:reduce(+),
            labels: primes:map(func(p, i) => i:String() ++ ':' ++ p:String()),
        };
    "#;
    assert_eq!(
        render(source),
        "{labels: ['0:2', '1:3', '2:5', '3:7', '4:11'], primes: [2, 3, 5, 7, 11], total: 208}"
    );
}

#[test]
fn test_methods_and_destructuring() {
    let source = r#"
        grid := [[1, 2, 3], [4, 5, 6]];
        [first, second] := grid:Transpose():Head();
        {a, b: renamed} := {a: 'x', b: 'y'};
        return [first, second, a ++ renamed, grid:Last():Length()];
    "#;
    assert_eq!(render(source), "[[1, 4], [2, 5], 'xy', 3]");
}

#[test]
fn test_mixed_type_equality_throws() {
    let note = uncaught("x := 1;\nreturn x == 'one';");
    assert!(note.has_tag("type-error"));
    assert_eq!(note.pos.line(), Some(2));
}

#[test]
fn test_log_notes_are_collected() {
    let c = compile_package(&[("@/main.vx", "x := [1, 2];\nlog.info x:Length();\nreturn x;")]);
    let note = c.notes.iter().find(|n| n.has_tag("log")).unwrap();
    assert_eq!(note.level, Level::Info);
    assert_eq!(note.message, "2");
    assert!(!c.has_errors());
}

#[test]
fn test_package_on_disk() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(dir.path().join(".vxpackage"), "").unwrap();
    fs::write(
        dir.path().join("main.vx"),
        "import ./lib/messages.vx;\nreturn messages.greet('disk');",
    )
    .unwrap();
    fs::write(
        dir.path().join("lib").join("messages.vx"),
        "func greet(who) => 'hello ' ++ who;\nreturn {greet};",
    )
    .unwrap();

    let (reader, entry) = FsReader::discover(&dir.path().join("main.vx")).unwrap();
    assert_eq!(entry, "@/main.vx");

    let c = compile(&[entry.clone()], &reader, &CompileOptions::default());
    assert!(!c.has_errors(), "{}", c.render_notes(Level::Error));
    assert_eq!(
        c.outcome(&entry),
        Some(&Outcome::Value(Value::string("hello disk")))
    );
    assert!(c.source("@/lib/messages.vx").is_some());
}

#[test]
fn test_missing_import_on_disk() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("main.vx"), "import nowhere;\nreturn nowhere;").unwrap();

    let (reader, entry) = FsReader::discover(&dir.path().join("main.vx")).unwrap();
    let c = compile(&[entry], &reader, &CompileOptions::default());

    assert!(c.has_errors());
    assert!(c
        .notes
        .iter()
        .any(|n| n.message.contains("Import not found: @/nowhere.vx")));
}
