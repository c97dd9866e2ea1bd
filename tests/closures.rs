use vortex::run;
use vortex::value::Value;
use vortex::VortexError;

#[test]
fn test_basic_closure() {
    let source = r#"
        x := 'global';
        func makeClosure() {
            y := 'captured';
            func inner() => x ++ ' ' ++ y;
            return inner;
        }
        closure := makeClosure();
        return closure();
    "#;
    let result = run(source).expect("Analysis failed");
    match result {
        Value::String(s) => assert_eq!(s, "global captured"),
        _ => panic!("Expected string, got {:?}", result),
    }
}

#[test]
fn test_closures_capture_values() {
    // A closure keeps the value its variables had when it was created
    let source = r#"
        n := 1;
        f := func() => n;
        n = 2;
        return [f(), n];
    "#;
    let result = run(source).expect("Analysis failed");
    assert_eq!(result.to_string(), "[1, 2]");
}

#[test]
fn test_hoisted_function_sees_latest_values() {
    // A hoisted function closes over its block when it is used
    let source = r#"
        func current() => n;
        n := 1;
        a := current();
        n = 2;
        return [a, current()];
    "#;
    let result = run(source).expect("Analysis failed");
    assert_eq!(result.to_string(), "[1, 2]");
}

#[test]
fn test_adders_are_independent() {
    let source = r#"
        func adder(n) => func(x) => x + n;
        add1 := adder(1);
        add10 := adder(10);
        return [add1(5), add10(5), add1(0)];
    "#;
    let result = run(source).expect("Analysis failed");
    assert_eq!(result.to_string(), "[6, 15, 1]");
}

#[test]
fn test_captured_variable_cannot_be_mutated() {
    let source = r#"
        count := 0;
        func bump() {
            count++;
            return count;
        }
        return bump();
    "#;
    match run(source) {
        Err(VortexError::Rejected(notes)) => {
            assert!(notes.iter().any(|n| n.has_tag("capture-mutation")));
        }
        other => panic!("Expected rejection, got {:?}", other),
    }
}

#[test]
fn test_incomplete_closure_is_reported() {
    let source = r#"
        total := sum();
        func sum() => base + 1;
        base := 41;
        return total;
    "#;
    match run(source) {
        Err(VortexError::Rejected(notes)) => {
            let note = notes.iter().find(|n| n.has_tag("incomplete-closure")).unwrap();
            assert!(note.message.contains("it captures base"));
        }
        other => panic!("Expected rejection, got {:?}", other),
    }
}

#[test]
fn test_recursive_function_expression() {
    let source = r#"
        fib := func f(n) => switch {
            (n < 2) => n;
            true => f(n - 1) + f(n - 2);
        };
        return fib(15);
    "#;
    let result = run(source).expect("Analysis failed");
    assert_eq!(result, Value::Number(610.0));
}
