mod common;

use common::SharedBuf;
use skiff::{Interpreter, Options};

fn repl_over(input: &str) -> (String, String) {
    let out = SharedBuf::new();
    let errs = SharedBuf::new();
    let interp = Interpreter::new(Options {
        stdin: Some(Box::new(std::io::Cursor::new(input.to_string().into_bytes()))),
        stdout: Some(Box::new(out.clone())),
        stderr: Some(Box::new(errs.clone())),
        tty: Some(true),
        ..Options::default()
    });
    interp.repl().expect("repl");
    (out.contents(), errs.contents())
}

#[test]
fn evaluates_a_line_and_prints_the_value_and_prompt() {
    let (out, errs) = repl_over("1+2\n");
    assert!(out.contains(": 3\n> "), "output was {out:?}");
    assert_eq!(errs, "");
}

#[test]
fn accumulates_lines_until_the_input_parses() {
    let (out, errs) = repl_over("func f() int {\nreturn 21\n}\nf() * 2\n");
    assert!(out.contains(": 42\n> "), "output was {out:?}");
    assert_eq!(errs, "");
}

#[test]
fn silent_lines_print_only_the_prompt() {
    let (out, _) = repl_over("x := 5\n");
    assert!(!out.contains(": "), "output was {out:?}");
    assert!(out.ends_with("> "), "output was {out:?}");
}

#[test]
fn state_carries_from_line_to_line() {
    let (out, errs) = repl_over("x := 6\nx * 7\n");
    assert!(out.contains(": 42\n> "), "output was {out:?}");
    assert_eq!(errs, "");
}

#[test]
fn parse_errors_are_reported_and_the_loop_continues() {
    let (out, errs) = repl_over(")\n1+1\n");
    assert!(errs.contains("expected operand"), "errors were {errs:?}");
    assert!(out.contains(": 2\n> "), "output was {out:?}");
}

#[test]
fn prompts_are_suppressed_for_non_terminal_input() {
    let out = SharedBuf::new();
    let interp = Interpreter::new(Options {
        stdin: Some(Box::new(std::io::Cursor::new(b"1+2\n".to_vec()))),
        stdout: Some(Box::new(out.clone())),
        stderr: Some(Box::new(SharedBuf::new())),
        tty: Some(false),
        ..Options::default()
    });
    interp.repl().expect("repl");
    assert_eq!(out.contents(), "");
}

#[test]
fn raw_string_continuation_uses_the_lexer_signature() {
    let (out, errs) = repl_over("s := `one\ntwo`\nlen(s)\n");
    assert!(errs.is_empty(), "errors were {errs:?}");
    assert!(out.contains(": 7\n> "), "output was {out:?}");
}
