//! S-expression reader.
//!
//! Turns source text into [`Value`] data: integers (decimal and `#x` hex),
//! `#t`/`#f`, strings with `\n \t \r \\ \"` escapes, symbols, proper and
//! dotted lists, and the `'datum` shorthand for `(quote datum)`. Line
//! comments start with `;`.
//!
//! Errors are reported as [`ParseError`] values whose kind tells callers
//! such as a REPL whether more input could complete the expression.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace1, not_line_ending},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::{pair, preceded},
};

use crate::ast::{NumberType, SYMBOL_SPECIAL_CHARS, Value, is_valid_symbol};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

type ParseResult<'a, T> = IResult<&'a str, T>;

fn error_at(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Hard failure: stops `alt` from trying the remaining alternatives.
fn failure_at(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Whitespace and `;` line comments
fn ws(input: &str) -> ParseResult<'_, ()> {
    value(
        (),
        many0_count(alt((multispace1, preceded(char(';'), not_line_ending)))),
    )
    .parse(input)
}

/// An atom must be followed by whitespace, a paren, a quote, a comment or the end.
fn at_delimiter(input: &str) -> bool {
    input
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\''))
}

/// Parse a number (integer only, supports decimal and hexadecimal)
fn parse_number(input: &str) -> ParseResult<'_, Value> {
    alt((parse_hexadecimal, parse_decimal)).parse(input)
}

fn parse_decimal(input: &str) -> ParseResult<'_, Value> {
    let (rest, digits) = recognize(pair(
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;

    match digits.parse::<NumberType>() {
        Ok(n) => Ok((rest, Value::Number(n))),
        // Only overflow can get here; digits never form a symbol either
        Err(_) => Err(failure_at(input, ErrorKind::Digit)),
    }
}

/// Parse a hexadecimal number (#x or #X prefix)
fn parse_hexadecimal(input: &str) -> ParseResult<'_, Value> {
    let (rest, _) = char('#').parse(input)?;
    let (rest, _) = alt((char('x'), char('X'))).parse(rest)?;
    let (rest, hex_digits) = take_while1(|c: char| c.is_ascii_hexdigit()).parse(rest)?;

    match NumberType::from_str_radix(hex_digits, 16) {
        Ok(n) => Ok((rest, Value::Number(n))),
        Err(_) => Err(failure_at(input, ErrorKind::HexDigit)),
    }
}

fn parse_bool(input: &str) -> ParseResult<'_, Value> {
    alt((
        value(Value::Bool(true), tag("#t")),
        value(Value::Bool(false), tag("#f")),
    ))
    .parse(input)
}

fn parse_symbol(input: &str) -> ParseResult<'_, Value> {
    let (rest, candidate) =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
            .parse(input)?;

    if is_valid_symbol(candidate) {
        Ok((rest, Value::Symbol(candidate.into())))
    } else {
        Err(error_at(input, ErrorKind::Alpha))
    }
}

fn parse_string(input: &str) -> ParseResult<'_, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Value::String(text))),
            Some('\\') => {
                match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => return Err(failure_at(remaining, ErrorKind::Escaped)),
                    // Backslash at end of input: more text could still finish it
                    None => return Err(failure_at(chars.as_str(), ErrorKind::Char)),
                }
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            None => return Err(failure_at(remaining, ErrorKind::Char)),
        }
    }
}

fn parse_atom(input: &str) -> ParseResult<'_, Value> {
    let (rest, atom) = alt((parse_number, parse_bool, parse_string, parse_symbol)).parse(input)?;
    if at_delimiter(rest) {
        Ok((rest, atom))
    } else {
        Err(failure_at(rest, ErrorKind::Verify))
    }
}

/// `(a b c)`, `(a b . c)` or `()`
fn parse_list(input: &str, depth: usize) -> ParseResult<'_, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut elements = Vec::new();

    loop {
        let (rest, ()) = ws(input)?;

        if let Some(rest) = rest.strip_prefix(')') {
            return Ok((rest, Value::list(elements)));
        }

        if let Some(after_dot) = rest.strip_prefix('.')
            && at_delimiter(after_dot)
        {
            if elements.is_empty() {
                return Err(failure_at(rest, ErrorKind::Char));
            }
            let (after_tail, tail) = parse_sexpr(after_dot, depth + 1)?;
            let (after_tail, ()) = ws(after_tail)?;
            let Some(after_close) = after_tail.strip_prefix(')') else {
                return Err(failure_at(after_tail, ErrorKind::Char));
            };
            return Ok((after_close, Value::list_with_tail(elements, tail)));
        }

        let (rest, element) = parse_sexpr(rest, depth + 1)?;
        elements.push(element);
        input = rest;
    }
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize) -> ParseResult<'_, Value> {
    let (rest, _) = char('\'').parse(input)?;
    let (rest, ()) = ws(rest)?;
    let (rest, datum) = parse_sexpr(rest, depth + 1)?;
    Ok((rest, Value::list([Value::Symbol("quote".into()), datum])))
}

/// Parse one datum, with leading whitespace and comments skipped.
fn parse_sexpr(input: &str, depth: usize) -> ParseResult<'_, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(failure_at(input, ErrorKind::TooLarge));
    }
    let (input, ()) = ws(input)?;

    match input.chars().next() {
        Some('(') => parse_list(input, depth),
        Some('\'') => parse_quote(input, depth),
        Some(')') => Err(failure_at(input, ErrorKind::Char)),
        Some(_) => parse_atom(input),
        None => Err(error_at(input, ErrorKind::Eof)),
    }
}

/// Convert nom parsing errors to structured parse errors
fn to_parse_error(input: &str, error: &nom::Err<nom::error::Error<&str>>) -> ParseError {
    let e = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            return ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input");
        }
    };
    let position = input.len().saturating_sub(e.input.len());

    if e.code == ErrorKind::TooLarge {
        return ParseError::with_context(
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
            input,
            position,
        );
    }

    if e.input.is_empty() {
        return ParseError::with_context(
            ParseErrorKind::Incomplete,
            "Unexpected end of input",
            input,
            position,
        );
    }

    let message = match e.code {
        ErrorKind::Digit | ErrorKind::HexDigit => {
            format!("Integer literal out of range at position {position}")
        }
        ErrorKind::Escaped => format!("Unknown escape sequence at position {position}"),
        ErrorKind::Verify => format!("Missing delimiter after atom at position {position}"),
        ErrorKind::Char if e.input.starts_with(')') => {
            format!("Unexpected ')' at position {position}")
        }
        ErrorKind::Char if e.input.starts_with('.') => {
            format!("Dotted list needs an element before '.' at position {position}")
        }
        ErrorKind::Char => format!("Expected ')' at position {position}"),
        _ => {
            let near: String = e.input.chars().take(10).collect();
            format!("Invalid syntax near '{near}'")
        }
    };

    ParseError::with_context(ParseErrorKind::InvalidSyntax, message, input, position)
}

/// Parse exactly one datum; anything but whitespace or comments after it is an error.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    let (rest, datum) = parse_sexpr(input, 0).map_err(|e| to_parse_error(input, &e))?;
    let (rest, ()) = ws(rest).map_err(|e| to_parse_error(input, &e))?;

    if rest.is_empty() {
        Ok(datum)
    } else {
        let position = input.len() - rest.len();
        Err(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input at position {position}"),
            input,
            position,
        )
        .into())
    }
}

/// Parse a whole program: zero or more top-level data.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    let mut forms = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, ()) = ws(remaining).map_err(|e| to_parse_error(input, &e))?;
        if rest.is_empty() {
            return Ok(forms);
        }
        let (rest, datum) = parse_sexpr(rest, 0).map_err(|e| to_parse_error(input, &e))?;
        forms.push(datum);
        remaining = rest;
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use pretty_assertions::assert_eq;

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),               // Parsing should succeed with this value
        Kind(ParseErrorKind),         // Parsing should fail with this kind of error
        SpecificError(&'static str),  // Parsing should fail with error containing this string
    }
    use ParseTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    fn quoted(datum: Value) -> Value {
        val(vec![sym("quote"), datum])
    }

    /// Run parse tests, checking that every successful result also survives
    /// a display -> parse round trip.
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{} ({input:?})", i + 1);
            let result = parse_scheme(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");

                    let displayed = format!("{actual}");
                    let reparsed = parse_scheme(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(reparsed, actual, "{test_id}: round-trip mismatch");
                }
                (Err(Error::ParseError(err)), Kind(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: wrong error kind ({err})");
                }
                (Err(err), SpecificError(expected_text)) => {
                    let error_msg = format!("{err}");
                    assert!(
                        error_msg.contains(expected_text),
                        "{test_id}: error '{error_msg}' should contain '{expected_text}'"
                    );
                }
                (Ok(actual), _) => panic!("{test_id}: expected error, got {actual:?}"),
                (Err(err), _) => panic!("{test_id}: unexpected result {err:?}"),
            }
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // ===== NUMBERS =====
            ("42", success(42)),
            ("-17", success(-17)),
            ("0", success(0)),
            ("#x1F", success(31)),
            ("#XfF", success(255)),
            ("9223372036854775807", success(i64::MAX)),
            ("-9223372036854775808", success(i64::MIN)),
            ("9223372036854775808", SpecificError("out of range")),
            ("#xFFFFFFFFFFFFFFFFFF", SpecificError("out of range")),
            ("123abc", SpecificError("Missing delimiter")),
            // ===== BOOLEANS =====
            ("#t", success(true)),
            ("#f", success(false)),
            ("#true", Kind(ParseErrorKind::InvalidSyntax)),
            // ===== SYMBOLS =====
            ("foo", success(sym("foo"))),
            ("+", success(sym("+"))),
            ("-", success(sym("-"))),
            ("<=", success(sym("<="))),
            ("null?", success(sym("null?"))),
            ("assert-eq", success(sym("assert-eq"))),
            ("-abc", success(sym("-abc"))),
            ("x1", success(sym("x1"))),
            ("#foo", Kind(ParseErrorKind::InvalidSyntax)),
            // ===== STRINGS =====
            (r#""hello""#, success("hello")),
            (r#""""#, success("")),
            (r#""a\nb\t\"c\"\\""#, success("a\nb\t\"c\"\\")),
            (r#""bad \q escape""#, SpecificError("Unknown escape")),
            (r#""unterminated"#, Kind(ParseErrorKind::Incomplete)),
            ("\"trailing backslash\\", Kind(ParseErrorKind::Incomplete)),
            // ===== LISTS =====
            ("()", Success(nil())),
            ("( )", Success(nil())),
            ("(1 2 3)", success([1, 2, 3])),
            ("(+ 1 2)", success(vec![sym("+"), val(1), val(2)])),
            ("(a (b c) ())", success(vec![sym("a"), val(vec![sym("b"), sym("c")]), nil()])),
            ("(1 . 2)", Success(Value::cons(1, 2))),
            ("(1 2 . 3)", Success(Value::list_with_tail([val(1), val(2)], val(3)))),
            ("(1 . (2 3))", success([1, 2, 3])),
            ("(1 . ())", success([1])),
            ("( . 2)", Kind(ParseErrorKind::InvalidSyntax)),
            ("(1 . 2 3)", SpecificError("Expected ')'")),
            ("(1 2", Kind(ParseErrorKind::Incomplete)),
            ("(1 (2 3)", Kind(ParseErrorKind::Incomplete)),
            ("(1 .", Kind(ParseErrorKind::Incomplete)),
            (")", SpecificError("Unexpected ')'")),
            ("(1 2))", Kind(ParseErrorKind::TrailingContent)),
            ("(\"a\"\"b\")", success(["a", "b"])),
            ("(f'x)", success(vec![sym("f"), quoted(sym("x"))])),
            // ===== QUOTE =====
            ("'x", Success(quoted(sym("x")))),
            ("'()", Success(quoted(nil()))),
            ("'(1 . 2)", Success(quoted(Value::cons(1, 2)))),
            ("' (a b)", Success(quoted(val(vec![sym("a"), sym("b")])))),
            ("''a", Success(quoted(quoted(sym("a"))))),
            ("(quote x)", Success(quoted(sym("x")))),
            ("'", Kind(ParseErrorKind::Incomplete)),
            // ===== WHITESPACE AND COMMENTS =====
            ("  42  ", success(42)),
            ("\n\t(1\n 2)\n", success([1, 2])),
            ("; leading comment\n7", success(7)),
            ("(1 ; inner comment\n 2)", success([1, 2])),
            ("8 ; trailing comment", success(8)),
            ("(1 ; unclosed", Kind(ParseErrorKind::Incomplete)),
            // ===== EMPTY AND TRAILING =====
            ("", Kind(ParseErrorKind::Incomplete)),
            ("   ", Kind(ParseErrorKind::Incomplete)),
            ("1 2", Kind(ParseErrorKind::TrailingContent)),
            ("a b", Kind(ParseErrorKind::TrailingContent)),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parser_depth_limits() {
        let nested_ok = format!(
            "{}{}",
            "(".repeat(MAX_PARSE_DEPTH - 1),
            ")".repeat(MAX_PARSE_DEPTH - 1)
        );
        assert!(parse_scheme(&nested_ok).is_ok());

        let too_deep = format!("{}{}", "(".repeat(300), ")".repeat(300));
        match parse_scheme(&too_deep) {
            Err(Error::ParseError(err)) => {
                assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested);
                assert!(err.message.contains("too deeply nested"));
            }
            other => panic!("expected depth error, got {other:?}"),
        }

        let deep_quotes = format!("{}x", "'".repeat(300));
        assert!(matches!(
            parse_scheme(&deep_quotes),
            Err(Error::ParseError(ParseError {
                kind: ParseErrorKind::TooDeeplyNested,
                ..
            }))
        ));
    }

    #[test]
    fn test_parse_program() {
        let program = "; header\n(define x 1)\n(define (f y) (+ x y))\n\n(f 2) ; call\n";
        let forms = parse_program(program).unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0], val(vec![sym("define"), sym("x"), val(1)]));
        assert_eq!(forms[2], val(vec![sym("f"), val(2)]));

        assert_eq!(parse_program("").unwrap(), vec![]);
        assert_eq!(parse_program("  ; only a comment").unwrap(), vec![]);
        assert_eq!(parse_program("1 #t \"s\"").unwrap(), vec![val(1), val(true), val("s")]);

        let err = parse_program("(define x 1)\n(define y").unwrap_err();
        assert!(matches!(&err, Error::ParseError(e) if e.is_incomplete()), "{err:?}");

        let err = parse_program("(a))").unwrap_err();
        assert!(matches!(
            &err,
            Error::ParseError(ParseError {
                kind: ParseErrorKind::InvalidSyntax,
                ..
            })
        ));
    }

    #[test]
    fn test_error_context() {
        let Err(Error::ParseError(err)) = parse_scheme("(foo bar 12x baz)") else {
            panic!("expected parse error");
        };
        assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
        assert_eq!(err.found.as_deref(), Some("x"));
        assert!(err.context.unwrap().contains("12x"));

        let Err(Error::ParseError(err)) = parse_scheme("(1 2") else {
            panic!("expected parse error");
        };
        assert!(err.is_incomplete());
        assert_eq!(err.found, None);
    }
}
