//! Macro invocation: argument parsing, qualified-name assembly, dispatch,
//! and outcome decoding.
//!
//! Script-level failures (the host's own error record) come back as a
//! [`MacroOutcome`] with `success == false`; they are expected outcomes,
//! not exceptions. Channel loss and unknown host codes stay errors.

use std::time::{Duration, Instant};

use excelctl_core::{hresult, Error, MacroOutcome, Result, Value};

use crate::host::Host;

/// The host's hard limit on macro arguments.
pub const MAX_MACRO_ARGS: usize = 30;

pub struct MacroRunner<'h> {
    host: &'h Host,
}

impl<'h> MacroRunner<'h> {
    pub(crate) fn new(host: &'h Host) -> Self {
        Self { host }
    }

    /// Assemble the qualified routine name.
    ///
    /// With a workbook, the workbook must be open (matched case-insensitively
    /// by display name) and its exact casing is preserved; the quotes are
    /// mandatory because the name may contain spaces or dots.
    pub fn qualify(&self, name: &str, workbook: Option<&str>) -> Result<String> {
        match workbook {
            None => Ok(name.to_string()),
            Some(needle) => {
                let wb = self.host.workbooks().resolve(Some(needle))?;
                let exact = wb.name().to_string();
                Ok(format!("'{exact}'!{name}"))
            }
        }
    }

    /// Run a macro and decode the outcome.
    ///
    /// The deadline is wall-clock: the channel has no in-flight cancellation,
    /// so an overrun is detected when the call returns and surfaced as an
    /// RPC failure.
    pub fn run(
        &self,
        name: &str,
        workbook: Option<&str>,
        args: &[Value],
        timeout: Option<Duration>,
    ) -> Result<MacroOutcome> {
        if args.len() > MAX_MACRO_ARGS {
            return Err(too_many_args(args.len()));
        }
        let qualified = self.qualify(name, workbook)?;
        let app = self.host.app()?;

        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Value::Text(qualified.clone()));
        call_args.extend_from_slice(args);

        let started = Instant::now();
        let result = self.host.chan().call(app, "Run", &call_args);

        if let Some(limit) = timeout {
            let elapsed = started.elapsed();
            if elapsed > limit {
                return Err(Error::RpcFailure {
                    code: 0,
                    detail: format!(
                        "macro '{}' exceeded the {}s deadline (took {:.1}s)",
                        qualified,
                        limit.as_secs(),
                        elapsed.as_secs_f64()
                    ),
                });
            }
        }

        match result {
            Ok(value) => Ok(MacroOutcome::success(qualified, value)),
            Err(e) if e.is_disconnect() => Err(e.into()),
            Err(e)
                if e.code == hresult::EXCEL_RUNTIME_ERROR
                    || e.code == hresult::DISP_E_EXCEPTION =>
            {
                let text = e
                    .description
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "unknown host-script error".to_string());
                Ok(MacroOutcome::script_failure(qualified, text))
            }
            Err(e) => Err(Error::MacroRunFailed {
                name: Some(qualified),
                reason: format!("host code (0x{:08X}): {}", e.code, e.reason()),
            }),
        }
    }
}

fn too_many_args(count: usize) -> Error {
    Error::MacroRunFailed {
        name: None,
        reason: format!("argument list has {count} entries; the host accepts at most {MAX_MACRO_ARGS}"),
    }
}

/// Parse a comma-separated macro argument list.
///
/// Element typing, in precedence order: double-quoted string, single-quoted
/// string, boolean literal, float (must contain a decimal point), integer,
/// bare string. Quoted elements keep embedded commas. There is no escape
/// convention inside quotes, so an element with interior quote characters
/// is rejected rather than guessed at.
pub fn parse_macro_args(input: &str) -> Result<Vec<Value>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let elements = split_elements(trimmed)?;
    if elements.len() > MAX_MACRO_ARGS {
        return Err(too_many_args(elements.len()));
    }
    elements.iter().map(|e| classify(e)).collect()
}

/// Split on commas outside quotes. Unterminated quotes are an error.
fn split_elements(input: &str) -> Result<Vec<String>> {
    let mut elements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => {
                    elements.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    if quote.is_some() {
        return Err(Error::MacroRunFailed {
            name: None,
            reason: "unterminated quote in argument list".to_string(),
        });
    }
    elements.push(current.trim().to_string());
    Ok(elements)
}

fn classify(element: &str) -> Result<Value> {
    for q in ['"', '\''] {
        if element.len() >= 2 && element.starts_with(q) && element.ends_with(q) {
            let inner = &element[1..element.len() - 1];
            if inner.contains(q) {
                return Err(Error::MacroRunFailed {
                    name: None,
                    reason: format!(
                        "argument {element} contains an embedded quote; there is no escape convention"
                    ),
                });
            }
            return Ok(Value::Text(inner.to_string()));
        }
    }
    if element.eq_ignore_ascii_case("true") {
        return Ok(Value::Bool(true));
    }
    if element.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(false));
    }
    if element.contains('.') {
        if let Ok(f) = element.parse::<f64>() {
            return Ok(Value::Number(f));
        }
    }
    if is_integer_literal(element) {
        if let Ok(n) = element.parse::<i32>() {
            return Ok(Value::Int(n));
        }
    }
    Ok(Value::Text(element.to_string()))
}

fn is_integer_literal(element: &str) -> bool {
    let digits = element
        .strip_prefix('+')
        .or_else(|| element.strip_prefix('-'))
        .unwrap_or(element);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Render a macro return value for display.
///
/// Void returns become `(no return value)`, dates are ISO-8601, and 2-D
/// arrays render as `Table RxC: [[..],[..]]`.
pub fn render_return(value: &Value) -> String {
    match value {
        Value::Empty | Value::Missing => "(no return value)".to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Value::Array(rows) => {
            let cols = rows.first().map(Vec::len).unwrap_or(0);
            format!("Table {}x{}: {}", rows.len(), cols, Value::Array(rows.clone()))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_mixed_arguments() {
        let parsed = parse_macro_args("\"hello, world\",42,3.14,true").unwrap();
        assert_eq!(
            parsed,
            vec![
                Value::Text("hello, world".to_string()),
                Value::Int(42),
                Value::Number(3.14),
                Value::Bool(true),
            ]
        );
    }

    #[test]
    fn test_parse_single_quotes_and_bare_strings() {
        let parsed = parse_macro_args("'a, b', plain, FALSE, -7, +3").unwrap();
        assert_eq!(
            parsed,
            vec![
                Value::Text("a, b".to_string()),
                Value::Text("plain".to_string()),
                Value::Bool(false),
                Value::Int(-7),
                Value::Int(3),
            ]
        );
    }

    #[test]
    fn test_escaped_quote_rejected() {
        // 'it''s ok' — no escape convention exists, so this is refused.
        let err = parse_macro_args("'it''s ok'").unwrap_err();
        assert!(matches!(err, Error::MacroRunFailed { name: None, .. }));
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        assert!(parse_macro_args("\"open").is_err());
    }

    #[test]
    fn test_thirty_one_arguments_rejected() {
        let input = (0..=30).map(|n| n.to_string()).collect::<Vec<_>>().join(",");
        let err = parse_macro_args(&input).unwrap_err();
        let Error::MacroRunFailed { name, reason } = err else {
            panic!("wrong error kind");
        };
        assert_eq!(name, None);
        assert!(reason.contains("31"));
        assert!(reason.contains("30"));
    }

    #[test]
    fn test_thirty_arguments_accepted() {
        let input = (0..30).map(|n| n.to_string()).collect::<Vec<_>>().join(",");
        assert_eq!(parse_macro_args(&input).unwrap().len(), 30);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_macro_args("").unwrap().is_empty());
        assert!(parse_macro_args("   ").unwrap().is_empty());
    }

    #[test]
    fn test_float_requires_decimal_point() {
        // "1e3" has no decimal point, so it stays a string.
        assert_eq!(
            parse_macro_args("1e3").unwrap(),
            vec![Value::Text("1e3".to_string())]
        );
        assert_eq!(parse_macro_args("-2.5").unwrap(), vec![Value::Number(-2.5)]);
    }

    #[test]
    fn test_integer_overflow_falls_back_to_string() {
        assert_eq!(
            parse_macro_args("99999999999999999999").unwrap(),
            vec![Value::Text("99999999999999999999".to_string())]
        );
    }

    #[test]
    fn test_render_return_forms() {
        assert_eq!(render_return(&Value::Empty), "(no return value)");
        assert_eq!(render_return(&Value::Text("hi".into())), "hi");
        assert_eq!(render_return(&Value::Bool(true)), "True");

        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(render_return(&Value::DateTime(dt)), "2024-03-01T09:30:00");

        let table = Value::Array(vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Int(3), Value::Int(4)],
        ]);
        assert_eq!(render_return(&table), "Table 2x2: [[1,2],[3,4]]");
    }

    proptest! {
        // Quoted elements always parse as strings with the quotes stripped.
        #[test]
        fn prop_quoted_is_verbatim_string(inner in "[a-zA-Z0-9 ,.]{0,20}") {
            let parsed = parse_macro_args(&format!("\"{inner}\"")).unwrap();
            prop_assert_eq!(parsed, vec![Value::Text(inner)]);
        }

        // Integer literals always parse as integers.
        #[test]
        fn prop_integers_type(n in -1_000_000i32..1_000_000) {
            let parsed = parse_macro_args(&n.to_string()).unwrap();
            prop_assert_eq!(parsed, vec![Value::Int(n)]);
        }

        // Literals with a decimal point always parse as floats.
        #[test]
        fn prop_floats_type(a in -10_000i32..10_000, b in 0u32..100) {
            let text = format!("{a}.{b:02}");
            let parsed = parse_macro_args(&text).unwrap();
            prop_assert!(matches!(parsed[0], Value::Number(_)));
        }

        // Boolean literals of any casing parse as booleans; every other bare
        // word is a string.
        #[test]
        fn prop_bare_words(word in "[a-zA-Z]{1,10}") {
            let parsed = parse_macro_args(&word).unwrap();
            match parsed[0] {
                Value::Bool(b) => {
                    let expected = if b { "true" } else { "false" };
                    prop_assert!(word.eq_ignore_ascii_case(expected));
                }
                Value::Text(ref s) => prop_assert_eq!(s, &word),
                _ => prop_assert!(false, "unexpected type"),
            }
        }

        // Element count is preserved up to the cap; beyond it parsing fails.
        #[test]
        fn prop_arg_cap(count in 1usize..40) {
            let input = vec!["1"; count].join(",");
            let result = parse_macro_args(&input);
            if count <= MAX_MACRO_ARGS {
                prop_assert_eq!(result.unwrap().len(), count);
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
