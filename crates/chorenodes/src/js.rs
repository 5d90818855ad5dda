//! Embedded JavaScript bridge used by Script, IfCase and ForLoop nodes.
//!
//! Values cross the boundary as JSON literals; every evaluation runs in a
//! fresh boa context on the blocking pool.

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue, NativeFunction, Source};
use chorecore::NodeError;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const PRELUDE: &str = r#"
var __side = null;
var __attachments = [];
function setValue(v) { __side = (v === undefined) ? null : v; }
function setAttachment(name, content) {
    __attachments.push([String(name), toString(content)]);
}
function toObject(v) {
    if (typeof v !== 'string') { return v; }
    try { return JSON.parse(v); } catch (e) { return v; }
}
function toString(v) {
    if (typeof v === 'string') { return v; }
    if (v === undefined || v === null) { return ''; }
    return JSON.stringify(v);
}
"#;

/// Upper bound of one uninterrupted wait inside `sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

thread_local! {
    /// Cancellation of the run whose script occupies this blocking thread.
    static RUN_CANCEL: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// Result of calling a script's `main` function.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptOutcome {
    /// False when the script threw or `main` could not be called
    pub ok: bool,
    /// Return value, or the thrown value on failure
    #[serde(default)]
    pub value: JsonValue,
    /// Value passed to `setValue`
    #[serde(default)]
    pub side: JsonValue,
    /// `(name, content)` pairs passed to `setAttachment`, in call order
    #[serde(default)]
    pub attachments: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct Evaluated {
    #[serde(default)]
    value: JsonValue,
    truthy: bool,
}

/// Run `main(args...)` defined by `script`.
///
/// `request` is exposed to the script as the `request` global. `sleep`
/// returns early once `cancel` fires. Exceptions thrown by the script are
/// reported through `ScriptOutcome::ok`; only a script that cannot be
/// loaded at all returns an error.
pub async fn run_main(
    script: String,
    args: Vec<JsonValue>,
    request: JsonValue,
    cancel: CancellationToken,
) -> Result<ScriptOutcome, NodeError> {
    let code = format!(
        r#"
{PRELUDE}
var request = {request};
{script}
(function() {{
    var __result = {{ ok: true, value: null }};
    try {{
        var __value = main.apply(null, {args});
        __result.value = (__value === undefined) ? null : __value;
    }} catch (e) {{
        __result.ok = false;
        __result.value = (e instanceof Error) ? String(e) : ((e === undefined) ? null : e);
    }}
    __result.side = __side;
    __result.attachments = __attachments;
    return JSON.stringify(__result);
}})();
"#,
        request = literal(&request),
        args = literal(&JsonValue::Array(args)),
    );

    let raw = eval_blocking(code, Some(cancel)).await?;
    serde_json::from_str(&raw)
        .map_err(|e| NodeError::Script(format!("invalid script result: {}", e)))
}

/// Evaluate `expression` with the incoming value bound to `data`.
///
/// The completion value of the expression is used. When the text is only
/// valid as a function body, e.g. it has a top-level `return`, it is run
/// as one and its return value is used instead.
pub async fn evaluate(expression: &str, data: &JsonValue) -> Result<JsonValue, NodeError> {
    Ok(evaluate_inner(expression, data).await?.value)
}

/// Evaluate `expression` and apply JavaScript truthiness to the result.
pub async fn evaluate_bool(expression: &str, data: &JsonValue) -> Result<bool, NodeError> {
    Ok(evaluate_inner(expression, data).await?.truthy)
}

async fn evaluate_inner(expression: &str, data: &JsonValue) -> Result<Evaluated, NodeError> {
    let code = format!(
        r#"
{PRELUDE}
var data = {data};
(function() {{
    var __source = {source};
    var __value;
    try {{
        __value = eval(__source);
    }} catch (e) {{
        if (!(e instanceof SyntaxError)) {{ throw e; }}
        __value = eval('(function() {{\n' + __source + '\n}})()');
    }}
    return JSON.stringify({{ value: (__value === undefined) ? null : __value, truthy: !!__value }});
}})();
"#,
        data = literal(data),
        source = literal(&JsonValue::String(expression.to_string())),
    );

    let raw = eval_blocking(code, None).await?;
    serde_json::from_str(&raw)
        .map_err(|e| NodeError::Script(format!("invalid expression result: {}", e)))
}

async fn eval_blocking(
    code: String,
    cancel: Option<CancellationToken>,
) -> Result<String, NodeError> {
    tokio::task::spawn_blocking(move || {
        let with_sleep = cancel.is_some();
        RUN_CANCEL.with(|slot| *slot.borrow_mut() = cancel);
        let result = eval_in_context(&code, with_sleep);
        RUN_CANCEL.with(|slot| slot.borrow_mut().take());
        result
    })
    .await
    .map_err(|e| NodeError::Script(format!("script task failed: {}", e)))?
}

fn eval_in_context(code: &str, with_sleep: bool) -> Result<String, NodeError> {
    let mut context = Context::default();
    if with_sleep {
        register_sleep(&mut context).map_err(|e| NodeError::Script(e.to_string()))?;
    }

    let result = context
        .eval(Source::from_bytes(code.as_bytes()))
        .map_err(|e| NodeError::Script(e.to_string()))?;

    result
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| NodeError::Script("script did not produce a result".to_string()))
}

fn register_sleep(context: &mut Context) -> JsResult<()> {
    let function = NativeFunction::from_fn_ptr(script_sleep);
    let sleep = FunctionObjectBuilder::new(context.realm(), function)
        .name(js_string!("sleep"))
        .length(1)
        .constructor(false)
        .build();
    context.register_global_property(js_string!("sleep"), sleep, Attribute::all())?;
    Ok(())
}

/// `sleep(duration)`: a duration string such as `"1.5s"` or `"200ms"`, or a
/// number of milliseconds. Returns early when the run is canceled.
fn script_sleep(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let arg = args.first().cloned().unwrap_or_else(JsValue::undefined);
    let duration = match arg.as_number() {
        Some(ms) => Duration::from_millis(ms.max(0.0) as u64),
        None => {
            let raw = arg.to_string(context)?.to_std_string_escaped();
            parse_duration(&raw).ok_or_else(|| {
                JsNativeError::typ().with_message(format!("sleep: invalid duration {:?}", raw))
            })?
        }
    };

    let cancel = RUN_CANCEL.with(|slot| slot.borrow().clone());
    let deadline = Instant::now() + duration;
    loop {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!("sleep interrupted by cancellation");
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }

    Ok(JsValue::undefined())
}

/// Parse durations like `300ms`, `1.5s` or `1h2m3s`.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw == "0" {
        return Some(Duration::ZERO);
    }
    if raw.is_empty() {
        return None;
    }

    let mut nanos = 0.0;
    let mut rest = raw;
    while !rest.is_empty() {
        let unit_start = rest.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
        let (number, tail) = rest.split_at(unit_start);
        let number: f64 = number.parse().ok()?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };

        nanos += number * scale;
        rest = next;
    }

    Some(Duration::from_nanos(nanos.round() as u64))
}

/// JSON text is a valid JavaScript literal.
fn literal(value: &JsonValue) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn main_receives_ordered_arguments() {
        let outcome = run_main(
            "function main(a, b) { return a + '-' + b.x; }".into(),
            vec![json!("hi"), json!({"x": 1})],
            JsonValue::Null,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.ok);
        assert_eq!(outcome.value, json!("hi-1"));
        assert_eq!(outcome.side, JsonValue::Null);
    }

    #[tokio::test]
    async fn thrown_errors_are_reported() {
        let outcome = run_main(
            "function main() { setValue({k: 2}); throw new Error('bad input'); }".into(),
            vec![],
            JsonValue::Null,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!outcome.ok);
        assert_eq!(outcome.value, json!("Error: bad input"));
        assert_eq!(outcome.side, json!({"k": 2}));
    }

    #[tokio::test]
    async fn helpers_and_request_are_available() {
        let outcome = run_main(
            "function main(a) { return toObject(a).n + request.input_1.status; }".into(),
            vec![json!("{\"n\": 1}")],
            json!({"input_1": {"status": 200}}),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.value, json!(201));
    }

    #[tokio::test]
    async fn syntax_errors_fail_to_load() {
        let err = run_main(
            "function main( {".into(),
            vec![],
            JsonValue::Null,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(err, Err(NodeError::Script(_))));
    }

    #[tokio::test]
    async fn expressions_and_function_bodies() {
        assert_eq!(
            evaluate("data.items.length", &json!({"items": [1, 2]}))
                .await
                .unwrap(),
            json!(2)
        );
        assert_eq!(
            evaluate("return [1, 2, 3]", &JsonValue::Null).await.unwrap(),
            json!([1, 2, 3])
        );
        assert!(evaluate_bool("data > 3", &json!(5)).await.unwrap());
        assert!(!evaluate_bool("''", &JsonValue::Null).await.unwrap());
        assert!(evaluate_bool("nope(", &JsonValue::Null).await.is_err());
    }

    #[tokio::test]
    async fn callbacks_with_return_keep_the_completion_value() {
        assert_eq!(
            evaluate("data.filter(function (x) { return x > 1; })", &json!([1, 2, 3]))
                .await
                .unwrap(),
            json!([2, 3])
        );
        assert!(
            evaluate_bool("data.some(function (x) { return x > 2; })", &json!([1, 2, 3]))
                .await
                .unwrap()
        );
        assert_eq!(
            evaluate(
                "var out = []; for (var i = 0; i < data; i++) { out.push(i); } return out",
                &json!(3)
            )
            .await
            .unwrap(),
            json!([0, 1, 2])
        );
    }

    #[tokio::test]
    async fn attachments_are_collected_in_order() {
        let outcome = run_main(
            r#"function main(a) {
                setAttachment('a.txt', a);
                setAttachment('b.json', {n: 1});
                return 'ok';
            }"#
            .into(),
            vec![json!("first")],
            JsonValue::Null,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.attachments,
            vec![
                ("a.txt".to_string(), "first".to_string()),
                ("b.json".to_string(), "{\"n\":1}".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn sleep_waits_then_stops_on_cancel() {
        let started = Instant::now();
        let outcome = run_main(
            "function main() { sleep('30ms'); sleep(20); return 1; }".into(),
            vec![],
            JsonValue::Null,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.ok);
        assert!(started.elapsed() >= Duration::from_millis(50));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        let outcome = run_main(
            "function main() { sleep('1h'); return 'woke'; }".into(),
            vec![],
            JsonValue::Null,
            cancel,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, json!("woke"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn bad_sleep_durations_throw() {
        let outcome = run_main(
            "function main() { sleep('soon'); }".into(),
            vec![],
            JsonValue::Null,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!outcome.ok);
    }

    #[test]
    fn parses_duration_strings() {
        assert_eq!(parse_duration("300ms"), Some(Duration::from_millis(300)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("1h2m3s"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("5"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("2d"), None);
    }
}
