//! Client-side execution of scripted operations.
//!
//! An operation is a sequence of api-call bodies executed in listed order.
//! Before each call the body is scanned for `${…}` references, which splice
//! in values from earlier replies: `${results.2.response.return_value}`
//! addresses the third call's reply, and names bound through the script's
//! `save_results` map address a reply by alias. A string that is wholly one
//! reference takes the referenced value of whatever type it has; a string
//! that merely contains references has their string-coerced forms spliced
//! into the surrounding text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::BridgeError;
use crate::messages::{require, FieldType};

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^{}]+)\}").expect("static pattern is valid"))
}

/// Execute the operation script `script` (the `message` body of an
/// operation envelope), issuing each call through `run_call`.
///
/// The overall result is the final call's reply. The first failing call
/// (an unresolvable reference or an error reply from the bridge) aborts
/// the run.
pub fn run_operation<F>(script: &Value, mut run_call: F) -> Result<Value, BridgeError>
where
    F: FnMut(Value) -> Result<Value, BridgeError>,
{
    let sequence = match require(script, "sequence", FieldType::Array)
        .map_err(|err| BridgeError::operation(err.to_string()))?
    {
        Value::Array(sequence) => sequence,
        _ => unreachable!("the field assertion guarantees an array"),
    };
    let saved_names = parse_save_results(script)?;

    let mut results: Vec<Value> = Vec::with_capacity(sequence.len());

    for call in sequence {
        let mut body = call.clone();
        substitute(&mut body, &results, &saved_names)?;

        let reply = run_call(json!({
            "message_type": "api_call",
            "message": body,
        }))?;

        check_reply(&reply)?;
        results.push(reply);
    }

    results
        .pop()
        .ok_or_else(|| BridgeError::operation("The operation sequence is empty"))
}

fn parse_save_results(script: &Value) -> Result<HashMap<String, usize>, BridgeError> {
    let Some(save_results) = script.get("save_results") else {
        return Ok(HashMap::new());
    };
    let entries = save_results.as_object().ok_or_else(|| {
        BridgeError::operation("The \"save_results\" field is expected to be of type object")
    })?;

    let mut names = HashMap::new();
    for (name, index) in entries {
        if name == "results" {
            return Err(BridgeError::operation(
                "The name \"results\" is reserved and cannot be used in \"save_results\"",
            ));
        }
        let index = index
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| {
                BridgeError::operation(format!(
                    "The save_results entry \"{name}\" does not name a result index"
                ))
            })?;
        names.insert(name.clone(), index);
    }
    Ok(names)
}

/// A reply that is not a successful api-call reply aborts the operation.
fn check_reply(reply: &Value) -> Result<(), BridgeError> {
    if reply.get("response_type").and_then(Value::as_str) == Some("api_call") {
        return Ok(());
    }

    match reply
        .pointer("/response/error_message")
        .and_then(Value::as_str)
    {
        Some(error_message) => Err(BridgeError::operation(error_message)),
        None => Err(BridgeError::operation(
            "Got an invalid response from the bridge",
        )),
    }
}

fn substitute(
    value: &mut Value,
    results: &[Value],
    names: &HashMap<String, usize>,
) -> Result<(), BridgeError> {
    match value {
        Value::Object(map) => {
            for entry in map.values_mut() {
                substitute(entry, results, names)?;
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute(item, results, names)?;
            }
        }
        Value::String(text) => {
            if let Some(replacement) = substitute_string(text, results, names)? {
                *value = replacement;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_string(
    text: &str,
    results: &[Value],
    names: &HashMap<String, usize>,
) -> Result<Option<Value>, BridgeError> {
    let pattern = reference_pattern();

    // A string that is wholly a single reference splices the raw value so
    // non-string results keep their type.
    if let Some(caps) = pattern.captures(text) {
        let whole = caps.get(0).expect("group 0 always matches");
        if whole.start() == 0 && whole.end() == text.len() {
            let reference = caps.get(1).expect("the pattern has one group").as_str();
            return Ok(Some(resolve(reference, results, names)?.clone()));
        }
    } else {
        return Ok(None);
    }

    let mut output = String::new();
    let mut last_end = 0;
    for caps in pattern.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always matches");
        let reference = caps.get(1).expect("the pattern has one group").as_str();
        let value = resolve(reference, results, names)?;

        output.push_str(&text[last_end..whole.start()]);
        output.push_str(&coerce_to_string(value));
        last_end = whole.end();
    }
    output.push_str(&text[last_end..]);
    Ok(Some(Value::String(output)))
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn resolve<'a>(
    reference: &str,
    results: &'a [Value],
    names: &HashMap<String, usize>,
) -> Result<&'a Value, BridgeError> {
    let mut segments = reference.split('.');
    let root = segments.next().unwrap_or_default();

    let mut current = if root == "results" {
        let index_segment = segments.next().ok_or_else(|| {
            BridgeError::operation(format!(
                "Reference \"${{{reference}}}\" does not name a result index"
            ))
        })?;
        let index: usize = index_segment.parse().map_err(|_| {
            BridgeError::operation(format!(
                "Reference \"${{{reference}}}\" has an invalid result index \"{index_segment}\""
            ))
        })?;
        results.get(index).ok_or_else(|| {
            BridgeError::operation(format!(
                "Reference \"${{{reference}}}\" points at result {index}, which is not available yet"
            ))
        })?
    } else {
        let index = *names.get(root).ok_or_else(|| {
            BridgeError::operation(format!("Unknown substitution target \"{root}\""))
        })?;
        results.get(index).ok_or_else(|| {
            BridgeError::operation(format!(
                "Saved result \"{root}\" (index {index}) is not available yet"
            ))
        })?
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| {
            BridgeError::operation(format!(
                "Reference \"${{{reference}}}\" does not resolve to an existing field \
                 (failed at \"{segment}\")"
            ))
        })?;
    }
    Ok(current)
}
