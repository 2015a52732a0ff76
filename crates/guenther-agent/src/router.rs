//! Tool router — one cheap LLM call that pre-filters the registered tools
//! for the current user turn. All failures fall back to the full tool list;
//! the router is never allowed to break a turn.

use std::time::Duration;

use serde_json::{json, Value};

use guenther_core::log::{ts, LogEvent, LogSink};
use guenther_provider::ProviderTarget;

use crate::orchestrator::ChatBackend;

const TOOL_ROUTER_PROMPT: &str = "Du bist ein Tool-Router. Deine Aufgabe ist es, aus einer Liste verfuegbarer Tools diejenigen auszuwaehlen, die fuer die Benutzeranfrage relevant sind.

Antworte NUR mit einem JSON-Array der Tool-Namen, die benoetigt werden.
Wenn keine Tools benoetigt werden, antworte mit [].
Keine Erklaerungen, nur das JSON-Array.

Beispiel-Antwort: [\"get_current_time\", \"text_to_image\"]";

/// Select the relevant subset of `all_tools` (OpenAI function schemas) for
/// the latest user message. With three or fewer tools the filter is skipped.
pub async fn select_tools(
    all_tools: &[Value],
    chat_messages: &[Value],
    llm: &dyn ChatBackend,
    target: &ProviderTarget,
    model: &str,
    log: &LogSink,
    timeout: Duration,
) -> Vec<Value> {
    if all_tools.len() <= 3 {
        log(LogEvent::text(format!(
            "[{}] Tool-Router: Nur {} Tools vorhanden, ueberspringe Filterung.",
            ts(),
            all_tools.len()
        )));
        return all_tools.to_vec();
    }

    let tool_summary: Vec<Value> = all_tools
        .iter()
        .map(|t| {
            json!({
                "name": t.pointer("/function/name").and_then(Value::as_str).unwrap_or(""),
                "description": t.pointer("/function/description").and_then(Value::as_str).unwrap_or(""),
            })
        })
        .collect();

    let last_user_msg = last_user_message(chat_messages);

    let router_messages = vec![
        json!({ "role": "system", "content": TOOL_ROUTER_PROMPT }),
        json!({
            "role": "user",
            "content": format!(
                "Verfuegbare Tools:\n{}\n\nBenutzeranfrage: {}",
                serde_json::to_string_pretty(&tool_summary).unwrap_or_default(),
                last_user_msg
            )
        }),
    ];

    log(LogEvent::header("TOOL-ROUTER (Pre-Filter)"));
    log(LogEvent::json(
        "router_request",
        json!({
            "tools_available": tool_summary.iter()
                .map(|t| t["name"].clone()).collect::<Vec<_>>(),
            "user_query": last_user_msg,
        }),
    ));

    let completion = match llm
        .chat(target, model, &router_messages, None, 0.1, timeout)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            log(LogEvent::text(format!(
                "[{}] Tool-Router Fehler: {e} - verwende alle Tools",
                ts()
            )));
            return all_tools.to_vec();
        }
    };

    log(LogEvent::json("router_response_raw", completion.raw.clone()));

    let Some(selected_names) = parse_name_array(&completion.content) else {
        log(LogEvent::text(format!(
            "[{}] Tool-Router Fehler: Antwort kein JSON-Array - verwende alle Tools",
            ts()
        )));
        return all_tools.to_vec();
    };

    let selected: Vec<Value> = all_tools
        .iter()
        .filter(|t| {
            t.pointer("/function/name")
                .and_then(Value::as_str)
                .map(|name| selected_names.iter().any(|s| s == name))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    log(LogEvent::header("TOOL-ROUTER ERGEBNIS"));
    log(LogEvent::json("selected_tools", json!(selected_names)));
    log(LogEvent::text(format!(
        "[{}] {}/{} Tools ausgewaehlt",
        ts(),
        selected.len(),
        all_tools.len()
    )));

    // Empty intersection while tools exist: safety net, use all.
    if selected.is_empty() && !all_tools.is_empty() {
        log(LogEvent::text(format!(
            "[{}] Keine Tools ausgewaehlt, verwende alle.",
            ts()
        )));
        return all_tools.to_vec();
    }

    selected
}

/// The last `user` message; vision content lists are joined by their text
/// parts.
fn last_user_message(chat_messages: &[Value]) -> String {
    for msg in chat_messages.iter().rev() {
        if msg.get("role").and_then(Value::as_str) != Some("user") {
            continue;
        }
        return match msg.get("content") {
            Some(Value::Array(parts)) => parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
    }
    String::new()
}

/// Parse a JSON array of tool names, tolerating Markdown code fences.
fn parse_name_array(content: &str) -> Option<Vec<String>> {
    let mut content = content.trim();
    if content.starts_with("```") {
        content = content.split_once('\n').map(|(_, rest)| rest).unwrap_or(content);
        if let Some(end) = content.rfind("```") {
            content = &content[..end];
        }
        content = content.trim();
    }
    serde_json::from_str::<Vec<String>>(content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_arrays() {
        assert_eq!(
            parse_name_array(r#"["a", "b"]"#).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            parse_name_array("```json\n[\"generate_image\"]\n```").unwrap(),
            vec!["generate_image".to_string()]
        );
        assert_eq!(parse_name_array("[]").unwrap(), Vec::<String>::new());
        assert!(parse_name_array("not json").is_none());
        assert!(parse_name_array(r#"{"a": 1}"#).is_none());
    }

    #[test]
    fn last_user_message_joins_text_parts() {
        let messages = vec![
            json!({ "role": "user", "content": "erste" }),
            json!({ "role": "assistant", "content": "antwort" }),
            json!({ "role": "user", "content": [
                { "type": "text", "text": "Was ist" },
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } },
                { "type": "text", "text": "auf dem Bild?" },
            ]}),
        ];
        assert_eq!(last_user_message(&messages), "Was ist auf dem Bild?");
    }

    #[test]
    fn last_user_message_empty_without_user_turns() {
        let messages = vec![json!({ "role": "assistant", "content": "hi" })];
        assert_eq!(last_user_message(&messages), "");
    }
}
