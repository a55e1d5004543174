use hive_models::agent_message::{AgentKind, AgentResponse, RiskVerdict};
use hive_models::context::ContextUpdate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AgentError;

/// Extract the first JSON object from model output that may contain surrounding text.
///
/// Handles:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the analysis:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                return Some(text[json_start..json_start + end].trim().to_string());
            }
        }
    }
    None
}

/// First balanced `{ ... }`, ignoring braces inside strings.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct PromptedReply {
    confidence: f64,
    summary: String,
    #[serde(default)]
    analysis: serde_json::Value,
    #[serde(default)]
    context_update: Option<ContextUpdate>,
    #[serde(default)]
    verdict: Option<RiskVerdict>,
}

/// Parse an [`AgentResponse`] for `agent` out of raw command output.
pub fn parse_agent_response(
    raw: &str,
    request_id: Uuid,
    agent: AgentKind,
) -> Result<AgentResponse, AgentError> {
    let json_str = extract_json(raw)?;
    let reply: PromptedReply = serde_json::from_str(&json_str).map_err(|e| {
        AgentError::Parse(format!("Failed to parse {agent} reply: {e}\nJSON: {json_str}"))
    })?;

    let mut response = AgentResponse::new(request_id, agent, reply.confidence, reply.summary);
    response.analysis = reply.analysis;
    response.context_update = reply.context_update;
    response.verdict = reply.verdict;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_models::context::MarketRegime;
    use hive_models::decision::TradeAction;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"confidence": 0.75, "summary": "test"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my analysis:\n```json\n{\"confidence\": 0.75}\n```\nDone.";
        assert_eq!(extract_json(input).unwrap(), r#"{"confidence": 0.75}"#);
    }

    #[test]
    fn extract_with_prefix_text() {
        let input = "Based on the data:\n{\"confidence\": 0.75, \"summary\": \"bullish\"} thanks";
        assert_eq!(
            extract_json(input).unwrap(),
            r#"{"confidence": 0.75, "summary": "bullish"}"#
        );
    }

    #[test]
    fn extract_ignores_braces_in_strings() {
        let input = r#"{"summary": "range {low} to {high}", "confidence": 0.5}"#;
        let parsed: serde_json::Value = serde_json::from_str(&extract_json(input).unwrap()).unwrap();
        assert_eq!(parsed["confidence"], 0.5);
    }

    #[test]
    fn extract_no_json() {
        assert!(matches!(
            extract_json("plain text, no object } here"),
            Err(AgentError::Parse(_))
        ));
    }

    #[test]
    fn parse_macro_reply_with_context_update() {
        let raw = r#"```json
{
  "confidence": 0.8,
  "summary": "Risk-Off, extreme fear",
  "analysis": {"market_regime": "Risk-Off", "regime_score": 2.5},
  "context_update": {"market_regime": "Risk-Off", "regime_score": 2.5}
}
```"#;
        let response = parse_agent_response(raw, Uuid::nil(), AgentKind::Macro).unwrap();
        assert_eq!(response.agent, AgentKind::Macro);
        assert_eq!(response.metric("regime_score"), Some(2.5));
        assert_eq!(
            response.context_update.unwrap().market_regime,
            Some(MarketRegime::RiskOff)
        );
    }

    #[test]
    fn parse_risk_verdict_and_clamp_confidence() {
        let raw = r#"{"confidence": 1.7, "summary": "buy", "verdict": {"action": "BUY", "stop_loss_percent": 3.0, "take_profit_percent": 6.0}}"#;
        let response = parse_agent_response(raw, Uuid::nil(), AgentKind::Risk).unwrap();
        assert_eq!(response.confidence, 1.0);
        assert_eq!(response.verdict.unwrap().action, TradeAction::Buy);
    }

    #[test]
    fn missing_summary_is_parse_error() {
        let result = parse_agent_response(r#"{"confidence": 0.5}"#, Uuid::nil(), AgentKind::Technical);
        assert!(matches!(result, Err(AgentError::Parse(_))));
    }
}
