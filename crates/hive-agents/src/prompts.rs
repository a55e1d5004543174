use hive_models::agent_message::AgentKind;

/// Reply shape every prompted agent must follow.
fn response_schema(kind: AgentKind) -> String {
    let mut example = serde_json::json!({
        "confidence": 0.75,
        "summary": "<one or two sentences>",
        "analysis": {},
    });
    match kind {
        AgentKind::Macro => {
            example["analysis"] = serde_json::json!({
                "market_regime": "Risk-On | Risk-Off | Neutral",
                "regime_score": 6.5,
                "reasoning": "<why>",
            });
            example["context_update"] = serde_json::json!({
                "market_regime": "Risk-On",
                "regime_score": 6.5,
            });
        }
        AgentKind::Sentiment => {
            example["analysis"] = serde_json::json!({
                "sentiment": "Bullish | Bearish | Neutral",
                "sentiment_score": 0.4,
                "key_topics": ["<topic>"],
                "dominant_narrative": "<narrative>",
            });
            example["context_update"] = serde_json::json!({
                "sentiment": "Bullish",
                "sentiment_score": 0.4,
                "key_topics": ["<topic>"],
            });
        }
        AgentKind::Technical => {
            example["analysis"] = serde_json::json!({
                "technical_score": 7.0,
                "trend": "Uptrend | Downtrend | Sideways",
                "momentum": "Bullish | Bearish | Neutral",
                "atr_percent": 2.1,
            });
        }
        AgentKind::Risk => {
            example["analysis"] = serde_json::json!({
                "decision": "BUY | SELL | AVOID",
                "final_summary": "<summary>",
            });
            example["verdict"] = serde_json::json!({
                "action": "BUY",
                "stop_loss_percent": 3.0,
                "take_profit_percent": 6.0,
            });
        }
    }
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn role(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Macro => {
            "You are the MacroAnalyst of a crypto trading desk. Judge the overall market regime \
             from the fear & greed index, total market cap change and the BTC price history in \
             the request. Score the regime from 0 (danger) to 10 (opportunity). Below 4 is \
             Risk-Off, 6 and above is Risk-On. You only set macro fields in context_update."
        }
        AgentKind::Sentiment => {
            "You are the SentimentAnalyst of a crypto trading desk. Read the headlines and \
             trending topics in the request and score market sentiment from -1.0 (bearish) to \
             1.0 (bullish). List at most five key topics. You only set sentiment fields in \
             context_update."
        }
        AgentKind::Technical => {
            "You are the TechnicalAnalyst of a crypto trading desk. Analyse the candles in the \
             request (oldest first) with RSI(14), MACD(12,26,9), SMA20/50, ATR(14) and the \
             recent close trend. Score the setup from 0 (strong sell) to 10 (strong buy)."
        }
        AgentKind::Risk => {
            "You are the RiskManager of a crypto trading desk and have the final say. Weigh the \
             prior agent outputs, the shared market context and the similar past trades in the \
             request. Strong technicals under a Risk-Off regime are often traps. Only BUY when \
             your confidence reaches min_confidence. Return a verdict with the action and the \
             stop-loss and take-profit percents."
        }
    }
}

pub fn system_prompt(kind: AgentKind) -> String {
    format!(
        "{}\n\nYou MUST respond with ONLY a JSON object matching this schema:\n{}\n\n\
         confidence is a number between 0.0 and 1.0.",
        role(kind),
        response_schema(kind)
    )
}

/// System prompt for answering another agent's question.
pub fn consultation_prompt(kind: AgentKind, from: AgentKind, question: &str) -> String {
    format!(
        "{}\n\nThe {from} is asking you: \"{question}\"\nAnswer in summary and put \
         \"verdict\": \"trap\" or \"acceptable\" in analysis when the question asks for a judgement.",
        system_prompt(kind)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_a_schema() {
        for kind in AgentKind::ALL {
            let prompt = system_prompt(kind);
            assert!(prompt.contains("confidence"));
            assert!(prompt.contains(kind.name()));
        }
        assert!(system_prompt(AgentKind::Risk).contains("verdict"));
    }

    #[test]
    fn consultation_prompt_carries_question() {
        let prompt = consultation_prompt(AgentKind::Macro, AgentKind::Risk, "Is this a trap?");
        assert!(prompt.contains("RiskManager is asking you"));
        assert!(prompt.contains("Is this a trap?"));
    }
}
