use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agent_message::ChatMessage;
use crate::decision::{TradeAction, TradeDecision};

/// Events pushed to a streaming consumer (backtest or live view).
/// The final event of a stream is always `Close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },
    AiChat {
        message: ChatMessage,
    },
    Analysis {
        decision: Box<TradeDecision>,
    },
    Trade {
        action: TradeAction,
        symbol: String,
        amount: Decimal,
        price: Decimal,
        balance_after: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pnl: Option<Decimal>,
    },
    Error {
        message: String,
    },
    Close {
        reason: String,
    },
}

impl StreamEvent {
    pub fn log(message: impl Into<String>) -> Self {
        StreamEvent::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    pub fn close(reason: impl Into<String>) -> Self {
        StreamEvent::Close {
            reason: reason.into(),
        }
    }
}
