use crate::models::{SignalAction, StrategySignal};

/// Create a hold signal (default action when no trade signal is generated)
pub fn hold_signal() -> StrategySignal {
    StrategySignal {
        action: SignalAction::Hold,
        confidence: 0.0,
    }
}

/// Create a buy signal with the given confidence
pub fn buy_signal(confidence: f64) -> StrategySignal {
    StrategySignal {
        action: SignalAction::Buy,
        confidence,
    }
}

/// Create a sell signal with the given confidence
pub fn sell_signal(confidence: f64) -> StrategySignal {
    StrategySignal {
        action: SignalAction::Sell,
        confidence,
    }
}
