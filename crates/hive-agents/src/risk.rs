use hive_models::config::RiskManagement;
use hive_models::portfolio::RiskParameters;

/// Capital-per-trade multiplier for a regime score.
pub fn regime_multiplier(regime_score: f64) -> f64 {
    if regime_score > 7.5 {
        1.25
    } else if regime_score > 6.0 {
        1.1
    } else if regime_score < 2.5 {
        0.5
    } else if regime_score < 4.0 {
        0.75
    } else {
        1.0
    }
}

/// Risk parameters for one trade, scaled to the current regime.
pub fn adapt_risk_parameters(base: &RiskManagement, regime_score: f64) -> RiskParameters {
    RiskParameters {
        capital_per_trade_percent: base.capital_per_trade_percent * regime_multiplier(regime_score),
        stop_loss_percent: base.stop_loss_percent,
        take_profit_percent: base.take_profit_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_bands() {
        assert_eq!(regime_multiplier(8.0), 1.25);
        assert_eq!(regime_multiplier(7.5), 1.1);
        assert_eq!(regime_multiplier(6.5), 1.1);
        assert_eq!(regime_multiplier(6.0), 1.0);
        assert_eq!(regime_multiplier(5.0), 1.0);
        assert_eq!(regime_multiplier(3.0), 0.75);
        assert_eq!(regime_multiplier(2.0), 0.5);
    }

    #[test]
    fn only_capital_is_scaled() {
        let base = RiskManagement::default();
        let params = adapt_risk_parameters(&base, 9.0);
        assert_eq!(params.capital_per_trade_percent, base.capital_per_trade_percent * 1.25);
        assert_eq!(params.stop_loss_percent, base.stop_loss_percent);
        assert_eq!(params.take_profit_percent, base.take_profit_percent);
    }
}
