//! Trade quantity calculator
//!
//! Pure decision functions: given a rule's limits and live market
//! data, how many shares to move and why the count was capped. Share
//! counts always floor; flooring can cost one share but can never
//! overspend a budget.

/// Outcome of a buy sizing decision
#[derive(Debug, Clone, PartialEq)]
pub struct BuyDecision {
    pub quantity: i64,
    /// Cost of the decided quantity at the current price
    pub required_cash: f64,
    pub limit_reason: &'static str,
    /// Extra cash needed to fund the full policy quantity; only
    /// non-zero in flexible (non-cash-only) mode
    pub shortfall: f64,
}

/// Outcome of a sell sizing decision
#[derive(Debug, Clone, PartialEq)]
pub struct SellDecision {
    pub quantity: i64,
    pub estimated_revenue: f64,
    pub limit_reason: &'static str,
}

/// Decide how many shares to buy.
///
/// Policy limits (target gap, daily budget) are evaluated first; if
/// policy says stop, cash is irrelevant. In cash-only mode the result
/// is clamped to what the account can afford now. In flexible mode
/// the full policy quantity is returned together with the cash
/// shortfall, so the caller may liquidate sweep ETFs and retry.
pub fn buy_decision(
    target_amount: i64,
    current_holding: f64,
    daily_money_limit: f64,
    today_traded_money: f64,
    current_price: f64,
    available_cash: f64,
    cash_only: bool,
) -> BuyDecision {
    if current_price <= 0.0 {
        return BuyDecision {
            quantity: 0,
            required_cash: 0.0,
            limit_reason: "Invalid Price",
            shortfall: 0.0,
        };
    }

    // A negative holding (short) widens the gap: covering it is part
    // of reaching the target
    let qty_gap = (target_amount as f64 - current_holding).floor().max(0.0) as i64;

    let budget_remaining = (daily_money_limit - today_traded_money).max(0.0);
    let qty_by_budget = (budget_remaining / current_price).floor() as i64;

    let policy_qty = qty_gap.min(qty_by_budget);
    if policy_qty <= 0 {
        let limit_reason = if qty_gap <= 0 {
            "Target Reached"
        } else {
            "Daily Limit Reached"
        };
        return BuyDecision {
            quantity: 0,
            required_cash: 0.0,
            limit_reason,
            shortfall: 0.0,
        };
    }

    let policy_cost = policy_qty as f64 * current_price;

    if cash_only {
        let affordable_qty = (available_cash / current_price).floor() as i64;
        let final_qty = policy_qty.min(affordable_qty);
        let limit_reason = if final_qty < policy_qty {
            "Insufficient Cash"
        } else {
            "OK"
        };
        BuyDecision {
            quantity: final_qty,
            required_cash: final_qty as f64 * current_price,
            limit_reason,
            shortfall: 0.0,
        }
    } else if policy_cost > available_cash {
        BuyDecision {
            quantity: policy_qty,
            required_cash: policy_cost,
            limit_reason: "Need Cash",
            shortfall: policy_cost - available_cash,
        }
    } else {
        BuyDecision {
            quantity: policy_qty,
            required_cash: policy_cost,
            limit_reason: "OK",
            shortfall: 0.0,
        }
    }
}

/// Decide how many shares to sell: the surplus above target, clamped
/// by today's remaining notional budget.
pub fn sell_decision(
    target_amount: i64,
    current_holding: f64,
    daily_money_limit: f64,
    today_traded_money: f64,
    current_price: f64,
) -> SellDecision {
    if current_price <= 0.0 {
        return SellDecision {
            quantity: 0,
            estimated_revenue: 0.0,
            limit_reason: "Invalid Price",
        };
    }

    let sellable_qty = (current_holding - target_amount as f64).floor().max(0.0) as i64;

    let budget_remaining = (daily_money_limit - today_traded_money).max(0.0);
    let qty_by_budget = (budget_remaining / current_price).floor() as i64;

    let final_qty = sellable_qty.min(qty_by_budget);
    if final_qty <= 0 {
        let limit_reason = if sellable_qty <= 0 {
            "Target Reached (No Surplus)"
        } else {
            "Daily Limit Reached"
        };
        return SellDecision {
            quantity: 0,
            estimated_revenue: 0.0,
            limit_reason,
        };
    }

    SellDecision {
        quantity: final_qty,
        estimated_revenue: final_qty as f64 * current_price,
        limit_reason: "OK",
    }
}
