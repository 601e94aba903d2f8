use std::collections::HashMap;

use crate::config::{TradingConfig, SCALP_EXIT_COMMENT};
use crate::gateway::Gateway;
use crate::types::{CloseReason, PositionRecord, PositionSnapshot, Side, StopsPlan, Ticket, TradingMode};

/// Break-even and trailing parameters, all in multiples of the entry ATR.
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub breakeven_enabled: bool,
    pub breakeven_trigger: f64,
    pub breakeven_lock: f64,
    pub trailing_enabled: bool,
    pub trailing_activation: f64,
    pub trailing_distance: f64,
}

impl From<&TradingConfig> for LifecycleConfig {
    fn from(t: &TradingConfig) -> Self {
        Self {
            breakeven_enabled: t.use_smart_breakeven,
            breakeven_trigger: t.breakeven_profit_multiple,
            breakeven_lock: t.breakeven_lock_profit_multiple,
            trailing_enabled: t.use_trailing_stop,
            trailing_activation: t.min_profit_for_trail_activation,
            trailing_distance: t.trailing_stop_atr_multiple,
        }
    }
}

/// Per-cycle inputs for managing open positions.
#[derive(Clone, Copy, Debug)]
pub struct ManageContext {
    pub mode: TradingMode,
    pub current_atr: Option<f64>,
    pub scalp_profit_target: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ManagementAction {
    ScalpExit { ticket: Ticket, profit: f64 },
    BreakEven { ticket: Ticket, new_stop: f64 },
    Trailing { ticket: Ticket, new_stop: f64, price: f64 },
}

/// Emitted exactly once per position that disappears from the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosureEvent {
    pub ticket: Ticket,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    /// Net of commission and swap, account currency.
    pub profit: Option<f64>,
    pub pips: Option<f64>,
    pub reason: CloseReason,
    pub close_time: Option<i64>,
    pub last_stop: f64,
    pub last_target: f64,
}

/// Owns the tracked positions. Nothing else mutates a `PositionRecord`.
#[derive(Debug)]
pub struct PositionTracker {
    cfg: LifecycleConfig,
    positions: HashMap<Ticket, PositionRecord>,
}

impl PositionTracker {
    pub fn new(cfg: LifecycleConfig) -> Self {
        Self { cfg, positions: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, ticket: Ticket) -> Option<&PositionRecord> {
        self.positions.get(&ticket)
    }

    pub fn contains(&self, ticket: Ticket) -> bool {
        self.positions.contains_key(&ticket)
    }

    /// Starts tracking a position the engine just opened, with the ATR the
    /// stops were computed from.
    pub fn track_entry(&mut self, ticket: Ticket, side: Side, volume: f64, entry_price: f64, plan: StopsPlan, entry_atr: f64, open_time: i64) {
        log::info!("[lifecycle] tracking new #{} {} {} @ {:.5} (ATR {:.5})", ticket, side, volume, entry_price, entry_atr);
        self.positions.insert(ticket, PositionRecord {
            ticket,
            entry_price,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            side,
            volume,
            open_time,
            entry_atr,
            breakeven_applied: false,
            forced_exit: false,
        });
    }

    /// Adopts unseen tickets and returns the records of tickets the gateway
    /// no longer reports. A removed record is never returned twice.
    pub fn reconcile(&mut self, snapshots: &[PositionSnapshot], adoption_atr: Option<f64>) -> Vec<PositionRecord> {
        for snap in snapshots {
            match self.positions.get_mut(&snap.ticket) {
                Some(rec) => {
                    // gateway is authoritative for levels changed outside the engine
                    rec.stop_loss = snap.stop_loss;
                    rec.take_profit = snap.take_profit;
                    rec.volume = snap.volume;
                }
                None => {
                    let entry_atr = adoption_atr.unwrap_or(0.0);
                    log::info!(
                        "[lifecycle] tracking #{} {} {} @ {:.5} (SL {:.5} TP {:.5}, ATR {:.5})",
                        snap.ticket, snap.side, snap.volume, snap.entry_price,
                        snap.stop_loss, snap.take_profit, entry_atr
                    );
                    self.positions.insert(snap.ticket, PositionRecord {
                        ticket: snap.ticket,
                        entry_price: snap.entry_price,
                        stop_loss: snap.stop_loss,
                        take_profit: snap.take_profit,
                        side: snap.side,
                        volume: snap.volume,
                        open_time: snap.open_time,
                        entry_atr,
                        breakeven_applied: false,
                        forced_exit: false,
                    });
                }
            }
        }

        let gone: Vec<Ticket> = self
            .positions
            .keys()
            .filter(|t| !snapshots.iter().any(|s| s.ticket == **t))
            .copied()
            .collect();
        let mut closed: Vec<PositionRecord> = gone.iter().filter_map(|t| self.positions.remove(t)).collect();
        closed.sort_by_key(|r| r.ticket);
        closed
    }

    /// Forced scalp exit, then break-even, then chandelier trailing.
    /// Records change only after the gateway acknowledges.
    pub async fn manage(
        &mut self,
        gateway: &dyn Gateway,
        snap: &PositionSnapshot,
        ctx: &ManageContext,
    ) -> Vec<ManagementAction> {
        let cfg = self.cfg.clone();
        let mut actions = Vec::new();
        let Some(rec) = self.positions.get_mut(&snap.ticket) else { return actions };

        if rec.entry_atr <= 0.0 {
            if let Some(atr) = ctx.current_atr {
                log::info!("[lifecycle] #{} entry ATR unknown, using current {:.5}", rec.ticket, atr);
                rec.entry_atr = atr;
            }
        }

        if ctx.mode == TradingMode::Scalp && ctx.scalp_profit_target > 0.0 && snap.profit >= ctx.scalp_profit_target {
            log::info!(
                "[lifecycle] #{} scalp target hit: {:.2} >= {:.2}, closing",
                rec.ticket, snap.profit, ctx.scalp_profit_target
            );
            match gateway.close_position(rec.ticket, rec.side, rec.volume, SCALP_EXIT_COMMENT).await {
                Ok(()) => {
                    rec.forced_exit = true;
                    actions.push(ManagementAction::ScalpExit { ticket: rec.ticket, profit: snap.profit });
                    return actions;
                }
                Err(e) => log::warn!("[lifecycle] #{} scalp close failed: {}", rec.ticket, e),
            }
        }

        let atr = rec.entry_atr;
        if atr <= 0.0 { return actions; }
        let sign = rec.side.sign();
        let price = snap.current_price;
        let excursion = sign * (price - rec.entry_price);

        if cfg.breakeven_enabled && !rec.breakeven_applied && excursion >= atr * cfg.breakeven_trigger {
            let new_stop = rec.entry_price + sign * atr * cfg.breakeven_lock;
            if !tightens(rec.side, rec.stop_loss, new_stop) {
                log::debug!("[lifecycle] #{} stop {:.5} already beyond break-even {:.5}", rec.ticket, rec.stop_loss, new_stop);
                rec.breakeven_applied = true;
            } else if crosses(rec.side, price, new_stop) {
                log::debug!("[lifecycle] #{} break-even {:.5} would cross price {:.5}", rec.ticket, new_stop, price);
            } else {
                match gateway.modify_stop_target(rec.ticket, new_stop, rec.take_profit).await {
                    Ok(()) => {
                        log::info!("[lifecycle] #{} break-even: SL {:.5} → {:.5}", rec.ticket, rec.stop_loss, new_stop);
                        rec.stop_loss = new_stop;
                        rec.breakeven_applied = true;
                        actions.push(ManagementAction::BreakEven { ticket: rec.ticket, new_stop });
                    }
                    Err(e) => log::warn!("[lifecycle] #{} break-even modify failed: {}", rec.ticket, e),
                }
            }
        }

        if cfg.trailing_enabled && excursion >= atr * cfg.trailing_activation {
            let new_stop = price - sign * atr * cfg.trailing_distance;
            if tightens(rec.side, rec.stop_loss, new_stop) && !crosses(rec.side, price, new_stop) {
                match gateway.modify_stop_target(rec.ticket, new_stop, rec.take_profit).await {
                    Ok(()) => {
                        log::info!(
                            "[lifecycle] #{} trailing: SL {:.5} → {:.5} (price {:.5})",
                            rec.ticket, rec.stop_loss, new_stop, price
                        );
                        rec.stop_loss = new_stop;
                        actions.push(ManagementAction::Trailing { ticket: rec.ticket, new_stop, price });
                    }
                    Err(e) => log::warn!("[lifecycle] #{} trailing modify failed: {}", rec.ticket, e),
                }
            }
        }
        actions
    }

    /// Builds the closure event for a record `reconcile` returned.
    pub async fn finalize_closure(gateway: &dyn Gateway, rec: &PositionRecord, pip_size: f64) -> ClosureEvent {
        let mut event = ClosureEvent {
            ticket: rec.ticket,
            side: rec.side,
            volume: rec.volume,
            entry_price: rec.entry_price,
            exit_price: None,
            profit: None,
            pips: None,
            reason: if rec.forced_exit { CloseReason::ScalpExit } else { CloseReason::ManualClose },
            close_time: None,
            last_stop: rec.stop_loss,
            last_target: rec.take_profit,
        };

        match gateway.closing_deal(rec.ticket).await {
            Ok(deal) => {
                if !rec.forced_exit {
                    event.reason = if deal.comment == SCALP_EXIT_COMMENT {
                        CloseReason::ScalpExit
                    } else {
                        classify_close(deal.price, rec.stop_loss, rec.take_profit, rec.side, 2.0 * pip_size)
                    };
                }
                event.exit_price = Some(deal.price);
                event.profit = Some(deal.profit + deal.swap - deal.commission.abs());
                if pip_size > 0.0 {
                    event.pips = Some(rec.side.sign() * (deal.price - rec.entry_price) / pip_size);
                }
                event.close_time = Some(deal.time);
            }
            Err(e) => {
                log::warn!("[lifecycle] #{} closed but no exit deal found: {}", rec.ticket, e);
            }
        }

        log::info!(
            "[lifecycle] position closed: #{} {} {} | exit {} | P&L {}",
            rec.ticket,
            rec.side,
            event.reason.label(),
            event.exit_price.map_or("n/a".to_string(), |p| format!("{p:.5}")),
            event.profit.map_or("n/a".to_string(), |p| format!("{p:+.2}")),
        );
        event
    }
}

/// Exit reason from exit price against the last known levels. Zero levels are absent.
pub fn classify_close(exit_price: f64, stop: f64, target: f64, side: Side, tolerance: f64) -> CloseReason {
    if stop > 0.0 && (exit_price - stop).abs() < tolerance {
        return CloseReason::StopLossHit;
    }
    if target > 0.0 && (exit_price - target).abs() < tolerance {
        return CloseReason::TakeProfitHit;
    }
    if stop > 0.0 && target > 0.0 {
        let between = match side {
            Side::Buy => exit_price > stop && exit_price < target,
            Side::Sell => exit_price < stop && exit_price > target,
        };
        if between {
            return CloseReason::TrailingStop;
        }
    }
    CloseReason::ManualClose
}

/// A zero stop means none, so any protective level tightens it.
fn tightens(side: Side, current: f64, candidate: f64) -> bool {
    current <= 0.0 || side.sign() * (candidate - current) > 0.0
}

fn crosses(side: Side, price: f64, stop: f64) -> bool {
    side.sign() * (price - stop) <= 0.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::types::{
        AccountState, Candle, DealEntry, DealInfo, InstrumentConstraints, OrderReceipt, OrderRequest, Quote,
    };
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Records modifications and closes; fails them on demand.
    #[derive(Default)]
    pub(crate) struct ScriptedGateway {
        pub fail_modify: bool,
        pub fail_close: bool,
        pub modifications: Mutex<Vec<(Ticket, f64, f64)>>,
        pub closes: Mutex<Vec<(Ticket, String)>>,
        pub deal: Option<DealInfo>,
        pub deals: Option<Vec<DealInfo>>,
        pub deal_queries: Mutex<Vec<(i64, i64)>>,
        pub quotes: HashMap<String, Quote>,
        pub account: Option<AccountState>,
    }

    #[async_trait]
    impl Gateway for ScriptedGateway {
        async fn recent_candles(&self, _count: usize) -> Result<Vec<Candle>, GatewayError> {
            Err(GatewayError::Unavailable("no data".into()))
        }
        async fn open_positions(&self) -> Result<Vec<PositionSnapshot>, GatewayError> {
            Ok(Vec::new())
        }
        async fn submit_market_order(&self, _order: &OrderRequest) -> Result<OrderReceipt, GatewayError> {
            Err(GatewayError::Permanent("not scripted".into()))
        }
        async fn modify_stop_target(&self, ticket: Ticket, sl: f64, tp: f64) -> Result<(), GatewayError> {
            if self.fail_modify {
                return Err(GatewayError::Transient("terminal busy".into()));
            }
            self.modifications.lock().unwrap().push((ticket, sl, tp));
            Ok(())
        }
        async fn close_position(&self, ticket: Ticket, _side: Side, _volume: f64, comment: &str) -> Result<(), GatewayError> {
            if self.fail_close {
                return Err(GatewayError::Transient("terminal busy".into()));
            }
            self.closes.lock().unwrap().push((ticket, comment.to_string()));
            Ok(())
        }
        async fn closing_deal(&self, _ticket: Ticket) -> Result<DealInfo, GatewayError> {
            self.deal.clone().ok_or_else(|| GatewayError::Unavailable("no deal".into()))
        }
        async fn deals_between(&self, from: i64, to: i64) -> Result<Vec<DealInfo>, GatewayError> {
            self.deal_queries.lock().unwrap().push((from, to));
            self.deals.clone().ok_or_else(|| GatewayError::Transient("history unavailable".into()))
        }
        async fn account_state(&self) -> Result<AccountState, GatewayError> {
            self.account.clone().ok_or_else(|| GatewayError::Unavailable("no account".into()))
        }
        async fn instrument_constraints(&self) -> Result<InstrumentConstraints, GatewayError> {
            Ok(InstrumentConstraints { min_stop_distance: 0.0, pip_size: 0.1 })
        }
        async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
            self.quotes.get(symbol).copied().ok_or_else(|| GatewayError::Unavailable(format!("no quote for {symbol}")))
        }
    }

    fn cfg() -> LifecycleConfig {
        LifecycleConfig::from(&TradingConfig::default())
    }

    fn snap(ticket: Ticket, side: Side, entry: f64, stop: f64, price: f64, profit: f64) -> PositionSnapshot {
        PositionSnapshot {
            ticket,
            side,
            volume: 0.1,
            entry_price: entry,
            stop_loss: stop,
            take_profit: if side == Side::Buy { entry + 100.0 } else { entry - 100.0 },
            current_price: price,
            profit,
            open_time: 0,
        }
    }

    const NORMAL: ManageContext = ManageContext { mode: TradingMode::Normal, current_atr: Some(5.0), scalp_profit_target: 26.82 };

    #[test]
    fn ticket_disappearing_is_reported_once() {
        let mut t = PositionTracker::new(cfg());
        let s = snap(11, Side::Buy, 2000.0, 1995.0, 2001.0, 1.0);
        assert!(t.reconcile(&[s.clone()], Some(5.0)).is_empty());
        assert_eq!(t.get(11).unwrap().entry_atr, 5.0);

        let closed = t.reconcile(&[], Some(5.0));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].ticket, 11);
        assert!(!t.contains(11));
        assert!(t.reconcile(&[], Some(5.0)).is_empty());
    }

    #[test]
    fn adoption_without_atr_records_zero() {
        let mut t = PositionTracker::new(cfg());
        t.reconcile(&[snap(3, Side::Sell, 2000.0, 2005.0, 1999.0, 1.0)], None);
        assert_eq!(t.get(3).unwrap().entry_atr, 0.0);
    }

    #[tokio::test]
    async fn breakeven_fires_once_and_tightens() {
        let gw = ScriptedGateway::default();
        let mut t = PositionTracker::new(cfg());
        // trigger 1.2 × 5 = 6, lock 0.3 × 5 = 1.5
        let s = snap(1, Side::Buy, 2000.0, 1995.0, 2006.5, 30.0);
        t.reconcile(&[s.clone()], Some(5.0));

        let actions = t.manage(&gw, &s, &NORMAL).await;
        assert_eq!(actions, vec![ManagementAction::BreakEven { ticket: 1, new_stop: 2001.5 }]);
        assert!(t.get(1).unwrap().breakeven_applied);

        let s2 = PositionSnapshot { stop_loss: 2001.5, ..s.clone() };
        t.reconcile(&[s2.clone()], Some(5.0));
        assert!(t.manage(&gw, &s2, &NORMAL).await.is_empty());
        assert_eq!(gw.modifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_modify_leaves_record_untouched() {
        let gw = ScriptedGateway { fail_modify: true, ..Default::default() };
        let mut t = PositionTracker::new(cfg());
        let s = snap(1, Side::Buy, 2000.0, 1995.0, 2009.0, 30.0);
        t.reconcile(&[s.clone()], Some(5.0));
        assert!(t.manage(&gw, &s, &NORMAL).await.is_empty());
        let rec = t.get(1).unwrap();
        assert_eq!(rec.stop_loss, 1995.0);
        assert!(!rec.breakeven_applied);
    }

    #[tokio::test]
    async fn trailing_follows_price_for_sell() {
        let gw = ScriptedGateway::default();
        let mut t = PositionTracker::new(cfg());
        // activation 1.5 × 5 = 7.5, distance 2 × 5 = 10
        let s = snap(8, Side::Sell, 2000.0, 2005.0, 1985.0, 75.0);
        t.reconcile(&[s.clone()], Some(5.0));
        let actions = t.manage(&gw, &s, &NORMAL).await;
        assert_eq!(
            actions,
            vec![
                ManagementAction::BreakEven { ticket: 8, new_stop: 1998.5 },
                ManagementAction::Trailing { ticket: 8, new_stop: 1995.0, price: 1985.0 },
            ]
        );

        // price retraces: stop must stay where it is
        let back = PositionSnapshot { current_price: 1986.0, stop_loss: 1995.0, ..s.clone() };
        t.reconcile(&[back.clone()], Some(5.0));
        assert!(t.manage(&gw, &back, &NORMAL).await.is_empty());
        assert_eq!(t.get(8).unwrap().stop_loss, 1995.0);
    }

    #[tokio::test]
    async fn scalp_mode_forces_exit() {
        let gw = ScriptedGateway::default();
        let mut t = PositionTracker::new(cfg());
        let s = snap(5, Side::Buy, 2000.0, 1995.0, 2003.0, 30.0);
        t.reconcile(&[s.clone()], Some(5.0));
        let ctx = ManageContext { mode: TradingMode::Scalp, ..NORMAL };
        let actions = t.manage(&gw, &s, &ctx).await;
        assert_eq!(actions, vec![ManagementAction::ScalpExit { ticket: 5, profit: 30.0 }]);
        assert_eq!(gw.closes.lock().unwrap()[0], (5, SCALP_EXIT_COMMENT.to_string()));
        assert!(t.get(5).unwrap().forced_exit);

        let closed = t.reconcile(&[], None);
        let event = PositionTracker::finalize_closure(&gw, &closed[0], 0.1).await;
        assert_eq!(event.reason, CloseReason::ScalpExit);
        assert_eq!(event.exit_price, None);
    }

    #[tokio::test]
    async fn zero_entry_atr_is_backfilled() {
        let gw = ScriptedGateway::default();
        let mut t = PositionTracker::new(cfg());
        let s = snap(4, Side::Buy, 2000.0, 0.0, 2000.5, 1.0);
        t.reconcile(&[s.clone()], None);
        t.manage(&gw, &s, &NORMAL).await;
        assert_eq!(t.get(4).unwrap().entry_atr, 5.0);
    }

    #[tokio::test]
    async fn closure_uses_deal_and_tolerance() {
        let deal = DealInfo {
            ticket: 900,
            position_ticket: 2,
            entry: DealEntry::Out,
            price: 2009.9,
            volume: 0.1,
            profit: 99.0,
            commission: -1.0,
            swap: -0.5,
            comment: String::new(),
            time: 1_700_000_000,
        };
        let gw = ScriptedGateway { deal: Some(deal), ..Default::default() };
        let mut t = PositionTracker::new(cfg());
        let s = PositionSnapshot { take_profit: 2010.0, ..snap(2, Side::Buy, 2000.0, 1995.0, 2009.0, 90.0) };
        t.reconcile(&[s], Some(5.0));
        let closed = t.reconcile(&[], None);
        let event = PositionTracker::finalize_closure(&gw, &closed[0], 0.1).await;
        assert_eq!(event.reason, CloseReason::TakeProfitHit);
        assert_eq!(event.profit, Some(97.5));
        assert!((event.pips.unwrap() - 99.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_deal_still_yields_manual_close() {
        let gw = ScriptedGateway::default();
        let mut t = PositionTracker::new(cfg());
        t.reconcile(&[snap(6, Side::Sell, 2000.0, 2005.0, 1999.0, 1.0)], Some(5.0));
        let closed = t.reconcile(&[], None);
        let event = PositionTracker::finalize_closure(&gw, &closed[0], 0.1).await;
        assert_eq!(event.reason, CloseReason::ManualClose);
        assert_eq!(event.profit, None);
    }

    #[test]
    fn classification_cases() {
        let tol = 0.2;
        assert_eq!(classify_close(1995.05, 1995.0, 2010.0, Side::Buy, tol), CloseReason::StopLossHit);
        assert_eq!(classify_close(2009.9, 1995.0, 2010.0, Side::Buy, tol), CloseReason::TakeProfitHit);
        assert_eq!(classify_close(2004.0, 1995.0, 2010.0, Side::Buy, tol), CloseReason::TrailingStop);
        assert_eq!(classify_close(1990.0, 1995.0, 2010.0, Side::Buy, tol), CloseReason::ManualClose);
        assert_eq!(classify_close(1996.0, 2005.0, 1990.0, Side::Sell, tol), CloseReason::TrailingStop);
        assert_eq!(classify_close(1996.0, 0.0, 0.0, Side::Sell, tol), CloseReason::ManualClose);
    }

    proptest! {
        #[test]
        fn classification_is_deterministic(
            exit in 1900.0f64..2100.0,
            stop in 0.0f64..2100.0,
            target in 0.0f64..2100.0,
            buy in any::<bool>(),
        ) {
            let side = if buy { Side::Buy } else { Side::Sell };
            prop_assert_eq!(
                classify_close(exit, stop, target, side, 0.2),
                classify_close(exit, stop, target, side, 0.2)
            );
        }

        #[test]
        fn trailing_never_loosens(moves in proptest::collection::vec(-4.0f64..6.0, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let gw = ScriptedGateway::default();
                let mut t = PositionTracker::new(cfg());
                let mut s = snap(1, Side::Buy, 2000.0, 1995.0, 2000.0, 0.0);
                t.reconcile(&[s.clone()], Some(5.0));
                let mut last_stop = 1995.0;
                let mut price = 2000.0;
                for m in moves {
                    price += m;
                    s.current_price = price;
                    s.stop_loss = last_stop;
                    t.reconcile(&[s.clone()], Some(5.0));
                    t.manage(&gw, &s, &NORMAL).await;
                    let stop = t.get(1).unwrap().stop_loss;
                    assert!(stop >= last_stop);
                    assert!(stop == last_stop || stop < price);
                    last_stop = stop;
                }
            });
        }
    }
}
