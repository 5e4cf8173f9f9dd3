//! Zone retest entries during the cash session
//!
//! When price trades back into an untouched plan zone and no order is open,
//! enter at the zone edge in the direction of the zone (long from demand,
//! short from supply) with the stop beyond the far edge and the target at a
//! fixed multiple of risk. Each zone is traded at most once.

use anyhow::Result;
use uuid::Uuid;

use crate::phase::EventGenerator;
use crate::state::SessionState;
use crate::types::{Candle, Event, Order, OrderSide, OrderStatus, PlanZone, ZoneKind};

#[derive(Debug, Clone)]
pub struct ZoneRetestConfig {
    /// Points beyond the zone for the stop
    pub stop_buffer: f64,
    /// Target distance as a multiple of entry-to-stop distance
    pub reward_multiple: f64,
}

impl Default for ZoneRetestConfig {
    fn default() -> Self {
        Self {
            stop_buffer: 1.0,
            reward_multiple: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneRetest {
    config: ZoneRetestConfig,
}

impl ZoneRetest {
    pub fn new(config: ZoneRetestConfig) -> Self {
        Self { config }
    }

    fn order_for(&self, zone: &PlanZone, timestamp: i64) -> Order {
        let (side, entry, stop) = match zone.kind {
            ZoneKind::Demand => (OrderSide::Long, zone.high, zone.low - self.config.stop_buffer),
            ZoneKind::Supply => (OrderSide::Short, zone.low, zone.high + self.config.stop_buffer),
        };
        let risk = (entry - stop).abs();
        let target = match side {
            OrderSide::Long => entry + risk * self.config.reward_multiple,
            OrderSide::Short => entry - risk * self.config.reward_multiple,
        };
        Order {
            id: Uuid::new_v4(),
            timestamp,
            zone_id: zone.id,
            side,
            entry,
            stop,
            target,
            status: OrderStatus::Placed,
            exit_price: None,
        }
    }
}

/// Stop is checked before target when a candle spans both
fn resolve(order: &Order, candle: &Candle) -> Option<(OrderStatus, f64)> {
    match order.side {
        OrderSide::Long if candle.low <= order.stop => Some((OrderStatus::Stopped, order.stop)),
        OrderSide::Long if candle.high >= order.target => Some((OrderStatus::Targeted, order.target)),
        OrderSide::Short if candle.high >= order.stop => Some((OrderStatus::Stopped, order.stop)),
        OrderSide::Short if candle.low <= order.target => Some((OrderStatus::Targeted, order.target)),
        _ => None,
    }
}

impl EventGenerator for ZoneRetest {
    fn name(&self) -> &'static str {
        "zone-retest"
    }

    fn process(&self, mut state: SessionState, candle: &Candle) -> Result<(SessionState, Vec<Event>)> {
        let mut events = Vec::new();

        for order in state.orders.iter_mut().filter(|o| o.status.is_open()) {
            if let Some((status, exit)) = resolve(order, candle) {
                order.status = status;
                order.exit_price = Some(exit);
                order.timestamp = candle.timestamp;
                events.push(Event::Order(order.clone()));
            }
        }

        if state.open_orders().next().is_none() {
            let zone = state
                .plan_zones
                .iter_mut()
                .find(|z| !z.touched && z.overlaps(candle));
            if let Some(zone) = zone {
                zone.touched = true;
                let order = self.order_for(zone, candle.timestamp);
                state.orders.push(order.clone());
                events.push(Event::Order(order));
            }
        }

        Ok((state, events))
    }

    fn finalize(&self, mut state: SessionState) -> Result<(SessionState, Vec<Event>)> {
        let Some(last) = state.last_candle().cloned() else {
            return Ok((state, Vec::new()));
        };

        let mut events = Vec::new();
        for order in state.orders.iter_mut().filter(|o| o.status.is_open()) {
            order.status = OrderStatus::Closed;
            order.exit_price = Some(last.close);
            order.timestamp = last.timestamp;
            events.push(Event::Order(order.clone()));
        }
        Ok((state, events))
    }
}
