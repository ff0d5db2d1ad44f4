//! Simulated per-protocol instruments: a slightly downward-biased random
//! walk, broadcast on an independent timer per protocol.

use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::protocol::now_millis;
use crate::types::{Instrument, PriceTick, Protocol};
use rand::Rng;
use tokio::task::JoinHandle;

const VOLATILITY: f64 = 0.002;
const DRIFT_BIAS: f64 = 0.48;

/// Next price in the walk: floor-clamped at 1, rounded to 2 decimals,
/// never non-positive.
pub fn next_price(current: f64, rng: &mut impl Rng) -> f64 {
    let change = (rng.random::<f64>() - DRIFT_BIAS) * VOLATILITY * current;
    let next = (current + change).max(1.0);
    (next * 100.0).round() / 100.0
}

/// Spawn the three tick loops. Each protocol's timer runs independently
/// of connection churn and of the other protocols; a tick with zero live
/// recipients is delivered to nobody. The returned handles are aborted
/// on shutdown.
pub fn spawn_tickers(hub: BroadcastHub, config: &Config) -> Vec<JoinHandle<()>> {
    Protocol::ALL
        .into_iter()
        .map(|protocol| {
            let hub = hub.clone();
            let period = config.update_interval(protocol);
            tokio::spawn(async move {
                let mut instrument = Instrument::for_protocol(protocol);
                let mut interval = tokio::time::interval(period);
                // First tick of tokio's interval fires immediately; skip
                // it so the stream starts one period after boot.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    instrument.price = next_price(instrument.price, &mut rand::rng());
                    hub.tick(
                        protocol,
                        PriceTick {
                            stock: protocol,
                            price: instrument.price,
                            color: instrument.color.to_string(),
                            name: instrument.name.to_string(),
                            timestamp: now_millis(),
                        },
                    );
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_stays_positive_and_rounded() {
        let mut rng = rand::rng();
        let mut price = 100.0;
        for _ in 0..10_000 {
            price = next_price(price, &mut rng);
            assert!(price >= 1.0, "price fell below floor: {price}");
            let cents = price * 100.0;
            assert!((cents - cents.round()).abs() < 1e-9, "not 2-decimal: {price}");
        }
    }

    #[test]
    fn floor_clamps_to_exactly_one() {
        let mut rng = rand::rng();
        // At a price this close to the floor every possible step lands
        // at or below 1, so the clamp must always produce exactly 1.
        for _ in 0..1_000 {
            assert_eq!(next_price(1.0, &mut rng), 1.0);
        }
    }

    #[test]
    fn step_size_is_bounded_by_volatility() {
        let mut rng = rand::rng();
        for _ in 0..1_000 {
            let next = next_price(100.0, &mut rng);
            // Max move is |1 - 0.48| * 0.002 * 100 = 0.104, plus rounding.
            assert!((next - 100.0).abs() <= 0.11, "step too large: {next}");
        }
    }
}
