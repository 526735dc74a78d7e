//! Polling watcher turning observed price moves into chain events.

use crate::datasource::{DataSourceError, StateReader};
use crate::domain::ChainEvent;
use crate::orchestration::monitor::{CheckReport, Monitor};
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Last observed square-root price and reference price.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub sqrt_price_x96: Option<BigUint>,
    pub reference_price_e18: Option<BigUint>,
}

/// Event for the move between two observations, pool price first.
///
/// The first observation counts as a pool price move.
pub fn detect_change(
    previous: &Observation,
    current: &Observation,
    block_number: u64,
) -> Option<ChainEvent> {
    if previous.sqrt_price_x96 != current.sqrt_price_x96 {
        return Some(ChainEvent::PriceChanged {
            block_number,
            tx_ref: None,
        });
    }
    if previous.reference_price_e18 != current.reference_price_e18 {
        return Some(ChainEvent::NavUpdated { block_number });
    }
    None
}

pub struct Watcher {
    reader: Arc<dyn StateReader>,
    monitor: Monitor,
    interval: Duration,
    last: Observation,
}

impl Watcher {
    pub fn new(reader: Arc<dyn StateReader>, monitor: Monitor, interval: Duration) -> Self {
        Self {
            reader,
            monitor,
            interval,
            last: Observation::default(),
        }
    }

    /// Read once and report a change since the previous poll.
    ///
    /// # Errors
    /// Returns the reader error; the previous observation is kept.
    pub async fn poll_once(&mut self) -> Result<Option<ChainEvent>, DataSourceError> {
        let pool = self.reader.read_pool_state().await?;
        let reference = self.reader.read_reference_price().await?;
        let current = Observation {
            sqrt_price_x96: Some(pool.sqrt_price_x96),
            reference_price_e18: Some(reference.0),
        };
        if current == self.last {
            return Ok(None);
        }
        let block = self.reader.block_number().await?;
        let event = detect_change(&self.last, &current, block);
        self.last = current;
        Ok(event)
    }

    /// Poll forever, handing each event to the monitor.
    ///
    /// Cycles run inline, so moves observed while one is in flight collapse into the
    /// next poll.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Watcher started");
        loop {
            ticker.tick().await;
            let event = match self.poll_once().await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Watcher poll failed");
                    continue;
                }
            };
            match self.monitor.handle_event(event).await {
                Ok(CheckReport::NoOpportunity { evaluation }) => {
                    debug!(deviation_bps = evaluation.deviation_bps, "No opportunity")
                }
                Ok(CheckReport::Busy { state }) => debug!(state = state.as_str(), "Event dropped"),
                Ok(CheckReport::Opportunity { .. }) => {}
                Err(e) => warn!(kind = e.kind(), error = %e, "Check failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(sqrt: u64, nav: u64) -> Observation {
        Observation {
            sqrt_price_x96: Some(BigUint::from(sqrt)),
            reference_price_e18: Some(BigUint::from(nav)),
        }
    }

    #[test]
    fn test_first_observation_is_price_change() {
        let event = detect_change(&Observation::default(), &obs(1, 1), 7);
        assert_eq!(
            event,
            Some(ChainEvent::PriceChanged {
                block_number: 7,
                tx_ref: None
            })
        );
    }

    #[test]
    fn test_price_move_wins_over_nav_move() {
        let event = detect_change(&obs(1, 1), &obs(2, 2), 9).unwrap();
        assert!(matches!(event, ChainEvent::PriceChanged { .. }));
    }

    #[test]
    fn test_nav_only_move() {
        let event = detect_change(&obs(1, 1), &obs(1, 2), 9).unwrap();
        assert_eq!(event, ChainEvent::NavUpdated { block_number: 9 });
        assert_eq!(detect_change(&obs(1, 1), &obs(1, 1), 9), None);
    }
}
