//! Tickers driving batch query issuance (§4.6): a fixed-interval
//! `TimeTicker` (optionally aligned to the interval boundary) and a
//! `CronTicker` driven by the `cron` crate.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A source of tick instants, each carrying the wall time the tick fired.
pub struct Ticker {
    rx: mpsc::Receiver<DateTime<Utc>>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Receive the next tick, or `None` once `stop` has joined the fiber.
    pub async fn next(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }

    /// Abort the ticker fiber and wait for it to join.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

fn truncate_to(t: DateTime<Utc>, every: chrono::Duration) -> DateTime<Utc> {
    crate::model::point::truncate_time(t, every)
}

/// `Every(duration, align)`: if `align`, sleeps until the next boundary of
/// `every` before the first tick, then ticks every `every` thereafter.
/// Every emitted time is itself a multiple of `every` when aligned.
pub fn every(every: chrono::Duration, align: bool) -> Result<Ticker> {
    let std_every = every.to_std().map_err(|e| EngineError::Config(e.to_string()))?;
    if std_every.is_zero() {
        return Err(EngineError::Config("ticker interval must be positive".into()));
    }
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        if align {
            let now = Utc::now();
            let boundary = truncate_to(now, every) + every;
            let wait = (boundary - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::time::sleep(wait).await;
            if tx.send(boundary).await.is_err() {
                return;
            }
        }
        let mut interval = tokio::time::interval(std_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            let t = truncate_to(Utc::now(), every);
            if tx.send(t).await.is_err() {
                return;
            }
        }
    });
    Ok(Ticker { rx, handle })
}

/// `Cron(expression)`: emits at successive `expr.next(now)` moments.
pub fn cron(expression: &str) -> Result<Ticker> {
    let schedule = ::cron::Schedule::from_str(expression).map_err(|e| EngineError::Cron(e.to_string()))?;
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else { return };
            let wait = (next - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
            tokio::time::sleep(wait).await;
            if tx.send(next).await.is_err() {
                return;
            }
        }
    });
    Ok(Ticker { rx, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn every_emits_at_the_configured_cadence() {
        let mut t = every(chrono::Duration::milliseconds(20), false).unwrap();
        let first = t.next().await.unwrap();
        let second = t.next().await.unwrap();
        assert!(second >= first);
        t.stop().await;
    }

    #[tokio::test]
    async fn stop_joins_promptly_without_a_tick() {
        let t = every(chrono::Duration::from_std(StdDuration::from_secs(3600)).unwrap(), false).unwrap();
        let started = std::time::Instant::now();
        t.stop().await;
        assert!(started.elapsed() < StdDuration::from_millis(200));
    }

    #[test]
    fn cron_next_resolves_the_next_five_minute_boundary() {
        let schedule = ::cron::Schedule::from_str("0 */5 * * * *").unwrap();
        let pinned = Utc.with_ymd_and_hms(2024, 1, 1, 12, 3, 0).unwrap();
        let next = schedule.after(&pinned).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap());
    }
}
