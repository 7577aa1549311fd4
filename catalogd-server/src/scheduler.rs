//! Periodic `FetchAll`/`GarbageCollect` tickers plus the one startup
//! `FetchAll` that precedes them (§4.6).

use std::time::Duration;

use catalogd_core::{FetchHandle, FetchRequest};

pub fn spawn(fetch: FetchHandle, fetch_all_interval: Duration, garbage_collect_interval: Duration) {
    tokio::spawn(run(fetch, fetch_all_interval, garbage_collect_interval));
}

async fn run(fetch: FetchHandle, fetch_all_interval: Duration, garbage_collect_interval: Duration) {
    fetch.send(FetchRequest::FetchAll).await;

    let mut fetch_all_ticker = tokio::time::interval(fetch_all_interval);
    fetch_all_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    fetch_all_ticker.tick().await; // consume the immediate first tick; we already fired above

    let mut garbage_collect_ticker = tokio::time::interval(garbage_collect_interval);
    garbage_collect_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    garbage_collect_ticker.tick().await;

    loop {
        tokio::select! {
            _ = fetch_all_ticker.tick() => {
                tracing::debug!("scheduler firing FetchAll");
                fetch.send(FetchRequest::FetchAll).await;
            }
            _ = garbage_collect_ticker.tick() => {
                tracing::debug!("scheduler firing GarbageCollect");
                fetch.send(FetchRequest::GarbageCollect).await;
            }
        }
    }
}
