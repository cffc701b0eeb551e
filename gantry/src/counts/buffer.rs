//! Delivery debouncing for counts snapshots.
//!
//! The first snapshot goes out immediately; snapshots arriving within the
//! window after a delivery collapse into the latest one, which is flushed
//! when the window elapses. At most one delivery per window.

use gantry_core::Count;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(super) fn debounce(
    mut input: mpsc::UnboundedReceiver<Count>,
    window: Duration,
    token: CancellationToken,
) -> mpsc::Receiver<Count> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut pending: Option<Count> = None;
        let mut last_sent: Option<Instant> = None;
        loop {
            let flush_at = last_sent.map(|sent| sent + window);
            tokio::select! {
                () = token.cancelled() => break,
                item = input.recv() => match item {
                    None => {
                        if let Some(count) = pending.take() {
                            let _ = tx.send(count).await;
                        }
                        break;
                    }
                    Some(count) => {
                        let now = Instant::now();
                        if last_sent.is_none_or(|sent| now - sent >= window) {
                            if tx.send(count).await.is_err() {
                                break;
                            }
                            last_sent = Some(now);
                            pending = None;
                        } else {
                            pending = Some(count);
                        }
                    }
                },
                () = sleep_until_flush(flush_at), if pending.is_some() && flush_at.is_some() => {
                    if let Some(count) = pending.take() {
                        if tx.send(count).await.is_err() {
                            break;
                        }
                        last_sent = Some(Instant::now());
                    }
                }
            }
        }
    });
    rx
}

async fn sleep_until_flush(flush_at: Option<Instant>) {
    match flush_at {
        Some(at) => tokio::time::sleep_until(at).await,
        // guarded by the branch condition; never polled without a deadline
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::ItemCount;
    use std::collections::BTreeMap;

    fn count(id: &str, n: i64) -> Count {
        let mut counts = BTreeMap::new();
        counts.insert(id.to_string(), ItemCount {
            count: n,
            ..ItemCount::default()
        });
        Count::new(counts)
    }

    #[tokio::test(start_paused = true)]
    async fn first_delivery_is_immediate() {
        let (tx, rx_in) = mpsc::unbounded_channel();
        let mut out = debounce(rx_in, Duration::from_secs(5), CancellationToken::new());
        tx.send(count("pod", 1)).unwrap();
        let got = out.recv().await.unwrap();
        assert_eq!(got.counts["pod"].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_to_the_latest_state() {
        let (tx, rx_in) = mpsc::unbounded_channel();
        let window = Duration::from_secs(5);
        let mut out = debounce(rx_in, window, CancellationToken::new());

        tx.send(count("pod", 1)).unwrap();
        assert_eq!(out.recv().await.unwrap().counts["pod"].count, 1);

        // a burst within the window: only the last state survives
        for n in 2..=10 {
            tx.send(count("pod", n)).unwrap();
        }
        // let the buffer drain the burst before the window elapses
        tokio::task::yield_now().await;
        tokio::time::advance(window + Duration::from_millis(1)).await;
        let got = out.recv().await.unwrap();
        assert_eq!(got.counts["pod"].count, 10);

        // and exactly one delivery happened for the burst
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_after_a_quiet_window_are_immediate_again() {
        let (tx, rx_in) = mpsc::unbounded_channel();
        let window = Duration::from_secs(5);
        let mut out = debounce(rx_in, window, CancellationToken::new());

        tx.send(count("pod", 1)).unwrap();
        assert_eq!(out.recv().await.unwrap().counts["pod"].count, 1);

        tokio::time::advance(window * 2).await;
        tx.send(count("pod", 2)).unwrap();
        assert_eq!(out.recv().await.unwrap().counts["pod"].count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_closes_the_stream() {
        let (_tx, rx_in) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let mut out = debounce(rx_in, Duration::from_secs(5), token.clone());
        token.cancel();
        assert!(out.recv().await.is_none());
    }
}
