//! Batch accumulation for the add/remove stages.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// Collect up to `max` elements. The first element opens the window; the
/// batch closes after `window` elapses, `max` is reached, or the channel
/// closes. An empty result means the channel is closed for good.
pub(crate) async fn collect_batch<T>(
    rx: &mut mpsc::Receiver<T>,
    max: usize,
    window: Duration,
) -> Vec<T> {
    let Some(first) = rx.recv().await else {
        return Vec::new();
    };

    let mut batch = vec![first];
    if max <= 1 {
        return batch;
    }

    let deadline = Instant::now() + window;
    while batch.len() < max {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) => batch.push(item),
            Ok(None) | Err(_) => break,
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn single_element_batch_returns_immediately() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        let batch = collect_batch(&mut rx, 1, Duration::from_secs(5)).await;
        assert_eq!(batch, vec![1]);
        let batch = collect_batch(&mut rx, 1, Duration::from_secs(5)).await;
        assert_eq!(batch, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_collects_everything_already_queued() {
        let (tx, mut rx) = mpsc::channel(8);
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }

        let batch = collect_batch(&mut rx, 100, Duration::from_secs(5)).await;
        assert_eq!(batch, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn max_caps_the_batch() {
        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..10 {
            tx.send(i).await.unwrap();
        }

        let batch = collect_batch(&mut rx, 3, Duration::from_secs(5)).await;
        assert_eq!(batch, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_closes_even_while_sender_is_idle() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(1).await.unwrap();

        let collector = tokio::spawn(async move {
            collect_batch(&mut rx, 100, Duration::from_secs(5)).await
        });
        // Keep the sender alive but quiet; the window must still close.
        let batch = collector.await.unwrap();
        assert_eq!(batch, vec![1]);
        drop(tx);
    }

    #[tokio::test]
    async fn closed_channel_yields_empty_batch() {
        let (tx, mut rx) = mpsc::channel::<i32>(8);
        drop(tx);
        let batch = collect_batch(&mut rx, 10, Duration::from_secs(5)).await;
        assert!(batch.is_empty());
    }
}
