//! Two-input merge with strict priority.
//!
//! The classifier drains the feedback edge ahead of ingress: a reshard
//! synthesized by an earlier add-master always dispatches before any
//! queued ingress task, so a burst of new additions cannot starve the
//! reshard it just scheduled.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

pub(crate) struct PreferredMerge<T> {
    preferred: mpsc::Receiver<T>,
    regular: mpsc::Receiver<T>,
    preferred_done: bool,
    regular_done: bool,
}

impl<T> PreferredMerge<T> {
    pub fn new(preferred: mpsc::Receiver<T>, regular: mpsc::Receiver<T>) -> Self {
        Self {
            preferred,
            regular,
            preferred_done: false,
            regular_done: false,
        }
    }

    /// Next element; `None` once both inputs are closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        // A waiting preferred element wins even when the regular side is
        // also ready.
        if !self.preferred_done {
            match self.preferred.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Disconnected) => self.preferred_done = true,
                Err(TryRecvError::Empty) => {}
            }
        }

        loop {
            tokio::select! {
                biased;
                item = self.preferred.recv(), if !self.preferred_done => match item {
                    Some(item) => return Some(item),
                    None => self.preferred_done = true,
                },
                item = self.regular.recv(), if !self.regular_done => match item {
                    Some(item) => return Some(item),
                    None => self.regular_done = true,
                },
                else => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preferred_elements_dispatch_first() {
        let (pref_tx, pref_rx) = mpsc::channel(8);
        let (reg_tx, reg_rx) = mpsc::channel(8);
        let mut merge = PreferredMerge::new(pref_rx, reg_rx);

        reg_tx.send("ingress-1").await.unwrap();
        reg_tx.send("ingress-2").await.unwrap();
        pref_tx.send("feedback-1").await.unwrap();
        pref_tx.send("feedback-2").await.unwrap();

        assert_eq!(merge.recv().await, Some("feedback-1"));
        assert_eq!(merge.recv().await, Some("feedback-2"));
        assert_eq!(merge.recv().await, Some("ingress-1"));
        assert_eq!(merge.recv().await, Some("ingress-2"));
    }

    #[tokio::test]
    async fn feedback_arriving_mid_stream_jumps_the_queue() {
        let (pref_tx, pref_rx) = mpsc::channel(8);
        let (reg_tx, reg_rx) = mpsc::channel(8);
        let mut merge = PreferredMerge::new(pref_rx, reg_rx);

        reg_tx.send("ingress-1").await.unwrap();
        reg_tx.send("ingress-2").await.unwrap();
        assert_eq!(merge.recv().await, Some("ingress-1"));

        pref_tx.send("feedback-1").await.unwrap();
        assert_eq!(merge.recv().await, Some("feedback-1"));
        assert_eq!(merge.recv().await, Some("ingress-2"));
    }

    #[tokio::test]
    async fn drains_regular_after_preferred_closes() {
        let (pref_tx, pref_rx) = mpsc::channel::<&str>(8);
        let (reg_tx, reg_rx) = mpsc::channel(8);
        let mut merge = PreferredMerge::new(pref_rx, reg_rx);

        drop(pref_tx);
        reg_tx.send("ingress-1").await.unwrap();
        assert_eq!(merge.recv().await, Some("ingress-1"));

        drop(reg_tx);
        assert_eq!(merge.recv().await, None);
    }

    #[tokio::test]
    async fn ends_when_both_inputs_close() {
        let (pref_tx, pref_rx) = mpsc::channel::<&str>(8);
        let (reg_tx, reg_rx) = mpsc::channel::<&str>(8);
        let mut merge = PreferredMerge::new(pref_rx, reg_rx);

        drop(pref_tx);
        drop(reg_tx);
        assert_eq!(merge.recv().await, None);
    }
}
