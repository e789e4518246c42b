//! SegmentFetcher: drives one Interest/Data exchange to completion,
//! including retransmission, Nack handling and congestion backoff.
//!
//! Grounded on `data-fetcher.cpp`'s retry state machine and on the
//! teacher's `TCB::on_tick` retransmission path (`tcp/tcb.rs`: "check
//! deadline, double backoff, resend"). Expressed here as a plain `async fn`
//! rather than a callback-bearing object — see the "owned task" option in
//! §9 of the design notes — so there is no fetcher-side handle for a
//! Pipeline to reach back into at all.

use std::time::{Duration, Instant};

use crate::face::{Face, Reply};
use crate::types::{Interest, NackReason};

const MAX_CONGESTION_BACKOFF_MS: u64 = 10_000;

/// Budget for unbounded retries, matching `MAX_RETRIES_INFINITE` in the
/// source.
pub const UNBOUNDED_RETRIES: i64 = -1;

pub struct FetchSuccess {
    pub data: crate::types::Data,
    pub transmissions: Vec<Instant>,
    pub arrival: Instant,
}

#[derive(Debug)]
pub enum FetchError {
    MaxNackRetriesReached,
    MaxTimeoutRetriesReached,
    /// A Nack with a reason other than duplicate/congestion: terminal and
    /// not retried.
    Nack(String),
    Io(std::io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::MaxNackRetriesReached => {
                write!(f, "reached the maximum number of nack retries")
            }
            FetchError::MaxTimeoutRetriesReached => {
                write!(f, "reached the maximum number of timeout retries")
            }
            FetchError::Nack(reason) => {
                write!(f, "could not retrieve data, nack reason: {reason}")
            }
            FetchError::Io(err) => write!(f, "{err}"),
        }
    }
}

pub enum FetchResult {
    Success(FetchSuccess),
    /// `canSend` vetoed the send; the caller has already requeued this
    /// segment/slot and no Interest was emitted.
    Deferred,
    Failed(FetchError),
}

fn within_budget(count: i64, max_retries: i64) -> bool {
    max_retries == UNBOUNDED_RETRIES || count <= max_retries
}

/// Drives one segment to completion. `lifetime_ms` is called before every
/// (re)transmission so the caller can derive it from the current RTO;
/// `can_send` is consulted before every (re)transmission so a Pipeline can
/// veto a send when the window has since contracted; `on_timeout` fires
/// once per timeout that still has retry budget remaining, before the
/// retransmission goes out (the "transient" hook; terminal exhaustion is
/// reported through the returned `FetchResult` instead).
pub async fn run_fetch<F, CanSend, OnTimeout>(
    face: &F,
    mut interest: Interest,
    max_retries: i64,
    lifetime_ms: impl Fn() -> u64,
    mut can_send: CanSend,
    mut on_timeout: OnTimeout,
) -> FetchResult
where
    F: Face + ?Sized,
    CanSend: FnMut() -> bool,
    OnTimeout: FnMut(),
{
    let mut transmissions = Vec::new();
    let mut n_nacks: i64 = 0;
    let mut n_timeouts: i64 = 0;
    let mut n_congestion_retries: u32 = 0;

    loop {
        if !can_send() {
            return FetchResult::Deferred;
        }

        transmissions.push(Instant::now());
        let lifetime = lifetime_ms();
        interest.lifetime_ms = lifetime;

        let attempt = tokio::time::timeout(
            Duration::from_millis(lifetime),
            face.express_interest(interest.clone()),
        )
        .await;

        match attempt {
            Err(_elapsed) => {
                n_timeouts += 1;
                if !within_budget(n_timeouts, max_retries) {
                    return FetchResult::Failed(FetchError::MaxTimeoutRetriesReached);
                }
                on_timeout();
                interest.refresh_nonce();
            }
            Ok(Err(io_err)) => return FetchResult::Failed(FetchError::Io(io_err)),
            Ok(Ok(Reply::Data(data))) => {
                let arrival = Instant::now();
                return FetchResult::Success(FetchSuccess {
                    data,
                    transmissions,
                    arrival,
                });
            }
            Ok(Ok(Reply::Nack(NackReason::Duplicate))) => {
                interest.refresh_nonce();
            }
            Ok(Ok(Reply::Nack(NackReason::Congestion))) => {
                n_nacks += 1;
                if !within_budget(n_nacks, max_retries) {
                    return FetchResult::Failed(FetchError::MaxNackRetriesReached);
                }
                let backoff_ms = 1u64
                    .checked_shl(n_congestion_retries)
                    .unwrap_or(u64::MAX)
                    .min(MAX_CONGESTION_BACKOFF_MS);
                if backoff_ms < MAX_CONGESTION_BACKOFF_MS {
                    n_congestion_retries += 1;
                }
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                interest.refresh_nonce();
            }
            Ok(Ok(Reply::Nack(NackReason::Other(reason)))) => {
                return FetchResult::Failed(FetchError::Nack(reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::MockFace;
    use crate::types::Name;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn succeeds_on_first_reply() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let face = MockFace::new(tx);
                let interest = Interest::new(Name::parse("/a").with_segment(0), true, 4000);

                let fetch = run_fetch(&face, interest, 3, || 4000, || true, || {});
                let driver = async {
                    let sent = rx.recv().await.unwrap();
                    face.deliver(
                        &sent.name,
                        Reply::Data(crate::types::Data {
                            name: sent.name.clone(),
                            content: b"hi".to_vec(),
                            final_block_id: Some(0),
                            content_type: crate::types::ContentType::Blob,
                        }),
                    );
                };
                let (result, _) = tokio::join!(fetch, driver);
                match result {
                    FetchResult::Success(s) => assert_eq!(s.data.content, b"hi"),
                    _ => panic!("expected success"),
                }
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn exhausts_timeout_budget() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
                let face = MockFace::new(tx);
                let interest = Interest::new(Name::parse("/a").with_segment(0), true, 10);
                let timeouts = Rc::new(Cell::new(0));
                let timeouts_clone = timeouts.clone();

                let result = run_fetch(&face, interest, 1, || 10, || true, move || {
                    timeouts_clone.set(timeouts_clone.get() + 1);
                })
                .await;

                assert!(matches!(
                    result,
                    FetchResult::Failed(FetchError::MaxTimeoutRetriesReached)
                ));
                assert_eq!(timeouts.get(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn can_send_veto_defers_without_sending() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
                let face = MockFace::new(tx);
                let interest = Interest::new(Name::parse("/a").with_segment(0), true, 10);
                let result = run_fetch(&face, interest, 1, || 10, || false, || {}).await;
                assert!(matches!(result, FetchResult::Deferred));
            })
            .await;
    }
}
