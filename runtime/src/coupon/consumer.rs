//! Batching consumer for the coupon issuance pipeline.
//!
//! One loop owns the in-memory queue and drains it on exactly two
//! triggers: the queue reaching `batch_size`, or the flush ticker firing
//! with a non-empty queue. Nothing else ever drains, so there is no race
//! between a size-triggered and a timer-triggered drain.
//!
//! Processing is idempotent against redelivery: a dedup marker and the
//! unique grant constraint both turn a duplicate into a FAILED
//! already-issued outcome instead of a second grant. Transient store or
//! broker failures re-enqueue the message with an incremented retry count
//! until the cap, after which the saga row records the exhaustion.
//!
//! The stock-counter decrement that comes back negative is deliberately
//! not undone. The counter only answers "is there budget left", and a
//! value of -37 answers it as well as 0 does; undoing would reopen the
//! race the atomic decrement closed.

use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flashsale_core::broker::MessageStream;
use flashsale_core::counter::{COUNTER_TTL, CounterStore, coupon_issued_key, coupon_stock_key};
use flashsale_core::domain::{Coupon, Member, MemberCoupon};
use flashsale_core::environment::Clock;
use flashsale_core::error::CoreError;
use flashsale_core::saga::{CouponIssueMessage, SagaEvent};
use flashsale_core::store::{CouponStore, GrantStore, MemberStore, SagaStore, StoreError};

use crate::config::ConsumerConfig;

/// How one message resolved.
enum Outcome {
    /// Grant persisted; saga goes SUCCESS.
    Granted,
    /// Business rejection; saga goes FAILED with the reason, no retry.
    Rejected(String),
    /// Infrastructure failure; retry if budget remains.
    Retry(CoreError),
}

/// Lookups resolved once per batch.
#[derive(Default)]
struct BatchCache {
    members: HashMap<String, Option<Member>>,
    coupons: HashMap<String, Option<Coupon>>,
}

/// Handle to a running consumer task.
pub struct ConsumerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stop the loop, draining whatever is still queued first.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            error!(%err, "consumer task did not shut down cleanly");
        }
    }
}

/// Drains `coupon-issue-events` in batches and persists the outcomes.
pub struct CouponIssueConsumer {
    members: Arc<dyn MemberStore>,
    coupons: Arc<dyn CouponStore>,
    grants: Arc<dyn GrantStore>,
    sagas: Arc<dyn SagaStore>,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
}

impl CouponIssueConsumer {
    /// Wire up a consumer.
    #[must_use]
    pub fn new(
        members: Arc<dyn MemberStore>,
        coupons: Arc<dyn CouponStore>,
        grants: Arc<dyn GrantStore>,
        sagas: Arc<dyn SagaStore>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            members,
            coupons,
            grants,
            sagas,
            counters,
            clock,
            config,
        }
    }

    /// Spawn the consumer loop over an established subscription.
    #[must_use]
    pub fn spawn(self, stream: MessageStream) -> ConsumerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stream, stop_rx));
        ConsumerHandle { stop, task }
    }

    async fn run(self, mut stream: MessageStream, mut stop: watch::Receiver<bool>) {
        let mut queue: VecDeque<CouponIssueMessage> = VecDeque::new();
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(raw)) => {
                        match raw.decode_json::<CouponIssueMessage>() {
                            Ok(message) => {
                                queue.push_back(message);
                                if queue.len() >= self.config.batch_size {
                                    self.drain(&mut queue).await;
                                }
                            },
                            Err(err) => {
                                warn!(event_id = raw.event_id, %err, "undecodable message dropped");
                            },
                        }
                    },
                    Some(Err(err)) => warn!(%err, "subscription error"),
                    None => break,
                },
                _ = ticker.tick() => {
                    if !queue.is_empty() {
                        self.drain(&mut queue).await;
                    }
                },
                _ = stop.changed() => break,
            }
        }

        // Retries re-enqueue, so keep draining until the queue settles.
        while !queue.is_empty() {
            self.drain(&mut queue).await;
        }
        info!("consumer stopped");
    }

    /// Process up to one batch off the front of the queue.
    async fn drain(&self, queue: &mut VecDeque<CouponIssueMessage>) {
        let take = queue.len().min(self.config.batch_size);
        let batch: Vec<CouponIssueMessage> = queue.drain(..take).collect();
        debug!(batch_size = batch.len(), "draining batch");

        let mut cache = BatchCache::default();
        for mut message in batch {
            match self.process(&message, &mut cache).await {
                Outcome::Granted => {
                    self.record(&message, |row, now| row.mark_success(now)).await;
                },
                Outcome::Rejected(reason) => {
                    info!(event_id = message.event_id, reason, "claim rejected");
                    self.record(&message, |row, now| row.mark_failed(reason, now))
                        .await;
                },
                Outcome::Retry(err) => {
                    message.increment_retry();
                    if message.can_retry() {
                        warn!(
                            event_id = message.event_id,
                            retry_count = message.retry_count,
                            %err,
                            "transient failure, re-enqueued"
                        );
                        queue.push_back(message);
                    } else {
                        let reason = CoreError::RetryExhausted {
                            attempts: message.retry_count,
                            last_error: err.to_string(),
                        }
                        .to_string();
                        error!(event_id = message.event_id, reason, "claim abandoned");
                        self.record(&message, |row, now| row.mark_failed(reason, now))
                            .await;
                    }
                },
            }
        }
    }

    async fn process(&self, message: &CouponIssueMessage, cache: &mut BatchCache) -> Outcome {
        let member = match self.member(&message.member_email, cache).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                return Outcome::Rejected(format!("member '{}' not found", message.member_email));
            },
            Err(err) => return Outcome::Retry(err),
        };
        let coupon = match self.coupon(&message.coupon_code, cache).await {
            Ok(Some(coupon)) => coupon,
            Ok(None) => {
                return Outcome::Rejected(format!("coupon '{}' not found", message.coupon_code));
            },
            Err(err) => return Outcome::Retry(err),
        };

        let now = self.clock.now();
        if !coupon.is_available(now) {
            return Outcome::Rejected(format!("coupon '{}' is not available", coupon.code));
        }

        let marker = coupon_issued_key(coupon.id, &member.email);
        let duplicate = match self.counters.has_marker(&marker).await {
            Ok(hit) => hit,
            Err(err) => return Outcome::Retry(err.into()),
        };
        if duplicate {
            return Outcome::Rejected(already_issued(&member.email, &coupon.code));
        }
        match self.grants.exists(&member.email, &coupon.code).await {
            Ok(true) => return Outcome::Rejected(already_issued(&member.email, &coupon.code)),
            Ok(false) => {},
            Err(err) => return Outcome::Retry(err.into()),
        }

        match self.counters.decrement(&coupon_stock_key(coupon.id)).await {
            Ok(remaining) if remaining < 0 => return Outcome::Rejected("stock exhausted".into()),
            Ok(_) => {},
            Err(err) => return Outcome::Retry(err.into()),
        }

        let grant = MemberCoupon {
            member_email: member.email.clone(),
            coupon_id: coupon.id,
            coupon_code: coupon.code.clone(),
            used: false,
            issued_at: now,
        };
        match self.grants.insert(grant).await {
            Ok(_) => {},
            Err(StoreError::Conflict(_)) => {
                return Outcome::Rejected(already_issued(&member.email, &coupon.code));
            },
            Err(err) => return Outcome::Retry(err.into()),
        }

        // The grant row is the source of truth; a lost marker only costs
        // one extra dedup query on the next duplicate.
        if let Err(err) = self.counters.put_marker(&marker, COUNTER_TTL).await {
            warn!(marker, %err, "dedup marker write failed");
        }
        info!(
            event_id = message.event_id,
            email = member.email,
            coupon_code = coupon.code,
            "coupon granted"
        );
        Outcome::Granted
    }

    async fn member(
        &self,
        email: &str,
        cache: &mut BatchCache,
    ) -> Result<Option<Member>, CoreError> {
        if let Some(hit) = cache.members.get(email) {
            return Ok(hit.clone());
        }
        let looked_up = match self.members.find(email).await {
            Ok(member) => Some(member),
            Err(StoreError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        cache.members.insert(email.to_string(), looked_up.clone());
        Ok(looked_up)
    }

    async fn coupon(
        &self,
        code: &str,
        cache: &mut BatchCache,
    ) -> Result<Option<Coupon>, CoreError> {
        if let Some(hit) = cache.coupons.get(code) {
            return Ok(hit.clone());
        }
        let looked_up = match self.coupons.find_by_code(code).await {
            Ok(coupon) => Some(coupon),
            Err(StoreError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        cache.coupons.insert(code.to_string(), looked_up.clone());
        Ok(looked_up)
    }

    /// Apply a terminal transition to the saga row.
    async fn record<F>(&self, message: &CouponIssueMessage, transition: F)
    where
        F: FnOnce(&mut SagaEvent, chrono::DateTime<chrono::Utc>),
    {
        let now = self.clock.now();
        let mut row = match self.sagas.find(&message.event_id).await {
            Ok(row) => row,
            // Producer and consumer may race on a fresh event; rebuild the
            // row from the message rather than dropping the outcome.
            Err(StoreError::NotFound(_)) => SagaEvent::from_message(message, now),
            Err(err) => {
                error!(event_id = message.event_id, %err, "saga row lookup failed");
                SagaEvent::from_message(message, now)
            },
        };
        // Terminal rows transition exactly once; a redelivered event must
        // not rewrite an outcome that is already recorded.
        if row.is_terminal() {
            debug!(event_id = message.event_id, "saga row already terminal");
            return;
        }
        row.retry_count = message.retry_count;
        transition(&mut row, now);
        if let Err(err) = self.sagas.upsert(row).await {
            error!(event_id = message.event_id, %err, "saga row write failed");
        }
    }
}

fn already_issued(email: &str, coupon_code: &str) -> String {
    CoreError::AlreadyIssued {
        email: email.to_string(),
        coupon_code: coupon_code.to_string(),
    }
    .to_string()
}
