//! Price alert evaluation: each newly ingested observation is checked
//! against the active wishlist subscriptions for its (game, platform).
//! Alert uniqueness on (subscription, observation) bounds alert volume to
//! the ingestion rate and makes concurrent evaluation of the same
//! observation safe without extra locking.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::model::{AlertEvent, AlertKind, PriceObservation, WishlistSubscription};
use crate::notify::{NotificationEvent, NotificationSink, SourceModule};
use crate::store::PriceStore;

pub struct PriceAlertEvaluator {
    store: Arc<dyn PriceStore>,
    sink: Arc<dyn NotificationSink>,
}

impl PriceAlertEvaluator {
    pub fn new(store: Arc<dyn PriceStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Ingest one observation and emit the alerts it newly satisfies. A
    /// replayed observation id produces no second alert for any
    /// subscription.
    pub async fn on_observation(
        &self,
        observation: &PriceObservation,
    ) -> Result<Vec<AlertEvent>> {
        let observation = self.store.record_observation(observation).await?;
        let subscriptions = self
            .store
            .active_subscriptions(observation.game_id, observation.platform)
            .await?;

        let mut emitted = Vec::new();
        for sub in subscriptions {
            let Some(kind) = satisfied_kind(&sub, &observation) else {
                continue;
            };
            let inserted = self
                .store
                .insert_alert_once(
                    sub.subscription_id,
                    observation.observation_id,
                    kind,
                    observation.recorded_at,
                )
                .await?;
            match inserted {
                Some(alert) => {
                    info!(
                        subscription = sub.subscription_id,
                        observation = observation.observation_id,
                        kind = kind.as_str(),
                        "price alert emitted"
                    );
                    let event = notification_for(&sub, &observation, &alert);
                    // The alert row is the source of truth; a sink hiccup
                    // must not roll it back.
                    if let Err(err) = self.sink.publish(event).await {
                        warn!(
                            alert = alert.alert_id,
                            error = %err,
                            "notification publish failed"
                        );
                    }
                    emitted.push(alert);
                }
                None => {
                    debug!(
                        subscription = sub.subscription_id,
                        observation = observation.observation_id,
                        "duplicate alert absorbed by uniqueness constraint"
                    );
                }
            }
        }
        Ok(emitted)
    }
}

/// Which target, if any, the observation satisfies. When both targets are
/// configured and met, the price target wins.
fn satisfied_kind(
    sub: &WishlistSubscription,
    observation: &PriceObservation,
) -> Option<AlertKind> {
    if let Some(target) = sub.target_price_minor {
        if observation.current_price_minor <= target {
            return Some(AlertKind::TargetPrice);
        }
    }
    if let Some(target) = sub.target_discount {
        if observation.discount_rate >= target {
            return Some(AlertKind::TargetDiscount);
        }
    }
    None
}

fn notification_for(
    sub: &WishlistSubscription,
    observation: &PriceObservation,
    alert: &AlertEvent,
) -> NotificationEvent {
    let price = format_minor(observation.current_price_minor);
    let content = match alert.kind {
        AlertKind::TargetPrice => format!(
            "A wishlisted game on {} dropped to {price}, at or below your target of {}.",
            observation.platform,
            format_minor(sub.target_price_minor.unwrap_or_default()),
        ),
        AlertKind::TargetDiscount => format!(
            "A wishlisted game on {} is {}% off, meeting your target of {}%.",
            observation.platform,
            observation.discount_rate,
            sub.target_discount.unwrap_or_default(),
        ),
    };
    NotificationEvent {
        user_id: sub.user_id,
        source_module: SourceModule::PriceAlert,
        title: "Wishlist price alert".into(),
        content,
        related_id: alert.alert_id,
    }
}

fn format_minor(minor: i64) -> String {
    format!("{}.{:02}", minor / 100, (minor % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlatformId;
    use crate::notify::RecordingSink;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn subscription(
        user_id: i64,
        game_id: i64,
        target_price: Option<i64>,
        target_discount: Option<i64>,
    ) -> WishlistSubscription {
        WishlistSubscription {
            subscription_id: 0,
            user_id,
            game_id,
            platform: PlatformId::Steam,
            target_price_minor: target_price,
            target_discount,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn observation(id: i64, game_id: i64, price: i64, discount: i64) -> PriceObservation {
        PriceObservation {
            observation_id: id,
            game_id,
            platform: PlatformId::Steam,
            current_price_minor: price,
            original_price_minor: if discount > 0 {
                price * 100 / (100 - discount).max(1)
            } else {
                price
            },
            discount_rate: discount,
            recorded_at: Utc::now(),
        }
    }

    fn evaluator(store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> PriceAlertEvaluator {
        PriceAlertEvaluator::new(store, sink)
    }

    #[tokio::test]
    async fn discount_crossing_emits_one_alert_and_notification() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .upsert_subscription(&subscription(1, 7, None, Some(30)))
            .await
            .unwrap();
        let eval = evaluator(Arc::clone(&store), Arc::clone(&sink));

        let emitted = eval.on_observation(&observation(100, 7, 2399, 40)).await.unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].kind, AlertKind::TargetDiscount);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].user_id, 1);
        assert_eq!(sink.events()[0].related_id, emitted[0].alert_id);
    }

    #[tokio::test]
    async fn replayed_observation_id_is_deduplicated() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .upsert_subscription(&subscription(1, 7, None, Some(30)))
            .await
            .unwrap();
        let eval = evaluator(Arc::clone(&store), Arc::clone(&sink));

        let obs = observation(100, 7, 2399, 40);
        assert_eq!(eval.on_observation(&obs).await.unwrap().len(), 1);
        assert_eq!(eval.on_observation(&obs).await.unwrap().len(), 0);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(store.alert_count().await, 1);
    }

    #[tokio::test]
    async fn later_observation_fires_again() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .upsert_subscription(&subscription(1, 7, None, Some(30)))
            .await
            .unwrap();
        let eval = evaluator(Arc::clone(&store), Arc::clone(&sink));

        assert_eq!(eval.on_observation(&observation(100, 7, 2399, 40)).await.unwrap().len(), 1);
        // a distinct observation satisfying the condition again is a new
        // crossing
        assert_eq!(eval.on_observation(&observation(101, 7, 1999, 50)).await.unwrap().len(), 1);
        assert_eq!(store.alert_count().await, 2);
    }

    #[tokio::test]
    async fn price_target_wins_when_both_match() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .upsert_subscription(&subscription(1, 7, Some(2500), Some(30)))
            .await
            .unwrap();
        let eval = evaluator(Arc::clone(&store), Arc::clone(&sink));

        let emitted = eval.on_observation(&observation(100, 7, 2399, 40)).await.unwrap();
        assert_eq!(emitted[0].kind, AlertKind::TargetPrice);
    }

    #[tokio::test]
    async fn inactive_and_unrelated_subscriptions_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let mut inactive = subscription(1, 7, None, Some(10));
        inactive.is_active = false;
        store.upsert_subscription(&inactive).await.unwrap();
        // same game, wrong platform
        let mut other_platform = subscription(2, 7, None, Some(10));
        other_platform.platform = PlatformId::Gog;
        store.upsert_subscription(&other_platform).await.unwrap();
        let eval = evaluator(Arc::clone(&store), Arc::clone(&sink));

        let emitted = eval.on_observation(&observation(100, 7, 999, 80)).await.unwrap();
        assert!(emitted.is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn condition_below_targets_stays_silent() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .upsert_subscription(&subscription(1, 7, Some(1000), Some(50)))
            .await
            .unwrap();
        let eval = evaluator(Arc::clone(&store), Arc::clone(&sink));

        let emitted = eval.on_observation(&observation(100, 7, 2399, 20)).await.unwrap();
        assert!(emitted.is_empty());
    }

    #[tokio::test]
    async fn concurrent_evaluation_of_same_observation_emits_once() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .upsert_subscription(&subscription(1, 7, None, Some(30)))
            .await
            .unwrap();
        let eval = Arc::new(evaluator(Arc::clone(&store), Arc::clone(&sink)));

        let obs = observation(100, 7, 2399, 40);
        let a = tokio::spawn({
            let eval = Arc::clone(&eval);
            let obs = obs.clone();
            async move { eval.on_observation(&obs).await.unwrap().len() }
        });
        let b = tokio::spawn({
            let eval = Arc::clone(&eval);
            let obs = obs.clone();
            async move { eval.on_observation(&obs).await.unwrap().len() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a + b, 1, "exactly one evaluation won the insert");
        assert_eq!(store.alert_count().await, 1);
    }
}
