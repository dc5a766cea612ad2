//! Session controller
//!
//! Routes each message by session mode:
//!
//! ADVICE → advice flow → (purchase intent?) → AWAITING_AMOUNT
//! AWAITING_AMOUNT → purchase flow → AWAITING_CONTACT
//! AWAITING_CONTACT → purchase flow → ADVICE on success, else stays

use crate::amount_parser::AmountParser;
use crate::config::AgentConfig;
use crate::flows::{AdviceFlow, PurchaseFlow, PurchaseStep};
use crate::llm::{LlmClient, OpenRouterClient};
use crate::models::{Session, SessionMode};
use crate::price::{HttpPriceOracle, PriceOracle};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::storage::{build_store, PurchaseStore};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one processed message
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    /// Session after the turn
    pub session: Session,
    /// The purchase step, when the purchase flow handled the turn
    pub purchase: Option<PurchaseStep>,
}

impl TurnOutcome {
    /// True only when a purchase was persisted this turn
    pub fn success(&self) -> bool {
        self.purchase
            .as_ref()
            .map(PurchaseStep::success)
            .unwrap_or(false)
    }
}

pub struct SessionController {
    advice: AdviceFlow,
    purchase: PurchaseFlow,
    sessions: Arc<dyn SessionStore>,
    purchases: Arc<dyn PurchaseStore>,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionController {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        oracle: Arc<dyn PriceOracle>,
        purchases: Arc<dyn PurchaseStore>,
        sessions: Arc<dyn SessionStore>,
        parser: AmountParser,
    ) -> Self {
        Self {
            advice: AdviceFlow::new(llm, oracle.clone()),
            purchase: PurchaseFlow::new(parser, oracle, purchases.clone()),
            sessions,
            purchases,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the HTTP collaborators described by `config`
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let llm = Arc::new(OpenRouterClient::new(&config.llm)?);
        let oracle = Arc::new(HttpPriceOracle::new(&config.price)?);
        let purchases = build_store(config.database_url.as_deref());
        let sessions = Arc::new(InMemorySessionStore::from_idle_timeout(
            config.session_idle_timeout,
        ));

        Ok(Self::new(
            llm,
            oracle,
            purchases,
            sessions,
            AmountParser::new(config.amount_parser),
        )
        .retain_pending_on_storage_failure(config.retain_pending_on_storage_failure))
    }

    pub fn retain_pending_on_storage_failure(mut self, retain: bool) -> Self {
        self.purchase = self.purchase.retain_pending_on_storage_failure(retain);
        self
    }

    pub fn advice(&self) -> &AdviceFlow {
        &self.advice
    }

    pub fn purchase(&self) -> &PurchaseFlow {
        &self.purchase
    }

    pub fn purchases(&self) -> &Arc<dyn PurchaseStore> {
        &self.purchases
    }

    /// Process one message against `session` without touching the store.
    ///
    /// On error the caller's session is left exactly as it was.
    pub async fn process_turn(&self, message: &str, session: &Session) -> Result<TurnOutcome> {
        let (reply, mode, purchase) = match &session.mode {
            SessionMode::Advice => {
                let reply = self
                    .advice
                    .respond(message, &session.user_name, &session.conversation_log)
                    .await?;
                let mode = if reply.purchase_intent {
                    SessionMode::AwaitingAmount
                } else {
                    SessionMode::Advice
                };
                (reply.message, mode, None)
            }
            SessionMode::AwaitingAmount => {
                let step = self.purchase.handle(message, &session.user_name, None).await;
                (step.message().to_string(), step.next_mode(), Some(step))
            }
            SessionMode::AwaitingContact(pending) => {
                let step = self
                    .purchase
                    .handle(message, &session.user_name, Some(pending))
                    .await;
                (step.message().to_string(), step.next_mode(), Some(step))
            }
        };

        if mode != session.mode {
            info!(
                user = %session.user_identifier,
                from = %session.mode,
                to = %mode,
                "Session mode changed"
            );
        }

        let mut next = session.clone();
        next.conversation_log.record_turn(message, &reply);
        next.mode = mode;

        Ok(TurnOutcome {
            reply,
            session: next,
            purchase,
        })
    }

    /// Load (or create) the user's session, process the message and store the
    /// result. Turns for the same user run one at a time.
    pub async fn chat(
        &self,
        user_identifier: &str,
        message: &str,
        user_name: Option<&str>,
    ) -> Result<TurnOutcome> {
        let lock = self.turn_lock(user_identifier);
        let result = {
            let _guard = lock.lock().await;
            self.chat_locked(user_identifier, message, user_name).await
        };
        self.release_turn_lock(user_identifier, lock);
        result
    }

    async fn chat_locked(
        &self,
        user_identifier: &str,
        message: &str,
        user_name: Option<&str>,
    ) -> Result<TurnOutcome> {
        let session = match self.sessions.get(user_identifier).await? {
            Some(session) => session,
            None => {
                debug!(user = %user_identifier, "Creating session");
                Session::new(user_identifier, user_name.unwrap_or(user_identifier))
            }
        };

        let outcome = self.process_turn(message, &session).await?;
        self.sessions.put(outcome.session.clone()).await?;

        Ok(outcome)
    }

    /// Current session for a user, if any
    pub async fn session(&self, user_identifier: &str) -> Result<Option<Session>> {
        self.sessions.get(user_identifier).await
    }

    /// Abandon the user's conversation; returns whether a session existed
    pub async fn reset(&self, user_identifier: &str) -> Result<bool> {
        let lock = self.turn_lock(user_identifier);
        let removed = {
            let _guard = lock.lock().await;
            self.sessions.delete(user_identifier).await
        };
        self.release_turn_lock(user_identifier, lock);

        let removed = removed?;
        info!(user = %user_identifier, removed, "Session reset");
        Ok(removed)
    }

    /// Drop expired sessions and turn locks nobody holds
    pub async fn purge_idle(&self) -> Result<usize> {
        let purged = self.sessions.purge_expired().await?;

        let mut locks = self.lock_map();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let released = before - locks.len();

        if purged > 0 || released > 0 {
            info!(purged, released, "Purged idle sessions");
        }
        Ok(purged)
    }

    /// Run `purge_idle` every `every` until the runtime shuts down
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if let Err(e) = controller.purge_idle().await {
                    warn!("Idle session sweep failed: {}", e);
                }
            }
        })
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        match self.turn_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn turn_lock(&self, user_identifier: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_map()
            .entry(user_identifier.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget the user's lock once the map and `lock` are its only holders.
    /// New holders clone under the map mutex, so nobody can be queued on it.
    fn release_turn_lock(&self, user_identifier: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.lock_map();
        let idle = locks
            .get(user_identifier)
            .map(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2)
            .unwrap_or(false);
        if idle {
            locks.remove(user_identifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GoldAgentError;
    use crate::flows::advice::REFUSAL_MESSAGE;
    use crate::llm::LlmMessage;
    use crate::models::{NewPurchase, PendingPurchase, PurchaseRecord};
    use crate::price::FixedPriceOracle;
    use crate::storage::InMemoryPurchaseStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// LLM double: replies with the sentinel when the prompt mentions buying
    struct FakeLlm {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeLlm {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for FakeLlm {
        async fn complete(&self, prompt: &str, _history: &[LlmMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(GoldAgentError::LlmError("service unavailable".to_string()));
            }
            if prompt.to_lowercase().contains("buy") {
                Ok("__PURCHASE_INTENT__".to_string())
            } else if prompt.to_lowercase().contains("cricket") {
                Ok("Sorry, I can only answer queries related to gold investment.".to_string())
            } else {
                Ok("Digital gold is stored in insured vaults.".to_string())
            }
        }
    }

    /// Purchase store that counts inserts and can be switched to failing
    struct CountingStore {
        inner: InMemoryPurchaseStore,
        inserts: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryPurchaseStore::new(),
                inserts: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl PurchaseStore for CountingStore {
        async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(GoldAgentError::DatabaseError("timeout".to_string()));
            }
            self.inner.insert_purchase(purchase).await
        }

        async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>> {
            self.inner.list_purchases().await
        }
    }

    struct Harness {
        controller: SessionController,
        llm: Arc<FakeLlm>,
        store: Arc<CountingStore>,
    }

    fn harness() -> Harness {
        let llm = Arc::new(FakeLlm::new());
        let store = Arc::new(CountingStore::new());
        let controller = SessionController::new(
            llm.clone(),
            Arc::new(FixedPriceOracle::new(dec!(6500.00))),
            store.clone(),
            Arc::new(InMemorySessionStore::new()),
            AmountParser::default(),
        );
        Harness {
            controller,
            llm,
            store,
        }
    }

    fn quoted_pending() -> PendingPurchase {
        PendingPurchase {
            user_name: "Asha".to_string(),
            grams: dec!(0.7692),
            amount_currency: dec!(5000),
            price_per_gram: dec!(6500.00),
        }
    }

    fn session_in(mode: SessionMode) -> Session {
        let mut session = Session::new("user-1", "Asha");
        session.mode = mode;
        session
    }

    #[tokio::test]
    async fn test_purchase_intent_enters_purchase_mode() {
        let h = harness();

        let outcome = h
            .controller
            .process_turn("I want to buy gold", &session_in(SessionMode::Advice))
            .await
            .unwrap();

        assert_eq!(outcome.session.mode, SessionMode::AwaitingAmount);
        assert!(outcome.session.pending_purchase().is_none());
        assert!(outcome.reply.contains("start investing from ₹10"));
        assert!(!outcome.success());
        assert_eq!(outcome.session.conversation_log.len(), 2);
    }

    #[tokio::test]
    async fn test_quote_step() {
        let h = harness();

        let outcome = h
            .controller
            .process_turn(
                "Buy gold worth 5000 rupees",
                &session_in(SessionMode::AwaitingAmount),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.session.mode,
            SessionMode::AwaitingContact(quoted_pending())
        );
        assert_eq!(outcome.session.mode.label(), "purchase");
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_confirmation_returns_to_advice() {
        let h = harness();

        let outcome = h
            .controller
            .process_turn(
                "9876543210 user@example.com",
                &session_in(SessionMode::AwaitingContact(quoted_pending())),
            )
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.session.mode, SessionMode::Advice);
        assert!(outcome.session.pending_purchase().is_none());
        assert_eq!(h.store.inserts.load(Ordering::SeqCst), 1);

        let saved = h.store.list_purchases().await.unwrap();
        assert_eq!(saved[0].phone, "9876543210");
        assert_eq!(saved[0].email, "user@example.com");
    }

    #[tokio::test]
    async fn test_missing_contact_stays_pending() {
        let h = harness();
        let before = session_in(SessionMode::AwaitingContact(quoted_pending()));

        let outcome = h.controller.process_turn("call me", &before).await.unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.session.mode, before.mode);
        assert_eq!(h.store.inserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_price_query_does_not_call_llm() {
        let h = harness();

        let outcome = h
            .controller
            .process_turn("what is gold price today", &session_in(SessionMode::Advice))
            .await
            .unwrap();

        assert!(outcome.reply.contains("₹6500.00 per gram"));
        assert_eq!(outcome.session.mode, SessionMode::Advice);
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refusal_stays_in_advice() {
        let h = harness();

        let outcome = h
            .controller
            .process_turn("who won the cricket?", &session_in(SessionMode::Advice))
            .await
            .unwrap();

        assert_eq!(outcome.reply, REFUSAL_MESSAGE);
        assert_eq!(outcome.session.mode, SessionMode::Advice);
    }

    #[tokio::test]
    async fn test_llm_failure_leaves_session_untouched() {
        let h = harness();
        h.llm.fail.store(true, Ordering::SeqCst);

        h.controller
            .chat("user-1", "hello", Some("Asha"))
            .await
            .unwrap_err();
        assert!(h.controller.session("user-1").await.unwrap().is_none());

        h.llm.fail.store(false, Ordering::SeqCst);
        h.controller.chat("user-1", "hello", Some("Asha")).await.unwrap();
        h.llm.fail.store(true, Ordering::SeqCst);

        let error = h
            .controller
            .chat("user-1", "tell me more", None)
            .await
            .unwrap_err();
        assert!(matches!(error, GoldAgentError::LlmError(_)));

        let session = h.controller.session("user-1").await.unwrap().unwrap();
        assert_eq!(session.mode, SessionMode::Advice);
        assert_eq!(session.conversation_log.len(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_quote() {
        let h = harness();
        h.store.fail.store(true, Ordering::SeqCst);

        let outcome = h
            .controller
            .process_turn(
                "9876543210 user@example.com",
                &session_in(SessionMode::AwaitingContact(quoted_pending())),
            )
            .await
            .unwrap();

        assert!(!outcome.success());
        assert!(outcome.reply.contains("failed to record in DB"));
        assert_eq!(
            outcome.session.mode,
            SessionMode::AwaitingContact(quoted_pending())
        );
    }

    #[tokio::test]
    async fn test_full_conversation_through_store() {
        let h = harness();

        let first = h.controller.chat("asha-01", "I want to buy gold", Some("Asha")).await.unwrap();
        assert_eq!(first.session.mode, SessionMode::AwaitingAmount);
        assert_eq!(first.session.user_name, "Asha");

        let second = h
            .controller
            .chat("asha-01", "Buy gold worth 5000 rupees", None)
            .await
            .unwrap();
        assert_eq!(second.session.pending_purchase(), Some(&quoted_pending()));

        let retry = h.controller.chat("asha-01", "call me", None).await.unwrap();
        assert_eq!(retry.session.pending_purchase(), Some(&quoted_pending()));

        let done = h
            .controller
            .chat("asha-01", "9876543210 user@example.com", None)
            .await
            .unwrap();
        assert!(done.success());
        assert!(done.reply.starts_with("Congratulations Asha"));

        let session = h.controller.session("asha-01").await.unwrap().unwrap();
        assert_eq!(session.mode, SessionMode::Advice);
        assert_eq!(session.conversation_log.len(), 8);
        assert_eq!(h.store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let h = harness();

        h.controller.chat("asha", "I want to buy gold", None).await.unwrap();
        h.controller.chat("ravi", "what is gold price today", None).await.unwrap();

        let asha = h.controller.session("asha").await.unwrap().unwrap();
        let ravi = h.controller.session("ravi").await.unwrap().unwrap();
        assert_eq!(asha.mode, SessionMode::AwaitingAmount);
        assert_eq!(ravi.mode, SessionMode::Advice);
        assert_eq!(ravi.user_name, "ravi");
    }

    #[tokio::test]
    async fn test_turns_for_one_user_are_serialized() {
        let h = Arc::new(harness());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let h = h.clone();
                tokio::spawn(async move {
                    h.controller
                        .chat("asha", &format!("question {}", i), None)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let session = h.controller.session("asha").await.unwrap().unwrap();
        assert_eq!(session.conversation_log.len(), 16);
    }

    #[tokio::test]
    async fn test_reset_abandons_purchase() {
        let h = harness();
        h.controller.chat("asha", "I want to buy gold", None).await.unwrap();

        assert!(h.controller.reset("asha").await.unwrap());
        assert!(!h.controller.reset("asha").await.unwrap());

        let outcome = h.controller.chat("asha", "hello", None).await.unwrap();
        assert_eq!(outcome.session.mode, SessionMode::Advice);
        assert_eq!(outcome.session.conversation_log.len(), 2);
    }

    /// LLM double that parks every call until the test releases a permit
    struct GatedLlm {
        gate: tokio::sync::Semaphore,
        entered: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl GatedLlm {
        fn new() -> Self {
            Self {
                gate: tokio::sync::Semaphore::new(0),
                entered: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for GatedLlm {
        async fn complete(&self, _prompt: &str, _history: &[LlmMessage]) -> Result<String> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| GoldAgentError::LlmError(e.to_string()))?;
            permit.forget();

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("Gold is a long-term hedge.".to_string())
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_reset_keeps_turns_serialized() {
        let llm = Arc::new(GatedLlm::new());
        let controller = Arc::new(SessionController::new(
            llm.clone(),
            Arc::new(FixedPriceOracle::new(dec!(6500.00))),
            Arc::new(InMemoryPurchaseStore::new()),
            Arc::new(InMemorySessionStore::new()),
            AmountParser::default(),
        ));
        let chat = |message: &'static str| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.chat("u", message, None).await.unwrap() })
        };

        let first = chat("hello");
        wait_until(|| llm.entered.load(Ordering::SeqCst) == 1).await;

        let reset = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.reset("u").await.unwrap() })
        };
        settle().await;
        let second = chat("is gold safe?");
        settle().await;

        llm.gate.add_permits(1);
        first.await.unwrap();
        assert!(reset.await.unwrap());
        wait_until(|| llm.entered.load(Ordering::SeqCst) == 2).await;

        // queued behind the turn that started after the reset
        let third = chat("what about coins?");
        settle().await;
        assert_eq!(llm.entered.load(Ordering::SeqCst), 2);

        llm.gate.add_permits(2);
        second.await.unwrap();
        third.await.unwrap();

        assert_eq!(llm.max_in_flight.load(Ordering::SeqCst), 1);
        let session = controller.session("u").await.unwrap().unwrap();
        assert_eq!(session.conversation_log.len(), 4);
        assert!(controller.turn_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turn_locks_released_after_turns() {
        let h = harness();
        h.llm.fail.store(true, Ordering::SeqCst);
        h.controller.chat("asha", "hello", None).await.unwrap_err();
        h.llm.fail.store(false, Ordering::SeqCst);
        h.controller.chat("ravi", "hello", None).await.unwrap();
        h.controller.reset("ravi").await.unwrap();

        assert!(h.controller.turn_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_huge_amount_keeps_waiting_for_amount() {
        let h = harness();

        let outcome = h
            .controller
            .process_turn(
                "buy 100000000000000000000000000 grams",
                &session_in(SessionMode::AwaitingAmount),
            )
            .await
            .unwrap();

        assert_eq!(outcome.session.mode, SessionMode::AwaitingAmount);
        assert!(!outcome.success());
    }

    /// Everything written before "now" counts as expired
    struct ExpireImmediately;

    impl crate::session::ExpiryPolicy for ExpireImmediately {
        fn is_expired(
            &self,
            last_touched: chrono::DateTime<chrono::Utc>,
            now: chrono::DateTime<chrono::Utc>,
        ) -> bool {
            last_touched <= now
        }
    }

    #[tokio::test]
    async fn test_purge_idle_drops_expired_sessions() {
        let sessions = Arc::new(InMemorySessionStore::with_expiry(Arc::new(ExpireImmediately)));
        let controller = SessionController::new(
            Arc::new(FakeLlm::new()),
            Arc::new(FixedPriceOracle::new(dec!(6500.00))),
            Arc::new(InMemoryPurchaseStore::new()),
            sessions.clone(),
            AmountParser::default(),
        );

        controller.chat("asha", "hello", None).await.unwrap();
        controller.chat("ravi", "hello", None).await.unwrap();
        assert_eq!(sessions.len().await, 2);

        assert_eq!(controller.purge_idle().await.unwrap(), 2);
        assert!(sessions.is_empty().await);
    }
}
