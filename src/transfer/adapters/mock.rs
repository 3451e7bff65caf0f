//! Scriptable adapters for orchestrator tests

use super::*;
use crate::transfer::db::TransferStore;
use crate::transfer::state::TransferState;
use crate::transfer::types::TransferId;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MockRail {
    next_session: AtomicUsize,
    /// Scripted poll response; None means "pending_user_transfer_start"
    transaction: Mutex<Option<RailTransaction>>,
    auth_count: AtomicUsize,
    open_count: AtomicUsize,
    poll_count: AtomicUsize,
    fail_auth: Mutex<bool>,
    fail_open: Mutex<bool>,
    fail_poll: Mutex<bool>,
}

impl MockRail {
    pub fn new() -> Self {
        Self {
            next_session: AtomicUsize::new(1),
            transaction: Mutex::new(None),
            auth_count: AtomicUsize::new(0),
            open_count: AtomicUsize::new(0),
            poll_count: AtomicUsize::new(0),
            fail_auth: Mutex::new(false),
            fail_open: Mutex::new(false),
            fail_poll: Mutex::new(false),
        }
    }

    pub fn set_transaction(&self, tx: RailTransaction) {
        *self.transaction.lock().unwrap() = Some(tx);
    }

    /// Script a bare status for whatever session is polled
    pub fn set_status(&self, status: RailStatus) {
        *self.transaction.lock().unwrap() = Some(RailTransaction::with_status("", status));
    }

    pub fn set_fail_auth(&self, fail: bool) {
        *self.fail_auth.lock().unwrap() = fail;
    }

    pub fn set_fail_open(&self, fail: bool) {
        *self.fail_open.lock().unwrap() = fail;
    }

    pub fn set_fail_poll(&self, fail: bool) {
        *self.fail_poll.lock().unwrap() = fail;
    }

    pub fn auth_count(&self) -> usize {
        self.auth_count.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    fn next_session_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_session.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl FiatRail for MockRail {
    fn name(&self) -> &'static str {
        "mock-rail"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn authenticate(&self, correlation_id: &str) -> Result<String, AdapterError> {
        self.auth_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_auth.lock().unwrap() {
            return Err(AdapterError::Http {
                status: 401,
                body: "Mock auth failure".to_string(),
            });
        }
        Ok(format!("token-{}", correlation_id))
    }

    async fn open_withdraw(
        &self,
        _token: &str,
        _amount: Decimal,
    ) -> Result<WithdrawSession, AdapterError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_open.lock().unwrap() {
            return Err(AdapterError::Rejected("Mock open failure".to_string()));
        }
        let session_id = self.next_session_id("wd");
        Ok(WithdrawSession {
            url: format!("https://rail.test/withdraw/{}", session_id),
            memo: Some("4242".to_string()),
            destination: Some("GRAILDESTINATION".to_string()),
            session_id,
        })
    }

    async fn open_deposit(
        &self,
        _token: &str,
        _amount: Decimal,
    ) -> Result<DepositSession, AdapterError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_open.lock().unwrap() {
            return Err(AdapterError::Rejected("Mock open failure".to_string()));
        }
        let session_id = self.next_session_id("dep");
        Ok(DepositSession {
            url: format!("https://rail.test/deposit/{}", session_id),
            session_id,
        })
    }

    async fn poll_status(
        &self,
        _token: &str,
        session_id: &str,
    ) -> Result<RailTransaction, AdapterError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_poll.lock().unwrap() {
            return Err(AdapterError::Network("Mock poll timeout".to_string()));
        }
        let mut tx = self.transaction.lock().unwrap().clone().unwrap_or_else(|| {
            RailTransaction::with_status(session_id, RailStatus::PendingUserTransferStart)
        });
        tx.session_id = session_id.to_string();
        Ok(tx)
    }
}

pub struct MockBridge {
    forward_count: AtomicUsize,
    back_count: AtomicUsize,
    last_back_destination: Mutex<Option<String>>,
    fail_forward: Mutex<Option<AdapterError>>,
    fail_back: Mutex<bool>,
    quote_eta_secs: Mutex<u64>,
    /// Record whose stored state is captured on every bridge call
    watch: Mutex<Option<(Arc<dyn TransferStore>, TransferId)>>,
    observed_states: Mutex<Vec<TransferState>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            forward_count: AtomicUsize::new(0),
            back_count: AtomicUsize::new(0),
            last_back_destination: Mutex::new(None),
            fail_forward: Mutex::new(None),
            fail_back: Mutex::new(false),
            quote_eta_secs: Mutex::new(180),
            watch: Mutex::new(None),
            observed_states: Mutex::new(Vec::new()),
        }
    }

    pub fn set_quote_eta(&self, eta_secs: u64) {
        *self.quote_eta_secs.lock().unwrap() = eta_secs;
    }

    /// Capture the stored state of `id` whenever the bridge is called
    pub fn watch(&self, store: Arc<dyn TransferStore>, id: TransferId) {
        *self.watch.lock().unwrap() = Some((store, id));
    }

    /// States seen in the store at the moment of each bridge call
    pub fn observed_states(&self) -> Vec<TransferState> {
        self.observed_states.lock().unwrap().clone()
    }

    async fn observe(&self) {
        let watched = self.watch.lock().unwrap().clone();
        if let Some((store, id)) = watched {
            if let Some(record) = store.get(id).await.unwrap() {
                self.observed_states.lock().unwrap().push(record.state);
            }
        }
    }

    /// Make `bridge_forward` return this error
    pub fn set_fail_forward(&self, error: Option<AdapterError>) {
        *self.fail_forward.lock().unwrap() = error;
    }

    pub fn set_fail_back(&self, fail: bool) {
        *self.fail_back.lock().unwrap() = fail;
    }

    pub fn forward_count(&self) -> usize {
        self.forward_count.load(Ordering::SeqCst)
    }

    pub fn back_count(&self) -> usize {
        self.back_count.load(Ordering::SeqCst)
    }

    pub fn last_back_destination(&self) -> Option<String> {
        self.last_back_destination.lock().unwrap().clone()
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn name(&self) -> &'static str {
        "mock-bridge"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn bridge_forward(&self, _amount: Decimal) -> Result<BridgeReceipt, AdapterError> {
        self.observe().await;
        let n = self.forward_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.fail_forward.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(BridgeReceipt {
            operation_id: format!("fwd-{}", n),
            source_tx: format!("srctx-{}", n),
            eta_secs: 180,
        })
    }

    async fn bridge_back(
        &self,
        _amount: Decimal,
        destination: &str,
    ) -> Result<BridgeReceipt, AdapterError> {
        self.observe().await;
        let n = self.back_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_back_destination.lock().unwrap() = Some(destination.to_string());
        if *self.fail_back.lock().unwrap() {
            return Err(AdapterError::Network("Mock bridge back timeout".to_string()));
        }
        Ok(BridgeReceipt {
            operation_id: format!("back-{}", n),
            source_tx: format!("backtx-{}", n),
            eta_secs: 180,
        })
    }

    async fn quote_fee(
        &self,
        amount: Decimal,
        _direction: BridgeDirection,
    ) -> Result<BridgeQuote, AdapterError> {
        let fee_percent = Decimal::new(3, 1);
        Ok(BridgeQuote {
            fee: (amount * fee_percent / Decimal::ONE_HUNDRED).round_dp(2),
            fee_percent,
            eta_secs: *self.quote_eta_secs.lock().unwrap(),
        })
    }
}

/// Last payment seen by [`MockSettlement`]
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub destination: String,
    pub amount: Decimal,
    pub memo: String,
}

pub struct MockSettlement {
    pay_count: AtomicUsize,
    last_payment: Mutex<Option<Payment>>,
    fail_pay: Mutex<bool>,
}

impl MockSettlement {
    pub fn new() -> Self {
        Self {
            pay_count: AtomicUsize::new(0),
            last_payment: Mutex::new(None),
            fail_pay: Mutex::new(false),
        }
    }

    pub fn set_fail_pay(&self, fail: bool) {
        *self.fail_pay.lock().unwrap() = fail;
    }

    pub fn pay_count(&self) -> usize {
        self.pay_count.load(Ordering::SeqCst)
    }

    pub fn last_payment(&self) -> Option<Payment> {
        self.last_payment.lock().unwrap().clone()
    }
}

#[async_trait]
impl Settlement for MockSettlement {
    fn name(&self) -> &'static str {
        "mock-settlement"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn pay(
        &self,
        destination: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<String, AdapterError> {
        let n = self.pay_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_payment.lock().unwrap() = Some(Payment {
            destination: destination.to_string(),
            amount,
            memo: memo.to_string(),
        });
        if *self.fail_pay.lock().unwrap() {
            return Err(AdapterError::Http {
                status: 504,
                body: "Mock submit timeout".to_string(),
            });
        }
        Ok(format!("paytx-{}", n))
    }
}
