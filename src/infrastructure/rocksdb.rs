use crate::domain::payout::{
    AccountStatus, NewPayoutTransaction, OnboardingRecord, Payout, PayoutAccount, PayoutReversal,
    PayoutTransaction,
};
use crate::domain::ports::PayoutStore;
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column family for payout accounts.
pub const CF_ACCOUNTS: &str = "payout_accounts";
/// Column family for onboarding records.
pub const CF_ONBOARDINGS: &str = "onboardings";
/// Column family for the append-only ledger.
pub const CF_LEDGER: &str = "payout_ledger";
/// Column family indexing ledger reference pairs for idempotent appends.
pub const CF_LEDGER_REFS: &str = "payout_ledger_refs";
/// Column family for payouts.
pub const CF_PAYOUTS: &str = "payouts";
/// Column family for payout reversals.
pub const CF_REVERSALS: &str = "payout_reversals";
/// Column family for the id counter.
pub const CF_META: &str = "meta";

const NEXT_ID_KEY: &[u8] = b"next_id";

/// Durable payout store on RocksDB.
///
/// Values are JSON, keys are big-endian ids. Multi-entity writes go
/// through a `WriteBatch` under a single writer mutex, so the uniqueness
/// checks (seller per account, ledger reference pair) and their writes
/// form one critical section.
#[derive(Clone)]
pub struct RocksDbPayoutStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbPayoutStore {
    /// Opens or creates the database, ensuring all column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_ACCOUNTS,
            CF_ONBOARDINGS,
            CF_LEDGER,
            CF_LEDGER_REFS,
            CF_PAYOUTS,
            CF_REVERSALS,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| MarketError::InternalError(Box::new(e)))?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            MarketError::InvariantViolation(format!("column family {name} not found"))
        })
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| MarketError::InternalError(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| MarketError::InternalError(Box::new(e)))
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        let bytes = self
            .db
            .get_cf(cf, key)
            .map_err(|e| MarketError::InternalError(Box::new(e)))?;
        bytes.as_deref().map(Self::decode).transpose()
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(cf, key, Self::encode(value)?)
            .map_err(|e| MarketError::InternalError(Box::new(e)))
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| MarketError::InternalError(Box::new(e)))?;
            values.push(Self::decode(&value)?);
        }
        Ok(values)
    }

    /// Allocates `count` ids. Callers must hold the write lock.
    fn allocate_ids(&self, count: u64, batch: &mut WriteBatch) -> Result<u64> {
        let next: u64 = self
            .get_json(CF_META, NEXT_ID_KEY)?
            .unwrap_or(1);
        let cf = self.cf(CF_META)?;
        batch.put_cf(cf, NEXT_ID_KEY, Self::encode(&(next + count))?);
        Ok(next)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| MarketError::InternalError(Box::new(e)))
    }

    fn ledger_ref_key(account_id: u64, reference: &str, reference_id: &str) -> Vec<u8> {
        format!("{account_id}|{reference}|{reference_id}").into_bytes()
    }
}

#[async_trait]
impl PayoutStore for RocksDbPayoutStore {
    async fn insert_account(&self, seller_id: u64) -> Result<PayoutAccount> {
        let _guard = self.write_lock.lock().await;
        let existing: Vec<PayoutAccount> = self.scan(CF_ACCOUNTS)?;
        if existing.iter().any(|a| a.seller_id == seller_id) {
            return Err(MarketError::InvalidState(format!(
                "seller {seller_id} already has a payout account"
            )));
        }

        let mut batch = WriteBatch::default();
        let id = self.allocate_ids(1, &mut batch)?;
        let account = PayoutAccount {
            id,
            seller_id,
            status: AccountStatus::Pending,
            provider_ref: None,
            context: Value::Null,
            onboarding_id: None,
        };
        let cf = self.cf(CF_ACCOUNTS)?;
        batch.put_cf(cf, id.to_be_bytes(), Self::encode(&account)?);
        self.write(batch)?;
        Ok(account)
    }

    async fn get_account(&self, id: u64) -> Result<Option<PayoutAccount>> {
        self.get_json(CF_ACCOUNTS, &id.to_be_bytes())
    }

    async fn account_by_seller(&self, seller_id: u64) -> Result<Option<PayoutAccount>> {
        let accounts: Vec<PayoutAccount> = self.scan(CF_ACCOUNTS)?;
        Ok(accounts.into_iter().find(|a| a.seller_id == seller_id))
    }

    async fn account_by_provider_ref(&self, provider_ref: &str) -> Result<Option<PayoutAccount>> {
        let accounts: Vec<PayoutAccount> = self.scan(CF_ACCOUNTS)?;
        Ok(accounts
            .into_iter()
            .find(|a| a.provider_ref.as_deref() == Some(provider_ref)))
    }

    async fn update_account(&self, account: PayoutAccount) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.get_json::<PayoutAccount>(CF_ACCOUNTS, &account.id.to_be_bytes())?.is_none() {
            return Err(MarketError::not_found("payout account", account.id));
        }
        self.put_json(CF_ACCOUNTS, &account.id.to_be_bytes(), &account)
    }

    async fn delete_account(&self, id: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let cf = self.cf(CF_ACCOUNTS)?;
        batch.delete_cf(cf, id.to_be_bytes());

        let onboardings: Vec<OnboardingRecord> = self.scan(CF_ONBOARDINGS)?;
        let cf = self.cf(CF_ONBOARDINGS)?;
        for record in onboardings.iter().filter(|o| o.account_id == id) {
            batch.delete_cf(cf, record.id.to_be_bytes());
        }
        self.write(batch)
    }

    async fn insert_onboarding(&self, account_id: u64, data: Value) -> Result<OnboardingRecord> {
        let _guard = self.write_lock.lock().await;
        if self.get_json::<PayoutAccount>(CF_ACCOUNTS, &account_id.to_be_bytes())?.is_none() {
            return Err(MarketError::not_found("payout account", account_id));
        }
        let mut batch = WriteBatch::default();
        let id = self.allocate_ids(1, &mut batch)?;
        let record = OnboardingRecord {
            id,
            account_id,
            data,
        };
        let cf = self.cf(CF_ONBOARDINGS)?;
        batch.put_cf(cf, id.to_be_bytes(), Self::encode(&record)?);
        self.write(batch)?;
        Ok(record)
    }

    async fn append_transactions(
        &self,
        account_id: u64,
        transactions: Vec<NewPayoutTransaction>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        if self.get_json::<PayoutAccount>(CF_ACCOUNTS, &account_id.to_be_bytes())?.is_none() {
            return Err(MarketError::not_found("payout account", account_id));
        }

        // First pass decides which entries survive the reference-pair
        // check, so only the surviving count of ids is allocated.
        let mut surviving = Vec::new();
        let mut seen_in_batch = std::collections::HashSet::new();
        for tx in transactions {
            if let Some(reference) = &tx.reference {
                let key =
                    Self::ledger_ref_key(account_id, &reference.reference, &reference.reference_id);
                let exists = self
                    .db
                    .get_cf(self.cf(CF_LEDGER_REFS)?, &key)
                    .map_err(|e| MarketError::InternalError(Box::new(e)))?
                    .is_some();
                if exists || !seen_in_batch.insert(key) {
                    continue;
                }
            }
            surviving.push(tx);
        }
        if surviving.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::default();
        let first_id = self.allocate_ids(surviving.len() as u64, &mut batch)?;
        let appended = surviving.len();
        for (offset, tx) in surviving.into_iter().enumerate() {
            let id = first_id + offset as u64;
            if let Some(reference) = &tx.reference {
                let key =
                    Self::ledger_ref_key(account_id, &reference.reference, &reference.reference_id);
                batch.put_cf(self.cf(CF_LEDGER_REFS)?, key, id.to_be_bytes());
            }
            let entry = PayoutTransaction {
                id,
                account_id,
                amount: tx.amount,
                currency: tx.currency,
                reference: tx.reference,
            };
            batch.put_cf(self.cf(CF_LEDGER)?, id.to_be_bytes(), Self::encode(&entry)?);
        }
        self.write(batch)?;
        Ok(appended)
    }

    async fn transactions_for(&self, account_id: u64) -> Result<Vec<PayoutTransaction>> {
        let ledger: Vec<PayoutTransaction> = self.scan(CF_LEDGER)?;
        Ok(ledger
            .into_iter()
            .filter(|t| t.account_id == account_id)
            .collect())
    }

    async fn balance(&self, account_id: u64) -> Result<BTreeMap<String, Decimal>> {
        let mut balance: BTreeMap<String, Decimal> = BTreeMap::new();
        for tx in self.transactions_for(account_id).await? {
            *balance.entry(tx.currency).or_insert(Decimal::ZERO) += tx.amount;
        }
        Ok(balance)
    }

    async fn insert_payout(&self, mut payout: Payout) -> Result<Payout> {
        let _guard = self.write_lock.lock().await;
        if self
            .get_json::<PayoutAccount>(CF_ACCOUNTS, &payout.account_id.to_be_bytes())?
            .is_none()
        {
            return Err(MarketError::not_found("payout account", payout.account_id));
        }
        let mut batch = WriteBatch::default();
        payout.id = self.allocate_ids(1, &mut batch)?;
        let cf = self.cf(CF_PAYOUTS)?;
        batch.put_cf(cf, payout.id.to_be_bytes(), Self::encode(&payout)?);
        self.write(batch)?;
        Ok(payout)
    }

    async fn get_payout(&self, id: u64) -> Result<Option<Payout>> {
        self.get_json(CF_PAYOUTS, &id.to_be_bytes())
    }

    async fn payout_by_provider_ref(&self, provider_ref: &str) -> Result<Option<Payout>> {
        let payouts: Vec<Payout> = self.scan(CF_PAYOUTS)?;
        Ok(payouts
            .into_iter()
            .find(|p| p.provider_ref.as_deref() == Some(provider_ref)))
    }

    async fn update_payout(&self, payout: Payout) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.get_json::<Payout>(CF_PAYOUTS, &payout.id.to_be_bytes())?.is_none() {
            return Err(MarketError::not_found("payout", payout.id));
        }
        self.put_json(CF_PAYOUTS, &payout.id.to_be_bytes(), &payout)
    }

    async fn insert_reversal(&self, mut reversal: PayoutReversal) -> Result<PayoutReversal> {
        let _guard = self.write_lock.lock().await;
        if self
            .get_json::<Payout>(CF_PAYOUTS, &reversal.payout_id.to_be_bytes())?
            .is_none()
        {
            return Err(MarketError::not_found("payout", reversal.payout_id));
        }
        // Provider-ref uniqueness under the writer mutex: a replayed or
        // concurrent duplicate gets the stored row back.
        if let Some(provider_ref) = &reversal.provider_ref {
            let existing: Vec<PayoutReversal> = self.scan(CF_REVERSALS)?;
            if let Some(found) = existing
                .into_iter()
                .find(|r| r.provider_ref.as_deref() == Some(provider_ref))
            {
                return Ok(found);
            }
        }
        let mut batch = WriteBatch::default();
        reversal.id = self.allocate_ids(1, &mut batch)?;
        let cf = self.cf(CF_REVERSALS)?;
        batch.put_cf(cf, reversal.id.to_be_bytes(), Self::encode(&reversal)?);
        self.write(batch)?;
        Ok(reversal)
    }

    async fn reversals_for(&self, payout_id: u64) -> Result<Vec<PayoutReversal>> {
        let reversals: Vec<PayoutReversal> = self.scan(CF_REVERSALS)?;
        Ok(reversals
            .into_iter()
            .filter(|r| r.payout_id == payout_id)
            .collect())
    }

    async fn reversal_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PayoutReversal>> {
        let reversals: Vec<PayoutReversal> = self.scan(CF_REVERSALS)?;
        Ok(reversals
            .into_iter()
            .find(|r| r.provider_ref.as_deref() == Some(provider_ref)))
    }
}
