use crate::domain::money::Amount;
use crate::domain::ports::{RefundStore, TransactionStore};
use crate::domain::transaction::{
    GatewayKind, NewRefund, NewTransaction, Refund, RefundId, RefundPatch, RefundReservation,
    RefundStatus, Transaction, TransactionId, TransactionPatch, TransactionStatus, completed_total,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for transaction records, keyed by id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for refund records, keyed by id.
pub const CF_REFUNDS: &str = "refunds";
/// Column Family mapping `<gateway>:<vendor id>` to a transaction id.
pub const CF_GATEWAY_INDEX: &str = "gateway_index";
/// Column Family for id counters.
pub const CF_META: &str = "meta";

const NEXT_TRANSACTION_ID: &[u8] = b"next_transaction_id";
const NEXT_REFUND_ID: &[u8] = b"next_refund_id";

/// A persistent store implementation using RocksDB.
///
/// Transactions and refunds live in separate Column Families. RocksDB has no
/// conditional put, so every read-check-write runs under one store-wide
/// write lock; reads take no lock.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_TRANSACTIONS, CF_REFUNDS, CF_GATEWAY_INDEX, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.handle(cf)?;
        match self.db.get_pinned_cf(handle, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.handle(cf)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn write_row<T: Serialize>(&self, cf: &str, key: &[u8], row: &T) -> Result<()> {
        let handle = self.handle(cf)?;
        self.db.put_cf(handle, key, serde_json::to_vec(row)?)?;
        Ok(())
    }

    fn next_id(&self, counter: &[u8]) -> Result<u64> {
        let handle = self.handle(CF_META)?;
        let current = match self.db.get_pinned_cf(handle, counter)? {
            Some(bytes) => {
                let raw = <[u8; 8]>::try_from(&bytes[..])
                    .map_err(|_| PaymentError::internal("corrupt id counter"))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        Ok(current + 1)
    }

    fn index_key(gateway: GatewayKind, gateway_transaction_id: &str) -> Vec<u8> {
        format!("{gateway}:{gateway_transaction_id}").into_bytes()
    }

    fn refunds_of(&self, transaction_id: TransactionId) -> Result<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self
            .scan::<Refund>(CF_REFUNDS)?
            .into_iter()
            .filter(|r| r.transaction_id == transaction_id)
            .collect();
        refunds.sort_by_key(|r| r.id);
        Ok(refunds)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: NewTransaction) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;

        let index_key = Self::index_key(tx.gateway, &tx.gateway_transaction_id);
        let index = self.handle(CF_GATEWAY_INDEX)?;
        if self.db.get_pinned_cf(index, &index_key)?.is_some() {
            return Err(PaymentError::Duplicate(format!(
                "{} transaction {}",
                tx.gateway, tx.gateway_transaction_id
            )));
        }

        let id = self.next_id(NEXT_TRANSACTION_ID)?;
        let record = Transaction::from_new(TransactionId(id), tx, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.handle(CF_TRANSACTIONS)?,
            id.to_be_bytes(),
            serde_json::to_vec(&record)?,
        );
        batch.put_cf(index, index_key, id.to_be_bytes());
        batch.put_cf(self.handle(CF_META)?, NEXT_TRANSACTION_ID, id.to_be_bytes());
        self.db.write(batch)?;

        Ok(record)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, &id.0.to_be_bytes())
    }

    async fn find_by_gateway_id(
        &self,
        gateway: GatewayKind,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>> {
        let index = self.handle(CF_GATEWAY_INDEX)?;
        let Some(id) = self
            .db
            .get_pinned_cf(index, Self::index_key(gateway, gateway_transaction_id))?
        else {
            return Ok(None);
        };
        self.read(CF_TRANSACTIONS, &id)
    }

    async fn update_if_status(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let key = id.0.to_be_bytes();
        let mut row: Transaction = self
            .read(CF_TRANSACTIONS, &key)?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))?;
        if row.status != expected {
            return Ok(false);
        }
        row.apply(&patch);
        self.write_row(CF_TRANSACTIONS, &key, &row)?;
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        // Big-endian keys iterate in id order.
        self.scan(CF_TRANSACTIONS)
    }
}

#[async_trait]
impl RefundStore for RocksDBStore {
    async fn reserve(&self, refund: NewRefund, cap: Amount) -> Result<RefundReservation> {
        let _guard = self.write_lock.lock().await;

        let existing = self.refunds_of(refund.transaction_id)?;
        if existing.iter().any(|r| r.status == RefundStatus::Pending) {
            return Ok(RefundReservation::InProgress);
        }
        let available = cap.value() - completed_total(&existing);
        if refund.amount.value() > available {
            return Ok(RefundReservation::ExceedsBalance { available });
        }

        let id = self.next_id(NEXT_REFUND_ID)?;
        let record = Refund::from_new(RefundId(id), refund, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.handle(CF_REFUNDS)?,
            id.to_be_bytes(),
            serde_json::to_vec(&record)?,
        );
        batch.put_cf(self.handle(CF_META)?, NEXT_REFUND_ID, id.to_be_bytes());
        self.db.write(batch)?;

        Ok(RefundReservation::Reserved(record))
    }

    async fn get(&self, id: RefundId) -> Result<Option<Refund>> {
        self.read(CF_REFUNDS, &id.0.to_be_bytes())
    }

    async fn find_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>> {
        Ok(self
            .scan::<Refund>(CF_REFUNDS)?
            .into_iter()
            .find(|r| r.gateway_refund_id.as_deref() == Some(gateway_refund_id)))
    }

    async fn for_transaction(&self, transaction_id: TransactionId) -> Result<Vec<Refund>> {
        self.refunds_of(transaction_id)
    }

    async fn update_if_status(
        &self,
        id: RefundId,
        expected: RefundStatus,
        patch: RefundPatch,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let key = id.0.to_be_bytes();
        let mut row: Refund = self
            .read(CF_REFUNDS, &key)?
            .ok_or_else(|| PaymentError::NotFound(format!("refund {id}")))?;
        if row.status != expected {
            return Ok(false);
        }
        row.apply(&patch);
        self.write_row(CF_REFUNDS, &key, &row)?;
        Ok(true)
    }
}
