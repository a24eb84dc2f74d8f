use crate::domain::money::to_minor_precision;
use crate::domain::transaction::Transaction;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct LedgerRow<'a> {
    id: u64,
    transaction_uuid: &'a str,
    gateway: &'a str,
    reference: &'a str,
    status: &'a str,
    amount: String,
    currency: &'a str,
    refunded: String,
}

impl<'a> From<&'a Transaction> for LedgerRow<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            id: tx.id.0,
            transaction_uuid: &tx.transaction_uuid,
            gateway: tx.gateway.as_str(),
            reference: &tx.gateway_transaction_id,
            status: tx.status.as_str(),
            amount: tx.amount.to_string(),
            currency: tx.currency.code(),
            refunded: to_minor_precision(tx.refunded_total()).to_string(),
        }
    }
}

/// Writes the transaction ledger as CSV.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes a header and one row per transaction, then flushes.
    pub fn write_ledger(&mut self, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            self.writer.write_record([
                "id",
                "transaction_uuid",
                "gateway",
                "reference",
                "status",
                "amount",
                "currency",
                "refunded",
            ])?;
        }
        for tx in transactions {
            self.writer.serialize(LedgerRow::from(tx))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
