use crate::application::ledger::WalletSummary;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One line of the wallet report, amounts in major units.
#[derive(Debug, Serialize, PartialEq)]
pub struct WalletRow {
    pub user: String,
    pub balance: Decimal,
    pub available: Decimal,
    pub held: Decimal,
    pub currency: String,
}

impl WalletRow {
    pub fn new(user: impl Into<String>, summary: &WalletSummary) -> Self {
        Self {
            user: user.into(),
            balance: summary.wallet.balance.to_major(),
            available: summary.available.to_major(),
            held: summary.held.to_major(),
            currency: summary.wallet.currency.to_string(),
        }
    }
}

/// Writes the wallet report as CSV with a `user,balance,available,held,currency` header.
pub struct WalletReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = WalletRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row).map_err(csv_error)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_error(err: csv::Error) -> EngineError {
    EngineError::Internal(Box::new(err))
}
