//! A backend that is connected to nothing.

use async_trait::async_trait;
use futures::stream;

use crate::error::{BackendError, Result};
use crate::{
    CreateInvoiceParams, CreatedInvoice, InvoiceStatus, LightningBackend, NodeInfo, PayOutcome,
    PaymentStatus, Settlement, SettlementStream,
};

/// Placeholder backend: reports an empty node, cannot receive or send.
#[derive(Debug, Default)]
pub struct VoidBackend;

impl VoidBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LightningBackend for VoidBackend {
    fn name(&self) -> &str {
        "void"
    }

    async fn get_info(&self) -> Result<NodeInfo> {
        Ok(NodeInfo {
            alias: "void".to_string(),
            pubkey: String::new(),
            balance_msat: 0,
        })
    }

    async fn create_invoice(&self, _params: CreateInvoiceParams) -> Result<CreatedInvoice> {
        Err(BackendError::Unavailable(
            "void backend cannot create invoices".to_string(),
        ))
    }

    async fn pay_invoice(&self, _payment_request: &str, _max_fee_msat: u64) -> Result<PayOutcome> {
        Err(BackendError::Unavailable(
            "void backend cannot pay invoices".to_string(),
        ))
    }

    async fn lookup_payment(&self, _payment_hash: &str) -> Result<PaymentStatus> {
        Ok(PaymentStatus::Unknown)
    }

    async fn lookup_invoice(&self, _payment_hash: &str) -> Result<InvoiceStatus> {
        Ok(InvoiceStatus::Unknown)
    }

    fn subscribe_settlements(&self) -> Result<SettlementStream> {
        Ok(Box::pin(stream::pending::<Settlement>()))
    }
}
