use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use super::payment_gateway::{PaymentGateway, ProviderPayment};
use crate::{auth::AuthService, errors::ServiceError};

/// Query parameters accepted by the status endpoint. These mirror the provider
/// redirect, so a return page can forward them unchanged.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
pub struct PaymentStatusQuery {
    pub payment_id: Option<String>,
    pub collection_id: Option<String>,
    pub external_reference: Option<String>,
    pub status: Option<String>,
}

impl PaymentStatusQuery {
    /// `payment_id` wins over `collection_id`; blank values count as absent.
    pub fn payment_reference(&self) -> Option<&str> {
        [&self.payment_id, &self.collection_id]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub payment: ProviderPayment,
    pub external_reference: Option<String>,
    pub status: Option<String>,
}

/// Live payment lookups. Read-only: never writes to the order store.
#[derive(Clone)]
pub struct PaymentStatusService {
    gateway: Arc<dyn PaymentGateway>,
    auth: Arc<AuthService>,
}

impl PaymentStatusService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, auth: Arc<AuthService>) -> Self {
        Self { gateway, auth }
    }

    #[instrument(skip_all, fields(payment_id = ?query.payment_id, collection_id = ?query.collection_id))]
    pub async fn get_payment_status(
        &self,
        token: Option<&str>,
        query: PaymentStatusQuery,
    ) -> Result<PaymentStatusResponse, ServiceError> {
        let user = self.auth.authenticate_bearer(token)?;

        let payment_ref = query.payment_reference().ok_or_else(|| {
            ServiceError::BadRequest("payment_id or collection_id is required".to_string())
        })?;

        let payment = self.gateway.get_payment(payment_ref).await?;
        info!(user_id = %user.user_id, status = ?payment.status, "payment status fetched");

        Ok(PaymentStatusResponse {
            success: true,
            payment,
            external_reference: query.external_reference,
            status: query.status,
        })
    }
}
