//! Expired purchase purge
//!
//! Hard-deletes purchases that expired more than the cleanup delay period ago.

use time::{Date, Duration};

use crate::error::EntitlementResult;
use crate::purchase::PurchaseQuery;
use crate::purchase_service::PurchaseService;

#[derive(Clone)]
pub struct ExpiredPurchasePurge {
    purchases: PurchaseService,
    delay: Duration,
}

impl ExpiredPurchasePurge {
    pub fn new(purchases: PurchaseService, delay: Duration) -> Self {
        Self { purchases, delay }
    }

    /// Destroy every purchase ready for cleanup on `today`; returns how many went
    pub async fn purge_expired(&self, today: Date) -> EntitlementResult<usize> {
        let query = PurchaseQuery::new().ready_for_cleanup(today, self.delay);
        let expired = self.purchases.query(&query).await?;

        let mut removed = 0;
        for purchase in &expired {
            if self.purchases.destroy(purchase).await? {
                tracing::info!(
                    add_on_purchase = %purchase.id,
                    add_on = %purchase.add_on_name,
                    expires_on = %purchase.expires_on,
                    "Purged expired add-on purchase"
                );
                removed += 1;
            }
        }

        Ok(removed)
    }
}
