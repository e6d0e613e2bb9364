use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;
use surrealdb::opt::PatchOp;
use uuid::Uuid;

/// Moderation queue states. `ApprovedButUnindexed` marks a row whose
/// relational write succeeded but whose index update did not; the operator
/// recovers it with a DB-driven reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    ApprovedManually,
    ApprovedButUnindexed,
}

stored_object!(PendingItem, "pending_items", {
    source_type: String,
    data: String,
    status: PendingStatus
});

impl PendingItem {
    pub fn new(source_type: String, data: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_type,
            data,
            status: PendingStatus::Pending,
        }
    }

    pub async fn list_pending(db: &SurrealDbClient) -> Result<Vec<PendingItem>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE status = 'pending' ORDER BY created_at",
                Self::table_name()
            ))
            .await?;
        let items: Vec<PendingItem> = response.take(0)?;
        Ok(items)
    }

    pub async fn list_all(db: &SurrealDbClient) -> Result<Vec<PendingItem>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} ORDER BY created_at DESC",
                Self::table_name()
            ))
            .await?;
        let items: Vec<PendingItem> = response.take(0)?;
        Ok(items)
    }

    pub async fn set_status(
        id: &str,
        status: PendingStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }
}
