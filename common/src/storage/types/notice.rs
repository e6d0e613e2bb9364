use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::RecordOrigin;
use crate::stored_object;
use uuid::Uuid;

stored_object!(Notice, "notices", {
    board: String,
    title: String,
    category: String,
    published_date: String,
    is_fixed: String,
    detail_url: String,
    content: String,
    attachments: String,
    origin: RecordOrigin
});

impl Notice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        board: String,
        title: String,
        category: String,
        published_date: String,
        is_fixed: String,
        detail_url: String,
        content: String,
        attachments: String,
        origin: RecordOrigin,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            board,
            title,
            category,
            published_date,
            is_fixed,
            detail_url,
            content,
            attachments,
            origin,
        }
    }

    /// Every detail URL currently known, used to filter freshly crawled
    /// notices down to new ones.
    pub async fn existing_detail_urls(db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT VALUE detail_url FROM {} WHERE detail_url != ''",
                Self::table_name()
            ))
            .await?;
        let urls: Vec<String> = response.take(0)?;
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(detail_url: &str) -> Notice {
        Notice::new(
            "일반공지".to_string(),
            "수강신청 안내".to_string(),
            "학사".to_string(),
            "2025-11-10".to_string(),
            "false".to_string(),
            detail_url.to_string(),
            "본문".to_string(),
            "[]".to_string(),
            RecordOrigin::Auto,
        )
    }

    #[tokio::test]
    async fn test_existing_detail_urls() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        db.store_item(sample("https://example.ac.kr/notice/1"))
            .await
            .expect("store notice");
        db.store_item(sample("https://example.ac.kr/notice/2"))
            .await
            .expect("store notice");

        let mut urls = Notice::existing_detail_urls(&db).await.expect("urls");
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "https://example.ac.kr/notice/1".to_string(),
                "https://example.ac.kr/notice/2".to_string()
            ]
        );
    }
}
