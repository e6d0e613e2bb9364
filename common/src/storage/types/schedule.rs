use crate::storage::types::RecordOrigin;
use crate::stored_object;
use uuid::Uuid;

stored_object!(Schedule, "schedule", {
    title: String,
    start_date: String,
    end_date: String,
    category: String,
    department: String,
    content: String,
    origin: RecordOrigin
});

impl Schedule {
    pub fn new(
        title: String,
        start_date: String,
        end_date: String,
        category: String,
        department: String,
        content: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title,
            start_date,
            end_date,
            category,
            department,
            content,
            origin: RecordOrigin::Auto,
        }
    }
}
