use crate::stored_object;
use uuid::Uuid;

stored_object!(Rule, "rules", {
    filename: String,
    relative_dir: String,
    full_text: String
});

impl Rule {
    pub fn new(filename: String, relative_dir: String, full_text: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            filename,
            relative_dir,
            full_text,
        }
    }
}
