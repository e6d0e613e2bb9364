use crate::stored_object;
use uuid::Uuid;

stored_object!(Course, "courses", {
    course_code: String,
    title: String,
    description: String,
    source_table: String,
    raw_data: String,
    major: String
});

impl Course {
    pub fn new(
        course_code: String,
        title: String,
        description: String,
        source_table: String,
        raw_data: String,
        major: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            course_code,
            title,
            description,
            source_table,
            raw_data,
            major,
        }
    }
}
