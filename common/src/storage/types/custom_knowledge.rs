use crate::stored_object;
use uuid::Uuid;

stored_object!(CustomKnowledge, "custom_knowledge", {
    question: String,
    answer: String,
    category: String
});

impl CustomKnowledge {
    pub fn new(question: String, answer: String, category: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            question,
            answer,
            category,
        }
    }
}
