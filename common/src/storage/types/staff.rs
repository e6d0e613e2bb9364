use crate::stored_object;
use uuid::Uuid;

stored_object!(Staff, "staff", {
    department: String,
    name: String,
    position: String,
    role: String,
    phone: String,
    email: String,
    raw_data: String
});

impl Staff {
    pub fn new(department: String, name: String, phone: String, raw_data: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            department,
            name,
            position: String::new(),
            role: String::new(),
            phone,
            email: String::new(),
            raw_data,
        }
    }
}
