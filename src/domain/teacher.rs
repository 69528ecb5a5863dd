use super::context::UserId;
use super::money::Amount;
use serde::{Deserialize, Serialize};

/// The slice of a teacher's profile the booking engine reads.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct TeacherProfile {
    pub user_id: UserId,
    pub name: String,
    /// Current rate per hour; sessions copy it when they are booked.
    pub hourly_rate: Amount,
    pub subjects: Vec<String>,
}

impl TeacherProfile {
    pub fn teaches(&self, subject: &str) -> bool {
        let subject = subject.trim();
        self.subjects.iter().any(|s| s.eq_ignore_ascii_case(subject))
    }
}
