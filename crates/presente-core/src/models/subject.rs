use serde::{Deserialize, Serialize};

use super::Profile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Teacher {
    #[serde(deserialize_with = "super::de::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
}

impl Teacher {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname).trim().to_string()
    }
}

/// Subject as seen by a guardian for one student
/// (`/apiv1/apoderados/subjects/{id}/?student_id=`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SubjectDetail {
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub students: Vec<Profile>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default, deserialize_with = "super::de::opt_u32")]
    pub num_max_students: Option<u32>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub finished: bool,
    /// Whether the student is enrolled in the subject
    #[serde(default)]
    pub rolled: bool,
}

impl SubjectDetail {
    pub fn status_label(&self) -> &'static str {
        if self.finished {
            "Finished"
        } else {
            "In progress"
        }
    }

    pub fn max_students_display(&self) -> String {
        match self.num_max_students {
            Some(n) => n.to_string(),
            None => "-".to_string(),
        }
    }
}

/// One class meeting of a subject on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ClassSession {
    #[serde(deserialize_with = "super::de::string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "super::de::string_or_number")]
    pub subject_id: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Teachers staffing the class
    #[serde(default)]
    pub staff_id: Vec<Teacher>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time_start: String,
    #[serde(default)]
    pub time_end: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "super::de::opt_u32")]
    pub num_max_students: Option<u32>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub rolled: bool,
}

impl ClassSession {
    /// `HH:MM - HH:MM`, dropping seconds when the API sends them
    pub fn time_range(&self) -> String {
        fn short(t: &str) -> &str {
            match t.get(..5) {
                Some(hhmm) if t.len() > 5 && hhmm.as_bytes()[2] == b':' => hhmm,
                _ => t,
            }
        }
        format!("{} - {}", short(&self.time_start), short(&self.time_end))
    }
}
