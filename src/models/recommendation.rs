use serde::{ Deserialize, Serialize };
use std::fmt;

pub const DEFAULT_CREDITS: u32 = 3;
pub const DEFAULT_FILL_RATE: u32 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub degree_program: Option<String>,
    pub career_goals: String,
}

impl StudentProfile {
    /// Renders the profile as the single user message sent to every assistant.
    pub fn to_prompt(&self) -> String {
        let mut prompt = String::from("Student Information:\n");
        prompt.push_str(&format!("ID: {}\n", self.student_id));
        prompt.push_str(&format!("Name: {}\n", self.name));
        if let Some(degree) = self.degree_program.as_deref().filter(|d| !d.trim().is_empty()) {
            prompt.push_str(&format!("Degree Program: {}\n", degree));
        }
        prompt.push_str(&format!("Career Goals: {}\n", self.career_goals));
        prompt.push_str("\nPlease provide course recommendations based on this information.");
        prompt
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecommendation {
    pub course_id: String,
    pub course_name: String,
    pub description: String,
    pub credits: u32,
    pub prerequisites: Vec<String>,
    #[serde(rename = "fillingRate", skip_serializing_if = "Option::is_none")]
    pub fill_rate: Option<u32>,
}

impl CourseRecommendation {
    pub fn new(course_id: impl Into<String>, course_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            course_name: course_name.into(),
            description: description.into(),
            credits: DEFAULT_CREDITS,
            prerequisites: Vec::new(),
            fill_rate: Some(DEFAULT_FILL_RATE),
        }
    }
}

/// Which configured assistant produced a piece of text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantRole {
    Primary,
    CourseList,
}

impl fmt::Display for AssistantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssistantRole::Primary => write!(f, "primary"),
            AssistantRole::CourseList => write!(f, "course-list"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceFailure {
    pub source: AssistantRole,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RecommendationOutcome {
    pub recommendations: Vec<CourseRecommendation>,
    pub failures: Vec<SourceFailure>,
}

impl RecommendationOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
