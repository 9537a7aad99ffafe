//! Best-effort extraction of course recommendations from assistant replies.
//!
//! Two layouts are understood, and the caller picks one based on which
//! assistant produced the text:
//!
//! * [`ParserKind::Sectioned`]: bullets grouped under bold `**Section:**`
//!   headers. Only bullets carrying a course code are kept.
//! * [`ParserKind::CourseList`]: a flat bulleted list. Bullets without a
//!   course code are kept under a synthesized `COURSE-<n>` id.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::recommendation::{ AssistantRole, CourseRecommendation };

static COURSE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-\s+([A-Z]+-[A-Z]\s+\d+)\s+(.*?)(?:【.*?】)?$").expect("course line pattern")
});

static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"【.*?】").expect("citation pattern"));

static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-\s*").expect("bullet pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Sectioned,
    CourseList,
}

impl From<AssistantRole> for ParserKind {
    fn from(role: AssistantRole) -> Self {
        match role {
            AssistantRole::Primary => ParserKind::Sectioned,
            AssistantRole::CourseList => ParserKind::CourseList,
        }
    }
}

impl ParserKind {
    pub fn parse(self, text: &str) -> Vec<CourseRecommendation> {
        match self {
            ParserKind::Sectioned => parse_sectioned(text),
            ParserKind::CourseList => parse_course_list(text),
        }
    }
}

fn match_course(line: &str) -> Option<(String, String)> {
    COURSE_LINE.captures(line).map(|caps| {
        (caps[1].trim().to_string(), caps[2].trim().to_string())
    })
}

fn section_header(line: &str) -> Option<String> {
    if line.starts_with("**") && line.ends_with(":**") {
        Some(line.replace("**", "").replacen(':', "", 1).trim().to_string())
    } else {
        None
    }
}

pub fn parse_sectioned(text: &str) -> Vec<CourseRecommendation> {
    let mut recommendations = Vec::new();
    let mut section = String::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("Based on") || line.contains("These courses") {
            continue;
        }
        if let Some(header) = section_header(line) {
            section = header;
            continue;
        }
        if !line.starts_with('-') {
            continue;
        }
        if let Some((course_id, course_name)) = match_course(line) {
            let description = format!("Part of {}", section);
            recommendations.push(CourseRecommendation::new(course_id, course_name, description));
        }
    }

    recommendations
}

pub fn parse_course_list(text: &str) -> Vec<CourseRecommendation> {
    let mut recommendations = Vec::new();
    let mut next_placeholder = 1;

    for line in text.lines().map(str::trim) {
        if
            line.is_empty() ||
            line.starts_with("Here is") ||
            line.starts_with("If you have") ||
            line.contains("These courses")
        {
            continue;
        }
        if !line.starts_with('-') {
            continue;
        }

        if let Some((course_id, course_name)) = match_course(line) {
            recommendations.push(
                CourseRecommendation::new(course_id, course_name.clone(), course_name)
            );
            continue;
        }

        let without_bullet = BULLET.replace(line, "");
        let course_name = CITATION.replace_all(&without_bullet, "").trim().to_string();
        if course_name.is_empty() {
            continue;
        }
        let course_id = format!("COURSE-{}", next_placeholder);
        next_placeholder += 1;
        recommendations.push(CourseRecommendation::new(course_id, course_name.clone(), course_name));
    }

    recommendations
}
