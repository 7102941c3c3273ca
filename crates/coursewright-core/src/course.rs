//! Course post-processing: heading-based parsing of free-text drafts and the
//! completeness guarantees applied before a course leaves the workflow.
//!
//! Structured JSON is always preferred. [`parse_course_text`] only runs when
//! a provider keeps answering in prose, and it recognizes markdown-ish
//! layouts like:
//!
//! ```text
//! # Sustainable Business
//! Goal: manage for the 21st century
//!
//! ## Module 1: Circular Economy
//! Objectives: explain material loops; compare business models
//! - Key concepts: cradle-to-cradle, product-as-a-service
//! Duration: 2 weeks
//!
//! ## References
//! 1. Porter & Kramer (2011). Creating Shared Value.
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Course, GenerationParameters, Topic};

static TOPIC_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:#{1,6}\s*)?(?:\*\*)?(?:topic|module|chapter)\b\s*(?P<num>\d+)?\s*(?P<sep>[:.)\-])?\s*(?P<rest>.*?)\s*(?:\*\*)?$",
    )
    .expect("valid topic heading regex")
});

static REFERENCES_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^#{1,6}\s*(?:\*\*)?(?:references|bibliography|further reading)\b")
        .expect("valid references heading regex")
});

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}\s*(?P<text>.+)$").expect("valid heading regex"));

static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:[-*•]\s*)?(?:\*\*)?(?P<label>learning objectives|objectives?|outline|key concepts|concepts|practical applications|applications?|assessment|duration|references|teaching goal|course goal|goal|teaching method|method)(?:\*\*)?\s*:(?:\*\*)?\s*(?P<value>.*)$",
    )
    .expect("valid label regex")
});

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s+(?P<item>.+)$").expect("valid bullet regex"));

static AIMS_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bcourse aims to\s+(?P<goal>.+)$").expect("valid goal regex")
});

static TAUGHT_USING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:taught|delivered)\s+(?:using|through|via)\s+(?P<method>.+)$")
        .expect("valid method regex")
});

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Topic,
    References,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Objectives,
    Outline,
    Concepts,
    Applications,
    Assessment,
    Duration,
}

/// Parse a free-text course draft by headings and labeled lines.
///
/// `fallback_title` is used when the draft has no leading heading. The
/// returned course may have an empty topic list; run [`ensure_complete`]
/// before handing it out.
pub fn parse_course_text(text: &str, fallback_title: &str) -> Course {
    let mut course = Course {
        title: String::new(),
        goal: String::new(),
        method: String::new(),
        topics: Vec::new(),
        references: Vec::new(),
        generation: None,
    };
    let mut section = Section::Preamble;
    let mut field: Option<Field> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(title) = topic_heading(line) {
            course.topics.push(Topic {
                title,
                ..Default::default()
            });
            section = Section::Topic;
            field = None;
            continue;
        }

        if REFERENCES_HEADING.is_match(line) {
            section = Section::References;
            field = None;
            continue;
        }

        if let Some(caps) = LABEL.captures(line) {
            let label = caps["label"].to_lowercase();
            let value = caps["value"].trim().trim_matches('*').trim();
            match label.as_str() {
                "goal" | "teaching goal" | "course goal" => set_if_empty(&mut course.goal, value),
                "method" | "teaching method" => set_if_empty(&mut course.method, value),
                "references" => {
                    section = Section::References;
                    field = None;
                    course.references.extend(split_items(value));
                }
                other => {
                    let f = match other {
                        "learning objectives" | "objective" | "objectives" => Field::Objectives,
                        "outline" => Field::Outline,
                        "key concepts" | "concepts" => Field::Concepts,
                        "assessment" => Field::Assessment,
                        "duration" => Field::Duration,
                        _ => Field::Applications,
                    };
                    if let Some(topic) = current_topic(&mut course, section) {
                        field = Some(f);
                        apply_field(topic, f, value, true);
                    }
                }
            }
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            let heading = caps["text"].trim().trim_matches('*').trim();
            if course.title.is_empty() && course.topics.is_empty() {
                course.title = heading.to_string();
            }
            if section == Section::References {
                section = Section::Preamble;
            }
            field = None;
            continue;
        }

        let item = BULLET
            .captures(line)
            .map(|c| c["item"].trim().to_string());

        match section {
            Section::References => {
                course.references.push(item.unwrap_or_else(|| line.to_string()));
            }
            Section::Topic => {
                let Some(topic) = course.topics.last_mut() else {
                    continue;
                };
                let value = item.as_deref().unwrap_or(line);
                apply_field(topic, field.unwrap_or(Field::Outline), value, false);
            }
            Section::Preamble => {
                if let Some(c) = AIMS_TO.captures(line) {
                    set_if_empty(&mut course.goal, c["goal"].trim());
                } else if let Some(c) = TAUGHT_USING.captures(line) {
                    set_if_empty(&mut course.method, c["method"].trim());
                }
            }
        }
    }

    if course.title.is_empty() {
        course.title = fallback_title.to_string();
    }
    course
}

/// A minimal topic derived from the course title.
pub fn placeholder_topic(course_title: &str) -> Topic {
    Topic {
        title: format!("Introduction to {course_title}"),
        objectives: vec![format!("Understand the core ideas of {course_title}")],
        outline: vec!["Overview and key terminology".to_string()],
        ..Default::default()
    }
}

/// Enforce the invariants of a finished course.
///
/// Blank title, goal, and method are filled from the parameters; topics
/// without a title are dropped; an empty topic list gets a placeholder.
pub fn ensure_complete(course: &mut Course, params: &GenerationParameters) {
    if course.title.trim().is_empty() {
        course.title = params.title.clone();
    }
    if course.goal.trim().is_empty() {
        course.goal = params.learning_objective.clone();
    }
    if course.method.trim().is_empty() {
        course.method = params.teaching_style.clone();
    }
    course.topics.retain(|t| !t.title.trim().is_empty());
    if course.topics.is_empty() {
        course.topics.push(placeholder_topic(&course.title));
    }
    course.references.retain(|r| !r.trim().is_empty());
}

fn topic_heading(line: &str) -> Option<String> {
    let caps = TOPIC_HEADING.captures(line)?;
    let num = caps.name("num").map(|m| m.as_str());
    if num.is_none() && caps.name("sep").is_none() {
        return None;
    }
    let rest = caps["rest"].trim().trim_matches('*').trim();
    if rest.is_empty() {
        Some(format!("Topic {}", num.unwrap_or_default()).trim().to_string())
    } else {
        Some(rest.to_string())
    }
}

fn current_topic(course: &mut Course, section: Section) -> Option<&mut Topic> {
    if section == Section::Topic {
        course.topics.last_mut()
    } else {
        None
    }
}

/// Store a value in a topic field. Labeled values may hold several
/// `;`-separated items; continuation lines hold one.
fn apply_field(topic: &mut Topic, field: Field, value: &str, labeled: bool) {
    let items = if labeled {
        split_items(value)
    } else {
        vec![value.to_string()]
    };
    match field {
        Field::Objectives => topic.objectives.extend(items),
        Field::Outline => topic.outline.extend(items),
        Field::Concepts => topic.key_concepts.extend(items),
        Field::Applications => topic.applications.extend(items),
        Field::Assessment => append_text(&mut topic.assessment, value),
        Field::Duration => append_text(&mut topic.duration, value),
    }
}

fn split_items(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn append_text(target: &mut String, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(value);
}

fn set_if_empty(target: &mut String, value: &str) {
    if target.is_empty() && !value.is_empty() {
        *target = value.to_string();
    }
}
