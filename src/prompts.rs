//! Prompt builders for the course-generation stages.
//!
//! Every prompt is a pure function of its inputs so that stage behavior is
//! reproducible in tests with scripted providers.

use std::fmt::Write as _;

use coursewright_core::models::{Course, GenerationParameters, SearchResult};
use coursewright_core::text::excerpt;

/// Render retrieved materials as a numbered list of bounded excerpts.
pub fn format_materials(materials: &[SearchResult], max_chars: usize) -> String {
    if materials.is_empty() {
        return "(no teaching materials were retrieved)".to_string();
    }
    let mut out = String::new();
    for (i, m) in materials.iter().enumerate() {
        let source = m.source().unwrap_or(m.id.as_str());
        let _ = writeln!(
            out,
            "[{}] Source: {}\n{}\n",
            i + 1,
            source,
            excerpt(&m.content, max_chars)
        );
    }
    out.trim_end().to_string()
}

fn compulsory(params: &GenerationParameters) -> String {
    if params.compulsory_areas.is_empty() {
        "none specified".to_string()
    } else {
        params.compulsory_areas.join(", ")
    }
}

pub fn planning_prompt(
    params: &GenerationParameters,
    materials: &[SearchResult],
    excerpt_chars: usize,
) -> String {
    format!(
        "You are a course planning expert. Create a detailed outline for the course \
         \"{title}\".\n\n\
         Target audience: {audience}\n\
         Teaching style: {style}\n\
         Learning objective: {objective}\n\
         Compulsory areas: {areas}\n\n\
         Use the teaching materials below. When you use one, cite it as [Source: name].\n\n\
         {materials}\n\n\
         The outline must contain a short introduction, 5-7 main topics with 2-3 \
         subtopics each, and learning objectives for every topic.",
        title = params.title,
        audience = params.target_audience,
        style = params.teaching_style,
        objective = params.learning_objective,
        areas = compulsory(params),
        materials = format_materials(materials, excerpt_chars),
    )
}

pub fn generation_prompt(params: &GenerationParameters, plan: &str) -> String {
    format!(
        "You are an expert course content developer. Turn the course plan below into \
         complete course content for \"{title}\" in a {style} teaching style, aimed at \
         {audience}. Every compulsory area must be covered: {areas}.\n\n\
         PLAN:\n{plan}\n\n\
         Respond with exactly one JSON object of this shape and nothing else:\n\
         {{\n  \"title\": string,\n  \"goal\": string,\n  \"method\": string,\n  \
         \"topics\": [{{\n    \"title\": string,\n    \"objectives\": [string],\n    \
         \"outline\": [string],\n    \"key_concepts\": [string],\n    \
         \"applications\": [string],\n    \"assessment\": string,\n    \
         \"duration\": string\n  }}],\n  \"references\": [string]\n}}\n\
         Include 5-7 topics.",
        title = params.title,
        style = params.teaching_style,
        audience = params.target_audience,
        areas = compulsory(params),
        plan = plan,
    )
}

pub fn enhancement_prompt(params: &GenerationParameters, course: &Course) -> String {
    let course_json = serde_json::to_string_pretty(course).unwrap_or_default();
    format!(
        "You are an experienced educational consultant reviewing a course for {audience}. \
         The course must achieve: {objective}.\n\n\
         COURSE:\n{course_json}\n\n\
         Suggest improvements. Respond with exactly one JSON object:\n\
         {{\"enhancement_notes\": string, \"goal\": string (optional, improved goal), \
         \"method\": string (optional, improved teaching method), \
         \"references\": [string] (optional, additional references)}}",
        audience = params.target_audience,
        objective = params.learning_objective,
    )
}

/// Deterministic outline used when planning must not fail.
pub fn fallback_plan(params: &GenerationParameters) -> String {
    let mut plan = format!(
        "# {}\n\nGoal: {}\nMethod: {}\n\n",
        params.title, params.learning_objective, params.teaching_style
    );
    let _ = writeln!(plan, "## Module 1: Introduction to {}", params.title);
    let _ = writeln!(plan, "Objectives: Understand the core ideas of {}\n", params.title);
    for (i, area) in params.compulsory_areas.iter().enumerate() {
        let _ = writeln!(plan, "## Module {}: {}", i + 2, area);
        let _ = writeln!(
            plan,
            "Objectives: Apply {} for {}\n",
            area, params.target_audience
        );
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursewright_core::models::{Metadata, SearchMode};
    use serde_json::json;

    fn params() -> GenerationParameters {
        GenerationParameters {
            title: "Sustainable Business".into(),
            target_audience: "master students".into(),
            teaching_style: "case-based".into(),
            learning_objective: "manage for the 21st century".into(),
            compulsory_areas: vec!["ESG".into(), "AI".into()],
        }
    }

    #[test]
    fn materials_are_bounded_and_attributed() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!("esg.md"));
        let m = SearchResult {
            id: "esg.md#0".into(),
            content: "x".repeat(1000),
            metadata,
            score: 1.0,
            mode: SearchMode::Keyword,
        };
        let rendered = format_materials(&[m], 600);
        assert!(rendered.contains("Source: esg.md"));
        assert!(rendered.len() < 700);
    }

    #[test]
    fn planning_prompt_mentions_every_parameter() {
        let p = planning_prompt(&params(), &[], 600);
        for needle in ["Sustainable Business", "master students", "case-based", "ESG, AI"] {
            assert!(p.contains(needle), "missing {needle}");
        }
        assert!(p.contains("no teaching materials"));
    }

    #[test]
    fn generation_prompt_requests_json() {
        let p = generation_prompt(&params(), "the plan");
        assert!(p.contains("PLAN:\nthe plan"));
        assert!(p.contains("\"key_concepts\""));
    }

    #[test]
    fn fallback_plan_parses_into_modules() {
        let plan = fallback_plan(&params());
        let course = coursewright_core::course::parse_course_text(&plan, "x");
        assert_eq!(course.topics.len(), 3);
        assert_eq!(course.topics[1].title, "ESG");
        assert_eq!(course.goal, "manage for the 21st century");
    }
}
