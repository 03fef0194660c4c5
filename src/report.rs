use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{
    CohortSummary, CompletedModule, Dashboard, Module, RecommendedModule, User,
};

const RECOMMENDATION_LIMIT: usize = 5;

/// Modules the user has not completed yet, in catalogue order.
pub fn recommend<'a>(user: &User, catalogue: &'a [Module], limit: usize) -> Vec<&'a Module> {
    catalogue
        .iter()
        .filter(|module| user.completion_for(module.id).is_none())
        .take(limit)
        .collect()
}

/// Points earned relative to the points achievable on completed modules,
/// on a 0–10 scale. `None` when nothing completed was worth any points.
pub fn average_grade(user: &User, catalogue: &[Module]) -> Option<f64> {
    let achievable: i64 = user
        .completions
        .iter()
        .filter_map(|completion| catalogue.iter().find(|module| module.id == completion.module_id))
        .map(|module| i64::from(module.max_points))
        .sum();

    if achievable > 0 {
        Some(f64::from(user.points) / achievable as f64 * 10.0)
    } else {
        None
    }
}

pub fn build_report(user: &User, catalogue: &[Module], generated_on: NaiveDate) -> String {
    let mut output = String::new();
    let name = user.display_name();

    let _ = writeln!(output, "# {} PROGRESS REPORT", name.to_uppercase());
    let _ = writeln!(output);
    let _ = writeln!(output, "- **Email:** {}", user.email);
    let _ = writeln!(output, "- **Username:** {}", user.username.as_deref().unwrap_or("-"));
    let _ = writeln!(
        output,
        "- **Report Date:** {}",
        generated_on.format("%d/%m/%Y")
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Progress Overview");
    let _ = writeln!(output, "- **Total Points Earned:** {}", user.points);
    let _ = writeln!(output, "- **Modules Completed:** {}", user.completions.len());
    match average_grade(user, catalogue) {
        Some(grade) => {
            let _ = writeln!(output, "- **Average Grade:** {grade:.1}");
        }
        None => {
            let _ = writeln!(output, "- **Average Grade:** 0");
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Module Details");
    if user.completions.is_empty() {
        let _ = writeln!(output, "No modules completed yet.");
    } else {
        for completion in &user.completions {
            let Some(module) = catalogue
                .iter()
                .find(|module| module.id == completion.module_id)
            else {
                continue;
            };
            let _ = writeln!(
                output,
                "- {} ({}): {}/{}",
                module.title, module.difficulty, completion.points_earned, module.max_points
            );
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Recommended Modules");
    let recommended = recommend(user, catalogue, RECOMMENDATION_LIMIT);
    if recommended.is_empty() {
        let _ = writeln!(output, "Every module has been completed.");
    } else {
        for module in recommended {
            let _ = writeln!(output, "- {}", module.title);
        }
    }

    output
}

pub fn build_dashboard(user: &User, catalogue: &[Module]) -> Dashboard {
    let completed = user
        .completions
        .iter()
        .filter_map(|completion| {
            catalogue
                .iter()
                .find(|module| module.id == completion.module_id)
                .map(|module| CompletedModule {
                    title: module.title.clone(),
                    slug: module.slug.clone(),
                    points_earned: completion.points_earned,
                    max_points: module.max_points,
                })
        })
        .collect();

    let recommended = recommend(user, catalogue, RECOMMENDATION_LIMIT)
        .into_iter()
        .map(|module| RecommendedModule {
            title: module.title.clone(),
            slug: module.slug.clone(),
        })
        .collect();

    Dashboard {
        username: user.username.clone(),
        points: user.points,
        completed,
        recommended,
    }
}

pub fn render_dashboard(dashboard: &Dashboard) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "{}: {} points",
        dashboard.username.as_deref().unwrap_or("tutor"),
        dashboard.points
    );
    let _ = writeln!(output, "Completed:");
    if dashboard.completed.is_empty() {
        let _ = writeln!(output, "- none yet");
    }
    for module in &dashboard.completed {
        let _ = writeln!(
            output,
            "- {} (Points: {} out of {})",
            module.title, module.points_earned, module.max_points
        );
    }
    let _ = writeln!(output, "Recommended:");
    for module in &dashboard.recommended {
        let _ = writeln!(output, "- {} [{}]", module.title, module.slug);
    }

    output
}

pub fn format_stat(value: Option<i32>) -> String {
    value.map_or_else(|| "no data".to_string(), |score| score.to_string())
}

pub fn render_cohort_table(summaries: &[CohortSummary]) -> String {
    let mut output = String::new();

    if summaries.is_empty() {
        let _ = writeln!(output, "No cohort statistics recorded yet.");
        return output;
    }

    for summary in summaries {
        let average = summary
            .average
            .map_or_else(|| "no data".to_string(), |value| format!("{value:.2}"));
        let _ = writeln!(
            output,
            "- {} [{}] total {} across {} (avg {}, min {}, max {})",
            summary.module_slug,
            summary.age_group,
            summary.stats.total_score,
            summary.stats.count,
            average,
            format_stat(summary.stats.min_score),
            format_stat(summary.stats.max_score),
        );
    }

    output
}
