//! Maps classified persistence failures to the small set of responses
//! clients are allowed to see.
//!
//! Rules are evaluated in order. A rule applies when its predicate matches
//! and its translator produces a value; a translator may decline, in which
//! case evaluation continues with the next rule.

use axum::http::StatusCode;

use crate::db::DbError;

pub const HIGH_LOAD_MESSAGE: &str = "High load on database, please try again";

/// Separates the driver's error repr from its human-readable detail.
const CAUSE_DELIMITER: &str = "> : ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedError {
    pub status: StatusCode,
    pub message: String,
}

struct Rule {
    class: &'static str,
    matches: fn(&DbError) -> bool,
    translate: fn(&DbError) -> Option<TranslatedError>,
}

const RULES: &[Rule] = &[
    Rule {
        class: "overload",
        matches: DbError::is_overload,
        translate: overload,
    },
    Rule {
        class: "unique_violation",
        matches: DbError::is_unique_violation,
        translate: unique_violation,
    },
    Rule {
        class: "persistence",
        matches: DbError::is_persistence,
        translate: persistence,
    },
];

/// Returns the outward error for `err`, or `None` when no rule claims it.
pub fn translate(err: &DbError) -> Option<TranslatedError> {
    RULES
        .iter()
        .filter(|rule| (rule.matches)(err))
        .find_map(|rule| {
            let translated = (rule.translate)(err)?;
            tracing::debug!(class = rule.class, status = %translated.status, "translated database error");
            Some(translated)
        })
}

fn overload(_: &DbError) -> Option<TranslatedError> {
    Some(TranslatedError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: HIGH_LOAD_MESSAGE.to_string(),
    })
}

fn unique_violation(err: &DbError) -> Option<TranslatedError> {
    let cause = err.root_cause();
    let (_, detail) = cause.split_once(CAUSE_DELIMITER)?;
    Some(TranslatedError {
        status: StatusCode::CONFLICT,
        message: format!("Database unique value violation: {detail}"),
    })
}

fn persistence(err: &DbError) -> Option<TranslatedError> {
    Some(TranslatedError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: format!("Database error: {err}"),
    })
}
