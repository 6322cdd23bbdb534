//! Cosmetic copy selection.
//!
//! Subjects, greetings and CTAs are picked from small fixed pools keyed by
//! email category. Selection hashes the recipient's display name so a given
//! recipient always sees the same flavor; there is no statistics here and
//! no overlap with the experiment coordinator's variants.

use crate::hash::stable_hash;

const MATCH_SUBJECTS: &[&str] = &[
    "{name}, someone caught your eye",
    "You have a new match, {name}",
    "{name}, your next conversation is waiting",
];

const MESSAGE_SUBJECTS: &[&str] = &[
    "{name}, you have a new message",
    "Someone wrote to you, {name}",
];

const DIGEST_SUBJECTS: &[&str] = &[
    "{name}, here's who viewed you this week",
    "Your weekly roundup, {name}",
];

const REENGAGEMENT_SUBJECTS: &[&str] = &[
    "We miss you, {name}",
    "{name}, new people joined near you",
];

const GREETINGS: &[&str] = &["Hey {name},", "Hi {name},", "Hello {name},"];

const MATCH_CTAS: &[&str] = &["See who it is", "View your match", "Say hello"];
const MESSAGE_CTAS: &[&str] = &["Read the message", "Reply now"];
const DIGEST_CTAS: &[&str] = &["See your week", "Open your roundup"];
const REENGAGEMENT_CTAS: &[&str] = &["Come back and look", "See what's new"];
const GENERAL_CTAS: &[&str] = &["Open the app", "Take a look"];

fn subject_pool(category: &str) -> Option<&'static [&'static str]> {
    match category {
        "MATCH" => Some(MATCH_SUBJECTS),
        "MESSAGE" => Some(MESSAGE_SUBJECTS),
        "DIGEST" => Some(DIGEST_SUBJECTS),
        "REENGAGEMENT" => Some(REENGAGEMENT_SUBJECTS),
        _ => None,
    }
}

fn cta_pool(category: &str) -> &'static [&'static str] {
    match category {
        "MATCH" => MATCH_CTAS,
        "MESSAGE" => MESSAGE_CTAS,
        "DIGEST" => DIGEST_CTAS,
        "REENGAGEMENT" => REENGAGEMENT_CTAS,
        _ => GENERAL_CTAS,
    }
}

fn pick<'a>(pool: &'a [&'a str], key: &str) -> &'a str {
    pool[(stable_hash(key) % pool.len() as u64) as usize]
}

fn fill_name(template: &str, display_name: &str) -> String {
    template.replace("{name}", display_name)
}

/// Choose a subject line for the category, falling back to the rendered
/// base subject for categories without a pool.
pub fn personalize_subject(base_subject: &str, category: &str, display_name: &str) -> String {
    match subject_pool(category) {
        Some(pool) => fill_name(pick(pool, display_name), display_name),
        None => base_subject.to_string(),
    }
}

/// Choose a greeting line.
pub fn personalize_greeting(display_name: &str) -> String {
    fill_name(pick(GREETINGS, display_name), display_name)
}

/// Choose a call-to-action label for the category.
pub fn personalize_cta(category: &str, display_name: &str) -> String {
    pick(cta_pool(category), display_name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_deterministic_per_recipient() {
        let first = personalize_subject("fallback", "MATCH", "Sam");
        for _ in 0..10 {
            assert_eq!(personalize_subject("fallback", "MATCH", "Sam"), first);
        }
        assert!(first.contains("Sam"));
        assert!(!first.contains("{name}"));
    }

    #[test]
    fn test_unknown_category_keeps_base_subject() {
        assert_eq!(
            personalize_subject("Account notice", "GENERAL", "Sam"),
            "Account notice"
        );
    }

    #[test]
    fn test_greeting_contains_name() {
        let greeting = personalize_greeting("Alex");
        assert!(greeting.contains("Alex"));
        assert!(greeting.ends_with(','));
    }

    #[test]
    fn test_cta_pools_by_category() {
        assert!(MATCH_CTAS.contains(&personalize_cta("MATCH", "Sam").as_str()));
        assert!(GENERAL_CTAS.contains(&personalize_cta("SOMETHING_ELSE", "Sam").as_str()));
    }

    #[test]
    fn test_pools_are_actually_used() {
        // Across many names, more than one pool entry should appear.
        let mut seen = std::collections::HashSet::new();
        for i in 0..50 {
            seen.insert(personalize_cta("MATCH", &format!("user-{i}")));
        }
        assert!(seen.len() > 1, "selection never varies");
    }
}
