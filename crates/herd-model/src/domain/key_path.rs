//! Key layout of a training job inside the coordination store.
//!
//! ```text
//! {training_id}/status                                      overall status
//! {training_id}/learners/learner_{i}/status/{nanos}         learner status sequence
//! ```

/// Key holding the overall status token.
pub fn overall_status_path(training_id: &str) -> String {
    format!("{training_id}/status")
}

/// Prefix shared by the status entries of every learner.
pub fn learners_path(training_id: &str) -> String {
    format!("{training_id}/learners/")
}

/// Status sequence prefix of learner `index`.
///
/// The trailing slash keeps the prefix from matching `status_summary_metrics` style siblings.
pub fn learner_status_path(training_id: &str, index: u32) -> String {
    format!("{training_id}/learners/learner_{index}/status/")
}

/// Learner index encoded in a key below [`learners_path`], if any.
pub fn learner_index_of(training_id: &str, key: &str) -> Option<u32> {
    let rest = key.strip_prefix(&learners_path(training_id))?;
    let rest = rest.strip_prefix("learner_")?;
    let (index, _) = rest.split_once('/')?;
    index.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(overall_status_path("t1"), "t1/status");
        assert_eq!(learners_path("t1"), "t1/learners/");
        assert_eq!(learner_status_path("t1", 2), "t1/learners/learner_2/status/");
        assert!(learner_status_path("t1", 2).starts_with(&learners_path("t1")));
    }

    #[test]
    fn learner_index_is_recovered_from_keys() {
        assert_eq!(
            learner_index_of("t1", "t1/learners/learner_12/status/1519135679722000000"),
            Some(12)
        );
        assert_eq!(learner_index_of("t1", "t1/status"), None);
        assert_eq!(learner_index_of("t1", "t2/learners/learner_1/status/1"), None);
        assert_eq!(learner_index_of("t1", "t1/learners/learner_x/status/1"), None);
    }
}
