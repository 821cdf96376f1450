//! Merge of search hits coming from several providers.

use std::collections::HashMap;

use tunebridge_common::SearchResult;

/// Collapse hits sharing `(name, artist, album)` and rank the rest.
///
/// Keys are compared exactly and case-sensitively, so near-duplicate
/// spellings survive as separate entries. When two hits collide the one with
/// the higher score is kept; on a tie the earlier one stays. The output is
/// sorted by descending score, ties keeping their input order.
pub fn dedup_and_rank(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashMap<(String, String, String), usize> = HashMap::new();
    let mut deduped: Vec<SearchResult> = Vec::with_capacity(results.len());

    for result in results {
        let key = (
            result.name.clone(),
            result.artist.clone(),
            result.album.clone(),
        );
        if let Some(&idx) = seen.get(&key) {
            if result.score > deduped[idx].score {
                deduped[idx] = result;
            }
        } else {
            seen.insert(key, deduped.len());
            deduped.push(result);
        }
    }

    deduped.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str, score: f64, source: &str) -> SearchResult {
        SearchResult::new(format!("{source}-{name}"), name, "Artist", "Album", source).with_score(score)
    }

    #[test]
    fn keeps_higher_scoring_duplicate() {
        let results = dedup_and_rank(vec![hit("A", 0.7, "p1"), hit("A", 0.9, "p2")]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "p2");
        assert!((results[0].score - 0.9).abs() < f64::EPSILON);

        let results = dedup_and_rank(vec![hit("A", 0.9, "p1"), hit("A", 0.7, "p2")]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "p1");
    }

    #[test]
    fn near_duplicates_are_not_merged() {
        let results = dedup_and_rank(vec![hit("Song", 0.5, "p1"), hit("song", 0.6, "p2")]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn sorted_by_descending_score() {
        let results = dedup_and_rank(vec![
            hit("low", 0.1, "p1"),
            hit("high", 0.9, "p2"),
            hit("mid", 0.5, "p3"),
        ]);
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let results = dedup_and_rank(vec![hit("b", 0.5, "p1"), hit("a", 0.5, "p2")]);
        assert_eq!(results[0].name, "b");
        assert_eq!(results[1].name, "a");
    }

    #[test]
    fn empty_input() {
        assert!(dedup_and_rank(Vec::new()).is_empty());
    }
}
