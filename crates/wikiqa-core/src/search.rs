//! Passage ranking and context packing.
//!
//! The retrieval algorithm operates on an in-memory passage slice and a
//! pre-computed question embedding. The calling application is
//! responsible for embedding the question and choosing the token budget.
//!
//! # Algorithm
//!
//! 1. Cosine distance from the question vector to every embedded passage.
//! 2. Stable sort by ascending distance (ties keep table order).
//! 3. Walk the sorted list adding `n_tokens + 4` per passage; stop at the
//!    first passage that would overflow the budget.
//! 4. Join the accepted contents with `"\n\n###\n\n"`.
//!
//! Stopping at the first overflow bounds the context in a single pass
//! and means a larger budget only ever extends the accepted prefix.

use serde::Serialize;

use crate::embedding::cosine_distance;
use crate::models::Passage;

/// Per-passage prompt overhead (separator and formatting tokens).
pub const PASSAGE_OVERHEAD_TOKENS: usize = 4;

/// Separator placed between passages in the context string.
pub const CONTEXT_SEPARATOR: &str = "\n\n###\n\n";

/// A passage with its distance to the question.
#[derive(Debug, Clone, Copy)]
pub struct RankedPassage<'a> {
    /// Row index in the dataset table.
    pub index: usize,
    pub passage: &'a Passage,
    pub distance: f32,
}

/// A packed context window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackedContext {
    /// Accepted contents joined with [`CONTEXT_SEPARATOR`]. Empty when nothing fit.
    pub context: String,
    /// Accepted passages in rank order.
    pub selected: Vec<SelectedPassage>,
    /// `Σ (n_tokens + PASSAGE_OVERHEAD_TOKENS)` over accepted passages.
    pub tokens_used: usize,
    /// Number of ranked candidates considered.
    pub candidates: usize,
}

impl PackedContext {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// One accepted passage, referenced by table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedPassage {
    pub index: usize,
    pub page_title: String,
    pub n_tokens: usize,
    pub distance: f32,
}

/// Rank embedded passages by cosine distance to `query`, nearest first.
///
/// Passages without an embedding are not candidates.
pub fn rank_passages<'a>(passages: &'a [Passage], query: &[f32]) -> Vec<RankedPassage<'a>> {
    let mut ranked: Vec<RankedPassage<'a>> = passages
        .iter()
        .enumerate()
        .filter_map(|(index, passage)| {
            passage.embedding.as_ref().map(|embedding| RankedPassage {
                index,
                passage,
                distance: cosine_distance(query, embedding),
            })
        })
        .collect();

    // `sort_by` is stable: equal distances keep table order.
    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    ranked
}

/// Greedily pack ranked passages into `token_budget` tokens.
pub fn pack_context(ranked: &[RankedPassage<'_>], token_budget: usize) -> PackedContext {
    let mut tokens_used = 0usize;
    let mut contents: Vec<&str> = Vec::new();
    let mut selected = Vec::new();

    for r in ranked {
        let cost = r.passage.n_tokens + PASSAGE_OVERHEAD_TOKENS;
        if tokens_used + cost > token_budget {
            break;
        }
        tokens_used += cost;
        contents.push(r.passage.content.trim());
        selected.push(SelectedPassage {
            index: r.index,
            page_title: r.passage.page_title.clone(),
            n_tokens: r.passage.n_tokens,
            distance: r.distance,
        });
    }

    PackedContext {
        context: contents.join(CONTEXT_SEPARATOR),
        selected,
        tokens_used,
        candidates: ranked.len(),
    }
}

/// Rank `passages` against `query` and pack the nearest into `token_budget`.
pub fn rank_and_pack(passages: &[Passage], query: &[f32], token_budget: usize) -> PackedContext {
    let ranked = rank_passages(passages, query);
    pack_context(&ranked, token_budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn passage(title: &str, content: &str, n_tokens: usize, embedding: Vec<f32>) -> Passage {
        Passage {
            page_title: title.to_string(),
            content: content.to_string(),
            n_tokens,
            embedding: Some(embedding),
        }
    }

    fn ships() -> Vec<Passage> {
        vec![
            passage(
                "Theia",
                "theia. a light cruiser with 500 shield.",
                10,
                vec![1.0, 0.0],
            ),
            passage(
                "Deity",
                "deity. a battleship with 2000 shield.",
                11,
                vec![0.0, 1.0],
            ),
        ]
    }

    fn random_passages(rng: &mut StdRng, n: usize) -> Vec<Passage> {
        (0..n)
            .map(|i| {
                passage(
                    &format!("Page {}", i),
                    &format!("page {}. content", i),
                    rng.random_range(0..60),
                    vec![rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)],
                )
            })
            .collect()
    }

    #[test]
    fn test_nearest_passage_fills_budget() {
        let packed = rank_and_pack(&ships(), &[0.9, 0.1], 20);
        assert_eq!(packed.selected.len(), 1);
        assert_eq!(packed.selected[0].page_title, "Theia");
        assert_eq!(packed.context, "theia. a light cruiser with 500 shield.");
        assert_eq!(packed.tokens_used, 14);
        assert_eq!(packed.candidates, 2);
    }

    #[test]
    fn test_both_passages_fit_larger_budget() {
        let packed = rank_and_pack(&ships(), &[0.9, 0.1], 29);
        assert_eq!(packed.selected.len(), 2);
        assert_eq!(
            packed.context,
            "theia. a light cruiser with 500 shield.\n\n###\n\ndeity. a battleship with 2000 shield."
        );
        assert_eq!(packed.tokens_used, 29);
    }

    #[test]
    fn test_zero_budget_is_empty_not_error() {
        let packed = rank_and_pack(&ships(), &[0.9, 0.1], 0);
        assert!(packed.is_empty());
        assert_eq!(packed.context, "");
        assert_eq!(packed.tokens_used, 0);
    }

    #[test]
    fn test_greedy_stops_at_first_overflow() {
        let passages = vec![
            passage("Near", "near.", 1, vec![1.0, 0.0]),
            passage("Big", "big.", 50, vec![0.9, 0.1]),
            passage("Small", "small.", 1, vec![0.0, 1.0]),
        ];
        let packed = rank_and_pack(&passages, &[1.0, 0.0], 20);
        let titles: Vec<&str> = packed.selected.iter().map(|s| s.page_title.as_str()).collect();
        assert_eq!(titles, vec!["Near"]);
    }

    #[test]
    fn test_equal_distances_keep_table_order() {
        let passages = vec![
            passage("First", "first.", 1, vec![1.0, 1.0]),
            passage("Second", "second.", 1, vec![2.0, 2.0]),
            passage("Third", "third.", 1, vec![0.5, 0.5]),
        ];
        let ranked = rank_passages(&passages, &[3.0, 3.0]);
        let order: Vec<usize> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_unembedded_passages_are_not_candidates() {
        let mut passages = ships();
        passages[0].embedding = None;
        let packed = rank_and_pack(&passages, &[0.9, 0.1], 100);
        assert_eq!(packed.candidates, 1);
        assert_eq!(packed.selected[0].page_title, "Deity");
        assert_eq!(packed.selected[0].index, 1);
    }

    #[test]
    fn test_contents_are_trimmed() {
        let passages = vec![passage("Pad", "  padded.  ", 1, vec![1.0])];
        assert_eq!(rank_and_pack(&passages, &[1.0], 10).context, "padded.");
    }

    #[test]
    fn test_budget_never_exceeded() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let passages = random_passages(&mut rng, 25);
            let query = [rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)];
            let budget = rng.random_range(0..400);
            let packed = rank_and_pack(&passages, &query, budget);
            let sum: usize = packed
                .selected
                .iter()
                .map(|s| s.n_tokens + PASSAGE_OVERHEAD_TOKENS)
                .sum();
            assert_eq!(sum, packed.tokens_used);
            assert!(packed.tokens_used <= budget);
        }
    }

    #[test]
    fn test_larger_budget_never_removes_passages() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let passages = random_passages(&mut rng, 20);
            let query = [rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)];
            let mut previous: Vec<usize> = Vec::new();
            for budget in (0..500).step_by(17) {
                let packed = rank_and_pack(&passages, &query, budget);
                let current: Vec<usize> = packed.selected.iter().map(|s| s.index).collect();
                assert!(current.len() >= previous.len());
                assert_eq!(&current[..previous.len()], previous.as_slice());
                previous = current;
            }
        }
    }
}
