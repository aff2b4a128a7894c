//! Related-products scoring.

use crate::product::Product;

const SAME_CATEGORY: u32 = 10;
const SAME_GENDER: u32 = 5;
const PER_SHARED_TAG: u32 = 3;
const PER_SHARED_TECHNOLOGY: u32 = 2;
const SIMILAR_PRICE: u32 = 2;
const SAME_SEASON: u32 = 3;
const SAME_COLLECTION: u32 = 3;
const NEW_OR_BESTSELLER: u32 = 1;

fn same_text(a: &str, b: &str) -> bool {
    !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim())
}

fn same_optional(a: Option<&String>, b: Option<&String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if same_text(a, b))
}

fn shared(base: &[String], candidate: &[String]) -> u32 {
    let mut seen: Vec<&str> = Vec::new();
    for item in candidate {
        if base.iter().any(|b| same_text(b, item)) && !seen.iter().any(|s| same_text(s, item)) {
            seen.push(item);
        }
    }
    u32::try_from(seen.len()).unwrap_or(u32::MAX)
}

/// Similarity between `base` and `candidate`.
pub fn similarity_score(base: &Product, candidate: &Product) -> u32 {
    let mut score = 0;

    if same_text(&base.category, &candidate.category) {
        score += SAME_CATEGORY;
    }
    if same_optional(base.gender.as_ref(), candidate.gender.as_ref()) {
        score += SAME_GENDER;
    }
    score += PER_SHARED_TAG * shared(&base.tags, &candidate.tags);
    score += PER_SHARED_TECHNOLOGY * shared(&base.technologies, &candidate.technologies);

    let (low, high) = (base.price * 0.5, base.price * 1.5);
    if base.price > 0.0 && candidate.price >= low && candidate.price <= high {
        score += SIMILAR_PRICE;
    }
    if same_optional(base.season.as_ref(), candidate.season.as_ref()) {
        score += SAME_SEASON;
    }
    if same_optional(base.collection.as_ref(), candidate.collection.as_ref()) {
        score += SAME_COLLECTION;
    }
    if candidate.is_new || candidate.is_bestseller {
        score += NEW_OR_BESTSELLER;
    }

    score
}

/// Top `limit` candidates by descending score.
///
/// The base product itself and zero-score candidates are excluded; equal scores
/// keep their original order.
pub fn rank_related(base: &Product, candidates: &[Product], limit: usize) -> Vec<Product> {
    let mut scored: Vec<(u32, &Product)> = candidates
        .iter()
        .filter(|c| c.id != base.id)
        .map(|c| (similarity_score(base, c), c))
        .filter(|(score, _)| *score > 0)
        .collect();

    // `sort_by` is stable, so ties keep candidate order.
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored.into_iter().take(limit).map(|(_, p)| p.clone()).collect()
}
