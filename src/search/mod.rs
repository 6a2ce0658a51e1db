//! Hybrid query resolution: exact tag/person matches first, semantic
//! embedding similarity as the fallback.
//!
//! Exact matches preserve the collection's current sort order; only the
//! pure-semantic fallback ranks by similarity. An unavailable embedder
//! fails open to the unfiltered collection rather than an empty screen.

use anyhow::Result;
use std::collections::HashSet;

use crate::providers::{cosine_similarity, EmbeddingProvider};
use crate::reconcile::PhotoSummary;
use crate::store::MetadataStore;

/// A query split into tag terms and person-name terms.
///
/// Everything after the first standalone "with" is a comma/"and"-delimited
/// list of person names; the tokens before it are tag terms.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedQuery {
    pub tag_terms: Vec<String>,
    pub person_terms: Vec<String>,
}

pub fn parse_query(query: &str) -> ParsedQuery {
    let query = query.to_lowercase();

    let (tag_part, person_part) = split_on_with(&query);

    let tag_terms = tag_part.split_whitespace().map(str::to_string).collect();

    let person_terms = person_part
        .map(|part| {
            part.split(',')
                .flat_map(|chunk| chunk.split(" and "))
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    ParsedQuery {
        tag_terms,
        person_terms,
    }
}

/// Split at the first "with" appearing as its own word ("with tina",
/// "dog with tina"). A query that is only "with" has no person part.
fn split_on_with(query: &str) -> (&str, Option<&str>) {
    if let Some(rest) = query.strip_prefix("with ") {
        return ("", Some(rest));
    }
    if let Some(idx) = query.find(" with ") {
        return (&query[..idx], Some(&query[idx + " with ".len()..]));
    }
    (query, None)
}

/// Cached embedding index: one vector per photo, aligned index-for-index
/// with the collection, built from each photo's caption/tag text.
struct SearchIndex {
    generation: u64,
    vectors: Vec<Option<Vec<f32>>>,
}

impl SearchIndex {
    fn build(photos: &[PhotoSummary], embedder: &dyn EmbeddingProvider, generation: u64) -> Self {
        let vectors = photos
            .iter()
            .map(|photo| {
                let text = photo.index_text();
                if text.is_empty() {
                    return None;
                }
                match embedder.embed(text) {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        tracing::warn!(path = %photo.path.display(), error = %e, "failed to embed photo text");
                        None
                    }
                }
            })
            .collect();

        Self {
            generation,
            vectors,
        }
    }
}

pub struct QueryResolver {
    threshold: f32,
    limit: usize,
    index: Option<SearchIndex>,
}

impl QueryResolver {
    pub fn new(threshold: f32, limit: usize) -> Self {
        Self {
            threshold,
            limit,
            index: None,
        }
    }

    /// Drop the cached embedding index. Called whenever the collection
    /// changes: a new folder load, a sort change, a caption arriving.
    pub fn invalidate(&mut self) {
        self.index = None;
    }

    /// Resolve `query` against the current collection.
    ///
    /// An empty query returns the full collection unmodified. Tag and
    /// person matches are OR-combined and keep collection order. When no
    /// exact term matches, the query falls back to semantic search over
    /// the caption/tag text, keeping results strictly above the threshold,
    /// at most `limit`, ranked by descending similarity with stable ties.
    pub fn resolve(
        &mut self,
        query: &str,
        photos: &[PhotoSummary],
        generation: u64,
        store: &MetadataStore,
        embedder: Option<&dyn EmbeddingProvider>,
    ) -> Result<Vec<PhotoSummary>> {
        if query.trim().is_empty() {
            return Ok(photos.to_vec());
        }

        let parsed = parse_query(query);
        let matched = self.exact_matches(&parsed, photos, store)?;

        if !matched.is_empty() {
            return Ok(photos
                .iter()
                .enumerate()
                .filter(|(i, _)| matched.contains(i))
                .map(|(_, p)| p.clone())
                .collect());
        }

        self.semantic_fallback(query, photos, generation, embedder)
    }

    fn exact_matches(
        &self,
        parsed: &ParsedQuery,
        photos: &[PhotoSummary],
        store: &MetadataStore,
    ) -> Result<HashSet<usize>> {
        let mut matched = HashSet::new();

        for (i, photo) in photos.iter().enumerate() {
            let tags = photo.tags.to_lowercase();
            if parsed.tag_terms.iter().any(|term| tags.contains(term)) {
                matched.insert(i);
            }
        }

        for name in &parsed.person_terms {
            let paths = store.paths_with_person(name)?;
            if paths.is_empty() {
                continue;
            }
            for (i, photo) in photos.iter().enumerate() {
                if paths.contains(&photo.path_str()) {
                    matched.insert(i);
                }
            }
        }

        Ok(matched)
    }

    fn semantic_fallback(
        &mut self,
        query: &str,
        photos: &[PhotoSummary],
        generation: u64,
        embedder: Option<&dyn EmbeddingProvider>,
    ) -> Result<Vec<PhotoSummary>> {
        let Some(embedder) = embedder else {
            tracing::warn!("embedding provider unavailable, returning unfiltered collection");
            return Ok(photos.to_vec());
        };

        let query_vector = match embedder.embed(query) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, returning unfiltered collection");
                return Ok(photos.to_vec());
            }
        };

        let stale = match &self.index {
            Some(index) => {
                index.generation != generation || index.vectors.len() != photos.len()
            }
            None => true,
        };
        if stale {
            self.index = None;
        }
        let index = self
            .index
            .get_or_insert_with(|| SearchIndex::build(photos, embedder, generation));

        let mut scored: Vec<(usize, f32)> = index
            .vectors
            .iter()
            .enumerate()
            .filter_map(|(i, vector)| {
                vector
                    .as_ref()
                    .map(|v| (i, cosine_similarity(&query_vector, v)))
            })
            .filter(|(_, similarity)| *similarity > self.threshold)
            .collect();

        // Stable sort keeps first-seen order among equal similarities
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(self.limit)
            .map(|(i, _)| photos[i].clone())
            .collect())
    }
}
