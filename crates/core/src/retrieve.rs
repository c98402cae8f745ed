use crate::traits::PassageIndex;
use crate::{Citation, IndexError, Neighbor, RetrievalResult};

pub const DEFAULT_TOP_K: usize = 6;
pub const SNIPPET_CHARS: usize = 350;
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub struct Retriever<'a, I: ?Sized> {
    index: &'a I,
}

impl<'a, I> Retriever<'a, I>
where
    I: PassageIndex + ?Sized,
{
    pub fn new(index: &'a I) -> Self {
        Self { index }
    }

    /// Nearest passages as one context string plus citations in the same rank order.
    ///
    /// There is no relevance cutoff: an unrelated query still gets up to `top_k` hits.
    /// A blank query matches nothing and yields an empty result.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult, IndexError> {
        if query.trim().is_empty() {
            return Ok(RetrievalResult::default());
        }

        let neighbors = self.index.query(query, top_k)?;
        Ok(assemble(&neighbors))
    }
}

pub fn retrieve_with_citations<I>(
    index: &I,
    query: &str,
    top_k: usize,
) -> Result<RetrievalResult, IndexError>
where
    I: PassageIndex + ?Sized,
{
    Retriever::new(index).retrieve(query, top_k)
}

fn assemble(neighbors: &[Neighbor]) -> RetrievalResult {
    let mut citations = Vec::with_capacity(neighbors.len());
    let mut blocks = Vec::with_capacity(neighbors.len());

    for neighbor in neighbors {
        let passage = &neighbor.entry.passage;
        citations.push(Citation {
            source: passage.source_file.clone(),
            page: passage.page_number,
            snippet: snippet(&passage.text),
        });
        blocks.push(format!(
            "[{} - page {}]\n{}",
            passage.source_file, passage.page_number, passage.text
        ));
    }

    RetrievalResult {
        context: blocks.join(CONTEXT_SEPARATOR).trim().to_string(),
        citations,
    }
}

fn snippet(text: &str) -> String {
    text.chars()
        .take(SNIPPET_CHARS)
        .collect::<String>()
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}
