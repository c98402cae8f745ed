use crate::{IndexError, Neighbor, Passage};

pub trait PassageIndex {
    /// Embeds and appends `passages`, returning how many were stored.
    fn add(&self, passages: &[Passage]) -> Result<usize, IndexError>;

    /// The `k` nearest entries to `text`, nearest first.
    fn query(&self, text: &str, k: usize) -> Result<Vec<Neighbor>, IndexError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, content_hash: &str) -> bool;
}
