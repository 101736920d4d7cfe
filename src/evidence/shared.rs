use once_cell::sync::OnceCell;
use tracing::info;

use crate::model::EvidenceHit;

use super::engine::EvidenceEngine;
use super::{EvidenceSource, IndexError, TermEvidence};

type EngineLoader = Box<dyn Fn() -> Result<EvidenceEngine, IndexError> + Send + Sync>;

/// A failed load leaves the cell empty so a later caller may try again.
pub struct SharedEvidence {
    cell: OnceCell<EvidenceEngine>,
    loader: EngineLoader,
}

impl SharedEvidence {
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<EvidenceEngine, IndexError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Box::new(loader),
        }
    }

    pub fn get(&self) -> Result<&EvidenceEngine, IndexError> {
        self.cell.get_or_try_init(|| {
            info!("initializing shared evidence engine");
            (self.loader)()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl EvidenceSource for SharedEvidence {
    fn search(&self, text: &str, k: usize) -> Result<Vec<EvidenceHit>, IndexError> {
        self.get()?.search(text, k)
    }

    fn search_many(&self, terms: &[String], k: usize) -> Result<Vec<TermEvidence>, IndexError> {
        self.get()?.search_many(terms, k)
    }
}
