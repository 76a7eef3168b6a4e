//! Union of two branches presented as one
//!
//! Reads see the bag union of both members; writes go to the primary
//! member only. Lifecycle operations fan out to both, primary first.

use crate::dataset::UnionDataset;
use quadstore_core::{
    IsolationLevel, Result, StatementBranch, StatementDataset, StatementSink, StatementSource,
};
use std::sync::Arc;

/// Two branches combined into one: reads union both, writes reach only
/// the primary.
pub struct UnionBranch {
    primary: Arc<dyn StatementBranch>,
    additional: Arc<dyn StatementBranch>,
}

impl UnionBranch {
    pub fn new(primary: Arc<dyn StatementBranch>, additional: Arc<dyn StatementBranch>) -> Self {
        UnionBranch {
            primary,
            additional,
        }
    }
}

impl StatementSource for UnionBranch {
    fn sink(&self, level: IsolationLevel) -> Result<Box<dyn StatementSink>> {
        self.primary.sink(level)
    }

    fn dataset(&self, level: IsolationLevel) -> Result<Box<dyn StatementDataset>> {
        let primary = self.primary.dataset(level)?;
        let additional = self.additional.dataset(level)?;
        Ok(Box::new(UnionDataset::new(primary, additional)))
    }

    fn fork(&self) -> Arc<dyn StatementBranch> {
        Arc::new(UnionBranch::new(self.primary.fork(), self.additional.fork()))
    }

    fn close(&self) -> Result<()> {
        // close both members even if the first close fails
        let primary = self.primary.close();
        let additional = self.additional.close();
        primary.and(additional)
    }
}

impl StatementBranch for UnionBranch {
    fn prepare(&self) -> Result<()> {
        self.primary.prepare()?;
        self.additional.prepare()
    }

    fn flush(&self) -> Result<()> {
        self.primary.flush()?;
        self.additional.flush()
    }
}
