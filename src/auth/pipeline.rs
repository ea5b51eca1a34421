//! Ordered, short-circuiting gate chain

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Rejection, RequestContext};

/// One step of request authentication or authorization.
///
/// A gate either lets the request continue (possibly recording identity in
/// the context) or ends it with a [`Rejection`].
#[async_trait]
pub trait Gate: Send + Sync {
    async fn check(&self, ctx: &mut RequestContext) -> Result<(), Rejection>;
}

/// Gates run in insertion order; the first rejection wins.
#[derive(Clone, Default)]
pub struct Pipeline {
    gates: Vec<Arc<dyn Gate>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, gate: impl Gate + 'static) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    /// Append a gate shared with other pipelines.
    pub fn then_shared(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gates.push(gate);
        self
    }

    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        for gate in &self.gates {
            gate.check(ctx).await?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
