// External reference lookup used when no stored heuristic applies
//
// The lookup is advisory: any failure degrades to "no reference" and the
// planner still synthesizes its best-effort proposal.

mod firecrawl;

pub use firecrawl::FirecrawlKnowledge;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{KnowledgeConfig, KnowledgeProvider};
use crate::signature::{BugSignature, SignatureKind};

/// What the planner asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceQuery {
    pub kind: SignatureKind,
    pub text: String,
}

impl ReferenceQuery {
    pub fn for_signature(signature: &BugSignature) -> Self {
        Self {
            kind: signature.kind,
            text: signature.reference_query(),
        }
    }
}

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;

    /// False for the no-op source; the planner only synthesizes when true
    fn is_configured(&self) -> bool {
        true
    }

    /// Reference text for the failure, or `None` when nothing usable came back
    async fn fetch_reference(&self, query: &ReferenceQuery) -> Option<String>;
}

/// Default source: never configured, never returns anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeSource for NoKnowledge {
    fn name(&self) -> &str {
        "none"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn fetch_reference(&self, _query: &ReferenceQuery) -> Option<String> {
        None
    }
}

/// Build the source selected by configuration
pub fn from_config(config: &KnowledgeConfig) -> Result<Arc<dyn KnowledgeSource>> {
    match config.provider {
        KnowledgeProvider::None => Ok(Arc::new(NoKnowledge)),
        KnowledgeProvider::Firecrawl => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Firecrawl lookup needs FIRECRAWL_API_KEY"))?;
            Ok(Arc::new(FirecrawlKnowledge::new(
                &config.base_url,
                key,
                std::time::Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}
