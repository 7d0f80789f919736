use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    errors::Error,
    model::ToolDefinition,
    tools::{parse_args, Tool},
    utils::truncate_text,
    Result,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Web search backend (Tavily in production).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u8) -> Result<Vec<SearchHit>>;
}

#[derive(Deserialize)]
struct Args {
    query: String,
}

pub struct WebSearch {
    provider: Arc<dyn SearchProvider>,
    max_results: u8,
}

impl WebSearch {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: u8) -> Self {
        Self {
            provider,
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "WebSearch"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "WebSearch".into(),
            description: "Busca informações atuais na internet, como notícias, eventos recentes \
                ou qualquer dado que possa ter mudado recentemente. Liste as fontes usadas ao \
                final da resposta, em uma seção chamada 'Fontes'."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Uma consulta curta e objetiva descrevendo o que o usuário quer saber."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: Args = parse_args(arguments)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("a consulta não pode ser vazia".into()));
        }

        let hits = self.provider.search(query, self.max_results).await?;
        info!(query, results = hits.len(), "web search done");
        if hits.is_empty() {
            return Ok(format!("Nenhum resultado encontrado para: {query}"));
        }

        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!(
                "{}. {}\n   {}\n   {}",
                i + 1,
                hit.title.trim(),
                hit.url,
                truncate_text(hit.content.trim(), 500)
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        hits: Vec<SearchHit>,
        seen: Mutex<Vec<(String, u8)>>,
    }

    #[async_trait]
    impl SearchProvider for FakeProvider {
        async fn search(&self, query: &str, max_results: u8) -> Result<Vec<SearchHit>> {
            self.seen.lock().await.push((query.to_string(), max_results));
            Ok(self.hits.clone())
        }
    }

    #[tokio::test]
    async fn formats_hits_with_sources() {
        let provider = Arc::new(FakeProvider {
            hits: vec![SearchHit {
                title: "Tarifa branca".into(),
                url: "https://example.org/tarifa".into(),
                content: "A tarifa branca...".into(),
            }],
            ..Default::default()
        });
        let tool = WebSearch::new(provider.clone(), 3);
        let out = tool.execute(r#"{"query":" tarifa branca "}"#).await.unwrap();
        assert_eq!(
            out,
            "1. Tarifa branca\n   https://example.org/tarifa\n   A tarifa branca..."
        );
        assert_eq!(
            provider.seen.lock().await.as_slice(),
            &[("tarifa branca".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let tool = WebSearch::new(Arc::new(FakeProvider::default()), 3);
        assert!(tool.execute(r#"{"query":"  "}"#).await.is_err());
    }

    #[tokio::test]
    async fn no_results_message() {
        let tool = WebSearch::new(Arc::new(FakeProvider::default()), 3);
        let out = tool.execute(r#"{"query":"xyz"}"#).await.unwrap();
        assert_eq!(out, "Nenhum resultado encontrado para: xyz");
    }
}
