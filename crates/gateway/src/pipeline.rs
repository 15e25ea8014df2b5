//! Downstream HTTP pipeline: parse → graph upsert → suggest.
//!
//! Every call carries the caller's tenant headers and a per-call deadline.
//! The first failing call aborts the pipeline — the sync path surfaces it
//! as 502, the async worker retries it. 4xx and 5xx are treated alike
//! here (the contract is best-effort), so both map to a transport error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use dg_domain::config::DownstreamConfig;
use dg_domain::schemas::{
    DialogueTurnResponse, GraphSnapshot, GraphUpsertRequest, GraphUpsertResponse,
    ParseTurnRequest, ParseTurnResponse, SuggestionRequest, SuggestionResponse, Turn,
};
use dg_domain::{Error, Result};

/// The pipeline seam. The production implementation is [`Downstreams`];
/// worker tests swap in scripted failures.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(
        &self,
        tenant_id: &str,
        session_id: &str,
        turn: Turn,
        history: Vec<Turn>,
        api_key: Option<&str>,
    ) -> Result<DialogueTurnResponse>;
}

/// HTTP client for the parser, graph, and suggestion services.
pub struct Downstreams {
    http: Client,
    parser_url: String,
    graph_url: String,
    suggestion_url: String,
}

impl Downstreams {
    pub fn new(config: &DownstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            parser_url: config.parser_url.trim_end_matches('/').to_owned(),
            graph_url: config.graph_url.trim_end_matches('/').to_owned(),
            suggestion_url: config.suggestion_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        url: &str,
        tenant_id: &str,
        api_key: Option<&str>,
        body: &Req,
    ) -> Result<Resp> {
        let mut request = self
            .http
            .post(url)
            .header("X-Tenant-ID", tenant_id)
            .json(body);
        if let Some(key) = api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{url}: {e}"))
            } else {
                Error::Http(format!("{url}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{url} returned {status}: {detail}")));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::Http(format!("{url}: {e}")))
    }

    pub async fn parse(
        &self,
        tenant_id: &str,
        session_id: &str,
        turn: &Turn,
        history: &[Turn],
        api_key: Option<&str>,
    ) -> Result<ParseTurnResponse> {
        let body = ParseTurnRequest {
            tenant_id: tenant_id.to_owned(),
            session_id: session_id.to_owned(),
            turn: turn.clone(),
            history: history.to_vec(),
        };
        self.post(
            &format!("{}/v1/parse/turn", self.parser_url),
            tenant_id,
            api_key,
            &body,
        )
        .await
    }

    pub async fn graph_upsert(
        &self,
        tenant_id: &str,
        parse: &ParseTurnResponse,
        api_key: Option<&str>,
    ) -> Result<GraphUpsertResponse> {
        let body = GraphUpsertRequest {
            tenant_id: tenant_id.to_owned(),
            session_id: parse.session_id.clone(),
            concepts: parse.concepts.clone(),
            relations: parse.relations.clone(),
        };
        self.post(
            &format!("{}/v1/graph/upsert", self.graph_url),
            tenant_id,
            api_key,
            &body,
        )
        .await
    }

    pub async fn suggest(
        &self,
        tenant_id: &str,
        session_id: &str,
        parse: &ParseTurnResponse,
        api_key: Option<&str>,
    ) -> Result<SuggestionResponse> {
        let body = SuggestionRequest {
            tenant_id: tenant_id.to_owned(),
            session_id: session_id.to_owned(),
            knowledge_gaps: parse.knowledge_gaps.clone(),
        };
        self.post(
            &format!("{}/v1/suggestions/questions", self.suggestion_url),
            tenant_id,
            api_key,
            &body,
        )
        .await
    }

    /// GET the graph service's snapshot for a session.
    pub async fn graph_snapshot(
        &self,
        tenant_id: &str,
        session_id: &str,
        api_key: Option<&str>,
    ) -> Result<GraphSnapshot> {
        let url = format!("{}/v1/graph/{session_id}", self.graph_url);
        let mut request = self.http.get(&url).header("X-Tenant-ID", tenant_id);
        if let Some(key) = api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{url}: {e}"))
            } else {
                Error::Http(format!("{url}: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound("Session graph not found".into()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{url} returned {status}: {detail}")));
        }
        response
            .json::<GraphSnapshot>()
            .await
            .map_err(|e| Error::Http(format!("{url}: {e}")))
    }
}

#[async_trait]
impl PipelineRunner for Downstreams {
    async fn run(
        &self,
        tenant_id: &str,
        session_id: &str,
        turn: Turn,
        history: Vec<Turn>,
        api_key: Option<&str>,
    ) -> Result<DialogueTurnResponse> {
        let parse = self
            .parse(tenant_id, session_id, &turn, &history, api_key)
            .await?;
        let graph_update = self.graph_upsert(tenant_id, &parse, api_key).await?;
        let suggestions = self
            .suggest(tenant_id, session_id, &parse, api_key)
            .await?;
        Ok(DialogueTurnResponse {
            turn,
            parse,
            graph_update,
            suggested_questions: suggestions.suggestions,
        })
    }
}
