//! BigQuery implementation of [`WarehouseClient`] over the REST API.
//!
//! Only the endpoints the materialization engine needs are used:
//!
//! - `POST /projects/{p}/datasets/{d}/tables` to create the codes table. A
//!   `409 Conflict` means the table exists (possibly created by a concurrent
//!   run), in which case the existing table is fetched and returned.
//! - `POST /projects/{p}/queries` to run a statement, then
//!   `GET /projects/{p}/queries/{jobId}` until the job reports `jobComplete`.
//!
//! Authentication is a bearer access token (for example the output of
//! `gcloud auth print-access-token`).

use crate::error::WarehouseError;
use crate::table::TableReference;
use crate::warehouse::{FieldMode, SchemaField, Table, WarehouseClient};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Connection settings for [`BigQueryClient`].
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Project that runs query jobs and qualifies two-part table names.
    pub project: String,
    /// OAuth2 access token sent as a bearer token.
    pub access_token: Option<String>,
    /// REST endpoint root, overridable for testing.
    pub base_url: String,
    /// Dataset location for query jobs (for example `US`).
    pub location: Option<String>,
    /// How long the server may hold each `getQueryResults` poll open.
    pub poll_timeout: Duration,
    /// Timeout of each HTTP request.
    pub request_timeout: Duration,
}

impl BigQueryConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            access_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            location: None,
            poll_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// BigQuery REST client.
#[derive(Debug, Clone)]
pub struct BigQueryClient {
    client: Client,
    config: BigQueryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    table_reference: TableReferenceResource,
    #[serde(default)]
    schema: Option<SchemaResource>,
    #[serde(default)]
    clustering: Option<ClusteringResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReferenceResource {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct SchemaResource {
    #[serde(default)]
    fields: Vec<FieldResource>,
}

#[derive(Debug, Deserialize)]
struct FieldResource {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<FieldMode>,
}

#[derive(Debug, Deserialize)]
struct ClusteringResource {
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl From<TableResource> for Table {
    fn from(resource: TableResource) -> Self {
        Table {
            reference: TableReference::new(
                resource.table_reference.project_id,
                resource.table_reference.dataset_id,
                resource.table_reference.table_id,
            ),
            schema: resource
                .schema
                .map(|schema| {
                    schema
                        .fields
                        .into_iter()
                        .map(|field| SchemaField {
                            name: field.name,
                            field_type: field.field_type,
                            mode: field.mode.unwrap_or(FieldMode::Nullable),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            clustering_fields: resource.clustering.map(|c| c.fields).unwrap_or_default(),
        }
    }
}

fn describe_errors(errors: &[ErrorProto]) -> String {
    errors
        .iter()
        .map(|e| match (&e.reason, &e.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn config(&self) -> &BigQueryConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, WarehouseError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| WarehouseError::Network(e.to_string()))
    }

    async fn error_from(response: Response) -> WarehouseError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        WarehouseError::Api { status, message }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, WarehouseError> {
        response
            .json()
            .await
            .map_err(|e| WarehouseError::Parse(e.to_string()))
    }

    async fn get_table(&self, reference: &TableReference) -> Result<Table, WarehouseError> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.config.base_url, reference.project, reference.dataset_id, reference.table_id
        );
        let response = self.send(self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(Self::parse::<TableResource>(response).await?.into())
    }

    async fn poll_query(&self, job: &JobReference) -> Result<QueryResponse, WarehouseError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.config.base_url, self.config.project, job.job_id
        );
        let mut query = vec![(
            "timeoutMs",
            self.config.poll_timeout.as_millis().to_string(),
        )];
        if let Some(location) = job.location.as_ref().or(self.config.location.as_ref()) {
            query.push(("location", location.clone()));
        }

        loop {
            let response = self.send(self.client.get(&url).query(&query)).await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            let result: QueryResponse = Self::parse(response).await?;
            if !result.errors.is_empty() {
                return Err(WarehouseError::Job(describe_errors(&result.errors)));
            }
            if result.job_complete {
                return Ok(result);
            }
            debug!("Query job {} still running", job.job_id);
        }
    }
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    fn default_project(&self) -> &str {
        &self.config.project
    }

    async fn create_table(
        &self,
        reference: &TableReference,
        schema: &[SchemaField],
        clustering_fields: &[&str],
    ) -> Result<Table, WarehouseError> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.config.base_url, reference.project, reference.dataset_id
        );
        let body = json!({
            "tableReference": {
                "projectId": reference.project,
                "datasetId": reference.dataset_id,
                "tableId": reference.table_id,
            },
            "schema": { "fields": schema },
            "clustering": { "fields": clustering_fields },
        });

        let response = self.send(self.client.post(&url).json(&body)).await?;
        match response.status() {
            status if status.is_success() => {
                info!("Created table {}", reference);
                Ok(Self::parse::<TableResource>(response).await?.into())
            }
            StatusCode::CONFLICT => {
                debug!("Table {} already exists", reference);
                self.get_table(reference).await
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn run(&self, sql: &str) -> Result<(), WarehouseError> {
        let url = format!(
            "{}/projects/{}/queries",
            self.config.base_url, self.config.project
        );
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": self.config.poll_timeout.as_millis() as u64,
        });
        if let Some(location) = &self.config.location {
            body["location"] = json!(location);
        }

        let response = self.send(self.client.post(&url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let mut result: QueryResponse = Self::parse(response).await?;
        if !result.errors.is_empty() {
            return Err(WarehouseError::Job(describe_errors(&result.errors)));
        }
        if !result.job_complete {
            let job = result.job_reference.take().ok_or_else(|| {
                WarehouseError::Parse("incomplete query response has no jobReference".to_string())
            })?;
            result = self.poll_query(&job).await?;
        }

        debug!(
            "Query completed, {} rows affected",
            result.num_dml_affected_rows.as_deref().unwrap_or("0")
        );
        Ok(())
    }
}
