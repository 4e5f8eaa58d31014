//! # Value Set Materialization CLI
//!
//! Writes FHIR value set expansions into a BigQuery value set codes table.
//!
//! ## Command Line Options
//!
//! ```text
//! -t, --table <TABLE>               Target table, dataset.table or project.dataset.table [env: ATRIUS_VS_TABLE]
//! -p, --project <PROJECT>           Project running the queries [env: GOOGLE_CLOUD_PROJECT]
//!     --access-token <TOKEN>        BigQuery OAuth2 access token [env: BIGQUERY_ACCESS_TOKEN]
//!     --bigquery-url <URL>          BigQuery REST root [env: BIGQUERY_BASE_URL]
//!     --location <LOCATION>         Dataset location for query jobs
//! -b, --batch-size <N>              Maximum rows per insert [env: ATRIUS_VS_BATCH_SIZE] [default: 500]
//! -f, --value-set <FILE>            Pre-expanded ValueSet or Bundle JSON file (repeatable)
//! -u, --url <URL>                   Value set URL to expand, url or url|version (repeatable)
//!     --resolver-dir <DIR>          Expand URLs locally from the ValueSet JSON files in DIR
//!     --service-url <URL>           Terminology service for all URLs [env: TERMINOLOGY_SERVICE_URL]
//!     --api-key <KEY>               Terminology service API key [env: TERMINOLOGY_API_KEY]
//!     --log-level <LEVEL>           Log level [env: ATRIUS_VS_LOG_LEVEL] [default: info]
//! ```
//!
//! `--resolver-dir` and `--service-url` are mutually exclusive: a service URL
//! only applies to terminology service expansion.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Materialize pre-expanded value sets
//! atrius-vs-cli -p my-project -t terminology.valueset_codes -f gender.json -f marital.json
//!
//! # Expand with the terminology service inferred from each URL
//! atrius-vs-cli -p my-project -t terminology.valueset_codes \
//!     -u http://hl7.org/fhir/ValueSet/administrative-gender
//!
//! # Expand locally
//! atrius-vs-cli -p my-project -t terminology.valueset_codes \
//!     --resolver-dir ./valuesets -u http://example.org/ValueSet/local
//! ```

use anyhow::{Context, bail};
use atrius_value_set_tables::{
    BigQueryClient, BigQueryConfig, DEFAULT_BATCH_SIZE, Expander, ExpansionSource,
    LocalValueSetResolver, MaterializeReport, TerminologyServiceClient, ValueSet, ValueSetManager,
    bigquery::DEFAULT_BASE_URL,
};
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "atrius-vs-cli")]
#[command(about = "Materialize FHIR value set expansions into a BigQuery table")]
struct Args {
    /// Target table (dataset.table or project.dataset.table)
    #[arg(long, short = 't', env = "ATRIUS_VS_TABLE")]
    table: String,

    /// Project used for query jobs and two-part table names
    #[arg(long, short = 'p', env = "GOOGLE_CLOUD_PROJECT")]
    project: String,

    /// OAuth2 access token for BigQuery
    #[arg(long, env = "BIGQUERY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// BigQuery REST API root
    #[arg(long, env = "BIGQUERY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    bigquery_url: String,

    /// Dataset location for query jobs (for example US or EU)
    #[arg(long)]
    location: Option<String>,

    /// Maximum number of rows inserted by a single query
    #[arg(long, short = 'b', env = "ATRIUS_VS_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Pre-expanded ValueSet (or Bundle of ValueSets) JSON file
    #[arg(long = "value-set", short = 'f')]
    value_sets: Vec<PathBuf>,

    /// Value set URL to expand (url or url|version)
    #[arg(long = "url", short = 'u')]
    urls: Vec<String>,

    /// Directory of ValueSet JSON files used to expand URLs locally
    #[arg(long, conflicts_with = "service_url")]
    resolver_dir: Option<PathBuf>,

    /// Terminology service used for every URL instead of the per-domain default
    #[arg(long, env = "TERMINOLOGY_SERVICE_URL")]
    service_url: Option<String>,

    /// API key for the terminology service (sent as basic auth user "apikey")
    #[arg(long, env = "TERMINOLOGY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "ATRIUS_VS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Reads a ValueSet or every ValueSet entry of a Bundle.
async fn read_value_sets(path: &Path) -> anyhow::Result<Vec<ValueSet>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let resource_type = json
        .get("resourceType")
        .and_then(Value::as_str)
        .map(str::to_string);
    let resources = match resource_type.as_deref() {
        Some("ValueSet") => vec![json],
        Some("Bundle") => json["entry"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get("resource").cloned())
            .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some("ValueSet"))
            .collect(),
        other => bail!(
            "{} is not a ValueSet or Bundle (resourceType {:?})",
            path.display(),
            other
        ),
    };

    resources
        .into_iter()
        .map(|r| {
            serde_json::from_value(r)
                .with_context(|| format!("Invalid ValueSet in {}", path.display()))
        })
        .collect()
}

async fn build_expansion_source(args: &Args) -> anyhow::Result<ExpansionSource> {
    let expander = match &args.resolver_dir {
        Some(dir) => {
            let resolver = LocalValueSetResolver::load_dir(dir)
                .await
                .with_context(|| format!("Failed to load value sets from {}", dir.display()))?;
            Expander::Local(Arc::new(resolver))
        }
        None => {
            let mut client = TerminologyServiceClient::new();
            if let Some(key) = &args.api_key {
                let service = match &args.service_url {
                    Some(url) => url.clone(),
                    None => client.service_url_for("http://cts.nlm.nih.gov/fhir/ValueSet")?,
                };
                client = client.with_api_key(&service, key.clone());
            }
            Expander::Service(Arc::new(client))
        }
    };
    Ok(ExpansionSource::new(expander, args.service_url.clone())?)
}

fn print_report(label: &str, report: &MaterializeReport) {
    println!(
        "{}: {} value sets, {} rows submitted in {} batches",
        label, report.value_sets, report.rows, report.batches
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = format!(
        "atrius_vs_cli={level},atrius_value_set_tables={level}",
        level = args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.value_sets.is_empty() && args.urls.is_empty() {
        bail!("Nothing to materialize: pass at least one --value-set file or --url");
    }
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let source = if args.urls.is_empty() {
        None
    } else {
        Some(build_expansion_source(&args).await?)
    };

    let mut config = BigQueryConfig::new(&args.project).with_base_url(&args.bigquery_url);
    if let Some(token) = &args.access_token {
        config = config.with_access_token(token);
    }
    if let Some(location) = &args.location {
        config = config.with_location(location);
    }
    let manager = ValueSetManager::from_table_id(BigQueryClient::new(config), &args.table)?;
    info!("Target table: {}", manager.value_set_codes_table());

    if !args.value_sets.is_empty() {
        let mut value_sets = Vec::new();
        for path in &args.value_sets {
            value_sets.extend(read_value_sets(path).await?);
        }
        let report = manager
            .materialize_value_sets(value_sets, args.batch_size)
            .await?;
        print_report("Value set files", &report);
    }

    if let Some(source) = source {
        let report = manager
            .materialize_value_set_expansion(&args.urls, &source, args.batch_size)
            .await?;
        print_report("Expanded URLs", &report);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_dir_conflicts_with_service_url() {
        let result = Args::try_parse_from([
            "atrius-vs-cli",
            "-t",
            "d.t",
            "-p",
            "proj",
            "-u",
            "http://x/vs",
            "--resolver-dir",
            "./valuesets",
            "--service-url",
            "https://tx.example.org/r4",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_repeated_inputs() {
        let args = Args::try_parse_from([
            "atrius-vs-cli",
            "-t",
            "d.t",
            "-p",
            "proj",
            "-f",
            "a.json",
            "-f",
            "b.json",
            "-u",
            "http://x/vs1",
            "-u",
            "http://x/vs2|2",
            "-b",
            "100",
        ])
        .unwrap();
        assert_eq!(args.value_sets.len(), 2);
        assert_eq!(args.urls, vec!["http://x/vs1", "http://x/vs2|2"]);
        assert_eq!(args.batch_size, 100);
    }

    #[tokio::test]
    async fn test_read_value_sets_from_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        let bundle = serde_json::json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "ValueSet", "url": "http://x/a",
                    "expansion": {"contains": [{"system": "s", "code": "1"}]}}},
                {"resource": {"resourceType": "CodeSystem", "url": "http://x/cs"}}
            ]
        });
        std::fs::write(&path, bundle.to_string()).unwrap();

        let value_sets = read_value_sets(&path).await.unwrap();
        assert_eq!(value_sets.len(), 1);
        assert_eq!(value_sets[0].codes(), vec![("s", "1")]);
    }

    #[tokio::test]
    async fn test_read_value_sets_rejects_other_resources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patient.json");
        std::fs::write(&path, r#"{"resourceType": "Patient"}"#).unwrap();
        assert!(read_value_sets(&path).await.is_err());
    }
}
