//! Online backend for the hosted tracking service.
//!
//! Run metadata goes through the GraphQL endpoint (`viewer`, `upsertBucket`,
//! `createRunFiles`); history rows, the summary and the completion marker go
//! through the per-run `file_stream` endpoint. Uploaded files are mirrored to
//! a local run directory as well.

use plr_types::{PlrResult, TrackingError};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{Record, RunInfo, TrackingBackend};
use crate::offline::safe_relative;
use crate::settings::TrackingSettings;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const HISTORY_FILE: &str = "wandb-history.jsonl";
const SUMMARY_FILE: &str = "wandb-summary.json";

const VIEWER_QUERY: &str = r#"
query Viewer {
    viewer {
        id
        entity
        username
    }
}
"#;

const UPSERT_BUCKET_MUTATION: &str = r#"
mutation UpsertBucket(
    $name: String,
    $project: String,
    $entity: String,
    $config: JSONString,
    $displayName: String
) {
    upsertBucket(input: {
        name: $name,
        modelName: $project,
        entityName: $entity,
        config: $config,
        displayName: $displayName
    }) {
        bucket {
            id
            name
            displayName
            project {
                name
                entity { name }
            }
        }
    }
}
"#;

const CREATE_RUN_FILES_MUTATION: &str = r#"
mutation CreateRunFiles($entity: String!, $project: String!, $run: String!, $files: [String!]!) {
    createRunFiles(input: {entityName: $entity, projectName: $project, runName: $run, files: $files}) {
        runID
        files {
            name
            uploadUrl
        }
    }
}
"#;

/// Where a started run lives on the service
#[derive(Debug, Clone, PartialEq)]
struct RemoteRun {
    storage_id: String,
    entity: String,
    project: String,
    name: String,
}

#[derive(Debug)]
pub struct WandbBackend {
    client: Client,
    base_url: String,
    api_key: String,
    entity: String,
    results_dir: PathBuf,
    local_dir: Option<PathBuf>,
    remote: Option<RemoteRun>,
    history_offset: usize,
}

impl WandbBackend {
    /// Validate the API key against the service and resolve the entity.
    pub fn login<P: AsRef<Path>>(settings: &TrackingSettings, results_dir: P) -> PlrResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or(TrackingError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TrackingError::RequestFailed {
                endpoint: settings.base_url.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let mut backend = Self {
            client,
            base_url: settings.base_url.clone(),
            api_key,
            entity: String::new(),
            results_dir: results_dir.as_ref().to_path_buf(),
            local_dir: None,
            remote: None,
            history_offset: 0,
        };

        let data = backend.graphql(VIEWER_QUERY, json!({}))?;
        let viewer_entity = viewer_entity(&data)?;
        backend.entity = settings.entity.clone().unwrap_or(viewer_entity);

        info!("Logged in to {} as {}", backend.base_url, backend.entity);
        Ok(backend)
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url)
    }

    fn file_stream_url(&self, run: &RemoteRun) -> String {
        format!(
            "{}/files/{}/{}/{}/file_stream",
            self.base_url, run.entity, run.project, run.name
        )
    }

    fn remote(&self) -> PlrResult<&RemoteRun> {
        self.remote.as_ref().ok_or_else(|| {
            plr_types::PlrError::Internal("online run used before start_run".to_string())
        })
    }

    fn graphql(&self, query: &str, variables: Value) -> PlrResult<Value> {
        let url = self.graphql_url();
        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .map_err(|e| TrackingError::RequestFailed {
                endpoint: url.clone(),
                message: format!("HTTP request failed: {}", e),
            })?;

        let body: Value = check_status(&url, response)?
            .json()
            .map_err(|e| TrackingError::InvalidResponse {
                endpoint: url.clone(),
                message: format!("invalid JSON: {}", e),
            })?;

        graphql_data(&url, body)
    }

    fn post_file_stream(&self, payload: &Value) -> PlrResult<()> {
        let url = self.file_stream_url(self.remote()?);
        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .json(payload)
            .send()
            .map_err(|e| TrackingError::RequestFailed {
                endpoint: url.clone(),
                message: format!("HTTP request failed: {}", e),
            })?;
        check_status(&url, response)?;
        Ok(())
    }

    fn mirror_locally(&self, name: &str, contents: &[u8]) -> PlrResult<()> {
        if let Some(dir) = &self.local_dir {
            let target = dir.join("files").join(safe_relative(name)?);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, contents)?;
        }
        Ok(())
    }
}

impl TrackingBackend for WandbBackend {
    fn name(&self) -> &str {
        "online"
    }

    fn start_run(&mut self, run: &RunInfo) -> PlrResult<()> {
        let entity = run.entity.clone().unwrap_or_else(|| self.entity.clone());
        let variables = json!({
            "name": run.id,
            "project": run.project,
            "entity": entity,
            "config": service_config(&run.config).to_string(),
            "displayName": run.display_name,
        });

        let data = self.graphql(UPSERT_BUCKET_MUTATION, variables)?;
        let remote = parse_bucket(&self.graphql_url(), &data, &run.project, &entity)?;

        let stamp = run.started_at.format("%Y%m%d_%H%M%S");
        let local_dir = self.results_dir.join(format!("run-{}-{}", stamp, run.id));
        fs::create_dir_all(local_dir.join("files"))?;
        fs::write(
            local_dir.join("config.json"),
            serde_json::to_vec_pretty(&run.config)?,
        )?;

        debug!("Run {} has storage id {}", remote.name, remote.storage_id);
        info!(
            "Syncing run {} to {}/{}/{}/runs/{}",
            remote.name, self.base_url, remote.entity, remote.project, remote.name
        );
        self.local_dir = Some(local_dir);
        self.remote = Some(remote);
        self.history_offset = 0;
        Ok(())
    }

    fn log_history(&mut self, row: &Record) -> PlrResult<()> {
        let line = serde_json::to_string(row)?;
        let payload = file_stream_payload(HISTORY_FILE, self.history_offset, &[line]);
        self.post_file_stream(&payload)?;
        self.history_offset += 1;
        Ok(())
    }

    fn upload_file(&mut self, name: &str, contents: &[u8]) -> PlrResult<()> {
        self.mirror_locally(name, contents)?;

        let remote = self.remote()?.clone();
        let data = self.graphql(
            CREATE_RUN_FILES_MUTATION,
            json!({
                "entity": remote.entity,
                "project": remote.project,
                "run": remote.name,
                "files": [name],
            }),
        )?;
        let upload_url = upload_url_for(&data, name).ok_or_else(|| {
            TrackingError::InvalidResponse {
                endpoint: self.graphql_url(),
                message: format!("no upload URL returned for {name}"),
            }
        })?;

        let response = self
            .client
            .put(&upload_url)
            .body(contents.to_vec())
            .send()
            .map_err(|e| TrackingError::RequestFailed {
                endpoint: upload_url.clone(),
                message: format!("upload failed: {}", e),
            })?;
        check_status(&upload_url, response)?;

        debug!("Uploaded {} ({} bytes)", name, contents.len());
        Ok(())
    }

    fn finish(&mut self, summary: &Record, exit_code: i32) -> PlrResult<()> {
        let summary_json = serde_json::to_string(summary)?;
        let mut payload = file_stream_payload(SUMMARY_FILE, 0, &[summary_json.clone()]);
        payload["complete"] = json!(true);
        payload["exitcode"] = json!(exit_code);
        self.post_file_stream(&payload)?;

        if let Some(dir) = &self.local_dir {
            fs::write(dir.join("summary.json"), summary_json)?;
        }

        let remote = self.remote()?;
        info!("Run {} finished with exit code {}", remote.name, exit_code);
        Ok(())
    }

    fn run_dir(&self) -> Option<&Path> {
        self.local_dir.as_deref()
    }
}

fn check_status(url: &str, response: Response) -> PlrResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TrackingError::Authentication {
            message: format!("{} returned {}", url, status),
        }
        .into());
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(TrackingError::RequestFailed {
            endpoint: url.to_string(),
            message: format!("HTTP error {}: {}", status, body.trim()),
        }
        .into());
    }
    Ok(response)
}

/// Pull `data` out of a GraphQL response, surfacing the first error.
fn graphql_data(endpoint: &str, body: Value) -> PlrResult<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let message = first
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown GraphQL error")
                .to_string();
            return Err(TrackingError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message,
            }
            .into());
        }
    }

    match body.get("data") {
        Some(data) if !data.is_null() => Ok(data.clone()),
        _ => Err(TrackingError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: "response has no data".to_string(),
        }
        .into()),
    }
}

fn viewer_entity(data: &Value) -> PlrResult<String> {
    let viewer = data.get("viewer").filter(|v| !v.is_null()).ok_or_else(|| {
        TrackingError::Authentication {
            message: "API key was not accepted".to_string(),
        }
    })?;

    viewer
        .get("entity")
        .and_then(Value::as_str)
        .or_else(|| viewer.get("username").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| {
            TrackingError::Authentication {
                message: "viewer has no default entity".to_string(),
            }
            .into()
        })
}

fn parse_bucket(endpoint: &str, data: &Value, project: &str, entity: &str) -> PlrResult<RemoteRun> {
    let bucket = &data["upsertBucket"]["bucket"];
    let name = bucket["name"].as_str().ok_or_else(|| TrackingError::InvalidResponse {
        endpoint: endpoint.to_string(),
        message: "upsertBucket returned no run".to_string(),
    })?;

    Ok(RemoteRun {
        storage_id: bucket["id"].as_str().unwrap_or_default().to_string(),
        name: name.to_string(),
        project: bucket["project"]["name"]
            .as_str()
            .unwrap_or(project)
            .to_string(),
        entity: bucket["project"]["entity"]["name"]
            .as_str()
            .unwrap_or(entity)
            .to_string(),
    })
}

fn upload_url_for(data: &Value, name: &str) -> Option<String> {
    data["createRunFiles"]["files"]
        .as_array()?
        .iter()
        .find(|f| f["name"].as_str() == Some(name))
        .and_then(|f| f["uploadUrl"].as_str())
        .map(str::to_string)
}

/// The service stores config entries as `{key: {"value": v, "desc": null}}`.
fn service_config(config: &Value) -> Value {
    match config {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json!({ "value": v, "desc": null })))
                .collect(),
        ),
        other => json!({ "value": { "value": other, "desc": null } }),
    }
}

fn file_stream_payload(file: &str, offset: usize, lines: &[String]) -> Value {
    json!({
        "files": {
            file: {
                "offset": offset,
                "content": lines,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{Run, RunInit};
    use crate::settings::TrackingMode;
    use crate::snapshot::default_include;
    use plr_types::testing::{RecordedRequest, StubResponse, StubServer};
    use plr_types::PlrError;

    fn stub_settings(server: &StubServer) -> TrackingSettings {
        let mut settings = TrackingSettings::default()
            .with_mode(TrackingMode::Online)
            .with_api_key("test-key");
        settings.base_url = server.base_url().to_string();
        settings
    }

    /// Minimal stand-in for the tracking service
    fn service(base: &str, request: &RecordedRequest) -> StubResponse {
        let body = request.body_text();
        let variables = request.json()["variables"].clone();
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/graphql") if body.contains("upsertBucket") => StubResponse::json(
                200,
                json!({"data": {"upsertBucket": {"bucket": {
                    "id": "UnVuOjE=",
                    "name": variables["name"],
                    "displayName": variables["displayName"],
                    "project": {"name": variables["project"], "entity": {"name": "lab"}}
                }}}}),
            ),
            ("POST", "/graphql") if body.contains("createRunFiles") => {
                let files: Vec<Value> = variables["files"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|name| json!({"name": name, "uploadUrl": format!("{base}/upload/{name}")}))
                    .collect();
                StubResponse::json(
                    200,
                    json!({"data": {"createRunFiles": {"runID": "UnVuOjE=", "files": files}}}),
                )
            }
            ("POST", "/graphql") if body.contains("viewer") => StubResponse::json(
                200,
                json!({"data": {"viewer": {"id": "1", "entity": "lab", "username": "someone"}}}),
            ),
            ("POST", path) if path.ends_with("/file_stream") => {
                StubResponse::json(200, json!({"exitcode": null, "limits": {}}))
            }
            ("PUT", path) if path.starts_with("/upload/") => StubResponse::bytes(200, ""),
            _ => StubResponse::bytes(404, "not found"),
        }
    }

    #[test]
    fn config_is_wrapped_per_key() {
        let wrapped = service_config(&json!({"lr": 0.01, "epochs": 2}));
        assert_eq!(wrapped["lr"]["value"], 0.01);
        assert_eq!(wrapped["epochs"]["value"], 2);
        assert!(wrapped["epochs"]["desc"].is_null());
    }

    #[test]
    fn file_stream_payload_shape() {
        let payload = file_stream_payload(HISTORY_FILE, 3, &["{\"_step\":3}".to_string()]);
        assert_eq!(payload["files"][HISTORY_FILE]["offset"], 3);
        assert_eq!(payload["files"][HISTORY_FILE]["content"][0], "{\"_step\":3}");
    }

    #[test]
    fn graphql_errors_surface() {
        let body = json!({"errors": [{"message": "permission denied"}], "data": null});
        let err = graphql_data("http://x/graphql", body).unwrap_err();
        assert!(err.to_string().contains("permission denied"));

        let ok = graphql_data("http://x/graphql", json!({"data": {"viewer": {"entity": "lab"}}}))
            .unwrap();
        assert_eq!(viewer_entity(&ok).unwrap(), "lab");
    }

    #[test]
    fn null_viewer_is_an_auth_failure() {
        let err = viewer_entity(&json!({"viewer": null})).unwrap_err();
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[test]
    fn bucket_and_upload_url_parsing() {
        let data = json!({
            "upsertBucket": {"bucket": {
                "id": "UnVuOjE=",
                "name": "abcd1234",
                "project": {"name": "plr-project", "entity": {"name": "lab"}}
            }}
        });
        let run = parse_bucket("e", &data, "fallback", "fallback").unwrap();
        assert_eq!(run.name, "abcd1234");
        assert_eq!(run.entity, "lab");
        assert_eq!(run.storage_id, "UnVuOjE=");

        let files = json!({"createRunFiles": {"files": [
            {"name": "code/a.rs", "uploadUrl": "https://storage/a"}
        ]}});
        assert_eq!(upload_url_for(&files, "code/a.rs").as_deref(), Some("https://storage/a"));
        assert_eq!(upload_url_for(&files, "code/b.rs"), None);
    }

    #[test]
    fn login_without_key_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let err = WandbBackend::login(&TrackingSettings::default(), dir.path()).unwrap_err();
        assert!(err.to_string().contains("No API key"));
    }

    #[test]
    fn rejected_key_is_an_authentication_error() {
        let server =
            StubServer::start(|_, _| StubResponse::json(401, json!({"error": "invalid api key"})))
                .unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = WandbBackend::login(&stub_settings(&server), dir.path()).unwrap_err();
        assert!(
            matches!(err, PlrError::Tracking(TrackingError::Authentication { .. })),
            "{err}"
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/graphql");
    }

    #[test]
    fn server_error_is_a_request_failure() {
        let server = StubServer::start(|_, _| StubResponse::bytes(500, "boom")).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = WandbBackend::login(&stub_settings(&server), dir.path()).unwrap_err();
        match err {
            PlrError::Tracking(TrackingError::RequestFailed { message, .. }) => {
                assert!(message.contains("500"));
                assert!(message.contains("boom"));
            }
            other => panic!("expected RequestFailed, got {other:?}"),
        }
    }

    #[test]
    fn login_resolves_entity_from_viewer() {
        let server = StubServer::start(service).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let backend = WandbBackend::login(&stub_settings(&server), dir.path()).unwrap();
        assert_eq!(backend.entity, "lab");

        let mut settings = stub_settings(&server);
        settings.entity = Some("team".to_string());
        let backend = WandbBackend::login(&settings, dir.path()).unwrap();
        assert_eq!(backend.entity, "team");
    }

    #[test]
    fn run_streams_history_code_and_summary() {
        let server = StubServer::start(service).unwrap();
        let results = tempfile::tempdir().unwrap();
        let backend = WandbBackend::login(&stub_settings(&server), results.path()).unwrap();
        let mut run = Run::init(
            Box::new(backend),
            RunInit::new("plr-project", json!({"lr": 0.01})),
        )
        .unwrap();

        run.log(json!({"train_loss": 0.5})).unwrap();
        run.log(json!({"test_loss": 0.4})).unwrap();

        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("main.rs"), "fn main() {}").unwrap();
        assert_eq!(run.log_code("source_files", source.path(), default_include).unwrap(), 1);
        run.finish().unwrap();

        let requests = server.requests();
        let upsert = requests
            .iter()
            .find(|r| r.body_text().contains("upsertBucket"))
            .unwrap()
            .json();
        assert_eq!(upsert["variables"]["name"], run.id());
        assert_eq!(
            upsert["variables"]["config"].as_str().map(|c| c.contains("\"value\":0.01")),
            Some(true)
        );

        let stream_path = format!("/files/lab/plr-project/{}/file_stream", run.id());
        let streamed: Vec<&RecordedRequest> = requests
            .iter()
            .filter(|r| r.path.ends_with("/file_stream"))
            .collect();
        assert!(streamed.iter().all(|r| r.path == stream_path));

        // one history row per request, offsets counting up from zero
        let history: Vec<Value> = streamed
            .iter()
            .map(|r| r.json())
            .filter(|p| p["files"][HISTORY_FILE].is_object())
            .collect();
        assert_eq!(history.len(), 2);
        for (i, payload) in history.iter().enumerate() {
            let file = &payload["files"][HISTORY_FILE];
            assert_eq!(file["offset"], i);
            let row: Value = serde_json::from_str(file["content"][0].as_str().unwrap()).unwrap();
            assert_eq!(row["_step"], i);
        }

        let upload = requests.iter().find(|r| r.method == "PUT").unwrap();
        assert_eq!(upload.path, "/upload/code/source_files/main.rs");
        assert_eq!(upload.body_text(), "fn main() {}");
        assert!(run
            .local_path("files/code/source_files/main.rs")
            .unwrap()
            .is_file());

        let last = requests.last().unwrap().json();
        assert_eq!(last["complete"], true);
        assert_eq!(last["exitcode"], 0);
        let summary: Value =
            serde_json::from_str(last["files"][SUMMARY_FILE]["content"][0].as_str().unwrap())
                .unwrap();
        assert_eq!(summary["test_loss"], 0.4);
        assert_eq!(summary["train_loss"], 0.5);
    }

    #[test]
    fn rejected_history_write_surfaces() {
        let server = StubServer::start(|base, request| {
            if request.path.ends_with("/file_stream") {
                StubResponse::json(403, json!({"error": "forbidden"}))
            } else {
                service(base, request)
            }
        })
        .unwrap();
        let results = tempfile::tempdir().unwrap();
        let backend = WandbBackend::login(&stub_settings(&server), results.path()).unwrap();
        let mut run = Run::init(Box::new(backend), RunInit::new("plr-project", json!({}))).unwrap();

        let err = run.log(json!({"loss": 1.0})).unwrap_err();
        assert!(
            matches!(err, PlrError::Tracking(TrackingError::Authentication { .. })),
            "{err}"
        );
        assert_eq!(run.step(), 0);
    }
}
