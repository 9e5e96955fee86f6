//! Where job specifications come from.
//!
//! [`JobSource`] is the seam the pipeline depends on; [`NomadClient`] talks to
//! a Nomad-compatible HTTP API with blocking `ureq` calls.

use serde::Deserialize;
use serde_json::{json, Value};

use jobledger_core::{JobSpecification, NomadConfig};

use crate::error::SourceError;
use crate::http;

/// Read access to the orchestrator.
pub trait JobSource {
    /// Fail when the orchestrator cannot be reached at all.
    fn check(&self) -> Result<(), SourceError>;

    /// Current specification of one job. `SourceError::NotFound` when absent.
    fn fetch_job_spec(&self, namespace: &str, name: &str)
        -> Result<JobSpecification, SourceError>;
}

/// Blocking Nomad HTTP API client.
pub struct NomadClient {
    agent: ureq::Agent,
    address: String,
    region: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterResponse {
    #[serde(rename = "EvalID", default)]
    eval_id: String,
}

impl NomadClient {
    pub fn new(config: &NomadConfig) -> Self {
        Self {
            agent: http::agent(config.timeout_secs),
            address: config.address.trim_end_matches('/').to_string(),
            region: config.region.clone().filter(|r| !r.is_empty()),
            token: config.resolve_token(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Region requested from the orchestrator, if one is configured.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Submit a stored document as the job's new version.
    ///
    /// The document is parsed server-side, then registered. Returns the
    /// evaluation id of the registration.
    pub fn register_document(&self, namespace: &str, document: &str) -> Result<String, SourceError> {
        let job: Value = self.send(
            self.request("POST", "/v1/jobs/parse", Some(namespace)),
            Some(&json!({ "JobHCL": document, "Canonicalize": true })),
        )?;

        let response: RegisterResponse = self.send(
            self.request("POST", "/v1/jobs", Some(namespace)),
            Some(&json!({ "Job": job })),
        )?;
        tracing::info!("registered job in {}, evaluation {}", namespace, response.eval_id);
        Ok(response.eval_id)
    }

    /// Request for `path`, authenticated, scoped to `namespace` and the
    /// configured region when a namespace is given.
    fn request(&self, method: &str, path: &str, namespace: Option<&str>) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &format!("{}{}", self.address, path));
        if let Some(namespace) = namespace {
            request = request.query("namespace", namespace);
            if let Some(region) = &self.region {
                request = request.query("region", region);
            }
        }
        if let Some(token) = &self.token {
            request = request.set("X-Nomad-Token", token);
        }
        request
    }

    fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: ureq::Request,
        body: Option<&Value>,
    ) -> Result<T, SourceError> {
        let url = request.url().to_string();
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                return Err(SourceError::Http {
                    status,
                    url,
                    body: http::error_body(response),
                })
            }
            Err(e) => {
                return Err(SourceError::Unreachable {
                    address: self.address.clone(),
                    message: e.to_string(),
                })
            }
        };
        response.into_json::<T>().map_err(|e| SourceError::Decode {
            url,
            message: e.to_string(),
        })
    }
}

impl JobSource for NomadClient {
    fn check(&self) -> Result<(), SourceError> {
        let leader: Value = self.send(self.request("GET", "/v1/status/leader", None), None)?;
        tracing::debug!("orchestrator leader: {}", leader);
        Ok(())
    }

    fn fetch_job_spec(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<JobSpecification, SourceError> {
        let path = format!("/v1/job/{}", http::encode_segment(name));
        match self.send(self.request("GET", &path, Some(namespace)), None) {
            Err(SourceError::Http { status: 404, .. }) => Err(SourceError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            other => other,
        }
    }
}
