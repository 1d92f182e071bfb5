use crate::http::{classify, read_body};
use crate::ClientError;
use serde_json::{json, Value};
use std::path::Path;

const SERVICE: &str = "nomad";

/// Every call names the cluster's API address (`http://host:port`).
pub trait NomadClient: Send + Sync {
    /// Number of client nodes that are ready and eligible for scheduling.
    fn ready_nodes(&self, address: &str) -> Result<usize, ClientError>;

    /// Parse and register the job in `path`. Returns the job id.
    fn apply_job(&self, address: &str, path: &Path) -> Result<String, ClientError>;

    /// Deregister and purge a job.
    fn stop_job(&self, address: &str, job_id: &str) -> Result<(), ClientError>;

    /// True when every task group of the job has a running allocation.
    fn job_running(&self, address: &str, job_id: &str) -> Result<bool, ClientError>;
}

pub struct NomadHttp {
    agent: ureq::Agent,
}

impl Default for NomadHttp {
    fn default() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl NomadHttp {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, url: &str) -> Result<Value, ClientError> {
        let resp = self.agent.get(url).call().map_err(|e| classify(SERVICE, url, e))?;
        Ok(serde_json::from_str(&read_body(resp)?)?)
    }

    fn post(&self, url: &str, body: &Value) -> Result<Value, ClientError> {
        let payload = serde_json::to_vec(body)?;
        let resp = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .send(&payload[..])
            .map_err(|e| classify(SERVICE, url, e))?;
        Ok(serde_json::from_str(&read_body(resp)?)?)
    }
}

fn count_ready(nodes: &Value) -> usize {
    nodes.as_array().map_or(0, |list| {
        list.iter()
            .filter(|n| n["Status"] == "ready" && n["SchedulingEligibility"] == "eligible")
            .count()
    })
}

fn summary_running(summary: &Value) -> bool {
    summary["Summary"].as_object().is_some_and(|groups| {
        !groups.is_empty()
            && groups
                .values()
                .all(|g| g["Running"].as_u64().unwrap_or(0) > 0)
    })
}

impl NomadClient for NomadHttp {
    fn ready_nodes(&self, address: &str) -> Result<usize, ClientError> {
        Ok(count_ready(&self.get(&format!("{address}/v1/nodes"))?))
    }

    fn apply_job(&self, address: &str, path: &Path) -> Result<String, ClientError> {
        let hcl = std::fs::read_to_string(path)?;
        let job = self.post(
            &format!("{address}/v1/jobs/parse"),
            &json!({ "JobHCL": hcl, "Canonicalize": true }),
        )?;
        let id = job["ID"]
            .as_str()
            .ok_or_else(|| ClientError::InvalidArgument(format!("{}: job has no ID", path.display())))?
            .to_owned();
        self.post(&format!("{address}/v1/jobs"), &json!({ "Job": job }))?;
        tracing::debug!(job = %id, "registered nomad job");
        Ok(id)
    }

    fn stop_job(&self, address: &str, job_id: &str) -> Result<(), ClientError> {
        let url = format!("{address}/v1/job/{job_id}?purge=true");
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| classify(SERVICE, &url, e))?;
        Ok(())
    }

    fn job_running(&self, address: &str, job_id: &str) -> Result<bool, ClientError> {
        Ok(summary_running(&self.get(&format!("{address}/v1/job/{job_id}/summary"))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_ready_eligible_nodes() {
        let nodes = json!([
            {"Status": "ready", "SchedulingEligibility": "eligible"},
            {"Status": "ready", "SchedulingEligibility": "ineligible"},
            {"Status": "initializing", "SchedulingEligibility": "eligible"},
            {"Status": "ready", "SchedulingEligibility": "eligible"}
        ]);
        assert_eq!(count_ready(&nodes), 2);
        assert_eq!(count_ready(&json!({})), 0);
    }

    #[test]
    fn job_running_needs_every_group() {
        assert!(summary_running(&json!({"Summary": {"web": {"Running": 2}, "db": {"Running": 1}}})));
        assert!(!summary_running(&json!({"Summary": {"web": {"Running": 2}, "db": {"Running": 0}}})));
        assert!(!summary_running(&json!({"Summary": {}})));
    }
}
