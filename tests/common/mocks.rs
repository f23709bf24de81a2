// In-memory stand-ins for the remote collaborators of a run

use failover_tester::client::{ApiRequest, ControlPlane, DataExchange, InjectionSummary, PortTarget};
use failover_tester::remote::{CommandOutput, RemoteExecutor};
use failover_tester::{DataFormat, FailoverError, Record, Result, Site};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Control Plane
// ============================================================================

#[derive(Debug, Clone)]
struct JobState {
    state: String,
    health: String,
}

/// Stateful control plane of one site.
///
/// Understands instance and job lookups plus job cancel, pause and failover
/// trigger. Canned routes (`METHOD path`) take precedence; anything else is
/// a 404.
#[derive(Default)]
pub struct MockControlPlane {
    instance_status: Mutex<String>,
    jobs: Mutex<HashMap<String, JobState>>,
    routes: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
    /// Site that takes over when a job here is cancelled or failed over.
    standby: Mutex<Option<Arc<MockControlPlane>>>,
}

impl MockControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            instance_status: Mutex::new("running".to_string()),
            ..Self::default()
        })
    }

    /// Site running `job_id` healthy.
    pub fn running(job_id: &str) -> Arc<Self> {
        let site = Self::new();
        site.set_job(job_id, "running", "healthy");
        site
    }

    /// Site holding `job_id` as a passive standby.
    pub fn standby(job_id: &str) -> Arc<Self> {
        let site = Self::new();
        site.set_job(job_id, "submitted", "unknown");
        site
    }

    pub fn set_job(&self, job_id: &str, state: &str, health: &str) {
        self.jobs.lock().insert(
            job_id.to_string(),
            JobState {
                state: state.to_string(),
                health: health.to_string(),
            },
        );
    }

    pub fn remove_job(&self, job_id: &str) {
        self.jobs.lock().remove(job_id);
    }

    pub fn set_instance_status(&self, status: &str) {
        *self.instance_status.lock() = status.to_string();
    }

    /// Promote `standby` whenever a job here is cancelled or failed over.
    pub fn fail_over_to(&self, standby: Arc<MockControlPlane>) {
        *self.standby.lock() = Some(standby);
    }

    pub fn route(&self, key: &str, reply: Value) {
        self.routes.lock().insert(key.to_string(), reply);
    }

    /// Make `METHOD path` answer with a 500.
    pub fn fail(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.starts_with(prefix)).count()
    }

    fn promote(&self, job_id: &str) {
        if let Some(standby) = self.standby.lock().as_ref() {
            standby.set_job(job_id, "running", "healthy");
        }
    }

    fn job_reply(&self, job_id: &str, path: &str) -> Result<Value> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| FailoverError::NotFound(format!("Resource not found: {}", path)))?;
        Ok(json!({
            "id": job_id,
            "name": format!("app::{}", job_id),
            "state": job.state,
            "health": job.health,
            "peCount": 2,
        }))
    }

    fn handle(&self, method: &str, path: &str) -> Result<Value> {
        let segments: Vec<&str> = path.split('/').collect();
        match (method, segments.as_slice()) {
            ("GET", ["instances"]) => Ok(json!({"instances": [{"id": "instance-a", "status": *self.instance_status.lock()}]})),
            ("GET", ["instances", instance]) => Ok(json!({
                "id": instance,
                "status": *self.instance_status.lock(),
                "health": "healthy",
            })),
            ("GET", ["instances", _, "jobs", job]) => self.job_reply(job, path),
            ("DELETE", ["instances", _, "jobs", job]) => {
                if self.jobs.lock().remove(*job).is_none() {
                    return Err(FailoverError::NotFound(format!("Resource not found: {}", path)));
                }
                self.promote(job);
                Ok(json!({}))
            }
            ("PUT", ["instances", _, "jobs", job, "pause"]) => {
                match self.jobs.lock().get_mut(*job) {
                    Some(state) => state.state = "paused".to_string(),
                    None => return Err(FailoverError::NotFound(format!("Resource not found: {}", path))),
                }
                Ok(json!({}))
            }
            ("POST", ["instances", _, "jobs", job, "failover", "trigger"]) => {
                self.job_reply(job, path)?;
                self.set_job(job, "canceled", "unhealthy");
                self.promote(job);
                Ok(json!({"accepted": true}))
            }
            _ => Err(FailoverError::NotFound(format!("Resource not found: {}", path))),
        }
    }
}

#[async_trait::async_trait]
impl ControlPlane for MockControlPlane {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let method = request.method.to_string();
        let key = format!("{} {}", method, request.path);
        self.requests.lock().push(key.clone());

        if self.failing.lock().contains(&key) {
            return Err(FailoverError::Api {
                status: 500,
                message: format!("{} failed", key),
            });
        }
        if let Some(reply) = self.routes.lock().get(&key) {
            return Ok(reply.clone());
        }
        self.handle(&method, &request.path)
    }
}

// ============================================================================
// Data Exchange
// ============================================================================

/// Data exchange that echoes injected records back.
#[derive(Default)]
pub struct LoopbackExchange {
    stored: Mutex<Vec<Record>>,
    dropped: Mutex<usize>,
    reversed: Mutex<bool>,
    fail_inject: Mutex<bool>,
    calls: Mutex<Vec<(String, Site, usize)>>,
}

impl LoopbackExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lose the first `count` injected records on the way through.
    pub fn drop_first(&self, count: usize) {
        *self.dropped.lock() = count;
    }

    /// Return records in reverse injection order.
    pub fn reverse_output(&self) {
        *self.reversed.lock() = true;
    }

    pub fn fail_inject(&self) {
        *self.fail_inject.lock() = true;
    }

    pub fn injected_count(&self) -> usize {
        self.stored.lock().len()
    }

    /// `(operation, site, record count)` per call.
    pub fn calls(&self) -> Vec<(String, Site, usize)> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl DataExchange for LoopbackExchange {
    async fn inject(
        &self,
        _target: &PortTarget,
        records: &[Record],
        site: Site,
        _format: DataFormat,
    ) -> Result<InjectionSummary> {
        self.calls.lock().push(("inject".to_string(), site, records.len()));
        if *self.fail_inject.lock() {
            return Err(FailoverError::DataExchange("input port rejected the batch".to_string()));
        }
        self.stored.lock().extend(records.iter().cloned());
        Ok(InjectionSummary {
            count: records.len(),
            batches: 1,
        })
    }

    async fn retrieve(
        &self,
        _target: &PortTarget,
        site: Site,
        _format: DataFormat,
        max_records: usize,
        _timeout: Duration,
    ) -> Result<Vec<Record>> {
        let dropped = *self.dropped.lock();
        let mut out: Vec<Record> = self.stored.lock().iter().skip(dropped).cloned().collect();
        if *self.reversed.lock() {
            out.reverse();
        }
        out.truncate(max_records);
        self.calls.lock().push(("retrieve".to_string(), site, out.len()));
        Ok(out)
    }
}

// ============================================================================
// Remote Executor
// ============================================================================

/// Replies by command prefix; unmatched commands succeed silently.
#[derive(Default)]
pub struct ScriptedExecutor {
    replies: Mutex<Vec<(String, CommandOutput)>>,
    log: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, prefix: &str, stdout: &str, exit_code: i32) {
        let stderr = if exit_code == 0 { "" } else { "command failed" };
        self.replies
            .lock()
            .push((prefix.to_string(), CommandOutput::new(stdout, stderr, exit_code)));
    }

    /// `host: command` lines in execution order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.log.lock().iter().any(|line| line.contains(fragment))
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput> {
        self.log.lock().push(format!("{}: {}", host, command));
        Ok(self
            .replies
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}
