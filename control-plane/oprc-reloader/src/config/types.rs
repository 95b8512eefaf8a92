use std::time::Duration;

use envconfig::Envconfig;
use tracing::warn;

use crate::fetch::FetchOptions;
use crate::workload::WorkloadKind;

#[derive(Envconfig, Clone, Debug)]
pub struct ReloaderConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict every watch to one namespace. Unset watches cluster-wide.
    /// Env: OPRC_RELOADER_NAMESPACE
    #[envconfig(from = "OPRC_RELOADER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Comma separated workload kinds to run a controller for.
    /// Env: OPRC_RELOADER_KINDS
    #[envconfig(
        from = "OPRC_RELOADER_KINDS",
        default = "deployment,statefulset,daemonset"
    )]
    pub kinds: String,

    /// Mount the mutating admission route on the HTTP server.
    /// Env: OPRC_RELOADER_WEBHOOK_ENABLED
    #[envconfig(from = "OPRC_RELOADER_WEBHOOK_ENABLED", default = "true")]
    pub webhook_enabled: bool,

    #[envconfig(nested)]
    pub fetch: FetchConfig,

    #[envconfig(nested)]
    pub requeue: RequeueConfig,

    /// Parallel reconciles per workload kind; 0 means unbounded.
    /// Env: OPRC_RELOADER_RECONCILE_CONCURRENCY
    #[envconfig(from = "OPRC_RELOADER_RECONCILE_CONCURRENCY", default = "4")]
    pub reconcile_concurrency: u16,
}

#[derive(Envconfig, Clone, Debug)]
pub struct FetchConfig {
    /// Deadline for one child fetch fan-out.
    /// Env: OPRC_RELOADER_FETCH_TIMEOUT_SECS
    #[envconfig(from = "OPRC_RELOADER_FETCH_TIMEOUT_SECS", default = "10")]
    pub timeout_secs: u64,

    /// Max in-flight source gets per fetch.
    /// Env: OPRC_RELOADER_FETCH_CONCURRENCY
    #[envconfig(from = "OPRC_RELOADER_FETCH_CONCURRENCY", default = "8")]
    pub concurrency: usize,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RequeueConfig {
    #[envconfig(from = "OPRC_RELOADER_CONFLICT_REQUEUE_SECS", default = "1")]
    pub conflict_secs: u64,
    #[envconfig(from = "OPRC_RELOADER_MIGRATION_RETRY_SECS", default = "30")]
    pub migration_secs: u64,
    /// Delay used by the controller error policy for transport failures.
    #[envconfig(from = "OPRC_RELOADER_ERROR_REQUEUE_SECS", default = "15")]
    pub error_secs: u64,
}

impl Default for ReloaderConfig {
    fn default() -> Self {
        Self {
            http_port: 8088,
            namespace: None,
            kinds: "deployment,statefulset,daemonset".into(),
            webhook_enabled: true,
            fetch: FetchConfig {
                timeout_secs: 10,
                concurrency: 8,
            },
            requeue: RequeueConfig {
                conflict_secs: 1,
                migration_secs: 30,
                error_secs: 15,
            },
            reconcile_concurrency: 4,
        }
    }
}

impl ReloaderConfig {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            concurrency: self.fetch.concurrency.max(1),
            timeout: Duration::from_secs(self.fetch.timeout_secs),
        }
    }

    /// Parsed, de-duplicated kinds. Unknown entries are logged and dropped.
    pub fn enabled_kinds(&self) -> Vec<WorkloadKind> {
        let mut out = Vec::new();
        for entry in self.kinds.split(',').filter(|s| !s.trim().is_empty()) {
            match WorkloadKind::parse(entry) {
                Some(kind) if !out.contains(&kind) => out.push(kind),
                Some(_) => {}
                None => warn!(%entry, "unknown workload kind in OPRC_RELOADER_KINDS; ignored"),
            }
        }
        out
    }

    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_secs(self.requeue.conflict_secs)
    }

    pub fn migration_requeue(&self) -> Duration {
        Duration::from_secs(self.requeue.migration_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.requeue.error_secs)
    }
}
