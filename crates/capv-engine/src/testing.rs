//! Scripted command runner standing in for kind, clusterctl and kubectl

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capv_common::command::KUBECONFIG_ENV;
use capv_common::{
    event_bus, ClusterDir, CommandInvocation, CommandOutput, CommandRunner, Error as CommonError,
    EventReceiver, LogSink, ProvisioningSpec,
};
use parking_lot::Mutex;

use crate::config::PipelineConfig;
use crate::phases::PROVIDER_DEPLOYMENTS;
use crate::pipeline::PhaseContext;

/// base64 of the kubeconfig stored in the `<name>-kubeconfig` secret
pub(crate) const PERMANENT_KUBECONFIG_B64: &str =
    "YXBpVmVyc2lvbjogdjEKa2luZDogQ29uZmlnCmN1cnJlbnQtY29udGV4dDogcGVybWFuZW50Cg==";
pub(crate) const PERMANENT_KUBECONFIG_TEXT: &str =
    "apiVersion: v1\nkind: Config\ncurrent-context: permanent\n";

struct Script {
    prefix: String,
    kubeconfig: Option<PathBuf>,
    output: CommandOutput,
}

#[derive(Default)]
struct State {
    scripts: Vec<Script>,
    missing: Vec<String>,
    invocations: Vec<CommandInvocation>,
}

/// Matches command lines by prefix. Later scripts win; anything unscripted
/// succeeds with no output.
#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self, prefix: &str, kubeconfig: Option<&Path>, output: CommandOutput) {
        self.state.lock().scripts.push(Script {
            prefix: prefix.to_string(),
            kubeconfig: kubeconfig.map(Path::to_path_buf),
            output,
        });
    }

    pub(crate) fn respond(&self, prefix: &str, stdout: &str) {
        self.script(prefix, None, ok(stdout));
    }

    /// Only when `KUBECONFIG` points at `kubeconfig`
    pub(crate) fn respond_on(&self, kubeconfig: &Path, prefix: &str, stdout: &str) {
        self.script(prefix, Some(kubeconfig), ok(stdout));
    }

    pub(crate) fn fail(&self, prefix: &str, stderr: &str) {
        self.script(
            prefix,
            None,
            CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                status: Some(1),
            },
        );
    }

    /// `program` is not on `$PATH`
    pub(crate) fn missing(&self, program: &str) {
        self.state.lock().missing.push(program.to_string());
    }

    pub(crate) fn invocations(&self) -> Vec<CommandInvocation> {
        self.state.lock().invocations.clone()
    }

    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.invocations().iter().map(|i| i.command_line()).collect()
    }

    /// Every read the pipeline makes answers as a healthy run would
    pub(crate) fn healthy(dir: &ClusterDir, spec: &ProvisioningSpec) -> Self {
        let cluster = Self::new();
        let machines = spec.total_machines();
        let bootstrap = dir.bootstrap_kubeconfig();
        let permanent = dir.permanent_kubeconfig();

        cluster.respond("kind get kubeconfig", "apiVersion: v1\nkind: Config\ncurrent-context: kind\n");
        cluster.respond_on(&bootstrap, "kubectl get nodes", &node_table(1));
        cluster.respond_on(&permanent, "kubectl get nodes", &node_table(machines));
        cluster.respond("kubectl get deployments", &providers_json());
        cluster.respond(
            "clusterctl config cluster",
            "apiVersion: cluster.x-k8s.io/v1alpha3\nkind: Cluster\n",
        );
        cluster.respond("kubectl kustomize", "apiVersion: cluster.x-k8s.io/v1alpha3\nkind: Cluster\n# kustomized\n");
        cluster.respond("kubectl get machine", &machine_table(machines));
        cluster.respond("kubectl --namespace=default --output=json get secret", &kubeconfig_secret(spec));
        cluster.respond(
            "kubectl get kubeadmcontrolplane",
            r#"{"items":[{"metadata":{"name":"cp"},"status":{"ready":true,"initialized":true}}]}"#,
        );
        cluster
    }
}

#[async_trait]
impl CommandRunner for FakeCluster {
    fn exists(&self, invocation: &CommandInvocation) -> bool {
        !self.state.lock().missing.contains(&invocation.program)
    }

    async fn execute(&self, invocation: &CommandInvocation) -> capv_common::Result<CommandOutput> {
        let mut state = self.state.lock();
        state.invocations.push(invocation.clone());
        if state.missing.contains(&invocation.program) {
            return Err(CommonError::ToolNotFound {
                name: invocation.program.clone(),
            });
        }

        let line = invocation.command_line();
        let kubeconfig = invocation.env.get(KUBECONFIG_ENV).map(PathBuf::from);
        let script = state.scripts.iter().rev().find(|s| {
            line.starts_with(&s.prefix)
                && s.kubeconfig
                    .as_ref()
                    .map_or(true, |want| kubeconfig.as_ref() == Some(want))
        });
        Ok(script.map(|s| s.output.clone()).unwrap_or_else(|| ok("")))
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        status: Some(0),
    }
}

fn node_table(count: usize) -> String {
    let mut table = String::from("NAME     STATUS   ROLES    AGE   VERSION\n");
    for i in 0..count {
        table.push_str(&format!("node-{}   Ready    <none>   1m    v1.17.3\n", i));
    }
    table
}

fn machine_table(count: usize) -> String {
    let mut table = String::from("NAME     PROVIDERID                PHASE\n");
    for i in 0..count {
        table.push_str(&format!("machine-{}   vsphere://4201-{}   Running\n", i, i));
    }
    table
}

fn providers_json() -> String {
    let items: Vec<_> = PROVIDER_DEPLOYMENTS
        .iter()
        .map(|name| {
            serde_json::json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": name},
                "spec": {"replicas": 1, "selector": {}, "template": {}},
                "status": {"availableReplicas": 1},
            })
        })
        .collect();
    serde_json::json!({ "apiVersion": "v1", "kind": "List", "items": items }).to_string()
}

fn kubeconfig_secret(spec: &ProvisioningSpec) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": format!("{}-kubeconfig", spec.cluster_name), "namespace": "default"},
        "data": {"value": PERMANENT_KUBECONFIG_B64},
    })
    .to_string()
}

/// Test config: millisecond polling, short readiness timeouts
pub(crate) fn test_config(base: &Path) -> PipelineConfig {
    PipelineConfig::new(base)
        .with_poll_interval(Duration::from_millis(5))
        .with_readiness_timeout(Duration::from_secs(2))
}

pub(crate) fn context(base: &Path, cluster: FakeCluster, spec: ProvisioningSpec) -> (PhaseContext, EventReceiver) {
    let (events, rx) = event_bus();
    let ctx = PhaseContext::new(
        Arc::new(spec),
        Arc::new(cluster),
        LogSink::discard(),
        events,
        test_config(base),
    );
    (ctx, rx)
}
