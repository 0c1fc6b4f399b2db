use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use iotctl_aws::{schema, AwsSettings, IotDirectory};
use iotctl_core::wait::{self, WaitConfig};
use iotctl_core::{
    AttachmentTarget, CancelReason, EndpointType, IotRegistry, PolicyAttachment, PolicyDirectory, PolicyReference,
    ReconcileError, Reconciler, ReconcilerConfig, Resource, MAX_PAGE_SIZE,
};

mod config;
use config::{DesiredAttachment, Stack};

#[derive(Parser, Debug)]
#[command(author, version, about = "iotctl: AWS IoT policy attachment reconciler")]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Output directory for `render`
    #[arg(short, long, default_value="out", global = true)]
    out: PathBuf,

    #[arg(long, global = true)]
    region: Option<String>,

    #[arg(long, global = true)]
    profile: Option<String>,

    /// Override the IoT API endpoint (e.g. a local emulator)
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// Entries per ListAttachedPolicies page (1-250)
    #[arg(long, global = true)]
    page_size: Option<u32>,

    /// Deadline for each reconciler call, in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Write main.tf.json for the resources in --file
    Render,
    #[command(flatten)]
    Remote(RemoteCmd),
}

/// Commands that talk to the IoT API.
#[derive(Subcommand, Debug)]
enum RemoteCmd {
    /// List policies directly attached to a target
    List { #[arg(long)] target: AttachmentTarget },
    /// Report whether each policy is attached
    Find {
        #[arg(long)] target: AttachmentTarget,
        #[arg(long = "policy", required = true)] policies: Vec<PolicyReference>,
    },
    Attach {
        #[arg(long)] target: AttachmentTarget,
        #[arg(long)] policy: PolicyReference,
    },
    Detach {
        #[arg(long)] target: AttachmentTarget,
        #[arg(long)] policy: PolicyReference,
    },
    /// Show what `apply` would change for the attachments in --file
    Plan,
    Apply,
    /// Read an existing attachment by `<policy>|<target>`
    Import { #[arg(long)] id: String },
    /// Poll until a certificate or thing type no longer exists
    WaitDeleted {
        #[arg(long, conflicts_with = "thing_type", required_unless_present = "thing_type")]
        certificate: Option<String>,
        #[arg(long)]
        thing_type: Option<String>,
        #[arg(long, default_value_t = 120)]
        wait_secs: u64,
    },
    Endpoint {
        #[arg(long, default_value = "iot:Data-ATS")]
        endpoint_type: EndpointType,
    },
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn attachment_resources<D: PolicyDirectory>(reconciler: &Arc<Reconciler<D>>, specs: &[DesiredAttachment]) -> Vec<PolicyAttachment<D>> {
    specs
        .iter()
        .flat_map(|s| {
            s.policies
                .iter()
                .map(move |p| PolicyAttachment::new(reconciler.clone(), p.clone(), s.target.clone(), s.ensure))
        })
        .collect()
}

async fn converge<D: PolicyDirectory>(resources: &[PolicyAttachment<D>], apply: bool) -> Result<Vec<serde_json::Value>> {
    let mut rows = Vec::with_capacity(resources.len());
    for r in resources {
        let cur = r.read().await.with_context(|| format!("read {}", r.id().0))?;
        let op = r.plan(cur).await?;
        info!(id = %r.id().0, op = ?op, "planned");
        if apply {
            r.apply(op.clone()).await.with_context(|| format!("apply {}", r.id().0))?;
        }
        rows.push(json!({ "id": r.id().0, "op": op }));
    }
    Ok(rows)
}

async fn run<D>(cmd: RemoteCmd, stack: &Stack, directory: Arc<D>, config: ReconcilerConfig, cancel: &CancellationToken) -> Result<()>
where
    D: PolicyDirectory + IotRegistry + 'static,
{
    let reconciler = Arc::new(Reconciler::new(directory.clone()).with_config(config).with_cancellation(cancel.clone()));

    match cmd {
        RemoteCmd::List { target } => {
            let policies = reconciler.list_attached(&target).await?;
            print_json(&json!({ "target": target, "policies": policies }))?;
        }
        RemoteCmd::Find { target, policies } => {
            let found = reconciler.find_attachments(&target, &policies).await?;
            let rows: Vec<_> = policies
                .iter()
                .map(|p| json!({ "policy": p, "attached": found.contains(p) }))
                .collect();
            print_json(&json!({ "target": target, "policies": rows }))?;
        }
        RemoteCmd::Attach { target, policy } => reconciler.attach_policy(&target, &policy).await?,
        RemoteCmd::Detach { target, policy } => reconciler.detach_policy(&target, &policy).await?,
        cmd @ (RemoteCmd::Plan | RemoteCmd::Apply) => {
            anyhow::ensure!(!stack.attachments.is_empty(), "no attachments declared; pass --file with an `attachments` list");
            let apply = matches!(cmd, RemoteCmd::Apply);
            let resources = attachment_resources(&reconciler, &stack.attachments);
            print_json(&converge(&resources, apply).await?)?;
        }
        RemoteCmd::Import { id } => {
            let res = PolicyAttachment::import(reconciler.clone(), &id)?;
            match res.read().await? {
                Some(state) => print_json(&state)?,
                None => anyhow::bail!("cannot import non-existent policy attachment {id}"),
            }
        }
        RemoteCmd::WaitDeleted { certificate, thing_type, wait_secs } => {
            let wc = WaitConfig::with_timeout(Duration::from_secs(wait_secs));
            match (certificate, thing_type) {
                (Some(c), _) => wait::certificate_absent(directory.as_ref(), &c, &wc, cancel).await?,
                (None, Some(t)) => wait::thing_type_absent(directory.as_ref(), &t, &wc, cancel).await?,
                (None, None) => anyhow::bail!("pass --certificate or --thing-type"),
            }
        }
        RemoteCmd::Endpoint { endpoint_type } => {
            let address = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReconcileError::Cancelled(CancelReason::Requested).into()),
                r = directory.describe_endpoint(endpoint_type) => r.context("describe endpoint")?,
            };
            print_json(&json!({ "endpoint_type": endpoint_type.as_str(), "endpoint_address": address }))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();
    let Cli { file, out, region, profile, endpoint_url, page_size, timeout_secs, cmd } = Cli::parse();

    let stack = match &file {
        Some(f) => Stack::load(f)?,
        None => Stack::default(),
    };

    let remote = match cmd {
        Cmd::Render => {
            let tf = schema::render(stack.provider.as_ref(), &stack.resources);
            schema::write_tf_json(&tf, &out).with_context(|| format!("write {}", out.display()))?;
            info!(out = %out.display(), resources = stack.resources.len(), "rendered");
            return Ok(());
        }
        Cmd::Remote(remote) => remote,
    };

    let settings = stack.aws.clone().overlay(AwsSettings { region, profile, endpoint_url });
    let directory = Arc::new(IotDirectory::from_settings(&settings).await);

    let config = ReconcilerConfig {
        page_size: page_size.or(stack.page_size).unwrap_or(MAX_PAGE_SIZE),
        call_timeout: timeout_secs.or(stack.timeout_secs).map(Duration::from_secs),
    };
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }
    run(remote, &stack, directory, config, &cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotctl_core::memory::MemoryDirectory;
    use iotctl_core::{CertificateDescription, CertificateStatus, Ensure, Op};

    const CERT: &str = "arn:aws:iot:us-west-2:123456789012:cert/0a1b2c";

    #[test]
    fn parses_find_with_repeated_policy() {
        let cli = Cli::try_parse_from(["iotctl", "find", "--target", CERT, "--policy", "a", "--policy", "b"]).unwrap();
        match cli.cmd {
            Cmd::Remote(RemoteCmd::Find { policies, .. }) => assert_eq!(policies.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_policy_argument() {
        assert!(Cli::try_parse_from(["iotctl", "attach", "--target", CERT, "--policy", "bad name"]).is_err());
    }

    #[test]
    fn wait_deleted_needs_exactly_one_resource() {
        assert!(Cli::try_parse_from(["iotctl", "wait-deleted"]).is_err());
        assert!(Cli::try_parse_from(["iotctl", "wait-deleted", "--certificate", "c", "--thing-type", "t"]).is_err());
        assert!(Cli::try_parse_from(["iotctl", "wait-deleted", "--thing-type", "t"]).is_ok());
    }

    #[test]
    fn render_runs_without_remote_setup() {
        let cli = Cli::try_parse_from(["iotctl", "render", "--out", "tf"]).unwrap();
        assert!(matches!(cli.cmd, Cmd::Render));
        let cli = Cli::try_parse_from(["iotctl", "endpoint"]).unwrap();
        assert!(matches!(cli.cmd, Cmd::Remote(RemoteCmd::Endpoint { endpoint_type: EndpointType::DataAts })));
    }

    fn cancelled() -> CancellationToken {
        let token = CancellationToken::new();
        token.cancel();
        token
    }

    fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<ReconcileError>(), Some(ReconcileError::Cancelled(CancelReason::Requested)))
    }

    #[tokio::test]
    async fn interrupt_stops_wait_deleted() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_certificate(CertificateDescription {
            certificate_id: "0a1b2c".into(),
            certificate_arn: CERT.into(),
            status: CertificateStatus::Inactive,
        });
        let cmd = RemoteCmd::WaitDeleted { certificate: Some("0a1b2c".into()), thing_type: None, wait_secs: 120 };
        let err = run(cmd, &Stack::default(), dir, ReconcilerConfig::default(), &cancelled()).await.unwrap_err();
        assert!(is_cancelled(&err), "{err:#}");
    }

    #[tokio::test]
    async fn interrupt_stops_endpoint_lookup() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.set_endpoint(EndpointType::DataAts, "abc123-ats.iot.us-west-2.amazonaws.com");
        let cmd = RemoteCmd::Endpoint { endpoint_type: EndpointType::DataAts };
        let err = run(cmd, &Stack::default(), dir.clone(), ReconcilerConfig::default(), &cancelled()).await.unwrap_err();
        assert!(is_cancelled(&err), "{err:#}");

        let cmd = RemoteCmd::Endpoint { endpoint_type: EndpointType::DataAts };
        run(cmd, &Stack::default(), dir, ReconcilerConfig::default(), &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn plan_then_apply_converges() {
        let dir = Arc::new(MemoryDirectory::new());
        let target = AttachmentTarget::new(CERT).unwrap();
        dir.add_target(&target);
        dir.attach_policy(&target, &PolicyReference::new("legacy").unwrap()).await.unwrap();
        let reconciler = Arc::new(Reconciler::new(dir.clone()).with_config(ReconcilerConfig::with_page_size(1)));

        let specs = vec![
            DesiredAttachment {
                target: target.clone(),
                policies: vec![PolicyReference::new("policy-A").unwrap(), PolicyReference::new("policy-B").unwrap()],
                ensure: Ensure::Present,
            },
            DesiredAttachment { target: target.clone(), policies: vec![PolicyReference::new("legacy").unwrap()], ensure: Ensure::Absent },
        ];
        let resources = attachment_resources(&reconciler, &specs);
        assert_eq!(resources.len(), 3);

        let planned = converge(&resources, false).await.unwrap();
        let ops: Vec<_> = planned.iter().map(|r| r["op"].clone()).collect();
        assert_eq!(ops, vec![json!(Op::Create), json!(Op::Create), json!(Op::Delete)]);
        assert_eq!(dir.attach_calls(), 1);

        converge(&resources, true).await.unwrap();
        let names: Vec<_> = dir.attached(&target).iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["policy-A", "policy-B"]);

        let again = converge(&resources, false).await.unwrap();
        assert!(again.iter().all(|r| r["op"] == json!(Op::Noop)));
    }
}
