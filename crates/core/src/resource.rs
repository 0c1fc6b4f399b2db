use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::directory::PolicyDirectory;
use crate::error::{ReconcileError, Result};
use crate::reconciler::Reconciler;
use crate::types::{AttachmentTarget, PolicyReference};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// Observed state of a policy attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentState {
    pub id: ResourceId,
    pub policy: PolicyReference,
    pub target: AttachmentTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op { Create, Delete, Noop }

/// Lifecycle hooks the orchestration layer drives.
#[async_trait]
pub trait Resource: Send + Sync {
    fn id(&self) -> &ResourceId;
    async fn read(&self) -> Result<Option<AttachmentState>>;
    async fn plan(&self, cur: Option<AttachmentState>) -> Result<Op>;
    async fn apply(&self, op: Op) -> Result<()>;
}

/// The `aws_iot_policy_attachment` resource, identified as `<policy>|<target>`.
pub struct PolicyAttachment<D> {
    id: ResourceId,
    policy: PolicyReference,
    target: AttachmentTarget,
    ensure: Ensure,
    reconciler: Arc<Reconciler<D>>,
}

impl<D: PolicyDirectory> PolicyAttachment<D> {
    pub fn new(reconciler: Arc<Reconciler<D>>, policy: PolicyReference, target: AttachmentTarget, ensure: Ensure) -> Self {
        let id = ResourceId(format!("{policy}|{target}"));
        Self { id, policy, target, ensure, reconciler }
    }

    /// Builds the resource from an import id. The target may itself contain `|`.
    pub fn import(reconciler: Arc<Reconciler<D>>, id: &str) -> Result<Self> {
        let (policy, target) = parse_id(id)?;
        Ok(Self::new(reconciler, policy, target, Ensure::Present))
    }

    pub fn policy(&self) -> &PolicyReference { &self.policy }
    pub fn target(&self) -> &AttachmentTarget { &self.target }
    pub fn ensure(&self) -> Ensure { self.ensure }
}

pub fn parse_id(id: &str) -> Result<(PolicyReference, AttachmentTarget)> {
    let (policy, target) = id.split_once('|').ok_or_else(|| ReconcileError::InvalidImportId(id.to_string()))?;
    if policy.is_empty() || target.is_empty() {
        return Err(ReconcileError::InvalidImportId(id.to_string()));
    }
    Ok((PolicyReference::new(policy)?, AttachmentTarget::new(target)?))
}

#[async_trait]
impl<D: PolicyDirectory> Resource for PolicyAttachment<D> {
    fn id(&self) -> &ResourceId { &self.id }

    async fn read(&self) -> Result<Option<AttachmentState>> {
        let found = self.reconciler.find_attachment(&self.target, &self.policy).await?;
        Ok(found.map(|policy| AttachmentState { id: self.id.clone(), policy, target: self.target.clone() }))
    }

    async fn plan(&self, cur: Option<AttachmentState>) -> Result<Op> {
        Ok(match (self.ensure, cur) {
            (Ensure::Present, None) => Op::Create,
            (Ensure::Absent, Some(_)) => Op::Delete,
            _ => Op::Noop,
        })
    }

    async fn apply(&self, op: Op) -> Result<()> {
        match op {
            Op::Create => self.reconciler.attach_policy(&self.target, &self.policy).await,
            Op::Delete => self.reconciler.detach_policy(&self.target, &self.policy).await,
            Op::Noop => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;

    const CERT: &str = "arn:aws:iot:us-west-2:123456789012:cert/0a1b2c";

    fn reconciler() -> (Arc<MemoryDirectory>, Arc<Reconciler<Arc<MemoryDirectory>>>) {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_target(&AttachmentTarget::new(CERT).unwrap());
        (dir.clone(), Arc::new(Reconciler::new(dir)))
    }

    #[test]
    fn import_id_parsing() {
        let (p, t) = parse_id(&format!("tf-policy|{CERT}")).unwrap();
        assert_eq!(p.as_str(), "tf-policy");
        assert_eq!(t.as_str(), CERT);

        for bad in ["no-separator", "|target", "policy|", ""] {
            assert!(matches!(parse_id(bad), Err(ReconcileError::InvalidImportId(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn create_read_delete_cycle() {
        let (dir, rec) = reconciler();
        let res = PolicyAttachment::new(
            rec.clone(),
            PolicyReference::new("tf-policy").unwrap(),
            AttachmentTarget::new(CERT).unwrap(),
            Ensure::Present,
        );
        assert_eq!(res.id().0, format!("tf-policy|{CERT}"));

        let cur = res.read().await.unwrap();
        assert!(cur.is_none());
        let op = res.plan(cur).await.unwrap();
        assert_eq!(op, Op::Create);
        res.apply(op).await.unwrap();

        let cur = res.read().await.unwrap();
        assert_eq!(cur.as_ref().map(|s| s.policy.as_str()), Some("tf-policy"));
        assert_eq!(res.plan(cur).await.unwrap(), Op::Noop);

        let gone = PolicyAttachment::import(rec, res.id().0.as_str()).unwrap();
        let gone = PolicyAttachment::new(gone.reconciler.clone(), gone.policy.clone(), gone.target.clone(), Ensure::Absent);
        let op = gone.plan(gone.read().await.unwrap()).await.unwrap();
        assert_eq!(op, Op::Delete);
        gone.apply(op).await.unwrap();
        assert!(dir.attached(&AttachmentTarget::new(CERT).unwrap()).is_empty());
    }

    #[tokio::test]
    async fn absent_and_missing_is_noop() {
        let (dir, rec) = reconciler();
        let res = PolicyAttachment::new(
            rec,
            PolicyReference::new("never").unwrap(),
            AttachmentTarget::new(CERT).unwrap(),
            Ensure::Absent,
        );
        let op = res.plan(res.read().await.unwrap()).await.unwrap();
        assert_eq!(op, Op::Noop);
        res.apply(op).await.unwrap();
        assert_eq!(dir.detach_calls(), 0);
    }
}
