//! Policy-attachment reconciliation over a [`PolicyDirectory`].
//!
//! Every lookup walks the remote listing page by page. The walk is driven by a
//! visitor that returns `false` to stop, so a single-policy lookup never fetches
//! pages past its match. Cancellation and the per-call deadline are checked
//! before each fetch and raced against the fetch in flight.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::directory::PolicyDirectory;
use crate::error::{CancelReason, DirectoryError, DirectoryErrorKind, ReconcileError, Result};
use crate::types::{AttachmentPage, AttachmentTarget, Cursor, ListAttachedPolicies, PolicyReference};

/// Largest page ListAttachedPolicies accepts.
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Entries requested per page, clamped to `1..=MAX_PAGE_SIZE`.
    pub page_size: u32,
    /// Deadline applied to each reconciler call as a whole.
    pub call_timeout: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { page_size: MAX_PAGE_SIZE, call_timeout: None }
    }
}

impl ReconcilerConfig {
    pub fn with_page_size(page_size: u32) -> Self {
        Self { page_size, ..Default::default() }
    }

    pub fn effective_page_size(&self) -> u32 { self.page_size.clamp(1, MAX_PAGE_SIZE) }
}

/// Outcome of a page walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageWalk {
    pub pages: usize,
    /// The visitor stopped the walk before the listing was exhausted.
    pub halted: bool,
}

pub struct Reconciler<D> {
    directory: D,
    config: ReconcilerConfig,
    cancel: CancellationToken,
}

impl<D: PolicyDirectory> Reconciler<D> {
    pub fn new(directory: D) -> Self {
        Self { directory, config: ReconcilerConfig::default(), cancel: CancellationToken::new() }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn directory(&self) -> &D { &self.directory }
    pub fn config(&self) -> &ReconcilerConfig { &self.config }
    pub fn cancellation(&self) -> &CancellationToken { &self.cancel }

    fn deadline(&self) -> Option<Instant> {
        self.config.call_timeout.map(|t| Instant::now() + t)
    }

    fn ensure_live(&self, deadline: Option<Instant>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled(CancelReason::Requested));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ReconcileError::Cancelled(CancelReason::DeadlineExceeded));
        }
        Ok(())
    }

    async fn guarded<T, F>(&self, deadline: Option<Instant>, call: F) -> Result<T>
    where
        F: Future<Output = Result<T, DirectoryError>> + Send,
    {
        self.ensure_live(deadline)?;
        let expiry = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReconcileError::Cancelled(CancelReason::Requested)),
            _ = expiry => Err(ReconcileError::Cancelled(CancelReason::DeadlineExceeded)),
            r = call => r.map_err(ReconcileError::from),
        }
    }

    /// Walks the policies directly attached to `target`.
    ///
    /// `visit` sees each page in provider order and returns `false` to halt;
    /// `true` fetches the next page if the listing returned a cursor.
    pub async fn for_each_page<F>(&self, target: &AttachmentTarget, mut visit: F) -> Result<PageWalk>
    where
        F: FnMut(&AttachmentPage) -> bool + Send,
    {
        let deadline = self.deadline();
        let page_size = self.config.effective_page_size();
        let mut cursor: Option<Cursor> = None;
        let mut walk = PageWalk::default();
        loop {
            let req = ListAttachedPolicies { target: target.clone(), page_size, recursive: false, cursor: cursor.take() };
            let page = self.guarded(deadline, self.directory.list_attached_policies(req)).await?;
            walk.pages += 1;
            debug!(target_id = %target, page = walk.pages, entries = page.policies.len(), more = page.has_more(), "listed attached policies");
            if !visit(&page) {
                walk.halted = true;
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(walk)
    }

    /// Returns the attached policy named `policy`, stopping at the first match.
    pub async fn find_attachment(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<Option<PolicyReference>> {
        let mut found = None;
        self.for_each_page(target, |page| {
            found = page.policies.iter().find(|p| *p == policy).cloned();
            found.is_none()
        })
        .await?;
        Ok(found)
    }

    /// Which of `policies` are attached, in one walk that ends once all are seen.
    pub async fn find_attachments(&self, target: &AttachmentTarget, policies: &[PolicyReference]) -> Result<BTreeSet<PolicyReference>> {
        let wanted: BTreeSet<&PolicyReference> = policies.iter().collect();
        let mut found = BTreeSet::new();
        if wanted.is_empty() {
            return Ok(found);
        }
        self.for_each_page(target, |page| {
            found.extend(page.policies.iter().filter(|p| wanted.contains(p)).cloned());
            found.len() < wanted.len()
        })
        .await?;
        Ok(found)
    }

    pub async fn list_attached(&self, target: &AttachmentTarget) -> Result<Vec<PolicyReference>> {
        let mut all = Vec::new();
        self.for_each_page(target, |page| {
            all.extend_from_slice(&page.policies);
            true
        })
        .await?;
        Ok(all)
    }

    /// Attaches without checking first; the directory treats repeats as no-ops.
    pub async fn attach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<()> {
        let deadline = self.deadline();
        self.guarded(deadline, self.directory.attach_policy(target, policy)).await?;
        info!(target_id = %target, policy = %policy, "attached policy");
        Ok(())
    }

    /// Detaching a policy that is not attached succeeds; a missing target is an error.
    pub async fn detach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<()> {
        let deadline = self.deadline();
        match self.guarded(deadline, self.directory.detach_policy(target, policy)).await {
            Ok(()) => info!(target_id = %target, policy = %policy, "detached policy"),
            Err(ReconcileError::Directory(e)) if e.kind == DirectoryErrorKind::NotAttached => {
                debug!(target_id = %target, policy = %policy, "policy was not attached");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
