//! In-process [`PolicyDirectory`] and [`IotRegistry`] with call counters and
//! failure injection. Built for tests and behind the `testing` feature.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::directory::{IotRegistry, PolicyDirectory};
use crate::error::{DirectoryError, DirectoryErrorKind};
use crate::types::{
    AttachmentPage, AttachmentTarget, CertificateDescription, Cursor, EndpointType,
    ListAttachedPolicies, PolicyReference, ThingTypeDescription,
};

#[derive(Default)]
struct State {
    attachments: BTreeMap<AttachmentTarget, Vec<PolicyReference>>,
    certificates: BTreeMap<String, CertificateDescription>,
    thing_types: BTreeMap<String, ThingTypeDescription>,
    endpoints: HashMap<EndpointType, String>,
    // describes remaining before the keyed resource disappears
    vanish_after: HashMap<String, u32>,
    list_failures: VecDeque<DirectoryError>,
    attach_failures: VecDeque<DirectoryError>,
    detach_failures: VecDeque<DirectoryError>,
}

#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
    list_calls: AtomicUsize,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a target with no attachments; listing unknown targets fails with `NotFound`.
    pub fn add_target(&self, target: &AttachmentTarget) {
        self.state().attachments.entry(target.clone()).or_default();
    }

    pub fn add_certificate(&self, cert: CertificateDescription) {
        let target = AttachmentTarget::new(cert.certificate_arn.clone()).ok();
        let mut st = self.state();
        if let Some(t) = target { st.attachments.entry(t).or_default(); }
        st.certificates.insert(cert.certificate_id.clone(), cert);
    }

    pub fn add_thing_type(&self, tt: ThingTypeDescription) {
        self.state().thing_types.insert(tt.thing_type_name.clone(), tt);
    }

    pub fn set_endpoint(&self, endpoint_type: EndpointType, address: impl Into<String>) {
        self.state().endpoints.insert(endpoint_type, address.into());
    }

    pub fn remove_certificate(&self, certificate_id: &str) {
        self.state().certificates.remove(certificate_id);
    }

    /// The certificate or thing type named `key` is deleted after `describes` more lookups.
    pub fn vanish_after(&self, key: impl Into<String>, describes: u32) {
        self.state().vanish_after.insert(key.into(), describes);
    }

    /// Queue an error returned by the next list call instead of a page.
    pub fn fail_next_list(&self, err: DirectoryError) {
        self.state().list_failures.push_back(err);
    }

    pub fn fail_next_attach(&self, err: DirectoryError) {
        self.state().attach_failures.push_back(err);
    }

    pub fn fail_next_detach(&self, err: DirectoryError) {
        self.state().detach_failures.push_back(err);
    }

    pub fn attached(&self, target: &AttachmentTarget) -> Vec<PolicyReference> {
        self.state().attachments.get(target).cloned().unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }
    pub fn attach_calls(&self) -> usize { self.attach_calls.load(Ordering::SeqCst) }
    pub fn detach_calls(&self) -> usize { self.detach_calls.load(Ordering::SeqCst) }

    fn tick_vanish(st: &mut State, key: &str) -> bool {
        let Some(n) = st.vanish_after.get_mut(key) else { return false };
        if *n > 0 {
            *n -= 1;
            return false;
        }
        st.vanish_after.remove(key);
        true
    }
}

fn unknown_target(op: &str, target: &AttachmentTarget) -> DirectoryError {
    DirectoryError::not_found(op, format!("target {target} does not exist"))
}

#[async_trait]
impl PolicyDirectory for MemoryDirectory {
    async fn list_attached_policies(&self, req: ListAttachedPolicies) -> Result<AttachmentPage, DirectoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        if let Some(err) = st.list_failures.pop_front() { return Err(err); }
        let all = st.attachments.get(&req.target)
            .ok_or_else(|| unknown_target("ListAttachedPolicies", &req.target))?;
        let start = match &req.cursor {
            Some(Cursor(c)) => c.parse::<usize>().map_err(|_| DirectoryError::new(
                DirectoryErrorKind::InvalidRequest, "ListAttachedPolicies", format!("bad marker {c}")))?,
            None => 0,
        };
        let end = (start + req.page_size.max(1) as usize).min(all.len());
        let policies = all.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < all.len()).then(|| Cursor(end.to_string()));
        Ok(AttachmentPage { policies, next_cursor })
    }

    async fn attach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        if let Some(err) = st.attach_failures.pop_front() { return Err(err); }
        let list = st.attachments.get_mut(target).ok_or_else(|| unknown_target("AttachPolicy", target))?;
        if !list.contains(policy) { list.push(policy.clone()); }
        Ok(())
    }

    async fn detach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        if let Some(err) = st.detach_failures.pop_front() { return Err(err); }
        let list = st.attachments.get_mut(target).ok_or_else(|| unknown_target("DetachPolicy", target))?;
        match list.iter().position(|p| p == policy) {
            Some(i) => { list.remove(i); Ok(()) }
            None => Err(DirectoryError::not_attached("DetachPolicy", format!("{policy} is not attached to {target}"))),
        }
    }
}

#[async_trait]
impl IotRegistry for MemoryDirectory {
    async fn describe_certificate(&self, certificate_id: &str) -> Result<CertificateDescription, DirectoryError> {
        let mut st = self.state();
        if Self::tick_vanish(&mut st, certificate_id) { st.certificates.remove(certificate_id); }
        st.certificates.get(certificate_id).cloned()
            .ok_or_else(|| DirectoryError::not_found("DescribeCertificate", format!("certificate {certificate_id} does not exist")))
    }

    async fn describe_thing_type(&self, name: &str) -> Result<ThingTypeDescription, DirectoryError> {
        let mut st = self.state();
        if Self::tick_vanish(&mut st, name) { st.thing_types.remove(name); }
        st.thing_types.get(name).cloned()
            .ok_or_else(|| DirectoryError::not_found("DescribeThingType", format!("thing type {name} does not exist")))
    }

    async fn describe_endpoint(&self, endpoint_type: EndpointType) -> Result<String, DirectoryError> {
        self.state().endpoints.get(&endpoint_type).cloned()
            .ok_or_else(|| DirectoryError::not_found("DescribeEndpoint", format!("no {} endpoint", endpoint_type.as_str())))
    }
}
