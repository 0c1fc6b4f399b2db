use async_trait::async_trait;
use std::sync::Arc;

use crate::error::DirectoryError;
use crate::types::{
    AttachmentPage, AttachmentTarget, CertificateDescription, EndpointType, ListAttachedPolicies,
    PolicyReference, ThingTypeDescription,
};

/// Remote store of policy-to-target attachments.
///
/// Implementations report failures through [`DirectoryError`] with a classified
/// kind; callers never inspect provider error codes.
#[async_trait]
pub trait PolicyDirectory: Send + Sync {
    /// One page of policies directly attached to `req.target`, in provider order.
    async fn list_attached_policies(&self, req: ListAttachedPolicies) -> Result<AttachmentPage, DirectoryError>;
    async fn attach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError>;
    async fn detach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError>;
}

/// Describe-style lookups of IoT resources, used for existence checks.
#[async_trait]
pub trait IotRegistry: Send + Sync {
    async fn describe_certificate(&self, certificate_id: &str) -> Result<CertificateDescription, DirectoryError>;
    async fn describe_thing_type(&self, name: &str) -> Result<ThingTypeDescription, DirectoryError>;
    async fn describe_endpoint(&self, endpoint_type: EndpointType) -> Result<String, DirectoryError>;
}

#[async_trait]
impl<T: PolicyDirectory + ?Sized> PolicyDirectory for Arc<T> {
    async fn list_attached_policies(&self, req: ListAttachedPolicies) -> Result<AttachmentPage, DirectoryError> {
        (**self).list_attached_policies(req).await
    }
    async fn attach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError> {
        (**self).attach_policy(target, policy).await
    }
    async fn detach_policy(&self, target: &AttachmentTarget, policy: &PolicyReference) -> Result<(), DirectoryError> {
        (**self).detach_policy(target, policy).await
    }
}

#[async_trait]
impl<T: IotRegistry + ?Sized> IotRegistry for Arc<T> {
    async fn describe_certificate(&self, certificate_id: &str) -> Result<CertificateDescription, DirectoryError> {
        (**self).describe_certificate(certificate_id).await
    }
    async fn describe_thing_type(&self, name: &str) -> Result<ThingTypeDescription, DirectoryError> {
        (**self).describe_thing_type(name).await
    }
    async fn describe_endpoint(&self, endpoint_type: EndpointType) -> Result<String, DirectoryError> {
        (**self).describe_endpoint(endpoint_type).await
    }
}
