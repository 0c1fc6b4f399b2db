//! Core of iotctl: AWS IoT policy-attachment reconciliation against an
//! abstract policy directory.

pub mod directory;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod reconciler;
pub mod resource;
pub mod types;
pub mod wait;

pub use directory::{IotRegistry, PolicyDirectory};
pub use error::{CancelReason, DirectoryError, DirectoryErrorKind, ReconcileError, ResourceKind};
pub use reconciler::{PageWalk, Reconciler, ReconcilerConfig, MAX_PAGE_SIZE};
pub use resource::{AttachmentState, Ensure, Op, PolicyAttachment, Resource, ResourceId};
pub use types::{
    AttachmentPage, AttachmentTarget, CertificateDescription, CertificateStatus, Cursor, EndpointType,
    ListAttachedPolicies, PolicyReference, ThingTypeDescription,
};
pub use wait::WaitConfig;
