// ABOUTME: Validated domain types shared by every component.
// ABOUTME: Commit identifiers, image references, and Kubernetes resource names.

mod commit;
mod image_ref;
mod resource_name;

pub use commit::{CommitRef, CommitSha, CommitShaError};
pub use image_ref::{ImageRef, ImageReference, ImageTags, ParseImageRefError, branch_latest_tag};
pub use resource_name::{ResourceName, ResourceNameError};
