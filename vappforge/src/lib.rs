//! vappforge: build VMware Cloud Director vApp templates from installer
//! ISOs.
//!
//! A build runs a staged pipeline against the cloud: stage the installer
//! image (rewriting it to carry answer files when asked), create and shape
//! an empty VM, mount the image, type the boot command over the WebMKS
//! console, wait for the installer, and capture the powered-off VM into a
//! catalog as a template ready for cloning.
//!
//! ```ignore
//! let artifact = Builder::new(options, driver_factory)
//!     .run(cancel_token)
//!     .await?;
//! println!("template: {:?}", artifact.template_name);
//! ```

pub mod artifact;
pub mod bootcmd;
pub mod build;
pub mod comm;
pub mod console;
pub mod driver;
pub mod errors;
pub mod fetch;
pub mod http;
pub mod iso;
pub mod options;
pub mod pipeline;
pub mod sim;
pub mod steps;
pub mod template;

#[cfg(test)]
pub(crate) mod testutil;

pub use artifact::Artifact;
pub use build::Builder;
pub use errors::{ForgeError, ForgeResult};
pub use options::BuildOptions;
pub use pipeline::{CancelSource, CancelToken};
