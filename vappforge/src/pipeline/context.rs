//! Immutable context handed to every pipeline step.

use std::sync::Arc;

use crate::comm::{Communicator, Provisioner};
use crate::fetch::ImageFetcher;
use crate::iso::rebuild::ImageRebuilder;
use crate::options::BuildOptions;
use crate::pipeline::cancel::CancelToken;

/// Configuration plus the external collaborators a build runs against. The
/// collaborators are trait objects so tests and rehearsal runs can substitute
/// in-memory implementations.
pub struct BuildContext {
    pub options: Arc<BuildOptions>,
    pub cancel: CancelToken,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub communicator: Option<Arc<dyn Communicator>>,
    pub provisioners: Vec<Arc<dyn Provisioner>>,
    pub rebuilder: Arc<dyn ImageRebuilder>,
}
