//! Build assembly: collaborator wiring and the two stage sequences.
//!
//! When injected content must carry the cloud-assigned guest address
//! (`auto_discover_ip` with `cd_content`/`cd_files`), image mutation and
//! upload move to after VM creation so the address can be baked in
//! ("late-bind"). Otherwise the image is rewritten and uploaded before any
//! VM exists ("early-bind"). The two flows are concrete sequences over the
//! same step set rather than in-stage branching.

use std::sync::Arc;

use crate::artifact::Artifact;
use crate::comm::{Communicator, Provisioner};
use crate::driver::DriverFactory;
use crate::errors::{ForgeError, ForgeResult};
use crate::fetch::{HttpFetcher, ImageFetcher};
use crate::iso::rebuild::{HostToolsRebuilder, ImageRebuilder};
use crate::options::BuildOptions;
use crate::pipeline::{BuildContext, BuildState, CancelToken, Pipeline, Step};
use crate::steps;

pub struct Builder {
    options: BuildOptions,
    factory: Arc<dyn DriverFactory>,
    fetcher: Arc<dyn ImageFetcher>,
    communicator: Option<Arc<dyn Communicator>>,
    provisioners: Vec<Arc<dyn Provisioner>>,
    rebuilder: Arc<dyn ImageRebuilder>,
}

impl Builder {
    pub fn new(options: BuildOptions, factory: Arc<dyn DriverFactory>) -> Builder {
        Builder {
            options,
            factory,
            fetcher: Arc::new(HttpFetcher::new()),
            communicator: None,
            provisioners: Vec::new(),
            rebuilder: Arc::new(HostToolsRebuilder),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Builder {
        self.fetcher = fetcher;
        self
    }

    pub fn with_communicator(mut self, communicator: Arc<dyn Communicator>) -> Builder {
        self.communicator = Some(communicator);
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Builder {
        self.provisioners.push(provisioner);
        self
    }

    pub fn with_rebuilder(mut self, rebuilder: Arc<dyn ImageRebuilder>) -> Builder {
        self.rebuilder = rebuilder;
        self
    }

    /// Validate the configuration and run the build to completion.
    pub async fn run(self, cancel: CancelToken) -> ForgeResult<Artifact> {
        self.options.sanitize()?;

        let late_bind = self.options.needs_late_bind();
        tracing::info!(
            vm = %self.options.location.vm_name,
            flow = if late_bind { "late-bind" } else { "early-bind" },
            "starting build"
        );

        let steps = self.steps(late_bind);
        let ctx = BuildContext {
            options: Arc::new(self.options),
            cancel,
            fetcher: self.fetcher,
            communicator: self.communicator,
            provisioners: self.provisioners,
            rebuilder: self.rebuilder,
        };

        let mut state = BuildState::new();
        let result = Pipeline::new(steps).run(&ctx, &mut state).await;

        match result {
            Ok(()) => Ok(Artifact {
                vm_name: ctx.options.location.vm_name.clone(),
                vdc: ctx.options.location.vdc.clone(),
                vapp: state
                    .vapp
                    .as_ref()
                    .map(|v| v.name.clone())
                    .unwrap_or_default(),
                template_name: state.template_name.clone(),
                vm: state.vm.clone(),
            }),
            Err(err) => {
                if err.is_cancelled() {
                    tracing::warn!("build cancelled");
                    Err(ForgeError::Cancelled)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn steps(&self, late_bind: bool) -> Vec<Box<dyn Step>> {
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(steps::connect::ConnectStep::new(self.factory.clone())),
            Box::new(steps::download::DownloadStep::default()),
            Box::new(steps::http_server::HttpIpDiscoverStep),
            Box::new(steps::http_server::HttpServerStep::default()),
            Box::new(steps::catalog::CatalogStep),
        ];

        if !late_bind {
            steps.push(Box::new(steps::discover_ip::DiscoverIpStep));
            steps.push(Box::new(steps::modify_iso::ModifyIsoStep::default()));
            steps.push(Box::new(steps::upload_iso::UploadIsoStep));
        }

        steps.push(Box::new(steps::resolve_vapp::ResolveVappStep));
        steps.push(Box::new(steps::create_vm::CreateVmStep));
        steps.push(Box::new(steps::hardware::HardwareStep));
        steps.push(Box::new(steps::boot_options::BootOptionsStep));
        steps.push(Box::new(steps::tpm::TpmStep));

        if late_bind {
            steps.push(Box::new(steps::query_vm_ip::QueryVmIpStep));
            steps.push(Box::new(steps::modify_iso::ModifyIsoStep::default()));
            steps.push(Box::new(steps::upload_iso::UploadIsoStep));
        }

        steps.push(Box::new(steps::mount_iso::MountIsoStep));
        steps.push(Box::new(steps::power_on::PowerOnStep));
        steps.push(Box::new(steps::boot_command::BootCommandStep));
        steps.push(Box::new(steps::wait_for_ip::WaitForIpStep));
        steps.push(Box::new(steps::communicator::CommunicatorStep));
        steps.push(Box::new(steps::shutdown::ShutdownStep));
        steps.push(Box::new(steps::export::ExportStep));
        steps
    }
}
