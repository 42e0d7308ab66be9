//! End-to-end pipeline runs against the in-memory cloud simulator.

use std::net::Ipv4Addr;
use std::sync::Arc;

use vappforge::driver::types::{IpRange, NetworkScope};
use vappforge::iso::IsoWriter;
use vappforge::options::{
    BuildOptions, ConnectOptions, ExportOptions, ImageOptions, LocationOptions, NetworkOptions,
};
use vappforge::sim::{SimCloud, SimFaults};
use vappforge::{Builder, CancelSource, CancelToken, ForgeError};

// ============================================================================
// FIXTURES
// ============================================================================

struct TestContext {
    sim: SimCloud,
    options: BuildOptions,
    _temp_dir: tempfile::TempDir,
}

fn lab_network() -> NetworkScope {
    NetworkScope {
        gateway: Ipv4Addr::new(10, 0, 0, 1),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        dns1: Some(Ipv4Addr::new(10, 0, 0, 2)),
        dns2: None,
        ranges: vec![IpRange {
            start: Ipv4Addr::new(10, 0, 0, 10),
            end: Ipv4Addr::new(10, 0, 0, 50),
        }],
        allocated: Vec::new(),
    }
}

/// A small bootable ISO-9660 source image on disk.
fn write_source_iso(dir: &std::path::Path) -> std::path::PathBuf {
    let mut writer = IsoWriter::new("TEST_LINUX");
    writer
        .add_file("isolinux/isolinux.bin", vec![0u8; 4096])
        .unwrap();
    writer
        .add_file("isolinux/isolinux.cfg", b"default install\n".to_vec())
        .unwrap();
    writer
        .add_file("install/vmlinuz", vec![0xAA; 8192])
        .unwrap();
    let image = writer.build().unwrap();
    let path = dir.join("installer.iso");
    std::fs::write(&path, image).unwrap();
    path
}

/// Write retained media bytes somewhere the reader can open them.
fn write_temp_image(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("staged.iso");
    std::fs::write(&path, bytes).expect("write staged image");
    (dir, path)
}

fn context() -> TestContext {
    let temp_dir = tempfile::TempDir::new().expect("temp dir");
    let iso_path = write_source_iso(temp_dir.path());

    let sim = SimCloud::new("lab-vdc").with_network("lab-net", lab_network());

    let options = BuildOptions {
        connect: ConnectOptions {
            host: "vcd.example.com".into(),
            org: "lab".into(),
            token: "tok".into(),
            ..Default::default()
        },
        location: LocationOptions {
            vm_name: "base-linux".into(),
            vdc: "lab-vdc".into(),
            create_vapp: true,
            ..Default::default()
        },
        network: NetworkOptions {
            network: "lab-net".into(),
            ..Default::default()
        },
        image: ImageOptions {
            iso_url: iso_path.to_string_lossy().into_owned(),
            cache_dir: Some(temp_dir.path().join("cache")),
            ..Default::default()
        },
        export: Some(ExportOptions {
            catalog: "templates".into(),
            overwrite: false,
            create_catalog: true,
            ..Default::default()
        }),
        ..Default::default()
    };

    TestContext {
        sim,
        options,
        _temp_dir: temp_dir,
    }
}

async fn run(ctx: TestContext) -> Result<vappforge::Artifact, ForgeError> {
    Builder::new(ctx.options, Arc::new(ctx.sim.clone()))
        .run(CancelToken::never())
        .await
}

// ============================================================================
// HAPPY PATH
// ============================================================================

#[tokio::test(start_paused = true)]
async fn clean_build_captures_a_template() {
    let ctx = context();
    let sim = ctx.sim.clone();

    let artifact = run(ctx).await.expect("build should succeed");
    assert_eq!(artifact.vm_name, "base-linux");
    assert_eq!(artifact.template_name.as_deref(), Some("base-linux"));

    // One capture into the export catalog from the build's vApp.
    let captures = sim.captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].0, "templates");
    assert_eq!(captures[0].2, "base-linux");

    // The VM ended powered off with its media ejected before capture.
    let vm = sim.vm("base-linux").expect("vm exists");
    assert!(!vm.powered_on);
    assert!(vm.inserted_media.is_none());
    assert!(vm.ejected);
    assert!(!vm.deleted);

    // The temporary staging catalog is gone; the export catalog remains.
    assert_eq!(sim.catalog_names(), vec!["templates".to_string()]);
    assert_eq!(sim.deleted_catalogs().len(), 1);
    assert!(sim.deleted_catalogs()[0].starts_with("forge-"));
}

#[tokio::test(start_paused = true)]
async fn pool_guests_get_an_address_from_the_static_pool() {
    let ctx = context();
    let sim = ctx.sim.clone();

    run(ctx).await.expect("build should succeed");
    let vm = sim.vm("base-linux").expect("vm exists");
    assert_eq!(vm.ip, Some(Ipv4Addr::new(10, 0, 0, 10)));
}

// ============================================================================
// LATE-BIND FLOW
// ============================================================================

#[tokio::test(start_paused = true)]
async fn injected_content_carries_the_discovered_address() {
    let mut ctx = context();
    ctx.options.network.auto_discover_ip = true;
    ctx.options.image.cd_content.insert(
        "ks.cfg".into(),
        "ip={{ .VMIP }} gw={{ .VMGateway }} mask={{ .VMNetmask }} prefix={{.VMPrefix}}\n".into(),
    );
    assert!(ctx.options.needs_late_bind());
    let sim = ctx.sim.clone();

    run(ctx).await.expect("build should succeed");

    // The uploaded media is the rewritten image, tagged with a digest.
    let uploads = sim.uploads();
    assert_eq!(uploads.len(), 1);
    let media_name = &uploads[0].1;
    assert!(
        media_name.starts_with("installer-modified-") && media_name.ends_with(".iso"),
        "unexpected media name {media_name}"
    );

    // The answer file inside it carries the rendered network settings. The
    // local rewrite is cleaned up after the build, so read back what the
    // cloud retained.
    let bytes = sim
        .media_content(&uploads[0].0, media_name)
        .expect("uploaded bytes retained");
    let (_staged_dir, staged_path) = write_temp_image(&bytes);
    let mut reader = vappforge::iso::IsoReader::open(&staged_path).expect("uploaded image");
    let entry = reader
        .lookup("ks.cfg")
        .unwrap()
        .expect("ks.cfg in rewritten image");
    let content = String::from_utf8(reader.read_file(&entry).unwrap()).unwrap();
    assert_eq!(content, "ip=10.0.0.10 gw=10.0.0.1 mask=255.255.255.0 prefix=24\n");

    // The source files survived the rewrite.
    assert!(reader.lookup("isolinux/isolinux.cfg").unwrap().is_some());
    assert!(reader.lookup("install/vmlinuz").unwrap().is_some());
}

// ============================================================================
// FAULT HANDLING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn power_on_conflicts_reallocate_the_address() {
    let mut ctx = context();
    ctx.options.network.auto_discover_ip = true;
    ctx.options.network.ip_allocation_mode =
        vappforge::driver::types::IpAllocationMode::Manual;
    ctx.sim = ctx.sim.clone().with_faults(SimFaults {
        power_on_ip_conflicts: 2,
        ..Default::default()
    });
    let sim = ctx.sim.clone();

    run(ctx).await.expect("build should survive IP conflicts");

    let vm = sim.vm("base-linux").expect("vm exists");
    // First pick was .10; two conflicts exclude .10 and .11.
    assert_eq!(vm.ip, Some(Ipv4Addr::new(10, 0, 0, 12)));
    assert!(!vm.powered_on); // shut down at the end of the build
}

#[tokio::test(start_paused = true)]
async fn media_insert_conflicts_are_waited_out() {
    let mut ctx = context();
    ctx.sim = ctx.sim.clone().with_faults(SimFaults {
        media_insert_conflicts: 2,
        media_resolve_polls: 2,
        template_resolve_polls: 1,
        ..Default::default()
    });
    let sim = ctx.sim.clone();

    run(ctx).await.expect("build should wait out transient 409s");
    assert_eq!(sim.captures().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_template_without_overwrite_fails_and_rolls_back() {
    let ctx = context();
    let sim = ctx.sim.clone();

    // First build populates the template.
    let first = TestContext {
        sim: sim.clone(),
        options: ctx.options.clone(),
        _temp_dir: tempfile::TempDir::new().unwrap(),
    };
    run(first).await.expect("first build succeeds");

    // Second build refuses to overwrite and aborts.
    let err = run(ctx).await.expect_err("duplicate template must fail");
    let message = err.to_string();
    assert!(
        message.starts_with("export-to-catalog:"),
        "failure must carry the stage name: {message}"
    );
    assert!(message.contains("already exists"));

    // Rollback: the second build's VM was deleted, the temp catalogs are
    // gone, and only the first capture remains.
    assert_eq!(sim.captures().len(), 1);
    assert_eq!(sim.deleted_catalogs().len(), 2);
    let vm = sim.vm("base-linux").expect("vm record exists");
    assert!(vm.deleted);
}

#[tokio::test(start_paused = true)]
async fn overwrite_replaces_an_existing_template() {
    let ctx = context();
    let sim = ctx.sim.clone();

    let first = TestContext {
        sim: sim.clone(),
        options: ctx.options.clone(),
        _temp_dir: tempfile::TempDir::new().unwrap(),
    };
    run(first).await.expect("first build succeeds");

    let mut second = ctx;
    if let Some(export) = &mut second.options.export {
        export.overwrite = true;
    }
    run(second).await.expect("overwrite build succeeds");
    assert_eq!(sim.captures().len(), 2);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn cancellation_interrupts_the_boot_wait_and_rolls_back() {
    let mut ctx = context();
    // A long boot wait gives cancellation a window; the boot command itself
    // would fail later (the simulator has no console).
    ctx.options.boot.boot_command = vec!["<esc><enter>".into()];
    ctx.options.boot.boot_wait = 600;
    let sim = ctx.sim.clone();

    let (source, token) = CancelSource::new();
    let handle = tokio::spawn(async move {
        Builder::new(ctx.options, Arc::new(ctx.sim.clone()))
            .run(token)
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    source.cancel();

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("cancel must interrupt the boot wait")
        .unwrap();
    assert!(matches!(result, Err(ForgeError::Cancelled)));

    // Reverse cleanup ran: VM deleted, temp catalog gone, nothing captured.
    let vm = sim.vm("base-linux").expect("vm record exists");
    assert!(vm.deleted);
    assert!(sim.captures().is_empty());
    assert_eq!(sim.deleted_catalogs().len(), 1);
}
