//! Image-mutator properties: round-trip fidelity, boot preservation, UDF
//! dispatch, and symlink materialization.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vappforge::iso::rebuild::StubRebuilder;
use vappforge::iso::{checksum_file, detect, IsoModifier, IsoReader, IsoWriter};

const SECTOR: u64 = 2048;

// ============================================================================
// FIXTURES
// ============================================================================

/// An isolinux-style payload large enough to make the checksum field
/// interesting. The region from offset 64 up is pseudo-random but fixed.
fn isolinux_payload() -> Vec<u8> {
    let mut payload = vec![0u8; 40 * 1024];
    let mut value = 0x1234_5678u32;
    for (i, byte) in payload.iter_mut().enumerate().skip(64) {
        value = value.wrapping_mul(1664525).wrapping_add(1013904223);
        *byte = (value >> ((i % 4) * 8)) as u8;
    }
    payload
}

fn write_linux_iso(dir: &Path) -> PathBuf {
    let mut writer = IsoWriter::new("DEBIAN_CUSTOM");
    writer
        .add_file("isolinux/isolinux.bin", isolinux_payload())
        .unwrap();
    writer
        .add_file("isolinux/isolinux.cfg", b"default install\n".to_vec())
        .unwrap();
    writer
        .add_file("boot/grub/efi.img", vec![0x42; 6144])
        .unwrap();
    writer
        .add_file("pool/main/pkg_1.0.deb", vec![7u8; 5000])
        .unwrap();
    writer.add_file("README.txt", b"hello\n".to_vec()).unwrap();
    writer
        .add_file("dists/bookworm/Release", b"Suite: stable\n".to_vec())
        .unwrap();
    writer.add_symlink("dists/stable", "bookworm").unwrap();
    writer
        .add_file("doc/index.en.html", b"<html/>".to_vec())
        .unwrap();
    writer.add_symlink("doc/index.html", "index.en.html").unwrap();
    writer.add_symlink("broken", "no/such/target").unwrap();

    let path = dir.join("debian-custom.iso");
    std::fs::write(&path, writer.build().unwrap()).unwrap();
    path
}

fn modify(
    source: &Path,
    out: &Path,
    content: &[(&str, &[u8])],
) -> (String, IsoReader) {
    let mut modifier = IsoModifier::new(source, Arc::new(StubRebuilder::default()));
    for (path, bytes) in content {
        modifier.add_content(path, bytes.to_vec());
    }
    let checksum = modifier.write_modified(out).unwrap();
    (checksum, IsoReader::open(out).unwrap())
}

fn read_at(path: &Path, offset: u64, len: usize) -> Vec<u8> {
    let mut file = std::fs::File::open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).unwrap();
    buf
}

fn file_bytes(reader: &mut IsoReader, path: &str) -> Vec<u8> {
    let entry = reader
        .lookup(path)
        .unwrap()
        .unwrap_or_else(|| panic!("{path} missing from image"));
    reader.read_file(&entry).unwrap()
}

// ============================================================================
// ROUND-TRIP
// ============================================================================

#[test]
fn mutated_image_preserves_sources_and_adds_injected_files() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    let out = dir.path().join("out.iso");

    let (checksum, mut reader) = modify(
        &source,
        &out,
        &[
            ("preseed/ks.cfg", b"auto install\n"),
            ("README.txt", b"replaced\n"),
        ],
    );

    // Every original file survives byte-for-byte (symlinks aside).
    assert_eq!(
        file_bytes(&mut reader, "isolinux/isolinux.cfg"),
        b"default install\n"
    );
    assert_eq!(file_bytes(&mut reader, "pool/main/pkg_1.0.deb"), vec![7u8; 5000]);
    assert_eq!(
        file_bytes(&mut reader, "dists/bookworm/Release"),
        b"Suite: stable\n"
    );

    // Injected files landed; collisions replaced the original.
    assert_eq!(file_bytes(&mut reader, "preseed/ks.cfg"), b"auto install\n");
    assert_eq!(file_bytes(&mut reader, "README.txt"), b"replaced\n");

    // The volume identifier is carried through.
    assert_eq!(reader.volume_id(), "DEBIAN_CUSTOM");

    // The returned digest is the SHA-256 of the written bytes.
    assert_eq!(checksum, checksum_file(&out).unwrap());
}

#[test]
fn symlinks_are_materialized_or_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    let out = dir.path().join("out.iso");
    let (_checksum, mut reader) = modify(&source, &out, &[("x", b"y")]);

    // Directory link: dists/stable materialized with bookworm's contents.
    assert_eq!(
        file_bytes(&mut reader, "dists/stable/Release"),
        b"Suite: stable\n"
    );
    // File link: doc/index.html materialized from its dotted sibling.
    assert_eq!(file_bytes(&mut reader, "doc/index.html"), b"<html/>");
    // Unresolvable links are omitted, not errors.
    assert!(reader.lookup("broken").unwrap().is_none());
}

#[test]
fn caller_mapping_overrides_symlink_heuristics() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    let out = dir.path().join("out.iso");

    let mut modifier = IsoModifier::new(&source, Arc::new(StubRebuilder::default()));
    modifier.add_content("x", b"y".to_vec());
    modifier.set_symlink_targets(BTreeMap::from([(
        "doc/index.html".to_string(),
        "README.txt".to_string(),
    )]));
    modifier.write_modified(&out).unwrap();

    let mut reader = IsoReader::open(&out).unwrap();
    assert_eq!(file_bytes(&mut reader, "doc/index.html"), b"hello\n");
}

// ============================================================================
// BOOT PRESERVATION
// ============================================================================

#[test]
fn boot_info_table_is_patched_for_isolinux() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    let out = dir.path().join("out.iso");
    let (_checksum, mut reader) = modify(&source, &out, &[("ks.cfg", b"x")]);

    let entry = reader
        .lookup("isolinux/isolinux.bin")
        .unwrap()
        .expect("boot payload present");
    let payload = reader.read_file(&entry).unwrap();

    let lba = u32::from_le_bytes(payload[12..16].try_into().unwrap());
    let length = u32::from_le_bytes(payload[16..20].try_into().unwrap());
    let csum = u32::from_le_bytes(payload[20..24].try_into().unwrap());

    assert_eq!(
        u32::from_le_bytes(payload[8..12].try_into().unwrap()),
        16,
        "bi_pvd must point at the PVD"
    );
    assert_eq!(lba, entry.lba, "bi_file must be the payload's own LBA");
    assert_eq!(length, entry.size, "bi_length must be the payload length");

    let mut expected = 0u32;
    let mut i = 64;
    while i + 4 <= payload.len() {
        expected =
            expected.wrapping_add(u32::from_le_bytes(payload[i..i + 4].try_into().unwrap()));
        i += 4;
    }
    assert_eq!(csum, expected, "bi_csum must cover [64, len)");

    // Offsets 24-55 stay zero.
    assert_eq!(&payload[24..56], &[0u8; 32]);
}

#[test]
fn dual_platform_catalog_carries_both_entries() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    let out = dir.path().join("out.iso");
    let (_checksum, mut reader) = modify(&source, &out, &[("ks.cfg", b"x")]);

    // El-Torito boot record at sector 17 names the catalog.
    let record = read_at(&out, 17 * SECTOR, 2048);
    assert_eq!(record[0], 0);
    assert_eq!(&record[1..6], b"CD001");
    assert_eq!(&record[7..30], b"EL TORITO SPECIFICATION");
    let catalog_lba = u32::from_le_bytes(record[71..75].try_into().unwrap()) as u64;

    let catalog = read_at(&out, catalog_lba * SECTOR, 2048);
    // Validation entry, BIOS platform, self-checksummed, 55AA trailer.
    assert_eq!(catalog[0], 1);
    assert_eq!(catalog[1], 0x00);
    assert_eq!(catalog[30], 0x55);
    assert_eq!(catalog[31], 0xAA);
    let sum = (0..32).step_by(2).fold(0u16, |acc, i| {
        acc.wrapping_add(u16::from_le_bytes([catalog[i], catalog[i + 1]]))
    });
    assert_eq!(sum, 0, "validation entry must checksum to zero");

    // Default entry: bootable, no emulation, 4 virtual sectors, pointing at
    // the BIOS payload.
    let bios = reader
        .lookup("isolinux/isolinux.bin")
        .unwrap()
        .expect("bios payload");
    assert_eq!(catalog[32], 0x88);
    assert_eq!(catalog[33], 0x00);
    assert_eq!(u16::from_le_bytes([catalog[38], catalog[39]]), 4);
    assert_eq!(
        u32::from_le_bytes(catalog[40..44].try_into().unwrap()),
        bios.lba
    );

    // Section header + EFI entry.
    let efi = reader
        .lookup("boot/grub/efi.img")
        .unwrap()
        .expect("efi payload");
    assert_eq!(catalog[64], 0x91);
    assert_eq!(catalog[65], 0xEF);
    assert_eq!(catalog[96], 0x88);
    assert_eq!(
        u32::from_le_bytes(catalog[104..108].try_into().unwrap()),
        efi.lba
    );
}

// ============================================================================
// UDF DISPATCH
// ============================================================================

#[test]
fn udf_signatures_route_to_the_external_rebuilder() {
    let dir = tempfile::tempdir().unwrap();

    for signature in [b"BEA01", b"NSR02", b"NSR03", b"TEA01"] {
        let path = dir.path().join("win.iso");
        let mut image = vec![0u8; 21 * SECTOR as usize];
        image[16 * SECTOR as usize + 1..16 * SECTOR as usize + 6].copy_from_slice(signature);
        std::fs::write(&path, &image).unwrap();
        assert!(detect::probe_udf(&path).unwrap(), "{signature:?}");

        let rebuilder = Arc::new(StubRebuilder::default());
        let mut modifier = IsoModifier::new(&path, rebuilder.clone());
        modifier.add_content("autounattend.xml", b"<xml/>".to_vec());
        let out = dir.path().join("win-out.iso");
        let checksum = modifier.write_modified(&out).unwrap();

        let requests = rebuilder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1, "rebuild must go through the external path");
        assert!(requests[0].files.contains_key("autounattend.xml"));
        drop(requests);

        // The digest covers whatever the rebuilder produced.
        assert_eq!(checksum, checksum_file(&out).unwrap());
    }
}

#[test]
fn udf_path_fails_cleanly_without_host_tools() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("win.iso");
    let mut image = vec![0u8; 21 * SECTOR as usize];
    image[16 * SECTOR as usize + 1..16 * SECTOR as usize + 6].copy_from_slice(b"NSR02");
    std::fs::write(&path, &image).unwrap();

    let rebuilder = Arc::new(StubRebuilder {
        missing_tools: true,
        ..Default::default()
    });
    let mut modifier = IsoModifier::new(&path, rebuilder);
    modifier.add_content("autounattend.xml", b"<xml/>".to_vec());
    let err = modifier
        .write_modified(&dir.path().join("out.iso"))
        .unwrap_err();
    assert!(matches!(err, vappforge::ForgeError::MissingTool(_)));
}

#[test]
fn plain_iso_is_not_misdetected_as_udf() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    assert!(!detect::probe_udf(&source).unwrap());
}

// ============================================================================
// DETECTION
// ============================================================================

#[test]
fn boot_detection_finds_both_platforms_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_linux_iso(dir.path());
    let mut reader = IsoReader::open(&source).unwrap();
    let profile = detect::detect_boot(&mut reader).unwrap();

    let bios = profile.bios.expect("bios payload detected");
    assert_eq!(bios.path, "isolinux/isolinux.bin");
    assert_eq!(bios.load_sectors, 4);
    assert!(bios.needs_boot_info_table);
    assert_eq!(profile.uefi.as_deref(), Some("boot/grub/efi.img"));
    assert_eq!(profile.volume_id, "DEBIAN_CUSTOM");
}

#[test]
fn windows_layout_prefers_etfsboot_with_eight_sectors() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = IsoWriter::new("WIN_SRV");
    writer
        .add_file("boot/etfsboot.com", vec![1u8; 4096])
        .unwrap();
    writer
        .add_file("efi/microsoft/boot/efisys.bin", vec![2u8; 4096])
        .unwrap();
    let path = dir.path().join("win-layout.iso");
    std::fs::write(&path, writer.build().unwrap()).unwrap();

    let mut reader = IsoReader::open(&path).unwrap();
    let profile = detect::detect_boot(&mut reader).unwrap();
    let bios = profile.bios.expect("bios payload detected");
    assert_eq!(bios.path, "boot/etfsboot.com");
    assert_eq!(bios.load_sectors, 8);
    assert!(!bios.needs_boot_info_table);
    assert_eq!(
        profile.uefi.as_deref(),
        Some("efi/microsoft/boot/efisys.bin")
    );
}
