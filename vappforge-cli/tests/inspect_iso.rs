use assert_cmd::Command;
use predicates::prelude::*;
use vappforge::iso::IsoWriter;

fn vappforge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vappforge"))
}

#[test]
fn inspect_reports_boot_profile_of_a_linux_image() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = IsoWriter::new("MINI_LINUX");
    writer
        .add_file("isolinux/isolinux.bin", vec![0u8; 4096])
        .unwrap();
    writer
        .add_file("EFI/BOOT/BOOTX64.EFI", vec![1u8; 2048])
        .unwrap();
    let path = dir.path().join("mini.iso");
    std::fs::write(&path, writer.build().unwrap()).unwrap();

    vappforge()
        .arg("inspect-iso")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("format: ISO-9660"))
        .stdout(predicate::str::contains("volume: MINI_LINUX"))
        .stdout(predicate::str::contains(
            "bios boot: isolinux/isolinux.bin (load 4 sectors, boot-info-table)",
        ))
        .stdout(predicate::str::contains("uefi boot: EFI/BOOT/BOOTX64.EFI"));
}

#[test]
fn inspect_flags_udf_images() {
    let dir = tempfile::tempdir().unwrap();
    let mut image = vec![0u8; 21 * 2048];
    image[16 * 2048 + 1..16 * 2048 + 6].copy_from_slice(b"NSR02");
    let path = dir.path().join("win.iso");
    std::fs::write(&path, &image).unwrap();

    vappforge()
        .arg("inspect-iso")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("format: UDF (dual)"))
        .stdout(predicate::str::contains("external rebuild path"));
}
