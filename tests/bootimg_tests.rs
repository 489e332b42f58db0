mod common;

use common::ScriptedRunner;
use ksu_kbuild::bootimg::{BootImageAssembler, RamdiskSource};
use ksu_kbuild::orchestrator::Invocation;
use ksu_kbuild::{AppError, AssemblerTools, Compressor, ConfigError, ValidationError};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

fn tools(gzip: Compressor, unpack: bool) -> AssemblerTools {
    AssemblerTools {
        gzip,
        mkbootimg: PathBuf::from("mkbootimg"),
        avbtool: PathBuf::from("avbtool"),
        unpack_bootimg: unpack.then(|| PathBuf::from("unpack_bootimg")),
        avb_key: PathBuf::from("/keys/testkey_rsa2048.pem"),
    }
}

/// Stands in for gzip, mkbootimg and unpack_bootimg by producing their outputs
fn fake_tools(inv: &Invocation) {
    match inv.program.as_str() {
        "gzip" => {
            let file = inv.args.last().unwrap();
            fs::write(inv.cwd.join(format!("{}.gz", file)), b"gz").unwrap();
            if !inv.args.iter().any(|a| a == "-k") {
                fs::remove_file(inv.cwd.join(file)).unwrap();
            }
        }
        "mkbootimg" => {
            let pos = inv.args.iter().position(|a| a == "--output").unwrap();
            fs::write(inv.cwd.join(&inv.args[pos + 1]), b"ANDROID!").unwrap();
        }
        "unpack_bootimg" => {
            let out = inv
                .args
                .iter()
                .find_map(|a| a.strip_prefix("--out="))
                .unwrap();
            fs::create_dir_all(out).unwrap();
            fs::write(Path::new(out).join("ramdisk"), b"ramdisk").unwrap();
        }
        _ => {}
    }
}

fn image_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Image"), vec![0u8; 2048]).unwrap();
    dir
}

fn gki_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("boot-5.10.img", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"ANDROID! certified").unwrap();
    writer.finish().unwrap().into_inner()
}

fn upload_names(uploads: &[PathBuf]) -> Vec<String> {
    uploads
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_assemble_with_external_gzip() {
    let root = tempdir().unwrap();
    let dir = image_dir(root.path(), "Image-android13-5.15_2024-01");
    fs::write(dir.join("Image.lz4"), b"lz4").unwrap();
    fs::create_dir(root.path().join("not-an-image")).unwrap();

    let runner = ScriptedRunner::new().on_call(fake_tools);
    let tools = tools(Compressor::External(PathBuf::from("gzip")), false);
    let uploads = BootImageAssembler::new(&runner, &tools, "a13")
        .run(root.path())
        .await
        .unwrap();

    assert_eq!(
        upload_names(&uploads),
        vec![
            "android13-5.15_2024-01-boot.img.gz",
            "android13-5.15_2024-01-boot-gz.img.gz",
            "android13-5.15_2024-01-boot-lz4.img.gz",
        ]
    );
    for upload in &uploads {
        assert!(upload.is_file());
    }
    assert!(!dir.join("boot.img").exists());
    assert!(dir.join("Image").exists());

    let commands = runner.command_lines();
    assert_eq!(commands[0], "gzip -n -k -f -9 Image");
    assert_eq!(
        commands[1],
        "mkbootimg --header_version 4 --kernel Image --output boot.img"
    );
    assert_eq!(
        commands[2],
        "avbtool add_hash_footer --partition_name boot --partition_size 67108864 \
--algorithm SHA256_RSA2048 --key /keys/testkey_rsa2048.pem --image boot.img"
    );
    assert!(commands.contains(&"gzip -n -f -9 boot-lz4.img".to_string()));
    assert!(!commands.iter().any(|c| c.contains("--ramdisk")));
}

#[tokio::test]
async fn test_missing_variants_are_skipped() {
    let root = tempdir().unwrap();
    let dir = image_dir(root.path(), "Image-2024-05");

    let runner = ScriptedRunner::new().on_call(fake_tools);
    let tools = tools(Compressor::Builtin, false);
    let uploads = BootImageAssembler::new(&runner, &tools, "a14")
        .run(root.path())
        .await
        .unwrap();

    assert_eq!(
        upload_names(&uploads),
        vec!["2024-05-boot.img.gz", "2024-05-boot-gz.img.gz"]
    );
    assert!(dir.join("Image.gz").is_file());
    assert!(!runner.command_lines().iter().any(|c| c.contains("boot-lz4")));
}

#[tokio::test]
async fn test_directory_without_kernel_fails() {
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("Image-empty")).unwrap();

    let runner = ScriptedRunner::new();
    let tools = tools(Compressor::Builtin, false);
    let result = BootImageAssembler::new(&runner, &tools, "a13")
        .run(root.path())
        .await;
    assert!(matches!(
        result,
        Err(AppError::Validation(ValidationError::ArtifactMissing(_)))
    ));
}

#[tokio::test]
async fn test_a12_requires_unpack_tool() {
    let root = tempdir().unwrap();
    image_dir(root.path(), "Image-2024-03");

    let runner = ScriptedRunner::new();
    let tools = tools(Compressor::Builtin, false);
    let result = BootImageAssembler::new(&runner, &tools, "a12")
        .run(root.path())
        .await;
    assert!(matches!(
        result,
        Err(AppError::Config(ConfigError::InvalidValue { .. }))
    ));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_a12_falls_back_when_patch_level_missing() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/gki-2024-03.zip")
        .with_status(404)
        .create_async()
        .await;
    let primary_get = server
        .mock("GET", "/gki-2024-03.zip")
        .expect(0)
        .create_async()
        .await;
    let fallback = server
        .mock("GET", "/fallback.zip")
        .with_status(200)
        .with_body(gki_zip())
        .create_async()
        .await;

    let root = tempdir().unwrap();
    let dir = image_dir(root.path(), "Image-2024-03");
    let runner = ScriptedRunner::new().on_call(fake_tools);
    let tools = tools(Compressor::Builtin, true);
    let source = RamdiskSource::new(
        format!("{}/gki-{{patch_level}}.zip", server.url()),
        format!("{}/fallback.zip", server.url()),
    );

    let uploads = BootImageAssembler::new(&runner, &tools, "a12")
        .with_ramdisk_source(source)
        .run(root.path())
        .await
        .unwrap();

    head.assert_async().await;
    primary_get.assert_async().await;
    fallback.assert_async().await;

    assert_eq!(
        upload_names(&uploads),
        vec!["2024-03-boot.img.gz", "2024-03-boot-gz.img.gz"]
    );
    assert!(!dir.join("gki-kernel.zip").exists());
    assert!(!dir.join("boot-5.10.img").exists());

    let calls = runner.calls();
    assert_eq!(calls[0].program, "unpack_bootimg");
    assert_eq!(
        calls[0].args[0],
        format!("--boot_img={}", dir.join("boot-5.10.img").display())
    );
    let mkbootimg = calls.iter().find(|c| c.program == "mkbootimg").unwrap();
    assert!(mkbootimg.command_line().ends_with(
        "--ramdisk out/ramdisk --os_version 12.0.0 --os_patch_level 2024-03"
    ));
}

#[tokio::test]
async fn test_a12_uses_patch_level_archive_when_available() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/gki-2023-05.zip")
        .with_status(200)
        .create_async()
        .await;
    let primary = server
        .mock("GET", "/gki-2023-05.zip")
        .with_status(200)
        .with_body(gki_zip())
        .create_async()
        .await;
    let fallback = server
        .mock("GET", "/fallback.zip")
        .expect(0)
        .create_async()
        .await;

    let root = tempdir().unwrap();
    image_dir(root.path(), "Image-android12-5.10_2023-05");
    let runner = ScriptedRunner::new().on_call(fake_tools);
    let tools = tools(Compressor::Builtin, true);
    let source = RamdiskSource::new(
        format!("{}/gki-{{patch_level}}.zip", server.url()),
        format!("{}/fallback.zip", server.url()),
    );

    let uploads = BootImageAssembler::new(&runner, &tools, "a12")
        .with_ramdisk_source(source)
        .run(root.path())
        .await
        .unwrap();

    head.assert_async().await;
    primary.assert_async().await;
    fallback.assert_async().await;
    assert_eq!(uploads.len(), 2);
}

#[tokio::test]
async fn test_a12_download_failure_is_fatal() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("HEAD", "/gki-2024-03.zip")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/fallback.zip")
        .with_status(500)
        .create_async()
        .await;

    let root = tempdir().unwrap();
    image_dir(root.path(), "Image-2024-03");
    let runner = ScriptedRunner::new().on_call(fake_tools);
    let tools = tools(Compressor::Builtin, true);
    let source = RamdiskSource::new(
        format!("{}/gki-{{patch_level}}.zip", server.url()),
        format!("{}/fallback.zip", server.url()),
    );

    let result = BootImageAssembler::new(&runner, &tools, "a12")
        .with_ramdisk_source(source)
        .run(root.path())
        .await;
    assert!(matches!(
        result,
        Err(AppError::Build(ksu_kbuild::BuildError::Fetch(_)))
    ));
    assert!(runner.calls().is_empty());
}
